//! Scope and binding analysis.
//!
//! One walk over a [`Program`] builds the frame tree (program, function,
//! block and loop/catch head scopes), declares every binding up front the way
//! JavaScript hoisting does, and resolves each identifier reference to the
//! frame that declares it. `var` is function-scoped; `let`, `const`, `class`
//! and function declarations bind in their enclosing block.

use indexmap::IndexMap;
use std::collections::HashSet;

use crate::ast::*;
use crate::visit::{self, ScopeOwner, Visit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Program,
    /// Function body or block-bodied arrow.
    Function,
    Block,
    /// Scope without a statement list of its own (loop heads, catch
    /// parameters, expression-bodied arrows, switch bodies).
    Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Var,
    Let,
    Const,
    Function,
    Class,
    Param,
    Import,
    CatchParam,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub kind: BindingKind,
    /// Declarator span for variables, `None` otherwise.
    pub declarator: Option<Span>,
    /// Declared as `name = init` with a plain identifier and an initializer.
    pub simple_init: bool,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub owner: ScopeOwner,
    pub kind: FrameKind,
    pub parent: Option<usize>,
    pub depth: usize,
    pub bindings: IndexMap<String, Binding>,
}

impl Frame {
    pub fn has_statements(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Program | FrameKind::Function | FrameKind::Block
        )
    }
}

#[derive(Debug, Clone)]
pub struct Reference {
    pub span: Span,
    pub name: String,
    /// Declaring frame; `None` for globals.
    pub resolved: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ScopeAnalysis {
    frames: Vec<Frame>,
    references: Vec<Reference>,
    assigned: HashSet<(usize, String)>,
    names: HashSet<String>,
}

impl ScopeAnalysis {
    pub fn new(program: &Program) -> Self {
        let mut analyzer = Analyzer {
            analysis: ScopeAnalysis {
                frames: Vec::new(),
                references: Vec::new(),
                assigned: HashSet::new(),
                names: HashSet::new(),
            },
            stack: Vec::new(),
        };
        analyzer.visit_program(program);
        analyzer.analysis
    }

    pub const ROOT: usize = 0;

    pub fn frame(&self, id: usize) -> &Frame {
        &self.frames[id]
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// The reference whose identifier has exactly `span`.
    pub fn reference_at(&self, span: Span) -> Option<&Reference> {
        if span.is_synthetic() {
            return None;
        }
        self.references.iter().find(|r| r.span == span)
    }

    /// References inside `span` that resolve outside of it (or to globals),
    /// in source order.
    pub fn free_references(&self, span: Span) -> Vec<&Reference> {
        self.references
            .iter()
            .filter(|r| span.contains(r.span))
            .filter(|r| match r.resolved {
                None => true,
                Some(frame) => !self.frames[frame].owner.within(span),
            })
            .collect()
    }

    /// Frame ids from `frame` up to the program root.
    pub fn chain(&self, frame: usize) -> Vec<usize> {
        let mut out = vec![frame];
        let mut current = self.frames[frame].parent;
        while let Some(id) = current {
            out.push(id);
            current = self.frames[id].parent;
        }
        out
    }

    pub fn find_frame(&self, owner: ScopeOwner) -> Option<usize> {
        self.frames.iter().position(|f| f.owner == owner)
    }

    /// The name is the target of an assignment or update somewhere.
    pub fn is_reassigned(&self, frame: usize, name: &str) -> bool {
        self.assigned.contains(&(frame, name.to_string()))
    }

    /// Every identifier name that appears in the program.
    pub fn all_names(&self) -> &HashSet<String> {
        &self.names
    }

    /// Exactly one frame binds `name`, so it can never be shadowed.
    pub fn is_unique_binding(&self, name: &str) -> bool {
        self.frames
            .iter()
            .filter(|f| f.bindings.contains_key(name))
            .count()
            == 1
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATION SCANS
// ═══════════════════════════════════════════════════════════════════════════════

fn declare_var_decl(decl: &VarDecl, kind: BindingKind, out: &mut IndexMap<String, Binding>) {
    for declarator in &decl.declarations {
        match &declarator.id {
            Pattern::Ident(id) => declare(
                out,
                &id.name,
                Binding {
                    kind,
                    declarator: Some(declarator.span),
                    simple_init: declarator.init.is_some(),
                },
            ),
            pattern => {
                let mut names = Vec::new();
                pattern.bound_names(&mut names);
                for name in names {
                    declare(
                        out,
                        &name,
                        Binding {
                            kind,
                            declarator: Some(declarator.span),
                            simple_init: false,
                        },
                    );
                }
            }
        }
    }
}

fn declare(out: &mut IndexMap<String, Binding>, name: &str, binding: Binding) {
    match out.get_mut(name) {
        // Redeclared names are never safe to relocate.
        Some(existing) => existing.simple_init = false,
        None => {
            out.insert(name.to_string(), binding);
        }
    }
}

fn plain(kind: BindingKind) -> Binding {
    Binding {
        kind,
        declarator: None,
        simple_init: false,
    }
}

/// `var` declarations of a function body, through nested blocks but not
/// into nested functions.
fn hoisted_vars(stmts: &[Stmt], out: &mut IndexMap<String, Binding>) {
    for stmt in stmts {
        hoisted_vars_stmt(stmt, out);
    }
}

fn hoisted_vars_stmt(stmt: &Stmt, out: &mut IndexMap<String, Binding>) {
    match stmt {
        Stmt::Var(decl) if decl.kind == VarKind::Var => {
            declare_var_decl(decl, BindingKind::Var, out)
        }
        Stmt::If(stmt) => {
            hoisted_vars_stmt(&stmt.consequent, out);
            if let Some(alternate) = &stmt.alternate {
                hoisted_vars_stmt(alternate, out);
            }
        }
        Stmt::Block(block) => hoisted_vars(&block.body, out),
        Stmt::For(stmt) => {
            if let Some(ForInit::Var(decl)) = &stmt.init {
                if decl.kind == VarKind::Var {
                    declare_var_decl(decl, BindingKind::Var, out);
                }
            }
            hoisted_vars_stmt(&stmt.body, out);
        }
        Stmt::ForEach(stmt) => {
            if stmt.decl_kind == Some(VarKind::Var) {
                let mut names = Vec::new();
                stmt.left.bound_names(&mut names);
                for name in names {
                    declare(out, &name, plain(BindingKind::Var));
                }
            }
            hoisted_vars_stmt(&stmt.body, out);
        }
        Stmt::While(stmt) => hoisted_vars_stmt(&stmt.body, out),
        Stmt::Switch(stmt) => {
            for case in &stmt.cases {
                hoisted_vars(&case.consequent, out);
            }
        }
        Stmt::Try(stmt) => {
            hoisted_vars(&stmt.block.body, out);
            if let Some(handler) = &stmt.handler {
                hoisted_vars(&handler.body.body, out);
            }
            if let Some(finalizer) = &stmt.finalizer {
                hoisted_vars(&finalizer.body, out);
            }
        }
        Stmt::Export(export) => {
            if let ExportDecl::Decl(inner) = &export.decl {
                hoisted_vars_stmt(inner, out);
            }
        }
        _ => {}
    }
}

/// Block-scoped declarations directly inside a statement list.
fn lexical(stmts: &[Stmt], out: &mut IndexMap<String, Binding>) {
    for stmt in stmts {
        lexical_stmt(stmt, out);
    }
}

fn lexical_stmt(stmt: &Stmt, out: &mut IndexMap<String, Binding>) {
    match stmt {
        Stmt::Var(decl) => match decl.kind {
            VarKind::Let => declare_var_decl(decl, BindingKind::Let, out),
            VarKind::Const => declare_var_decl(decl, BindingKind::Const, out),
            VarKind::Var => {}
        },
        Stmt::Function(function) => {
            if let Some(id) = &function.id {
                declare(out, &id.name, plain(BindingKind::Function));
            }
        }
        Stmt::Class { id, .. } => declare(out, &id.name, plain(BindingKind::Class)),
        Stmt::Import(decl) => {
            for spec in &decl.specifiers {
                let (ImportSpec::Default { local }
                | ImportSpec::Namespace { local }
                | ImportSpec::Named { local, .. }) = spec;
                declare(out, &local.name, plain(BindingKind::Import));
            }
        }
        Stmt::Export(export) => match &export.decl {
            ExportDecl::Decl(inner) => lexical_stmt(inner, out),
            ExportDecl::DefaultFunction(function) => {
                if let Some(id) = &function.id {
                    declare(out, &id.name, plain(BindingKind::Function));
                }
            }
            _ => {}
        },
        _ => {}
    }
}

fn declare_params(params: &[Pattern], out: &mut IndexMap<String, Binding>) {
    for param in params {
        let mut names = Vec::new();
        param.bound_names(&mut names);
        for name in names {
            declare(out, &name, plain(BindingKind::Param));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANALYZER
// ═══════════════════════════════════════════════════════════════════════════════

struct Analyzer {
    analysis: ScopeAnalysis,
    stack: Vec<usize>,
}

impl Analyzer {
    fn push(&mut self, owner: ScopeOwner, kind: FrameKind, bindings: IndexMap<String, Binding>) {
        let parent = self.stack.last().copied();
        let depth = parent.map_or(0, |p| self.analysis.frames[p].depth + 1);
        for name in bindings.keys() {
            self.analysis.names.insert(name.clone());
        }
        self.analysis.frames.push(Frame {
            owner,
            kind,
            parent,
            depth,
            bindings,
        });
        self.stack.push(self.analysis.frames.len() - 1);
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn resolve(&self, name: &str) -> Option<usize> {
        self.stack
            .iter()
            .rev()
            .copied()
            .find(|&id| self.analysis.frames[id].bindings.contains_key(name))
    }

    fn mark_assigned(&mut self, name: &str) {
        if let Some(frame) = self.resolve(name) {
            self.analysis.assigned.insert((frame, name.to_string()));
        }
    }

    fn function_scope(&mut self, span: Span, id: Option<&Ident>, params: &[Pattern], body: &[Stmt]) {
        let mut bindings = IndexMap::new();
        if let Some(id) = id {
            declare(&mut bindings, &id.name, plain(BindingKind::Function));
        }
        declare_params(params, &mut bindings);
        hoisted_vars(body, &mut bindings);
        lexical(body, &mut bindings);
        self.push(ScopeOwner::Node(span), FrameKind::Function, bindings);
        for param in params {
            self.visit_pattern(param);
        }
        for stmt in body {
            self.visit_stmt(stmt);
        }
        self.pop();
    }
}

impl Visit for Analyzer {
    fn visit_program(&mut self, program: &Program) {
        let mut bindings = IndexMap::new();
        hoisted_vars(&program.body, &mut bindings);
        lexical(&program.body, &mut bindings);
        self.push(ScopeOwner::Program, FrameKind::Program, bindings);
        visit::walk_program(self, program);
        self.pop();
    }

    fn visit_block(&mut self, block: &Block) {
        let mut bindings = IndexMap::new();
        lexical(&block.body, &mut bindings);
        self.push(ScopeOwner::Node(block.span), FrameKind::Block, bindings);
        visit::walk_block(self, block);
        self.pop();
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::For(for_stmt) => match &for_stmt.init {
                Some(ForInit::Var(decl)) if decl.kind != VarKind::Var => {
                    let mut bindings = IndexMap::new();
                    let kind = if decl.kind == VarKind::Let {
                        BindingKind::Let
                    } else {
                        BindingKind::Const
                    };
                    declare_var_decl(decl, kind, &mut bindings);
                    self.push(ScopeOwner::Node(for_stmt.span), FrameKind::Head, bindings);
                    visit::walk_stmt(self, stmt);
                    self.pop();
                }
                _ => visit::walk_stmt(self, stmt),
            },
            Stmt::ForEach(each) => match each.decl_kind {
                Some(VarKind::Let) | Some(VarKind::Const) => {
                    let mut bindings = IndexMap::new();
                    let mut names = Vec::new();
                    each.left.bound_names(&mut names);
                    for name in names {
                        declare(&mut bindings, &name, plain(BindingKind::Let));
                    }
                    self.push(ScopeOwner::Node(each.span), FrameKind::Head, bindings);
                    visit::walk_stmt(self, stmt);
                    self.pop();
                }
                Some(VarKind::Var) => visit::walk_stmt(self, stmt),
                None => {
                    if let Pattern::Ident(id) = &each.left {
                        self.mark_assigned(&id.name);
                        self.visit_ident(id);
                    } else {
                        self.visit_pattern(&each.left);
                    }
                    self.visit_expr(&each.right);
                    self.visit_stmt(&each.body);
                }
            },
            Stmt::Switch(switch) => {
                self.visit_expr(&switch.discriminant);
                let mut bindings = IndexMap::new();
                for case in &switch.cases {
                    lexical(&case.consequent, &mut bindings);
                }
                self.push(ScopeOwner::Node(switch.span), FrameKind::Head, bindings);
                for case in &switch.cases {
                    if let Some(test) = &case.test {
                        self.visit_expr(test);
                    }
                    for stmt in &case.consequent {
                        self.visit_stmt(stmt);
                    }
                }
                self.pop();
            }
            Stmt::Try(try_stmt) => {
                self.visit_block(&try_stmt.block);
                if let Some(handler) = &try_stmt.handler {
                    let mut bindings = IndexMap::new();
                    if let Some(param) = &handler.param {
                        let mut names = Vec::new();
                        param.bound_names(&mut names);
                        for name in names {
                            declare(&mut bindings, &name, plain(BindingKind::CatchParam));
                        }
                    }
                    self.push(ScopeOwner::Node(handler.span), FrameKind::Head, bindings);
                    if let Some(param) = &handler.param {
                        self.visit_pattern(param);
                    }
                    self.visit_block(&handler.body);
                    self.pop();
                }
                if let Some(finalizer) = &try_stmt.finalizer {
                    self.visit_block(finalizer);
                }
            }
            _ => visit::walk_stmt(self, stmt),
        }
    }

    fn visit_function(&mut self, function: &Function) {
        self.function_scope(
            function.span,
            function.id.as_ref(),
            &function.params,
            &function.body,
        );
    }

    fn visit_arrow(&mut self, arrow: &Arrow) {
        match &arrow.body {
            ArrowBody::Block(body) => self.function_scope(arrow.span, None, &arrow.params, body),
            ArrowBody::Expr(expr) => {
                let mut bindings = IndexMap::new();
                declare_params(&arrow.params, &mut bindings);
                self.push(ScopeOwner::Node(arrow.span), FrameKind::Head, bindings);
                for param in &arrow.params {
                    self.visit_pattern(param);
                }
                self.visit_expr(expr);
                self.pop();
            }
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Assign { target, .. } => {
                if let Pattern::Ident(id) = &**target {
                    self.mark_assigned(&id.name);
                }
            }
            Expr::Update { target, .. } => {
                if let Expr::Ident(id) = &**target {
                    self.mark_assigned(&id.name);
                }
            }
            _ => {}
        }
        visit::walk_expr(self, expr);
    }

    fn visit_ident(&mut self, ident: &Ident) {
        self.analysis.names.insert(ident.name.clone());
        let resolved = self.resolve(&ident.name);
        self.analysis.references.push(Reference {
            span: ident.span,
            name: ident.name.clone(),
            resolved,
        });
    }
}

/// Names that must never be shadowed by generated bindings.
pub fn is_reserved_name(name: &str) -> bool {
    matches!(
        name,
        "undefined"
            | "NaN"
            | "Infinity"
            | "arguments"
            | "exports"
            | "module"
            | "require"
            | "__filename"
            | "__dirname"
    )
}

/// Pick `base` if unused, else `base2`, `base3`, ..., and reserve it.
pub fn alloc_unique_name(used: &mut HashSet<String>, base: &str) -> String {
    if !used.contains(base) && !is_reserved_name(base) {
        used.insert(base.to_string());
        return base.to_string();
    }
    let mut idx: usize = 2;
    loop {
        let name = format!("{}{}", base, idx);
        if !used.contains(&name) {
            used.insert(name.clone());
            return name;
        }
        idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_module;

    fn analyze(src: &str) -> (crate::lower::ParsedModule, ScopeAnalysis) {
        let module = parse_module(src, "test.js").unwrap();
        let analysis = ScopeAnalysis::new(&module.program);
        (module, analysis)
    }

    fn span_of(src: &str, needle: &str) -> Span {
        let start = src.find(needle).unwrap() as u32;
        Span::new(start, start + needle.len() as u32)
    }

    #[test]
    fn test_resolves_through_frames() {
        let src = "const top = 1;\nfunction f(p) { const inner = p + top; return inner + g; }";
        let (_, analysis) = analyze(src);

        let refs: Vec<_> = analysis
            .references()
            .iter()
            .map(|r| (r.name.as_str(), r.resolved.map(|f| analysis.frame(f).kind)))
            .collect();
        assert_eq!(
            refs,
            vec![
                ("p", Some(FrameKind::Function)),
                ("top", Some(FrameKind::Program)),
                ("inner", Some(FrameKind::Function)),
                ("g", None),
            ]
        );
    }

    #[test]
    fn test_var_is_function_scoped() {
        let src = "function f() { if (x) { var v = 1; let l = 2; } return v + l; }";
        let (_, analysis) = analyze(src);
        let v = analysis.references().iter().find(|r| r.name == "v").unwrap();
        let l = analysis
            .references()
            .iter()
            .filter(|r| r.name == "l")
            .last()
            .unwrap();
        assert_eq!(
            analysis.frame(v.resolved.unwrap()).kind,
            FrameKind::Function
        );
        assert_eq!(l.resolved, None);
    }

    #[test]
    fn test_free_references_skip_inner_bindings() {
        let src = "const r = items.map((item) => item.size + base);";
        let (_, analysis) = analyze(src);
        let span = span_of(src, "items.map((item) => item.size + base)");
        let free: Vec<_> = analysis
            .free_references(span)
            .iter()
            .map(|r| r.name.clone())
            .collect();
        assert_eq!(free, vec!["items", "base"]);
    }

    #[test]
    fn test_reassignment_tracked() {
        let src = "function f() { let a = 1; a += 1; const b = 2; return a + b; }";
        let (_, analysis) = analyze(src);
        let a = analysis.references().iter().find(|r| r.name == "a").unwrap();
        let frame = a.resolved.unwrap();
        assert!(analysis.is_reassigned(frame, "a"));
        assert!(!analysis.is_reassigned(frame, "b"));
    }

    #[test]
    fn test_catch_and_loop_heads() {
        let src = "try { x(); } catch (err) { log(err); }\nfor (const k of ks) { use(k); }";
        let (_, analysis) = analyze(src);
        let err = analysis
            .references()
            .iter()
            .find(|r| r.name == "err")
            .unwrap();
        assert_eq!(analysis.frame(err.resolved.unwrap()).kind, FrameKind::Head);
        let k = analysis.references().iter().find(|r| r.name == "k").unwrap();
        assert!(!analysis.frame(k.resolved.unwrap()).has_statements());
        assert_eq!(analysis.chain(k.resolved.unwrap()).last(), Some(&ScopeAnalysis::ROOT));
    }

    #[test]
    fn test_alloc_unique_name() {
        let mut used: HashSet<String> = ["_color", "_color2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(alloc_unique_name(&mut used, "_color"), "_color3");
        assert_eq!(alloc_unique_name(&mut used, "_size"), "_size");
        assert_eq!(alloc_unique_name(&mut used, "_size"), "_size2");
    }
}
