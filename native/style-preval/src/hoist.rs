//! Hoister
//!
//! Makes a lazy interpolation executable at the top level of the file. For
//! every free identifier that resolves into an enclosing function or block,
//! the binding's initializer is hoisted first (its own dependencies, then
//! itself) and relocated to the outermost scope that still sees all of its
//! free variables:
//!
//! ```text
//! function f() {                     const _color = '#fff';
//!   const color = '#fff';      =>    function f() {
//!   return css`${color}`;              const color = _color;
//! }                                    return css`${_color}`;
//!                                    }
//! ```
//!
//! All edits happen on a private working copy of the program; the tree the
//! rewriter emits against is never touched.

use std::collections::HashSet;

use crate::ast::*;
use crate::scope::{alloc_unique_name, ScopeAnalysis};
use crate::visit::{self, find_expr, with_stmt_list_mut, Visit, VisitMut};

pub struct Hoister {
    work: Program,
    analysis: ScopeAnalysis,
    used: HashSet<String>,
    /// Declarators already handled, guards cycles.
    visited: HashSet<Span>,
    /// Names introduced by hoisting; unique across the file.
    hoisted: HashSet<String>,
}

impl Hoister {
    pub fn new(program: &Program) -> Self {
        let work = program.clone();
        let analysis = ScopeAnalysis::new(&work);
        let used = analysis.all_names().clone();
        Self {
            work,
            analysis,
            used,
            visited: HashSet::new(),
            hoisted: HashSet::new(),
        }
    }

    /// Hoist the dependencies of `expr` (an expression of the original tree)
    /// and return its clone from the working copy.
    pub fn hoist(&mut self, expr: &Expr) -> Expr {
        let span = expr.span();
        self.hoist_free_refs(span);
        find_expr(&self.work, span).unwrap_or_else(|| expr.clone())
    }

    /// The working copy with every relocation applied.
    pub fn into_program(self) -> Program {
        self.work
    }

    pub fn program(&self) -> &Program {
        &self.work
    }

    fn reanalyze(&mut self) {
        self.analysis = ScopeAnalysis::new(&self.work);
    }

    fn hoist_free_refs(&mut self, span: Span) {
        loop {
            let candidate = self
                .analysis
                .free_references(span)
                .into_iter()
                .find_map(|reference| {
                    let frame = reference.resolved?;
                    if frame == ScopeAnalysis::ROOT {
                        return None;
                    }
                    let binding = self.analysis.frame(frame).bindings.get(&reference.name)?;
                    let declarator = binding.declarator?;
                    let hoistable = binding.simple_init
                        && !declarator.is_synthetic()
                        && !self.visited.contains(&declarator)
                        && !self.analysis.is_reassigned(frame, &reference.name);
                    hoistable.then(|| (frame, reference.name.clone(), declarator))
                });

            match candidate {
                Some((frame, name, declarator)) => self.hoist_binding(frame, &name, declarator),
                None => break,
            }
        }
    }

    fn hoist_binding(&mut self, frame: usize, name: &str, declarator: Span) {
        self.visited.insert(declarator);
        let owner = self.analysis.frame(frame).owner;

        let Some(init) = declarator_init(&self.work, declarator) else {
            return;
        };
        if uses_function_context(&init) {
            return;
        }
        let init_span = init.span();
        self.hoist_free_refs(init_span);

        let Some(frame) = self.analysis.find_frame(owner) else {
            return;
        };
        let Some(init) = declarator_init(&self.work, declarator) else {
            return;
        };

        if let Expr::Ident(target) = &init {
            if self.can_collapse_to(target) {
                let sites = self.reference_sites(frame, name);
                rename_references(&mut self.work, &sites, &target.name);
                remove_declarator(&mut self.work, declarator);
                tracing::debug!(from = name, to = %target.name, "collapsed alias");
                self.reanalyze();
                return;
            }
        }

        let lo = self
            .analysis
            .free_references(init_span)
            .iter()
            .filter_map(|r| r.resolved)
            .map(|f| self.analysis.frame(f).depth)
            .max()
            .unwrap_or(0);
        let declaring_depth = self.analysis.frame(frame).depth;
        let Some(target) = self
            .analysis
            .chain(frame)
            .into_iter()
            .rev()
            .find(|&f| {
                let f = self.analysis.frame(f);
                f.depth >= lo && f.has_statements()
            })
        else {
            return;
        };
        if self.analysis.frame(target).depth >= declaring_depth {
            return;
        }
        let target_owner = self.analysis.frame(target).owner;

        // Declarations in the target scope the initializer depends on.
        let dependencies: Vec<Span> = self
            .analysis
            .free_references(init_span)
            .iter()
            .filter(|r| r.resolved == Some(target))
            .filter_map(|r| self.analysis.frame(target).bindings.get(&r.name)?.declarator)
            .filter(|span| !span.is_synthetic())
            .collect();
        let sites = self.reference_sites(frame, name);

        let new_name = alloc_unique_name(&mut self.used, &format!("_{}", name));
        self.hoisted.insert(new_name.clone());
        let Some(moved) = take_declarator_init(
            &mut self.work,
            declarator,
            Expr::Ident(Ident::synthetic(new_name.clone())),
        ) else {
            return;
        };

        let inserted = with_stmt_list_mut(&mut self.work, target_owner, |stmts| {
            let mut at = stmts
                .iter()
                .position(|stmt| stmt.span().contains(declarator))
                .unwrap_or(0);
            for dependency in &dependencies {
                if let Some(idx) = stmts.iter().position(|s| s.span().contains(*dependency)) {
                    at = at.max(idx + 1);
                }
            }
            stmts.insert(at, Stmt::const_decl(&new_name, moved));
        });
        debug_assert!(inserted.is_some(), "hoist target scope not found");

        rename_references(&mut self.work, &sites, &new_name);
        tracing::debug!(from = name, to = %new_name, "hoisted binding");
        self.reanalyze();
    }

    /// References to `name` that resolve to `frame`.
    fn reference_sites(&self, frame: usize, name: &str) -> HashSet<Span> {
        self.analysis
            .references()
            .iter()
            .filter(|r| r.name == name && r.resolved == Some(frame) && !r.span.is_synthetic())
            .map(|r| r.span)
            .collect()
    }

    fn can_collapse_to(&self, target: &Ident) -> bool {
        let Some(reference) = self.analysis.reference_at(target.span) else {
            return false;
        };
        let Some(frame) = reference.resolved else {
            return false;
        };
        !self.analysis.is_reassigned(frame, &target.name)
            && (self.hoisted.contains(&target.name)
                || self.analysis.is_unique_binding(&target.name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE EDITS
// ═══════════════════════════════════════════════════════════════════════════════

fn declarator_init(program: &Program, declarator: Span) -> Option<Expr> {
    struct Finder {
        declarator: Span,
        found: Option<Expr>,
    }
    impl Finder {
        fn check(&mut self, decl: &VarDecl) {
            for d in &decl.declarations {
                if d.span == self.declarator {
                    self.found = d.init.clone();
                }
            }
        }
    }
    impl Visit for Finder {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            if self.found.is_some() {
                return;
            }
            match stmt {
                Stmt::Var(decl) => self.check(decl),
                Stmt::For(ForStmt {
                    init: Some(ForInit::Var(decl)),
                    ..
                }) => self.check(decl),
                _ => {}
            }
            visit::walk_stmt(self, stmt);
        }
    }

    let mut finder = Finder {
        declarator,
        found: None,
    };
    finder.visit_program(program);
    finder.found
}

fn take_declarator_init(program: &mut Program, declarator: Span, replacement: Expr) -> Option<Expr> {
    struct Taker {
        declarator: Span,
        replacement: Option<Expr>,
        taken: Option<Expr>,
    }
    impl Taker {
        fn check(&mut self, decl: &mut VarDecl) {
            for d in &mut decl.declarations {
                if d.span == self.declarator {
                    if let (Some(init), Some(replacement)) = (&mut d.init, self.replacement.take()) {
                        self.taken = Some(std::mem::replace(init, replacement));
                    }
                }
            }
        }
    }
    impl VisitMut for Taker {
        fn visit_stmt(&mut self, stmt: &mut Stmt) {
            if self.replacement.is_none() {
                return;
            }
            match stmt {
                Stmt::Var(decl) => self.check(decl),
                Stmt::For(ForStmt {
                    init: Some(ForInit::Var(decl)),
                    ..
                }) => self.check(decl),
                _ => {}
            }
            visit::walk_stmt_mut(self, stmt);
        }
    }

    let mut taker = Taker {
        declarator,
        replacement: Some(replacement),
        taken: None,
    };
    taker.visit_program(program);
    taker.taken
}

/// Drop a declarator, and its statement when it was the only one.
fn remove_declarator(program: &mut Program, declarator: Span) {
    struct Remover {
        declarator: Span,
        done: bool,
    }
    impl VisitMut for Remover {
        fn visit_stmts(&mut self, stmts: &mut Vec<Stmt>) {
            if self.done {
                return;
            }
            let mut emptied = None;
            for (idx, stmt) in stmts.iter_mut().enumerate() {
                if let Stmt::Var(decl) = stmt {
                    let before = decl.declarations.len();
                    decl.declarations.retain(|d| d.span != self.declarator);
                    if decl.declarations.len() != before {
                        self.done = true;
                        if decl.declarations.is_empty() {
                            emptied = Some(idx);
                        }
                        break;
                    }
                }
            }
            if let Some(idx) = emptied {
                stmts.remove(idx);
            }
            if !self.done {
                visit::walk_stmts_mut(self, stmts);
            }
        }
    }

    let mut remover = Remover {
        declarator,
        done: false,
    };
    remover.visit_program(program);
}

/// Rename the identifiers at `sites`, keeping their spans.
fn rename_references(program: &mut Program, sites: &HashSet<Span>, name: &str) {
    struct Renamer<'a> {
        sites: &'a HashSet<Span>,
        name: &'a str,
    }
    impl VisitMut for Renamer<'_> {
        fn visit_ident(&mut self, ident: &mut Ident) {
            if self.sites.contains(&ident.span) {
                ident.name = self.name.to_string();
            }
        }
    }

    if sites.is_empty() {
        return;
    }
    Renamer { sites, name }.visit_program(program);
}

/// `this`, `arguments` or `await` outside of a nested regular function:
/// the expression means something else once moved.
fn uses_function_context(expr: &Expr) -> bool {
    struct Scan(bool);
    impl Visit for Scan {
        fn visit_expr(&mut self, expr: &Expr) {
            match expr {
                Expr::This { .. } | Expr::Await { .. } => self.0 = true,
                Expr::Function(_) => {}
                _ => visit::walk_expr(self, expr),
            }
        }
        fn visit_function(&mut self, _function: &Function) {}
        fn visit_ident(&mut self, ident: &Ident) {
            if ident.name == "arguments" {
                self.0 = true;
            }
        }
    }

    let mut scan = Scan(false);
    scan.visit_expr(expr);
    scan.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::collect_occurrences;
    use crate::lower::parse_module;
    use crate::printer::{print_expr, print_program};
    use pretty_assertions::assert_eq;

    fn hoist_first(src: &str) -> (String, String, crate::lower::ParsedModule) {
        let module = parse_module(src, "a.tsx").unwrap();
        let occurrences = collect_occurrences(&module, "css");
        let mut hoister = Hoister::new(&module.program);
        let hoisted = hoister.hoist(&occurrences[0].expressions[0]);
        let program = hoister.into_program();
        (
            print_expr(&hoisted, Some(&module.source)),
            print_program(&program, Some(&module.source)),
            module,
        )
    }

    #[test]
    fn test_hoists_function_local_const() {
        let src = "export function Card() {\n  const color = pick('#fff');\n  return css`.a { color: ${color}; }`;\n}";
        let (expr, program, module) = hoist_first(src);

        assert_eq!(expr, "_color");
        assert_eq!(
            program,
            "const _color = pick(\"#fff\");\nexport function Card() {\n  const color = _color;\n  return css`.a { color: ${_color}; }`;\n}\n"
        );
        // Analysis never edits the parsed tree.
        assert_eq!(module.program, parse_module(src, "a.tsx").unwrap().program);
    }

    #[test]
    fn test_hoists_transitive_dependencies_first() {
        let src = "function f() {\n  const base = pick(1);\n  const size = base * 2;\n  return css`${size}`;\n}";
        let (expr, program, _) = hoist_first(src);
        assert_eq!(expr, "_size");
        assert_eq!(
            program,
            "const _base = pick(1);\nconst _size = _base * 2;\nfunction f() {\n  const base = _base;\n  const size = _size;\n  return css`${_size}`;\n}\n"
        );
    }

    #[test]
    fn test_stops_at_parameter_dependency() {
        let src = "function f(p) {\n  const top = pick(1);\n  return () => {\n    const inner = p + top;\n    return css`${inner}`;\n  };\n}";
        let (expr, program, _) = hoist_first(src);
        // `inner` depends on a parameter of `f`, so it moves into `f` only.
        assert_eq!(expr, "_inner");
        assert!(program.starts_with("const _top = pick(1);\nfunction f(p) {\n  const top = _top;\n  const _inner = p + _top;\n"));
    }

    #[test]
    fn test_alias_collapses_into_hoisted_binding() {
        let src = "function f() {\n  const base = pick(1);\n  const alias = base;\n  return css`${alias}`;\n}";
        let (expr, program, _) = hoist_first(src);
        assert_eq!(expr, "_base");
        assert_eq!(
            program,
            "const _base = pick(1);\nfunction f() {\n  const base = _base;\n  return css`${_base}`;\n}\n"
        );
    }

    #[test]
    fn test_leaves_reassigned_and_root_bindings() {
        let src = "const root = 1;\nfunction f() {\n  let x = pick(root);\n  x = 2;\n  return css`${x + root}`;\n}";
        let (expr, program, module) = hoist_first(src);
        assert_eq!(expr, "x + root");
        assert_eq!(program, print_program(&module.program, Some(src)));
    }

    #[test]
    fn test_unique_names_avoid_existing_bindings() {
        let src = "const _color = 0;\nfunction f() {\n  const color = pick(2);\n  return css`${color}`;\n}";
        let (expr, _, _) = hoist_first(src);
        assert_eq!(expr, "_color2");
    }
}
