//! Traversal over the owned syntax tree.
//!
//! Rules:
//! 1. Traversal order is source order and fixed.
//! 2. Implementers override `visit_*` methods to add behavior.
//! 3. Implementers call the matching `walk_*` function to continue into
//!    children unless pruning is intended.
//!
//! [`Visit`] borrows the tree, [`VisitMut`] may rewrite it in place.

use crate::ast::*;

// ═══════════════════════════════════════════════════════════════════════════════
// READ-ONLY VISITOR
// ═══════════════════════════════════════════════════════════════════════════════

pub trait Visit {
    fn visit_program(&mut self, program: &Program) {
        walk_program(self, program);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_pattern(&mut self, pattern: &Pattern) {
        walk_pattern(self, pattern);
    }

    fn visit_function(&mut self, function: &Function) {
        walk_function(self, function);
    }

    fn visit_arrow(&mut self, arrow: &Arrow) {
        walk_arrow(self, arrow);
    }

    fn visit_tagged_template(&mut self, tagged: &TaggedTemplate) {
        walk_tagged_template(self, tagged);
    }

    fn visit_jsx_element(&mut self, element: &JsxElement) {
        walk_jsx_element(self, element);
    }

    /// An identifier in reference position.
    fn visit_ident(&mut self, _ident: &Ident) {}

    /// An identifier that introduces a binding.
    fn visit_binding_ident(&mut self, _ident: &Ident) {}
}

pub fn walk_program<V: Visit + ?Sized>(visitor: &mut V, program: &Program) {
    for stmt in &program.body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_block<V: Visit + ?Sized>(visitor: &mut V, block: &Block) {
    for stmt in &block.body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_var_decl<V: Visit + ?Sized>(visitor: &mut V, decl: &VarDecl) {
    for declarator in &decl.declarations {
        visitor.visit_pattern(&declarator.id);
        if let Some(init) = &declarator.init {
            visitor.visit_expr(init);
        }
    }
}

pub fn walk_stmt<V: Visit + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Expr { expr, .. } => visitor.visit_expr(expr),
        Stmt::Var(decl) => walk_var_decl(visitor, decl),
        Stmt::Function(function) => visitor.visit_function(function),
        Stmt::Class { id, .. } => visitor.visit_binding_ident(id),
        Stmt::Return { argument, .. } => {
            if let Some(argument) = argument {
                visitor.visit_expr(argument);
            }
        }
        Stmt::If(stmt) => {
            visitor.visit_expr(&stmt.test);
            visitor.visit_stmt(&stmt.consequent);
            if let Some(alternate) = &stmt.alternate {
                visitor.visit_stmt(alternate);
            }
        }
        Stmt::Block(block) => visitor.visit_block(block),
        Stmt::For(stmt) => {
            match &stmt.init {
                Some(ForInit::Var(decl)) => walk_var_decl(visitor, decl),
                Some(ForInit::Expr(expr)) => visitor.visit_expr(expr),
                None => {}
            }
            if let Some(test) = &stmt.test {
                visitor.visit_expr(test);
            }
            if let Some(update) = &stmt.update {
                visitor.visit_expr(update);
            }
            visitor.visit_stmt(&stmt.body);
        }
        Stmt::ForEach(stmt) => {
            visitor.visit_pattern(&stmt.left);
            visitor.visit_expr(&stmt.right);
            visitor.visit_stmt(&stmt.body);
        }
        Stmt::While(stmt) => {
            visitor.visit_expr(&stmt.test);
            visitor.visit_stmt(&stmt.body);
        }
        Stmt::Switch(stmt) => {
            visitor.visit_expr(&stmt.discriminant);
            for case in &stmt.cases {
                if let Some(test) = &case.test {
                    visitor.visit_expr(test);
                }
                for stmt in &case.consequent {
                    visitor.visit_stmt(stmt);
                }
            }
        }
        Stmt::Throw { argument, .. } => visitor.visit_expr(argument),
        Stmt::Try(stmt) => {
            visitor.visit_block(&stmt.block);
            if let Some(handler) = &stmt.handler {
                if let Some(param) = &handler.param {
                    visitor.visit_pattern(param);
                }
                visitor.visit_block(&handler.body);
            }
            if let Some(finalizer) = &stmt.finalizer {
                visitor.visit_block(finalizer);
            }
        }
        Stmt::Import(decl) => {
            for spec in &decl.specifiers {
                match spec {
                    ImportSpec::Default { local }
                    | ImportSpec::Namespace { local }
                    | ImportSpec::Named { local, .. } => visitor.visit_binding_ident(local),
                }
            }
        }
        Stmt::Export(stmt) => match &stmt.decl {
            ExportDecl::Decl(inner) => visitor.visit_stmt(inner),
            ExportDecl::Default(expr) => visitor.visit_expr(expr),
            ExportDecl::DefaultFunction(function) => visitor.visit_function(function),
            ExportDecl::List { .. } | ExportDecl::All { .. } => {}
        },
        Stmt::Break { .. }
        | Stmt::Continue { .. }
        | Stmt::Empty { .. }
        | Stmt::Unsupported { .. } => {}
    }
}

pub fn walk_function<V: Visit + ?Sized>(visitor: &mut V, function: &Function) {
    if let Some(id) = &function.id {
        visitor.visit_binding_ident(id);
    }
    for param in &function.params {
        visitor.visit_pattern(param);
    }
    for stmt in &function.body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_arrow<V: Visit + ?Sized>(visitor: &mut V, arrow: &Arrow) {
    for param in &arrow.params {
        visitor.visit_pattern(param);
    }
    match &arrow.body {
        ArrowBody::Expr(expr) => visitor.visit_expr(expr),
        ArrowBody::Block(body) => {
            for stmt in body {
                visitor.visit_stmt(stmt);
            }
        }
    }
}

pub fn walk_pattern<V: Visit + ?Sized>(visitor: &mut V, pattern: &Pattern) {
    match pattern {
        Pattern::Ident(id) => visitor.visit_binding_ident(id),
        Pattern::Object { props, rest, .. } => {
            for prop in props {
                if let PropKey::Computed(key) = &prop.key {
                    visitor.visit_expr(key);
                }
                visitor.visit_pattern(&prop.value);
            }
            if let Some(rest) = rest {
                visitor.visit_pattern(rest);
            }
        }
        Pattern::Array { elements, rest, .. } => {
            for element in elements.iter().flatten() {
                visitor.visit_pattern(element);
            }
            if let Some(rest) = rest {
                visitor.visit_pattern(rest);
            }
        }
        Pattern::Assign { left, right, .. } => {
            visitor.visit_pattern(left);
            visitor.visit_expr(right);
        }
        Pattern::Expr(expr) => visitor.visit_expr(expr),
    }
}

pub fn walk_tagged_template<V: Visit + ?Sized>(visitor: &mut V, tagged: &TaggedTemplate) {
    visitor.visit_expr(&tagged.tag);
    for expr in &tagged.quasi.expressions {
        visitor.visit_expr(expr);
    }
}

pub fn walk_jsx_element<V: Visit + ?Sized>(visitor: &mut V, element: &JsxElement) {
    for attr in &element.attributes {
        match attr {
            JsxAttr::Attr { value, .. } => match value {
                Some(JsxAttrValue::Expr(expr)) => visitor.visit_expr(expr),
                Some(JsxAttrValue::Element(inner)) => visitor.visit_jsx_element(inner),
                Some(JsxAttrValue::Str(_)) | None => {}
            },
            JsxAttr::Spread(expr) => visitor.visit_expr(expr),
        }
    }
    for child in &element.children {
        match child {
            JsxChild::Text(_) => {}
            JsxChild::Expr(expr) | JsxChild::Spread(expr) => visitor.visit_expr(expr),
            JsxChild::Element(inner) => visitor.visit_jsx_element(inner),
        }
    }
}

fn walk_prop_key<V: Visit + ?Sized>(visitor: &mut V, key: &PropKey) {
    if let PropKey::Computed(expr) = key {
        visitor.visit_expr(expr);
    }
}

pub fn walk_expr<V: Visit + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::Lit { .. } | Expr::This { .. } | Expr::Regex { .. } | Expr::Unsupported { .. } => {}
        Expr::Ident(id) => visitor.visit_ident(id),
        Expr::Template(tpl) => {
            for expr in &tpl.expressions {
                visitor.visit_expr(expr);
            }
        }
        Expr::TaggedTemplate(tagged) => visitor.visit_tagged_template(tagged),
        Expr::Array { elements, .. } => {
            for element in elements.iter().flatten() {
                visitor.visit_expr(&element.expr);
            }
        }
        Expr::Object { props, .. } => {
            for prop in props {
                match prop {
                    Prop::KeyValue { key, value } => {
                        walk_prop_key(visitor, key);
                        visitor.visit_expr(value);
                    }
                    Prop::Accessor { key, function, .. } => {
                        walk_prop_key(visitor, key);
                        visitor.visit_function(function);
                    }
                    Prop::Spread(expr) => visitor.visit_expr(expr),
                }
            }
        }
        Expr::Function(function) => visitor.visit_function(function),
        Expr::Arrow(arrow) => visitor.visit_arrow(arrow),
        Expr::Unary { argument, .. } | Expr::Await { argument, .. } => {
            visitor.visit_expr(argument)
        }
        Expr::Update { target, .. } => visitor.visit_expr(target),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        Expr::Assign { target, value, .. } => {
            match &**target {
                // An assigned identifier is a reference, not a new binding.
                Pattern::Ident(id) => visitor.visit_ident(id),
                other => visitor.visit_pattern(other),
            }
            visitor.visit_expr(value);
        }
        Expr::Cond {
            test,
            consequent,
            alternate,
            ..
        } => {
            visitor.visit_expr(test);
            visitor.visit_expr(consequent);
            visitor.visit_expr(alternate);
        }
        Expr::Member(member) => {
            visitor.visit_expr(&member.object);
            if let MemberProp::Computed(property) = &member.property {
                visitor.visit_expr(property);
            }
        }
        Expr::Call(call) | Expr::New(call) => {
            visitor.visit_expr(&call.callee);
            for arg in &call.arguments {
                visitor.visit_expr(&arg.expr);
            }
        }
        Expr::Chain { expr, .. } => visitor.visit_expr(expr),
        Expr::Seq { expressions, .. } => {
            for expr in expressions {
                visitor.visit_expr(expr);
            }
        }
        Expr::Jsx(element) => visitor.visit_jsx_element(element),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MUTATING VISITOR
// ═══════════════════════════════════════════════════════════════════════════════

pub trait VisitMut {
    fn visit_program(&mut self, program: &mut Program) {
        walk_program_mut(self, program);
    }

    fn visit_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        walk_stmts_mut(self, stmts);
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        walk_stmt_mut(self, stmt);
    }

    fn visit_expr(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
    }

    fn visit_pattern(&mut self, pattern: &mut Pattern) {
        walk_pattern_mut(self, pattern);
    }

    fn visit_ident(&mut self, _ident: &mut Ident) {}

    fn visit_binding_ident(&mut self, _ident: &mut Ident) {}
}

pub fn walk_program_mut<V: VisitMut + ?Sized>(visitor: &mut V, program: &mut Program) {
    visitor.visit_stmts(&mut program.body);
}

pub fn walk_stmts_mut<V: VisitMut + ?Sized>(visitor: &mut V, stmts: &mut Vec<Stmt>) {
    for stmt in stmts.iter_mut() {
        visitor.visit_stmt(stmt);
    }
}

fn walk_var_decl_mut<V: VisitMut + ?Sized>(visitor: &mut V, decl: &mut VarDecl) {
    for declarator in &mut decl.declarations {
        visitor.visit_pattern(&mut declarator.id);
        if let Some(init) = &mut declarator.init {
            visitor.visit_expr(init);
        }
    }
}

fn walk_function_mut<V: VisitMut + ?Sized>(visitor: &mut V, function: &mut Function) {
    if let Some(id) = &mut function.id {
        visitor.visit_binding_ident(id);
    }
    for param in &mut function.params {
        visitor.visit_pattern(param);
    }
    visitor.visit_stmts(&mut function.body);
}

pub fn walk_stmt_mut<V: VisitMut + ?Sized>(visitor: &mut V, stmt: &mut Stmt) {
    match stmt {
        Stmt::Expr { expr, .. } => visitor.visit_expr(expr),
        Stmt::Var(decl) => walk_var_decl_mut(visitor, decl),
        Stmt::Function(function) => walk_function_mut(visitor, function),
        Stmt::Class { id, .. } => visitor.visit_binding_ident(id),
        Stmt::Return { argument, .. } => {
            if let Some(argument) = argument {
                visitor.visit_expr(argument);
            }
        }
        Stmt::If(stmt) => {
            visitor.visit_expr(&mut stmt.test);
            visitor.visit_stmt(&mut stmt.consequent);
            if let Some(alternate) = &mut stmt.alternate {
                visitor.visit_stmt(alternate);
            }
        }
        Stmt::Block(block) => visitor.visit_stmts(&mut block.body),
        Stmt::For(stmt) => {
            match &mut stmt.init {
                Some(ForInit::Var(decl)) => walk_var_decl_mut(visitor, decl),
                Some(ForInit::Expr(expr)) => visitor.visit_expr(expr),
                None => {}
            }
            if let Some(test) = &mut stmt.test {
                visitor.visit_expr(test);
            }
            if let Some(update) = &mut stmt.update {
                visitor.visit_expr(update);
            }
            visitor.visit_stmt(&mut stmt.body);
        }
        Stmt::ForEach(stmt) => {
            visitor.visit_pattern(&mut stmt.left);
            visitor.visit_expr(&mut stmt.right);
            visitor.visit_stmt(&mut stmt.body);
        }
        Stmt::While(stmt) => {
            visitor.visit_expr(&mut stmt.test);
            visitor.visit_stmt(&mut stmt.body);
        }
        Stmt::Switch(stmt) => {
            visitor.visit_expr(&mut stmt.discriminant);
            for case in &mut stmt.cases {
                if let Some(test) = &mut case.test {
                    visitor.visit_expr(test);
                }
                visitor.visit_stmts(&mut case.consequent);
            }
        }
        Stmt::Throw { argument, .. } => visitor.visit_expr(argument),
        Stmt::Try(stmt) => {
            visitor.visit_stmts(&mut stmt.block.body);
            if let Some(handler) = &mut stmt.handler {
                if let Some(param) = &mut handler.param {
                    visitor.visit_pattern(param);
                }
                visitor.visit_stmts(&mut handler.body.body);
            }
            if let Some(finalizer) = &mut stmt.finalizer {
                visitor.visit_stmts(&mut finalizer.body);
            }
        }
        Stmt::Import(decl) => {
            for spec in &mut decl.specifiers {
                match spec {
                    ImportSpec::Default { local }
                    | ImportSpec::Namespace { local }
                    | ImportSpec::Named { local, .. } => visitor.visit_binding_ident(local),
                }
            }
        }
        Stmt::Export(stmt) => match &mut stmt.decl {
            ExportDecl::Decl(inner) => visitor.visit_stmt(inner),
            ExportDecl::Default(expr) => visitor.visit_expr(expr),
            ExportDecl::DefaultFunction(function) => walk_function_mut(visitor, function),
            ExportDecl::List { .. } | ExportDecl::All { .. } => {}
        },
        Stmt::Break { .. }
        | Stmt::Continue { .. }
        | Stmt::Empty { .. }
        | Stmt::Unsupported { .. } => {}
    }
}

pub fn walk_pattern_mut<V: VisitMut + ?Sized>(visitor: &mut V, pattern: &mut Pattern) {
    match pattern {
        Pattern::Ident(id) => visitor.visit_binding_ident(id),
        Pattern::Object { props, rest, .. } => {
            for prop in props {
                if let PropKey::Computed(key) = &mut prop.key {
                    visitor.visit_expr(key);
                }
                visitor.visit_pattern(&mut prop.value);
            }
            if let Some(rest) = rest {
                visitor.visit_pattern(rest);
            }
        }
        Pattern::Array { elements, rest, .. } => {
            for element in elements.iter_mut().flatten() {
                visitor.visit_pattern(element);
            }
            if let Some(rest) = rest {
                visitor.visit_pattern(rest);
            }
        }
        Pattern::Assign { left, right, .. } => {
            visitor.visit_pattern(left);
            visitor.visit_expr(right);
        }
        Pattern::Expr(expr) => visitor.visit_expr(expr),
    }
}

fn walk_jsx_element_mut<V: VisitMut + ?Sized>(visitor: &mut V, element: &mut JsxElement) {
    for attr in &mut element.attributes {
        match attr {
            JsxAttr::Attr { value, .. } => match value {
                Some(JsxAttrValue::Expr(expr)) => visitor.visit_expr(expr),
                Some(JsxAttrValue::Element(inner)) => walk_jsx_element_mut(visitor, inner),
                Some(JsxAttrValue::Str(_)) | None => {}
            },
            JsxAttr::Spread(expr) => visitor.visit_expr(expr),
        }
    }
    for child in &mut element.children {
        match child {
            JsxChild::Text(_) => {}
            JsxChild::Expr(expr) | JsxChild::Spread(expr) => visitor.visit_expr(expr),
            JsxChild::Element(inner) => walk_jsx_element_mut(visitor, inner),
        }
    }
}

pub fn walk_expr_mut<V: VisitMut + ?Sized>(visitor: &mut V, expr: &mut Expr) {
    match expr {
        Expr::Lit { .. } | Expr::This { .. } | Expr::Regex { .. } | Expr::Unsupported { .. } => {}
        Expr::Ident(id) => visitor.visit_ident(id),
        Expr::Template(tpl) => {
            for expr in &mut tpl.expressions {
                visitor.visit_expr(expr);
            }
        }
        Expr::TaggedTemplate(tagged) => {
            visitor.visit_expr(&mut tagged.tag);
            for expr in &mut tagged.quasi.expressions {
                visitor.visit_expr(expr);
            }
        }
        Expr::Array { elements, .. } => {
            for element in elements.iter_mut().flatten() {
                visitor.visit_expr(&mut element.expr);
            }
        }
        Expr::Object { props, .. } => {
            for prop in props {
                match prop {
                    Prop::KeyValue { key, value } => {
                        if let PropKey::Computed(key) = key {
                            visitor.visit_expr(key);
                        }
                        visitor.visit_expr(value);
                    }
                    Prop::Accessor { key, function, .. } => {
                        if let PropKey::Computed(key) = key {
                            visitor.visit_expr(key);
                        }
                        walk_function_mut(visitor, function);
                    }
                    Prop::Spread(expr) => visitor.visit_expr(expr),
                }
            }
        }
        Expr::Function(function) => walk_function_mut(visitor, function),
        Expr::Arrow(arrow) => {
            for param in &mut arrow.params {
                visitor.visit_pattern(param);
            }
            match &mut arrow.body {
                ArrowBody::Expr(expr) => visitor.visit_expr(expr),
                ArrowBody::Block(body) => visitor.visit_stmts(body),
            }
        }
        Expr::Unary { argument, .. } | Expr::Await { argument, .. } => {
            visitor.visit_expr(argument)
        }
        Expr::Update { target, .. } => visitor.visit_expr(target),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        Expr::Assign { target, value, .. } => {
            match &mut **target {
                Pattern::Ident(id) => visitor.visit_ident(id),
                other => visitor.visit_pattern(other),
            }
            visitor.visit_expr(value);
        }
        Expr::Cond {
            test,
            consequent,
            alternate,
            ..
        } => {
            visitor.visit_expr(test);
            visitor.visit_expr(consequent);
            visitor.visit_expr(alternate);
        }
        Expr::Member(member) => {
            visitor.visit_expr(&mut member.object);
            if let MemberProp::Computed(property) = &mut member.property {
                visitor.visit_expr(property);
            }
        }
        Expr::Call(call) | Expr::New(call) => {
            visitor.visit_expr(&mut call.callee);
            for arg in &mut call.arguments {
                visitor.visit_expr(&mut arg.expr);
            }
        }
        Expr::Chain { expr, .. } => visitor.visit_expr(expr),
        Expr::Seq { expressions, .. } => {
            for expr in expressions {
                visitor.visit_expr(expr);
            }
        }
        Expr::Jsx(element) => walk_jsx_element_mut(visitor, element),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOOKUP BY SPAN
// ═══════════════════════════════════════════════════════════════════════════════

/// The node that owns a scope. Spans alone are ambiguous for the program,
/// whose span may equal its only statement's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeOwner {
    Program,
    Node(Span),
}

impl ScopeOwner {
    /// True when the node owning this scope lies inside `span`.
    pub fn within(&self, span: Span) -> bool {
        match self {
            ScopeOwner::Program => false,
            ScopeOwner::Node(own) => span.contains(*own),
        }
    }
}

/// Clone of the first expression (pre-order, so the outermost) with exactly
/// `span`.
pub fn find_expr(program: &Program, span: Span) -> Option<Expr> {
    struct Finder {
        span: Span,
        found: Option<Expr>,
    }
    impl Visit for Finder {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            if self.found.is_none() {
                walk_stmt(self, stmt);
            }
        }
        fn visit_expr(&mut self, expr: &Expr) {
            if self.found.is_some() {
                return;
            }
            if expr.span() == self.span {
                self.found = Some(expr.clone());
                return;
            }
            walk_expr(self, expr);
        }
    }

    if span.is_synthetic() {
        return None;
    }
    let mut finder = Finder { span, found: None };
    finder.visit_program(program);
    finder.found
}

/// Run `f` on the first expression with exactly `span`.
pub fn with_expr_mut<R>(
    program: &mut Program,
    span: Span,
    f: impl FnOnce(&mut Expr) -> R,
) -> Option<R> {
    struct Finder<F, R> {
        span: Span,
        f: Option<F>,
        result: Option<R>,
    }
    impl<F: FnOnce(&mut Expr) -> R, R> VisitMut for Finder<F, R> {
        fn visit_stmt(&mut self, stmt: &mut Stmt) {
            if self.f.is_some() {
                walk_stmt_mut(self, stmt);
            }
        }
        fn visit_expr(&mut self, expr: &mut Expr) {
            if self.f.is_none() {
                return;
            }
            if expr.span() == self.span {
                if let Some(f) = self.f.take() {
                    self.result = Some(f(expr));
                }
                return;
            }
            walk_expr_mut(self, expr);
        }
    }

    if span.is_synthetic() {
        return None;
    }
    let mut finder = Finder {
        span,
        f: Some(f),
        result: None,
    };
    finder.visit_program(program);
    finder.result
}

/// Run `f` on the statement list owned by the node spanning `owner`: the
/// program, a function or block-bodied arrow, or a block.
pub fn with_stmt_list_mut<R>(
    program: &mut Program,
    owner: ScopeOwner,
    f: impl FnOnce(&mut Vec<Stmt>) -> R,
) -> Option<R> {
    struct Finder<F, R> {
        owner: Span,
        f: Option<F>,
        result: Option<R>,
    }
    impl<F: FnOnce(&mut Vec<Stmt>) -> R, R> Finder<F, R> {
        fn hit(&mut self, span: Span, stmts: &mut Vec<Stmt>) -> bool {
            if span == self.owner {
                if let Some(f) = self.f.take() {
                    self.result = Some(f(stmts));
                }
                return true;
            }
            false
        }
    }
    impl<F: FnOnce(&mut Vec<Stmt>) -> R, R> VisitMut for Finder<F, R> {
        fn visit_stmt(&mut self, stmt: &mut Stmt) {
            if self.f.is_none() {
                return;
            }
            match stmt {
                Stmt::Block(block) => {
                    if !self.hit(block.span, &mut block.body) {
                        walk_stmts_mut(self, &mut block.body);
                    }
                }
                Stmt::Function(function) => {
                    if !self.hit(function.span, &mut function.body) {
                        walk_stmt_mut(self, stmt);
                    }
                }
                Stmt::Try(try_stmt) => {
                    if !self.hit(try_stmt.block.span, &mut try_stmt.block.body) {
                        walk_stmts_mut(self, &mut try_stmt.block.body);
                    }
                    if let Some(handler) = &mut try_stmt.handler {
                        if let Some(param) = &mut handler.param {
                            self.visit_pattern(param);
                        }
                        if !self.hit(handler.body.span, &mut handler.body.body) {
                            walk_stmts_mut(self, &mut handler.body.body);
                        }
                    }
                    if let Some(finalizer) = &mut try_stmt.finalizer {
                        if !self.hit(finalizer.span, &mut finalizer.body) {
                            walk_stmts_mut(self, &mut finalizer.body);
                        }
                    }
                }
                _ => walk_stmt_mut(self, stmt),
            }
        }
        fn visit_expr(&mut self, expr: &mut Expr) {
            if self.f.is_none() {
                return;
            }
            match expr {
                Expr::Function(function) => {
                    if !self.hit(function.span, &mut function.body) {
                        walk_expr_mut(self, expr);
                    }
                }
                Expr::Arrow(arrow) => {
                    let span = arrow.span;
                    match &mut arrow.body {
                        ArrowBody::Block(body) if span == self.owner => {
                            self.hit(span, body);
                        }
                        _ => walk_expr_mut(self, expr),
                    }
                }
                _ => walk_expr_mut(self, expr),
            }
        }
    }

    let owner = match owner {
        ScopeOwner::Program => return Some(f(&mut program.body)),
        ScopeOwner::Node(span) => span,
    };
    let mut finder = Finder {
        owner,
        f: Some(f),
        result: None,
    };
    finder.visit_program(program);
    finder.result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_module;

    struct IdentNames(Vec<String>);

    impl Visit for IdentNames {
        fn visit_ident(&mut self, ident: &Ident) {
            self.0.push(ident.name.clone());
        }
    }

    #[test]
    fn test_visits_references_in_order() {
        let module = parse_module("const a = b + c(d, ...e); f = g;", "a.js").unwrap();
        let mut names = IdentNames(Vec::new());
        names.visit_program(&module.program);
        assert_eq!(names.0, vec!["b", "c", "d", "e", "f", "g"]);
    }

    #[test]
    fn test_find_and_mutate_by_span() {
        let src = "function f() { return x + 1; }";
        let mut module = parse_module(src, "a.js").unwrap();
        let start = src.find("x + 1").unwrap() as u32;
        let span = Span::new(start, start + 5);
        let found = find_expr(&module.program, span).unwrap();
        assert!(matches!(found, Expr::Binary { .. }));

        let replaced = with_expr_mut(&mut module.program, span, |expr| {
            *expr = Expr::ident("y");
        });
        assert!(replaced.is_some());
        assert!(find_expr(&module.program, span).is_none());
    }

    #[test]
    fn test_stmt_list_by_owner() {
        let src = "function f() { const a = 1; }";
        let mut module = parse_module(src, "a.js").unwrap();
        let owner = ScopeOwner::Node(module.program.body[0].span());
        let len = with_stmt_list_mut(&mut module.program, owner, |stmts| stmts.len());
        assert_eq!(len, Some(1));

        let top = with_stmt_list_mut(&mut module.program, ScopeOwner::Program, |stmts| {
            stmts.push(Stmt::Empty {
                span: Span::SYNTHETIC,
            });
            stmts.len()
        });
        assert_eq!(top, Some(2));
    }
}
