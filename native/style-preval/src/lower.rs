//! Parsing and lowering.
//!
//! Parses a source file with oxc and lowers the arena tree into the owned
//! [`crate::ast`] tree. TypeScript-only syntax is erased here; syntax the
//! sandbox cannot execute becomes an explicit `Unsupported` node.

use oxc_allocator::Allocator;
use oxc_ast::ast as oxc;
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::SourceType;
use std::collections::BTreeMap;

use crate::ast::*;
use crate::error::{SourceLocation, StyleError};

/// A parsed source file: identity, text and owned tree.
#[derive(Debug, Clone)]
pub struct ParsedModule {
    pub filename: String,
    pub source: String,
    pub program: Program,
}

impl ParsedModule {
    pub fn location(&self, span: Span) -> SourceLocation {
        SourceLocation::of_span(&self.source, span)
    }

    pub fn slice(&self, span: Span) -> &str {
        if span.is_synthetic() {
            return "";
        }
        self.source
            .get(span.start as usize..span.end as usize)
            .unwrap_or("")
    }
}

fn source_type_for(filename: &str) -> SourceType {
    SourceType::from_path(filename).unwrap_or_else(|_| {
        SourceType::default()
            .with_typescript(true)
            .with_module(true)
            .with_jsx(true)
    })
}

/// Parse and lower a whole file.
pub fn parse_module(source: &str, filename: &str) -> Result<ParsedModule, StyleError> {
    let program = parse_program(source, filename, &BTreeMap::new())?;
    Ok(ParsedModule {
        filename: filename.to_string(),
        source: source.to_string(),
        program,
    })
}

/// Parse and lower, substituting `defines` (dotted paths such as
/// `process.env.EVAL`) with their JSON values.
pub fn parse_program(
    source: &str,
    filename: &str,
    defines: &BTreeMap<String, serde_json::Value>,
) -> Result<Program, StyleError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type_for(filename)).parse();

    if let Some(first) = ret.errors.first() {
        return Err(StyleError::Parse {
            file: filename.to_string(),
            location: SourceLocation { line: 1, column: 1 },
            message: first.to_string(),
        });
    }

    let lowerer = Lowerer { defines };
    Ok(Program {
        span: ret.program.span.into(),
        body: lowerer.stmts(&ret.program.body),
    })
}

/// Cheap pre-scan: does `source` contain a template tagged with `tag`?
pub fn contains_tagged_template(source: &str, filename: &str, tag: &str) -> bool {
    if !source.contains(tag) {
        return false;
    }
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type_for(filename)).parse();
    let mut scan = TagScan { tag, found: false };
    scan.visit_program(&ret.program);
    scan.found
}

struct TagScan<'t> {
    tag: &'t str,
    found: bool,
}

impl<'a, 't> Visit<'a> for TagScan<'t> {
    fn visit_tagged_template_expression(&mut self, expr: &oxc::TaggedTemplateExpression<'a>) {
        if let oxc::Expression::Identifier(id) = &expr.tag {
            if id.name == self.tag {
                self.found = true;
                return;
            }
        }
        oxc_ast_visit::walk::walk_tagged_template_expression(self, expr);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOWERING
// ═══════════════════════════════════════════════════════════════════════════════

struct Lowerer<'d> {
    defines: &'d BTreeMap<String, serde_json::Value>,
}

impl<'d> Lowerer<'d> {
    fn stmts(&self, stmts: &[oxc::Statement<'_>]) -> Vec<Stmt> {
        stmts.iter().filter_map(|s| self.stmt(s)).collect()
    }

    /// `None` for statements that vanish entirely (TypeScript declarations).
    fn stmt(&self, stmt: &oxc::Statement<'_>) -> Option<Stmt> {
        use oxc::Statement as S;
        let lowered = match stmt {
            S::ExpressionStatement(s) => Stmt::Expr {
                span: s.span.into(),
                expr: self.expr(&s.expression),
            },
            S::VariableDeclaration(decl) => self.var_decl_stmt(decl),
            S::FunctionDeclaration(func) => {
                if func.body.is_none() {
                    return None;
                }
                Stmt::Function(Box::new(self.function(func)))
            }
            S::ClassDeclaration(class) => self.class_decl(class)?,
            S::ReturnStatement(s) => Stmt::Return {
                span: s.span.into(),
                argument: s.argument.as_ref().map(|e| self.expr(e)),
            },
            S::IfStatement(s) => Stmt::If(IfStmt {
                span: s.span.into(),
                test: self.expr(&s.test),
                consequent: Box::new(self.body_stmt(&s.consequent)),
                alternate: s.alternate.as_ref().map(|alt| Box::new(self.body_stmt(alt))),
            }),
            S::BlockStatement(block) => Stmt::Block(self.block(block)),
            S::ForStatement(s) => {
                let init = match &s.init {
                    None => None,
                    Some(oxc::ForStatementInit::VariableDeclaration(decl)) => {
                        Some(ForInit::Var(self.var_decl(decl)))
                    }
                    Some(other) => other.as_expression().map(|e| ForInit::Expr(self.expr(e))),
                };
                Stmt::For(ForStmt {
                    span: s.span.into(),
                    init,
                    test: s.test.as_ref().map(|e| self.expr(e)),
                    update: s.update.as_ref().map(|e| self.expr(e)),
                    body: Box::new(self.body_stmt(&s.body)),
                })
            }
            S::ForInStatement(s) => {
                self.for_each(s.span, ForEachKind::In, &s.left, &s.right, &s.body)
            }
            S::ForOfStatement(s) => {
                if s.r#await {
                    Stmt::Unsupported {
                        span: s.span.into(),
                        what: "for await",
                    }
                } else {
                    self.for_each(s.span, ForEachKind::Of, &s.left, &s.right, &s.body)
                }
            }
            S::WhileStatement(s) => Stmt::While(WhileStmt {
                span: s.span.into(),
                test: self.expr(&s.test),
                body: Box::new(self.body_stmt(&s.body)),
                do_while: false,
            }),
            S::DoWhileStatement(s) => Stmt::While(WhileStmt {
                span: s.span.into(),
                test: self.expr(&s.test),
                body: Box::new(self.body_stmt(&s.body)),
                do_while: true,
            }),
            S::SwitchStatement(s) => Stmt::Switch(SwitchStmt {
                span: s.span.into(),
                discriminant: self.expr(&s.discriminant),
                cases: s
                    .cases
                    .iter()
                    .map(|case| SwitchCase {
                        span: case.span.into(),
                        test: case.test.as_ref().map(|e| self.expr(e)),
                        consequent: self.stmts(&case.consequent),
                    })
                    .collect(),
            }),
            S::BreakStatement(s) if s.label.is_none() => Stmt::Break {
                span: s.span.into(),
            },
            S::ContinueStatement(s) if s.label.is_none() => Stmt::Continue {
                span: s.span.into(),
            },
            S::ThrowStatement(s) => Stmt::Throw {
                span: s.span.into(),
                argument: self.expr(&s.argument),
            },
            S::TryStatement(s) => Stmt::Try(Box::new(TryStmt {
                span: s.span.into(),
                block: self.block(&s.block),
                handler: s.handler.as_ref().map(|handler| CatchClause {
                    span: handler.span.into(),
                    param: handler.param.as_ref().map(|p| self.binding(&p.pattern)),
                    body: self.block(&handler.body),
                }),
                finalizer: s.finalizer.as_ref().map(|b| self.block(b)),
            })),
            S::EmptyStatement(s) => Stmt::Empty {
                span: s.span.into(),
            },
            S::DebuggerStatement(s) => Stmt::Empty {
                span: s.span.into(),
            },
            S::ImportDeclaration(decl) => self.import(decl)?,
            S::ExportNamedDeclaration(decl) => self.export_named(decl)?,
            S::ExportDefaultDeclaration(decl) => self.export_default(decl)?,
            S::ExportAllDeclaration(decl) => {
                if decl.export_kind.is_type() {
                    return None;
                }
                Stmt::Export(ExportStmt {
                    span: decl.span.into(),
                    decl: ExportDecl::All {
                        source: decl.source.value.to_string(),
                        exported: decl.exported.as_ref().map(module_export_name),
                    },
                })
            }
            S::TSTypeAliasDeclaration(_)
            | S::TSInterfaceDeclaration(_)
            | S::TSModuleDeclaration(_)
            | S::TSImportEqualsDeclaration(_) => return None,
            S::BreakStatement(s) => Stmt::Unsupported {
                span: s.span.into(),
                what: "labeled break",
            },
            S::ContinueStatement(s) => Stmt::Unsupported {
                span: s.span.into(),
                what: "labeled continue",
            },
            S::LabeledStatement(s) => Stmt::Unsupported {
                span: s.span.into(),
                what: "labeled statement",
            },
            S::TSEnumDeclaration(s) => Stmt::Unsupported {
                span: s.span.into(),
                what: "enum",
            },
            other => Stmt::Unsupported {
                span: oxc_span::GetSpan::span(other).into(),
                what: "statement",
            },
        };
        Some(lowered)
    }

    /// A statement in a position that needs exactly one statement.
    fn body_stmt(&self, stmt: &oxc::Statement<'_>) -> Stmt {
        self.stmt(stmt).unwrap_or(Stmt::Empty {
            span: oxc_span::GetSpan::span(stmt).into(),
        })
    }

    fn block(&self, block: &oxc::BlockStatement<'_>) -> Block {
        Block {
            span: block.span.into(),
            body: self.stmts(&block.body),
        }
    }

    fn var_decl_stmt(&self, decl: &oxc::VariableDeclaration<'_>) -> Stmt {
        match decl.kind {
            oxc::VariableDeclarationKind::Var
            | oxc::VariableDeclarationKind::Let
            | oxc::VariableDeclarationKind::Const => Stmt::Var(self.var_decl(decl)),
            _ => Stmt::Unsupported {
                span: decl.span.into(),
                what: "using declaration",
            },
        }
    }

    fn var_decl(&self, decl: &oxc::VariableDeclaration<'_>) -> VarDecl {
        let kind = match decl.kind {
            oxc::VariableDeclarationKind::Var => VarKind::Var,
            oxc::VariableDeclarationKind::Let => VarKind::Let,
            _ => VarKind::Const,
        };
        VarDecl {
            span: decl.span.into(),
            kind,
            declarations: decl
                .declarations
                .iter()
                .map(|d| Declarator {
                    span: d.span.into(),
                    id: self.binding(&d.id),
                    init: d.init.as_ref().map(|e| self.expr(e)),
                })
                .collect(),
        }
    }

    fn class_decl(&self, class: &oxc::Class<'_>) -> Option<Stmt> {
        if class.declare {
            return None;
        }
        let id = class.id.as_ref()?;
        Some(Stmt::Class {
            span: class.span.into(),
            id: Ident::new(id.span.into(), id.name.to_string()),
        })
    }

    fn for_each(
        &self,
        span: oxc_span::Span,
        each: ForEachKind,
        left: &oxc::ForStatementLeft<'_>,
        right: &oxc::Expression<'_>,
        body: &oxc::Statement<'_>,
    ) -> Stmt {
        let (decl_kind, left) = match left {
            oxc::ForStatementLeft::VariableDeclaration(decl) => {
                let lowered = self.var_decl(decl);
                match lowered.declarations.into_iter().next() {
                    Some(first) => (Some(lowered.kind), first.id),
                    None => {
                        return Stmt::Unsupported {
                            span: span.into(),
                            what: "for-each declaration",
                        }
                    }
                }
            }
            oxc::ForStatementLeft::AssignmentTargetIdentifier(id) => (
                None,
                Pattern::Ident(Ident::new(id.span.into(), id.name.to_string())),
            ),
            other => (
                None,
                Pattern::Expr(Box::new(Expr::Unsupported {
                    span: oxc_span::GetSpan::span(other).into(),
                    what: "for-each target",
                })),
            ),
        };
        Stmt::ForEach(ForEachStmt {
            span: span.into(),
            each,
            decl_kind,
            left,
            right: self.expr(right),
            body: Box::new(self.body_stmt(body)),
        })
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Modules
    // ───────────────────────────────────────────────────────────────────────────

    fn import(&self, decl: &oxc::ImportDeclaration<'_>) -> Option<Stmt> {
        if decl.import_kind.is_type() {
            return None;
        }
        let mut specifiers = Vec::new();
        if let Some(list) = &decl.specifiers {
            for spec in list {
                match spec {
                    oxc::ImportDeclarationSpecifier::ImportSpecifier(s) => {
                        if s.import_kind.is_type() {
                            continue;
                        }
                        specifiers.push(ImportSpec::Named {
                            imported: module_export_name(&s.imported),
                            local: Ident::new(s.local.span.into(), s.local.name.to_string()),
                        });
                    }
                    oxc::ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                        specifiers.push(ImportSpec::Default {
                            local: Ident::new(s.local.span.into(), s.local.name.to_string()),
                        });
                    }
                    oxc::ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                        specifiers.push(ImportSpec::Namespace {
                            local: Ident::new(s.local.span.into(), s.local.name.to_string()),
                        });
                    }
                }
            }
        }
        Some(Stmt::Import(ImportDecl {
            span: decl.span.into(),
            source: decl.source.value.to_string(),
            specifiers,
        }))
    }

    fn export_named(&self, decl: &oxc::ExportNamedDeclaration<'_>) -> Option<Stmt> {
        if decl.export_kind.is_type() {
            return None;
        }
        let span: Span = decl.span.into();
        if let Some(declaration) = &decl.declaration {
            let inner = match declaration {
                oxc::Declaration::VariableDeclaration(var) => self.var_decl_stmt(var),
                oxc::Declaration::FunctionDeclaration(func) => {
                    func.body.as_ref()?;
                    Stmt::Function(Box::new(self.function(func)))
                }
                oxc::Declaration::ClassDeclaration(class) => self.class_decl(class)?,
                _ => return None,
            };
            return Some(Stmt::Export(ExportStmt {
                span,
                decl: ExportDecl::Decl(Box::new(inner)),
            }));
        }
        let specifiers = decl
            .specifiers
            .iter()
            .filter(|s| !s.export_kind.is_type())
            .map(|s| ExportSpec {
                local: module_export_name(&s.local),
                exported: module_export_name(&s.exported),
            })
            .collect();
        Some(Stmt::Export(ExportStmt {
            span,
            decl: ExportDecl::List {
                specifiers,
                source: decl.source.as_ref().map(|s| s.value.to_string()),
            },
        }))
    }

    fn export_default(&self, decl: &oxc::ExportDefaultDeclaration<'_>) -> Option<Stmt> {
        let span: Span = decl.span.into();
        let value = match &decl.declaration {
            oxc::ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                let func = self.function(func);
                if func.id.is_some() {
                    return Some(Stmt::Export(ExportStmt {
                        span,
                        decl: ExportDecl::DefaultFunction(Box::new(func)),
                    }));
                }
                Expr::Function(Box::new(func))
            }
            oxc::ExportDefaultDeclarationKind::ClassDeclaration(class) => Expr::Unsupported {
                span: class.span.into(),
                what: "class",
            },
            oxc::ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => return None,
            other => match other.as_expression() {
                Some(expr) => self.expr(expr),
                None => return None,
            },
        };
        Some(Stmt::Export(ExportStmt {
            span,
            decl: ExportDecl::Default(value),
        }))
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Functions & patterns
    // ───────────────────────────────────────────────────────────────────────────

    fn function(&self, func: &oxc::Function<'_>) -> Function {
        let body = if func.generator {
            vec![unsupported_body("generator function")]
        } else if func.params.rest.is_some() {
            vec![unsupported_body("rest parameters")]
        } else {
            func.body
                .as_ref()
                .map(|body| self.stmts(&body.statements))
                .unwrap_or_default()
        };
        Function {
            span: func.span.into(),
            id: func
                .id
                .as_ref()
                .map(|id| Ident::new(id.span.into(), id.name.to_string())),
            params: self.params(&func.params),
            body,
            is_async: func.r#async,
        }
    }

    fn params(&self, params: &oxc::FormalParameters<'_>) -> Vec<Pattern> {
        params
            .items
            .iter()
            .map(|param| self.binding(&param.pattern))
            .collect()
    }

    fn arrow(&self, arrow: &oxc::ArrowFunctionExpression<'_>) -> Expr {
        let span: Span = arrow.span.into();
        let body = if arrow.params.rest.is_some() {
            ArrowBody::Block(vec![unsupported_body("rest parameters")])
        } else if arrow.expression {
            match arrow.body.statements.first() {
                Some(oxc::Statement::ExpressionStatement(s)) => {
                    ArrowBody::Expr(Box::new(self.expr(&s.expression)))
                }
                _ => ArrowBody::Block(Vec::new()),
            }
        } else {
            ArrowBody::Block(self.stmts(&arrow.body.statements))
        };
        Expr::Arrow(Box::new(Arrow {
            span,
            params: self.params(&arrow.params),
            body,
            is_async: arrow.r#async,
        }))
    }

    fn binding(&self, pattern: &oxc::BindingPattern<'_>) -> Pattern {
        match pattern {
            oxc::BindingPattern::BindingIdentifier(id) => {
                Pattern::Ident(Ident::new(id.span.into(), id.name.to_string()))
            }
            oxc::BindingPattern::ObjectPattern(obj) => Pattern::Object {
                span: obj.span.into(),
                props: obj
                    .properties
                    .iter()
                    .map(|prop| ObjectPatProp {
                        key: self.prop_key(&prop.key, prop.computed),
                        value: self.binding(&prop.value),
                    })
                    .collect(),
                rest: obj
                    .rest
                    .as_ref()
                    .map(|rest| Box::new(self.binding(&rest.argument))),
            },
            oxc::BindingPattern::ArrayPattern(arr) => Pattern::Array {
                span: arr.span.into(),
                elements: arr
                    .elements
                    .iter()
                    .map(|el| el.as_ref().map(|p| self.binding(p)))
                    .collect(),
                rest: arr
                    .rest
                    .as_ref()
                    .map(|rest| Box::new(self.binding(&rest.argument))),
            },
            oxc::BindingPattern::AssignmentPattern(assign) => Pattern::Assign {
                span: assign.span.into(),
                left: Box::new(self.binding(&assign.left)),
                right: Box::new(self.expr(&assign.right)),
            },
        }
    }

    fn assign_target(&self, target: &oxc::AssignmentTarget<'_>) -> Pattern {
        use oxc::AssignmentTarget as T;
        match target {
            T::AssignmentTargetIdentifier(id) => {
                Pattern::Ident(Ident::new(id.span.into(), id.name.to_string()))
            }
            T::StaticMemberExpression(m) => Pattern::Expr(Box::new(self.static_member(m))),
            T::ComputedMemberExpression(m) => Pattern::Expr(Box::new(self.computed_member(m))),
            T::TSAsExpression(e) => self.expr_target(&e.expression),
            T::TSSatisfiesExpression(e) => self.expr_target(&e.expression),
            T::TSNonNullExpression(e) => self.expr_target(&e.expression),
            other => Pattern::Expr(Box::new(Expr::Unsupported {
                span: oxc_span::GetSpan::span(other).into(),
                what: "destructuring assignment",
            })),
        }
    }

    fn expr_target(&self, expr: &oxc::Expression<'_>) -> Pattern {
        match self.expr(expr) {
            Expr::Ident(id) => Pattern::Ident(id),
            other => Pattern::Expr(Box::new(other)),
        }
    }

    fn simple_target(&self, target: &oxc::SimpleAssignmentTarget<'_>) -> Expr {
        use oxc::SimpleAssignmentTarget as T;
        match target {
            T::AssignmentTargetIdentifier(id) => {
                Expr::Ident(Ident::new(id.span.into(), id.name.to_string()))
            }
            T::StaticMemberExpression(m) => self.static_member(m),
            T::ComputedMemberExpression(m) => self.computed_member(m),
            T::TSAsExpression(e) => self.expr(&e.expression),
            T::TSSatisfiesExpression(e) => self.expr(&e.expression),
            T::TSNonNullExpression(e) => self.expr(&e.expression),
            other => Expr::Unsupported {
                span: oxc_span::GetSpan::span(other).into(),
                what: "update target",
            },
        }
    }

    fn prop_key(&self, key: &oxc::PropertyKey<'_>, computed: bool) -> PropKey {
        match key {
            oxc::PropertyKey::StaticIdentifier(id) => PropKey::Ident(id.name.to_string()),
            oxc::PropertyKey::StringLiteral(s) if !computed => PropKey::Str(s.value.to_string()),
            oxc::PropertyKey::NumericLiteral(n) if !computed => PropKey::Num(n.value),
            other => match other.as_expression() {
                Some(expr) => PropKey::Computed(Box::new(self.expr(expr))),
                None => PropKey::Computed(Box::new(Expr::Unsupported {
                    span: oxc_span::GetSpan::span(other).into(),
                    what: "private name",
                })),
            },
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────────────────

    fn expr(&self, expr: &oxc::Expression<'_>) -> Expr {
        use oxc::Expression as E;

        if !self.defines.is_empty() {
            if let Some(value) = dotted_path(expr).and_then(|path| self.defines.get(&path)) {
                return json_to_expr(oxc_span::GetSpan::span(expr).into(), value);
            }
        }

        match expr {
            E::BooleanLiteral(lit) => Expr::Lit {
                span: lit.span.into(),
                value: Lit::Bool(lit.value),
            },
            E::NullLiteral(lit) => Expr::Lit {
                span: lit.span.into(),
                value: Lit::Null,
            },
            E::NumericLiteral(lit) => Expr::Lit {
                span: lit.span.into(),
                value: Lit::Num(lit.value),
            },
            E::StringLiteral(lit) => Expr::Lit {
                span: lit.span.into(),
                value: Lit::Str(lit.value.to_string()),
            },
            E::TemplateLiteral(tpl) => Expr::Template(self.template(tpl)),
            E::Identifier(id) => Expr::Ident(Ident::new(id.span.into(), id.name.to_string())),
            E::ThisExpression(this) => Expr::This {
                span: this.span.into(),
            },
            E::ArrayExpression(arr) => Expr::Array {
                span: arr.span.into(),
                elements: arr
                    .elements
                    .iter()
                    .map(|el| match el {
                        oxc::ArrayExpressionElement::SpreadElement(spread) => Some(ExprOrSpread {
                            spread: true,
                            expr: self.expr(&spread.argument),
                        }),
                        oxc::ArrayExpressionElement::Elision(_) => None,
                        other => other
                            .as_expression()
                            .map(|e| ExprOrSpread::plain(self.expr(e))),
                    })
                    .collect(),
            },
            E::ObjectExpression(obj) => Expr::Object {
                span: obj.span.into(),
                props: obj
                    .properties
                    .iter()
                    .map(|prop| match prop {
                        oxc::ObjectPropertyKind::ObjectProperty(p) => {
                            let key = self.prop_key(&p.key, p.computed);
                            match (p.kind, &p.value) {
                                (oxc::PropertyKind::Init, value) => Prop::KeyValue {
                                    key,
                                    value: self.expr(value),
                                },
                                (kind, E::FunctionExpression(func)) => Prop::Accessor {
                                    kind: match kind {
                                        oxc::PropertyKind::Get => AccessorKind::Get,
                                        _ => AccessorKind::Set,
                                    },
                                    key,
                                    function: Box::new(self.function(func)),
                                },
                                (_, value) => Prop::KeyValue {
                                    key,
                                    value: Expr::Unsupported {
                                        span: oxc_span::GetSpan::span(value).into(),
                                        what: "accessor property",
                                    },
                                },
                            }
                        }
                        oxc::ObjectPropertyKind::SpreadProperty(spread) => {
                            Prop::Spread(self.expr(&spread.argument))
                        }
                    })
                    .collect(),
            },
            E::FunctionExpression(func) => Expr::Function(Box::new(self.function(func))),
            E::ArrowFunctionExpression(arrow) => self.arrow(arrow),
            E::UnaryExpression(u) => Expr::Unary {
                span: u.span.into(),
                operator: u.operator,
                argument: Box::new(self.expr(&u.argument)),
            },
            E::UpdateExpression(u) => Expr::Update {
                span: u.span.into(),
                operator: u.operator,
                prefix: u.prefix,
                target: Box::new(self.simple_target(&u.argument)),
            },
            E::BinaryExpression(b) => Expr::Binary {
                span: b.span.into(),
                operator: b.operator,
                left: Box::new(self.expr(&b.left)),
                right: Box::new(self.expr(&b.right)),
            },
            E::LogicalExpression(l) => Expr::Logical {
                span: l.span.into(),
                operator: l.operator,
                left: Box::new(self.expr(&l.left)),
                right: Box::new(self.expr(&l.right)),
            },
            E::AssignmentExpression(a) => Expr::Assign {
                span: a.span.into(),
                operator: a.operator,
                target: Box::new(self.assign_target(&a.left)),
                value: Box::new(self.expr(&a.right)),
            },
            E::ConditionalExpression(c) => Expr::Cond {
                span: c.span.into(),
                test: Box::new(self.expr(&c.test)),
                consequent: Box::new(self.expr(&c.consequent)),
                alternate: Box::new(self.expr(&c.alternate)),
            },
            E::StaticMemberExpression(m) => self.static_member(m),
            E::ComputedMemberExpression(m) => self.computed_member(m),
            E::CallExpression(call) => Expr::Call(self.call(call)),
            E::NewExpression(new) => Expr::New(CallExpr {
                span: new.span.into(),
                callee: Box::new(self.expr(&new.callee)),
                arguments: self.arguments(&new.arguments),
                optional: false,
            }),
            E::ChainExpression(chain) => {
                let inner = match &chain.expression {
                    oxc::ChainElement::CallExpression(call) => Expr::Call(self.call(call)),
                    oxc::ChainElement::StaticMemberExpression(m) => self.static_member(m),
                    oxc::ChainElement::ComputedMemberExpression(m) => self.computed_member(m),
                    oxc::ChainElement::TSNonNullExpression(e) => self.expr(&e.expression),
                    other => Expr::Unsupported {
                        span: oxc_span::GetSpan::span(other).into(),
                        what: "private field",
                    },
                };
                Expr::Chain {
                    span: chain.span.into(),
                    expr: Box::new(inner),
                }
            }
            E::SequenceExpression(seq) => Expr::Seq {
                span: seq.span.into(),
                expressions: seq.expressions.iter().map(|e| self.expr(e)).collect(),
            },
            E::AwaitExpression(a) => Expr::Await {
                span: a.span.into(),
                argument: Box::new(self.expr(&a.argument)),
            },
            E::ParenthesizedExpression(p) => self.expr(&p.expression),
            E::TaggedTemplateExpression(tagged) => Expr::TaggedTemplate(Box::new(TaggedTemplate {
                span: tagged.span.into(),
                tag: Box::new(self.expr(&tagged.tag)),
                quasi: self.template(&tagged.quasi),
            })),
            E::JSXElement(el) => Expr::Jsx(Box::new(self.jsx_element(el))),
            E::JSXFragment(frag) => Expr::Jsx(Box::new(JsxElement {
                span: frag.span.into(),
                name: None,
                attributes: Vec::new(),
                children: self.jsx_children(&frag.children),
            })),
            E::TSAsExpression(e) => self.expr(&e.expression),
            E::TSSatisfiesExpression(e) => self.expr(&e.expression),
            E::TSNonNullExpression(e) => self.expr(&e.expression),
            E::TSTypeAssertion(e) => self.expr(&e.expression),
            E::TSInstantiationExpression(e) => self.expr(&e.expression),
            E::RegExpLiteral(lit) => Expr::Regex {
                span: lit.span.into(),
                pattern: lit.regex.pattern.text.to_string(),
                flags: lit.regex.flags.to_string(),
            },
            E::BigIntLiteral(lit) => Expr::Unsupported {
                span: lit.span.into(),
                what: "bigint",
            },
            E::ClassExpression(class) => Expr::Unsupported {
                span: class.span.into(),
                what: "class",
            },
            E::YieldExpression(y) => Expr::Unsupported {
                span: y.span.into(),
                what: "yield",
            },
            E::ImportExpression(i) => Expr::Unsupported {
                span: i.span.into(),
                what: "dynamic import",
            },
            other => Expr::Unsupported {
                span: oxc_span::GetSpan::span(other).into(),
                what: "expression",
            },
        }
    }

    fn template(&self, tpl: &oxc::TemplateLiteral<'_>) -> Template {
        Template {
            span: tpl.span.into(),
            quasis: tpl
                .quasis
                .iter()
                .map(|q| Quasi {
                    raw: q.value.raw.to_string(),
                    cooked: q.value.cooked.as_ref().map(|c| c.to_string()),
                })
                .collect(),
            expressions: tpl.expressions.iter().map(|e| self.expr(e)).collect(),
        }
    }

    fn static_member(&self, m: &oxc::StaticMemberExpression<'_>) -> Expr {
        Expr::Member(MemberExpr {
            span: m.span.into(),
            object: Box::new(self.expr(&m.object)),
            property: MemberProp::Static(m.property.name.to_string()),
            optional: m.optional,
        })
    }

    fn computed_member(&self, m: &oxc::ComputedMemberExpression<'_>) -> Expr {
        Expr::Member(MemberExpr {
            span: m.span.into(),
            object: Box::new(self.expr(&m.object)),
            property: MemberProp::Computed(Box::new(self.expr(&m.expression))),
            optional: m.optional,
        })
    }

    fn call(&self, call: &oxc::CallExpression<'_>) -> CallExpr {
        CallExpr {
            span: call.span.into(),
            callee: Box::new(self.expr(&call.callee)),
            arguments: self.arguments(&call.arguments),
            optional: call.optional,
        }
    }

    fn arguments(&self, args: &[oxc::Argument<'_>]) -> Vec<ExprOrSpread> {
        args.iter()
            .map(|arg| match arg {
                oxc::Argument::SpreadElement(spread) => ExprOrSpread {
                    spread: true,
                    expr: self.expr(&spread.argument),
                },
                other => match other.as_expression() {
                    Some(e) => ExprOrSpread::plain(self.expr(e)),
                    None => ExprOrSpread::plain(Expr::Unsupported {
                        span: oxc_span::GetSpan::span(other).into(),
                        what: "argument",
                    }),
                },
            })
            .collect()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // JSX
    // ───────────────────────────────────────────────────────────────────────────

    fn jsx_element(&self, el: &oxc::JSXElement<'_>) -> JsxElement {
        let attributes = el
            .opening_element
            .attributes
            .iter()
            .map(|item| match item {
                oxc::JSXAttributeItem::Attribute(attr) => {
                    let name = match &attr.name {
                        oxc::JSXAttributeName::Identifier(id) => id.name.to_string(),
                        oxc::JSXAttributeName::NamespacedName(ns) => {
                            format!("{}:{}", ns.namespace.name, ns.name.name)
                        }
                    };
                    let value = attr.value.as_ref().map(|value| match value {
                        oxc::JSXAttributeValue::StringLiteral(s) => {
                            JsxAttrValue::Str(s.value.to_string())
                        }
                        oxc::JSXAttributeValue::ExpressionContainer(container) => {
                            JsxAttrValue::Expr(self.jsx_expression(&container.expression))
                        }
                        oxc::JSXAttributeValue::Element(inner) => {
                            JsxAttrValue::Element(Box::new(self.jsx_element(inner)))
                        }
                        oxc::JSXAttributeValue::Fragment(frag) => {
                            JsxAttrValue::Element(Box::new(JsxElement {
                                span: frag.span.into(),
                                name: None,
                                attributes: Vec::new(),
                                children: self.jsx_children(&frag.children),
                            }))
                        }
                    });
                    JsxAttr::Attr { name, value }
                }
                oxc::JSXAttributeItem::SpreadAttribute(spread) => {
                    JsxAttr::Spread(self.expr(&spread.argument))
                }
            })
            .collect();

        JsxElement {
            span: el.span.into(),
            name: Some(jsx_element_name(&el.opening_element.name)),
            attributes,
            children: self.jsx_children(&el.children),
        }
    }

    fn jsx_children(&self, children: &[oxc::JSXChild<'_>]) -> Vec<JsxChild> {
        let mut out = Vec::new();
        for child in children {
            match child {
                oxc::JSXChild::Text(text) => {
                    if let Some(text) = normalize_jsx_text(&text.value) {
                        out.push(JsxChild::Text(text));
                    }
                }
                oxc::JSXChild::Element(el) => out.push(JsxChild::Element(self.jsx_element(el))),
                oxc::JSXChild::Fragment(frag) => out.push(JsxChild::Element(JsxElement {
                    span: frag.span.into(),
                    name: None,
                    attributes: Vec::new(),
                    children: self.jsx_children(&frag.children),
                })),
                oxc::JSXChild::ExpressionContainer(container) => {
                    if container.expression.as_expression().is_some() {
                        out.push(JsxChild::Expr(self.jsx_expression(&container.expression)));
                    }
                }
                oxc::JSXChild::Spread(spread) => {
                    out.push(JsxChild::Spread(self.expr(&spread.expression)))
                }
            }
        }
        out
    }

    fn jsx_expression(&self, expr: &oxc::JSXExpression<'_>) -> Expr {
        match expr.as_expression() {
            Some(e) => self.expr(e),
            None => Expr::ident("undefined"),
        }
    }
}

/// Body of a function the sandbox cannot run: calling it throws.
fn unsupported_body(what: &'static str) -> Stmt {
    Stmt::Unsupported {
        span: Span::SYNTHETIC,
        what,
    }
}

fn module_export_name(name: &oxc::ModuleExportName<'_>) -> String {
    match name {
        oxc::ModuleExportName::IdentifierName(id) => id.name.to_string(),
        oxc::ModuleExportName::IdentifierReference(id) => id.name.to_string(),
        oxc::ModuleExportName::StringLiteral(s) => s.value.to_string(),
    }
}

fn jsx_element_name(name: &oxc::JSXElementName<'_>) -> String {
    match name {
        oxc::JSXElementName::Identifier(id) => id.name.to_string(),
        oxc::JSXElementName::IdentifierReference(id) => id.name.to_string(),
        oxc::JSXElementName::NamespacedName(ns) => {
            format!("{}:{}", ns.namespace.name, ns.name.name)
        }
        oxc::JSXElementName::MemberExpression(member) => jsx_member_name(member),
        oxc::JSXElementName::ThisExpression(_) => "this".to_string(),
    }
}

fn jsx_member_name(member: &oxc::JSXMemberExpression<'_>) -> String {
    let object = match &member.object {
        oxc::JSXMemberExpressionObject::IdentifierReference(id) => id.name.to_string(),
        oxc::JSXMemberExpressionObject::MemberExpression(inner) => jsx_member_name(inner),
        _ => "this".to_string(),
    };
    format!("{}.{}", object, member.property.name)
}

/// JSX text whitespace: lines are trimmed, blank lines dropped, the rest
/// joined with single spaces.
fn normalize_jsx_text(raw: &str) -> Option<String> {
    if !raw.contains('\n') {
        return if raw.is_empty() {
            None
        } else {
            Some(raw.to_string())
        };
    }
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join(" "))
    }
}

/// `process.env.EVAL` style dotted path of an identifier/static member chain.
fn dotted_path(expr: &oxc::Expression<'_>) -> Option<String> {
    match expr {
        oxc::Expression::Identifier(id) => Some(id.name.to_string()),
        oxc::Expression::StaticMemberExpression(m) if !m.optional => {
            let object = dotted_path(&m.object)?;
            Some(format!("{}.{}", object, m.property.name))
        }
        _ => None,
    }
}

pub(crate) fn json_to_expr(span: Span, value: &serde_json::Value) -> Expr {
    use serde_json::Value;
    match value {
        Value::Null => Expr::Lit {
            span,
            value: Lit::Null,
        },
        Value::Bool(b) => Expr::Lit {
            span,
            value: Lit::Bool(*b),
        },
        Value::Number(n) => Expr::Lit {
            span,
            value: Lit::Num(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Expr::Lit {
            span,
            value: Lit::Str(s.clone()),
        },
        Value::Array(items) => Expr::Array {
            span,
            elements: items
                .iter()
                .map(|item| Some(ExprOrSpread::plain(json_to_expr(Span::SYNTHETIC, item))))
                .collect(),
        },
        Value::Object(map) => Expr::Object {
            span,
            props: map
                .iter()
                .map(|(key, item)| Prop::KeyValue {
                    key: PropKey::Str(key.clone()),
                    value: json_to_expr(Span::SYNTHETIC, item),
                })
                .collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_module(src, "test.tsx").unwrap().program
    }

    #[test]
    fn test_lowers_typescript_away() {
        let program = parse(
            "interface P { a: string }\ntype T = number;\nconst x = (1 as number)!;\n",
        );
        assert_eq!(program.body.len(), 1);
        match &program.body[0] {
            Stmt::Var(decl) => {
                assert_eq!(decl.kind, VarKind::Const);
                assert!(matches!(
                    decl.declarations[0].init,
                    Some(Expr::Lit {
                        value: Lit::Num(n),
                        ..
                    }) if n == 1.0
                ));
            }
            other => panic!("expected var, got {:?}", other),
        }
    }

    #[test]
    fn test_tagged_template_quasis() {
        let program = parse("const s = css`.a { color: ${c}; }`;");
        let Stmt::Var(decl) = &program.body[0] else {
            panic!("expected var");
        };
        let Some(Expr::TaggedTemplate(tagged)) = &decl.declarations[0].init else {
            panic!("expected tagged template");
        };
        assert_eq!(tagged.quasi.quasis.len(), 2);
        assert_eq!(tagged.quasi.quasis[0].raw, ".a { color: ");
        assert_eq!(tagged.quasi.expressions.len(), 1);
        assert!(matches!(&tagged.quasi.expressions[0], Expr::Ident(id) if id.name == "c"));
    }

    #[test]
    fn test_defines_substitute_paths() {
        let mut defines = BTreeMap::new();
        defines.insert("process.env.EVAL".to_string(), serde_json::json!(true));
        let program = parse_program("x = process.env.EVAL;", "a.js", &defines).unwrap();
        let Stmt::Expr {
            expr: Expr::Assign { value, .. },
            ..
        } = &program.body[0]
        else {
            panic!("expected assignment");
        };
        assert!(matches!(
            **value,
            Expr::Lit {
                value: Lit::Bool(true),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_module("const = ;", "broken.ts").unwrap_err();
        assert!(matches!(err, StyleError::Parse { .. }));
    }

    #[test]
    fn test_prescan() {
        assert!(contains_tagged_template(
            "function f() { return css`a`; }",
            "a.js",
            "css"
        ));
        assert!(!contains_tagged_template("const css = 1;", "a.js", "css"));
        assert!(!contains_tagged_template("styled.css`a`", "a.js", "css"));
    }

    #[test]
    fn test_jsx_text_normalization() {
        assert_eq!(normalize_jsx_text("\n   \n"), None);
        assert_eq!(
            normalize_jsx_text("\n  Hello\n   world  \n"),
            Some("Hello world".to_string())
        );
        assert_eq!(normalize_jsx_text(" a "), Some(" a ".to_string()));
    }
}
