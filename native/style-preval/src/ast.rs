//! Owned Syntax Tree
//!
//! The oxc arena tree is lowered once into these owned nodes so that the
//! hoister can clone, move and splice subtrees without arena lifetimes, and
//! so the sandbox can execute the same nodes it analyses.
//!
//! Node identity is the source [`Span`]. Nodes created by the compiler carry
//! [`Span::SYNTHETIC`].

pub use oxc_syntax::operator::{
    AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const SYNTHETIC: Span = Span {
        start: u32::MAX,
        end: u32::MAX,
    };

    pub const fn new(start: u32, end: u32) -> Self {
        Span { start, end }
    }

    pub fn is_synthetic(&self) -> bool {
        *self == Span::SYNTHETIC
    }

    /// True when `other` lies entirely inside this span.
    pub fn contains(&self, other: Span) -> bool {
        !self.is_synthetic()
            && !other.is_synthetic()
            && self.start <= other.start
            && other.end <= self.end
    }
}

impl From<oxc_span::Span> for Span {
    fn from(span: oxc_span::Span) -> Self {
        Span::new(span.start, span.end)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROGRAM & STATEMENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub span: Span,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

impl VarKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VarKind::Var => "var",
            VarKind::Let => "let",
            VarKind::Const => "const",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub span: Span,
    pub kind: VarKind,
    pub declarations: Vec<Declarator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub span: Span,
    pub id: Pattern,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub span: Span,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub span: Span,
    pub test: Expr,
    pub consequent: Box<Stmt>,
    pub alternate: Option<Box<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Var(VarDecl),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub span: Span,
    pub init: Option<ForInit>,
    pub test: Option<Expr>,
    pub update: Option<Expr>,
    pub body: Box<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForEachKind {
    In,
    Of,
}

/// `for (left in right)` / `for (left of right)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForEachStmt {
    pub span: Span,
    pub each: ForEachKind,
    /// `None` when the loop assigns to an existing target.
    pub decl_kind: Option<VarKind>,
    pub left: Pattern,
    pub right: Expr,
    pub body: Box<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub span: Span,
    pub test: Expr,
    pub body: Box<Stmt>,
    /// `do { } while (test)`
    pub do_while: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub span: Span,
    pub param: Option<Pattern>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryStmt {
    pub span: Span,
    pub block: Block,
    pub handler: Option<CatchClause>,
    pub finalizer: Option<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub span: Span,
    pub test: Option<Expr>,
    pub consequent: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchStmt {
    pub span: Span,
    pub discriminant: Expr,
    pub cases: Vec<SwitchCase>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportSpec {
    /// `import local from "src"`
    Default { local: Ident },
    /// `import * as local from "src"`
    Namespace { local: Ident },
    /// `import { imported as local } from "src"`
    Named { imported: String, local: Ident },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub span: Span,
    pub source: String,
    pub specifiers: Vec<ImportSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSpec {
    pub local: String,
    pub exported: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportDecl {
    /// `export const x = ...`, `export function f() {}`
    Decl(Box<Stmt>),
    /// `export default <expr>`
    Default(Expr),
    /// `export default function name() {}`, which also binds `name`.
    DefaultFunction(Box<Function>),
    /// `export { a as b }` / `export { a } from "src"`
    List {
        specifiers: Vec<ExportSpec>,
        source: Option<String>,
    },
    /// `export * from "src"` / `export * as ns from "src"`
    All {
        source: String,
        exported: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportStmt {
    pub span: Span,
    pub decl: ExportDecl,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr { span: Span, expr: Expr },
    Var(VarDecl),
    Function(Box<Function>),
    /// Class declarations are bound but never executable in the sandbox.
    Class { span: Span, id: Ident },
    Return { span: Span, argument: Option<Expr> },
    If(IfStmt),
    Block(Block),
    For(ForStmt),
    ForEach(ForEachStmt),
    While(WhileStmt),
    Switch(SwitchStmt),
    Break { span: Span },
    Continue { span: Span },
    Throw { span: Span, argument: Expr },
    Try(Box<TryStmt>),
    Import(ImportDecl),
    Export(ExportStmt),
    Empty { span: Span },
    Unsupported { span: Span, what: &'static str },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr { span, .. }
            | Stmt::Class { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Throw { span, .. }
            | Stmt::Empty { span }
            | Stmt::Unsupported { span, .. } => *span,
            Stmt::Var(decl) => decl.span,
            Stmt::Function(func) => func.span,
            Stmt::If(stmt) => stmt.span,
            Stmt::Block(block) => block.span,
            Stmt::For(stmt) => stmt.span,
            Stmt::ForEach(stmt) => stmt.span,
            Stmt::While(stmt) => stmt.span,
            Stmt::Switch(stmt) => stmt.span,
            Stmt::Try(stmt) => stmt.span,
            Stmt::Import(decl) => decl.span,
            Stmt::Export(stmt) => stmt.span,
        }
    }

    /// `const <name> = <init>;`
    pub fn const_decl(name: &str, init: Expr) -> Stmt {
        Stmt::Var(VarDecl {
            span: Span::SYNTHETIC,
            kind: VarKind::Const,
            declarations: vec![Declarator {
                span: Span::SYNTHETIC,
                id: Pattern::Ident(Ident::synthetic(name)),
                init: Some(init),
            }],
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FUNCTIONS & PATTERNS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub span: Span,
    pub id: Option<Ident>,
    pub params: Vec<Pattern>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrowBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arrow {
    pub span: Span,
    pub params: Vec<Pattern>,
    pub body: ArrowBody,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPatProp {
    pub key: PropKey,
    pub value: Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ident(Ident),
    Object {
        span: Span,
        props: Vec<ObjectPatProp>,
        rest: Option<Box<Pattern>>,
    },
    Array {
        span: Span,
        elements: Vec<Option<Pattern>>,
        rest: Option<Box<Pattern>>,
    },
    /// `pattern = default`
    Assign {
        span: Span,
        left: Box<Pattern>,
        right: Box<Expr>,
    },
    /// Member expressions used as assignment targets.
    Expr(Box<Expr>),
}

impl Pattern {
    pub fn span(&self) -> Span {
        match self {
            Pattern::Ident(id) => id.span,
            Pattern::Object { span, .. }
            | Pattern::Array { span, .. }
            | Pattern::Assign { span, .. } => *span,
            Pattern::Expr(expr) => expr.span(),
        }
    }

    /// Every identifier this pattern binds, in source order.
    pub fn bound_names(&self, out: &mut Vec<String>) {
        match self {
            Pattern::Ident(id) => out.push(id.name.clone()),
            Pattern::Object { props, rest, .. } => {
                for prop in props {
                    prop.value.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
            Pattern::Array { elements, rest, .. } => {
                for element in elements.iter().flatten() {
                    element.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
            Pattern::Assign { left, .. } => left.bound_names(out),
            Pattern::Expr(_) => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub span: Span,
    pub name: String,
}

impl Ident {
    pub fn new(span: Span, name: impl Into<String>) -> Self {
        Ident {
            span,
            name: name.into(),
        }
    }

    pub fn synthetic(name: impl Into<String>) -> Self {
        Ident::new(Span::SYNTHETIC, name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quasi {
    pub raw: String,
    /// `None` for invalid escape sequences in tagged templates.
    pub cooked: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub span: Span,
    pub quasis: Vec<Quasi>,
    pub expressions: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaggedTemplate {
    pub span: Span,
    pub tag: Box<Expr>,
    pub quasi: Template,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropKey {
    Ident(String),
    Str(String),
    Num(f64),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Get,
    Set,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prop {
    KeyValue { key: PropKey, value: Expr },
    /// `get key() {}` or `set key(v) {}`.
    Accessor {
        kind: AccessorKind,
        key: PropKey,
        function: Box<Function>,
    },
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprOrSpread {
    pub spread: bool,
    pub expr: Expr,
}

impl ExprOrSpread {
    pub fn plain(expr: Expr) -> Self {
        ExprOrSpread {
            spread: false,
            expr,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberProp {
    Static(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberExpr {
    pub span: Span,
    pub object: Box<Expr>,
    pub property: MemberProp,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub span: Span,
    pub callee: Box<Expr>,
    pub arguments: Vec<ExprOrSpread>,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsxAttrValue {
    Str(String),
    Expr(Expr),
    Element(Box<JsxElement>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsxAttr {
    Attr {
        name: String,
        value: Option<JsxAttrValue>,
    },
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsxChild {
    Text(String),
    Expr(Expr),
    Element(JsxElement),
    Spread(Expr),
}

/// A JSX element; fragments have `name: None`.
#[derive(Debug, Clone, PartialEq)]
pub struct JsxElement {
    pub span: Span,
    pub name: Option<String>,
    pub attributes: Vec<JsxAttr>,
    pub children: Vec<JsxChild>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit { span: Span, value: Lit },
    Ident(Ident),
    This { span: Span },
    Template(Template),
    TaggedTemplate(Box<TaggedTemplate>),
    Array {
        span: Span,
        elements: Vec<Option<ExprOrSpread>>,
    },
    Object { span: Span, props: Vec<Prop> },
    Function(Box<Function>),
    Arrow(Box<Arrow>),
    Unary {
        span: Span,
        operator: UnaryOperator,
        argument: Box<Expr>,
    },
    Update {
        span: Span,
        operator: UpdateOperator,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary {
        span: Span,
        operator: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        span: Span,
        operator: LogicalOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        span: Span,
        operator: AssignmentOperator,
        target: Box<Pattern>,
        value: Box<Expr>,
    },
    Cond {
        span: Span,
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Member(MemberExpr),
    Call(CallExpr),
    New(CallExpr),
    /// Boundary of an optional chain (`a?.b.c`).
    Chain { span: Span, expr: Box<Expr> },
    Seq { span: Span, expressions: Vec<Expr> },
    Await { span: Span, argument: Box<Expr> },
    Jsx(Box<JsxElement>),
    Regex {
        span: Span,
        pattern: String,
        flags: String,
    },
    Unsupported { span: Span, what: &'static str },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Lit { span, .. }
            | Expr::This { span }
            | Expr::Array { span, .. }
            | Expr::Object { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Update { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Cond { span, .. }
            | Expr::Chain { span, .. }
            | Expr::Seq { span, .. }
            | Expr::Await { span, .. }
            | Expr::Regex { span, .. }
            | Expr::Unsupported { span, .. } => *span,
            Expr::Ident(id) => id.span,
            Expr::Template(tpl) => tpl.span,
            Expr::TaggedTemplate(tagged) => tagged.span,
            Expr::Function(func) => func.span,
            Expr::Arrow(arrow) => arrow.span,
            Expr::Member(member) => member.span,
            Expr::Call(call) | Expr::New(call) => call.span,
            Expr::Jsx(element) => element.span,
        }
    }

    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Ident(Ident::synthetic(name))
    }

    pub fn str(value: impl Into<String>) -> Expr {
        Expr::Lit {
            span: Span::SYNTHETIC,
            value: Lit::Str(value.into()),
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Expr::Function(_) | Expr::Arrow(_))
    }

    pub fn static_member(object: Expr, property: &str) -> Expr {
        Expr::Member(MemberExpr {
            span: Span::SYNTHETIC,
            object: Box::new(object),
            property: MemberProp::Static(property.to_string()),
            optional: false,
        })
    }

    pub fn call(callee: Expr, arguments: Vec<Expr>) -> Expr {
        Expr::Call(CallExpr {
            span: Span::SYNTHETIC,
            callee: Box::new(callee),
            arguments: arguments.into_iter().map(ExprOrSpread::plain).collect(),
            optional: false,
        })
    }

    pub fn arrow(params: Vec<Pattern>, body: Expr) -> Expr {
        Expr::Arrow(Box::new(Arrow {
            span: Span::SYNTHETIC,
            params,
            body: ArrowBody::Expr(Box::new(body)),
            is_async: false,
        }))
    }
}
