//! JavaScript printer for the owned tree.
//!
//! Used for the synthesized evaluation program and for replacement object
//! literals. Output is deterministic: the same tree always prints to the same
//! text, which matters because printed programs are evaluation cache keys.
//!
//! `Unsupported` nodes print as their original source text when the source is
//! available, so re-parsing reproduces them; generated ones print as a throw.

use crate::ast::*;

pub fn print_program(program: &Program, source: Option<&str>) -> String {
    let mut printer = Printer::new(source);
    for stmt in &program.body {
        printer.stmt(stmt);
    }
    printer.out
}

pub fn print_expr(expr: &Expr, source: Option<&str>) -> String {
    let mut printer = Printer::new(source);
    printer.expr(expr, 0);
    printer.out
}

/// Double-quoted JavaScript string literal.
pub fn string_literal(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

/// `Number.prototype.toString()` for base 10.
pub fn number_to_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value < 0.0 {
        return format!("-{}", number_to_string(-value));
    }

    // Shortest round-trip digits and decimal exponent.
    let sci = format!("{:e}", value);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let k = digits.len() as i32;
    let n = exponent + 1;

    if k <= n && n <= 21 {
        format!("{}{}", digits, "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        format!("{}.{}", &digits[..n as usize], &digits[n as usize..])
    } else if -6 < n && n <= 0 {
        format!("0.{}{}", "0".repeat((-n) as usize), digits)
    } else {
        let sign = if n - 1 < 0 { '-' } else { '+' };
        let exp = (n - 1).abs();
        if k == 1 {
            format!("{}e{}{}", digits, sign, exp)
        } else {
            format!("{}.{}e{}{}", &digits[..1], &digits[1..], sign, exp)
        }
    }
}

pub fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRECEDENCE
// ═══════════════════════════════════════════════════════════════════════════════

const PREC_SEQ: u8 = 1;
const PREC_ASSIGN: u8 = 2;
const PREC_COND: u8 = 3;
const PREC_COALESCE: u8 = 4;
const PREC_UNARY: u8 = 16;
const PREC_UPDATE: u8 = 17;
const PREC_CALL: u8 = 18;
const PREC_PRIMARY: u8 = 19;

fn binary_prec(op: BinaryOperator) -> u8 {
    use BinaryOperator as B;
    match op {
        B::BitwiseOR => 7,
        B::BitwiseXOR => 8,
        B::BitwiseAnd => 9,
        B::Equality | B::Inequality | B::StrictEquality | B::StrictInequality => 10,
        B::LessThan
        | B::LessEqualThan
        | B::GreaterThan
        | B::GreaterEqualThan
        | B::In
        | B::Instanceof => 11,
        B::ShiftLeft | B::ShiftRight | B::ShiftRightZeroFill => 12,
        B::Addition | B::Subtraction => 13,
        B::Multiplication | B::Division | B::Remainder => 14,
        B::Exponential => 15,
    }
}

fn logical_prec(op: LogicalOperator) -> u8 {
    match op {
        LogicalOperator::Coalesce => PREC_COALESCE,
        LogicalOperator::Or => 5,
        LogicalOperator::And => 6,
    }
}

fn prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Seq { .. } => PREC_SEQ,
        Expr::Assign { .. } | Expr::Arrow(_) => PREC_ASSIGN,
        Expr::Cond { .. } => PREC_COND,
        Expr::Logical { operator, .. } => logical_prec(*operator),
        Expr::Binary { operator, .. } => binary_prec(*operator),
        Expr::Unary { .. } | Expr::Await { .. } => PREC_UNARY,
        Expr::Update { .. } => PREC_UPDATE,
        Expr::Call(_) | Expr::New(_) | Expr::Member(_) | Expr::Chain { .. } => PREC_CALL,
        Expr::TaggedTemplate(_) => PREC_CALL,
        Expr::Lit {
            value: Lit::Num(n), ..
        } if *n < 0.0 || n.is_infinite() || n.is_nan() => PREC_UNARY,
        Expr::Unsupported { span, .. } if span.is_synthetic() => PREC_CALL,
        Expr::Unsupported { .. } => PREC_SEQ,
        _ => PREC_PRIMARY,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRINTER
// ═══════════════════════════════════════════════════════════════════════════════

struct Printer<'s> {
    out: String,
    indent: usize,
    source: Option<&'s str>,
}

impl<'s> Printer<'s> {
    fn new(source: Option<&'s str>) -> Self {
        Self {
            out: String::new(),
            indent: 0,
            source,
        }
    }

    fn w(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    fn original(&self, span: Span) -> Option<&'s str> {
        if span.is_synthetic() {
            return None;
        }
        self.source?.get(span.start as usize..span.end as usize)
    }

    fn unsupported_throw(what: &str) -> String {
        format!(
            "throw new Error({})",
            string_literal(&format!("Unsupported syntax: {}", what))
        )
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Statements
    // ───────────────────────────────────────────────────────────────────────────

    fn stmts(&mut self, stmts: &[Stmt]) {
        self.w("{");
        self.indent += 1;
        for stmt in stmts {
            self.newline();
            self.stmt_inline(stmt);
        }
        self.indent -= 1;
        if !stmts.is_empty() {
            self.newline();
        }
        self.w("}");
    }

    /// Top-level statement followed by a newline.
    fn stmt(&mut self, stmt: &Stmt) {
        self.stmt_inline(stmt);
        self.w("\n");
    }

    fn stmt_inline(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr { expr, .. } => {
                let mut inner = Printer::new(self.source);
                inner.indent = self.indent;
                inner.expr(expr, PREC_SEQ);
                let text = inner.out;
                let needs_parens = text.starts_with('{')
                    || text.starts_with("function")
                    || text.starts_with("async function")
                    || text.starts_with("class")
                    || text.starts_with("let[");
                if needs_parens {
                    self.w("(");
                    self.w(&text);
                    self.w(")");
                } else {
                    self.w(&text);
                }
                self.w(";");
            }
            Stmt::Var(decl) => {
                self.var_decl(decl);
                self.w(";");
            }
            Stmt::Function(function) => self.function(function, true),
            Stmt::Class { id, .. } => {
                self.w("class ");
                self.w(&id.name);
                self.w(" {}");
            }
            Stmt::Return { argument, .. } => {
                self.w("return");
                if let Some(argument) = argument {
                    self.w(" ");
                    self.expr(argument, PREC_SEQ);
                }
                self.w(";");
            }
            Stmt::If(stmt) => {
                self.w("if (");
                self.expr(&stmt.test, PREC_SEQ);
                self.w(") ");
                self.nested(&stmt.consequent);
                if let Some(alternate) = &stmt.alternate {
                    self.w(" else ");
                    self.nested(alternate);
                }
            }
            Stmt::Block(block) => self.stmts(&block.body),
            Stmt::For(stmt) => {
                self.w("for (");
                match &stmt.init {
                    Some(ForInit::Var(decl)) => self.var_decl(decl),
                    Some(ForInit::Expr(expr)) => self.expr(expr, PREC_SEQ),
                    None => {}
                }
                self.w("; ");
                if let Some(test) = &stmt.test {
                    self.expr(test, PREC_SEQ);
                }
                self.w("; ");
                if let Some(update) = &stmt.update {
                    self.expr(update, PREC_SEQ);
                }
                self.w(") ");
                self.nested(&stmt.body);
            }
            Stmt::ForEach(stmt) => {
                self.w("for (");
                if let Some(kind) = stmt.decl_kind {
                    self.w(kind.as_str());
                    self.w(" ");
                }
                self.pattern(&stmt.left);
                self.w(match stmt.each {
                    ForEachKind::In => " in ",
                    ForEachKind::Of => " of ",
                });
                self.expr(&stmt.right, PREC_ASSIGN);
                self.w(") ");
                self.nested(&stmt.body);
            }
            Stmt::While(stmt) => {
                if stmt.do_while {
                    self.w("do ");
                    self.nested(&stmt.body);
                    self.w(" while (");
                    self.expr(&stmt.test, PREC_SEQ);
                    self.w(");");
                } else {
                    self.w("while (");
                    self.expr(&stmt.test, PREC_SEQ);
                    self.w(") ");
                    self.nested(&stmt.body);
                }
            }
            Stmt::Switch(stmt) => {
                self.w("switch (");
                self.expr(&stmt.discriminant, PREC_SEQ);
                self.w(") {");
                self.indent += 1;
                for case in &stmt.cases {
                    self.newline();
                    match &case.test {
                        Some(test) => {
                            self.w("case ");
                            self.expr(test, PREC_SEQ);
                            self.w(":");
                        }
                        None => self.w("default:"),
                    }
                    self.indent += 1;
                    for stmt in &case.consequent {
                        self.newline();
                        self.stmt_inline(stmt);
                    }
                    self.indent -= 1;
                }
                self.indent -= 1;
                self.newline();
                self.w("}");
            }
            Stmt::Break { .. } => self.w("break;"),
            Stmt::Continue { .. } => self.w("continue;"),
            Stmt::Throw { argument, .. } => {
                self.w("throw ");
                self.expr(argument, PREC_SEQ);
                self.w(";");
            }
            Stmt::Try(stmt) => {
                self.w("try ");
                self.stmts(&stmt.block.body);
                if let Some(handler) = &stmt.handler {
                    self.w(" catch ");
                    if let Some(param) = &handler.param {
                        self.w("(");
                        self.pattern(param);
                        self.w(") ");
                    }
                    self.stmts(&handler.body.body);
                }
                if let Some(finalizer) = &stmt.finalizer {
                    self.w(" finally ");
                    self.stmts(&finalizer.body);
                }
            }
            Stmt::Import(decl) => self.import(decl),
            Stmt::Export(stmt) => self.export(stmt),
            Stmt::Empty { .. } => self.w(";"),
            Stmt::Unsupported { span, what } => match self.original(*span) {
                Some(text) => self.w(text),
                None => {
                    let text = Self::unsupported_throw(what);
                    self.w(&text);
                    self.w(";");
                }
            },
        }
    }

    /// Body of a control-flow statement.
    fn nested(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(block) => self.stmts(&block.body),
            other => self.stmts(std::slice::from_ref(other)),
        }
    }

    fn var_decl(&mut self, decl: &VarDecl) {
        self.w(decl.kind.as_str());
        self.w(" ");
        for (idx, declarator) in decl.declarations.iter().enumerate() {
            if idx > 0 {
                self.w(", ");
            }
            self.pattern(&declarator.id);
            if let Some(init) = &declarator.init {
                self.w(" = ");
                self.expr(init, PREC_ASSIGN);
            }
        }
    }

    fn import(&mut self, decl: &ImportDecl) {
        self.w("import ");
        let mut default = None;
        let mut namespace = None;
        let mut named = Vec::new();
        for spec in &decl.specifiers {
            match spec {
                ImportSpec::Default { local } => default = Some(local.name.clone()),
                ImportSpec::Namespace { local } => namespace = Some(local.name.clone()),
                ImportSpec::Named { imported, local } => {
                    if *imported == local.name {
                        named.push(local.name.clone());
                    } else {
                        named.push(format!("{} as {}", module_name(imported), local.name));
                    }
                }
            }
        }
        let mut parts = Vec::new();
        if let Some(default) = default {
            parts.push(default);
        }
        if let Some(namespace) = namespace {
            parts.push(format!("* as {}", namespace));
        }
        if !named.is_empty() {
            parts.push(format!("{{ {} }}", named.join(", ")));
        }
        if !parts.is_empty() {
            self.w(&parts.join(", "));
            self.w(" from ");
        }
        self.w(&string_literal(&decl.source));
        self.w(";");
    }

    fn export(&mut self, stmt: &ExportStmt) {
        match &stmt.decl {
            ExportDecl::Decl(inner) => {
                self.w("export ");
                self.stmt_inline(inner);
            }
            ExportDecl::Default(expr) => {
                self.w("export default ");
                let needs_parens = matches!(expr, Expr::Seq { .. });
                if needs_parens {
                    self.w("(");
                }
                self.expr(expr, PREC_ASSIGN);
                if needs_parens {
                    self.w(")");
                }
                self.w(";");
            }
            ExportDecl::DefaultFunction(function) => {
                self.w("export default ");
                self.function(function, true);
            }
            ExportDecl::List { specifiers, source } => {
                let list: Vec<String> = specifiers
                    .iter()
                    .map(|spec| {
                        if spec.local == spec.exported {
                            module_name(&spec.local)
                        } else {
                            format!(
                                "{} as {}",
                                module_name(&spec.local),
                                module_name(&spec.exported)
                            )
                        }
                    })
                    .collect();
                self.w("export { ");
                self.w(&list.join(", "));
                self.w(" }");
                if let Some(source) = source {
                    self.w(" from ");
                    self.w(&string_literal(source));
                }
                self.w(";");
            }
            ExportDecl::All { source, exported } => {
                self.w("export * ");
                if let Some(exported) = exported {
                    self.w("as ");
                    self.w(&module_name(exported));
                    self.w(" ");
                }
                self.w("from ");
                self.w(&string_literal(source));
                self.w(";");
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Functions & patterns
    // ───────────────────────────────────────────────────────────────────────────

    fn function(&mut self, function: &Function, with_name: bool) {
        if function.is_async {
            self.w("async ");
        }
        self.w("function");
        if let (true, Some(id)) = (with_name, &function.id) {
            self.w(" ");
            self.w(&id.name);
        }
        self.params(&function.params);
        self.w(" ");
        self.stmts(&function.body);
    }

    fn params(&mut self, params: &[Pattern]) {
        self.w("(");
        for (idx, param) in params.iter().enumerate() {
            if idx > 0 {
                self.w(", ");
            }
            self.pattern(param);
        }
        self.w(")");
    }

    fn pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Ident(id) => self.w(&id.name),
            Pattern::Object { props, rest, .. } => {
                self.w("{ ");
                let mut first = true;
                for prop in props {
                    if !first {
                        self.w(", ");
                    }
                    first = false;
                    self.prop_key(&prop.key);
                    self.w(": ");
                    self.pattern(&prop.value);
                }
                if let Some(rest) = rest {
                    if !first {
                        self.w(", ");
                    }
                    self.w("...");
                    self.pattern(rest);
                }
                self.w(" }");
            }
            Pattern::Array { elements, rest, .. } => {
                self.w("[");
                for (idx, element) in elements.iter().enumerate() {
                    if idx > 0 {
                        self.w(", ");
                    }
                    if let Some(element) = element {
                        self.pattern(element);
                    }
                }
                if elements.last().map_or(false, Option::is_none) && rest.is_none() {
                    self.w(",");
                }
                if let Some(rest) = rest {
                    if !elements.is_empty() {
                        self.w(", ");
                    }
                    self.w("...");
                    self.pattern(rest);
                }
                self.w("]");
            }
            Pattern::Assign { left, right, .. } => {
                self.pattern(left);
                self.w(" = ");
                self.expr(right, PREC_ASSIGN);
            }
            Pattern::Expr(expr) => self.expr(expr, PREC_CALL),
        }
    }

    fn prop_key(&mut self, key: &PropKey) {
        match key {
            PropKey::Ident(name) => self.w(name),
            PropKey::Str(value) => {
                if is_identifier_name(value) {
                    self.w(value);
                } else {
                    self.w(&string_literal(value));
                }
            }
            PropKey::Num(n) => self.w(&number_to_string(*n)),
            PropKey::Computed(expr) => {
                self.w("[");
                self.expr(expr, PREC_ASSIGN);
                self.w("]");
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────────────────

    fn expr(&mut self, expr: &Expr, min: u8) {
        let wrap = prec(expr) < min;
        if wrap {
            self.w("(");
        }
        self.expr_inner(expr);
        if wrap {
            self.w(")");
        }
    }

    fn expr_inner(&mut self, expr: &Expr) {
        match expr {
            Expr::Lit { value, .. } => match value {
                Lit::Null => self.w("null"),
                Lit::Bool(b) => self.w(if *b { "true" } else { "false" }),
                Lit::Num(n) => self.w(&number_to_string(*n)),
                Lit::Str(s) => self.w(&string_literal(s)),
            },
            Expr::Ident(id) => self.w(&id.name),
            Expr::This { .. } => self.w("this"),
            Expr::Template(tpl) => self.template(tpl),
            Expr::TaggedTemplate(tagged) => {
                self.expr(&tagged.tag, PREC_CALL);
                self.template(&tagged.quasi);
            }
            Expr::Array { elements, .. } => {
                self.w("[");
                for (idx, element) in elements.iter().enumerate() {
                    if idx > 0 {
                        self.w(", ");
                    }
                    if let Some(element) = element {
                        if element.spread {
                            self.w("...");
                        }
                        self.expr(&element.expr, PREC_ASSIGN);
                    }
                }
                if elements.last().map_or(false, Option::is_none) {
                    self.w(",");
                }
                self.w("]");
            }
            Expr::Object { props, .. } => self.object(props),
            Expr::Function(function) => self.function(function, true),
            Expr::Arrow(arrow) => {
                if arrow.is_async {
                    self.w("async ");
                }
                self.params(&arrow.params);
                self.w(" => ");
                match &arrow.body {
                    ArrowBody::Expr(body) => {
                        if matches!(**body, Expr::Object { .. }) {
                            self.w("(");
                            self.expr(body, PREC_ASSIGN);
                            self.w(")");
                        } else {
                            self.expr(body, PREC_ASSIGN);
                        }
                    }
                    ArrowBody::Block(body) => self.stmts(body),
                }
            }
            Expr::Unary {
                operator, argument, ..
            } => {
                let op = operator.as_str();
                self.w(op);
                let is_word = op.chars().all(|c| c.is_ascii_alphabetic());
                let doubled = matches!(
                    &**argument,
                    Expr::Unary { operator: inner, .. }
                        if inner.as_str() == op && (op == "-" || op == "+")
                ) || matches!(
                    &**argument,
                    Expr::Update { prefix: true, operator: inner, .. }
                        if inner.as_str().starts_with(op)
                ) || matches!(
                    &**argument,
                    Expr::Lit { value: Lit::Num(n), .. } if *n < 0.0 && op == "-"
                );
                if is_word || doubled {
                    self.w(" ");
                }
                self.expr(argument, PREC_UNARY);
            }
            Expr::Update {
                operator,
                prefix,
                target,
                ..
            } => {
                if *prefix {
                    self.w(operator.as_str());
                    self.expr(target, PREC_UNARY);
                } else {
                    self.expr(target, PREC_CALL);
                    self.w(operator.as_str());
                }
            }
            Expr::Binary {
                operator,
                left,
                right,
                ..
            } => {
                let p = binary_prec(*operator);
                if *operator == BinaryOperator::Exponential {
                    self.expr(left, PREC_UPDATE);
                    self.w(" ** ");
                    self.expr(right, p);
                } else {
                    self.expr(left, p);
                    self.w(" ");
                    self.w(operator.as_str());
                    self.w(" ");
                    self.expr(right, p + 1);
                }
            }
            Expr::Logical {
                operator,
                left,
                right,
                ..
            } => {
                let p = logical_prec(*operator);
                let mixes = |child: &Expr| {
                    matches!(child, Expr::Logical { operator: inner, .. }
                        if (*inner == LogicalOperator::Coalesce) != (*operator == LogicalOperator::Coalesce))
                };
                self.expr(left, if mixes(left) { PREC_PRIMARY } else { p });
                self.w(" ");
                self.w(operator.as_str());
                self.w(" ");
                self.expr(right, if mixes(right) { PREC_PRIMARY } else { p + 1 });
            }
            Expr::Assign {
                operator,
                target,
                value,
                ..
            } => {
                let object_target = matches!(**target, Pattern::Object { .. });
                if object_target {
                    self.w("(");
                }
                self.pattern(target);
                self.w(" ");
                self.w(operator.as_str());
                self.w(" ");
                self.expr(value, PREC_ASSIGN);
                if object_target {
                    self.w(")");
                }
            }
            Expr::Cond {
                test,
                consequent,
                alternate,
                ..
            } => {
                self.expr(test, PREC_COALESCE);
                self.w(" ? ");
                self.expr(consequent, PREC_ASSIGN);
                self.w(" : ");
                self.expr(alternate, PREC_ASSIGN);
            }
            Expr::Member(member) => {
                self.callee(&member.object);
                match &member.property {
                    MemberProp::Static(name) => {
                        self.w(if member.optional { "?." } else { "." });
                        self.w(name);
                    }
                    MemberProp::Computed(property) => {
                        self.w(if member.optional { "?.[" } else { "[" });
                        self.expr(property, PREC_SEQ);
                        self.w("]");
                    }
                }
            }
            Expr::Call(call) => {
                self.callee(&call.callee);
                self.w(if call.optional { "?.(" } else { "(" });
                self.arguments(&call.arguments);
                self.w(")");
            }
            Expr::New(call) => {
                self.w("new ");
                let simple = matches!(&*call.callee, Expr::Ident(_))
                    || matches!(&*call.callee, Expr::Member(m) if !contains_call(&m.object));
                if simple {
                    self.expr(&call.callee, PREC_CALL);
                } else {
                    self.w("(");
                    self.expr(&call.callee, PREC_SEQ);
                    self.w(")");
                }
                self.w("(");
                self.arguments(&call.arguments);
                self.w(")");
            }
            Expr::Chain { expr, .. } => self.expr_inner(expr),
            Expr::Seq { expressions, .. } => {
                for (idx, expr) in expressions.iter().enumerate() {
                    if idx > 0 {
                        self.w(", ");
                    }
                    self.expr(expr, PREC_ASSIGN);
                }
            }
            Expr::Await { argument, .. } => {
                self.w("await ");
                self.expr(argument, PREC_UNARY);
            }
            Expr::Jsx(element) => self.jsx(element),
            Expr::Regex { pattern, flags, .. } => {
                self.w("/");
                self.w(pattern);
                self.w("/");
                self.w(flags);
            }
            Expr::Unsupported { span, what } => match self.original(*span) {
                Some(text) => self.w(text),
                None => {
                    let text = format!("(() => {{ {}; }})()", Self::unsupported_throw(what));
                    self.w(&text);
                }
            },
        }
    }

    /// Object of a member access or callee of a call.
    fn callee(&mut self, expr: &Expr) {
        let wrap = match expr {
            Expr::Chain { .. } | Expr::New(_) => true,
            Expr::Lit {
                value: Lit::Num(_), ..
            } => true,
            Expr::Function(_) | Expr::Object { .. } => true,
            other => prec(other) < PREC_CALL,
        };
        if wrap {
            self.w("(");
            self.expr(expr, PREC_SEQ);
            self.w(")");
        } else {
            self.expr_inner(expr);
        }
    }

    fn arguments(&mut self, arguments: &[ExprOrSpread]) {
        for (idx, arg) in arguments.iter().enumerate() {
            if idx > 0 {
                self.w(", ");
            }
            if arg.spread {
                self.w("...");
            }
            self.expr(&arg.expr, PREC_ASSIGN);
        }
    }

    fn object(&mut self, props: &[Prop]) {
        if props.is_empty() {
            self.w("{}");
            return;
        }
        self.w("{ ");
        for (idx, prop) in props.iter().enumerate() {
            if idx > 0 {
                self.w(", ");
            }
            match prop {
                Prop::KeyValue { key, value } => {
                    self.prop_key(key);
                    self.w(": ");
                    self.expr(value, PREC_ASSIGN);
                }
                Prop::Accessor {
                    kind,
                    key,
                    function,
                } => {
                    self.w(match kind {
                        AccessorKind::Get => "get ",
                        AccessorKind::Set => "set ",
                    });
                    self.prop_key(key);
                    self.params(&function.params);
                    self.w(" ");
                    self.stmts(&function.body);
                }
                Prop::Spread(expr) => {
                    self.w("...");
                    self.expr(expr, PREC_ASSIGN);
                }
            }
        }
        self.w(" }");
    }

    fn template(&mut self, tpl: &Template) {
        self.w("`");
        for (idx, quasi) in tpl.quasis.iter().enumerate() {
            self.w(&quasi.raw);
            if let Some(expr) = tpl.expressions.get(idx) {
                self.w("${");
                self.expr(expr, PREC_SEQ);
                self.w("}");
            }
        }
        self.w("`");
    }

    fn jsx(&mut self, element: &JsxElement) {
        let name = element.name.as_deref().unwrap_or("");
        self.w("<");
        self.w(name);
        for attr in &element.attributes {
            self.w(" ");
            match attr {
                JsxAttr::Attr { name, value } => {
                    self.w(name);
                    match value {
                        None => {}
                        Some(JsxAttrValue::Str(s)) => {
                            self.w("=");
                            if s.contains('"') {
                                self.w("{");
                                self.w(&string_literal(s));
                                self.w("}");
                            } else {
                                self.w("\"");
                                self.w(s);
                                self.w("\"");
                            }
                        }
                        Some(JsxAttrValue::Expr(expr)) => {
                            self.w("={");
                            self.expr(expr, PREC_ASSIGN);
                            self.w("}");
                        }
                        Some(JsxAttrValue::Element(inner)) => {
                            self.w("=");
                            self.jsx(inner);
                        }
                    }
                }
                JsxAttr::Spread(expr) => {
                    self.w("{...");
                    self.expr(expr, PREC_ASSIGN);
                    self.w("}");
                }
            }
        }
        if element.children.is_empty() && element.name.is_some() {
            self.w(" />");
            return;
        }
        self.w(">");
        for child in &element.children {
            match child {
                JsxChild::Text(text) => {
                    let plain = !text.contains(['{', '}', '<', '>'])
                        && text.trim() == text;
                    if plain {
                        self.w(text);
                    } else {
                        self.w("{");
                        self.w(&string_literal(text));
                        self.w("}");
                    }
                }
                JsxChild::Expr(expr) => {
                    self.w("{");
                    self.expr(expr, PREC_ASSIGN);
                    self.w("}");
                }
                JsxChild::Spread(expr) => {
                    self.w("{...");
                    self.expr(expr, PREC_ASSIGN);
                    self.w("}");
                }
                JsxChild::Element(inner) => self.jsx(inner),
            }
        }
        self.w("</");
        self.w(name);
        self.w(">");
    }
}

fn module_name(name: &str) -> String {
    if is_identifier_name(name) {
        name.to_string()
    } else {
        string_literal(name)
    }
}

fn contains_call(expr: &Expr) -> bool {
    match expr {
        Expr::Call(_) => true,
        Expr::Member(m) => contains_call(&m.object),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_module;
    use pretty_assertions::assert_eq;

    fn roundtrip(src: &str) -> String {
        let module = parse_module(src, "test.tsx").unwrap();
        print_program(&module.program, Some(src))
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(-12.25), "-12.25");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(123456789012.0), "123456789012");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(f64::NAN), "NaN");
    }

    #[test]
    fn test_precedence_parens() {
        assert_eq!(roundtrip("x = (a + b) * c;"), "x = (a + b) * c;\n");
        assert_eq!(roundtrip("x = a + b * c;"), "x = a + b * c;\n");
        assert_eq!(roundtrip("x = a - (b - c);"), "x = a - (b - c);\n");
        assert_eq!(roundtrip("x = (a ?? b) || c;"), "x = (a ?? b) || c;\n");
        assert_eq!(roundtrip("(function () {})();"), "(function() {})();\n");
        assert_eq!(roundtrip("x = (a, b);"), "x = (a, b);\n");
    }

    #[test]
    fn test_object_accessors_print_as_accessors() {
        let src = "const o = { [k]: 1, get x() { return this.v; }, set x(v) { this.v = v; } };";
        let printed = print_program(&parse_module(src, "test.js").unwrap().program, None);
        assert!(printed.contains("[k]: 1, get x() {\n  return this.v;\n}, set x(v) {"));
        assert!(parse_module(&printed, "printed.js").is_ok());
    }

    #[test]
    fn test_statements() {
        let printed = roundtrip("function f(a, { b = 1 }) { if (a) return b; for (const k of a) g(k); }");
        assert_eq!(
            printed,
            "function f(a, { b: b = 1 }) {\n  if (a) {\n    return b;\n  }\n  for (const k of a) {\n    g(k);\n  }\n}\n"
        );
    }

    #[test]
    fn test_arrow_object_body_and_template() {
        assert_eq!(
            roundtrip("const f = () => ({ a: 1 }); const s = `x${y}z`;"),
            "const f = () => ({ a: 1 });\nconst s = `x${y}z`;\n"
        );
    }

    #[test]
    fn test_jsx() {
        assert_eq!(
            roundtrip("const el = <link {...props} rel=\"stylesheet\" href={u} />;"),
            "const el = <link {...props} rel=\"stylesheet\" href={u} />;\n"
        );
    }

    #[test]
    fn test_unsupported_keeps_source() {
        assert_eq!(
            roundtrip("const re = /a+/g;"),
            "const re = /a+/g;\n"
        );
        let module = parse_module("const re = /a+/g;", "a.js").unwrap();
        let printed = print_program(&module.program, None);
        assert!(printed.contains("Unsupported syntax: regular expression"));
    }

    #[test]
    fn test_is_identifier_name() {
        assert!(is_identifier_name("button"));
        assert!(is_identifier_name("$a_1"));
        assert!(!is_identifier_name("my-class"));
        assert!(!is_identifier_name("1a"));
    }
}
