//! Expression Classifier
//!
//! Sorts each interpolation into one of three kinds:
//! - **Constant**: folds at compile time (literals, arithmetic, string
//!   concatenation, templates, `const` bindings with foldable initializers).
//! - **Function**: a function or arrow literal; never evaluated.
//! - **Lazy**: everything else; hoisted and executed in the sandbox.

use std::collections::HashMap;

use crate::ast::*;
use crate::collect::Occurrence;
use crate::error::StyleError;
use crate::lower::ParsedModule;
use crate::printer::number_to_string;
use crate::scope::{BindingKind, ScopeAnalysis};
use crate::visit::{self, Visit};

const MAX_FOLD_DEPTH: usize = 64;

/// A folded compile-time value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<ConstValue>),
}

impl ConstValue {
    /// JavaScript `ToString`.
    pub fn to_js_string(&self) -> String {
        match self {
            ConstValue::Undefined => "undefined".to_string(),
            ConstValue::Null => "null".to_string(),
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Num(n) => number_to_string(*n),
            ConstValue::Str(s) => s.clone(),
            ConstValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    ConstValue::Undefined | ConstValue::Null => String::new(),
                    other => other.to_js_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// JavaScript `ToNumber`.
    pub fn to_number(&self) -> f64 {
        match self {
            ConstValue::Undefined => f64::NAN,
            ConstValue::Null => 0.0,
            ConstValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ConstValue::Num(n) => *n,
            ConstValue::Str(s) => string_to_number(s),
            ConstValue::Array(_) => string_to_number(&self.to_js_string()),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            ConstValue::Undefined | ConstValue::Null => false,
            ConstValue::Bool(b) => *b,
            ConstValue::Num(n) => *n != 0.0 && !n.is_nan(),
            ConstValue::Str(s) => !s.is_empty(),
            ConstValue::Array(_) => true,
        }
    }

    fn type_of(&self) -> &'static str {
        match self {
            ConstValue::Undefined => "undefined",
            ConstValue::Null | ConstValue::Array(_) => "object",
            ConstValue::Bool(_) => "boolean",
            ConstValue::Num(_) => "number",
            ConstValue::Str(_) => "string",
        }
    }
}

/// JavaScript `StringToNumber`.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let radix = |prefix: &[&str], radix: u32| {
        prefix
            .iter()
            .find_map(|p| trimmed.strip_prefix(p))
            .map(|digits| {
                u64::from_str_radix(digits, radix)
                    .map(|v| v as f64)
                    .unwrap_or(f64::NAN)
            })
    };
    if let Some(v) = radix(&["0x", "0X"], 16)
        .or_else(|| radix(&["0o", "0O"], 8))
        .or_else(|| radix(&["0b", "0B"], 2))
    {
        return v;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => {
            f64::NAN
        }
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc().rem_euclid(4_294_967_296.0);
    m as u32
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Constant(ConstValue),
    Lazy,
    Function,
}

/// An interpolation paired with its classification. `expr` is the original,
/// unhoisted node; its span is the identity used for value lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub expr: Expr,
    pub kind: Classification,
}

pub struct Classifier<'a> {
    module: &'a ParsedModule,
    analysis: &'a ScopeAnalysis,
    /// Initializers of `const` declarators, by declarator span.
    consts: HashMap<Span, Expr>,
}

impl<'a> Classifier<'a> {
    pub fn new(module: &'a ParsedModule, analysis: &'a ScopeAnalysis) -> Self {
        let mut scan = ConstInits::default();
        scan.visit_program(&module.program);
        Self {
            module,
            analysis,
            consts: scan.inits,
        }
    }

    /// Classify every interpolation of `occurrence`. Interpolations that are
    /// not expressions fail the occurrence; all such failures are reported.
    pub fn classify(&self, occurrence: &Occurrence) -> Result<Vec<Classified>, StyleError> {
        let mut out = Vec::with_capacity(occurrence.expressions.len());
        let mut errors = Vec::new();

        for expr in &occurrence.expressions {
            if let Expr::Unsupported { span, what } = expr {
                errors.push(StyleError::UnsupportedExpression {
                    file: self.module.filename.clone(),
                    location: self.module.location(*span),
                    what: what.to_string(),
                });
                continue;
            }
            let kind = match self.fold(expr) {
                Some(value) => Classification::Constant(value),
                None if expr.is_function() => Classification::Function,
                None => Classification::Lazy,
            };
            out.push(Classified {
                expr: expr.clone(),
                kind,
            });
        }

        match StyleError::from_many(errors) {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    pub fn fold(&self, expr: &Expr) -> Option<ConstValue> {
        self.fold_at(expr, 0)
    }

    fn fold_at(&self, expr: &Expr, depth: usize) -> Option<ConstValue> {
        if depth > MAX_FOLD_DEPTH {
            return None;
        }
        let fold = |e: &Expr| self.fold_at(e, depth + 1);

        match expr {
            Expr::Lit { value, .. } => Some(match value {
                Lit::Null => ConstValue::Null,
                Lit::Bool(b) => ConstValue::Bool(*b),
                Lit::Num(n) => ConstValue::Num(*n),
                Lit::Str(s) => ConstValue::Str(s.clone()),
            }),
            Expr::Ident(id) => self.fold_ident(id, depth),
            Expr::Template(tpl) => {
                let mut out = String::new();
                for (idx, quasi) in tpl.quasis.iter().enumerate() {
                    out.push_str(quasi.cooked.as_deref()?);
                    if let Some(expr) = tpl.expressions.get(idx) {
                        out.push_str(&fold(expr)?.to_js_string());
                    }
                }
                Some(ConstValue::Str(out))
            }
            Expr::Array { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        Some(ExprOrSpread {
                            spread: false,
                            expr,
                        }) => items.push(fold(expr)?),
                        Some(_) => return None,
                        None => items.push(ConstValue::Undefined),
                    }
                }
                Some(ConstValue::Array(items))
            }
            Expr::Unary {
                operator, argument, ..
            } => {
                let value = fold(argument)?;
                Some(match operator {
                    UnaryOperator::UnaryNegation => ConstValue::Num(-value.to_number()),
                    UnaryOperator::UnaryPlus => ConstValue::Num(value.to_number()),
                    UnaryOperator::LogicalNot => ConstValue::Bool(!value.truthy()),
                    UnaryOperator::BitwiseNot => {
                        ConstValue::Num(!to_int32(value.to_number()) as f64)
                    }
                    UnaryOperator::Typeof => ConstValue::Str(value.type_of().to_string()),
                    UnaryOperator::Void => ConstValue::Undefined,
                    UnaryOperator::Delete => return None,
                })
            }
            Expr::Binary {
                operator,
                left,
                right,
                ..
            } => fold_binary(*operator, fold(left)?, fold(right)?),
            Expr::Logical {
                operator,
                left,
                right,
                ..
            } => {
                let left = fold(left)?;
                let take_left = match operator {
                    LogicalOperator::And => !left.truthy(),
                    LogicalOperator::Or => left.truthy(),
                    LogicalOperator::Coalesce => {
                        !matches!(left, ConstValue::Null | ConstValue::Undefined)
                    }
                };
                if take_left {
                    Some(left)
                } else {
                    fold(right)
                }
            }
            Expr::Cond {
                test,
                consequent,
                alternate,
                ..
            } => {
                if fold(test)?.truthy() {
                    fold(consequent)
                } else {
                    fold(alternate)
                }
            }
            Expr::Seq { expressions, .. } => {
                let mut last = None;
                for expr in expressions {
                    last = Some(fold(expr)?);
                }
                last
            }
            _ => None,
        }
    }

    fn fold_ident(&self, id: &Ident, depth: usize) -> Option<ConstValue> {
        let reference = self.analysis.reference_at(id.span)?;
        let Some(frame) = reference.resolved else {
            return match id.name.as_str() {
                "undefined" => Some(ConstValue::Undefined),
                "NaN" => Some(ConstValue::Num(f64::NAN)),
                "Infinity" => Some(ConstValue::Num(f64::INFINITY)),
                _ => None,
            };
        };

        let binding = self.analysis.frame(frame).bindings.get(&id.name)?;
        if binding.kind != BindingKind::Const || !binding.simple_init {
            return None;
        }
        let declarator = binding.declarator?;
        // Temporal dead zone: the declaration must complete before the use.
        if declarator.end > id.span.start {
            return None;
        }
        let init = self.consts.get(&declarator)?;
        self.fold_at(init, depth + 1)
    }
}

fn fold_binary(op: BinaryOperator, left: ConstValue, right: ConstValue) -> Option<ConstValue> {
    use BinaryOperator as B;
    let num = |f: fn(f64, f64) -> f64| Some(ConstValue::Num(f(left.to_number(), right.to_number())));
    let int = |f: fn(i32, u32) -> f64| {
        Some(ConstValue::Num(f(
            to_int32(left.to_number()),
            to_uint32(right.to_number()),
        )))
    };

    match op {
        B::Addition => {
            let stringy = |v: &ConstValue| matches!(v, ConstValue::Str(_) | ConstValue::Array(_));
            if stringy(&left) || stringy(&right) {
                Some(ConstValue::Str(format!(
                    "{}{}",
                    left.to_js_string(),
                    right.to_js_string()
                )))
            } else {
                num(|a, b| a + b)
            }
        }
        B::Subtraction => num(|a, b| a - b),
        B::Multiplication => num(|a, b| a * b),
        B::Division => num(|a, b| a / b),
        B::Remainder => num(|a, b| a % b),
        B::Exponential => num(f64::powf),
        B::BitwiseOR => int(|a, b| (a | b as i32) as f64),
        B::BitwiseAnd => int(|a, b| (a & b as i32) as f64),
        B::BitwiseXOR => int(|a, b| (a ^ b as i32) as f64),
        B::ShiftLeft => int(|a, b| a.wrapping_shl(b & 31) as f64),
        B::ShiftRight => int(|a, b| a.wrapping_shr(b & 31) as f64),
        B::ShiftRightZeroFill => int(|a, b| (a as u32).wrapping_shr(b & 31) as f64),
        B::StrictEquality => strict_equals(&left, &right).map(ConstValue::Bool),
        B::StrictInequality => strict_equals(&left, &right).map(|eq| ConstValue::Bool(!eq)),
        B::Equality => loose_equals(&left, &right).map(ConstValue::Bool),
        B::Inequality => loose_equals(&left, &right).map(|eq| ConstValue::Bool(!eq)),
        B::LessThan => compare(&left, &right, |o| o == std::cmp::Ordering::Less),
        B::GreaterThan => compare(&left, &right, |o| o == std::cmp::Ordering::Greater),
        B::LessEqualThan => compare(&left, &right, |o| o != std::cmp::Ordering::Greater),
        B::GreaterEqualThan => compare(&left, &right, |o| o != std::cmp::Ordering::Less),
        B::In | B::Instanceof => None,
    }
}

fn strict_equals(left: &ConstValue, right: &ConstValue) -> Option<bool> {
    match (left, right) {
        (ConstValue::Array(_), _) | (_, ConstValue::Array(_)) => None,
        (ConstValue::Num(a), ConstValue::Num(b)) => Some(a == b),
        (a, b) => Some(a == b),
    }
}

fn loose_equals(left: &ConstValue, right: &ConstValue) -> Option<bool> {
    use ConstValue as C;
    match (left, right) {
        (C::Array(_), _) | (_, C::Array(_)) => None,
        (C::Null | C::Undefined, C::Null | C::Undefined) => Some(true),
        (C::Null | C::Undefined, _) | (_, C::Null | C::Undefined) => Some(false),
        (C::Str(a), C::Str(b)) => Some(a == b),
        (a, b) => Some(a.to_number() == b.to_number()),
    }
}

fn compare(
    left: &ConstValue,
    right: &ConstValue,
    accept: fn(std::cmp::Ordering) -> bool,
) -> Option<ConstValue> {
    if let (ConstValue::Str(a), ConstValue::Str(b)) = (left, right) {
        let ordering = a.encode_utf16().cmp(b.encode_utf16());
        return Some(ConstValue::Bool(accept(ordering)));
    }
    let ordering = left.to_number().partial_cmp(&right.to_number());
    Some(ConstValue::Bool(ordering.map_or(false, accept)))
}

#[derive(Default)]
struct ConstInits {
    inits: HashMap<Span, Expr>,
}

impl Visit for ConstInits {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let Stmt::Var(decl) = stmt {
            if decl.kind == VarKind::Const {
                for declarator in &decl.declarations {
                    if let (Pattern::Ident(_), Some(init)) = (&declarator.id, &declarator.init) {
                        self.inits.insert(declarator.span, init.clone());
                    }
                }
            }
        }
        visit::walk_stmt(self, stmt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::collect_occurrences;
    use crate::lower::parse_module;
    use pretty_assertions::assert_eq;

    fn classify_src(src: &str) -> Result<Vec<Classification>, StyleError> {
        let module = parse_module(src, "a.tsx").unwrap();
        let analysis = ScopeAnalysis::new(&module.program);
        let classifier = Classifier::new(&module, &analysis);
        let occurrences = collect_occurrences(&module, "css");
        classifier
            .classify(&occurrences[0])
            .map(|all| all.into_iter().map(|c| c.kind).collect())
    }

    #[test]
    fn test_folds_literals_and_arithmetic() {
        let kinds = classify_src("css`${1 + 2} ${'a' + 1} ${`x${2 * 3}`} ${-0.5} ${[1, 2]}`").unwrap();
        assert_eq!(
            kinds,
            vec![
                Classification::Constant(ConstValue::Num(3.0)),
                Classification::Constant(ConstValue::Str("a1".into())),
                Classification::Constant(ConstValue::Str("x6".into())),
                Classification::Constant(ConstValue::Num(-0.5)),
                Classification::Constant(ConstValue::Array(vec![
                    ConstValue::Num(1.0),
                    ConstValue::Num(2.0)
                ])),
            ]
        );
    }

    #[test]
    fn test_folds_const_bindings() {
        let kinds = classify_src(
            "const gap = 4;\nconst unit = 'px';\nexport const a = css`${gap * 2 + unit}`;",
        )
        .unwrap();
        assert_eq!(kinds, vec![Classification::Constant(ConstValue::Str("8px".into()))]);
    }

    #[test]
    fn test_let_and_calls_are_lazy() {
        let kinds = classify_src("let gap = 4;\nconst a = css`${gap} ${theme.color} ${f()}`;").unwrap();
        assert_eq!(
            kinds,
            vec![Classification::Lazy, Classification::Lazy, Classification::Lazy]
        );
    }

    #[test]
    fn test_functions_are_never_folded() {
        let kinds = classify_src("css`${() => 1} ${function () { return 2; }}`").unwrap();
        assert_eq!(
            kinds,
            vec![Classification::Function, Classification::Function]
        );
    }

    #[test]
    fn test_unsupported_interpolation_fails_occurrence() {
        let err = classify_src("css`${/re/}`").unwrap_err();
        assert!(matches!(err, StyleError::UnsupportedExpression { .. }));
        assert_eq!(err.location().unwrap().column, 7);
    }

    #[test]
    fn test_logical_and_conditional() {
        let kinds = classify_src("css`${null ?? 'a'} ${0 || 'b'} ${1 > 2 ? 'c' : 'd'} ${typeof 1}`").unwrap();
        let texts: Vec<String> = kinds
            .into_iter()
            .map(|k| match k {
                Classification::Constant(v) => v.to_js_string(),
                other => panic!("not constant: {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["a", "b", "d", "number"]);
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(" 12 "), 12.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number("1e3"), 1000.0);
    }
}
