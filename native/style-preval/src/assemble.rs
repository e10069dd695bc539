//! CSS Assembler & Rewriter
//!
//! Joins an occurrence's literal segments with the values of its
//! interpolations, and builds the object literal that replaces the
//! occurrence once its classes are hashed.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use crate::ast::*;
use crate::classify::{Classification, Classified, ConstValue};
use crate::collect::Occurrence;
use crate::error::StyleError;
use crate::lower::ParsedModule;
use crate::options::PrevalOptions;
use crate::printer::{number_to_string, print_expr};
use crate::sandbox::{EvalFailure, LazyValue};

/// Key reserved for the stylesheet helper.
pub const LINK_KEY: &str = "link";

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Values of lazy interpolations keyed by the span of the original,
/// unhoisted expression. Built once per pass from the batch result.
#[derive(Debug, Clone, Default)]
pub struct ValueCache {
    values: HashMap<Span, LazyValue>,
    failure: Option<EvalFailure>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair batch results with the lazy expressions, positionally.
    pub fn from_batch(spans: &[Span], values: Vec<LazyValue>) -> Self {
        Self {
            values: spans.iter().copied().zip(values).collect(),
            failure: None,
        }
    }

    /// The batch threw; no lazy expression has a value.
    pub fn failed(failure: EvalFailure) -> Self {
        Self {
            values: HashMap::new(),
            failure: Some(failure),
        }
    }

    pub fn get(&self, span: Span) -> Option<&LazyValue> {
        self.values.get(&span)
    }

    pub fn failure(&self) -> Option<&EvalFailure> {
        self.failure.as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRINGIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Newline runs become one space; the result is trimmed.
pub fn normalize(text: &str) -> String {
    lazy_static! {
        static ref NEWLINES: Regex = Regex::new(r"[\r\n]+").unwrap();
    }
    NEWLINES.replace_all(text, " ").trim().to_string()
}

/// Text of an evaluated value, or the reason it has none.
pub fn stringify_value(value: &LazyValue) -> Result<String, String> {
    match value {
        LazyValue::Undefined => Err("evaluates to undefined".to_string()),
        LazyValue::Null => Err("evaluates to null".to_string()),
        LazyValue::Bool(b) => Ok(b.to_string()),
        LazyValue::Num(n) => Ok(number_to_string(*n)),
        LazyValue::Str(s) => Ok(s.clone()),
        LazyValue::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(match item {
                    LazyValue::Undefined | LazyValue::Null => String::new(),
                    LazyValue::Object(_) => "[object Object]".to_string(),
                    other => stringify_value(other)?,
                });
            }
            Ok(parts.join(","))
        }
        LazyValue::Object(_) => Err("evaluates to an object".to_string()),
        LazyValue::Function => Err("evaluates to a function".to_string()),
        LazyValue::Error { name, message } => Err(format!("threw {}: {}", name, message)),
    }
}

fn stringify_const(value: &ConstValue) -> Result<String, String> {
    match value {
        ConstValue::Undefined => Err("evaluates to undefined".to_string()),
        ConstValue::Null => Err("evaluates to null".to_string()),
        other => Ok(other.to_js_string()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ASSEMBLY
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Assembler<'a> {
    module: &'a ParsedModule,
    values: &'a ValueCache,
}

impl<'a> Assembler<'a> {
    pub fn new(module: &'a ParsedModule, values: &'a ValueCache) -> Self {
        Self { module, values }
    }

    /// Final CSS text of one occurrence. Every failing interpolation is
    /// reported; none of the text is returned if any fails.
    pub fn assemble(
        &self,
        occurrence: &Occurrence,
        classified: &[Classified],
    ) -> Result<String, StyleError> {
        let mut text = String::new();
        let mut errors = Vec::new();

        for (idx, segment) in occurrence.raw_segments().enumerate() {
            text.push_str(segment);
            let Some(item) = classified.get(idx) else {
                continue;
            };
            match self.resolve(item) {
                Ok(value) => text.push_str(&value),
                Err(err) => errors.push(err),
            }
        }

        match StyleError::from_many(errors) {
            Some(err) => Err(err),
            None => Ok(text),
        }
    }

    /// Normalized text for one interpolation; `""` contributes nothing.
    fn resolve(&self, item: &Classified) -> Result<String, StyleError> {
        let span = item.expr.span();
        let value = match &item.kind {
            Classification::Constant(value) => stringify_const(value),
            Classification::Function => Err("is a function".to_string()),
            Classification::Lazy => match (self.values.get(span), self.values.failure()) {
                (Some(value), _) => stringify_value(value),
                (None, Some(failure)) => {
                    return Err(StyleError::EvaluationFailure {
                        file: self.module.filename.clone(),
                        location: self.module.location(span),
                        message: failure.message.clone(),
                        stack: failure.stack.clone().unwrap_or_default(),
                    })
                }
                (None, None) => Err("no value was produced".to_string()),
            },
        };

        value
            .map(|text| normalize(&text))
            .map_err(|reason| self.unresolvable(&item.expr, reason))
    }

    fn unresolvable(&self, expr: &Expr, reason: String) -> StyleError {
        let span = expr.span();
        let expression = match self.module.slice(span) {
            "" => print_expr(expr, None),
            text => text.to_string(),
        };
        StyleError::UnresolvableValue {
            file: self.module.filename.clone(),
            location: self.module.location(span),
            expression,
            reason,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPLACEMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// `{ <class>: "<hashed>", ..., link: function(props) { ... } }`
pub fn replacement_expr(class_map: &BTreeMap<String, String>, options: &PrevalOptions) -> Expr {
    let mut props: Vec<Prop> = class_map
        .iter()
        .filter(|(name, _)| name.as_str() != LINK_KEY)
        .map(|(name, hashed)| Prop::KeyValue {
            key: PropKey::Str(name.clone()),
            value: Expr::str(hashed.clone()),
        })
        .collect();
    props.push(Prop::KeyValue {
        key: PropKey::Ident(LINK_KEY.to_string()),
        value: link_helper(options),
    });
    Expr::Object {
        span: Span::SYNTHETIC,
        props,
    }
}

pub fn replacement_code(class_map: &BTreeMap<String, String>, options: &PrevalOptions) -> String {
    print_expr(&replacement_expr(class_map, options), None)
}

/// `function(props) { return <link {...props} rel="stylesheet" href={...} />; }`
fn link_helper(options: &PrevalOptions) -> Expr {
    // `${prefix}${placeholder.slice(1)}`
    let href = Expr::Template(Template {
        span: Span::SYNTHETIC,
        quasis: vec![
            Quasi {
                raw: options.href_prefix.clone(),
                cooked: Some(options.href_prefix.clone()),
            },
            Quasi {
                raw: String::new(),
                cooked: Some(String::new()),
            },
        ],
        expressions: vec![Expr::call(
            Expr::static_member(Expr::ident(&options.css_url_placeholder), "slice"),
            vec![Expr::Lit {
                span: Span::SYNTHETIC,
                value: Lit::Num(1.0),
            }],
        )],
    });

    let element = JsxElement {
        span: Span::SYNTHETIC,
        name: Some("link".to_string()),
        attributes: vec![
            JsxAttr::Spread(Expr::ident("props")),
            JsxAttr::Attr {
                name: "rel".to_string(),
                value: Some(JsxAttrValue::Str("stylesheet".to_string())),
            },
            JsxAttr::Attr {
                name: "href".to_string(),
                value: Some(JsxAttrValue::Expr(href)),
            },
        ],
        children: Vec::new(),
    };

    Expr::Function(Box::new(Function {
        span: Span::SYNTHETIC,
        id: None,
        params: vec![Pattern::Ident(Ident::synthetic("props"))],
        body: vec![Stmt::Return {
            span: Span::SYNTHETIC,
            argument: Some(Expr::Jsx(Box::new(element))),
        }],
        is_async: false,
    }))
}

/// Replace each span of `source` with its text. Spans nested inside another
/// replaced span are dropped; the outer replacement already covers them.
pub fn splice(source: &str, replacements: &[(Span, String)]) -> String {
    let mut ordered: Vec<&(Span, String)> = replacements
        .iter()
        .filter(|(span, _)| !span.is_synthetic())
        .collect();
    ordered.sort_by_key(|(span, _)| (span.start, std::cmp::Reverse(span.end)));

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;
    for (span, text) in ordered {
        let (start, end) = (span.start as usize, span.end as usize);
        if start < cursor || end > source.len() {
            continue;
        }
        out.push_str(&source[cursor..start]);
        out.push_str(text);
        cursor = end;
    }
    out.push_str(&source[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::collect::collect_occurrences;
    use crate::lower::parse_module;
    use crate::scope::ScopeAnalysis;
    use pretty_assertions::assert_eq;

    fn assemble_with(src: &str, values: impl FnOnce(&[Span]) -> ValueCache) -> Result<String, StyleError> {
        let module = parse_module(src, "/src/a.tsx").unwrap();
        let analysis = ScopeAnalysis::new(&module.program);
        let classifier = Classifier::new(&module, &analysis);
        let occurrence = &collect_occurrences(&module, "css")[0];
        let classified = classifier.classify(occurrence).unwrap();
        let lazy: Vec<Span> = classified
            .iter()
            .filter(|c| c.kind == Classification::Lazy)
            .map(|c| c.expr.span())
            .collect();
        let cache = values(&lazy);
        Assembler::new(&module, &cache).assemble(occurrence, &classified)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  a\r\n\n b  "), "a  b");
        assert_eq!(normalize("\n"), "");
    }

    #[test]
    fn test_stringify_values() {
        assert_eq!(stringify_value(&LazyValue::Num(0.0)), Ok("0".into()));
        assert_eq!(stringify_value(&LazyValue::Num(1.5)), Ok("1.5".into()));
        assert_eq!(
            stringify_value(&LazyValue::Array(vec![
                LazyValue::Num(1.0),
                LazyValue::Null,
                LazyValue::Str("x".into()),
            ])),
            Ok("1,,x".into())
        );
        assert!(stringify_value(&LazyValue::Undefined)
            .unwrap_err()
            .contains("undefined"));
        assert!(stringify_value(&LazyValue::Function).is_err());
        assert_eq!(
            stringify_value(&LazyValue::Error {
                name: "TypeError".into(),
                message: "boom".into(),
            }),
            Err("threw TypeError: boom".into())
        );
    }

    #[test]
    fn test_assembles_constants_and_lazy_values() {
        let src = "const a = css`.a { width: ${1 + 2}px; color: ${theme.fg}; }`;";
        let text = assemble_with(src, |lazy| {
            ValueCache::from_batch(lazy, vec![LazyValue::Str("\n#fff\n".into())])
        })
        .unwrap();
        assert_eq!(text, ".a { width: 3px; color: #fff; }");
    }

    #[test]
    fn test_empty_string_contributes_nothing() {
        let src = "const a = css`.a {${extra}}`;";
        let text = assemble_with(src, |lazy| {
            ValueCache::from_batch(lazy, vec![LazyValue::Str(String::new())])
        })
        .unwrap();
        assert_eq!(text, ".a {}");
    }

    #[test]
    fn test_function_interpolation_is_unresolvable() {
        let src = "const a = css`.a { color: ${() => 1}; }`;";
        let err = assemble_with(src, |_| ValueCache::new()).unwrap_err();
        match err {
            StyleError::UnresolvableValue {
                location,
                expression,
                ..
            } => {
                assert_eq!(expression, "() => 1");
                assert_eq!(location.line, 1);
                assert_eq!(location.column, 29);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_batch_failure_reported_per_lazy_interpolation() {
        let src = "const a = css`${x}${y}${'ok'}`;";
        let err = assemble_with(src, |_| {
            ValueCache::failed(EvalFailure {
                message: "ReferenceError: x is not defined".into(),
                stack: None,
            })
        })
        .unwrap_err();
        let failures: Vec<_> = err
            .iter()
            .filter(|e| matches!(e, StyleError::EvaluationFailure { .. }))
            .collect();
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn test_replacement_filters_link_and_sorts() {
        let map = BTreeMap::from([
            ("b".to_string(), "h_b".to_string()),
            ("link".to_string(), "h_link".to_string()),
            ("a-b".to_string(), "h_a-b".to_string()),
        ]);
        let code = replacement_code(&map, &PrevalOptions::default());
        assert!(code.starts_with("{ \"a-b\": \"h_a-b\", b: \"h_b\", link: function(props) {"));
        assert!(code.contains(
            "return <link {...props} rel=\"stylesheet\" href={`/dist${__cssFileUrl__.slice(1)}`} />;"
        ));
        assert!(!code.contains("h_link"));
    }

    #[test]
    fn test_splice_skips_nested() {
        let src = "a(OUTER(inner)) + b(X)";
        let outer = Span::new(2, 14);
        let inner = Span::new(8, 13);
        let x = Span::new(20, 21);
        let out = splice(
            src,
            &[
                (x, "1".to_string()),
                (inner, "2".to_string()),
                (outer, "{}".to_string()),
            ],
        );
        assert_eq!(out, "a({}) + b(1)");
    }
}
