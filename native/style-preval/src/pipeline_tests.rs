//! End-to-end passes: real sandbox, real class hashing.

use pretty_assertions::assert_eq;
use std::rc::Rc;

use crate::collect::collect_occurrences;
use crate::css::LightningCssModules;
use crate::error::StyleError;
use crate::hoist::Hoister;
use crate::lower::parse_module;
use crate::options::PrevalOptions;
use crate::pass::{transform, transform_with, PassOutput};
use crate::sandbox::host::MemoryHost;
use crate::sandbox::{Evaluator, ModuleRuntime};
use crate::synth::synthesize;

fn run_with(host: MemoryHost, src: &str, filename: &str) -> Result<PassOutput, StyleError> {
    let options = PrevalOptions::default();
    let mut runtime = ModuleRuntime::with_host(&options, Rc::new(host)).unwrap();
    transform_with(src, filename, &options, &mut runtime, &LightningCssModules)
}

fn run(src: &str) -> Result<PassOutput, StyleError> {
    run_with(MemoryHost::new(), src, "/app/src/card.tsx")
}

#[test]
fn test_enclosing_const_scenario() {
    let src = "export function Card() {\n  const colorVar = '#fff';\n  const s = css`.a { color: ${colorVar}; }`;\n  return s.a;\n}\n";
    let out = run(src).unwrap();

    assert_eq!(out.artifact.class_map.len(), 1);
    let hashed = &out.artifact.class_map["a"];
    assert!(hashed.ends_with("_a"));
    assert!(out.artifact.css_text.contains(&format!(".{}", hashed)));
    assert!(out.artifact.css_text.contains("color: #fff"));

    assert!(out
        .code
        .contains(&format!("const s = {{ a: \"{}\", link: function(props) {{", hashed)));
    assert!(out.code.contains("rel=\"stylesheet\""));
    assert!(out.code.contains("href={`/dist${__cssFileUrl__.slice(1)}`}"));
    assert!(!out.code.contains("css`"));
}

#[test]
fn test_hoisted_dependencies_evaluate() {
    let src = "export function Card() {\n  const base = '#ff';\n  const colorVar = base + 'f'.repeat(1);\n  return css`.a { color: ${colorVar}; }`;\n}\n";
    let out = run(src).unwrap();
    assert!(out.artifact.css_text.contains("color: #fff"));

    // Hoisting works on a copy.
    let module = parse_module(src, "/app/src/card.tsx").unwrap();
    let before = module.program.clone();
    let occurrence = &collect_occurrences(&module, "css")[0];
    let mut hoister = Hoister::new(&module.program);
    let hoisted = hoister.hoist(&occurrence.expressions[0]);
    assert_ne!(hoister.program(), &before);
    assert_eq!(module.program, before);
    assert!(matches!(hoisted, crate::ast::Expr::Ident(ref id) if id.name == "_colorVar"));
}

#[test]
fn test_constant_folding_needs_no_sandbox() {
    let out = run("const s = css`.a { z-index: ${1 + 2}; }`;").unwrap();
    assert!(out.artifact.css_text.contains("z-index: 3"));
    assert!(out.dependencies.is_empty());
}

#[test]
fn test_output_is_deterministic() {
    let src = "const pad = [4, 8].map((n) => n * 2).join('px ') + 'px';\nconst s = css`.card { padding: ${pad}; } .title { font-weight: 600; }`;";
    let first = transform(src, "/app/src/a.tsx", &PrevalOptions::default()).unwrap();
    let second = transform(src, "/app/src/a.tsx", &PrevalOptions::default()).unwrap();

    assert_eq!(first, second);
    assert!(first.artifact.css_text.contains("padding: 8px 16px"));
    let keys: Vec<_> = first.artifact.class_map.keys().cloned().collect();
    assert_eq!(keys, vec!["card".to_string(), "title".to_string()]);
}

#[test]
fn test_object_accessors_beside_lazy_values() {
    let src = "const o = { base: 'bl', get x() { return this.base + 'ue'; }, set x(v) {} };\nconst c = ['r', 'ed'].join('');\nexport const s = css`.a { color: ${c}; } .b { color: ${o.x}; }`;";
    let out = run(src).unwrap();
    assert!(out.artifact.css_text.contains("color: red"));
    assert!(out.artifact.css_text.contains("color: #00f") || out.artifact.css_text.contains("color: blue"));
    assert!(out.code.starts_with("const o = { base: 'bl', get x() {"));
}

#[test]
fn test_regex_literal_beside_lazy_value() {
    let src = "const re = /x+/g;\nconst c = 'axxbx'.replace(re, '') === 'ab' ? ['r', 'ed'].join('') : 'blue';\nexport const s = css`.a { color: ${c}; }`;";
    let out = run(src).unwrap();
    assert!(out.artifact.css_text.contains("color: red"));
    assert!(out.code.starts_with("const re = /x+/g;\n"));
}

#[test]
fn test_empty_string_is_suppressed() {
    let out = run("const s = css`.a { color: red;${[].join('')} }`;").unwrap();
    assert!(out.artifact.css_text.contains("color: red"));
}

#[test]
fn test_arrow_interpolation_fails_with_location() {
    let err = run("const s = css`.a { color: ${() => 1}; }`;").unwrap_err();
    match err {
        StyleError::UnresolvableValue {
            file,
            location,
            expression,
            ..
        } => {
            assert_eq!(file, "/app/src/card.tsx");
            assert_eq!((location.line, location.column), (1, 29));
            assert_eq!(expression, "() => 1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_undefined_value_is_unresolvable() {
    let err = run("const theme = {};\nconst s = css`.a { color: ${theme.missing}; }`;").unwrap_err();
    assert!(err.to_string().contains("evaluates to undefined"));
    assert_eq!(err.location().map(|l| l.line), Some(2));
}

#[test]
fn test_imports_are_tracked_as_dependencies() {
    let host = MemoryHost::new().with_file(
        "/app/src/theme.ts",
        "export const theme = { fg: 'rebeccapurple' as string };",
    );
    let src = "import { theme } from './theme';\nconst n: number = 1;\nexport const s = css`.a { color: ${theme.fg}; }`;";
    let out = run_with(host, src, "/app/src/card.tsx").unwrap();

    let css = &out.artifact.css_text;
    assert!(css.contains("color: #639") || css.contains("color: rebeccapurple"));
    assert_eq!(
        out.dependencies.get("/app/src/card.tsx"),
        Some(&vec!["./theme".to_string()])
    );
    assert!(out.code.starts_with("import { theme } from './theme';\nconst n: number = 1;\n"));
}

#[test]
fn test_batch_evaluated_once_per_text() {
    let src = "const c = ['a', 'b'].join('');\nconst s = css`.x { content: \"${c}\"; }`;";
    let module = parse_module(src, "/app/src/a.js").unwrap();
    let occurrence = &collect_occurrences(&module, "css")[0];
    let mut hoister = Hoister::new(&module.program);
    let lazy = vec![hoister.hoist(&occurrence.expressions[0])];
    let program = synthesize(hoister.into_program(), &lazy, &[occurrence.span], "css", src);

    let mut runtime =
        ModuleRuntime::with_host(&PrevalOptions::default(), Rc::new(MemoryHost::new())).unwrap();
    runtime.evaluate_preval(&program.code, "/app/src/a.js").unwrap();
    runtime.evaluate_preval(&program.code, "/app/src/a.js").unwrap();
    assert_eq!(runtime.executions(), 1);

    let edited = program.code.replace("\"a\"", "\"A\"");
    let outcome = runtime.evaluate_preval(&edited, "/app/src/a.js").unwrap();
    assert_eq!(runtime.executions(), 2);
    assert_eq!(outcome.values, vec![crate::sandbox::LazyValue::Str("Ab".into())]);
}

#[test]
fn test_runtime_error_in_batch_is_reported() {
    let src = "throw new Error('config missing');\nconst s = css`.a { color: ${x}; }`;";
    let err = run(src).unwrap_err();
    match err {
        StyleError::EvaluationFailure { message, stack, .. } => {
            assert!(message.contains("config missing"));
            assert!(stack.contains("/app/src/card.tsx"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
