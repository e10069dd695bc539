//! Sandboxed Evaluator
//!
//! Executes synthesized programs, and every file they pull in, inside an
//! interpreter with a restricted global surface and a custom module loader.
//!
//! The rest of the crate only sees the [`Evaluator`] trait and plain
//! [`LazyValue`] data, so the engine can be swapped for an embedded one
//! without touching the pass.

mod builtins;
mod env;
pub mod host;
mod interp;
mod regexp;
pub mod resolve;
mod value;

use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;

use crate::options::PrevalOptions;
use crate::synth::PREVAL_EXPORT;
use host::{FsHost, Host};
use interp::{Flow, Interpreter};
use value::Value;

/// A value extracted from the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub enum LazyValue {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<LazyValue>),
    Object(Vec<(String, LazyValue)>),
    Function,
    Error { name: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrevalOutcome {
    /// One entry per lazy expression, in synthesis order.
    pub values: Vec<LazyValue>,
    /// Specifiers requested by each module, keyed by module path.
    pub dependencies: BTreeMap<String, Vec<String>>,
}

/// The synthesized program threw outside of its per-thunk wrappers.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalFailure {
    pub message: String,
    pub stack: Option<String>,
}

pub trait Evaluator {
    /// Execute `code` as if it were the file `filename` and return the
    /// values of its `__preval` export.
    fn evaluate_preval(&mut self, code: &str, filename: &str)
        -> Result<PrevalOutcome, EvalFailure>;

    /// Forget every loaded module and cached evaluation.
    fn reset(&mut self);
}

/// The interpreter-backed [`Evaluator`].
pub struct ModuleRuntime {
    interp: Interpreter,
}

impl ModuleRuntime {
    pub fn new(options: &PrevalOptions) -> Result<Self, regex::Error> {
        Self::with_host(options, Rc::new(FsHost))
    }

    pub fn with_host(options: &PrevalOptions, host: Rc<dyn Host>) -> Result<Self, regex::Error> {
        Ok(Self {
            interp: Interpreter::new(options, host)?,
        })
    }

    /// Number of module bodies actually executed (cache misses).
    pub fn executions(&self) -> usize {
        self.interp.executions
    }

    /// Clear the module cache and the dependency lists.
    pub fn invalidate(&mut self) {
        self.interp.clear_modules();
    }

    pub fn invalidate_eval_cache(&mut self) {
        self.interp.eval_cache.clear();
    }

    /// Drop cached evaluations of one file.
    pub fn clear_for(&mut self, path: &str) {
        self.interp.eval_cache.clear_for(path);
    }

    pub fn dependencies(&self) -> &BTreeMap<String, Vec<String>> {
        &self.interp.dependencies
    }

    /// `require(specifier)` as issued from the module `from`.
    pub fn require_from(&mut self, from: &str, specifier: &str) -> Result<LazyValue, EvalFailure> {
        self.interp
            .require(from, specifier)
            .map(|value| value.to_lazy())
            .map_err(failure)
    }
}

impl Evaluator for ModuleRuntime {
    fn evaluate_preval(
        &mut self,
        code: &str,
        filename: &str,
    ) -> Result<PrevalOutcome, EvalFailure> {
        let identity = vec![filename.to_string(), PREVAL_EXPORT.to_string()];
        let exports = self
            .interp
            .evaluate_standalone(filename, code, identity)
            .map_err(failure)?;
        let exported = self
            .interp
            .get_property(&exports, PREVAL_EXPORT)
            .map_err(failure)?;
        let Some(items) = exported.array_items() else {
            return Err(EvalFailure {
                message: format!("{} did not export an array named {}", filename, PREVAL_EXPORT),
                stack: None,
            });
        };
        Ok(PrevalOutcome {
            values: items.iter().map(Value::to_lazy).collect(),
            dependencies: self.interp.dependencies.clone(),
        })
    }

    fn reset(&mut self) {
        self.invalidate();
        self.invalidate_eval_cache();
    }
}

fn failure(flow: Flow) -> EvalFailure {
    match flow {
        Flow::Throw(value) => {
            let stack = value.as_object().and_then(|obj| {
                obj.borrow()
                    .props
                    .get("stack")
                    .map(|stack| stack.to_js_string())
            });
            EvalFailure {
                message: value.to_js_string(),
                stack,
            }
        }
        _ => EvalFailure {
            message: "Illegal control flow at module top level".to_string(),
            stack: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::host::MemoryHost;
    use super::*;
    use pretty_assertions::assert_eq;

    fn runtime(host: MemoryHost) -> ModuleRuntime {
        ModuleRuntime::with_host(&PrevalOptions::default(), Rc::new(host)).unwrap()
    }

    fn eval(code: &str) -> Vec<LazyValue> {
        runtime(MemoryHost::new())
            .evaluate_preval(code, "/app/src/entry.js")
            .unwrap()
            .values
    }

    fn eval_one(expr: &str) -> LazyValue {
        let code = format!("exports.__preval = [{}];", expr);
        eval(&code).remove(0)
    }

    fn num(n: f64) -> LazyValue {
        LazyValue::Num(n)
    }

    fn s(text: &str) -> LazyValue {
        LazyValue::Str(text.to_string())
    }

    #[test]
    fn test_arithmetic_and_strings() {
        assert_eq!(eval_one("1 + 2 * 3"), num(7.0));
        assert_eq!(eval_one("'a' + 1"), s("a1"));
        assert_eq!(eval_one("`${2 ** 3}px`"), s("8px"));
        assert_eq!(eval_one("[1, 2] + ''"), s("1,2"));
        assert_eq!(eval_one("typeof undeclared"), s("undefined"));
        assert_eq!(eval_one("0.1 + 0.2"), num(0.30000000000000004));
        assert_eq!(eval_one("'b' > 'a' && 10 > 9"), LazyValue::Bool(true));
        assert_eq!(eval_one("-7 >>> 28"), num(15.0));
    }

    #[test]
    fn test_closures_and_loops() {
        let values = eval(
            r#"
            function makeCounter() {
                let count = 0;
                return () => ++count;
            }
            const next = makeCounter();
            next();
            const fns = [];
            for (let i = 0; i < 3; i++) fns.push(() => i);
            let total = 0;
            for (const n of [1, 2, 3]) { if (n === 2) continue; total += n; }
            let keys = '';
            for (const k in { a: 1, b: 2 }) keys += k;
            exports.__preval = [next(), fns.map((f) => f()).join(','), total, keys];
            "#,
        );
        assert_eq!(values, vec![num(2.0), s("0,1,2"), num(4.0), s("ab")]);
    }

    #[test]
    fn test_destructuring_spread_and_optional_chaining() {
        let values = eval(
            r#"
            const theme = { colors: { primary: 'red' }, sizes: [4, 8, 16] };
            const { colors: { primary }, sizes: [, md, ...rest] } = theme;
            const merged = { ...theme.colors, accent: 'blue' };
            exports.__preval = [primary, md, rest.length, merged.accent, theme.missing?.deep, theme.colors?.primary];
            "#,
        );
        assert_eq!(
            values,
            vec![s("red"), num(8.0), num(1.0), s("blue"), LazyValue::Undefined, s("red")]
        );
    }

    #[test]
    fn test_thrown_values_inside_wrapper_become_errors() {
        let values = eval(
            r#"
            const _wrap = (fn) => { try { return fn(); } catch (e) { return e; } };
            exports.__preval = [_wrap(() => null.x), _wrap(() => { throw new RangeError('nope'); })];
            "#,
        );
        assert_eq!(
            values,
            vec![
                LazyValue::Error {
                    name: "TypeError".into(),
                    message: "Cannot read properties of null (reading 'x')".into(),
                },
                LazyValue::Error {
                    name: "RangeError".into(),
                    message: "nope".into(),
                },
            ]
        );
    }

    #[test]
    fn test_top_level_throw_is_a_failure() {
        let err = runtime(MemoryHost::new())
            .evaluate_preval("throw new Error('boom');", "/app/a.js")
            .unwrap_err();
        assert_eq!(err.message, "Error: boom");
        assert!(err.stack.unwrap().contains("at /app/a.js"));
    }

    #[test]
    fn test_require_relative_json_and_esm() {
        let host = MemoryHost::new()
            .with_file(
                "/app/src/theme.ts",
                "export const primary: string = 'tomato';\nexport default { spacing: 4 };",
            )
            .with_file("/app/src/tokens.json", r#"{ "radius": 3 }"#)
            .with_file("/app/src/logo.svg", "<svg/>");
        let mut rt = runtime(host);
        let outcome = rt
            .evaluate_preval(
                r#"
                import theme, { primary } from './theme';
                const tokens = require('./tokens.json');
                const logo = require('./logo.svg');
                exports.__preval = [primary, theme.spacing, tokens.radius, logo];
                "#,
                "/app/src/entry.ts",
            )
            .unwrap();
        assert_eq!(
            outcome.values,
            vec![s("tomato"), num(4.0), num(3.0), s("./logo.svg")]
        );
        assert_eq!(
            outcome.dependencies.get("/app/src/entry.ts").unwrap(),
            &vec![
                "./theme".to_string(),
                "./tokens.json".to_string(),
                "./logo.svg".to_string()
            ]
        );
    }

    #[test]
    fn test_module_cache_and_eval_cache() {
        let host = MemoryHost::new().with_file("/app/colors.js", "module.exports = { red: '#f00' };");
        let mut rt = runtime(host);
        let code = "const c = require('./colors'); exports.__preval = [c.red];";

        rt.evaluate_preval(code, "/app/a.js").unwrap();
        assert_eq!(rt.executions(), 2);

        // Same text, same file: nothing executes again.
        rt.evaluate_preval(code, "/app/a.js").unwrap();
        assert_eq!(rt.executions(), 2);

        // One changed character forces the batch to run; the dependency
        // comes from the module cache.
        let changed = "const c = require('./colors'); exports.__preval = [c.red ];";
        rt.evaluate_preval(changed, "/app/a.js").unwrap();
        assert_eq!(rt.executions(), 3);

        rt.reset();
        rt.evaluate_preval(code, "/app/a.js").unwrap();
        assert_eq!(rt.executions(), 5);
    }

    #[test]
    fn test_clear_for_identity() {
        let mut rt = runtime(MemoryHost::new());
        let code = "exports.__preval = [1];";
        rt.evaluate_preval(code, "/app/a.js").unwrap();
        rt.evaluate_preval(code, "/app/b.js").unwrap();
        rt.clear_for("/app/a.js");
        rt.evaluate_preval(code, "/app/a.js").unwrap();
        rt.evaluate_preval(code, "/app/b.js").unwrap();
        assert_eq!(rt.executions(), 3);
    }

    #[test]
    fn test_cyclic_requires_see_partial_exports() {
        let host = MemoryHost::new()
            .with_file("/app/a.js", "exports.early = 1; const b = require('./b'); exports.fromB = b.seen;")
            .with_file("/app/b.js", "const a = require('./a'); exports.seen = a.early;");
        let mut rt = runtime(host);
        let value = rt.require_from("/app/entry.js", "./a").unwrap();
        assert_eq!(
            value,
            LazyValue::Object(vec![("early".into(), num(1.0)), ("fromB".into(), num(1.0))])
        );
    }

    #[test]
    fn test_builtin_modules() {
        let host = MemoryHost::new()
            .with_file("/config/brand.txt", "teal\n")
            .with_file("/app/x.js", "");
        let mut rt = runtime(host);
        let values = rt
            .evaluate_preval(
                r#"
                const fs = require('fs');
                const path = require('node:path');
                exports.__preval = [
                    fs.readFileSync('/config/brand.txt', 'utf8').trim(),
                    fs.existsSync('/config/missing.txt'),
                    path.join('a', '../b', 'c.css'),
                    path.extname('theme.module.css'),
                    path.basename('/x/y/theme.ts', '.ts'),
                    path.dirname('/x/y/theme.ts'),
                ];
                "#,
                "/app/x.js",
            )
            .unwrap()
            .values;
        assert_eq!(
            values,
            vec![s("teal"), LazyValue::Bool(false), s("b/c.css"), s(".css"), s("theme"), s("/x/y")]
        );

        let err = rt
            .evaluate_preval("require('child_process');", "/app/y.js")
            .unwrap_err();
        assert!(err.message.contains(
            "Unable to import \"child_process\". Importing Node builtins is not supported in the sandbox."
        ));
    }

    #[test]
    fn test_os_and_url_modules() {
        let values = eval(
            r#"
            const os = require('os');
            const { fileURLToPath, pathToFileURL } = require('node:url');
            exports.__preval = [
                ['a', 'b'].join(os.EOL),
                fileURLToPath('file:///app/src/my%20theme.css'),
                fileURLToPath(pathToFileURL('/app/a b.css')),
                pathToFileURL('/app/a b.css').href,
                String(pathToFileURL('/x.js')),
            ];
            "#,
        );
        assert_eq!(
            values,
            vec![
                s("a\nb"),
                s("/app/src/my theme.css"),
                s("/app/a b.css"),
                s("file:///app/a%20b.css"),
                s("file:///x.js"),
            ]
        );

        let err = runtime(MemoryHost::new())
            .evaluate_preval("require('url').fileURLToPath('https://x.dev/a');", "/app/a.js")
            .unwrap_err();
        assert_eq!(err.message, "TypeError: The URL must be of scheme file");
    }

    #[test]
    fn test_to_fixed_rounds_ties_up() {
        assert_eq!(eval_one("(2.5).toFixed(0)"), s("3"));
        assert_eq!(eval_one("(0.5).toFixed(0)"), s("1"));
        assert_eq!(eval_one("(1.25).toFixed(1)"), s("1.3"));
        assert_eq!(eval_one("(1.005).toFixed(2)"), s("1.00"));
        assert_eq!(eval_one("(-1.5).toFixed(0)"), s("-2"));
        assert_eq!(eval_one("(9.995).toFixed(1)"), s("10.0"));
        assert_eq!(eval_one("(12).toFixed(2)"), s("12.00"));
    }

    #[test]
    fn test_padding_is_bounded() {
        assert_eq!(eval_one("'7'.padStart(3, '0')"), s("007"));
        assert_eq!(eval_one("'a'.padEnd(1e10, '')"), s("a"));
        let err = runtime(MemoryHost::new())
            .evaluate_preval("'a'.padStart(1e10, 'b');", "/app/a.js")
            .unwrap_err();
        assert_eq!(err.message, "RangeError: Invalid string length");
        let err = runtime(MemoryHost::new())
            .evaluate_preval("'a'.padEnd(Infinity);", "/app/a.js")
            .unwrap_err();
        assert_eq!(err.message, "RangeError: Invalid string length");
    }

    #[test]
    fn test_regular_expressions() {
        let values = eval(
            r#"
            const re = /(\d+)(px|rem)/g;
            const sizes = '4px 1.5rem 12px';
            const hit = re.test(sizes);
            const after = re.lastIndex;
            const m = /^(?<n>[0-9.]+)(?<u>[a-z]+)$/i.exec('12PX');
            exports.__preval = [
                hit,
                after,
                sizes.replace(re, (all, n, u) => n * 2 + u),
                sizes.match(re).join('|'),
                m.groups.n + m.groups.u,
                m.index,
                'a-b_c'.split(/[-_]/).join(' '),
                'x1y22'.replace(/\d+/, '[$&]'),
                '2024-05'.replace(/(\d+)-(\d+)/, '$2/$1'),
                'abc'.search(/c/),
                String(/a\/b/gi),
                new RegExp('a.c', 's').test('a\nc'),
                /x/ instanceof RegExp,
                Object.keys(/x/).length,
                [...'a1b2'.matchAll(/\d/g)].map((found) => found.index).join(','),
            ];
            "#,
        );
        assert_eq!(
            values,
            vec![
                LazyValue::Bool(true),
                num(3.0),
                s("8px 1.10rem 24px"),
                s("4px|5rem|12px"),
                s("12PX"),
                num(0.0),
                s("a b c"),
                s("x[1]y22"),
                s("05/2024"),
                num(2.0),
                s("/a\\/b/gi"),
                LazyValue::Bool(true),
                LazyValue::Bool(true),
                num(0.0),
                s("1,3"),
            ]
        );

        let err = runtime(MemoryHost::new())
            .evaluate_preval("const re = /(?<=a)b/;", "/app/a.js")
            .unwrap_err();
        assert!(err
            .message
            .starts_with("SyntaxError: Invalid regular expression: /(?<=a)b/: "));
    }

    #[test]
    fn test_object_accessors() {
        let values = eval(
            r#"
            const size = {
                base: 4,
                get double() { return this.base * 2; },
                set double(v) { this.base = v / 2; },
                get readOnly() { return 'r'; },
            };
            size.double = 20;
            size.readOnly = 'w';
            const copy = { ...size };
            const target = Object.defineProperty({}, 'lazy', { get() { return 'g'; } });
            exports.__preval = [
                size.double,
                size.readOnly,
                copy.double,
                Object.keys(size).join(','),
                JSON.stringify({ ...size }),
                'double' in size,
                target.lazy,
            ];
            "#,
        );
        assert_eq!(
            values,
            vec![
                num(20.0),
                s("r"),
                num(20.0),
                s("base,double,readOnly"),
                s(r#"{"base":10,"double":20,"readOnly":"r"}"#),
                LazyValue::Bool(true),
                s("g"),
            ]
        );
    }

    #[test]
    fn test_class_declarations_throw_when_used() {
        let values = eval("class Theme {}\nexports.__preval = [typeof Theme, 'ok'];");
        assert_eq!(values, vec![s("function"), s("ok")]);

        for code in [
            "class Theme { static fg = 'red'; }\nexports.__preval = [Theme.fg];",
            "class Theme {}\nexports.__preval = [Theme.name];",
            "class Theme {}\nnew Theme();",
            "class Theme {}\nTheme();",
        ] {
            let err = runtime(MemoryHost::new())
                .evaluate_preval(code, "/app/a.js")
                .unwrap_err();
            assert_eq!(err.message, "SyntaxError: Unsupported syntax: class", "{}", code);
        }
    }

    #[test]
    fn test_process_mock_and_defines() {
        let mut options = PrevalOptions::default();
        options.env.insert("BRAND".into(), "acme".into());
        let mut rt = ModuleRuntime::with_host(&options, Rc::new(MemoryHost::new())).unwrap();
        let values = rt
            .evaluate_preval(
                "exports.__preval = [process.env.BRAND, process.cwd(), process.platform, process.env.EVAL];",
                "/app/src/a.js",
            )
            .unwrap()
            .values;
        assert_eq!(values, vec![s("acme"), s("/"), s("browser"), LazyValue::Bool(true)]);

        // node_modules files are executed as written, without defines.
        let host = MemoryHost::new()
            .with_file("/app/node_modules/lib/index.js", "module.exports = process.env.EVAL;");
        let mut rt = ModuleRuntime::with_host(&options, Rc::new(host)).unwrap();
        assert_eq!(
            rt.require_from("/app/src/a.js", "lib").unwrap(),
            LazyValue::Undefined
        );

        let err = rt
            .evaluate_preval("process.binding('fs');", "/app/b.js")
            .unwrap_err();
        assert_eq!(err.message, "Error: No such module. (Possibly not yet loaded)");
    }

    #[test]
    fn test_async_and_promises() {
        let values = eval(
            r#"
            async function load() { return 'loaded'; }
            const chained = Promise.resolve(2).then((n) => n * 10);
            let caught = '';
            Promise.reject(new Error('bad')).catch((e) => { caught = e.message; });
            (async () => { caught += '!'; })();
            exports.__preval = [typeof load(), chained instanceof Promise, caught];
            "#,
        );
        assert_eq!(values, vec![s("object"), LazyValue::Bool(true), s("bad!")]);
    }

    #[test]
    fn test_jsx_and_json() {
        let values = runtime(MemoryHost::new())
            .evaluate_preval(
                r#"
                const el = <div className="x">hi</div>;
                exports.__preval = [el.type, el.props.className, el.props.children, JSON.stringify({ a: [1, 'b'], c: undefined })];
                "#,
                "/app/src/view.jsx",
            )
            .unwrap()
            .values;
        assert_eq!(values, vec![s("div"), s("x"), s("hi"), s(r#"{"a":[1,"b"]}"#)]);
    }

    #[test]
    fn test_recursion_limit() {
        let err = runtime(MemoryHost::new())
            .evaluate_preval("const f = () => f(); f();", "/app/a.js")
            .unwrap_err();
        assert_eq!(err.message, "RangeError: Maximum call stack size exceeded");
    }

    #[test]
    fn test_const_reassignment_and_tdz() {
        let err = runtime(MemoryHost::new())
            .evaluate_preval("const a = 1; a = 2;", "/app/a.js")
            .unwrap_err();
        assert_eq!(err.message, "TypeError: Assignment to constant variable.");

        let err = runtime(MemoryHost::new())
            .evaluate_preval("b; let b = 1;", "/app/a.js")
            .unwrap_err();
        assert_eq!(err.message, "ReferenceError: Cannot access 'b' before initialization");
    }

    #[test]
    fn test_filesystem_resolution_with_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("vars.js"), "module.exports.gap = 12;").unwrap();
        let entry = src.join("entry.js");

        let mut rt = ModuleRuntime::new(&PrevalOptions::default()).unwrap();
        let values = rt
            .evaluate_preval(
                "exports.__preval = [require('./vars').gap];",
                entry.to_str().unwrap(),
            )
            .unwrap()
            .values;
        assert_eq!(values, vec![num(12.0)]);
    }
}
