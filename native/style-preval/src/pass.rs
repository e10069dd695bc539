//! Per-file compilation pass.
//!
//! collect → classify → hoist/synthesize → evaluate → assemble/hash → rewrite.
//! The phases run strictly in order on one thread. Everything a pass owns
//! (hoister, value cache, dedup set) is created fresh for each file; the
//! evaluator is borrowed and cleared at both ends of the pass.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error};

use crate::assemble::{replacement_expr, splice, Assembler, ValueCache};
use crate::ast::{Expr, Span};
use crate::classify::{Classification, Classified, Classifier};
use crate::collect::{collect_occurrences, Occurrence};
use crate::css::{ClassHasher, LightningCssModules, StyleArtifact};
use crate::error::StyleError;
use crate::hoist::Hoister;
use crate::lower::{contains_tagged_template, parse_module, ParsedModule};
use crate::options::PrevalOptions;
use crate::printer::print_expr;
use crate::sandbox::{Evaluator, ModuleRuntime};
use crate::scope::ScopeAnalysis;
use crate::synth::synthesize;
use crate::visit::with_expr_mut;

/// What a pass hands back to the build host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutput {
    /// Source text with every occurrence replaced.
    pub code: String,
    pub artifact: StyleArtifact,
    /// Specifiers required by each module during evaluation.
    pub dependencies: BTreeMap<String, Vec<String>>,
}

pub struct StylePass<'a> {
    options: &'a PrevalOptions,
    evaluator: &'a mut dyn Evaluator,
    hasher: &'a dyn ClassHasher,
    processed: HashSet<Span>,
}

/// An occurrence with its interpolations classified.
type Prepared = (Occurrence, Vec<Classified>);

impl<'a> StylePass<'a> {
    pub fn new(
        options: &'a PrevalOptions,
        evaluator: &'a mut dyn Evaluator,
        hasher: &'a dyn ClassHasher,
    ) -> Self {
        Self {
            options,
            evaluator,
            hasher,
            processed: HashSet::new(),
        }
    }

    /// Run the pass over `module`, rewriting its tree in place.
    pub fn run(&mut self, module: &mut ParsedModule) -> Result<PassOutput, StyleError> {
        self.processed.clear();
        self.evaluator.reset();
        let result = self.run_phases(module);
        self.evaluator.reset();
        result
    }

    fn run_phases(&mut self, module: &mut ParsedModule) -> Result<PassOutput, StyleError> {
        let occurrences = collect_occurrences(module, &self.options.tag);
        if occurrences.is_empty() {
            return Ok(PassOutput {
                code: module.source.clone(),
                ..PassOutput::default()
            });
        }

        let prepared = self.classify(module, occurrences)?;
        let (values, dependencies) = self.evaluate(module, &prepared);
        let (artifact, replacements) = self.assemble_all(module, &prepared, &values)?;

        Ok(PassOutput {
            code: splice(&module.source, &replacements),
            artifact,
            dependencies,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PHASES
    // ═══════════════════════════════════════════════════════════════════════════

    fn classify(
        &self,
        module: &ParsedModule,
        occurrences: Vec<Occurrence>,
    ) -> Result<Vec<Prepared>, StyleError> {
        let analysis = ScopeAnalysis::new(&module.program);
        let classifier = Classifier::new(module, &analysis);
        let mut prepared = Vec::with_capacity(occurrences.len());
        let mut errors = Vec::new();

        for occurrence in occurrences {
            match classifier.classify(&occurrence) {
                Ok(classified) => prepared.push((occurrence, classified)),
                Err(err) => errors.push(err),
            }
        }

        match StyleError::from_many(errors) {
            Some(err) => Err(err),
            None => Ok(prepared),
        }
    }

    /// Hoist every lazy interpolation, run the batch program once and key
    /// the results by original expression.
    fn evaluate(
        &mut self,
        module: &ParsedModule,
        prepared: &[Prepared],
    ) -> (ValueCache, BTreeMap<String, Vec<String>>) {
        let lazy: Vec<&Expr> = prepared
            .iter()
            .flat_map(|(_, classified)| classified.iter())
            .filter(|item| item.kind == Classification::Lazy)
            .map(|item| &item.expr)
            .collect();

        debug!(
            file = %module.filename,
            occurrences = prepared.len(),
            lazy = lazy.len(),
            "classified style interpolations"
        );

        if lazy.is_empty() {
            return (ValueCache::new(), BTreeMap::new());
        }

        let mut hoister = Hoister::new(&module.program);
        let hoisted: Vec<Expr> = lazy.iter().map(|expr| hoister.hoist(expr)).collect();
        let spans: Vec<Span> = lazy.iter().map(|expr| expr.span()).collect();
        let occurrence_spans: Vec<Span> = prepared.iter().map(|(occ, _)| occ.span).collect();

        let synthesized = synthesize(
            hoister.into_program(),
            &hoisted,
            &occurrence_spans,
            &self.options.tag,
            &module.source,
        );
        debug!(
            file = %module.filename,
            wrapper = %synthesized.wrapper_name,
            bytes = synthesized.code.len(),
            "synthesized evaluation program"
        );

        match self
            .evaluator
            .evaluate_preval(&synthesized.code, &module.filename)
        {
            Ok(outcome) => (
                ValueCache::from_batch(&spans, outcome.values),
                outcome.dependencies,
            ),
            Err(failure) => {
                error!(
                    file = %module.filename,
                    stack = failure.stack.as_deref().unwrap_or(""),
                    "Error evaluating: {}",
                    failure.message
                );
                (ValueCache::failed(failure), BTreeMap::new())
            }
        }
    }

    /// Assemble, hash and replace each occurrence once. Returns the merged
    /// artifact and the source splices.
    pub(crate) fn assemble_all(
        &mut self,
        module: &mut ParsedModule,
        prepared: &[Prepared],
        values: &ValueCache,
    ) -> Result<(StyleArtifact, Vec<(Span, String)>), StyleError> {
        let mut artifact = StyleArtifact::default();
        let mut replacements = Vec::new();
        let mut rewrites = Vec::new();
        let mut errors = Vec::new();

        {
            let assembler = Assembler::new(module, values);
            for (occurrence, classified) in prepared {
                if !self.processed.insert(occurrence.span) {
                    continue;
                }
                let text = match assembler.assemble(occurrence, classified) {
                    Ok(text) => text,
                    Err(err) => {
                        errors.push(err);
                        continue;
                    }
                };
                match self.hasher.hash_classes(&text, &module.filename) {
                    Ok(scoped) => {
                        let replacement = replacement_expr(&scoped.class_map, self.options);
                        replacements.push((occurrence.span, print_expr(&replacement, None)));
                        rewrites.push((occurrence.span, replacement));
                        artifact.merge(scoped);
                    }
                    Err(err) => errors.push(err.into()),
                }
            }
        }

        if let Some(err) = StyleError::from_many(errors) {
            return Err(err);
        }

        for (span, replacement) in rewrites {
            with_expr_mut(&mut module.program, span, |expr| *expr = replacement);
        }
        debug!(
            file = %module.filename,
            classes = artifact.class_map.len(),
            "assembled style occurrences"
        );
        Ok((artifact, replacements))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Compile one file with a fresh runtime and the default class hasher.
pub fn transform(
    source: &str,
    filename: &str,
    options: &PrevalOptions,
) -> Result<PassOutput, StyleError> {
    let mut runtime =
        ModuleRuntime::new(options).map_err(|err| StyleError::Options(err.to_string()))?;
    transform_with(source, filename, options, &mut runtime, &LightningCssModules)
}

/// Compile one file with caller-supplied capabilities. Files without the
/// marker are returned untouched without being lowered.
pub fn transform_with(
    source: &str,
    filename: &str,
    options: &PrevalOptions,
    evaluator: &mut dyn Evaluator,
    hasher: &dyn ClassHasher,
) -> Result<PassOutput, StyleError> {
    if !contains_tagged_template(source, filename, &options.tag) {
        return Ok(PassOutput {
            code: source.to_string(),
            ..PassOutput::default()
        });
    }
    let mut module = parse_module(source, filename)?;
    StylePass::new(options, evaluator, hasher).run(&mut module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::ScopedCss;
    use crate::error::HashingError;
    use crate::sandbox::{EvalFailure, LazyValue, PrevalOutcome};
    use std::cell::Cell;

    /// Returns canned values and counts calls.
    #[derive(Default)]
    struct FakeEvaluator {
        values: Vec<LazyValue>,
        fail: Option<String>,
        calls: usize,
        resets: usize,
        last_code: String,
    }

    impl Evaluator for FakeEvaluator {
        fn evaluate_preval(
            &mut self,
            code: &str,
            _filename: &str,
        ) -> Result<PrevalOutcome, EvalFailure> {
            self.calls += 1;
            self.last_code = code.to_string();
            if let Some(message) = &self.fail {
                return Err(EvalFailure {
                    message: message.clone(),
                    stack: Some(format!("{}\n    at /src/a.tsx", message)),
                });
            }
            Ok(PrevalOutcome {
                values: self.values.clone(),
                dependencies: BTreeMap::new(),
            })
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    /// `.x` → `h_x`, counting calls.
    #[derive(Default)]
    struct PrefixHasher {
        calls: Cell<usize>,
    }

    impl ClassHasher for PrefixHasher {
        fn hash_classes(&self, css: &str, _file: &str) -> Result<ScopedCss, HashingError> {
            self.calls.set(self.calls.get() + 1);
            let class_map = css
                .split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '-'))
                .filter_map(|word| word.strip_prefix('.'))
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_string(), format!("h_{}", name)))
                .collect();
            Ok(ScopedCss {
                class_map,
                css: css.replace('.', ".h_"),
            })
        }
    }

    #[test]
    fn test_constant_only_file_never_evaluates() {
        let options = PrevalOptions::default();
        let mut evaluator = FakeEvaluator::default();
        let hasher = PrefixHasher::default();
        let src = "export const s = css`.a { width: ${1 + 2}px; }`;";

        let out = transform_with(src, "/src/a.tsx", &options, &mut evaluator, &hasher).unwrap();
        assert_eq!(evaluator.calls, 0);
        assert_eq!(evaluator.resets, 2);
        assert_eq!(out.artifact.css_text, ".h_a { width: 3px; }");
        assert!(out.code.starts_with("export const s = { a: \"h_a\", link: function(props) {"));
    }

    #[test]
    fn test_lazy_values_are_batched_once() {
        let options = PrevalOptions::default();
        let mut evaluator = FakeEvaluator {
            values: vec![LazyValue::Str("red".into()), LazyValue::Num(4.0)],
            ..FakeEvaluator::default()
        };
        let hasher = PrefixHasher::default();
        let src = "const a = css`.a { color: ${theme.fg}; }`;\nconst b = css`.b { margin: ${theme.gap}px; }`;";

        let out = transform_with(src, "/src/a.tsx", &options, &mut evaluator, &hasher).unwrap();
        assert_eq!(evaluator.calls, 1);
        assert!(evaluator
            .last_code
            .contains("exports.__preval = [_wrap(() => theme.fg), _wrap(() => theme.gap)];"));
        assert_eq!(
            out.artifact.css_text,
            ".h_a { color: red; }\n.h_b { margin: 4px; }"
        );
        assert_eq!(out.artifact.class_map.len(), 2);
    }

    #[test]
    fn test_batch_failure_surfaces_at_lazy_sites() {
        let options = PrevalOptions::default();
        let mut evaluator = FakeEvaluator {
            fail: Some("ReferenceError: theme is not defined".into()),
            ..FakeEvaluator::default()
        };
        let hasher = PrefixHasher::default();
        let src = "const a = css`.a { color: ${theme.fg}; }`;\nconst b = css`.b {}`;";

        let err = transform_with(src, "/src/a.tsx", &options, &mut evaluator, &hasher).unwrap_err();
        match err {
            StyleError::EvaluationFailure {
                message, location, ..
            } => {
                assert_eq!(message, "ReferenceError: theme is not defined");
                assert_eq!(location.line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(evaluator.resets, 2);
    }

    #[test]
    fn test_occurrence_assembled_once() {
        let options = PrevalOptions::default();
        let mut evaluator = FakeEvaluator::default();
        let hasher = PrefixHasher::default();
        let src = "const a = css`.a {}`;";
        let mut module = parse_module(src, "/src/a.tsx").unwrap();
        let analysis = ScopeAnalysis::new(&module.program);
        let occurrence = collect_occurrences(&module, "css").remove(0);
        let classified = Classifier::new(&module, &analysis)
            .classify(&occurrence)
            .unwrap();
        let prepared = vec![
            (occurrence.clone(), classified.clone()),
            (occurrence, classified),
        ];

        let mut pass = StylePass::new(&options, &mut evaluator, &hasher);
        let (artifact, replacements) = pass
            .assemble_all(&mut module, &prepared, &ValueCache::new())
            .unwrap();
        assert_eq!(hasher.calls.get(), 1);
        assert_eq!(replacements.len(), 1);
        assert_eq!(artifact.css_text, ".h_a {}");
    }

    #[test]
    fn test_file_without_marker_is_untouched() {
        let options = PrevalOptions::default();
        let mut evaluator = FakeEvaluator::default();
        let src = "const x: number = 1; styles.css`.a {}`;";
        let out = transform_with(
            src,
            "/src/a.ts",
            &options,
            &mut evaluator,
            &PrefixHasher::default(),
        )
        .unwrap();
        assert_eq!(out.code, src);
        assert!(out.artifact.is_empty());
        assert_eq!(evaluator.resets, 0);
    }

    #[test]
    fn test_tree_is_rewritten() {
        let options = PrevalOptions::default();
        let mut evaluator = FakeEvaluator::default();
        let hasher = PrefixHasher::default();
        let mut module = parse_module("const a = css`.a {}`;", "/src/a.tsx").unwrap();
        StylePass::new(&options, &mut evaluator, &hasher)
            .run(&mut module)
            .unwrap();
        assert!(collect_occurrences(&module, "css").is_empty());
    }
}
