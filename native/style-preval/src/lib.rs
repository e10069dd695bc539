//! # style-preval
//!
//! Build-time evaluation of `css` tagged templates.
//!
//! A pass over one file:
//!
//! 1. **Collect** every template tagged with the marker identifier.
//! 2. **Classify** each interpolation as a folded constant, a function, or a
//!    lazy expression that needs executing.
//! 3. **Hoist** the bindings lazy expressions depend on out of their enclosing
//!    functions, on a working copy of the tree.
//! 4. **Synthesize** one program exporting a wrapped thunk per lazy
//!    expression and run it in the **sandbox**, a module runtime with a
//!    restricted global surface and its own resolver and caches.
//! 5. **Assemble** each occurrence's CSS, hash its classes, and replace the
//!    occurrence with `{ ...classes, link }`.
//!
//! The output is the rewritten source plus a [`StyleArtifact`] with the
//! class map and CSS text for the bundler.

#[cfg(feature = "napi")]
use napi_derive::napi;

pub mod assemble;
pub mod ast;
pub mod cache;
pub mod classify;
pub mod collect;
pub mod css;
pub mod discovery;
pub mod error;
pub mod hoist;
pub mod lower;
pub mod options;
pub mod pass;
pub mod printer;
pub mod sandbox;
pub mod scope;
pub mod synth;
pub mod visit;

#[cfg(test)]
mod pipeline_tests;

pub use assemble::{replacement_code, ValueCache, LINK_KEY};
pub use css::{ClassHasher, LightningCssModules, ScopedCss, StyleArtifact};
pub use discovery::{compile_all, discover_sources, BatchSummary, CompiledFile};
pub use error::{HashingError, SourceLocation, StyleError};
pub use lower::{parse_module, ParsedModule};
pub use options::{EvalRule, PrevalOptions, RuleAction};
pub use pass::{transform, transform_with, PassOutput, StylePass};
pub use sandbox::{EvalFailure, Evaluator, LazyValue, ModuleRuntime, PrevalOutcome};

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
fn options_from(options_json: Option<String>) -> napi::Result<PrevalOptions> {
    match options_json {
        Some(json) => PrevalOptions::from_json(&json)
            .map_err(|e| napi::Error::from_reason(format!("Invalid options: {}", e))),
        None => Ok(PrevalOptions::default()),
    }
}

/// `{ code, css: { classMap, cssText }, dependencies }` for one file.
#[cfg(feature = "napi")]
#[napi]
pub fn transform_styles_native(
    code: String,
    filename: String,
    options_json: Option<String>,
) -> napi::Result<serde_json::Value> {
    let options = options_from(options_json)?;
    let output =
        transform(&code, &filename, &options).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    Ok(serde_json::json!({
        "code": output.code,
        "css": output.artifact,
        "dependencies": output.dependencies,
    }))
}

/// Compile every source under `base_dir` and summarize the batch.
#[cfg(feature = "napi")]
#[napi]
pub fn compile_dir_native(
    base_dir: String,
    options_json: Option<String>,
) -> napi::Result<serde_json::Value> {
    let options = options_from(options_json)?;
    let files = discover_sources(std::path::Path::new(&base_dir), &options);
    let compiled =
        compile_all(&files, &options).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    serde_json::to_value(BatchSummary::of(&compiled))
        .map_err(|e| napi::Error::from_reason(format!("Serialize error: {}", e)))
}
