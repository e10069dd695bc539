//! Source discovery and batch compilation.
//!
//! Recursively scans a directory for evaluable sources and compiles them in
//! parallel. Each rayon worker owns one [`ModuleRuntime`]; runtimes are never
//! shared across threads.

use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::css::LightningCssModules;
use crate::error::StyleError;
use crate::options::{CompiledRules, PrevalOptions};
use crate::pass::{transform_with, PassOutput};
use crate::sandbox::ModuleRuntime;

/// Worker stack size. The interpreter recurses once per nested JS call.
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// All evaluable files under `dir`, sorted. `node_modules` and dot-directories
/// are skipped; a missing directory yields nothing.
pub fn discover_sources(dir: &Path, options: &PrevalOptions) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
        .filter(|path| {
            // JSON is only ever required, never compiled.
            path.extension().is_some_and(|ext| ext != "json")
                && options.is_evaluable(&path.to_string_lossy())
        })
        .collect();
    files.sort();
    files
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == "node_modules" || name.starts_with('.')
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH COMPILATION
// ═══════════════════════════════════════════════════════════════════════════════

/// One file's outcome in a batch.
#[derive(Debug)]
pub struct CompiledFile {
    pub path: PathBuf,
    pub result: Result<PassOutput, StyleError>,
}

/// Serializable summary of a batch, for the build host.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub compiled: usize,
    pub unchanged: usize,
    pub failed: Vec<String>,
}

impl BatchSummary {
    pub fn of(files: &[CompiledFile]) -> Self {
        let mut summary = BatchSummary::default();
        for file in files {
            match &file.result {
                Ok(output) if output.artifact.is_empty() => summary.unchanged += 1,
                Ok(_) => summary.compiled += 1,
                Err(_) => summary.failed.push(file.path.to_string_lossy().to_string()),
            }
        }
        summary
    }
}

/// Read and compile `files` in parallel. Results come back in input order.
/// Fails only when the options themselves are unusable.
pub fn compile_all(
    files: &[PathBuf],
    options: &PrevalOptions,
) -> Result<Vec<CompiledFile>, StyleError> {
    CompiledRules::new(&options.rules).map_err(|err| StyleError::Options(err.to_string()))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .stack_size(WORKER_STACK_SIZE)
        .build()
        .map_err(|err| StyleError::Options(err.to_string()))?;

    let compiled = pool.install(|| {
        files
            .par_iter()
            .map_init(
                || ModuleRuntime::new(options),
                |runtime, path| CompiledFile {
                    path: path.clone(),
                    result: match runtime {
                        Ok(runtime) => compile_file(path, options, runtime),
                        Err(err) => Err(StyleError::Options(err.to_string())),
                    },
                },
            )
            .collect::<Vec<_>>()
    });

    debug!(files = compiled.len(), "compiled batch");
    Ok(compiled)
}

fn compile_file(
    path: &Path,
    options: &PrevalOptions,
    runtime: &mut ModuleRuntime,
) -> Result<PassOutput, StyleError> {
    let filename = path.to_string_lossy();
    let source = fs::read_to_string(path).map_err(|source| StyleError::Io {
        path: filename.to_string(),
        source,
    })?;
    let result = transform_with(&source, &filename, options, runtime, &LightningCssModules);
    if let Err(err) = &result {
        warn!(file = %filename, "failed to compile styles: {}", err);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_discovery_skips_dependencies_and_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/b.tsx", "");
        write(root, "src/a.ts", "");
        write(root, "src/data.json", "{}");
        write(root, "src/readme.md", "");
        write(root, "node_modules/lib/index.js", "");
        write(root, ".cache/x.js", "");

        let found: Vec<String> = discover_sources(root, &PrevalOptions::default())
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(found, vec!["src/a.ts".to_string(), "src/b.tsx".to_string()]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        assert!(discover_sources(Path::new("/definitely/not/here"), &PrevalOptions::default())
            .is_empty());
    }

    #[test]
    fn test_compile_all_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "theme.js", "module.exports = { fg: '#000' };");
        write(
            root,
            "a.tsx",
            "import theme from './theme';\nexport const s = css`.a { color: ${theme.fg}; }`;",
        );
        write(root, "b.ts", "export const n: number = 1;");
        write(root, "c.tsx", "export const s = css`.c { color: ${missing.value}; }`;");

        let files = discover_sources(root, &PrevalOptions::default());
        let compiled = compile_all(&files, &PrevalOptions::default()).unwrap();
        let names: Vec<_> = compiled
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.tsx", "b.ts", "c.tsx", "theme.js"]);

        let a = compiled[0].result.as_ref().unwrap();
        assert!(a.artifact.css_text.contains("color: #000"));
        assert!(compiled[2].result.is_err());

        let summary = BatchSummary::of(&compiled);
        assert_eq!(summary.compiled, 1);
        assert_eq!(summary.unchanged, 2);
        assert_eq!(summary.failed.len(), 1);
    }

    #[test]
    fn test_invalid_rule_is_an_options_error() {
        let mut options = PrevalOptions::default();
        options.rules[0].test = Some("(".to_string());
        let err = compile_all(&[], &options).unwrap_err();
        assert!(matches!(err, StyleError::Options(_)));
    }
}
