//! Class hashing and the per-file style artifact.
//!
//! The hasher is a capability handed to the pass. [`LightningCssModules`]
//! scopes class names with lightningcss CSS modules; its hashes depend only
//! on the CSS text.

use lightningcss::css_modules::{Config, CssModuleReference, Pattern};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::compute_hash;
use crate::error::HashingError;

/// Scoped CSS plus the local → scoped class name map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopedCss {
    pub class_map: BTreeMap<String, String>,
    pub css: String,
}

pub trait ClassHasher {
    fn hash_classes(&self, css: &str, file: &str) -> Result<ScopedCss, HashingError>;
}

/// CSS modules via lightningcss, `[hash]_[local]` naming.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightningCssModules;

const CLASS_PATTERN: &str = "[hash]_[local]";

impl ClassHasher for LightningCssModules {
    fn hash_classes(&self, css: &str, file: &str) -> Result<ScopedCss, HashingError> {
        let fail = |message: String| HashingError {
            file: file.to_string(),
            message,
        };

        let pattern = Pattern::parse(CLASS_PATTERN).map_err(|err| fail(err.to_string()))?;
        let options = ParserOptions {
            // The nominal filename feeds the hash, so derive it from the text.
            filename: compute_hash(css),
            css_modules: Some(Config {
                pattern,
                ..Config::default()
            }),
            ..ParserOptions::default()
        };

        let stylesheet = StyleSheet::parse(css, options).map_err(|err| fail(err.to_string()))?;
        let printed = stylesheet
            .to_css(PrinterOptions::default())
            .map_err(|err| fail(err.to_string()))?;

        let mut class_map = BTreeMap::new();
        for (local, export) in printed.exports.unwrap_or_default() {
            let mut names = vec![export.name];
            for reference in export.composes {
                match reference {
                    CssModuleReference::Local { name } | CssModuleReference::Global { name } => {
                        names.push(name)
                    }
                    CssModuleReference::Dependency { .. } => {}
                }
            }
            class_map.insert(local, names.join(" "));
        }

        tracing::debug!(file, classes = class_map.len(), "hashed classes");
        Ok(ScopedCss {
            class_map,
            css: printed.code,
        })
    }
}

/// Everything a file's pass produced for the stylesheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleArtifact {
    pub class_map: BTreeMap<String, String>,
    pub css_text: String,
}

impl StyleArtifact {
    pub fn is_empty(&self) -> bool {
        self.class_map.is_empty() && self.css_text.is_empty()
    }

    /// Fold one occurrence's output into the file's artifact.
    pub fn merge(&mut self, scoped: ScopedCss) {
        self.class_map.extend(scoped.class_map);
        if scoped.css.is_empty() {
            return;
        }
        if !self.css_text.is_empty() {
            self.css_text.push('\n');
        }
        self.css_text.push_str(&scoped.css);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashes_depend_only_on_text() {
        let hasher = LightningCssModules;
        let a = hasher.hash_classes(".a { color: red; }", "/src/one.tsx").unwrap();
        let b = hasher.hash_classes(".a { color: red; }", "/src/two.tsx").unwrap();
        let c = hasher.hash_classes(".a { color: blue; }", "/src/one.tsx").unwrap();

        assert_eq!(a, b);
        let scoped = &a.class_map["a"];
        assert!(scoped.ends_with("_a"));
        assert_ne!(scoped, &c.class_map["a"]);
        assert!(a.css.contains(scoped.as_str()));
    }

    #[test]
    fn test_class_map_is_sorted() {
        let scoped = LightningCssModules
            .hash_classes(".zeta { top: 0 } .alpha { left: 0 }", "x.tsx")
            .unwrap();
        let keys: Vec<_> = scoped.class_map.keys().cloned().collect();
        assert_eq!(keys, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_malformed_css_is_a_hashing_error() {
        let err = LightningCssModules
            .hash_classes("..broken { color: red }", "/src/bad.tsx")
            .unwrap_err();
        assert_eq!(err.file, "/src/bad.tsx");
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_artifact_merge_and_serde() {
        let mut artifact = StyleArtifact::default();
        assert!(artifact.is_empty());
        artifact.merge(ScopedCss {
            class_map: BTreeMap::from([("a".to_string(), "h1_a".to_string())]),
            css: ".h1_a{}".into(),
        });
        artifact.merge(ScopedCss {
            class_map: BTreeMap::from([("b".to_string(), "h2_b".to_string())]),
            css: ".h2_b{}".into(),
        });
        assert_eq!(artifact.css_text, ".h1_a{}\n.h2_b{}");
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["classMap"]["b"], "h2_b");
        assert_eq!(json["cssText"], ".h1_a{}\n.h2_b{}");
    }
}
