//! Error kinds surfaced by a style pass.
//!
//! Every kind that points at user source carries the file and a 1-based
//! line/column so the build host can print it without re-reading the file.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    /// Compute a 1-based location from a byte offset into `source`.
    pub fn from_offset(source: &str, offset: u32) -> Self {
        let offset = (offset as usize).min(source.len());
        let mut line = 1;
        let mut column = 1;
        for (idx, ch) in source.char_indices() {
            if idx >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        SourceLocation { line, column }
    }

    pub fn of_span(source: &str, span: Span) -> Self {
        if span.is_synthetic() {
            return SourceLocation { line: 0, column: 0 };
        }
        Self::from_offset(source, span.start)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Failure reported by the class-hashing transform.
#[derive(Debug, Clone, Error)]
#[error("Failed to hash classes in {file}: {message}")]
pub struct HashingError {
    pub file: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum StyleError {
    #[error("{file}:{location}: {message}")]
    Parse {
        file: String,
        location: SourceLocation,
        message: String,
    },

    #[error("{file}:{location}: unsupported expression in style template ({what})")]
    UnsupportedExpression {
        file: String,
        location: SourceLocation,
        what: String,
    },

    #[error("{file}:{location}: failed to evaluate style expressions: {message}\n{stack}")]
    EvaluationFailure {
        file: String,
        location: SourceLocation,
        message: String,
        stack: String,
    },

    #[error("{file}:{location}: The expression '{expression}' cannot be evaluated: {reason}")]
    UnresolvableValue {
        file: String,
        location: SourceLocation,
        expression: String,
        reason: String,
    },

    #[error(transparent)]
    ClassHashing(#[from] HashingError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid options: {0}")]
    Options(String),

    #[error("{}", render_aggregate(.0))]
    Aggregate(Vec<StyleError>),
}

fn render_aggregate(errors: &[StyleError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl StyleError {
    /// Collapse a list of errors: one stays itself, several aggregate.
    pub fn from_many(mut errors: Vec<StyleError>) -> Option<StyleError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(StyleError::Aggregate(errors)),
        }
    }

    /// Flattened view over aggregated errors.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &StyleError> + '_> {
        match self {
            StyleError::Aggregate(errors) => Box::new(errors.iter().flat_map(|e| e.iter())),
            other => Box::new(std::iter::once(other)),
        }
    }

    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            StyleError::Parse { location, .. }
            | StyleError::UnsupportedExpression { location, .. }
            | StyleError::EvaluationFailure { location, .. }
            | StyleError::UnresolvableValue { location, .. } => Some(*location),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_from_offset() {
        let src = "const a = 1;\nconst b = css`x`;";
        assert_eq!(
            SourceLocation::from_offset(src, 0),
            SourceLocation { line: 1, column: 1 }
        );
        let offset = src.find("css").unwrap() as u32;
        assert_eq!(
            SourceLocation::from_offset(src, offset),
            SourceLocation { line: 2, column: 11 }
        );
    }

    #[test]
    fn test_aggregate_flattens() {
        let err = |what: &str| StyleError::UnsupportedExpression {
            file: "a.tsx".into(),
            location: SourceLocation { line: 1, column: 1 },
            what: what.into(),
        };
        let combined = StyleError::from_many(vec![err("x"), err("y")]).unwrap();
        assert_eq!(combined.iter().count(), 2);
        assert!(combined.to_string().contains("(x)"));
        assert!(combined.to_string().contains("(y)"));

        let single = StyleError::from_many(vec![err("z")]).unwrap();
        assert!(matches!(single, StyleError::UnsupportedExpression { .. }));
        assert!(StyleError::from_many(vec![]).is_none());
    }

    #[test]
    fn test_hashing_error_is_transparent() {
        let err: StyleError = HashingError {
            file: "x.css".into(),
            message: "Unexpected token".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Failed to hash classes in x.css: Unexpected token"
        );
    }
}
