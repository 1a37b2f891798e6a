//! Error and warning types for the converter.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::parser::ParseError;

/// Converter error.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing template: {0}")]
    Parse(#[from] ParseError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A function was invoked in a position where no mapping exists.
    /// `gated` is set when a `core_funcs` restriction suppressed an
    /// otherwise-known function.
    #[error("unsupported pipeline function: {name}{}", gated_suffix(.gated))]
    UnsupportedFunction { name: String, gated: bool },

    #[error("{func} requires {want} argument(s), got {got}")]
    ArityMismatch {
        func: String,
        want: String,
        got: usize,
    },

    /// An AST node form the converter does not recognize, or a construct
    /// with no static CUE equivalent.
    #[error("{0}")]
    UnsupportedConstruct(String),

    /// Emitted CUE failed the parse check.
    #[error("generated invalid CUE: {0}")]
    InvalidOutput(String),

    /// Two different bodies for one helper name.
    #[error("conflicting definitions for template {0:?}")]
    ConflictingHelper(String),

    /// Caller-side input problems: empty template, malformed Chart.yaml.
    #[error("{0}")]
    Input(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),
}

fn gated_suffix(gated: &bool) -> &'static str {
    if *gated {
        " (not a text/template builtin)"
    } else {
        ""
    }
}

impl ConvertError {
    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        ConvertError::UnsupportedConstruct(msg.into())
    }

    pub(crate) fn arity(func: &str, want: impl fmt::Display, got: usize) -> Self {
        ConvertError::ArityMismatch {
            func: func.to_string(),
            want: want.to_string(),
            got,
        }
    }
}

/// A per-template warning emitted during chart conversion. One line,
/// suitable for a warning log.
#[derive(Debug, Clone)]
pub struct ConversionWarning {
    /// Template file name (or helper name) the warning refers to.
    pub template: String,
    /// Human-readable message.
    pub message: String,
}

impl ConversionWarning {
    pub fn new(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConversionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipping {}: {}", self.template, self.message)
    }
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_function_display() {
        let err = ConvertError::UnsupportedFunction {
            name: "lookup".into(),
            gated: false,
        };
        assert_eq!(err.to_string(), "unsupported pipeline function: lookup");

        let err = ConvertError::UnsupportedFunction {
            name: "ternary".into(),
            gated: true,
        };
        assert_eq!(
            err.to_string(),
            "unsupported pipeline function: ternary (not a text/template builtin)"
        );
    }

    #[test]
    fn arity_mismatch_display() {
        let err = ConvertError::arity("default", 2, 3);
        assert_eq!(err.to_string(), "default requires 2 argument(s), got 3");
    }

    #[test]
    fn warning_display() {
        let w = ConversionWarning::new("deployment.yaml", "bad input");
        assert_eq!(w.to_string(), "skipping deployment.yaml: bad input");
    }
}
