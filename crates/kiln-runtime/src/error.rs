//! Load-time and invocation-time errors.

use std::path::PathBuf;
use std::time::Duration;

use kiln_core::HandlerContract;
use thiserror::Error;

/// Result type alias for module loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors that prevent a module from being served at all.
///
/// These are configuration errors: reported once, at load, never retried.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module `{module}` exposes no recognized entry point (expected {expected})")]
    NoRecognizedEntryPoint { module: String, expected: String },

    #[error("module `{module}` failed to evaluate: {message}")]
    ScriptSyntaxOrReference { module: String, message: String },

    #[error("failed to read module from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("script engine error: {0}")]
    Engine(String),
}

impl LoadError {
    pub(crate) fn no_entry_point(module: &str, wanted: &[HandlerContract]) -> Self {
        let expected = wanted
            .iter()
            .map(|c| format!("`{}`", c.entry_name()))
            .collect::<Vec<_>>()
            .join(", ");
        LoadError::NoRecognizedEntryPoint {
            module: module.to_string(),
            expected,
        }
    }
}

/// Why an invocation did not complete.
///
/// Recovered at the invocation boundary and turned into a 500 response;
/// the message is for logs only.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("handler raised: {0}")]
    HandlerException(String),

    #[error("handler did not settle within {0:?}")]
    Timeout(Duration),

    #[error("script engine error: {0}")]
    Engine(String),
}
