//! Error types for simreg-runner

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while cataloguing, running or verifying tests
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or conflicting test definitions (aborts before simulation)
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// NaN, length mismatch or non-monotonic time data
    #[error("Interpolation error: {0}")]
    Interpolation(String),

    /// Malformed reference file or statistics feed
    #[error("Parse error in {}: {reason}", path.display())]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A worker slot exceeded its deadline
    #[error("Slot {slot} timed out after {timeout_ms}ms")]
    Timeout {
        /// Slot index
        slot: usize,
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// Sandbox creation or population failed
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// Invalid library layout
    #[error("Invalid library: {0}")]
    InvalidLibrary(String),

    /// Invalid runner configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required result series could not be located
    #[error("Variable {variable} not found in {}", path.display())]
    MissingVariable {
        /// Result container
        path: PathBuf,
        /// Requested variable
        variable: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Text formatting error
    #[error("Format error: {0}")]
    Fmt(#[from] std::fmt::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Directory walk error
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl Error {
    /// Build a parse error for `path`
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
