//! Settings error types.

use std::path::PathBuf;

/// Errors raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings at {path}: {source}")]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON or does not match the schema.
    #[error("invalid settings at {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// An environment override held a value of the wrong type.
    #[error("invalid value for {var}: {value}")]
    InvalidEnv {
        /// Environment variable name.
        var: String,
        /// Offending value.
        value: String,
    },
}

/// Convenience alias for settings results.
pub type Result<T> = std::result::Result<T, SettingsError>;
