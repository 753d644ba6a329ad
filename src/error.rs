use std::io;

use thiserror::Error;

/// Error type for batch execution and reconciliation.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Malformed sweep specification, fatal before any job runs
    #[error("configuration error: {0}")]
    Config(String),

    /// A template placeholder had no entry in the parameter mapping
    #[error("unresolved placeholder '{placeholder}' in template")]
    Template {
        /// Placeholder name as written in the template
        placeholder: String,
    },

    /// Parameter keys from the correlation log are missing from the result table
    #[error("key columns not found in result data: {0}")]
    KeyMismatch(String),

    /// Telemetry CSV does not have the expected shape
    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;
