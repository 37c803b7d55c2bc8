//! Error types for apiprobe-store

use thiserror::Error;

/// Errors that can occur in the baseline persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Baseline file could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Baseline file contents are not valid JSON
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Baseline record failed a structural check
    #[error("Invalid baseline for probe '{probe_id}': {reason}")]
    InvalidBaseline { probe_id: String, reason: String },
}

/// Result type for baseline store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
