//! Harness-level error taxonomy.
//!
//! Probe-level problems (bad status, malformed body, network failures) are
//! never errors: they become verdicts on an `Outcome`. The variants here are
//! reserved for coordinator misconfiguration and collaborator failures.

use apiprobe_store::StoreError;

/// apiprobe harness errors.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("no strategies requested")]
    EmptyStrategySet,

    #[error("duplicate probe id in run: {0}")]
    DuplicateProbeId(String),

    #[error("invalid harness configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("unknown fuzz category: {0}")]
    UnknownFuzzCategory(String),

    #[error("baseline store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
