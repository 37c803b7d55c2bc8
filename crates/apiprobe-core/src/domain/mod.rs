//! Domain models for apiprobe.
//!
//! Canonical definitions for the core entities:
//! - `Probe`: one request plus the contract its response must meet
//! - `Outcome`: the recorded result of executing a probe
//! - `Verdict` / `FailureReason`: classification of an outcome

pub mod error;
pub mod outcome;
pub mod probe;

pub use error::{HarnessError, Result};
pub use outcome::{FailureReason, Outcome, SkipCause, Verdict};
pub use probe::{
    dedupe_ids, preview, probe_id, Expectation, FuzzCategory, FuzzOrigin, Probe,
    ProbabilityRange, StatusMatcher, Strategy, PROBABILITY_SUM_EPSILON,
};
