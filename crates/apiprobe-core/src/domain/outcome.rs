//! Outcomes, verdicts and failure reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::probe::{Probe, Strategy};

/// Classification of an executed (or unexecuted) probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Response satisfied the contract.
    Pass,

    /// Response received but violated the contract.
    Fail,

    /// Contract-valid but behaviorally suspicious.
    Anomaly,

    /// No response obtained (network, timeout, unreadable bytes).
    TransportError,

    /// Not executed because of cancellation or the run deadline.
    Skipped,
}

impl Verdict {
    pub const ALL: [Verdict; 5] = [
        Verdict::Pass,
        Verdict::Fail,
        Verdict::Anomaly,
        Verdict::TransportError,
        Verdict::Skipped,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Anomaly => "anomaly",
            Verdict::TransportError => "transport_error",
            Verdict::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Why a probe was not executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipCause {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for SkipCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipCause::Cancelled => f.write_str("run cancelled"),
            SkipCause::DeadlineExceeded => f.write_str("run deadline exceeded"),
        }
    }
}

/// The single reason recorded for a non-`Pass` verdict.
///
/// Only the earliest failing check is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Transport { message: String },
    UnacceptedStatus { status: u16 },
    MalformedBody,
    NotAnObject,
    MissingField { field: String },
    NameMismatch { expected: String, actual: String },
    CountryNotSequence,
    InvalidCountryId { index: usize },
    InvalidProbability { index: usize },
    ProbabilityOutOfRange { index: usize, value: f64 },
    EmptyResult,
    ProbabilitySumExceeded { sum: f64, limit: f64 },
    UnsanitizedInput { pattern: String, predictions: usize },
    Skipped { cause: SkipCause },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport { message } => write!(f, "transport failure: {message}"),
            FailureReason::UnacceptedStatus { status } => {
                write!(f, "status {status} not in accepted set")
            }
            FailureReason::MalformedBody => write!(f, "body is not valid JSON"),
            FailureReason::NotAnObject => write!(f, "body is not a JSON object"),
            FailureReason::MissingField { field } => write!(f, "missing field '{field}'"),
            FailureReason::NameMismatch { expected, actual } => {
                write!(f, "name '{actual}' does not echo input '{expected}'")
            }
            FailureReason::CountryNotSequence => write!(f, "'country' is not an array"),
            FailureReason::InvalidCountryId { index } => {
                write!(f, "country[{index}].country_id missing or empty")
            }
            FailureReason::InvalidProbability { index } => {
                write!(f, "country[{index}].probability missing or not numeric")
            }
            FailureReason::ProbabilityOutOfRange { index, value } => {
                write!(f, "country[{index}].probability {value} out of range")
            }
            FailureReason::EmptyResult => write!(f, "empty prediction list not allowed"),
            FailureReason::ProbabilitySumExceeded { sum, limit } => {
                write!(f, "probability sum {sum:.6} exceeds {limit:.6}")
            }
            FailureReason::UnsanitizedInput {
                pattern,
                predictions,
            } => write!(
                f,
                "malicious input ({pattern}) produced {predictions} prediction(s)"
            ),
            FailureReason::Skipped { cause } => write!(f, "skipped: {cause}"),
        }
    }
}

/// The recorded result of executing one probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    pub probe_id: String,

    pub strategy: Strategy,

    /// Submission index within the run.
    pub index: usize,

    /// `None` when no response was obtained.
    pub status_code: Option<u16>,

    /// Wall-clock time of the final attempt in milliseconds.
    pub latency_ms: u64,

    /// Body parsed as JSON, when it parsed.
    pub parsed_body: Option<serde_json::Value>,

    /// Cause of the final transport failure, if any.
    pub transport_error: Option<String>,

    /// Total sends, including the first.
    pub attempts: u32,

    /// Retries used (`attempts - 1`).
    pub retries: u32,

    pub verdict: Verdict,

    pub reason: Option<FailureReason>,
}

impl Outcome {
    /// Outcome for a probe that never ran.
    pub fn skipped(probe: &Probe, index: usize, cause: SkipCause) -> Self {
        Self {
            probe_id: probe.id.clone(),
            strategy: probe.strategy,
            index,
            status_code: None,
            latency_ms: 0,
            parsed_body: None,
            transport_error: None,
            attempts: 0,
            retries: 0,
            verdict: Verdict::Skipped,
            reason: Some(FailureReason::Skipped { cause }),
        }
    }

    /// Whether the verdict is `Pass`.
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}
