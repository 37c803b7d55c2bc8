//! Probe definitions and expectation contracts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use super::error::HarnessError;

/// Testing strategy a probe belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Ordinary names, strict shape checks.
    Functional,

    /// Name variations compared against each other (case folding).
    Integration,

    /// Stable names compared against a stored baseline.
    Regression,

    /// Known attack payloads; non-empty predictions are suspicious.
    Security,

    /// Seeded adversarial inputs; the service must not break.
    Fuzz,

    /// Names issued under sustained request volume.
    Load,
}

impl Strategy {
    /// Every strategy, in report order.
    pub const ALL: [Strategy; 6] = [
        Strategy::Functional,
        Strategy::Integration,
        Strategy::Regression,
        Strategy::Security,
        Strategy::Fuzz,
        Strategy::Load,
    ];

    /// Get the strategy name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Functional => "functional",
            Strategy::Integration => "integration",
            Strategy::Regression => "regression",
            Strategy::Security => "security",
            Strategy::Fuzz => "fuzz",
            Strategy::Load => "load",
        }
    }

    /// The expectation template applied when a probe does not override it.
    pub fn default_expectation(&self) -> Expectation {
        let base = Expectation::default();
        match self {
            Strategy::Functional | Strategy::Integration => Expectation {
                echo_name: true,
                ..base
            },
            Strategy::Regression => Expectation {
                max_probability_sum: Some(1.0 + PROBABILITY_SUM_EPSILON),
                ..base
            },
            Strategy::Security => Expectation {
                accepted_status: vec![
                    StatusMatcher::Exact(200),
                    StatusMatcher::Exact(400),
                    StatusMatcher::Exact(422),
                    StatusMatcher::CLIENT_ERRORS,
                ],
                flag_non_empty_for_malicious: true,
                ..base
            },
            Strategy::Fuzz => Expectation {
                accepted_status: vec![StatusMatcher::Exact(200), StatusMatcher::CLIENT_ERRORS],
                ..base
            },
            Strategy::Load => Expectation {
                accepted_status: vec![StatusMatcher::Exact(200), StatusMatcher::Exact(429)],
                ..base
            },
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Strategy {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Strategy::ALL
            .into_iter()
            .find(|st| st.name() == wanted)
            .ok_or_else(|| HarnessError::UnknownStrategy(s.to_string()))
    }
}

/// Tolerance applied to the probability-sum rule.
pub const PROBABILITY_SUM_EPSILON: f64 = 1e-6;

/// Matches an HTTP status code against an accepted set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusMatcher {
    Exact(u16),
    /// Inclusive range.
    Range { start: u16, end: u16 },
}

impl StatusMatcher {
    /// Any 4xx response.
    pub const CLIENT_ERRORS: StatusMatcher = StatusMatcher::Range {
        start: 400,
        end: 499,
    };

    pub fn matches(&self, status: u16) -> bool {
        match *self {
            StatusMatcher::Exact(code) => code == status,
            StatusMatcher::Range { start, end } => (start..=end).contains(&status),
        }
    }
}

/// Inclusive numeric bounds for a prediction probability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProbabilityRange {
    pub min: f64,
    pub max: f64,
}

impl ProbabilityRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Default for ProbabilityRange {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

/// Declarative response contract for a probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expectation {
    /// Status codes the probe accepts.
    pub accepted_status: Vec<StatusMatcher>,

    /// Top-level fields that must be present on a 200 body.
    pub required_fields: Vec<String>,

    /// Bounds every `probability` must satisfy.
    pub probability_range: ProbabilityRange,

    /// Whether an empty `country` list is acceptable.
    pub allow_empty: bool,

    /// Upper bound for the sum of all probabilities, if enforced.
    pub max_probability_sum: Option<f64>,

    /// Malicious input with non-empty predictions is an anomaly.
    pub flag_non_empty_for_malicious: bool,

    /// The returned `name` must echo the submitted input (case-insensitive).
    pub echo_name: bool,
}

impl Default for Expectation {
    fn default() -> Self {
        Self {
            accepted_status: vec![StatusMatcher::Exact(200)],
            required_fields: vec!["name".to_string(), "country".to_string()],
            probability_range: ProbabilityRange::default(),
            allow_empty: true,
            max_probability_sum: None,
            flag_non_empty_for_malicious: false,
            echo_name: false,
        }
    }
}

impl Expectation {
    /// Whether `status` is in the accepted set.
    pub fn accepts_status(&self, status: u16) -> bool {
        self.accepted_status.iter().any(|m| m.matches(status))
    }

    /// Add an accepted status matcher.
    pub fn accept(mut self, matcher: StatusMatcher) -> Self {
        self.accepted_status.push(matcher);
        self
    }

    /// Require at least one prediction.
    pub fn require_predictions(mut self) -> Self {
        self.allow_empty = false;
        self
    }
}

/// Fuzz input categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FuzzCategory {
    EmptyOrWhitespace,
    ControlCharacters,
    Oversized,
    NonAscii,
    NumericOnly,
    MixedAlphanumeric,
    Injection,
    PercentEncoded,
}

impl FuzzCategory {
    pub const ALL: [FuzzCategory; 8] = [
        FuzzCategory::EmptyOrWhitespace,
        FuzzCategory::ControlCharacters,
        FuzzCategory::Oversized,
        FuzzCategory::NonAscii,
        FuzzCategory::NumericOnly,
        FuzzCategory::MixedAlphanumeric,
        FuzzCategory::Injection,
        FuzzCategory::PercentEncoded,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FuzzCategory::EmptyOrWhitespace => "empty_or_whitespace",
            FuzzCategory::ControlCharacters => "control_characters",
            FuzzCategory::Oversized => "oversized",
            FuzzCategory::NonAscii => "non_ascii",
            FuzzCategory::NumericOnly => "numeric_only",
            FuzzCategory::MixedAlphanumeric => "mixed_alphanumeric",
            FuzzCategory::Injection => "injection",
            FuzzCategory::PercentEncoded => "percent_encoded",
        }
    }
}

impl fmt::Display for FuzzCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for FuzzCategory {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        FuzzCategory::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| HarnessError::UnknownFuzzCategory(s.to_string()))
    }
}

/// Replay coordinates of a generated fuzz input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FuzzOrigin {
    pub category: FuzzCategory,
    pub seed: u64,
    pub index: u64,
}

/// One request to issue plus the contract its response must satisfy.
///
/// Created at run start and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Probe {
    /// Stable key, unique within a run.
    pub id: String,

    pub strategy: Strategy,

    /// Name submitted to the service. May be empty, huge or hostile.
    pub input: String,

    pub expectation: Expectation,

    /// Set for fuzz probes so failures can be regenerated.
    pub origin: Option<FuzzOrigin>,
}

impl Probe {
    /// Create a probe with the strategy's default expectation.
    pub fn new(strategy: Strategy, input: impl Into<String>) -> Self {
        let input = input.into();
        Self {
            id: probe_id(strategy, &input),
            strategy,
            expectation: strategy.default_expectation(),
            input,
            origin: None,
        }
    }

    /// Override the default expectation.
    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expectation = expectation;
        self
    }

    /// Attach fuzz replay coordinates.
    pub fn with_origin(mut self, origin: FuzzOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Short printable rendering of the input for logs and reports.
    pub fn input_preview(&self) -> String {
        preview(&self.input, 40)
    }
}

/// Compute the stable id `<strategy>-<first 16 hex chars of sha256(input)>`.
pub fn probe_id(strategy: Strategy, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(strategy.name().as_bytes());
    hasher.update(b"\0");
    hasher.update(input.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", strategy.name(), &digest[..16])
}

/// Make ids unique within a batch by suffixing repeats with `#n`.
///
/// The first occurrence keeps its plain id, so ids stay stable across runs
/// for the same input sequence.
pub fn dedupe_ids(probes: &mut [Probe]) {
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for probe in probes.iter_mut() {
        let count = seen.entry(probe.id.clone()).or_insert(0);
        if *count > 0 {
            probe.id = format!("{}#{}", probe.id, count);
        }
        *count += 1;
    }
}

/// Escape control characters and truncate to `max_chars`.
pub fn preview(input: &str, max_chars: usize) -> String {
    let escaped: String = input.chars().flat_map(char::escape_debug).collect();
    let total = escaped.chars().count();
    if total <= max_chars {
        escaped
    } else {
        let head: String = escaped.chars().take(max_chars).collect();
        format!("{}… ({} chars)", head, input.chars().count())
    }
}
