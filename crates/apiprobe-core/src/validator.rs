//! Response validation.
//!
//! One pure rule engine shared by every strategy. Checks run in a fixed order
//! and the first failing check decides the verdict; only that reason is kept.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{FailureReason, Outcome, Probe, Verdict};
use crate::transport::TransportResult;

/// Verdict plus the single recorded reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Validation {
    pub verdict: Verdict,
    pub reason: Option<FailureReason>,
}

impl Validation {
    pub fn pass() -> Self {
        Self {
            verdict: Verdict::Pass,
            reason: None,
        }
    }

    pub fn fail(reason: FailureReason) -> Self {
        Self {
            verdict: Verdict::Fail,
            reason: Some(reason),
        }
    }

    fn anomaly(reason: FailureReason) -> Self {
        Self {
            verdict: Verdict::Anomaly,
            reason: Some(reason),
        }
    }

    fn transport(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::TransportError,
            reason: Some(FailureReason::Transport {
                message: message.into(),
            }),
        }
    }
}

/// Classify a raw transport result against the probe's expectation.
pub fn validate(probe: &Probe, response: &TransportResult) -> Validation {
    validate_response(probe, response).0
}

/// Like [`validate`], also returning the parsed body for the outcome record.
pub fn validate_response(probe: &Probe, response: &TransportResult) -> (Validation, Option<Value>) {
    match response {
        Err(err) => (Validation::transport(err.to_string()), None),
        Ok(resp) => {
            let parsed = serde_json::from_slice::<Value>(&resp.body).ok();
            let validation = validate_observed(probe, Some(resp.status_code), None, parsed.as_ref());
            (validation, parsed)
        }
    }
}

/// Re-derive the verdict of a recorded outcome.
///
/// Gives the same answer as the original validation for any outcome the
/// executor produced, since the outcome keeps everything the rules read.
pub fn validate_outcome(probe: &Probe, outcome: &Outcome) -> Validation {
    if outcome.verdict == Verdict::Skipped {
        return Validation {
            verdict: Verdict::Skipped,
            reason: outcome.reason.clone(),
        };
    }
    validate_observed(
        probe,
        outcome.status_code,
        outcome.transport_error.as_deref(),
        outcome.parsed_body.as_ref(),
    )
}

/// Core rule engine over observed facts.
pub fn validate_observed(
    probe: &Probe,
    status_code: Option<u16>,
    transport_error: Option<&str>,
    body: Option<&Value>,
) -> Validation {
    let exp = &probe.expectation;

    let status = match (transport_error, status_code) {
        (Some(message), _) => return Validation::transport(message),
        (None, None) => return Validation::transport("no response obtained"),
        (None, Some(status)) => status,
    };

    if !exp.accepts_status(status) {
        return Validation::fail(FailureReason::UnacceptedStatus { status });
    }
    if status != 200 {
        return Validation::pass();
    }

    let Some(body) = body else {
        return Validation::fail(FailureReason::MalformedBody);
    };
    let Some(object) = body.as_object() else {
        return Validation::fail(FailureReason::NotAnObject);
    };

    if let Some(field) = exp
        .required_fields
        .iter()
        .find(|f| !object.contains_key(f.as_str()))
    {
        return Validation::fail(FailureReason::MissingField {
            field: field.clone(),
        });
    }

    if exp.echo_name {
        let echoed = object.get("name").and_then(Value::as_str);
        let matches = echoed.is_some_and(|name| name.to_lowercase() == probe.input.to_lowercase());
        if !matches {
            return Validation::fail(FailureReason::NameMismatch {
                expected: probe.input.clone(),
                actual: echoed
                    .map(str::to_string)
                    .unwrap_or_else(|| object.get("name").map(Value::to_string).unwrap_or_default()),
            });
        }
    }

    let countries: &[Value] = match object.get("country") {
        Some(Value::Array(items)) => items.as_slice(),
        // Only reachable when `country` is not required.
        None => &[],
        Some(_) => return Validation::fail(FailureReason::CountryNotSequence),
    };

    let mut sum = 0.0;
    for (index, entry) in countries.iter().enumerate() {
        let id_ok = entry
            .get("country_id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty());
        if !id_ok {
            return Validation::fail(FailureReason::InvalidCountryId { index });
        }
        let Some(probability) = entry.get("probability").and_then(Value::as_f64) else {
            return Validation::fail(FailureReason::InvalidProbability { index });
        };
        if !exp.probability_range.contains(probability) {
            return Validation::fail(FailureReason::ProbabilityOutOfRange {
                index,
                value: probability,
            });
        }
        sum += probability;
    }

    if countries.is_empty() && !exp.allow_empty {
        return Validation::fail(FailureReason::EmptyResult);
    }

    if let Some(limit) = exp.max_probability_sum {
        if sum > limit {
            return Validation::fail(FailureReason::ProbabilitySumExceeded { sum, limit });
        }
    }

    if exp.flag_non_empty_for_malicious && !countries.is_empty() {
        if let Some(pattern) = is_malicious(&probe.input) {
            return Validation::anomaly(FailureReason::UnsanitizedInput {
                pattern: pattern.to_string(),
                predictions: countries.len(),
            });
        }
    }

    Validation::pass()
}

/// First-ranked `country_id`, if any.
pub fn top_prediction(body: &Value) -> Option<String> {
    body.get("country")?
        .as_array()?
        .first()?
        .get("country_id")?
        .as_str()
        .map(str::to_string)
}

/// Length of the `country` list (0 when absent or not a list).
pub fn prediction_count(body: &Value) -> usize {
    body.get("country")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// Named attack-pattern rules.
const MALICIOUS_RULES: &[(&str, &str)] = &[
    ("sql_tautology", r#"(?i)['"]\s*or\s*['"]?\w*['"]?\s*=\s*['"]?\w*"#),
    ("sql_statement", r"(?i);\s*(drop|delete|insert|update|select)\b"),
    ("sql_union", r"(?i)\bunion\s+(all\s+)?select\b"),
    ("sql_comment", r"--\s*$"),
    ("script_markup", r"(?i)<\s*/?\s*script\b"),
    ("markup_event_handler", r"(?i)<[^>]*\bon[a-z]+\s*="),
    ("path_traversal", r"(?i)(\.\./|\.\.\\|\.\.%2f|%2e%2e%2f)"),
];

fn malicious_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        MALICIOUS_RULES
            .iter()
            .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
            .collect()
    })
}

/// Name of the first attack pattern `input` matches.
pub fn is_malicious(input: &str) -> Option<&'static str> {
    malicious_patterns()
        .iter()
        .find(|(_, re)| re.is_match(input))
        .map(|(name, _)| *name)
}
