//! Scripted transport fake (testing only)
//!
//! `ScriptedTransport` replays per-input queues of responses, delays and
//! panics, and records what it saw so tests can assert on concurrency and
//! pacing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::transport::{Transport, TransportError, TransportResponse, TransportResult};

/// One scripted reaction to a send.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return immediately.
    Respond(TransportResult),

    /// Sleep, then return. A delay past the executor timeout models a hang.
    Delayed(Duration, TransportResult),

    /// 200 with a body echoing the submitted input and one prediction.
    Echo { country_id: String, probability: f64 },

    /// Panic inside the send.
    Panic,
}

/// A recorded send.
#[derive(Debug, Clone)]
pub struct Call {
    pub input: String,
    pub at: Instant,
}

/// In-memory transport driven by per-input scripts.
///
/// Unscripted inputs (or inputs whose script ran out) get the fallback
/// response, or a `TransportError::Other` when no fallback is set.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    fallback: Option<Step>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to anything unscripted with `step`.
    pub fn with_fallback(mut self, step: Step) -> Self {
        self.fallback = Some(step);
        self
    }

    /// Fallback answering 200 with a body echoing the input and one prediction.
    pub fn echoing(self, country_id: &str, probability: f64) -> Self {
        self.with_fallback(Step::Echo {
            country_id: country_id.to_string(),
            probability,
        })
    }

    /// Append steps for `input`.
    pub fn script(self, input: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(input.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// All sends so far, in arrival order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of sends for `input`.
    pub fn call_count(&self, input: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.input == input)
            .count()
    }

    /// Highest number of concurrent sends observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, input: &str) -> Option<Step> {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .get_mut(input)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.fallback.clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, input: &str) -> TransportResult {
        self.calls.lock().unwrap().push(Call {
            input: input.to_string(),
            at: Instant::now(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match self.next_step(input) {
            None => Err(TransportError::Other(format!("unscripted input: {input:?}"))),
            Some(Step::Respond(result)) => result,
            Some(Step::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            Some(Step::Echo {
                country_id,
                probability,
            }) => ok_body(input, &[(country_id.as_str(), probability)]),
            Some(Step::Panic) => panic!("scripted panic for {input:?}"),
        }
    }
}

/// 200 response with a well-formed body.
pub fn ok_body(name: &str, predictions: &[(&str, f64)]) -> TransportResult {
    let country: Vec<serde_json::Value> = predictions
        .iter()
        .map(|(id, p)| serde_json::json!({"country_id": id, "probability": p}))
        .collect();
    Ok(TransportResponse::json(
        &serde_json::json!({"name": name, "country": country}),
    ))
}
