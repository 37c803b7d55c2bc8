//! Probe execution: bounded worker pool with pacing, timeout and retry.
//!
//! `max_concurrency` lanes drain one shared queue. A lane runs a probe to
//! completion (send, retry, validate) before taking the next one and waits at
//! least `pacing_interval_ms` between the requests it starts. Every submitted
//! probe yields exactly one [`Outcome`], including probes whose send panicked
//! and probes left unexecuted by cancellation or the run deadline.

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn, Instrument, Span};

use crate::domain::{
    FailureReason, HarnessError, Outcome, Probe, Result, SkipCause, Strategy, Verdict,
};
use crate::obs;
use crate::transport::{Transport, TransportError, TransportResult};
use crate::validator::validate_response;

/// Shape of the delay between retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffShape {
    /// `base` before every retry.
    Fixed,
    /// `base * 2^(retry - 1)`.
    Exponential,
}

/// Retry policy for transport-level failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total sends allowed per probe, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff: BackoffShape,
    /// Also retry 429 responses.
    pub retry_rate_limited: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff: BackoffShape::Exponential,
            retry_rate_limited: false,
        }
    }
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ms = match self.backoff {
            BackoffShape::Fixed => self.backoff_base_ms,
            BackoffShape::Exponential => self
                .backoff_base_ms
                .saturating_mul(2u64.saturating_pow(retry.saturating_sub(1))),
        };
        Duration::from_millis(ms)
    }

    fn should_retry(&self, result: &TransportResult) -> bool {
        match result {
            Err(_) => true,
            Ok(resp) => resp.status_code == 429 && self.retry_rate_limited,
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Simultaneous in-flight requests (worker lanes).
    pub max_concurrency: usize,
    /// Limit for a single attempt (milliseconds).
    pub per_request_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Minimum gap between request starts on one lane (milliseconds).
    pub pacing_interval_ms: u64,
    /// Strategies subject to pacing; empty paces every probe.
    pub paced_strategies: Vec<Strategy>,
    /// Return outcomes in submission order rather than completion order.
    pub ordered: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            per_request_timeout_ms: 10_000,
            retry: RetryPolicy::default(),
            pacing_interval_ms: 0,
            paced_strategies: Vec::new(),
            ordered: true,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(HarnessError::InvalidConfig(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.per_request_timeout_ms == 0 {
            return Err(HarnessError::InvalidConfig(
                "per_request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(HarnessError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout_ms(mut self, per_request_timeout_ms: u64) -> Self {
        self.per_request_timeout_ms = per_request_timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pacing_ms(mut self, pacing_interval_ms: u64) -> Self {
        self.pacing_interval_ms = pacing_interval_ms;
        self
    }

    /// Restrict pacing to `strategies`.
    pub fn pacing_only(mut self, strategies: impl IntoIterator<Item = Strategy>) -> Self {
        self.paced_strategies = strategies.into_iter().collect();
        self
    }

    fn paces(&self, strategy: Strategy) -> bool {
        self.paced_strategies.is_empty() || self.paced_strategies.contains(&strategy)
    }

    pub fn unordered(mut self) -> Self {
        self.ordered = false;
        self
    }
}

/// Cooperative cancellation signal.
///
/// Once cancelled, no new probes are dispatched; in-flight probes finish or
/// time out.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once `rx` observes cancellation; never resolves otherwise.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    let closed = rx.wait_for(|c| *c).await.is_err();
    if closed {
        futures::future::pending::<()>().await;
    }
}

/// Runs probes through an injected transport.
pub struct Executor {
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { transport, config })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute every probe and return one outcome per probe.
    ///
    /// `deadline` bounds total wall-clock time from the call; probes not
    /// started by then are `Skipped`.
    pub async fn run(
        &self,
        probes: Vec<Probe>,
        cancel: &CancelHandle,
        deadline: Option<Duration>,
    ) -> Vec<Outcome> {
        let total = probes.len();
        let deadline = deadline.map(|d| Instant::now() + d);
        let lanes = self.config.max_concurrency.min(total).max(1);

        let queue: Arc<Mutex<VecDeque<(usize, Probe)>>> =
            Arc::new(Mutex::new(probes.iter().cloned().enumerate().collect()));
        let results: Arc<Mutex<Vec<Outcome>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));

        let mut tasks = Vec::with_capacity(lanes);
        for lane in 0..lanes {
            let worker = Lane {
                id: lane,
                transport: Arc::clone(&self.transport),
                config: self.config.clone(),
                cancel: cancel.clone(),
                deadline,
            };
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            tasks.push(tokio::spawn(
                async move { worker.drain(queue, results).await }.instrument(Span::current()),
            ));
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "executor lane terminated abnormally");
            }
        }

        let mut outcomes = std::mem::take(&mut *results.lock().await);

        let cause = if cancel.is_cancelled() {
            SkipCause::Cancelled
        } else {
            SkipCause::DeadlineExceeded
        };
        for (index, probe) in queue.lock().await.drain(..) {
            outcomes.push(Outcome::skipped(&probe, index, cause));
        }

        // A lane that died mid-probe leaves a hole; fill it rather than drop the probe.
        if outcomes.len() < total {
            let seen: HashSet<usize> = outcomes.iter().map(|o| o.index).collect();
            for (index, probe) in probes.iter().enumerate() {
                if !seen.contains(&index) {
                    outcomes.push(transport_failure(probe, index, "executor lane terminated"));
                }
            }
        }

        if self.config.ordered {
            outcomes.sort_by_key(|o| o.index);
        }
        outcomes
    }

    /// Execute a single probe with the configured timeout and retry policy.
    pub async fn execute_probe(&self, probe: &Probe, index: usize) -> Outcome {
        let lane = Lane {
            id: 0,
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            cancel: CancelHandle::new(),
            deadline: None,
        };
        lane.execute_guarded(probe, index).await
    }
}

struct Lane {
    id: usize,
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
    cancel: CancelHandle,
    deadline: Option<Instant>,
}

impl Lane {
    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn stop_cause(&self) -> Option<SkipCause> {
        if self.cancel.is_cancelled() {
            Some(SkipCause::Cancelled)
        } else if self.past_deadline() {
            Some(SkipCause::DeadlineExceeded)
        } else {
            None
        }
    }

    async fn drain(
        self,
        queue: Arc<Mutex<VecDeque<(usize, Probe)>>>,
        results: Arc<Mutex<Vec<Outcome>>>,
    ) {
        let pacing = Duration::from_millis(self.config.pacing_interval_ms);
        let mut last_start: Option<Instant> = None;

        loop {
            if self.stop_cause().is_some() {
                break;
            }
            let Some((index, probe)) = queue.lock().await.pop_front() else {
                break;
            };

            let paced = self.config.paces(probe.strategy);
            if let (true, Some(previous)) = (paced, last_start) {
                if let Some(cause) = self.wait_until(previous + pacing).await {
                    results
                        .lock()
                        .await
                        .push(Outcome::skipped(&probe, index, cause));
                    break;
                }
            }

            if paced {
                last_start = Some(Instant::now());
            }
            let outcome = self.execute_guarded(&probe, index).await;
            results.lock().await.push(outcome);
        }
        debug!(lane = self.id, "lane drained");
    }

    /// Wait until `until`, returning early with a cause on cancel or deadline.
    /// Used for both lane pacing and retry backoff.
    async fn wait_until(&self, until: Instant) -> Option<SkipCause> {
        let deadline = self.deadline.unwrap_or(until + Duration::from_secs(3600));
        tokio::select! {
            _ = cancelled(self.cancel.subscribe()) => Some(SkipCause::Cancelled),
            _ = tokio::time::sleep_until(deadline), if deadline <= until => {
                Some(SkipCause::DeadlineExceeded)
            }
            _ = tokio::time::sleep_until(until) => None,
        }
    }

    /// Run one probe, converting a panic in the send path into an outcome.
    async fn execute_guarded(&self, probe: &Probe, index: usize) -> Outcome {
        let outcome = match AssertUnwindSafe(self.execute(probe, index))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(probe_id = %probe.id, panic = %detail, "probe execution panicked");
                transport_failure(probe, index, &format!("worker panicked: {detail}"))
            }
        };
        obs::emit_probe_completed(&outcome);
        outcome
    }

    async fn execute(&self, probe: &Probe, index: usize) -> Outcome {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let timeout = Duration::from_millis(self.config.per_request_timeout_ms);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, self.transport.send(&probe.input)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(TransportError::Timeout(self.config.per_request_timeout_ms)),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            let can_retry = attempt < max_attempts && self.stop_cause().is_none();
            if can_retry && policy.should_retry(&result) {
                let delay = policy.delay_for(attempt);
                obs::emit_probe_retry(&probe.id, attempt, &describe(&result), delay);
                match self.wait_until(Instant::now() + delay).await {
                    None => continue,
                    Some(cause) => {
                        debug!(probe_id = %probe.id, attempt, %cause, "retry abandoned");
                    }
                }
            }

            let (validation, parsed_body) = validate_response(probe, &result);
            let (status_code, transport_error) = match &result {
                Ok(resp) => (Some(resp.status_code), None),
                Err(e) => (None, Some(e.to_string())),
            };
            return Outcome {
                probe_id: probe.id.clone(),
                strategy: probe.strategy,
                index,
                status_code,
                latency_ms,
                parsed_body,
                transport_error,
                attempts: attempt,
                retries: attempt - 1,
                verdict: validation.verdict,
                reason: validation.reason,
            };
        }
    }
}

fn describe(result: &TransportResult) -> String {
    match result {
        Ok(resp) => format!("status {}", resp.status_code),
        Err(e) => e.to_string(),
    }
}

fn transport_failure(probe: &Probe, index: usize, message: &str) -> Outcome {
    Outcome {
        probe_id: probe.id.clone(),
        strategy: probe.strategy,
        index,
        status_code: None,
        latency_ms: 0,
        parsed_body: None,
        transport_error: Some(message.to_string()),
        attempts: 1,
        retries: 0,
        verdict: Verdict::TransportError,
        reason: Some(FailureReason::Transport {
            message: message.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ok_body, ScriptedTransport, Step};
    use crate::transport::TransportResponse;

    fn executor(transport: ScriptedTransport, config: ExecutorConfig) -> (Executor, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let exec = Executor::new(transport.clone(), config).unwrap();
        (exec, transport)
    }

    #[test]
    fn test_backoff_shapes() {
        let exp = RetryPolicy {
            backoff_base_ms: 100,
            ..RetryPolicy::default()
        };
        assert_eq!(exp.delay_for(1), Duration::from_millis(100));
        assert_eq!(exp.delay_for(2), Duration::from_millis(200));
        assert_eq!(exp.delay_for(3), Duration::from_millis(400));

        let fixed = RetryPolicy {
            backoff: BackoffShape::Fixed,
            backoff_base_ms: 50,
            ..RetryPolicy::default()
        };
        assert_eq!(fixed.delay_for(5), Duration::from_millis(50));
    }

    #[test]
    fn test_config_validation() {
        assert!(ExecutorConfig::default().validate().is_ok());
        assert!(ExecutorConfig::default().with_concurrency(0).validate().is_err());
        let cfg = ExecutorConfig::default().with_retry(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let cfg = ExecutorConfig::default().with_pacing_ms(1_000).unordered();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ExecutorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_then_success_counts_retries() {
        let input = "a".repeat(1000);
        let slow = Step::Delayed(Duration::from_secs(60), ok_body(&input, &[]));
        let transport = ScriptedTransport::new().script(
            &input,
            [slow.clone(), slow, Step::Respond(ok_body(&input, &[]))],
        );
        let config = ExecutorConfig::default().with_timeout_ms(100);
        let (exec, transport) = executor(transport, config);

        let probe = Probe::new(Strategy::Fuzz, input.clone());
        let outcome = exec.execute_probe(&probe, 0).await;

        assert_eq!(outcome.verdict, Verdict::Pass);
        assert_eq!(outcome.retries, 2);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(transport.call_count(&input), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_surfaces_transport_error() {
        let transport = ScriptedTransport::new().with_fallback(Step::Respond(Err(
            TransportError::Connect("refused".into()),
        )));
        let (exec, transport) = executor(transport, ExecutorConfig::default());

        let outcome = exec
            .execute_probe(&Probe::new(Strategy::Functional, "john"), 0)
            .await;
        assert_eq!(outcome.verdict, Verdict::TransportError);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.status_code.is_none());
        assert!(outcome.transport_error.unwrap().contains("refused"));
        assert_eq!(transport.call_count("john"), 3);
    }

    fn refusing() -> ScriptedTransport {
        ScriptedTransport::new().with_fallback(Step::Respond(Err(TransportError::Connect(
            "refused".into(),
        ))))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_sends_no_retry() {
        let config = ExecutorConfig::default().with_retry(RetryPolicy {
            backoff_base_ms: 1_000,
            backoff: BackoffShape::Fixed,
            ..RetryPolicy::default()
        });
        let (exec, transport) = executor(refusing(), config);
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        let started = Instant::now();

        let (outcomes, _) = tokio::join!(
            exec.run(vec![Probe::new(Strategy::Functional, "john")], &cancel, None),
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                trigger.cancel();
            }
        );

        assert_eq!(transport.calls().len(), 1, "no send after cancel");
        assert_eq!(outcomes[0].verdict, Verdict::TransportError);
        assert_eq!(outcomes[0].attempts, 1);
        assert!(outcomes[0].transport_error.as_deref().unwrap().contains("refused"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_never_outlives_run_deadline() {
        let config = ExecutorConfig::default().with_retry(RetryPolicy {
            backoff_base_ms: 1_000,
            backoff: BackoffShape::Exponential,
            ..RetryPolicy::default()
        });
        let (exec, transport) = executor(refusing(), config);
        let started = Instant::now();

        let outcomes = exec
            .run(
                vec![Probe::new(Strategy::Functional, "john")],
                &CancelHandle::new(),
                Some(Duration::from_millis(1_500)),
            )
            .await;

        // Sends at 0s and 1s; the 2s backoff before the third is cut at 1.5s.
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(outcomes[0].verdict, Verdict::TransportError);
        assert_eq!(outcomes[0].attempts, 2);
        assert!(started.elapsed() <= Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_limited_to_selected_strategies() {
        let config = ExecutorConfig::default()
            .with_concurrency(1)
            .with_pacing_ms(1_000)
            .pacing_only([Strategy::Load]);
        let (exec, transport) = executor(ScriptedTransport::new().echoing("US", 0.5), config);
        let probes = vec![
            Probe::new(Strategy::Functional, "james"),
            Probe::new(Strategy::Load, "john"),
            Probe::new(Strategy::Functional, "maria"),
            Probe::new(Strategy::Load, "mary"),
        ];

        let started = Instant::now();
        let outcomes = exec.run(probes, &CancelHandle::new(), None).await;
        assert!(outcomes.iter().all(|o| o.verdict == Verdict::Pass));

        let offsets: Vec<Duration> = transport
            .calls()
            .iter()
            .map(|c| c.at - started)
            .collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_millis(1_000)
            ]
        );
    }

    #[tokio::test]
    async fn test_validation_failures_not_retried() {
        let transport = ScriptedTransport::new()
            .with_fallback(Step::Respond(Ok(TransportResponse::new(200, "not json"))));
        let (exec, transport) = executor(transport, ExecutorConfig::default());

        let outcome = exec
            .execute_probe(&Probe::new(Strategy::Functional, "john"), 0)
            .await;
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(transport.call_count("john"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_not_retried_by_default() {
        let transport = ScriptedTransport::new()
            .with_fallback(Step::Respond(Ok(TransportResponse::new(429, ""))));
        let (exec, transport) = executor(transport, ExecutorConfig::default());

        let outcome = exec.execute_probe(&Probe::new(Strategy::Load, "john"), 0).await;
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert_eq!(outcome.status_code, Some(429));
        assert_eq!(transport.call_count("john"), 1);

        let transport = ScriptedTransport::new()
            .with_fallback(Step::Respond(Ok(TransportResponse::new(429, ""))));
        let config = ExecutorConfig::default().with_retry(RetryPolicy {
            retry_rate_limited: true,
            ..RetryPolicy::default()
        });
        let (exec, transport) = executor(transport, config);
        let outcome = exec.execute_probe(&Probe::new(Strategy::Load, "john"), 0).await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(transport.call_count("john"), 3);
    }

    #[tokio::test]
    async fn test_panic_becomes_transport_error() {
        let transport = ScriptedTransport::new()
            .echoing("US", 0.5)
            .script("boom", [Step::Panic]);
        let config = ExecutorConfig::default()
            .with_concurrency(1)
            .with_retry(RetryPolicy::none());
        let (exec, _) = executor(transport, config);

        let probes = vec![
            Probe::new(Strategy::Functional, "boom"),
            Probe::new(Strategy::Functional, "john"),
        ];
        let outcomes = exec.run(probes, &CancelHandle::new(), None).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].verdict, Verdict::TransportError);
        assert!(outcomes[0]
            .transport_error
            .as_deref()
            .unwrap()
            .contains("panicked"));
        assert_eq!(outcomes[1].verdict, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_empty_batch_yields_no_outcomes() {
        let (exec, _) = executor(ScriptedTransport::new(), ExecutorConfig::default());
        let outcomes = exec.run(Vec::new(), &CancelHandle::new(), None).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_run_skips_everything() {
        let (exec, transport) = executor(
            ScriptedTransport::new().echoing("US", 0.5),
            ExecutorConfig::default(),
        );
        let cancel = CancelHandle::new();
        cancel.cancel();
        let probes = vec![
            Probe::new(Strategy::Functional, "john"),
            Probe::new(Strategy::Functional, "maria"),
        ];
        let outcomes = exec.run(probes, &cancel, None).await;
        assert!(outcomes.iter().all(|o| o.verdict == Verdict::Skipped));
        assert_eq!(
            outcomes[0].reason,
            Some(FailureReason::Skipped {
                cause: SkipCause::Cancelled
            })
        );
        assert!(transport.calls().is_empty());
    }
}
