//! Structured observability hooks for apiprobe run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via `run_span`
//! - Emission functions for run start/finish, per-probe completion, retries
//!   and baseline drift
//!
//! Run-level events are emitted at `info!`; per-probe events at `debug!` so a
//! large fuzz batch stays quiet by default. Filter with `RUST_LOG`.

use std::time::Duration;

use tracing::{debug, info, warn, Span};

use crate::domain::{Outcome, Strategy, Verdict};

/// Run-scoped span carrying `run_id`.
///
/// Attach it with `tracing::Instrument` so every event emitted while the run
/// future is polled, on any lane, is tagged with the run.
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("apiprobe.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, strategies: &[Strategy], probe_count: usize, seed: u64) {
    let strategies: Vec<&str> = strategies.iter().map(Strategy::name).collect();
    info!(
        event = "run.started",
        run_id = %run_id,
        strategies = %strategies.join(","),
        probe_count = probe_count,
        seed = seed,
    );
}

/// Emit event: one probe reached its final outcome.
pub fn emit_probe_completed(outcome: &Outcome) {
    let reason = outcome
        .reason
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    match outcome.verdict {
        Verdict::Pass | Verdict::Skipped => debug!(
            event = "probe.completed",
            probe_id = %outcome.probe_id,
            verdict = %outcome.verdict,
            status = ?outcome.status_code,
            latency_ms = outcome.latency_ms,
            attempts = outcome.attempts,
        ),
        _ => info!(
            event = "probe.completed",
            probe_id = %outcome.probe_id,
            verdict = %outcome.verdict,
            status = ?outcome.status_code,
            latency_ms = outcome.latency_ms,
            attempts = outcome.attempts,
            reason = %reason,
        ),
    }
}

/// Emit event: a transport failure is about to be retried.
pub fn emit_probe_retry(probe_id: &str, attempt: u32, cause: &str, delay: Duration) {
    debug!(
        event = "probe.retry",
        probe_id = %probe_id,
        attempt = attempt,
        cause = %cause,
        delay_ms = delay.as_millis() as u64,
    );
}

/// Emit event: a regression outcome no longer matches its baseline.
pub fn emit_drift_detected(
    probe_id: &str,
    baseline_top: Option<&str>,
    current_top: Option<&str>,
    baseline_count: usize,
    current_count: usize,
) {
    warn!(
        event = "drift.detected",
        probe_id = %probe_id,
        baseline_top = baseline_top.unwrap_or("-"),
        current_top = current_top.unwrap_or("-"),
        baseline_count = baseline_count,
        current_count = current_count,
    );
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, total: usize, passed: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        total = total,
        passed = passed,
    );
}

/// Emit event: baseline persistence failed (warning level).
pub fn emit_baseline_error(probe_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "baseline.error", probe_id = %probe_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Probe, SkipCause};

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _entered = span.enter();
    }

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        let probe = Probe::new(Strategy::Fuzz, "");
        let outcome = Outcome::skipped(&probe, 0, SkipCause::Cancelled);
        emit_run_started("r", &Strategy::ALL, 3, 42);
        emit_probe_completed(&outcome);
        emit_probe_retry(&probe.id, 1, "timeout", Duration::from_millis(5));
        emit_drift_detected(&probe.id, Some("US"), None, 1, 0);
        emit_run_finished("r", 10, 3, true);
    }
}
