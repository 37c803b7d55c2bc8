//! Run coordination: plan probes, execute, compare with baselines, report.
//!
//! The coordinator is the only writer of the baseline store, and it writes
//! only after every outcome of a run has been collected.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use apiprobe_store::{BaselineStore, RegressionBaseline};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::domain::{HarnessError, Outcome, Probe, Result, Strategy, Verdict};
use crate::executor::{CancelHandle, Executor};
use crate::generator::InputGenerator;
use crate::obs;
use crate::report::{ConsistencyFlag, DriftFlag, Report, ReportEntry, RunMeta};
use crate::validator::{prediction_count, top_prediction};

/// What to run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub strategies: Vec<Strategy>,
    /// Number of fuzz inputs when `Fuzz` is requested.
    pub fuzz_count: usize,
    pub seed: u64,
    /// Drift and consistency flags fail the report gate.
    pub strict: bool,
    /// Record baselines for passing regression probes that have none.
    pub persist_new_baselines: bool,
    /// Wall-clock bound for the whole run.
    pub run_deadline_ms: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                Strategy::Functional,
                Strategy::Integration,
                Strategy::Regression,
                Strategy::Security,
                Strategy::Fuzz,
            ],
            fuzz_count: 50,
            seed: 0,
            strict: false,
            persist_new_baselines: true,
            run_deadline_ms: None,
        }
    }
}

impl RunConfig {
    pub fn with_strategies(mut self, strategies: impl IntoIterator<Item = Strategy>) -> Self {
        self.strategies = strategies.into_iter().collect();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fuzz_count(mut self, fuzz_count: usize) -> Self {
        self.fuzz_count = fuzz_count;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Drives one batch end to end.
pub struct RunCoordinator {
    executor: Executor,
    store: Arc<dyn BaselineStore>,
    config: RunConfig,
}

impl RunCoordinator {
    pub fn new(executor: Executor, store: Arc<dyn BaselineStore>, config: RunConfig) -> Self {
        Self {
            executor,
            store,
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Resolve the requested strategies into probes.
    ///
    /// Each strategy is planned once even if requested twice.
    pub fn plan(&self) -> Result<Vec<Probe>> {
        if self.config.strategies.is_empty() {
            return Err(HarnessError::EmptyStrategySet);
        }
        if self.executor.config().max_concurrency == 0 {
            return Err(HarnessError::InvalidConfig(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        plan_probes(&self.config)
    }

    /// Plan and execute the configured strategies.
    pub async fn run(&self, cancel: &CancelHandle) -> Result<Report> {
        let probes = self.plan()?;
        self.run_probes(probes, cancel).await
    }

    /// Execute an explicit probe list.
    pub async fn run_probes(&self, probes: Vec<Probe>, cancel: &CancelHandle) -> Result<Report> {
        ensure_unique_ids(&probes)?;

        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        Ok(self.execute_run(run_id, probes, cancel).instrument(span).await)
    }

    async fn execute_run(&self, run_id: String, probes: Vec<Probe>, cancel: &CancelHandle) -> Report {
        let strategies = strategies_of(&probes);
        obs::emit_run_started(&run_id, &strategies, probes.len(), self.config.seed);
        let started = Instant::now();

        let deadline = self.config.run_deadline_ms.map(Duration::from_millis);
        let outcomes = self.executor.run(probes.clone(), cancel, deadline).await;

        let drift = self.detect_drift(&outcomes).await;
        let consistency = detect_inconsistency(&probes, &outcomes);
        if self.config.persist_new_baselines {
            self.persist_new_baselines(&outcomes).await;
        }

        let entries: Vec<ReportEntry> = outcomes
            .iter()
            .filter_map(|o| probes.get(o.index).map(|p| ReportEntry::from_outcome(p, o)))
            .collect();
        let duration_ms = started.elapsed().as_millis() as u64;
        let report = Report::new(
            RunMeta {
                run_id: run_id.clone(),
                generated_at: Utc::now(),
                seed: self.config.seed,
                strategies,
                strict: self.config.strict,
                duration_ms,
            },
            entries,
            drift,
            consistency,
        );

        obs::emit_run_finished(&run_id, duration_ms, report.summary.total, report.passed());
        report
    }

    /// Compare regression observations with stored baselines.
    ///
    /// Only outcomes that carry a 200 body are compared; a transport failure
    /// says nothing about the service's predictions.
    async fn detect_drift(&self, outcomes: &[Outcome]) -> Vec<DriftFlag> {
        let mut drift = Vec::new();
        for outcome in outcomes.iter().filter(|o| o.strategy == Strategy::Regression) {
            let Some((current_top, current_count)) = observation(outcome) else {
                continue;
            };
            let baseline = match self.store.get(&outcome.probe_id).await {
                Ok(Some(baseline)) => baseline,
                Ok(None) => continue,
                Err(e) => {
                    obs::emit_baseline_error(&outcome.probe_id, &e);
                    continue;
                }
            };
            if baseline.matches(current_top.as_deref(), current_count) {
                continue;
            }
            obs::emit_drift_detected(
                &outcome.probe_id,
                baseline.top_prediction_id.as_deref(),
                current_top.as_deref(),
                baseline.prediction_count,
                current_count,
            );
            drift.push(DriftFlag {
                probe_id: outcome.probe_id.clone(),
                baseline_top: baseline.top_prediction_id,
                current_top,
                baseline_count: baseline.prediction_count,
                current_count,
            });
        }
        drift
    }

    async fn persist_new_baselines(&self, outcomes: &[Outcome]) {
        for outcome in outcomes
            .iter()
            .filter(|o| o.strategy == Strategy::Regression && o.verdict == Verdict::Pass)
        {
            let Some((top, count)) = observation(outcome) else {
                continue;
            };
            let baseline = RegressionBaseline::new(outcome.probe_id.clone(), top, count);
            match self.store.insert_if_absent(baseline).await {
                Ok(true) => debug!(probe_id = %outcome.probe_id, "recorded new baseline"),
                Ok(false) => {}
                Err(e) => obs::emit_baseline_error(&outcome.probe_id, &e),
            }
        }
    }

    /// Explicitly accept a report's passing regression results as the new
    /// baselines, overwriting what is stored. Returns how many were accepted.
    pub async fn accept_baselines(&self, report: &Report) -> Result<usize> {
        accept_baselines(self.store.as_ref(), report).await
    }
}

/// Overwrite baselines from a report's passing regression entries.
pub async fn accept_baselines(store: &dyn BaselineStore, report: &Report) -> Result<usize> {
    let mut accepted = 0;
    for entry in report
        .entries
        .iter()
        .filter(|e| e.strategy == Strategy::Regression && e.verdict == Verdict::Pass)
    {
        let baseline = RegressionBaseline::new(
            entry.probe_id.clone(),
            entry.top_prediction.clone(),
            entry.prediction_count,
        );
        store.set(baseline).await?;
        accepted += 1;
    }
    info!(run_id = %report.run.run_id, accepted = accepted, "accepted baselines");
    Ok(accepted)
}

/// Top prediction and count of a 200 response, if one was observed.
fn observation(outcome: &Outcome) -> Option<(Option<String>, usize)> {
    if outcome.status_code != Some(200) {
        return None;
    }
    let body = outcome.parsed_body.as_ref()?;
    Some((top_prediction(body), prediction_count(body)))
}

/// Group integration outcomes by case-folded input and flag groups whose
/// members disagree on prediction count or top prediction.
fn detect_inconsistency(probes: &[Probe], outcomes: &[Outcome]) -> Vec<ConsistencyFlag> {
    let mut groups: BTreeMap<String, Vec<(String, Option<String>, usize)>> = BTreeMap::new();
    for outcome in outcomes.iter().filter(|o| o.strategy == Strategy::Integration) {
        let (Some(probe), Some((top, count))) = (probes.get(outcome.index), observation(outcome))
        else {
            continue;
        };
        groups
            .entry(probe.input.to_lowercase())
            .or_default()
            .push((outcome.probe_id.clone(), top, count));
    }

    groups
        .into_iter()
        .filter(|(_, members)| {
            members.len() > 1
                && members
                    .iter()
                    .any(|(_, top, count)| (top, count) != (&members[0].1, &members[0].2))
        })
        .map(|(group, members)| ConsistencyFlag {
            group,
            probe_ids: members.iter().map(|m| m.0.clone()).collect(),
            top_predictions: members.iter().map(|m| m.1.clone()).collect(),
            prediction_counts: members.iter().map(|m| m.2).collect(),
        })
        .collect()
}

/// Probes a run with `config` issues, in submission order.
///
/// Repeated strategies are planned once; ids are checked for uniqueness.
pub fn plan_probes(config: &RunConfig) -> Result<Vec<Probe>> {
    if config.strategies.is_empty() {
        return Err(HarnessError::EmptyStrategySet);
    }
    let mut generator = InputGenerator::new(config.seed);
    let mut seen = HashSet::new();
    let mut probes = Vec::new();
    for strategy in &config.strategies {
        if seen.insert(*strategy) {
            probes.extend(generator.probes_for(*strategy, config.fuzz_count));
        }
    }
    ensure_unique_ids(&probes)?;
    Ok(probes)
}

fn ensure_unique_ids(probes: &[Probe]) -> Result<()> {
    let mut ids = HashSet::with_capacity(probes.len());
    for probe in probes {
        if !ids.insert(probe.id.as_str()) {
            return Err(HarnessError::DuplicateProbeId(probe.id.clone()));
        }
    }
    Ok(())
}

fn strategies_of(probes: &[Probe]) -> Vec<Strategy> {
    let present: HashSet<Strategy> = probes.iter().map(|p| p.strategy).collect();
    Strategy::ALL
        .into_iter()
        .filter(|s| present.contains(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::fakes::{ok_body, ScriptedTransport, Step};
    use apiprobe_store::fakes::MemoryBaselineStore;

    fn make_coordinator(
        transport: ScriptedTransport,
        store: Arc<MemoryBaselineStore>,
        config: RunConfig,
    ) -> RunCoordinator {
        let executor = Executor::new(Arc::new(transport), ExecutorConfig::default()).unwrap();
        RunCoordinator::new(executor, store, config)
    }

    #[test]
    fn test_plan_rejects_empty_strategy_set() {
        let coord = make_coordinator(
            ScriptedTransport::new(),
            Arc::new(MemoryBaselineStore::new()),
            RunConfig::default().with_strategies([]),
        );
        assert!(matches!(coord.plan(), Err(HarnessError::EmptyStrategySet)));
    }

    #[test]
    fn test_plan_is_deterministic_and_unique() {
        let config = RunConfig::default()
            .with_strategies(Strategy::ALL)
            .with_seed(9)
            .with_fuzz_count(100);
        let a = make_coordinator(
            ScriptedTransport::new(),
            Arc::new(MemoryBaselineStore::new()),
            config.clone(),
        );
        let b = make_coordinator(
            ScriptedTransport::new(),
            Arc::new(MemoryBaselineStore::new()),
            config,
        );
        let plan_a = a.plan().unwrap();
        assert_eq!(plan_a, b.plan().unwrap());
        let ids: HashSet<_> = plan_a.iter().map(|p| &p.id).collect();
        assert_eq!(ids.len(), plan_a.len());
        assert_eq!(
            plan_a.iter().filter(|p| p.strategy == Strategy::Fuzz).count(),
            100
        );
    }

    #[test]
    fn test_plan_dedupes_repeated_strategies() {
        let coord = make_coordinator(
            ScriptedTransport::new(),
            Arc::new(MemoryBaselineStore::new()),
            RunConfig::default().with_strategies([Strategy::Security, Strategy::Security]),
        );
        let probes = coord.plan().unwrap();
        assert!(probes.iter().all(|p| p.strategy == Strategy::Security));
        assert_eq!(probes.len(), crate::generator::security_inputs().len());
    }

    #[tokio::test]
    async fn test_run_probes_rejects_duplicate_ids() {
        let coord = make_coordinator(
            ScriptedTransport::new(),
            Arc::new(MemoryBaselineStore::new()),
            RunConfig::default(),
        );
        let probes = vec![
            Probe::new(Strategy::Functional, "john"),
            Probe::new(Strategy::Functional, "john"),
        ];
        let err = coord
            .run_probes(probes, &CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateProbeId(_)));
    }

    #[tokio::test]
    async fn test_new_baseline_persisted_once() {
        let store = Arc::new(MemoryBaselineStore::new());
        let transport = ScriptedTransport::new().script(
            "michael",
            [
                Step::Respond(ok_body("michael", &[("US", 0.6)])),
                Step::Respond(ok_body("michael", &[("GB", 0.6)])),
            ],
        );
        let coord = make_coordinator(transport, store.clone(), RunConfig::default());
        let probe = Probe::new(Strategy::Regression, "michael");

        let first = coord
            .run_probes(vec![probe.clone()], &CancelHandle::new())
            .await
            .unwrap();
        assert!(first.drift.is_empty());
        let stored = store.get(&probe.id).await.unwrap().unwrap();
        assert_eq!(stored.top_prediction_id.as_deref(), Some("US"));

        let second = coord
            .run_probes(vec![probe.clone()], &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(second.drift_ids(), vec![probe.id.as_str()]);
        // Drift never overwrites the accepted baseline.
        let stored = store.get(&probe.id).await.unwrap().unwrap();
        assert_eq!(stored.top_prediction_id.as_deref(), Some("US"));
    }

    #[tokio::test]
    async fn test_integration_case_variants_compared() {
        let transport = ScriptedTransport::new()
            .script(
                "john",
                [Step::Respond(ok_body("john", &[("US", 0.3), ("GB", 0.2)]))],
            )
            .script("John", [Step::Respond(ok_body("John", &[("US", 0.3)]))]);
        let coord = make_coordinator(
            transport,
            Arc::new(MemoryBaselineStore::new()),
            RunConfig::default(),
        );
        let probes = vec![
            Probe::new(Strategy::Integration, "john"),
            Probe::new(Strategy::Integration, "John"),
        ];
        let report = coord.run_probes(probes, &CancelHandle::new()).await.unwrap();
        assert_eq!(report.consistency.len(), 1);
        assert_eq!(report.consistency[0].group, "john");
        assert_eq!(report.consistency[0].prediction_counts, vec![2, 1]);
        assert!(report.passed());
    }

    #[tokio::test]
    async fn test_accept_baselines_overwrites() {
        let probe = Probe::new(Strategy::Regression, "michael");
        let store = Arc::new(MemoryBaselineStore::with_baselines([RegressionBaseline::new(
            probe.id.clone(),
            Some("US".into()),
            1,
        )]));

        let transport = ScriptedTransport::new()
            .script("michael", [Step::Respond(ok_body("michael", &[("GB", 0.5)]))]);
        let coord = make_coordinator(transport, store.clone(), RunConfig::default());
        let report = coord
            .run_probes(vec![probe.clone()], &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.drift.len(), 1);
        let entry = report.entry(&probe.id).unwrap();
        assert_eq!(entry.verdict, Verdict::Pass);
        assert_eq!(entry.top_prediction.as_deref(), Some("GB"));
        assert!(report.entry("regression-unknown").is_none());

        let accepted = coord.accept_baselines(&report).await.unwrap();
        assert_eq!(accepted, 1);
        let stored = store.get(&probe.id).await.unwrap().unwrap();
        assert_eq!(stored.top_prediction_id.as_deref(), Some("GB"));
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_drift_or_persist() {
        let store = Arc::new(MemoryBaselineStore::new());
        let probe = Probe::new(Strategy::Regression, "michael");
        store
            .set(RegressionBaseline::new(probe.id.clone(), Some("US".into()), 1))
            .await
            .unwrap();
        let transport = ScriptedTransport::new().with_fallback(Step::Respond(Err(
            crate::transport::TransportError::Connect("refused".into()),
        )));
        let executor = Executor::new(
            Arc::new(transport),
            ExecutorConfig::default().with_retry(crate::executor::RetryPolicy::none()),
        )
        .unwrap();
        let coord = RunCoordinator::new(executor, store.clone(), RunConfig::default());

        let report = coord
            .run_probes(vec![probe], &CancelHandle::new())
            .await
            .unwrap();
        assert!(report.drift.is_empty());
        assert_eq!(report.summary.count(Verdict::TransportError), 1);
        assert!(!report.passed());
    }
}
