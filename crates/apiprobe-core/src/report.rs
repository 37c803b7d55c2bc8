//! Run report: per-probe entries, verdict counts, drift and consistency flags.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FailureReason, FuzzOrigin, Outcome, Probe, Strategy, Verdict};
use crate::validator::{prediction_count, top_prediction};

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// One row of the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportEntry {
    pub probe_id: String,
    pub strategy: Strategy,
    /// Escaped, truncated input.
    pub input_preview: String,
    pub verdict: Verdict,
    pub reason: Option<FailureReason>,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub attempts: u32,
    pub retries: u32,
    pub top_prediction: Option<String>,
    pub prediction_count: usize,
    /// Fuzz replay coordinates.
    pub origin: Option<FuzzOrigin>,
}

impl ReportEntry {
    pub fn from_outcome(probe: &Probe, outcome: &Outcome) -> Self {
        let body = outcome.parsed_body.as_ref();
        Self {
            probe_id: outcome.probe_id.clone(),
            strategy: outcome.strategy,
            input_preview: probe.input_preview(),
            verdict: outcome.verdict,
            reason: outcome.reason.clone(),
            latency_ms: outcome.latency_ms,
            status_code: outcome.status_code,
            attempts: outcome.attempts,
            retries: outcome.retries,
            top_prediction: body.and_then(top_prediction),
            prediction_count: body.map_or(0, prediction_count),
            origin: probe.origin,
        }
    }
}

/// Verdict counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub total: usize,
    /// Keyed by verdict name; every verdict is present.
    pub counts: BTreeMap<String, usize>,
    pub mean_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl Summary {
    pub fn from_entries(entries: &[ReportEntry]) -> Self {
        let mut counts: BTreeMap<String, usize> = Verdict::ALL
            .iter()
            .map(|v| (v.name().to_string(), 0))
            .collect();
        for entry in entries {
            *counts.entry(entry.verdict.name().to_string()).or_insert(0) += 1;
        }

        let executed: Vec<u64> = entries
            .iter()
            .filter(|e| e.verdict != Verdict::Skipped)
            .map(|e| e.latency_ms)
            .collect();
        let mean_latency_ms = if executed.is_empty() {
            0
        } else {
            executed.iter().sum::<u64>() / executed.len() as u64
        };

        Self {
            total: entries.len(),
            counts,
            mean_latency_ms,
            max_latency_ms: executed.iter().copied().max().unwrap_or(0),
        }
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.counts.get(verdict.name()).copied().unwrap_or(0)
    }
}

/// A regression probe whose result moved away from its baseline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriftFlag {
    pub probe_id: String,
    pub baseline_top: Option<String>,
    pub current_top: Option<String>,
    pub baseline_count: usize,
    pub current_count: usize,
}

/// Integration variants of one name that disagree with each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsistencyFlag {
    /// Case-folded input shared by the group.
    pub group: String,
    pub probe_ids: Vec<String>,
    pub prediction_counts: Vec<usize>,
    pub top_predictions: Vec<Option<String>>,
}

/// Run-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMeta {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    pub strategies: Vec<Strategy>,
    /// Drift and consistency flags fail the gate when set.
    pub strict: bool,
    pub duration_ms: u64,
}

/// Immutable result of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub schema_version: String,
    pub run: RunMeta,
    pub summary: Summary,
    pub entries: Vec<ReportEntry>,
    pub drift: Vec<DriftFlag>,
    pub consistency: Vec<ConsistencyFlag>,
}

impl Report {
    pub fn new(
        run: RunMeta,
        entries: Vec<ReportEntry>,
        drift: Vec<DriftFlag>,
        consistency: Vec<ConsistencyFlag>,
    ) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            summary: Summary::from_entries(&entries),
            run,
            entries,
            drift,
            consistency,
        }
    }

    /// Gate: no `Fail` or `TransportError`; in strict mode also no drift or
    /// consistency flags. Anomalies and skips never fail the gate.
    pub fn passed(&self) -> bool {
        let clean = self.summary.count(Verdict::Fail) == 0
            && self.summary.count(Verdict::TransportError) == 0;
        if self.run.strict {
            clean && self.drift.is_empty() && self.consistency.is_empty()
        } else {
            clean
        }
    }

    /// Entries with a `Fail`, `TransportError` or `Anomaly` verdict.
    pub fn problems(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| {
            matches!(
                e.verdict,
                Verdict::Fail | Verdict::TransportError | Verdict::Anomaly
            )
        })
    }

    pub fn drift_ids(&self) -> Vec<&str> {
        self.drift.iter().map(|d| d.probe_id.as_str()).collect()
    }

    pub fn entry(&self, probe_id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.probe_id == probe_id)
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("serialize report")?;
        std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
        Ok(())
    }

    /// Load a report previously written with [`Report::write_json`].
    pub fn read_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("parse report {:?}", path))
    }

    /// Render a markdown summary.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# apiprobe report\n\n");
        out.push_str(&format!(
            "- run: `{}`\n- generated: {}\n- seed: {}\n- strategies: {}\n- strict: {}\n- duration: {} ms\n- gate: **{}**\n\n",
            self.run.run_id,
            self.run.generated_at.to_rfc3339(),
            self.run.seed,
            self.run
                .strategies
                .iter()
                .map(Strategy::name)
                .collect::<Vec<_>>()
                .join(", "),
            self.run.strict,
            self.run.duration_ms,
            if self.passed() { "PASS" } else { "FAIL" },
        ));

        out.push_str("## Summary\n\n| verdict | count |\n|---|---|\n");
        for verdict in Verdict::ALL {
            out.push_str(&format!("| {} | {} |\n", verdict, self.summary.count(verdict)));
        }
        out.push_str(&format!(
            "| **total** | {} |\n\nlatency: mean {} ms, max {} ms\n\n",
            self.summary.total, self.summary.mean_latency_ms, self.summary.max_latency_ms
        ));

        let problems: Vec<&ReportEntry> = self.problems().collect();
        if !problems.is_empty() {
            out.push_str("## Failures and anomalies\n\n");
            out.push_str("| probe | strategy | input | verdict | reason |\n|---|---|---|---|---|\n");
            for e in problems {
                out.push_str(&format!(
                    "| `{}` | {} | `{}` | {} | {} |\n",
                    e.probe_id,
                    e.strategy,
                    escape_cell(&e.input_preview),
                    e.verdict,
                    e.reason
                        .as_ref()
                        .map(|r| escape_cell(&r.to_string()))
                        .unwrap_or_default(),
                ));
            }
            out.push('\n');
        }

        if !self.drift.is_empty() {
            out.push_str("## Regression drift\n\n");
            for d in &self.drift {
                out.push_str(&format!(
                    "- `{}`: top {} -> {}, count {} -> {}\n",
                    d.probe_id,
                    d.baseline_top.as_deref().unwrap_or("none"),
                    d.current_top.as_deref().unwrap_or("none"),
                    d.baseline_count,
                    d.current_count,
                ));
            }
            out.push('\n');
        }

        if !self.consistency.is_empty() {
            out.push_str("## Inconsistent variants\n\n");
            for c in &self.consistency {
                out.push_str(&format!(
                    "- `{}`: counts {:?} across {}\n",
                    escape_cell(&c.group),
                    c.prediction_counts,
                    c.probe_ids.join(", "),
                ));
            }
            out.push('\n');
        }
        out
    }

    /// Write the markdown summary.
    pub fn write_markdown(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render_markdown()).with_context(|| format!("write {:?}", path))?;
        Ok(())
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('`', "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SkipCause;

    fn make_entry(id: &str, verdict: Verdict, latency_ms: u64) -> ReportEntry {
        ReportEntry {
            probe_id: id.to_string(),
            strategy: Strategy::Functional,
            input_preview: "john".to_string(),
            verdict,
            reason: match verdict {
                Verdict::Fail => Some(FailureReason::MalformedBody),
                Verdict::Skipped => Some(FailureReason::Skipped {
                    cause: SkipCause::Cancelled,
                }),
                _ => None,
            },
            latency_ms,
            status_code: Some(200),
            attempts: 1,
            retries: 0,
            top_prediction: Some("US".to_string()),
            prediction_count: 1,
            origin: None,
        }
    }

    fn make_meta(strict: bool) -> RunMeta {
        RunMeta {
            run_id: "11111111-1111-1111-1111-111111111111".to_string(),
            generated_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("parse RFC3339")
                .with_timezone(&Utc),
            seed: 7,
            strategies: vec![Strategy::Functional, Strategy::Regression],
            strict,
            duration_ms: 120,
        }
    }

    fn make_drift() -> DriftFlag {
        DriftFlag {
            probe_id: "regression-abc".to_string(),
            baseline_top: Some("US".to_string()),
            current_top: Some("GB".to_string()),
            baseline_count: 5,
            current_count: 5,
        }
    }

    #[test]
    fn test_summary_counts_every_verdict() {
        let entries = vec![
            make_entry("a", Verdict::Pass, 10),
            make_entry("b", Verdict::Pass, 30),
            make_entry("c", Verdict::Anomaly, 20),
            make_entry("d", Verdict::Skipped, 0),
        ];
        let summary = Summary::from_entries(&entries);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.count(Verdict::Pass), 2);
        assert_eq!(summary.count(Verdict::Fail), 0);
        assert_eq!(summary.counts.len(), Verdict::ALL.len());
        assert_eq!(summary.mean_latency_ms, 20);
        assert_eq!(summary.max_latency_ms, 30);
    }

    #[test]
    fn test_gate_ignores_anomalies_and_drift_unless_strict() {
        let entries = vec![
            make_entry("a", Verdict::Pass, 1),
            make_entry("b", Verdict::Anomaly, 1),
        ];
        let lenient = Report::new(make_meta(false), entries.clone(), vec![make_drift()], vec![]);
        assert!(lenient.passed());

        let strict = Report::new(make_meta(true), entries, vec![make_drift()], vec![]);
        assert!(!strict.passed());
    }

    #[test]
    fn test_gate_fails_on_fail_or_transport_error() {
        let report = Report::new(
            make_meta(false),
            vec![make_entry("a", Verdict::Fail, 1)],
            vec![],
            vec![],
        );
        assert!(!report.passed());

        let report = Report::new(
            make_meta(false),
            vec![make_entry("a", Verdict::TransportError, 1)],
            vec![],
            vec![],
        );
        assert!(!report.passed());
    }

    #[test]
    fn test_empty_report_passes() {
        let report = Report::new(make_meta(false), vec![], vec![], vec![]);
        assert!(report.passed());
        assert_eq!(report.summary.total, 0);
        assert!(report.render_markdown().contains("| **total** | 0 |"));
    }

    #[test]
    fn test_report_schema_has_expected_keys() {
        let report = Report::new(
            make_meta(false),
            vec![make_entry("a", Verdict::Pass, 1)],
            vec![make_drift()],
            vec![],
        );
        let raw = serde_json::to_value(&report).expect("serialize report");
        let obj = raw.as_object().expect("report object");
        for key in ["schema_version", "run", "summary", "entries", "drift", "consistency"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(raw["summary"]["counts"]["pass"], 1);
        assert_eq!(raw["entries"][0]["verdict"], "pass");
        assert_eq!(raw["drift"][0]["current_top"], "GB");
    }

    #[test]
    fn test_write_and_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = Report::new(
            make_meta(true),
            vec![make_entry("a", Verdict::Fail, 3)],
            vec![make_drift()],
            vec![],
        );
        report.write_json(&path).unwrap();
        assert_eq!(Report::read_json(&path).unwrap(), report);
    }

    #[test]
    fn test_markdown_lists_problems_and_drift() {
        let mut problem = make_entry("fuzz-1", Verdict::Fail, 3);
        problem.input_preview = "a|b".to_string();
        let report = Report::new(
            make_meta(false),
            vec![make_entry("ok", Verdict::Pass, 1), problem],
            vec![make_drift()],
            vec![ConsistencyFlag {
                group: "john".to_string(),
                probe_ids: vec!["integration-1".to_string(), "integration-2".to_string()],
                prediction_counts: vec![5, 4],
                top_predictions: vec![Some("US".to_string()), Some("US".to_string())],
            }],
        );
        let md = report.render_markdown();
        assert!(md.contains("## Failures and anomalies"));
        assert!(md.contains("`fuzz-1`"));
        assert!(md.contains("a\\|b"));
        assert!(!md.contains("`ok`"));
        assert!(md.contains("`regression-abc`: top US -> GB"));
        assert!(md.contains("## Inconsistent variants"));
        assert!(md.contains("gate: **FAIL**"));
    }
}
