//! Storage trait definitions for apiprobe
//!
//! `BaselineStore` holds the last accepted result per probe key so a run can
//! be compared against the previous one. The trait is async and
//! backend-agnostic. An in-memory fake lives in the `fakes` module and a
//! file-backed store in `fs_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The last accepted reference result for a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionBaseline {
    /// Stable probe key this baseline belongs to
    pub probe_id: String,
    /// First-ranked `country_id` returned by the service, if any
    pub top_prediction_id: Option<String>,
    /// Number of predictions returned
    pub prediction_count: usize,
    /// When this baseline was accepted
    pub recorded_at: DateTime<Utc>,
}

impl RegressionBaseline {
    /// Create a baseline stamped with the current time.
    pub fn new(
        probe_id: impl Into<String>,
        top_prediction_id: Option<String>,
        prediction_count: usize,
    ) -> Self {
        Self {
            probe_id: probe_id.into(),
            top_prediction_id,
            prediction_count,
            recorded_at: Utc::now(),
        }
    }

    /// Reject records that could never have come from a real probe.
    pub fn validate(&self) -> StoreResult<()> {
        if self.probe_id.trim().is_empty() {
            return Err(StoreError::InvalidBaseline {
                probe_id: self.probe_id.clone(),
                reason: "probe id must not be empty".to_string(),
            });
        }
        if self.top_prediction_id.is_some() && self.prediction_count == 0 {
            return Err(StoreError::InvalidBaseline {
                probe_id: self.probe_id.clone(),
                reason: "top prediction present but prediction count is zero".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `other` describes the same top prediction and count.
    pub fn matches(&self, top_prediction_id: Option<&str>, prediction_count: usize) -> bool {
        self.top_prediction_id.as_deref() == top_prediction_id
            && self.prediction_count == prediction_count
    }
}

/// Regression baseline store.
///
/// Guarantees:
/// - at most one baseline per `probe_id`;
/// - `set` is the explicit "accept as new baseline" action and overwrites;
/// - `insert_if_absent` never overwrites an existing baseline.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Fetch the baseline for a probe, if one was ever accepted.
    async fn get(&self, probe_id: &str) -> StoreResult<Option<RegressionBaseline>>;

    /// Accept `baseline` as the reference for its probe (last writer wins).
    async fn set(&self, baseline: RegressionBaseline) -> StoreResult<()>;

    /// Store `baseline` only if its probe has none yet. Returns `true` if stored.
    async fn insert_if_absent(&self, baseline: RegressionBaseline) -> StoreResult<bool>;

    /// All baselines ordered by probe id.
    async fn list(&self) -> StoreResult<Vec<RegressionBaseline>>;
}
