//! In-memory fake for the baseline store (testing only)
//!
//! `MemoryBaselineStore` satisfies the `BaselineStore` contract without any
//! filesystem access.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::storage_traits::{BaselineStore, RegressionBaseline};

/// In-memory baseline store backed by a `BTreeMap<probe_id, baseline>`.
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    baselines: Mutex<BTreeMap<String, RegressionBaseline>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing baselines.
    pub fn with_baselines(baselines: impl IntoIterator<Item = RegressionBaseline>) -> Self {
        let map = baselines
            .into_iter()
            .map(|b| (b.probe_id.clone(), b))
            .collect();
        Self {
            baselines: Mutex::new(map),
        }
    }
}

#[async_trait]
impl BaselineStore for MemoryBaselineStore {
    async fn get(&self, probe_id: &str) -> StoreResult<Option<RegressionBaseline>> {
        let baselines = self.baselines.lock().unwrap();
        Ok(baselines.get(probe_id).cloned())
    }

    async fn set(&self, baseline: RegressionBaseline) -> StoreResult<()> {
        baseline.validate()?;
        let mut baselines = self.baselines.lock().unwrap();
        baselines.insert(baseline.probe_id.clone(), baseline);
        Ok(())
    }

    async fn insert_if_absent(&self, baseline: RegressionBaseline) -> StoreResult<bool> {
        baseline.validate()?;
        let mut baselines = self.baselines.lock().unwrap();
        if baselines.contains_key(&baseline.probe_id) {
            return Ok(false);
        }
        baselines.insert(baseline.probe_id.clone(), baseline);
        Ok(true)
    }

    async fn list(&self) -> StoreResult<Vec<RegressionBaseline>> {
        let baselines = self.baselines.lock().unwrap();
        Ok(baselines.values().cloned().collect())
    }
}
