use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoreResult;
use crate::storage_traits::{BaselineStore, RegressionBaseline};

/// File-backed baseline store.
///
/// Layout: a single pretty-printed JSON array at `path`, ordered by probe id.
/// Every mutation rewrites the whole file via temp file + rename so a crash
/// never leaves a half-written baseline set behind.
pub struct FsBaselineStore {
    path: PathBuf,
    baselines: Mutex<BTreeMap<String, RegressionBaseline>>,
}

impl FsBaselineStore {
    /// Open the store at `path`, loading existing baselines. A missing file is
    /// an empty store; the file is created on the first write.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let baselines = if path.exists() {
            let raw = fs::read(&path)?;
            if raw.iter().all(|b| b.is_ascii_whitespace()) {
                BTreeMap::new()
            } else {
                let records: Vec<RegressionBaseline> = serde_json::from_slice(&raw)?;
                records
                    .into_iter()
                    .map(|b| (b.probe_id.clone(), b))
                    .collect()
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), count = baselines.len(), "opened baseline store");
        Ok(Self {
            path,
            baselines: Mutex::new(baselines),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, baselines: &BTreeMap<String, RegressionBaseline>) -> StoreResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let records: Vec<&RegressionBaseline> = baselines.values().collect();
        let content = serde_json::to_vec_pretty(&records)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&content)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl BaselineStore for FsBaselineStore {
    async fn get(&self, probe_id: &str) -> StoreResult<Option<RegressionBaseline>> {
        let baselines = self.baselines.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(baselines.get(probe_id).cloned())
    }

    async fn set(&self, baseline: RegressionBaseline) -> StoreResult<()> {
        baseline.validate()?;
        let mut baselines = self.baselines.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = baselines.insert(baseline.probe_id.clone(), baseline.clone());
        if let Err(e) = self.persist(&baselines) {
            // Keep memory consistent with disk.
            match previous {
                Some(prev) => baselines.insert(prev.probe_id.clone(), prev),
                None => baselines.remove(&baseline.probe_id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn insert_if_absent(&self, baseline: RegressionBaseline) -> StoreResult<bool> {
        baseline.validate()?;
        let mut baselines = self.baselines.lock().unwrap_or_else(PoisonError::into_inner);
        if baselines.contains_key(&baseline.probe_id) {
            return Ok(false);
        }
        let probe_id = baseline.probe_id.clone();
        baselines.insert(probe_id.clone(), baseline);
        if let Err(e) = self.persist(&baselines) {
            baselines.remove(&probe_id);
            return Err(e);
        }
        Ok(true)
    }

    async fn list(&self) -> StoreResult<Vec<RegressionBaseline>> {
        let baselines = self.baselines.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(baselines.values().cloned().collect())
    }
}
