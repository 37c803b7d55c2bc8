//! apiprobe-store: regression baseline persistence
//!
//! Holds the last known-good result per probe key so consecutive harness
//! runs can be compared for drift.
//!
//! ## Key Components
//!
//! - `BaselineStore`: async key-value contract (get / set / insert_if_absent / list)
//! - `RegressionBaseline`: top prediction + prediction count for one probe
//! - `FsBaselineStore`: JSON file backend with atomic rewrites
//! - `fakes::MemoryBaselineStore`: in-memory backend for tests

mod error;
pub mod fakes;
mod fs_store;
pub mod storage_traits;

pub use error::{StoreError, StoreResult};
pub use fs_store::FsBaselineStore;
pub use storage_traits::{BaselineStore, RegressionBaseline};
