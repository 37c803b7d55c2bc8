//! apiprobe Core Library
//!
//! Conformance and resilience harness for a remote name-classification API.
//! Functional, integration, regression, security, fuzz and load probes share
//! one pipeline: generate probes, execute them through an injected transport,
//! validate each response with a single rule engine, compare regression
//! results against stored baselines, and build a report.

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod executor;
pub mod fakes;
pub mod generator;
pub mod http;
pub mod load;
pub mod obs;
pub mod report;
pub mod telemetry;
pub mod transport;
pub mod ui;
pub mod validator;

pub use config::{parse_strategies, HarnessConfig};

pub use coordinator::{accept_baselines, plan_probes, RunConfig, RunCoordinator};

pub use domain::{
    FailureReason, FuzzCategory, FuzzOrigin, HarnessError, Outcome, Probe, Result, SkipCause,
    Strategy, Verdict,
};

pub use executor::{BackoffShape, CancelHandle, Executor, ExecutorConfig, RetryPolicy};

pub use generator::{fuzz_case, InputGenerator};

pub use http::HttpTransport;

pub use load::{LoadProfile, LoadScenario};

pub use report::{ConsistencyFlag, DriftFlag, Report, ReportEntry, Summary};

pub use transport::{Transport, TransportError, TransportResponse};

pub use ui::{check_rendered_result, expected_result_text, BrowserDriver};

pub use validator::{validate, Validation};

pub use apiprobe_store::{BaselineStore, FsBaselineStore, RegressionBaseline};

/// apiprobe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
