//! Harness configuration.
//!
//! Precedence, lowest first: built-in defaults, `APIPROBE_*` environment
//! variables, an optional TOML file, then command-line flags (applied by the
//! binary).

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::coordinator::RunConfig;
use crate::domain::{HarnessError, Result, Strategy};
use crate::executor::ExecutorConfig;
use crate::http::DEFAULT_BASE_URL;
use crate::load::LoadProfile;

/// Default location of the baseline file.
pub const DEFAULT_BASELINE_PATH: &str = ".apiprobe/baselines.json";

/// Complete harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Service endpoint; the input is sent as the `name` query parameter.
    pub base_url: String,

    /// JSON file holding regression baselines.
    pub baseline_path: PathBuf,

    /// Where to write the JSON report, if anywhere.
    pub report_json: Option<PathBuf>,

    /// Where to write the markdown summary, if anywhere.
    pub report_markdown: Option<PathBuf>,

    pub strategies: Vec<Strategy>,

    /// Fuzz seed. Recorded in the report so failures can be replayed.
    pub seed: u64,

    pub fuzz_count: usize,

    pub strict: bool,

    pub persist_new_baselines: bool,

    pub run_deadline_ms: Option<u64>,

    /// Pacing profile applied to load probes.
    pub load_profile: Option<LoadProfile>,

    pub executor: ExecutorConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let run = RunConfig::default();
        let mut executor = ExecutorConfig::default();
        if let Some(n) = env_parse("APIPROBE_MAX_CONCURRENCY") {
            executor.max_concurrency = n;
        }
        if let Some(ms) = env_parse("APIPROBE_TIMEOUT_MS") {
            executor.per_request_timeout_ms = ms;
        }

        HarnessConfig {
            base_url: std::env::var("APIPROBE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            baseline_path: std::env::var("APIPROBE_BASELINE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_BASELINE_PATH)),
            report_json: std::env::var("APIPROBE_REPORT_JSON").ok().map(PathBuf::from),
            report_markdown: std::env::var("APIPROBE_REPORT_MD").ok().map(PathBuf::from),
            strategies: std::env::var("APIPROBE_STRATEGIES")
                .ok()
                .and_then(|v| parse_strategies(&v).ok())
                .unwrap_or(run.strategies),
            seed: env_parse("APIPROBE_SEED")
                .unwrap_or_else(|| Utc::now().timestamp_millis().unsigned_abs()),
            fuzz_count: env_parse("APIPROBE_FUZZ_COUNT").unwrap_or(run.fuzz_count),
            strict: env_parse("APIPROBE_STRICT").unwrap_or(run.strict),
            persist_new_baselines: run.persist_new_baselines,
            run_deadline_ms: env_parse("APIPROBE_DEADLINE_MS"),
            load_profile: std::env::var("APIPROBE_LOAD_PROFILE")
                .ok()
                .and_then(|v| v.parse().ok()),
            executor,
        }
    }
}

impl HarnessConfig {
    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Parse TOML; keys absent from the document keep their env/default value.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HarnessError::InvalidConfig(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.strategies.is_empty() {
            return Err(HarnessError::EmptyStrategySet);
        }
        if self.base_url.trim().is_empty() {
            return Err(HarnessError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }
        self.executor_config().validate()
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            strategies: self.strategies.clone(),
            fuzz_count: self.fuzz_count,
            seed: self.seed,
            strict: self.strict,
            persist_new_baselines: self.persist_new_baselines,
            run_deadline_ms: self.run_deadline_ms,
        }
    }

    /// Executor config, with load pacing applied when load probes run.
    pub fn executor_config(&self) -> ExecutorConfig {
        match self.load_profile {
            Some(profile) if self.strategies.contains(&Strategy::Load) => {
                profile.executor_config(&self.executor)
            }
            _ => self.executor.clone(),
        }
    }
}

/// Parse a comma-separated strategy list; `all` selects every strategy.
pub fn parse_strategies(list: &str) -> Result<Vec<Strategy>> {
    if list.trim().eq_ignore_ascii_case("all") {
        return Ok(Strategy::ALL.to_vec());
    }
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Strategy>())
        .collect()
}
