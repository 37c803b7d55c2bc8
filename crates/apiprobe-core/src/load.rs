//! Load-driver seam.
//!
//! An external load driver owns virtual users and ramp-up. This module gives
//! it the pieces it reuses from the harness: per-profile probe batches, think
//! times, executor pacing and single-response validation.

use std::str::FromStr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::{dedupe_ids, HarnessError, Probe, Strategy};
use crate::executor::ExecutorConfig;
use crate::generator::{load_inputs, InputGenerator};
use crate::transport::TransportResult;
use crate::validator::{validate, Validation};

/// Traffic profile for load probes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadProfile {
    /// Common names with a 1-2 s think time.
    Polite,
    /// Random names of growing length with a 0.1-0.5 s think time.
    Stress,
}

impl LoadProfile {
    /// Inclusive think-time bounds in milliseconds.
    pub fn think_time_ms(&self) -> (u64, u64) {
        match self {
            LoadProfile::Polite => (1_000, 2_000),
            LoadProfile::Stress => (100, 500),
        }
    }

    /// Executor config whose lane pacing honours the minimum think time.
    /// Only load probes are paced; other strategies in the run are not slowed.
    pub fn executor_config(&self, base: &ExecutorConfig) -> ExecutorConfig {
        base.clone()
            .with_pacing_ms(self.think_time_ms().0)
            .pacing_only([Strategy::Load])
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoadProfile::Polite => "polite",
            LoadProfile::Stress => "stress",
        }
    }
}

impl FromStr for LoadProfile {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polite" => Ok(LoadProfile::Polite),
            "stress" => Ok(LoadProfile::Stress),
            other => Err(HarnessError::InvalidConfig(format!(
                "unknown load profile: {other}"
            ))),
        }
    }
}

/// Probe source for one virtual user.
#[derive(Debug, Clone)]
pub struct LoadScenario {
    profile: LoadProfile,
    generator: InputGenerator,
    think_rng: StdRng,
}

impl LoadScenario {
    pub fn new(profile: LoadProfile, seed: u64) -> Self {
        Self {
            profile,
            generator: InputGenerator::new(seed),
            think_rng: StdRng::seed_from_u64(seed.rotate_left(17)),
        }
    }

    pub fn profile(&self) -> LoadProfile {
        self.profile
    }

    /// Next batch of load probes. Stress batches use fresh random names so
    /// results are not skewed by caching.
    pub fn next_batch(&mut self) -> Vec<Probe> {
        let inputs = match self.profile {
            LoadProfile::Polite => load_inputs(),
            LoadProfile::Stress => self.generator.stress_inputs(),
        };
        let mut probes: Vec<Probe> = inputs
            .into_iter()
            .map(|name| Probe::new(Strategy::Load, name))
            .collect();
        dedupe_ids(&mut probes);
        probes
    }

    /// Pause a virtual user should take between requests.
    pub fn think_time(&mut self) -> Duration {
        let (min, max) = self.profile.think_time_ms();
        Duration::from_millis(self.think_rng.gen_range(min..=max))
    }

    /// Validate one response the driver obtained for `probe`.
    pub fn check(&self, probe: &Probe, response: &TransportResult) -> Validation {
        validate(probe, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Verdict;
    use crate::generator::STRESS_LENGTHS;
    use crate::transport::TransportResponse;

    #[test]
    fn test_polite_batch_is_fixed() {
        let mut scenario = LoadScenario::new(LoadProfile::Polite, 1);
        let a = scenario.next_batch();
        let b = scenario.next_batch();
        assert_eq!(a, b);
        assert!(a.iter().all(|p| p.strategy == Strategy::Load));
        assert_eq!(a[0].input, "john");
    }

    #[test]
    fn test_stress_batches_vary_and_cover_lengths() {
        let mut scenario = LoadScenario::new(LoadProfile::Stress, 1);
        let a = scenario.next_batch();
        let b = scenario.next_batch();
        assert_ne!(a, b);
        let lengths: Vec<usize> = a.iter().map(|p| p.input.len()).collect();
        assert_eq!(lengths, STRESS_LENGTHS.to_vec());
    }

    #[test]
    fn test_think_time_within_profile_bounds() {
        for profile in [LoadProfile::Polite, LoadProfile::Stress] {
            let mut scenario = LoadScenario::new(profile, 3);
            let (min, max) = profile.think_time_ms();
            for _ in 0..100 {
                let t = scenario.think_time().as_millis() as u64;
                assert!((min..=max).contains(&t), "{profile:?} think time {t}");
            }
        }
    }

    #[test]
    fn test_executor_config_pacing() {
        let base = ExecutorConfig::default();
        assert_eq!(
            LoadProfile::Polite.executor_config(&base).pacing_interval_ms,
            1_000
        );
        assert_eq!(
            LoadProfile::Stress.executor_config(&base).pacing_interval_ms,
            100
        );
        assert_eq!(
            LoadProfile::Stress.executor_config(&base).paced_strategies,
            vec![Strategy::Load]
        );
    }

    #[test]
    fn test_check_accepts_rate_limiting() {
        let scenario = LoadScenario::new(LoadProfile::Stress, 1);
        let probe = Probe::new(Strategy::Load, "abc");
        let v = scenario.check(&probe, &Ok(TransportResponse::new(429, "")));
        assert_eq!(v.verdict, Verdict::Pass);
        let v = scenario.check(&probe, &Ok(TransportResponse::new(503, "")));
        assert_eq!(v.verdict, Verdict::Fail);
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!("Polite".parse::<LoadProfile>().unwrap(), LoadProfile::Polite);
        assert!("burst".parse::<LoadProfile>().is_err());
    }
}
