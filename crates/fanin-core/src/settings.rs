//! Resolver settings: search horizon and budget.
//!
//! Defaults follow the historical behaviour of the CI server: at most 100
//! passed instances are considered per dependency. Values can be overridden
//! from the environment:
//!
//! - `FANIN_MAX_BACKTRACK_LIMIT`: candidates considered per dependency
//! - `FANIN_MAX_STEPS`: candidate evaluations before giving up
//! - `FANIN_MAX_DURATION_MS`: wall-clock ceiling (unset = none)
//! - `FANIN_ENFORCE_UPSTREAM`: `false` takes each dependency's newest passed
//!   run without checking that upstreams agree

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FanInError, FanInResult};

pub const DEFAULT_MAX_CANDIDATES_PER_EDGE: usize = 100;
pub const DEFAULT_MAX_STEPS: u64 = 10_000;

const ENV_MAX_CANDIDATES: &str = "FANIN_MAX_BACKTRACK_LIMIT";
const ENV_MAX_STEPS: &str = "FANIN_MAX_STEPS";
const ENV_MAX_DURATION_MS: &str = "FANIN_MAX_DURATION_MS";
const ENV_ENFORCE_UPSTREAM: &str = "FANIN_ENFORCE_UPSTREAM";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanInSettings {
    /// Search horizon: newest passed instances considered per dependency.
    pub max_candidates_per_edge: usize,
    /// Candidate evaluations allowed before `SearchBudgetExceeded`.
    pub max_steps: u64,
    /// Optional wall-clock ceiling in milliseconds.
    pub max_duration_ms: Option<u64>,
    /// Require upstream runs to agree on shared materials.
    pub enforce_upstream: bool,
}

impl Default for FanInSettings {
    fn default() -> Self {
        Self {
            max_candidates_per_edge: DEFAULT_MAX_CANDIDATES_PER_EDGE,
            max_steps: DEFAULT_MAX_STEPS,
            max_duration_ms: None,
            enforce_upstream: true,
        }
    }
}

impl FanInSettings {
    /// Defaults overridden by any `FANIN_*` variables that are set.
    pub fn from_env() -> FanInResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> FanInResult<Self> {
        let mut settings = Self::default();
        if let Some(raw) = lookup(ENV_MAX_CANDIDATES) {
            settings.max_candidates_per_edge = parse_setting(ENV_MAX_CANDIDATES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_STEPS) {
            settings.max_steps = parse_setting(ENV_MAX_STEPS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_DURATION_MS) {
            settings.max_duration_ms = Some(parse_setting(ENV_MAX_DURATION_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_ENFORCE_UPSTREAM) {
            settings.enforce_upstream = parse_setting(ENV_ENFORCE_UPSTREAM, &raw)?;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_max_candidates(mut self, n: usize) -> Self {
        self.max_candidates_per_edge = n;
        self
    }

    pub fn with_max_steps(mut self, n: u64) -> Self {
        self.max_steps = n;
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_enforce_upstream(mut self, enforce: bool) -> Self {
        self.enforce_upstream = enforce;
        self
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }

    /// Zero horizon or zero steps can never produce a resolution.
    pub fn validate(&self) -> FanInResult<()> {
        if self.max_candidates_per_edge == 0 {
            return Err(FanInError::InvalidSetting {
                key: ENV_MAX_CANDIDATES.to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_steps == 0 {
            return Err(FanInError::InvalidSetting {
                key: ENV_MAX_STEPS.to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_setting<T: std::str::FromStr>(key: &str, raw: &str) -> FanInResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| FanInError::InvalidSetting {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let settings = FanInSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, FanInSettings::default());
        assert_eq!(settings.max_candidates_per_edge, 100);
        assert!(settings.max_duration().is_none());
        assert!(settings.enforce_upstream);
    }

    #[test]
    fn test_upstream_enforcement_can_be_switched_off() {
        let settings =
            FanInSettings::from_lookup(lookup(&[("FANIN_ENFORCE_UPSTREAM", "false")])).unwrap();
        assert!(!settings.enforce_upstream);
        let err = FanInSettings::from_lookup(lookup(&[("FANIN_ENFORCE_UPSTREAM", "off")]))
            .unwrap_err();
        assert!(matches!(err, FanInError::InvalidSetting { ref key, .. } if key == "FANIN_ENFORCE_UPSTREAM"));
    }

    #[test]
    fn test_env_overrides_are_applied() {
        let settings = FanInSettings::from_lookup(lookup(&[
            ("FANIN_MAX_BACKTRACK_LIMIT", "5"),
            ("FANIN_MAX_STEPS", " 250 "),
            ("FANIN_MAX_DURATION_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(settings.max_candidates_per_edge, 5);
        assert_eq!(settings.max_steps, 250);
        assert_eq!(settings.max_duration(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        let err = FanInSettings::from_lookup(lookup(&[("FANIN_MAX_STEPS", "lots")])).unwrap_err();
        assert!(matches!(err, FanInError::InvalidSetting { ref key, .. } if key == "FANIN_MAX_STEPS"));
    }

    #[test]
    fn test_zero_horizon_is_rejected() {
        let err = FanInSettings::from_lookup(lookup(&[("FANIN_MAX_BACKTRACK_LIMIT", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: FanInSettings = serde_json::from_str(r#"{"max_steps": 42}"#).unwrap();
        assert_eq!(settings.max_steps, 42);
        assert_eq!(settings.max_candidates_per_edge, DEFAULT_MAX_CANDIDATES_PER_EDGE);
    }
}
