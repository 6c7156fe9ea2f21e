//! Scheduler configuration, loaded from YAML the same way `rks` loads its
//! own config: read the file, then deserialize, with `anyhow::Context`
//! wrapping both failure points.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_scheduler_name() -> String {
    "default-scheduler".to_string()
}

fn default_initial_backoff_secs() -> u64 {
    1
}

fn default_max_backoff_secs() -> u64 {
    10
}

fn default_max_unschedulable_secs() -> u64 {
    300
}

fn default_unhealthy_toleration_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_name")]
    pub scheduler_name: String,

    #[serde(default = "default_initial_backoff_secs")]
    pub binding_initial_backoff_secs: u64,

    #[serde(default = "default_max_backoff_secs")]
    pub binding_max_backoff_secs: u64,

    #[serde(default = "default_max_unschedulable_secs")]
    pub binding_max_in_unschedulable_secs: u64,

    #[serde(default = "default_unhealthy_toleration_secs")]
    pub unhealthy_toleration_secs: u64,

    #[serde(default)]
    pub enable_scheduler_estimator: bool,

    #[serde(default)]
    pub graceful_eviction: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: default_scheduler_name(),
            binding_initial_backoff_secs: default_initial_backoff_secs(),
            binding_max_backoff_secs: default_max_backoff_secs(),
            binding_max_in_unschedulable_secs: default_max_unschedulable_secs(),
            unhealthy_toleration_secs: default_unhealthy_toleration_secs(),
            enable_scheduler_estimator: false,
            graceful_eviction: false,
        }
    }
}

impl SchedulerConfig {
    pub fn binding_initial_backoff(&self) -> Duration {
        Duration::from_secs(self.binding_initial_backoff_secs)
    }

    pub fn binding_max_backoff(&self) -> Duration {
        Duration::from_secs(self.binding_max_backoff_secs)
    }

    pub fn binding_max_in_unschedulable(&self) -> Duration {
        Duration::from_secs(self.binding_max_in_unschedulable_secs)
    }

    pub fn unhealthy_toleration_timeout(&self) -> Duration {
        Duration::from_secs(self.unhealthy_toleration_secs)
    }
}

pub fn load_config(path: &str) -> Result<SchedulerConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read config from {path}"))?;
    let cfg: SchedulerConfig =
        serde_yaml::from_str(&content).context("failed to parse YAML scheduler config")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.scheduler_name, "default-scheduler");
        assert_eq!(cfg.binding_initial_backoff(), Duration::from_secs(1));
        assert_eq!(cfg.binding_max_backoff(), Duration::from_secs(10));
        assert_eq!(cfg.binding_max_in_unschedulable(), Duration::from_secs(300));
    }

    #[test]
    fn load_config_missing_file_errors() {
        let err = load_config("/nonexistent/path/scheduler.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
