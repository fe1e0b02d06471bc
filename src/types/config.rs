//! Configuration structures.
//!
//! Configuration is loaded from environment variables and config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Event loop configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Event loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum queued tasks executed per tick before control returns to
    /// the caller (remote control messages are drained between ticks).
    pub max_tasks_per_tick: usize,

    /// Tasks running longer than this are logged at warn level.
    #[serde(with = "humantime_serde")]
    pub slow_task_warn: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_tick: 64,
            slow_task_warn: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.observability.log_level, "info");
        assert!(cfg.scheduler.max_tasks_per_tick > 0);
    }

    #[test]
    fn scheduler_config_roundtrips_humantime() {
        let cfg = SchedulerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("100ms"));
        let back: SchedulerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.slow_task_warn, cfg.slow_task_warn);
    }
}
