//! Dispatcher configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! Durations are plain integers with the unit in the field name.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Order in which pending tasks are handed to free slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// Earliest-submitted first.
    #[default]
    Fifo,
    /// Highest `TaskSpec::priority` first, then earliest-submitted.
    Priority,
}

/// Tunables for one dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatchConfig {
    /// Calls per window assumed for credentials without their own ceiling.
    #[serde(default = "default_quota_ceiling")]
    pub default_quota_ceiling: u32,
    /// Window length used when the API does not report a reset time.
    #[serde(default = "default_fallback_window_secs")]
    pub fallback_window_secs: u64,
    /// Retries after the first attempt: a task gets up to `retry_budget + 1`
    /// transient failures before it is abandoned.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Pages fetched per assignment before the task goes back to the queue.
    #[serde(default = "default_burst")]
    pub burst: usize,
    #[serde(default)]
    pub scheduling: Scheduling,
    /// Space calls on a credential by the endpoint's documented rate.
    #[serde(default)]
    pub pacing: bool,
}

fn default_quota_ceiling() -> u32 {
    15
}

fn default_fallback_window_secs() -> u64 {
    15 * 60
}

fn default_retry_budget() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_burst() -> usize {
    4
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_quota_ceiling: default_quota_ceiling(),
            fallback_window_secs: default_fallback_window_secs(),
            retry_budget: default_retry_budget(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            burst: default_burst(),
            scheduling: Scheduling::default(),
            pacing: false,
        }
    }
}

impl DispatchConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> common::Result<Self> {
        let config: DispatchConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        if self.default_quota_ceiling == 0 {
            return Err(common::Error::Config(
                "default_quota_ceiling must be greater than 0".into(),
            ));
        }
        if self.fallback_window_secs == 0 {
            return Err(common::Error::Config(
                "fallback_window_secs must be greater than 0".into(),
            ));
        }
        if self.burst == 0 {
            return Err(common::Error::Config("burst must be greater than 0".into()));
        }
        if self.backoff_base_ms == 0 {
            return Err(common::Error::Config(
                "backoff_base_ms must be greater than 0".into(),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(common::Error::Config(format!(
                "backoff_max_ms ({}) must not be below backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }

    pub fn fallback_window(&self) -> Duration {
        Duration::from_secs(self.fallback_window_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = DispatchConfig::from_toml_str("").unwrap();
        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.fallback_window(), Duration::from_secs(900));
        assert_eq!(config.scheduling, Scheduling::Fifo);
        assert!(!config.pacing);
    }

    #[test]
    fn overrides_are_read() {
        let config = DispatchConfig::from_toml_str(
            r#"
default_quota_ceiling = 180
fallback_window_secs = 60
retry_budget = 0
burst = 1
scheduling = "priority"
pacing = true
"#,
        )
        .unwrap();
        assert_eq!(config.default_quota_ceiling, 180);
        assert_eq!(config.fallback_window(), Duration::from_secs(60));
        assert_eq!(config.retry_budget, 0);
        assert_eq!(config.burst, 1);
        assert_eq!(config.scheduling, Scheduling::Priority);
        assert!(config.pacing);
    }

    #[test]
    fn zero_burst_is_rejected() {
        let err = DispatchConfig::from_toml_str("burst = 0").unwrap_err();
        assert!(err.to_string().contains("burst"), "got: {err}");
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        assert!(DispatchConfig::from_toml_str("default_quota_ceiling = 0").is_err());
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(DispatchConfig::from_toml_str("fallback_window_secs = 0").is_err());
    }

    #[test]
    fn backoff_max_below_base_is_rejected() {
        let err = DispatchConfig::from_toml_str("backoff_base_ms = 500\nbackoff_max_ms = 100")
            .unwrap_err();
        assert!(err.to_string().contains("backoff_max_ms"), "got: {err}");
    }

    #[test]
    fn unknown_scheduling_is_a_parse_error() {
        let err = DispatchConfig::from_toml_str(r#"scheduling = "lifo""#).unwrap_err();
        assert!(matches!(err, common::Error::Toml(_)), "got: {err:?}");
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.toml");
        std::fs::write(&path, "retry_budget = 5\n").unwrap();

        let config = DispatchConfig::load(&path).unwrap();
        assert_eq!(config.retry_budget, 5);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = DispatchConfig::load(Path::new("/nonexistent/dispatch.toml")).unwrap_err();
        assert!(matches!(err, common::Error::Io(_)));
    }
}
