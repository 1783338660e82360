use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::dispatch::WorkerSettings;
use crate::error::{BridgeError, Result};
use crate::planner::PlanningMode;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// OperatingMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Production,
    /// Workers read auction info from the schedule db instead of the API.
    Test,
}

// ---------------------------------------------------------------------------
// FeedConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub api_server: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_feed_retry")]
    pub retry: RetryPolicy,
}

fn default_api_version() -> String {
    "2.5".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_poll_interval() -> u64 {
    10
}

fn default_feed_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: Some(5),
        ..RetryPolicy::default()
    }
}

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Path or PATH-resolvable name of the auction worker.
    pub executable: String,
    /// Config file handed to worker invocations whose procurement method
    /// type has no entry in `configs`.
    pub config: String,
    /// Config file per procurement method type. The key `default` covers
    /// documents without a type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

// ---------------------------------------------------------------------------
// BridgeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub feed: FeedConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub schedule_db: PathBuf,
    #[serde(default)]
    pub replanning: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replanning_ids: Vec<String>,
    /// Backoff between worker launch attempts. Launches retry until success,
    /// so `max_attempts` is ignored here.
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Operating timezone used when the config names none.
pub const DEFAULT_TIMEZONE: &str = "Europe/Kiev";

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| BridgeError::InvalidTimezone(name.to_string()))
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: BridgeConfig = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    pub fn planning_mode(&self) -> PlanningMode {
        if self.replanning {
            PlanningMode::Replanning
        } else {
            PlanningMode::Normal
        }
    }

    pub fn replanning_ids(&self) -> HashSet<String> {
        self.replanning_ids.iter().cloned().collect()
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            executable: self.worker.executable.clone(),
            config: self.worker.config.clone(),
            configs: self.worker.configs.clone(),
            api_version: self.worker.api_version.clone(),
            mode: self.mode,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.feed.poll_interval_seconds)
    }

    /// Validate the config for common mistakes.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.timezone().is_err() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("unknown timezone '{}'", self.timezone),
            });
        }

        if self.feed.api_server.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "feed.api_server is empty".to_string(),
            });
        }

        if self.worker.executable.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "worker.executable is empty".to_string(),
            });
        } else if which::which(&self.worker.executable).is_err() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "worker executable '{}' not found or not executable",
                    self.worker.executable
                ),
            });
        }

        if self.worker.config.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "worker.config is empty".to_string(),
            });
        }

        for (method_type, path) in &self.worker.configs {
            if method_type.trim().is_empty() || path.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("worker.configs entry '{method_type}' is empty"),
                });
            }
        }

        if !self.replanning && !self.replanning_ids.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "replanning_ids has {} entries but replanning is disabled; they are ignored",
                    self.replanning_ids.len()
                ),
            });
        }

        if self.feed.poll_interval_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "feed.poll_interval_seconds is 0; the bridge will poll without pause"
                    .to_string(),
            });
        }

        warnings
    }
}

/// True if any warning is error-level.
pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
    warnings.iter().any(|w| w.level == WarnLevel::Error)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
