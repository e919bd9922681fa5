//! Control plane configuration.
//!
//! Loaded from TOML; every section and field has a default so an empty file
//! is a valid configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use capctl_state::{
    CapabilityStore, FsCapabilityStore, MemoryCapabilityStore, SurrealCapabilityStore,
};
use serde::{Deserialize, Serialize};

use crate::domain::error::{CapctlError, Result};
use crate::domain::policy::MAX_DURATION_SECS;
use crate::domain::scoring::ScoringModel;
use crate::scheduler::DEFAULT_MAX_CONCURRENT;
use crate::scorecard::{DEFAULT_EVALUATION_INTERVAL_SECS, DEFAULT_HISTORY_WINDOW};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Fs,
    Surreal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory for the `fs` backend.
    pub path: Option<PathBuf>,
    /// Engine URL for the `surreal` backend (`mem://`, `ws://host:port`).
    pub url: Option<String>,
}

impl StoreConfig {
    pub async fn open(&self) -> Result<Arc<dyn CapabilityStore>> {
        Ok(match self.backend {
            StoreBackend::Memory => Arc::new(MemoryCapabilityStore::new()),
            StoreBackend::Fs => {
                let path = self.path.as_ref().ok_or_else(|| {
                    CapctlError::Config("store.path is required for the fs backend".into())
                })?;
                Arc::new(FsCapabilityStore::new(path)?)
            }
            StoreBackend::Surreal => {
                let url = self.url.as_deref().unwrap_or("mem://");
                Arc::new(SurrealCapabilityStore::connect(url).await?)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            tick_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorecardConfig {
    pub history_window: usize,
    pub evaluation_interval_secs: u64,
}

impl Default for ScorecardConfig {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            evaluation_interval_secs: DEFAULT_EVALUATION_INTERVAL_SECS,
        }
    }
}

/// Intervals of the background loops, in seconds. Zero disables a loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub scorecard_sweep_secs: u64,
    pub budget_reconcile_secs: u64,
    pub risk_revalidation_secs: u64,
    pub constitutional_revalidation_secs: u64,
    pub approval_sweep_secs: u64,
    pub policy_reload_secs: u64,
    pub cleanup_interval_secs: u64,
    pub metrics_flush_secs: u64,
    pub retention_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            scorecard_sweep_secs: 300,
            budget_reconcile_secs: 3600,
            risk_revalidation_secs: 600,
            constitutional_revalidation_secs: 3600,
            approval_sweep_secs: 60,
            policy_reload_secs: 30,
            cleanup_interval_secs: 3600,
            metrics_flush_secs: 300,
            retention_days: 7,
        }
    }
}

const MAX_RETENTION_DAYS: i64 = (MAX_DURATION_SECS / 86_400) as i64;

impl MaintenanceConfig {
    /// `None` when `retention_days` is out of range.
    pub fn retention(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_days(self.retention_days)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Base URL of the constitutional validator. Unset disables review.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 10,
        }
    }
}

impl ValidatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".into(),
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<tracing::Level> {
        self.level
            .parse()
            .map_err(|_| CapctlError::Config(format!("unknown log level {:?}", self.level)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub scorecard: ScorecardConfig,
    pub maintenance: MaintenanceConfig,
    pub scoring: ScoringModel,
    pub validator: ValidatorConfig,
    pub logging: LoggingConfig,
    /// Policy document (TOML or JSON). Unset uses the built-in tiers.
    pub policy_file: Option<PathBuf>,
}

impl ControlPlaneConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| CapctlError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`. Relative `policy_file` and `store.path` entries are
    /// resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CapctlError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(dir) = path.parent() {
            let rebase = |p: &mut PathBuf| {
                if p.is_relative() {
                    *p = dir.join(&*p);
                }
            };
            if let Some(p) = config.policy_file.as_mut() {
                rebase(p);
            }
            if let Some(p) = config.store.path.as_mut() {
                rebase(p);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        if self.scheduler.max_concurrent == 0 {
            return Err(CapctlError::Config(
                "scheduler.max_concurrent must be at least 1".into(),
            ));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(CapctlError::Config(
                "scheduler.tick_interval_secs must be positive".into(),
            ));
        }
        if self.scorecard.history_window == 0 {
            return Err(CapctlError::Config(
                "scorecard.history_window must be at least 1".into(),
            ));
        }
        if self.scorecard.evaluation_interval_secs > MAX_DURATION_SECS {
            return Err(CapctlError::Config(format!(
                "scorecard.evaluation_interval_secs must not exceed {MAX_DURATION_SECS}"
            )));
        }
        if self.maintenance.retention_days < 0 {
            return Err(CapctlError::Config(
                "maintenance.retention_days must not be negative".into(),
            ));
        }
        if self.maintenance.retention_days > MAX_RETENTION_DAYS {
            return Err(CapctlError::Config(format!(
                "maintenance.retention_days must not exceed {MAX_RETENTION_DAYS}"
            )));
        }
        self.logging.level()?;
        Ok(())
    }
}
