//! Fabric configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fabric_state::{DB_FILE, DEFAULT_LOCK_TIMEOUT};
use serde::{Deserialize, Serialize};

use crate::error::{FabricError, FabricResult};
use crate::retrieval::{ScoreWeights, DEFAULT_RECENCY_DECAY_DAYS};

/// Directory under the data dir holding the event log.
pub const EVENTS_DIR: &str = "events";

/// Data directory name used when none is configured.
pub const DEFAULT_DIR_NAME: &str = ".memory_fabric";

pub const ENV_DIR: &str = "MEMORY_FABRIC_DIR";
pub const ENV_LOCK_TIMEOUT_MS: &str = "MEMORY_FABRIC_LOCK_TIMEOUT_MS";
pub const ENV_RECENCY_DAYS: &str = "MEMORY_FABRIC_RECENCY_DAYS";

/// Where the fabric keeps its files and how it scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricConfig {
    pub data_dir: PathBuf,
    /// Upper bound on waiting for the read-store write lock.
    pub lock_timeout: Duration,
    pub recency_decay_days: f64,
    pub weights: ScoreWeights,
}

impl FabricConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            recency_decay_days: DEFAULT_RECENCY_DECAY_DAYS,
            weights: ScoreWeights::default(),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_recency_decay_days(mut self, days: f64) -> Self {
        self.recency_decay_days = days;
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    /// `<data_dir>/events`
    pub fn events_dir(&self) -> PathBuf {
        self.data_dir.join(EVENTS_DIR)
    }

    /// `<data_dir>/memory_fabric.db`
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn validate(&self) -> FabricResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(FabricError::Config("data directory must not be empty".into()));
        }
        if !(self.recency_decay_days.is_finite() && self.recency_decay_days > 0.0) {
            return Err(FabricError::Config(format!(
                "recency decay must be a positive number of days, got {}",
                self.recency_decay_days
            )));
        }
        let w = &self.weights;
        if [w.fts, w.importance, w.recency, w.graph]
            .iter()
            .any(|x| !x.is_finite() || *x < 0.0)
        {
            return Err(FabricError::Config("score weights must be non-negative".into()));
        }
        Ok(())
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - MEMORY_FABRIC_DIR (optional, default: `$HOME/.memory_fabric`)
    /// - MEMORY_FABRIC_LOCK_TIMEOUT_MS (optional, default: 5000)
    /// - MEMORY_FABRIC_RECENCY_DAYS (optional, default: 365)
    pub fn from_env() -> FabricResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> FabricResult<Self> {
        let data_dir = match lookup(ENV_DIR) {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => default_data_dir(lookup("HOME").as_deref()),
        };
        let mut config = Self::new(data_dir);

        if let Some(raw) = lookup(ENV_LOCK_TIMEOUT_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                FabricError::Config(format!("{ENV_LOCK_TIMEOUT_MS} is not an integer: {raw}"))
            })?;
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(ENV_RECENCY_DAYS) {
            config.recency_decay_days = raw.trim().parse().map_err(|_| {
                FabricError::Config(format!("{ENV_RECENCY_DAYS} is not a number: {raw}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }
}

/// `$HOME/.memory_fabric`, or `./.memory_fabric` without a home directory.
pub fn default_data_dir(home: Option<&str>) -> PathBuf {
    match home {
        Some(home) if !home.is_empty() => Path::new(home).join(DEFAULT_DIR_NAME),
        _ => PathBuf::from(DEFAULT_DIR_NAME),
    }
}
