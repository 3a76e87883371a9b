use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::util::expand_tilde;
use crate::{Error, Result};

/// Job status reported when some task failed but the graph ran to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    CompletedWithErrors,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Jobs running at the same time.
    pub job_pool_size: usize,
    /// Task bodies running at the same time, across all jobs.
    pub task_pool_size: usize,
    pub lock_timeout_ms: u64,
    pub failure_policy: FailurePolicy,
    /// JSON-lines file receiving every finished job.
    pub history_file: Option<String>,
    /// Finished jobs kept in memory for `query`; older ones are evicted.
    pub finished_job_retention: usize,
    pub deployment_poll_attempts: u32,
    pub deployment_poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            job_pool_size: 10,
            task_pool_size: 40,
            lock_timeout_ms: 60 * 60 * 1000,
            failure_policy: FailurePolicy::default(),
            history_file: None,
            finished_job_retention: 100,
            deployment_poll_attempts: 10,
            deployment_poll_interval_ms: 3000,
        }
    }
}

impl Config {
    pub fn conform_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conformd"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conform_dir()?.join("conformd.toml"))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn deployment_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deployment_poll_interval_ms)
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_file.as_deref().map(expand_tilde)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(?config, "Config loaded");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let conform_dir = Self::conform_dir()?;
        if !conform_dir.exists() {
            debug!(dir = %conform_dir.display(), "Creating config directory");
            fs::create_dir_all(&conform_dir)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_pool_size == 0 {
            return Err(Error::Validation("job_pool_size must be at least 1".to_string()));
        }
        if self.task_pool_size == 0 {
            return Err(Error::Validation("task_pool_size must be at least 1".to_string()));
        }
        if self.deployment_poll_attempts == 0 {
            return Err(Error::Validation(
                "deployment_poll_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
