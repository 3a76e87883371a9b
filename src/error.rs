use std::time::Duration;

use thiserror::Error;

use crate::lock::LockType;
use crate::orchestration::JobId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Fail to gain {lock_type} lock for {object} within {timeout:?}")]
    LockTimeout {
        object: String,
        lock_type: LockType,
        timeout: Duration,
    },

    #[error("Another holder is already upgrading its lock on {object}")]
    LockUpgradeConflict { object: String },

    #[error("{target} did not converge after {attempts} attempts")]
    NotConverged { target: String, attempts: u32 },

    #[error("{object_type} with id {id} not found")]
    NotFound { object_type: String, id: u64 },

    #[error("No {capability} plugin registered for '{vendor}'")]
    ServiceUnavailable { capability: String, vendor: String },

    #[error("External system error: {0}")]
    External(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job engine is shut down")]
    EngineShutdown,
}

pub type Result<T> = std::result::Result<T, Error>;
