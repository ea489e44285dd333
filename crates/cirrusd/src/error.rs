//! Daemon error types

use cirrus_persist::PersistError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(String),

    #[error("collector unavailable: {0}")]
    Collector(String),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;
