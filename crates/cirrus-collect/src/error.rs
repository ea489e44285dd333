//! Collection error types

use cirrus_metrics::AuditError;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a provider SDK binding.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SdkError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("api error {code}: {message}")]
    Api { code: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl SdkError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The credentials are valid but lack permission for this call.
    pub fn is_access_denied(&self) -> bool {
        match self {
            Self::Api { code, .. } => code.starts_with("AccessDenied") || code == "403",
            _ => false,
        }
    }
}

/// Failure of one guarded step of a collection run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollectError {
    #[error(transparent)]
    Sdk(#[from] SdkError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl CollectError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
