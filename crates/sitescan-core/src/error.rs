//! Error taxonomy for scan orchestration.
//!
//! Task-level failures (`AuditTimeout`, `AuditEngine`, `RetryBudgetExhausted`,
//! `Cancelled`) are absorbed by the retry controller and recorded per sample.
//! Only configuration errors are fatal, and only before scheduling starts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification attached to a failed audit by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditErrorKind {
    /// The page could not be reached.
    Network,
    /// The page loaded but the audit could not render or measure it.
    Render,
    /// The engine gave up on its own deadline before ours fired.
    Timeout,
    /// Anything else: engine crash, unreadable output.
    Internal,
}

impl fmt::Display for AuditErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditErrorKind::Network => "network",
            AuditErrorKind::Render => "render",
            AuditErrorKind::Timeout => "timeout",
            AuditErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Failure reported by an [`AuditEngine`](crate::engine::AuditEngine).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct AuditError {
    pub kind: AuditErrorKind,
    pub message: String,
}

impl AuditError {
    pub fn new(kind: AuditErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AuditErrorKind::Network, message)
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::new(AuditErrorKind::Render, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AuditErrorKind::Internal, message)
    }
}

/// Scan orchestration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    #[error("duplicate route: {path}")]
    DuplicateRoute { path: String },

    #[error("audit of {path} (sample {sample_index}) timed out after {timeout_ms}ms")]
    AuditTimeout {
        path: String,
        sample_index: u32,
        timeout_ms: u64,
    },

    #[error("audit of {path} (sample {sample_index}) failed with {kind} error: {message}")]
    AuditEngine {
        path: String,
        sample_index: u32,
        kind: AuditErrorKind,
        message: String,
    },

    #[error("retry budget exhausted for {path} (sample {sample_index}) after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        path: String,
        sample_index: u32,
        attempts: u32,
        last_error: String,
    },

    #[error("audit of {path} (sample {sample_index}) cancelled: route left scan scope")]
    Cancelled { path: String, sample_index: u32 },

    #[error("invalid configuration for `{field}`: {reason}")]
    Configuration { field: String, reason: String },

    #[error("configuration could not be parsed: {0}")]
    ConfigParse(String),

    #[error("configuration file {path} could not be read: {message}")]
    ConfigRead { path: String, message: String },

    #[error("unknown route: {0}")]
    UnknownRoute(String),

    #[error("no column `{label}` in category {category}")]
    UnknownColumn { category: String, label: String },

    #[error("invalid sample {sample_index} for {path}: {reason}")]
    InvalidSample {
        path: String,
        sample_index: u32,
        reason: String,
    },
}

impl ScanError {
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ScanError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the retry controller may schedule another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanError::AuditTimeout { .. } | ScanError::AuditEngine { .. }
        )
    }

    /// Whether this error must stop the process before any task is scheduled.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::Configuration { .. } | ScanError::ConfigParse(_) | ScanError::ConfigRead { .. }
        )
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(err: toml::de::Error) -> Self {
        ScanError::ConfigParse(err.to_string())
    }
}

/// Result type for scan operations.
pub type ScanResult<T> = std::result::Result<T, ScanError>;
