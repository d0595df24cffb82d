//! Error types for calbridge.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the convergence loop should treat a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limit, quota, or a temporary server-side failure. Retried.
    Transient,
    /// The incremental sync cursor is no longer accepted; a full resync is needed.
    CursorExpired,
    /// Anything else. Propagated to the caller.
    #[default]
    Fatal,
}

/// A failure reported by a calendar backend (or by the provider process standing in for one).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        BackendError {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn cursor_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CursorExpired, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Errors that can occur in calbridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Batch on {calendar} failed: {failed} of {total} writes rejected ({source})")]
    BatchItem {
        calendar: String,
        failed: usize,
        total: usize,
        #[source]
        source: BackendError,
    },

    #[error("Bug: sync of '{calendar}' did not converge within {limit} iterations")]
    IterationLimit { calendar: String, limit: usize },
}

impl BridgeError {
    /// Whether the convergence loop may retry the round that produced this error.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Backend(e) => e.is_transient(),
            BridgeError::BatchItem { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias for calbridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
