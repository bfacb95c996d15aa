//! Engine error types
//!
//! Structured errors for every engine operation. The loop translates these
//! into rollback-attempt semantics; anything that breaks commit/rollback
//! atomicity is fatal and promotes the session to `failed`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Git operation failed
    #[error("git operation failed: {operation} - {message}")]
    Git { operation: String, message: String },

    /// Worktree lifecycle operation failed
    #[error("worktree operation failed: {operation} - {message}")]
    Worktree { operation: String, message: String },

    /// Working-tree rollback failed; the loop cannot continue safely
    #[error("rollback failed: {message}")]
    RollbackFailed { message: String },

    /// Agent stream terminated with an error
    #[error("agent error: {message}")]
    Agent { message: String },

    /// The run was cancelled by an abort signal
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error (invalid preset, missing metrics in strict mode)
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Illegal session state transition
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Session id not known to the supervisor
    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    /// The given path is not inside a repository
    #[error("not a repository: {path}")]
    NotARepository { path: PathBuf },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Create a git operation error
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a worktree error
    pub fn worktree(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worktree {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an agent error
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this failure invalidates commit/rollback atomicity.
    ///
    /// Fatal errors end the session; everything else is recovered locally
    /// (a metric scores 0, an agent turn counts as a stall).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RollbackFailed { .. } | Self::Worktree { .. } | Self::NotARepository { .. }
        )
    }
}
