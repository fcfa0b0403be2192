//! Error types for the operation queue.

use std::sync::Arc;

/// Boxed error type produced by operation bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from queue construction and reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The concurrency ceiling must admit at least one operation.
    #[error("max concurrent operations must be at least 1, got {given}")]
    InvalidMaxConcurrent {
        /// The rejected value.
        given: usize,
    },
}

/// Terminal failure of a single operation, observed on its handle.
///
/// Exactly one of these (or a clean completion) terminates every handle.
/// A body failure affects only its own operation; the queue keeps running.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OperationError {
    /// The operation body produced an error.
    #[error("operation body failed: {0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),
    /// The operation's cancel signal fired before the value stream finished.
    #[error("operation was cancelled")]
    Cancelled,
    /// The operation was submitted after `shutdown` was called.
    #[error("queue is shutting down")]
    ShutdownInProgress,
}

impl OperationError {
    pub(crate) fn from_body(err: BoxError) -> Self {
        OperationError::Failed(Arc::from(err))
    }

    /// Returns `true` if this is a body failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, OperationError::Failed(_))
    }

    /// Returns `true` if the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationError::Cancelled)
    }

    /// Returns `true` if the submission was rejected by shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, OperationError::ShutdownInProgress)
    }
}
