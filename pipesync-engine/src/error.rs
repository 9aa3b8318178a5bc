//! Error types for pipesync-engine.

use std::time::Duration;

use thiserror::Error;

use pipesync_core::error::DocumentError;

/// Faults that abort reconciliation of one mapping.
///
/// Everything less severe (conflicts, unresolved tasks, ambiguous rules)
/// degrades to a partial result inside the report instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Malformed input tree: duplicate or nameless tasks, bad task list, bad pattern.
    #[error("parse fault: {0}")]
    ParseFault(#[from] DocumentError),

    /// The worker reconciling this mapping panicked.
    #[error("reconciliation worker for '{mapping}' panicked")]
    Panicked { mapping: String },
}

/// Failure of an external capability call for a single item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// No response within the per-call timeout.
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    /// The capability could not be reached or its output was unreadable.
    #[error("transport fault: {0}")]
    Transport(String),

    /// The capability answered with a definitive refusal.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CapabilityError {
    /// Timeouts and transport faults are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapabilityError::Timeout { .. } | CapabilityError::Transport(_)
        )
    }
}
