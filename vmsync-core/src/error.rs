//! Error kinds shared across the reconciliation core.

use std::time::Duration;

use thiserror::Error;

/// Unified result type for the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error carried by every failing path in the core.
///
/// None of these are fatal to the embedding process; the external scheduler
/// decides retry timing. `is_fatal` marks the kinds where a retry cannot
/// succeed until the declared record itself changes.
#[derive(Debug, Error)]
pub enum Error {
    /// An inventory object or VM with the given name does not exist.
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    /// More than one inventory object matched and no selection rule applied.
    #[error("{kind} {name:?} is ambiguous: {count} matches")]
    Ambiguous {
        kind: &'static str,
        name: String,
        count: usize,
    },

    /// The declared record cannot be acted on as written.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// The backend refused an operation (quota, permission, wrong state).
    #[error("backend rejected {op}: {reason}")]
    BackendRejected { op: &'static str, reason: String },

    /// An asynchronous task did not reach a terminal state within the budget.
    #[error("task did not finish within {budget:?}")]
    TaskTimeout { budget: Duration },

    /// The invocation's cancellation signal fired mid-wait.
    #[error("reconcile cancelled")]
    Cancelled,

    /// A synchronous backend call failed at the transport level.
    #[error("backend call failed: {0}")]
    Backend(String),
}

impl Error {
    /// True when requeueing cannot help until the declared spec is fixed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvalidSpec(_))
    }

    pub(crate) fn not_found(kind: &'static str, name: &str) -> Self {
        Error::NotFound {
            kind,
            name: name.to_string(),
        }
    }
}
