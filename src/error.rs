//! Dispatch Error Taxonomy
//!
//! Every failure surfaced by the dispatch core falls into one of five
//! buckets:
//!
//! - **no-candidate**: no agent/model/backend cleared its minimum threshold;
//!   a hard failure, never retried internally.
//! - **capacity**: rate limiter admission timed out; the caller may retry.
//! - **circuit-open**: every member of the target pool was unavailable after
//!   bounded failover.
//! - **backend-execution**: the adapter itself failed; returned only after
//!   all configured fallback attempts were exhausted, with the attempt
//!   history attached.
//! - **validation**: malformed configuration or request, rejected
//!   immediately.
//!
//! Callers always receive either a concrete decision/result or one of these
//! typed errors identifying which candidates were attempted.

use std::time::Duration;

use thiserror::Error;

/// Record of one attempt against one candidate during failover
#[derive(Clone, Debug)]
pub struct AttemptRecord {
    /// Backend or agent identifier that was attempted
    pub candidate_id: String,
    /// How long the attempt took before failing
    pub elapsed: Duration,
    /// Why the attempt failed
    pub outcome: String,
}

impl AttemptRecord {
    /// Create a new attempt record
    pub fn new(candidate_id: impl Into<String>, elapsed: Duration, outcome: impl Into<String>) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            elapsed,
            outcome: outcome.into(),
        }
    }
}

/// Errors surfaced by the dispatch core
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No candidate cleared its minimum threshold
    #[error("no candidate cleared the threshold for {subject}: {detail}")]
    NoCandidate {
        /// What was being selected (agent, model, pool member)
        subject: String,
        /// Human-readable context (e.g. best rejected score)
        detail: String,
    },

    /// Rate limiter admission timed out
    #[error("rate limit admission timed out for backend {backend_id} after {waited:?}")]
    Capacity {
        /// Backend whose limiter rejected the request
        backend_id: String,
        /// How long the caller waited before giving up
        waited: Duration,
    },

    /// All members of a pool were unavailable (open circuits / unhealthy)
    #[error("all {attempted} member(s) of pool {pool_id} unavailable")]
    CircuitOpen {
        /// Pool that had no selectable members
        pool_id: String,
        /// How many members were considered
        attempted: usize,
    },

    /// Backend execution failed after exhausting failover
    #[error("backend execution failed in pool {pool_id} after {} attempt(s): {last_error}", attempts.len())]
    BackendExecution {
        /// Pool the request was executed against
        pool_id: String,
        /// Every candidate attempted, in order
        attempts: Vec<AttemptRecord>,
        /// The final underlying error message
        last_error: String,
    },

    /// Malformed configuration or request
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced aggregate does not exist
    #[error("unknown {kind}: {id}")]
    UnknownId {
        /// Aggregate kind (pool, agent, binding, model)
        kind: &'static str,
        /// The identifier that failed lookup
        id: String,
    },
}

impl DispatchError {
    /// Whether the caller may reasonably retry this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Capacity { .. } | Self::CircuitOpen { .. })
    }

    /// The attempt history, if this error carries one
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::BackendExecution { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

/// Convenience result alias for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;
