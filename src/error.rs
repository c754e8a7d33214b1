// ⚠️ Error Types - Store, planning and session failures
//
// Library operations return these typed errors. Binaries and loaders wrap
// them in anyhow with context.

use thiserror::Error;

/// Failure talking to the record store.
///
/// Every variant aborts the current operation only. The planner turns it into
/// a `PlanningError`, the executor records it in the outcome of the failing
/// operation and moves on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("member not found: {id}")]
    NotFound { id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Planning never yields a partial plan: it either completes or fails here.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("could not list current members: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no reconciliation plan is staged")]
    NothingStaged,

    #[error("staged plan {actual} does not match reviewed plan {expected}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error(transparent)]
    Planning(#[from] PlanningError),
}
