//! Typed error surface for the queue engine.
//!
//! Only one variant is unique to this crate's own invariants
//! (`Backend`, §4.4.2's "could not pop all" check). Everything else is a
//! passthrough from the backend so callers see the real underlying fault.
//! This crate stays storage-agnostic, so `Database`/`Migration` carry
//! stringified faults; concrete backends (e.g. `workqueue-postgres`) provide
//! `From` impls that convert their own error types into these variants.

use thiserror::Error;

/// Errors surfaced by a [`crate::store::QueueStore`] implementation.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The backend's own invariant was violated, e.g. a `pop` candidate set
    /// selected under `FOR UPDATE` could not be fully marked popped. This
    /// should never happen absent a driver bug; it is not retried.
    #[error("backend invariant violation in queue `{queue}`: {message}")]
    Backend { queue: String, message: String },

    /// A connectivity or query-execution fault from the underlying store.
    #[error("database error: {0}")]
    Database(String),

    /// Schema bootstrap failed.
    #[error("migration error: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
