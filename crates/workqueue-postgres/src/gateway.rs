//! Scoped transactions with retry-on-conflict (spec §4.1, C1).
//!
//! Three call shapes, matching the distilled source one-for-one:
//!
//! - [`with_transaction`]: run once, surface any fault.
//! - [`get_with_retried_transactions`]: run with bounded retry on a
//!   transient serialization failure or deadlock.
//! - [`get_with_transaction_without_error_propagation`]: run once. A
//!   transient conflict becomes [`PollOutcome::Conflict`] instead of a
//!   fault, so callers (chiefly the polling loop, §4.5) can treat it as
//!   "try again later" rather than a caller-visible error.

use std::future::Future;

use sqlx::{PgPool, Postgres, Transaction};
use workqueue_core::config::EngineConfig;
use workqueue_core::store::PollOutcome;
use workqueue_core::QueueError;

use crate::error::from_sqlx;

/// The fault a transaction body passed to
/// [`get_with_transaction_without_error_propagation`] can raise: either a
/// driver-level `sqlx::Error`, eligible for transient-conflict detection, or
/// a typed [`QueueError`] the body raised itself (e.g. the pop-count
/// invariant of spec §4.4.2), which is never transient and must reach the
/// caller unchanged rather than round-trip through `sqlx::Error`.
pub(crate) enum TxFault {
    Db(sqlx::Error),
    Queue(QueueError),
}

impl From<sqlx::Error> for TxFault {
    fn from(err: sqlx::Error) -> Self {
        TxFault::Db(err)
    }
}

impl From<QueueError> for TxFault {
    fn from(err: QueueError) -> Self {
        TxFault::Queue(err)
    }
}

/// Postgres SQLSTATE for `serialization_failure`.
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// Postgres SQLSTATE for `deadlock_detected`.
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";

/// Whether `err` represents a transient conflict safe to retry (spec §7
/// item 1).
pub fn is_transient_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => {
                code == SQLSTATE_SERIALIZATION_FAILURE || code == SQLSTATE_DEADLOCK_DETECTED
            }
            None => false,
        },
        _ => false,
    }
}

/// Run `f` in a single **repeatable read** transaction (spec §4.1/§5),
/// committing on success and rolling back (implicitly, via drop) on error.
pub async fn with_transaction<T, F, Fut>(pool: &PgPool, f: F) -> Result<T, sqlx::Error>
where
    F: FnOnce(Transaction<'_, Postgres>) -> Fut,
    Fut: Future<Output = Result<(T, Transaction<'_, Postgres>), sqlx::Error>>,
{
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;
    let (value, tx) = f(tx).await?;
    tx.commit().await?;
    Ok(value)
}

/// Like [`with_transaction`], but retries up to `config.max_retries` times
/// with linear backoff (`config.retry_backoff * attempt`) when the
/// underlying fault is a transient conflict.
pub async fn get_with_retried_transactions<T, F, Fut>(
    pool: &PgPool,
    config: &EngineConfig,
    mut f: F,
) -> Result<T, sqlx::Error>
where
    F: FnMut(Transaction<'_, Postgres>) -> Fut,
    Fut: Future<Output = Result<(T, Transaction<'_, Postgres>), sqlx::Error>>,
{
    let mut attempt = 0u32;
    loop {
        let mut tx = pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;
        match f(tx).await {
            Ok((value, tx)) => {
                tx.commit().await?;
                return Ok(value);
            }
            Err(err) if is_transient_conflict(&err) && attempt < config.max_retries => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries = config.max_retries,
                    error = %err,
                    "retrying transaction after transient conflict"
                );
                tokio::time::sleep(config.retry_backoff * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Like [`with_transaction`], but runs only once: a transient conflict
/// becomes [`PollOutcome::Conflict`] rather than a fault. Non-transient
/// faults still propagate, and a [`TxFault::Queue`] the body raised itself
/// (spec §7 item 2's `QueueError::Backend`) passes through untouched rather
/// than being reclassified as a database fault.
pub async fn get_with_transaction_without_error_propagation<T, F, Fut>(
    pool: &PgPool,
    f: F,
) -> Result<PollOutcome<T>, QueueError>
where
    F: FnOnce(Transaction<'_, Postgres>) -> Fut,
    Fut: Future<Output = Result<(T, Transaction<'_, Postgres>), TxFault>>,
{
    let mut tx = pool.begin().await.map_err(from_sqlx)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await
        .map_err(from_sqlx)?;
    match f(tx).await {
        Ok((value, tx)) => {
            tx.commit().await.map_err(from_sqlx)?;
            Ok(PollOutcome::Ready(value))
        }
        Err(TxFault::Db(err)) if is_transient_conflict(&err) => {
            tracing::warn!(error = %err, "transient conflict, returning without propagating fault");
            Ok(PollOutcome::Conflict)
        }
        Err(TxFault::Db(err)) => Err(from_sqlx(err)),
        Err(TxFault::Queue(err)) => Err(err),
    }
}

/// Backoff used between [`crate::engine::PgQueueEngine::poll_messages`]
/// attempts when the collected batch is still short of `count` (spec §4.5).
pub async fn poll_backoff(config: &EngineConfig) {
    tokio::time::sleep(config.poll_backoff).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Faults that never carry a SQLSTATE (connection drops, protocol
    /// errors, row-not-found) are never transient-conflict candidates:
    /// only `sqlx::Error::Database` is inspected.
    #[test]
    fn non_database_faults_are_never_transient() {
        assert!(!is_transient_conflict(&sqlx::Error::RowNotFound));
        assert!(!is_transient_conflict(&sqlx::Error::PoolClosed));
        assert!(!is_transient_conflict(&sqlx::Error::Protocol(
            "boom".into()
        )));
    }
}
