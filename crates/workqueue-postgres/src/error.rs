//! Conversions from this crate's concrete faults into the storage-agnostic
//! [`workqueue_core::QueueError`].

use workqueue_core::QueueError;

pub(crate) fn from_sqlx(err: sqlx::Error) -> QueueError {
    QueueError::Database(err.to_string())
}

pub(crate) fn from_migrate(err: sqlx::migrate::MigrateError) -> QueueError {
    QueueError::Migration(err.to_string())
}
