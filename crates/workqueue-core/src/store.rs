//! The storage-agnostic queue contract (spec §4.4, §4.6, §4.7).
//!
//! A `QueueStore` implementation owns C1-C7: transaction discipline, the
//! push/peek/pop/ack state machine, the unack reclaimer, and introspection.
//! `workqueue-postgres` is the only implementation shipped today, but the
//! trait boundary keeps the engine's call surface independent of any one
//! SQL driver, the same way this codebase's `JobStore` separates policy
//! from the Postgres backend that implements it.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Message, NewMessage, ShardDetail};

/// Outcome of a single non-retried attempt at a transient-conflict-prone
/// operation (spec §4.1 `getWithTransactionWithOutErrorPropagation`).
///
/// `Conflict` stands in for the source's `null` sentinel: "a transient
/// serialization failure or deadlock occurred; try again later, this was
/// not a real fault."
#[derive(Debug)]
pub enum PollOutcome<T> {
    Ready(T),
    Conflict,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Enqueue a single message, creating the queue on demand (C2) and
    /// upserting on id conflict per §4.4.
    async fn push(&self, queue: &str, message: NewMessage) -> Result<()>;

    /// Enqueue a batch of messages in one transaction.
    async fn push_batch(&self, queue: &str, messages: Vec<NewMessage>) -> Result<()>;

    /// Push only if `message.message_id` does not already exist in `queue`.
    /// Returns whether this call actually inserted the message.
    async fn push_if_not_exists(&self, queue: &str, message: NewMessage) -> Result<bool>;

    /// Poll for up to `count` visible messages, retrying internally for up
    /// to `timeout_ms` (spec §4.5). `timeout_ms < 1` performs a single
    /// non-retried attempt that never surfaces a transient conflict as a
    /// fault (spec §4.4 `pollMessages`).
    async fn poll_messages(&self, queue: &str, count: i64, timeout_ms: i64) -> Result<Vec<Message>>;

    /// Projection of [`QueueStore::poll_messages`] returning only ids.
    async fn pop(&self, queue: &str, count: i64, timeout_ms: i64) -> Result<Vec<String>> {
        let messages = self.poll_messages(queue, count, timeout_ms).await?;
        tracing::debug!(queue, popped = messages.len(), "pop");
        Ok(messages.into_iter().map(|m| m.message_id).collect())
    }

    /// Delete the message iff present. Idempotent: a second call returns
    /// `false`.
    async fn ack(&self, queue: &str, message_id: &str) -> Result<bool>;

    /// Shared-locked existence probe.
    async fn exists(&self, queue: &str, message_id: &str) -> Result<bool>;

    /// Unconditional delete, used by administrative paths.
    async fn remove(&self, queue: &str, message_id: &str) -> Result<()>;

    /// Delete every row in `queue`.
    async fn flush(&self, queue: &str) -> Result<()>;

    /// Reschedule a message's lease/visibility by an absolute unack timeout
    /// in milliseconds (spec §4.4 `setUnackTimeout`). Returns `true` iff a
    /// row was updated.
    async fn set_unack_timeout(&self, queue: &str, message_id: &str, unack_ms: i64) -> Result<bool>;

    /// Reschedule a message's visibility by an offset in seconds, taken
    /// under a queue-wide exclusive lock (spec §4.4 `setOffsetTime`).
    async fn set_offset_time(
        &self,
        queue: &str,
        message_id: &str,
        offset_time_seconds: i64,
    ) -> Result<bool>;

    /// Total row count for `queue` (visible + leased). See §11: this uses
    /// an unlocked count by default; [`QueueStore::get_size_strict`] retains
    /// the `FOR SHARE`-locked behavior of the distilled source.
    async fn get_size(&self, queue: &str) -> Result<i64>;

    /// Same as [`QueueStore::get_size`] but taken under `FOR SHARE`,
    /// serializing the read against concurrent pushes (spec §4.7, §9).
    async fn get_size_strict(&self, queue: &str) -> Result<i64>;

    /// Map of queue name to visible (not popped) message count.
    async fn queues_detail(&self) -> Result<HashMap<String, i64>>;

    /// Map of queue name to single-shard size/unacked detail (spec §4.7).
    async fn queues_detail_verbose(&self) -> Result<HashMap<String, HashMap<String, ShardDetail>>>;

    /// Return expired leases in `queue` to visible state. Returns the
    /// number of rows recycled. User-callable per-queue reclaim (spec
    /// §4.6 `processUnacks`).
    async fn process_unacks(&self, queue: &str) -> Result<u64>;

    /// Same as [`QueueStore::process_unacks`] but across every queue; this
    /// is what the background reclaimer calls each tick (spec §4.6
    /// `processAllUnacks`).
    async fn process_all_unacks(&self) -> Result<u64>;
}
