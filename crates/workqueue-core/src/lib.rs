//! # workqueue-core
//!
//! Storage-agnostic types and traits for a durable, relational-database-backed
//! work queue: named queues, caller-supplied message ids, priority ordering,
//! delayed delivery, and visibility-timeout ("unack") leasing.
//!
//! ## What lives here
//!
//! - [`Message`], [`NewMessage`], [`ShardDetail`]: the wire-level types
//!   callers push and receive.
//! - [`QueueStore`]: the trait a concrete backend implements. Push, peek,
//!   pop, ack, reschedule, introspect, and reclaim expired leases.
//! - [`EngineConfig`]: the unack window, reclaim cadence, and retry/backoff
//!   knobs a backend is constructed with.
//! - [`QueueError`]: the typed fault surface (see spec §7). A backend
//!   invariant violation is the one variant unique to this crate; everything
//!   else passes the underlying store's own fault through.
//!
//! ## What does not live here
//!
//! Payload interpretation, schema migration tooling, and the concrete SQL
//! dialect are all backend concerns. `workqueue-postgres` is the reference
//! implementation of [`QueueStore`] for PostgreSQL via `sqlx`.
//!
//! Delivery guarantees this crate promises, and the ones it explicitly does
//! not:
//!
//! - **At-least-once delivery**: a message is only removed by `ack`.
//! - **No exactly-once guarantee**: a reclaimed lease may be redelivered
//!   alongside a consumer that is still (slowly) finishing the prior
//!   delivery.
//! - **Best-effort ordering**: `priority DESC, deliver_on ASC, created_on ASC`
//!   among currently-unlocked rows; concurrent pollers may observe messages
//!   out of that order when `SKIP LOCKED` bypasses a row another poller
//!   currently holds.

pub mod config;
pub mod error;
pub mod message;
pub mod store;

pub use config::EngineConfig;
pub use error::{QueueError, Result};
pub use message::{DeliveryKey, Message, NewMessage, ShardDetail, SINGLE_SHARD};
pub use store::{PollOutcome, QueueStore};
