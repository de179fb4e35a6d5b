//! PostgreSQL implementation of `workqueue-core`'s [`QueueStore`](workqueue_core::QueueStore).
//!
//! This crate is the one concrete backend this repository ships: named
//! queues and caller-id'd messages stored in two tables, leased via
//! `FOR UPDATE SKIP LOCKED`, reclaimed by a cancellable background sweep.
//!
//! # Database schema
//!
//! ```sql
//! CREATE TABLE queue (
//!     queue_name TEXT PRIMARY KEY
//! );
//!
//! CREATE TABLE queue_message (
//!     queue_name TEXT NOT NULL REFERENCES queue (queue_name),
//!     message_id TEXT NOT NULL,
//!     priority INTEGER NOT NULL DEFAULT 0,
//!     offset_time_seconds BIGINT NOT NULL DEFAULT 0,
//!     deliver_on TIMESTAMPTZ NOT NULL,
//!     created_on TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     popped BOOLEAN NOT NULL DEFAULT false,
//!     payload TEXT,
//!     PRIMARY KEY (queue_name, message_id)
//! );
//! ```
//!
//! See `migrations/0001_init.sql` for the index that backs the peek query.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use workqueue_core::{EngineConfig, NewMessage, QueueStore};
//! use workqueue_postgres::{spawn_reclaimer, PgQueueEngine};
//!
//! let pool = sqlx::PgPool::connect("postgres://localhost/workqueue").await?;
//! PgQueueEngine::run_migrations(&pool).await?;
//!
//! let engine = Arc::new(PgQueueEngine::new(pool, EngineConfig::default()));
//! let reclaimer = spawn_reclaimer(engine.clone());
//!
//! engine.push("emails", NewMessage::new("welcome-42", "{\"to\":\"a@b.com\"}")).await?;
//! let popped = engine.poll_messages("emails", 10, 1_000).await?;
//!
//! reclaimer.shutdown().await;
//! ```

mod engine;
mod error;
mod gateway;
mod reclaimer;

pub use engine::PgQueueEngine;
pub use reclaimer::{spawn_reclaimer, ReclaimerHandle};
