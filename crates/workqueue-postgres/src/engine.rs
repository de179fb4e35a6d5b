//! The PostgreSQL [`QueueStore`] implementation (spec §4, C2-C4, C7).
//!
//! Mirrors `PgJobStore`'s shape: one struct wrapping a pool and an
//! [`EngineConfig`], one method per trait operation, SQL kept inline rather
//! than behind an ORM. Locking discipline follows spec §4.4.1/§4.4.2 exactly:
//! `FOR UPDATE SKIP LOCKED` for the peek, a guarded `UPDATE ... popped =
//! false` for the pop, `FOR SHARE` for the strict size/existence reads.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use workqueue_core::config::EngineConfig;
use workqueue_core::error::Result;
use workqueue_core::message::{Message, NewMessage, ShardDetail, SINGLE_SHARD};
use workqueue_core::store::{PollOutcome, QueueStore};
use workqueue_core::QueueError;

use crate::error::from_sqlx;
use crate::gateway::{
    get_with_retried_transactions, get_with_transaction_without_error_propagation,
    with_transaction, TxFault,
};

/// PostgreSQL-backed [`QueueStore`].
///
/// Construction is cheap; the reclaimer task (spec §4.6, §9) is started and
/// stopped separately via [`crate::reclaimer::spawn_reclaimer`] /
/// [`crate::reclaimer::ReclaimerHandle::shutdown`], not on engine
/// construction, matching the explicit `start()`/`close()` called for in
/// spec §9.
pub struct PgQueueEngine {
    pool: PgPool,
    config: EngineConfig,
}

#[derive(FromRow)]
struct Candidate {
    message_id: String,
    payload: Option<String>,
    priority: i32,
}

impl PgQueueEngine {
    pub fn new(pool: PgPool, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run schema migrations bundled with this crate (spec §10.5).
    pub async fn run_migrations(pool: &PgPool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(crate::error::from_migrate)
    }

    async fn create_queue_if_not_exists(
        tx: &mut Transaction<'_, Postgres>,
        queue: &str,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO queue (queue_name) VALUES ($1) ON CONFLICT (queue_name) DO NOTHING")
            .bind(queue)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn push_one(
        tx: &mut Transaction<'_, Postgres>,
        queue: &str,
        message: &NewMessage,
    ) -> std::result::Result<(), sqlx::Error> {
        Self::create_queue_if_not_exists(tx, queue).await?;
        sqlx::query(
            "INSERT INTO queue_message \
                (queue_name, message_id, payload, priority, offset_time_seconds, deliver_on) \
             VALUES ($1, $2, $3, $4, $5, now() + ($5 || ' seconds')::interval) \
             ON CONFLICT (queue_name, message_id) DO UPDATE SET \
                payload = excluded.payload, \
                priority = excluded.priority, \
                offset_time_seconds = excluded.offset_time_seconds, \
                deliver_on = excluded.deliver_on",
        )
        .bind(queue)
        .bind(&message.message_id)
        .bind(&message.payload)
        .bind(message.priority)
        .bind(message.offset_time_seconds)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Core selection query (spec §4.4.1).
    async fn peek_messages(
        tx: &mut Transaction<'_, Postgres>,
        queue: &str,
        count: i64,
    ) -> std::result::Result<Vec<Candidate>, sqlx::Error> {
        if count < 1 {
            return Ok(Vec::new());
        }
        sqlx::query_as(
            "SELECT message_id, payload, priority FROM queue_message \
             WHERE queue_name = $1 AND popped = false \
               AND deliver_on <= now() + interval '1 millisecond' \
             ORDER BY priority DESC, deliver_on ASC, created_on ASC \
             LIMIT $2 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(queue)
        .bind(count)
        .fetch_all(&mut **tx)
        .await
    }

    /// Candidate selection followed by the guarded mark-popped update (spec
    /// §4.4.2). Returns `Err(TxFault::Queue(QueueError::Backend { .. }))`
    /// iff the pop count disagrees with the peek count, kept distinct from
    /// `TxFault::Db` so the gateway never mistakes this invariant violation
    /// for a transient driver conflict (spec §7 item 2).
    async fn pop_messages_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        queue: &str,
        count: i64,
    ) -> std::result::Result<Vec<Message>, TxFault> {
        let candidates = Self::peek_messages(tx, queue, count).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = candidates.iter().map(|c| c.message_id.as_str()).collect();
        let popped = sqlx::query(
            "UPDATE queue_message SET popped = true \
             WHERE queue_name = $1 AND message_id = ANY($2) AND popped = false \
             RETURNING message_id",
        )
        .bind(queue)
        .bind(&ids as &[&str])
        .fetch_all(&mut **tx)
        .await?;

        if popped.len() != candidates.len() {
            return Err(QueueError::Backend {
                queue: queue.to_string(),
                message: format!(
                    "could not pop all: peeked {} candidates, popped {}",
                    candidates.len(),
                    popped.len()
                ),
            }
            .into());
        }

        Ok(candidates
            .into_iter()
            .map(|c| Message {
                message_id: c.message_id,
                payload: c.payload.unwrap_or_default(),
                priority: c.priority,
            })
            .collect())
    }
}

#[async_trait]
impl QueueStore for PgQueueEngine {
    async fn push(&self, queue: &str, message: NewMessage) -> Result<()> {
        with_transaction(&self.pool, |mut tx| async move {
            Self::push_one(&mut tx, queue, &message).await?;
            Ok(((), tx))
        })
        .await
        .map_err(from_sqlx)
    }

    async fn push_batch(&self, queue: &str, messages: Vec<NewMessage>) -> Result<()> {
        with_transaction(&self.pool, |mut tx| async move {
            for message in &messages {
                Self::push_one(&mut tx, queue, message).await?;
            }
            Ok(((), tx))
        })
        .await
        .map_err(from_sqlx)
    }

    async fn push_if_not_exists(&self, queue: &str, message: NewMessage) -> Result<bool> {
        get_with_retried_transactions(&self.pool, &self.config, |mut tx| {
            let message = message.clone();
            async move {
                Self::create_queue_if_not_exists(&mut tx, queue).await?;
                let inserted = sqlx::query(
                    "INSERT INTO queue_message \
                        (queue_name, message_id, payload, priority, offset_time_seconds, deliver_on) \
                     VALUES ($1, $2, $3, $4, $5, now() + ($5 || ' seconds')::interval) \
                     ON CONFLICT (queue_name, message_id) DO NOTHING",
                )
                .bind(queue)
                .bind(&message.message_id)
                .bind(&message.payload)
                .bind(message.priority)
                .bind(message.offset_time_seconds)
                .execute(&mut *tx)
                .await?;
                Ok((inserted.rows_affected() == 1, tx))
            }
        })
        .await
        .map_err(from_sqlx)
    }

    async fn poll_messages(&self, queue: &str, count: i64, timeout_ms: i64) -> Result<Vec<Message>> {
        if count < 1 {
            return Ok(Vec::new());
        }

        if timeout_ms < 1 {
            let outcome =
                get_with_transaction_without_error_propagation(&self.pool, |mut tx| async move {
                    let messages = Self::pop_messages_in_tx(&mut tx, queue, count).await?;
                    Ok((messages, tx))
                })
                .await?;
            return Ok(match outcome {
                PollOutcome::Ready(messages) => messages,
                PollOutcome::Conflict => {
                    tracing::warn!(queue, "poll_messages: transient conflict on single attempt");
                    Vec::new()
                }
            });
        }

        let start = Instant::now();
        let mut collected: Vec<Message> = Vec::new();
        loop {
            let remaining = count - collected.len() as i64;
            let outcome =
                get_with_transaction_without_error_propagation(&self.pool, |mut tx| async move {
                    let messages = Self::pop_messages_in_tx(&mut tx, queue, remaining).await?;
                    Ok((messages, tx))
                })
                .await?;

            match outcome {
                PollOutcome::Ready(mut attempt) => collected.append(&mut attempt),
                PollOutcome::Conflict => {
                    tracing::warn!(queue, "poll_messages: transient conflict, returning partial batch");
                    return Ok(collected);
                }
            }

            if collected.len() as i64 >= count {
                return Ok(collected);
            }
            if start.elapsed().as_millis() as i64 > timeout_ms {
                return Ok(collected);
            }
            crate::gateway::poll_backoff(&self.config).await;
        }
    }

    async fn ack(&self, queue: &str, message_id: &str) -> Result<bool> {
        let row = sqlx::query("DELETE FROM queue_message WHERE queue_name = $1 AND message_id = $2")
            .bind(queue)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(row.rows_affected() > 0)
    }

    async fn exists(&self, queue: &str, message_id: &str) -> Result<bool> {
        with_transaction(&self.pool, |mut tx| async move {
            let row = sqlx::query(
                "SELECT 1 FROM queue_message WHERE queue_name = $1 AND message_id = $2 FOR SHARE",
            )
            .bind(queue)
            .bind(message_id)
            .fetch_optional(&mut *tx)
            .await?;
            Ok((row.is_some(), tx))
        })
        .await
        .map_err(from_sqlx)
    }

    async fn remove(&self, queue: &str, message_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM queue_message WHERE queue_name = $1 AND message_id = $2")
            .bind(queue)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    async fn flush(&self, queue: &str) -> Result<()> {
        sqlx::query("DELETE FROM queue_message WHERE queue_name = $1")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    async fn set_unack_timeout(&self, queue: &str, message_id: &str, unack_ms: i64) -> Result<bool> {
        let offset_time_seconds = unack_ms / 1000;
        let row = sqlx::query(
            "UPDATE queue_message SET \
                offset_time_seconds = $3, \
                deliver_on = now() + ($3 || ' seconds')::interval \
             WHERE queue_name = $1 AND message_id = $2",
        )
        .bind(queue)
        .bind(message_id)
        .bind(offset_time_seconds)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(row.rows_affected() == 1)
    }

    async fn set_offset_time(
        &self,
        queue: &str,
        message_id: &str,
        offset_time_seconds: i64,
    ) -> Result<bool> {
        with_transaction(&self.pool, |mut tx| async move {
            sqlx::query("SELECT 1 FROM queue WHERE queue_name = $1 FOR UPDATE")
                .bind(queue)
                .fetch_optional(&mut *tx)
                .await?;
            let row = sqlx::query(
                "UPDATE queue_message SET \
                    offset_time_seconds = $3, \
                    deliver_on = now() + ($3 || ' seconds')::interval \
                 WHERE queue_name = $1 AND message_id = $2",
            )
            .bind(queue)
            .bind(message_id)
            .bind(offset_time_seconds)
            .execute(&mut *tx)
            .await?;
            Ok((row.rows_affected() == 1, tx))
        })
        .await
        .map_err(from_sqlx)
    }

    async fn get_size(&self, queue: &str) -> Result<i64> {
        let row = sqlx::query("SELECT count(*) AS n FROM queue_message WHERE queue_name = $1")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(row.try_get::<i64, _>("n").map_err(from_sqlx)?)
    }

    async fn get_size_strict(&self, queue: &str) -> Result<i64> {
        with_transaction(&self.pool, |mut tx| async move {
            sqlx::query("SELECT 1 FROM queue WHERE queue_name = $1 FOR SHARE")
                .bind(queue)
                .fetch_optional(&mut *tx)
                .await?;
            let row = sqlx::query("SELECT count(*) AS n FROM queue_message WHERE queue_name = $1")
                .bind(queue)
                .fetch_one(&mut *tx)
                .await?;
            let n: i64 = row.try_get("n")?;
            Ok((n, tx))
        })
        .await
        .map_err(from_sqlx)
    }

    async fn queues_detail(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT q.queue_name AS queue_name, \
                    count(m.message_id) FILTER (WHERE m.popped = false) AS visible \
             FROM queue q LEFT JOIN queue_message m ON m.queue_name = q.queue_name \
             GROUP BY q.queue_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;

        let mut detail = HashMap::with_capacity(rows.len());
        for row in rows {
            let queue_name: String = row.try_get("queue_name").map_err(from_sqlx)?;
            let visible: i64 = row.try_get("visible").map_err(from_sqlx)?;
            detail.insert(queue_name, visible);
        }
        Ok(detail)
    }

    async fn queues_detail_verbose(&self) -> Result<HashMap<String, HashMap<String, ShardDetail>>> {
        let rows = sqlx::query(
            "SELECT q.queue_name AS queue_name, \
                    count(m.message_id) FILTER (WHERE m.popped = false) AS visible, \
                    count(m.message_id) FILTER (WHERE m.popped = true) AS unacked \
             FROM queue q LEFT JOIN queue_message m ON m.queue_name = q.queue_name \
             GROUP BY q.queue_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;

        let mut detail = HashMap::with_capacity(rows.len());
        for row in rows {
            let queue_name: String = row.try_get("queue_name").map_err(from_sqlx)?;
            let visible: i64 = row.try_get("visible").map_err(from_sqlx)?;
            let unacked: i64 = row.try_get("unacked").map_err(from_sqlx)?;
            let mut shard = HashMap::with_capacity(1);
            shard.insert(
                SINGLE_SHARD.to_string(),
                ShardDetail {
                    size: visible,
                    unacked,
                },
            );
            detail.insert(queue_name, shard);
        }
        Ok(detail)
    }

    async fn process_unacks(&self, queue: &str) -> Result<u64> {
        self.reclaim(Some(queue)).await
    }

    async fn process_all_unacks(&self) -> Result<u64> {
        self.reclaim(None).await
    }
}

impl PgQueueEngine {
    /// Shared implementation of `processUnacks`/`processAllUnacks` (spec
    /// §4.6). Binds each candidate id as its own parameter via `= ANY($n)`
    /// rather than the comma-joined string the distilled source uses;
    /// see the redesign flag in SPEC_FULL.md §11.
    async fn reclaim(&self, queue: Option<&str>) -> Result<u64> {
        let unack_window_secs = self.config.unack_window.as_secs() as i64;
        get_with_retried_transactions(&self.pool, &self.config, |mut tx| async move {
            let candidates = match queue {
                Some(queue) => {
                    sqlx::query(
                        "SELECT message_id FROM queue_message \
                         WHERE queue_name = $1 AND popped = true \
                           AND deliver_on + ($2 || ' seconds')::interval < now() \
                         FOR UPDATE SKIP LOCKED",
                    )
                    .bind(queue)
                    .bind(unack_window_secs)
                    .fetch_all(&mut *tx)
                    .await?
                }
                None => {
                    sqlx::query(
                        "SELECT queue_name, message_id FROM queue_message \
                         WHERE popped = true \
                           AND deliver_on + ($1 || ' seconds')::interval < now() \
                         FOR UPDATE SKIP LOCKED",
                    )
                    .bind(unack_window_secs)
                    .fetch_all(&mut *tx)
                    .await?
                }
            };

            if candidates.is_empty() {
                return Ok((0u64, tx));
            }

            let recycled = match queue {
                Some(queue) => {
                    let ids: Vec<String> = candidates
                        .iter()
                        .map(|r| r.try_get::<String, _>("message_id"))
                        .collect::<std::result::Result<_, _>>()?;
                    sqlx::query(
                        "UPDATE queue_message SET popped = false \
                         WHERE queue_name = $1 AND message_id = ANY($2)",
                    )
                    .bind(queue)
                    .bind(&ids)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected()
                }
                None => {
                    let mut total = 0u64;
                    let mut by_queue: HashMap<String, Vec<String>> = HashMap::new();
                    for row in &candidates {
                        let queue_name: String = row.try_get("queue_name")?;
                        let message_id: String = row.try_get("message_id")?;
                        by_queue.entry(queue_name).or_default().push(message_id);
                    }
                    for (queue_name, ids) in by_queue {
                        total += sqlx::query(
                            "UPDATE queue_message SET popped = false \
                             WHERE queue_name = $1 AND message_id = ANY($2)",
                        )
                        .bind(&queue_name)
                        .bind(&ids)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                    }
                    total
                }
            };

            Ok((recycled, tx))
        })
        .await
        .map_err(from_sqlx)
    }
}
