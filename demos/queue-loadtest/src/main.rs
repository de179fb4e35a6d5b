//! Drives the spec's S1 "throughput & no-loss" scenario against a real
//! Postgres database: N producers push M messages each, M consumers poll
//! and ack them, and the harness reconciles that every produced id was
//! acked exactly once.
//!
//! This binary is a validation/demo tool, not a reusable library: it lives
//! outside `workqueue-core`/`workqueue-postgres` so their dependency graphs
//! stay free of `tracing-subscriber`, CLI/env parsing, and the like.
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/workqueue cargo run -p queue-loadtest
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use workqueue_core::{EngineConfig, NewMessage, QueueStore};
use workqueue_postgres::{spawn_reclaimer, PgQueueEngine};

/// Harness knobs, read from the environment with the literal S1 scenario as
/// the default shape (4 producers x 500 messages, 4 consumers).
struct HarnessConfig {
    database_url: String,
    queue_name: String,
    producers: usize,
    messages_per_producer: usize,
    consumers: usize,
    poll_count: i64,
    empty_backoff: Duration,
}

impl HarnessConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL must be set to run the load test")?,
            queue_name: std::env::var("LOADTEST_QUEUE")
                .unwrap_or_else(|_| "task_queue".to_string()),
            producers: env_usize("LOADTEST_PRODUCERS", 4),
            messages_per_producer: env_usize("LOADTEST_MESSAGES_PER_PRODUCER", 500),
            consumers: env_usize("LOADTEST_CONSUMERS", 4),
            poll_count: env_usize("LOADTEST_POLL_COUNT", 10) as i64,
            empty_backoff: Duration::from_millis(200),
        })
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn init_logging() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = HarnessConfig::from_env()?;
    tracing::info!(
        queue = %config.queue_name,
        producers = config.producers,
        messages_per_producer = config.messages_per_producer,
        consumers = config.consumers,
        "starting load test"
    );

    let pool = PgPoolOptions::new()
        .max_connections((config.producers + config.consumers + 2) as u32)
        .connect(&config.database_url)
        .await
        .context("connect to database")?;

    PgQueueEngine::run_migrations(&pool)
        .await
        .context("run schema migrations")?;

    let engine = Arc::new(PgQueueEngine::new(pool, EngineConfig::default()));
    let reclaimer = spawn_reclaimer(engine.clone());

    let total_expected = config.producers * config.messages_per_producer;
    let mut expected_ids: HashSet<String> = HashSet::with_capacity(total_expected);
    for producer in 0..config.producers {
        for n in 0..config.messages_per_producer {
            expected_ids.insert(format!("p{producer}-{n}"));
        }
    }

    let producer_handles: Vec<_> = (0..config.producers)
        .map(|producer| {
            let engine = engine.clone();
            let queue_name = config.queue_name.clone();
            let messages_per_producer = config.messages_per_producer;
            tokio::spawn(async move {
                for n in 0..messages_per_producer {
                    let message = NewMessage::new(format!("p{producer}-{n}"), r#"{"a":"b"}"#);
                    engine
                        .push(&queue_name, message)
                        .await
                        .expect("producer push failed");
                }
            })
        })
        .collect();

    for handle in producer_handles {
        handle.await.context("producer task panicked")?;
    }
    tracing::info!(total_expected, "producers finished pushing");

    let acked: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::with_capacity(total_expected)));
    let double_acks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let consumer_handles: Vec<_> = (0..config.consumers)
        .map(|_| {
            let engine = engine.clone();
            let queue_name = config.queue_name.clone();
            let acked = acked.clone();
            let double_acks = double_acks.clone();
            let poll_count = config.poll_count;
            let empty_backoff = config.empty_backoff;
            tokio::spawn(async move {
                loop {
                    {
                        let acked = acked.lock().unwrap();
                        if acked.len() >= total_expected {
                            break;
                        }
                    }

                    let popped = engine
                        .poll_messages(&queue_name, poll_count, 0)
                        .await
                        .expect("poll failed");

                    if popped.is_empty() {
                        let acked = acked.lock().unwrap();
                        if acked.len() >= total_expected {
                            break;
                        }
                        drop(acked);
                        tokio::time::sleep(empty_backoff).await;
                        continue;
                    }

                    for message in popped {
                        let was_removed = engine
                            .ack(&queue_name, &message.message_id)
                            .await
                            .expect("ack failed");
                        if was_removed {
                            let mut acked = acked.lock().unwrap();
                            if !acked.insert(message.message_id.clone()) {
                                double_acks.lock().unwrap().push(message.message_id);
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for handle in consumer_handles {
        handle.await.context("consumer task panicked")?;
    }

    let acked = Arc::try_unwrap(acked)
        .expect("all consumer tasks have finished")
        .into_inner()
        .unwrap();
    let double_acks = double_acks.lock().unwrap().clone();
    let final_size = engine.get_size(&config.queue_name).await?;

    let missing: Vec<&String> = expected_ids.difference(&acked).collect();
    let unexpected: Vec<&String> = acked.difference(&expected_ids).collect();

    reclaimer.shutdown().await;

    tracing::info!(
        acked = acked.len(),
        expected = total_expected,
        double_acks = double_acks.len(),
        missing = missing.len(),
        unexpected = unexpected.len(),
        final_size,
        "load test complete"
    );

    if !missing.is_empty() || !unexpected.is_empty() || !double_acks.is_empty() || final_size != 0 {
        anyhow::bail!(
            "load test reconciliation failed: {} missing, {} unexpected, {} double-acked, final_size={}",
            missing.len(),
            unexpected.len(),
            double_acks.len(),
            final_size
        );
    }

    println!(
        "OK: {} producers x {} messages, {} consumers, {} acked, no loss, no duplicates, final_size=0",
        config.producers, config.messages_per_producer, config.consumers, acked.len()
    );
    Ok(())
}
