//! Shared helpers for the `workqueue-postgres` integration suite (spec §10.4).
//!
//! Kept deliberately small: a unique-name generator so concurrently-run
//! `#[sqlx::test]` functions never collide on the same queue name within a
//! shared schema, and a fan-out helper for the concurrency properties of
//! spec §8 (no-duplicate-delivery, pushIfNotExists uniqueness, and so on).

use std::future::Future;

use tokio::task::JoinHandle;

/// Generate a queue name unique enough that two tests never collide, even
/// when `sqlx::test` hands them distinct databases that later get reused.
pub fn unique_queue_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Spawn `n` concurrent copies of `f(i)` and await every one of them,
/// returning outputs in task-index order (not completion order).
///
/// This is the fan-out primitive behind the concurrency invariants of spec
/// §8 (no duplicate delivery across concurrent pollers, exactly one winner
/// among concurrent `pushIfNotExists` calls): each test spins up its own
/// pool of tasks hitting the same queue and asserts on the collected
/// outputs.
pub async fn spawn_concurrent<F, Fut, T>(n: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<JoinHandle<T>> = (0..n).map(|i| tokio::spawn(f(i))).collect();

    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.expect("spawned task panicked"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unique_queue_name_does_not_repeat() {
        let a = unique_queue_name("q");
        let b = unique_queue_name("q");
        assert_ne!(a, b);
        assert!(a.starts_with("q-"));
    }

    #[tokio::test]
    async fn spawn_concurrent_preserves_task_order() {
        let out = spawn_concurrent(8, |i| async move { i * 2 }).await;
        assert_eq!(out, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }
}
