//! Queue and message types shared by every backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message handed back to a consumer by `poll`/`pop`.
///
/// Payloads are opaque: the engine stores and returns strings without
/// interpreting them. Callers that want structured payloads serialize to
/// JSON (or anything else) before calling `push` and deserialize on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub payload: String,
    pub priority: i32,
}

/// A message to enqueue. `priority` and `offset_time_seconds` are carried on
/// the request rather than being queue- or message-level defaults, matching
/// how `push` takes them per-call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub message_id: String,
    pub payload: String,
    pub priority: i32,
    pub offset_time_seconds: i64,
}

impl NewMessage {
    pub fn new(message_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            payload: payload.into(),
            priority: 0,
            offset_time_seconds: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_offset_time_seconds(mut self, offset_time_seconds: i64) -> Self {
        self.offset_time_seconds = offset_time_seconds;
        self
    }
}

/// Per-shard size/unacked counts returned by `queues_detail_verbose`.
///
/// The current engine always reports a single shard ("a"); the map-of-maps
/// shape is reserved for a future sharded backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDetail {
    pub size: i64,
    pub unacked: i64,
}

/// The single shard id the current engine ever reports under.
pub const SINGLE_SHARD: &str = "a";

/// The canonical delivery ordering (spec §4.4.1, §5): `priority DESC,
/// deliver_on ASC, created_on ASC`.
///
/// The backend enforces this with `ORDER BY` in SQL; this type exists so the
/// same policy can be asserted against in a pure, database-free test (spec
/// §10.4's "ordering comparator" property) rather than only indirectly, via
/// a live poll against Postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryKey {
    pub priority: i32,
    pub deliver_on: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
}

impl PartialOrd for DeliveryKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeliveryKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.deliver_on.cmp(&other.deliver_on))
            .then_with(|| self.created_on.cmp(&other.created_on))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(priority: i32, deliver_on_secs: i64, created_on_secs: i64) -> DeliveryKey {
        DeliveryKey {
            priority,
            deliver_on: DateTime::from_timestamp(deliver_on_secs, 0).unwrap(),
            created_on: DateTime::from_timestamp(created_on_secs, 0).unwrap(),
        }
    }

    #[test]
    fn higher_priority_sorts_first() {
        let mut keys = vec![key(1, 0, 0), key(5, 0, 0), key(3, 0, 0)];
        keys.sort();
        let priorities: Vec<i32> = keys.iter().map(|k| k.priority).collect();
        assert_eq!(priorities, vec![5, 3, 1]);
    }

    #[test]
    fn ties_in_priority_break_on_deliver_on_then_created_on() {
        let mut keys = vec![key(0, 10, 5), key(0, 5, 9), key(0, 5, 1)];
        keys.sort();
        assert_eq!(
            keys,
            vec![key(0, 5, 1), key(0, 5, 9), key(0, 10, 5)]
        );
    }

    proptest! {
        /// Any permutation of keys sorts into the same order regardless of
        /// its starting arrangement (`Ord` is a total order here, so sorting
        /// is deterministic and idempotent).
        #[test]
        fn sort_is_deterministic_and_idempotent(
            raw in prop::collection::vec(
                (-100i32..100, 0i64..100_000, 0i64..100_000),
                0..50,
            )
        ) {
            let mut keys: Vec<DeliveryKey> = raw
                .into_iter()
                .map(|(p, d, c)| key(p, d, c))
                .collect();
            keys.sort();
            let sorted_once = keys.clone();
            keys.sort();
            prop_assert_eq!(sorted_once, keys);
        }

        /// Sorting never produces a pair of adjacent elements that violate
        /// the `priority DESC, deliver_on ASC, created_on ASC` policy.
        #[test]
        fn sorted_order_matches_policy(
            raw in prop::collection::vec(
                (-100i32..100, 0i64..100_000, 0i64..100_000),
                0..50,
            )
        ) {
            let mut keys: Vec<DeliveryKey> = raw
                .into_iter()
                .map(|(p, d, c)| key(p, d, c))
                .collect();
            keys.sort();
            for pair in keys.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let ok = a.priority > b.priority
                    || (a.priority == b.priority && a.deliver_on < b.deliver_on)
                    || (a.priority == b.priority
                        && a.deliver_on == b.deliver_on
                        && a.created_on <= b.created_on);
                prop_assert!(ok);
            }
        }
    }
}
