//! Engine-wide constants, injectable at construction (spec §9/§10.2).

use std::time::Duration;

/// Constructor-time knobs for a queue engine.
///
/// `unack_window` and `reclaim_interval` are kept equal by [`Default`]
/// because the distilled source hard-codes both to the same 60s constant
/// independently; decoupling them is possible but the caller takes on the
/// responsibility of keeping the sweep frequent enough relative to the
/// window it enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a lease may be held past its `deliver_on` before the
    /// reclaimer considers it abandoned (spec §3/§4.6, "W").
    pub unack_window: Duration,
    /// How often the background reclaimer sweeps for expired leases.
    pub reclaim_interval: Duration,
    /// Upper bound on retry attempts for the retried-transaction gateway
    /// variant (spec §4.1 `getWithRetriedTransactions`).
    pub max_retries: u32,
    /// Base backoff between retried-transaction attempts.
    pub retry_backoff: Duration,
    /// Inter-attempt sleep inside the polling loop (spec §4.5).
    pub poll_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unack_window: Duration::from_secs(60),
            reclaim_interval: Duration::from_secs(60),
            max_retries: 5,
            retry_backoff: Duration::from_millis(50),
            poll_backoff: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    /// Load overrides from the environment, falling back to [`Default`] for
    /// anything unset. Mirrors the `dotenvy` + `env::var` idiom used
    /// elsewhere in this codebase's service configuration.
    ///
    /// Recognized variables: `QUEUE_UNACK_WINDOW_SECS`,
    /// `QUEUE_RECLAIM_INTERVAL_SECS`, `QUEUE_MAX_RETRIES`,
    /// `QUEUE_RETRY_BACKOFF_MS`, `QUEUE_POLL_BACKOFF_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            unack_window: env_secs("QUEUE_UNACK_WINDOW_SECS", defaults.unack_window),
            reclaim_interval: env_secs("QUEUE_RECLAIM_INTERVAL_SECS", defaults.reclaim_interval),
            max_retries: env_u32("QUEUE_MAX_RETRIES", defaults.max_retries),
            retry_backoff: env_millis("QUEUE_RETRY_BACKOFF_MS", defaults.retry_backoff),
            poll_backoff: env_millis("QUEUE_POLL_BACKOFF_MS", defaults.poll_backoff),
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.unack_window, Duration::from_secs(60));
        assert_eq!(config.reclaim_interval, Duration::from_secs(60));
        assert_eq!(config.poll_backoff, Duration::from_millis(100));
    }

    #[test]
    fn from_env_falls_back_when_unset() {
        std::env::remove_var("QUEUE_UNACK_WINDOW_SECS");
        let config = EngineConfig::from_env();
        assert_eq!(config.unack_window, EngineConfig::default().unack_window);
    }
}
