use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

/// One failed attempt at an operation that is retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u32, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of recording a failure in a [`RetryTracker`].
#[derive(Debug, Clone)]
pub enum RetryDecision {
    Retry {
        attempt: u32,
        history: Vec<RetryAttempt>,
    },
    Exhausted {
        history: Vec<RetryAttempt>,
    },
}

impl RetryDecision {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

#[derive(Debug, Clone)]
struct RetryState {
    attempt: u32,
    history: Vec<RetryAttempt>,
    last_updated: Instant,
}

/// In-memory failure counter keyed by an arbitrary id (a deal row, a transfer channel).
///
/// State does not survive a restart; the restart sweep marks everything failed anyway.
#[derive(Debug, Default)]
pub struct RetryTracker {
    state: HashMap<String, RetryState>,
    max_retries: u32,
}

impl RetryTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: HashMap::new(),
            max_retries,
        }
    }

    /// Record a failure. Once more than `max_retries` failures are recorded the entry is
    /// dropped and `Exhausted` is returned with the full history.
    pub fn record_failure(&mut self, id: &str, error: &str) -> RetryDecision {
        let entry = self
            .state
            .entry(id.to_string())
            .or_insert_with(|| RetryState {
                attempt: 0,
                history: Vec::new(),
                last_updated: Instant::now(),
            });

        entry.attempt += 1;
        entry.last_updated = Instant::now();
        entry.history.push(RetryAttempt::new(entry.attempt, error));

        if entry.attempt <= self.max_retries {
            RetryDecision::Retry {
                attempt: entry.attempt,
                history: entry.history.clone(),
            }
        } else {
            let history = std::mem::take(&mut entry.history);
            self.state.remove(id);
            RetryDecision::Exhausted { history }
        }
    }

    pub fn clear(&mut self, id: &str) {
        self.state.remove(id);
    }

    pub fn attempt(&self, id: &str) -> u32 {
        self.state.get(id).map(|s| s.attempt).unwrap_or(0)
    }

    /// Remove entries that haven't been updated within `max_age`.
    pub fn cleanup_stale(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.state
            .retain(|_, state| now.duration_since(state.last_updated) < max_age);
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Exponential backoff with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` with 0-25% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

/// Periodically drop tracker entries for ids that stopped failing. A zero interval is treated
/// as one millisecond.
pub fn spawn_cleanup_task(
    tracker: Arc<Mutex<RetryTracker>>,
    cleanup_interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    let cleanup_interval = cleanup_interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);

        loop {
            interval.tick().await;
            let removed = {
                let mut guard = tracker.lock().await;
                let before = guard.len();
                guard.cleanup_stale(max_age);
                before - guard.len()
            };
            if removed > 0 {
                info!(removed, "Dropped stale retry tracker entries");
            }
        }
    })
}
