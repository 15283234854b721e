//! Per-client and global token buckets.
//!
//! Both buckets refill continuously at `capacity / window` tokens per
//! second. An acquisition takes one token from the global bucket and one
//! from the caller's bucket, or from neither.
//!
//! Time comes from [`tokio::time::Instant`], so tests can drive refills
//! with a paused clock.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use headshot_core::types::ClientId;
use moka::sync::Cache;
use tokio::time::Instant;

use crate::config::RateLimit;

/// Slack for float drift in refill arithmetic.
const TOKEN_EPSILON: f64 = 1e-9;

/// Which bucket denied an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Client,
    Global,
}

/// Result of [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied {
        /// Time until the denying bucket holds a whole token again.
        retry_after: Duration,
        scope: LimitScope,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    tokens_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: RateLimit, now: Instant) -> Self {
        let capacity = f64::from(limit.capacity);
        Self {
            capacity,
            tokens: capacity,
            tokens_per_sec: capacity / limit.window.as_secs_f64(),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refilled = self.tokens + elapsed.as_secs_f64() * self.tokens_per_sec;
        self.tokens = if refilled >= self.capacity - TOKEN_EPSILON {
            self.capacity
        } else {
            refilled
        };
        self.last_refill = now;
    }

    fn has_token(&self) -> bool {
        self.tokens >= 1.0 - TOKEN_EPSILON
    }

    fn take(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    /// Time until one whole token is available.
    fn wait_time(&self) -> Duration {
        if self.tokens_per_sec <= 0.0 {
            return Duration::MAX;
        }
        let deficit = (1.0 - self.tokens).max(0.0);
        Duration::try_from_secs_f64(deficit / self.tokens_per_sec).unwrap_or(Duration::MAX)
    }
}

/// Admission control in front of the provider.
///
/// Client buckets live in a bounded cache and are evicted after one idle
/// client window, by which point they would have refilled completely.
pub struct RateLimiter {
    client_limit: RateLimit,
    global: Mutex<TokenBucket>,
    clients: Cache<ClientId, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    /// `max_clients` caps how many client buckets are held at once.
    pub fn new(client_limit: RateLimit, global_limit: RateLimit, max_clients: u64) -> Self {
        let clients = Cache::builder()
            .max_capacity(max_clients)
            .time_to_idle(client_limit.window)
            .build();

        Self {
            client_limit,
            global: Mutex::new(TokenBucket::new(global_limit, Instant::now())),
            clients,
        }
    }

    /// Take one token for `client` if both its bucket and the global bucket
    /// have one. The global bucket is checked first, so a `Global` denial
    /// means no client can be admitted right now.
    ///
    /// The global lock is held for the whole call, so concurrent callers
    /// never both spend the last token.
    pub fn try_acquire(&self, client: &ClientId) -> Admission {
        let now = Instant::now();
        let mut global = self.global.lock().unwrap_or_else(PoisonError::into_inner);

        global.refill(now);
        if !global.has_token() {
            return Admission::Denied {
                retry_after: global.wait_time(),
                scope: LimitScope::Global,
            };
        }

        let limit = self.client_limit;
        let entry = self.clients.get_with(client.clone(), || {
            Arc::new(Mutex::new(TokenBucket::new(limit, now)))
        });
        let mut bucket = entry.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(now);
        if !bucket.has_token() {
            return Admission::Denied {
                retry_after: bucket.wait_time(),
                scope: LimitScope::Client,
            };
        }

        global.take();
        bucket.take();
        Admission::Allowed
    }

    /// Apply pending cache evictions.
    pub fn run_pending_tasks(&self) {
        self.clients.run_pending_tasks();
    }

    /// Number of client buckets currently held.
    pub fn tracked_clients(&self) -> u64 {
        self.clients.run_pending_tasks();
        self.clients.entry_count()
    }
}
