//! Per-bot token buckets gating generative calls.
//!
//! Buckets live in process memory only; a restart starts every bot full.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::utils::error::CoreError;

/// Monotonic time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self { now: Mutex::new(Instant::now()) }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self { tokens: capacity, last_refill: now }
    }

    fn refill(&mut self, capacity: f64, rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

/// Explicit registry of buckets keyed by bot id. Buckets are created full on
/// first use and never reclaimed.
pub struct RateLimiterRegistry {
    buckets: DashMap<i64, TokenBucket>,
    capacity: f64,
    refill_per_second: f64,
    clock: Arc<dyn Clock>,
}

impl RateLimiterRegistry {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: f64::from(config.capacity),
            refill_per_second: config.refill_per_second.max(0.0),
            clock,
        }
    }

    /// Take `requested` tokens from the bot's bucket or fail without
    /// touching it. Returns the balance left on success.
    ///
    /// The check and decrement happen under the map's shard lock with no
    /// await in between.
    pub fn remove_tokens(&self, bot_id: i64, requested: u32) -> Result<u32, CoreError> {
        let now = self.clock.now();
        let mut bucket = self
            .buckets
            .entry(bot_id)
            .or_insert_with(|| TokenBucket::full(self.capacity, now));
        bucket.refill(self.capacity, self.refill_per_second, now);

        let wanted = f64::from(requested);
        if wanted <= bucket.tokens {
            bucket.tokens -= wanted;
            debug!("Bot {} spent {} tokens, {} left", bot_id, requested, bucket.tokens as u32);
            return Ok(bucket.tokens as u32);
        }

        let available = bucket.tokens as u32;
        let retry_after = self.retry_after(wanted, bucket.tokens);
        warn!(
            "Rate limit exceeded for bot {}: requested {}, available {}",
            bot_id, requested, available
        );
        Err(CoreError::RateLimitExceeded {
            bot_id,
            requested,
            available,
            retry_after,
        })
    }

    /// Largest request a bucket can ever grant.
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Current balance without spending. Unknown bots report full capacity.
    pub fn available(&self, bot_id: i64) -> u32 {
        let now = self.clock.now();
        match self.buckets.get_mut(&bot_id) {
            Some(mut bucket) => {
                bucket.refill(self.capacity, self.refill_per_second, now);
                bucket.tokens as u32
            }
            None => self.capacity as u32,
        }
    }

    fn retry_after(&self, wanted: f64, tokens: f64) -> Duration {
        // Never satisfiable, or no refill configured
        if wanted > self.capacity || self.refill_per_second <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(((wanted - tokens) / self.refill_per_second).max(0.0))
    }
}
