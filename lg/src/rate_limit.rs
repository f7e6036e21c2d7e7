//! Per-client rate limiting
//!
//! One token bucket per client address. A bucket holds `limit` tokens and
//! refills at `limit / timeframe`, so a client gets `limit` requests per
//! timeframe with bursts up to `limit`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Drop idle buckets once the table grows past this many clients, at most
/// once per timeframe.
const PRUNE_THRESHOLD: usize = 4096;

/// Token bucket for rate limiting
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(max_tokens: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_full(&self) -> bool {
        self.tokens >= self.max_tokens
    }
}

struct Buckets {
    clients: HashMap<String, TokenBucket>,
    last_prune: Instant,
}

impl Buckets {
    fn prune_idle(&mut self, now: Instant) {
        self.clients.retain(|_, bucket| {
            bucket.refill(now);
            !bucket.is_full()
        });
        self.last_prune = now;
    }
}

/// Rate limiter keyed by client address
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    limit: u32,
    timeframe: Duration,
}

impl RateLimiter {
    /// `limit` requests per `timeframe`. A zero limit or timeframe disables
    /// limiting.
    pub fn new(limit: u32, timeframe: Duration) -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                clients: HashMap::new(),
                last_prune: Instant::now(),
            }),
            limit,
            timeframe,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0 && !self.timeframe.is_zero()
    }

    /// Take one token for `client`; false when the client is over its limit.
    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Rate limiter lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        if buckets.clients.len() >= PRUNE_THRESHOLD
            && now.saturating_duration_since(buckets.last_prune) >= self.timeframe
        {
            buckets.prune_idle(now);
        }

        let max = f64::from(self.limit);
        let rate = max / self.timeframe.as_secs_f64();
        buckets
            .clients
            .entry(client.to_string())
            .or_insert_with(|| TokenBucket::new(max, rate, now))
            .try_consume(now)
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().map(|b| b.clients.len()).unwrap_or(0)
    }
}
