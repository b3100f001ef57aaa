//! Sliding-window rate limiting, sharded per key via `dashmap` rather than a
//! single global mutex on the hot path (`SPEC_FULL.md` §5).

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

struct Window {
    hits: Vec<DateTime<Utc>>,
}

pub struct RateLimiter {
    buckets: DashMap<String, Window>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { buckets: DashMap::new(), limit, window }
    }

    /// `100 req / 15 min` per customer by default.
    pub fn machine_default() -> Self {
        Self::new(100, Duration::minutes(15))
    }

    /// Returns `true` if the call is allowed under `key`'s current window,
    /// recording the hit as a side effect.
    pub fn check(&self, key: &str) -> bool {
        let now = Utc::now();
        let cutoff = now - self.window;
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| Window { hits: Vec::new() });
        entry.hits.retain(|t| *t > cutoff);
        if entry.hits.len() as u32 >= self.limit {
            return false;
        }
        entry.hits.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let rl = RateLimiter::new(3, Duration::minutes(1));
        assert!(rl.check("cust-1"));
        assert!(rl.check("cust-1"));
        assert!(rl.check("cust-1"));
        assert!(!rl.check("cust-1"));
    }

    #[test]
    fn buckets_are_independent_per_key() {
        let rl = RateLimiter::new(1, Duration::minutes(1));
        assert!(rl.check("cust-1"));
        assert!(rl.check("cust-2"));
        assert!(!rl.check("cust-1"));
    }
}
