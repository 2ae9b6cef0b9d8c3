use dashmap::DashMap;

use crate::model::Ms;

/// Admission control for one caller identity.
pub trait RateLimit: Send + Sync {
    /// Record a hit for `key` at `now` and say whether it may proceed.
    fn check(&self, key: &str, now: Ms) -> bool;
    /// Drop buckets whose window has already ended.
    fn sweep(&self, now: Ms);
}

struct Bucket {
    count: u32,
    reset_at: Ms,
}

/// Fixed-window counter per key: up to `max_hits` within `window_ms`,
/// then denial until the window rolls over. A window opens on the first
/// hit after the previous one expired.
pub struct FixedWindowLimiter {
    buckets: DashMap<String, Bucket>,
    window_ms: Ms,
    max_hits: u32,
}

impl FixedWindowLimiter {
    pub fn new(window_ms: Ms, max_hits: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            window_ms,
            max_hits,
        }
    }
}

impl RateLimit for FixedWindowLimiter {
    fn check(&self, key: &str, now: Ms) -> bool {
        let mut bucket = self
            .buckets
            .entry(key.to_owned())
            .or_insert_with(|| Bucket { count: 0, reset_at: now + self.window_ms });
        if now > bucket.reset_at {
            bucket.count = 1;
            bucket.reset_at = now + self.window_ms;
            return true;
        }
        if bucket.count >= self.max_hits {
            return false;
        }
        bucket.count += 1;
        true
    }

    fn sweep(&self, now: Ms) {
        self.buckets.retain(|_, bucket| bucket.reset_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_denies() {
        let limiter = FixedWindowLimiter::new(60_000, 3);
        assert!(limiter.check("client-a", 1_000));
        assert!(limiter.check("client-a", 2_000));
        assert!(limiter.check("client-a", 3_000));
        assert!(!limiter.check("client-a", 4_000));
        assert!(!limiter.check("client-a", 59_000));
    }

    #[test]
    fn window_rollover_readmits() {
        let limiter = FixedWindowLimiter::new(60_000, 1);
        assert!(limiter.check("client-a", 1_000));
        assert!(!limiter.check("client-a", 61_000)); // reset_at == 61_000, still closed
        assert!(limiter.check("client-a", 61_001));
        assert!(!limiter.check("client-a", 61_002));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = FixedWindowLimiter::new(60_000, 1);
        assert!(limiter.check("client-a", 1_000));
        assert!(limiter.check("client-b", 1_000));
        assert!(!limiter.check("client-a", 2_000));
    }

    #[test]
    fn sweep_drops_expired_buckets() {
        let limiter = FixedWindowLimiter::new(60_000, 3);
        limiter.check("client-a", 1_000);
        limiter.check("client-b", 50_000);
        assert_eq!(limiter.buckets.len(), 2);

        limiter.sweep(61_001); // client-a's window ended at 61_000
        assert_eq!(limiter.buckets.len(), 1);

        limiter.sweep(110_001);
        assert!(limiter.buckets.is_empty());
    }
}
