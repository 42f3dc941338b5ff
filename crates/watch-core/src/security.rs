use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::UserId;

/// Allow-list check for bot users. An empty list means the bot is public.
pub fn is_allowed(user_id: UserId, allowed_users: &[i64]) -> bool {
    allowed_users.is_empty() || allowed_users.contains(&user_id.0)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    refreshed: Instant,
}

/// Per-user token bucket guarding the LLM-backed bot requests.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    capacity: f64,
    per_sec: f64,
    buckets: HashMap<UserId, Bucket>,
}

impl RateLimiter {
    /// `requests` tokens per `window`, starting full.
    pub fn new(enabled: bool, requests: u32, window: Duration) -> Self {
        let capacity = f64::from(requests.max(1));
        Self {
            enabled,
            capacity,
            per_sec: capacity / window.as_secs_f64().max(1e-9),
            buckets: HashMap::new(),
        }
    }

    pub fn check(&mut self, user_id: UserId) -> RateDecision {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> RateDecision {
        if !self.enabled {
            return RateDecision::Allowed;
        }
        let capacity = self.capacity;
        let bucket = self.buckets.entry(user_id).or_insert(Bucket {
            tokens: capacity,
            refreshed: now,
        });

        let elapsed = now.saturating_duration_since(bucket.refreshed).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_sec).min(capacity);
        bucket.refreshed = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allowed
        } else {
            let secs = ((1.0 - bucket.tokens) / self.per_sec).max(0.0);
            RateDecision::Limited {
                retry_after: Duration::from_secs_f64(secs),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_is_public() {
        assert!(is_allowed(UserId(42), &[]));
        assert!(is_allowed(UserId(42), &[1, 42]));
        assert!(!is_allowed(UserId(42), &[1, 2]));
    }

    #[test]
    fn bucket_drains_and_refills() {
        let mut rl = RateLimiter::new(true, 2, Duration::from_secs(10));
        let t0 = Instant::now();
        assert_eq!(rl.check_at(UserId(1), t0), RateDecision::Allowed);
        assert_eq!(rl.check_at(UserId(1), t0), RateDecision::Allowed);
        match rl.check_at(UserId(1), t0) {
            RateDecision::Limited { retry_after } => {
                assert!(retry_after > Duration::from_secs(4));
                assert!(retry_after <= Duration::from_secs(5));
            }
            other => panic!("expected limit, got {other:?}"),
        }
        // Other users have their own bucket.
        assert_eq!(rl.check_at(UserId(2), t0), RateDecision::Allowed);
        // 5s refills one token at 0.2/s.
        assert_eq!(
            rl.check_at(UserId(1), t0 + Duration::from_secs(5)),
            RateDecision::Allowed
        );
    }

    #[test]
    fn disabled_never_limits() {
        let mut rl = RateLimiter::new(false, 1, Duration::from_secs(60));
        for _ in 0..10 {
            assert_eq!(rl.check(UserId(1)), RateDecision::Allowed);
        }
    }
}
