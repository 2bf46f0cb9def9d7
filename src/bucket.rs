//! Token bucket state and refill arithmetic.
//!
//! The bucket refills in whole periods: after `n` full refill periods have
//! elapsed it gains `n * refill_amount` tokens (clamped to capacity) and its
//! refill timestamp advances by exactly `n` periods. Partial periods carry
//! over, so a caller who is denied and retries exactly one period after the
//! last refill is granted the freshly minted token.

use std::time::Duration;

use crate::limiter::Decision;
use crate::policy::Policy;

/// Mutable per-(policy, partition key) state.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    tokens: f64,
    last_refill: u64,
    last_access: u64,
}

impl Bucket {
    /// A freshly created bucket starts full.
    pub fn full(policy: &Policy, now_millis: u64) -> Self {
        Self { tokens: f64::from(policy.capacity()), last_refill: now_millis, last_access: now_millis }
    }

    /// Refill for elapsed whole periods, then attempt to consume one token.
    ///
    /// The caller must hold exclusive access to the bucket for the duration
    /// of the call; the arithmetic itself never blocks.
    pub fn try_consume(&mut self, policy: &Policy, now_millis: u64) -> Decision {
        self.last_access = now_millis;

        let period = policy.refill_period_millis();
        let elapsed = now_millis.saturating_sub(self.last_refill);
        let whole_periods = elapsed / period;
        if whole_periods >= 1 {
            let minted = whole_periods as f64 * f64::from(policy.refill_amount());
            self.tokens = (self.tokens + minted).min(f64::from(policy.capacity()));
            self.last_refill = self.last_refill.saturating_add(whole_periods.saturating_mul(period));
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::Allowed { remaining: self.tokens as u32 }
        } else {
            let since_refill = now_millis.saturating_sub(self.last_refill);
            Decision::Denied { retry_after: Duration::from_millis(period.saturating_sub(since_refill)) }
        }
    }

    /// Current token count.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Clock time of the most recent consumption attempt; used by idle
    /// eviction.
    pub fn last_access_millis(&self) -> u64 {
        self.last_access
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(capacity: u32, refill: u32, period_secs: u64) -> Policy {
        Policy::new("test", capacity, refill, Duration::from_secs(period_secs)).unwrap()
    }

    #[test]
    fn fresh_bucket_allows_exactly_capacity() {
        let policy = policy(2, 1, 60);
        let mut bucket = Bucket::full(&policy, 0);

        assert_eq!(bucket.try_consume(&policy, 0), Decision::Allowed { remaining: 1 });
        assert_eq!(bucket.try_consume(&policy, 0), Decision::Allowed { remaining: 0 });
        let denied = bucket.try_consume(&policy, 0);
        assert_eq!(denied, Decision::Denied { retry_after: Duration::from_secs(60) });
    }

    #[test]
    fn retry_after_shrinks_as_the_period_elapses() {
        let policy = policy(1, 1, 60);
        let mut bucket = Bucket::full(&policy, 0);
        assert!(bucket.try_consume(&policy, 0).is_allowed());

        match bucket.try_consume(&policy, 45_000) {
            Decision::Denied { retry_after } => assert_eq!(retry_after, Duration::from_secs(15)),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn one_full_period_grants_exactly_the_refill_amount() {
        let policy = policy(2, 1, 60);
        let mut bucket = Bucket::full(&policy, 0);
        assert!(bucket.try_consume(&policy, 0).is_allowed());
        assert!(bucket.try_consume(&policy, 0).is_allowed());
        assert!(!bucket.try_consume(&policy, 0).is_allowed());

        // Exactly one period later: one token minted, consumed immediately.
        assert_eq!(bucket.try_consume(&policy, 60_000), Decision::Allowed { remaining: 0 });
        // And only one.
        assert!(!bucket.try_consume(&policy, 60_000).is_allowed());
    }

    #[test]
    fn partial_periods_do_not_refill() {
        let policy = policy(1, 1, 60);
        let mut bucket = Bucket::full(&policy, 0);
        assert!(bucket.try_consume(&policy, 0).is_allowed());
        assert!(!bucket.try_consume(&policy, 59_999).is_allowed());
        assert!(bucket.try_consume(&policy, 60_000).is_allowed());
    }

    #[test]
    fn idle_bucket_never_exceeds_capacity() {
        let policy = policy(2, 1, 60);
        let mut bucket = Bucket::full(&policy, 0);
        assert!(bucket.try_consume(&policy, 0).is_allowed());

        // A year of idleness mints far more than capacity; the clamp holds.
        let year = 365 * 24 * 3600 * 1000;
        assert_eq!(bucket.try_consume(&policy, year), Decision::Allowed { remaining: 1 });
        assert_eq!(bucket.try_consume(&policy, year), Decision::Allowed { remaining: 0 });
        assert!(!bucket.try_consume(&policy, year).is_allowed());
    }

    #[test]
    fn refill_timestamp_advances_by_whole_periods_only() {
        let policy = policy(1, 1, 60);
        let mut bucket = Bucket::full(&policy, 0);
        assert!(bucket.try_consume(&policy, 0).is_allowed());

        // 90s elapsed: one period consumed, 30s of credit carried over, so
        // the next token lands at 120s, 30s away.
        assert!(bucket.try_consume(&policy, 90_000).is_allowed());
        match bucket.try_consume(&policy, 90_000) {
            Decision::Denied { retry_after } => assert_eq!(retry_after, Duration::from_secs(30)),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn multiple_periods_mint_multiples_of_the_refill_amount() {
        let policy = policy(20, 5, 30);
        let mut bucket = Bucket::full(&policy, 0);
        for _ in 0..20 {
            assert!(bucket.try_consume(&policy, 0).is_allowed());
        }
        assert!(!bucket.try_consume(&policy, 0).is_allowed());

        // Two periods mint 10 tokens; one is consumed by the probe.
        assert_eq!(bucket.try_consume(&policy, 60_000), Decision::Allowed { remaining: 9 });
    }

    #[test]
    fn denial_does_not_spend_tokens() {
        let policy = policy(1, 1, 60);
        let mut bucket = Bucket::full(&policy, 0);
        assert!(bucket.try_consume(&policy, 0).is_allowed());
        assert!(!bucket.try_consume(&policy, 1_000).is_allowed());
        assert!(!bucket.try_consume(&policy, 2_000).is_allowed());
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn last_access_tracks_consumption_attempts() {
        let policy = policy(1, 1, 60);
        let mut bucket = Bucket::full(&policy, 0);
        assert!(bucket.try_consume(&policy, 5_000).is_allowed());
        assert_eq!(bucket.last_access_millis(), 5_000);
        let _ = bucket.try_consume(&policy, 7_500);
        assert_eq!(bucket.last_access_millis(), 7_500);
    }
}
