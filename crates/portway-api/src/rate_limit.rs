//! Admission control for client IPs and token identities.
//!
//! Implemented as a virtual scheduler (the GCRA formulation popular in the
//! rate-limiting ecosystem) rather than a counted bucket: each key stores a
//! single theoretical-arrival instant, advanced by one emission interval per
//! admitted request. A key may run ahead of real time by up to the burst
//! tolerance; beyond that, requests are denied until the schedule catches
//! up. State is one `Instant` per key, memory-only, and resets on restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Limit configuration for one admission dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketConfig {
    /// Requests a key may issue back-to-back before throttling starts.
    pub burst: u32,
    /// Time over which a fully spent burst allowance is restored.
    pub replenish_period: Duration,
}

impl BucketConfig {
    /// Schedule advance per admitted request.
    fn emission_interval(&self) -> Duration {
        let burst = self.burst.max(1);
        let interval = self.replenish_period / burst;
        interval.max(Duration::from_nanos(1))
    }

    /// How far ahead of real time a key's schedule may run.
    fn burst_tolerance(&self) -> Duration {
        self.emission_interval() * self.burst.max(1).saturating_sub(1)
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests the key could still issue right now.
    pub remaining: u32,
    /// Suggested wait before retrying, for denied requests.
    pub retry_after: Duration,
}

/// Keyed admission state; one limiter instance serves one dimension
/// (client IP or token id).
pub struct RateLimiter {
    config: BucketConfig,
    schedule: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// Limiter applying one configuration to every key.
    #[must_use]
    pub fn new(config: BucketConfig) -> Self {
        Self {
            config,
            schedule: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or deny one request for a key.
    #[must_use]
    pub fn admit(&self, key: &str) -> Admission {
        let interval = self.config.emission_interval();
        let tolerance = self.config.burst_tolerance();
        let now = Instant::now();

        let mut schedule = self.lock_schedule();
        let slot = schedule.entry(key.to_string()).or_insert(now);

        // How far the key's schedule already runs ahead of real time; a
        // schedule in the past collapses to "not ahead at all".
        let ahead = slot.saturating_duration_since(now);
        if ahead > tolerance {
            return Admission {
                allowed: false,
                remaining: 0,
                retry_after: ahead - tolerance,
            };
        }

        *slot = now + ahead + interval;
        let headroom = tolerance - ahead;
        let remaining = u32::try_from(headroom.as_nanos() / interval.as_nanos().max(1))
            .unwrap_or(u32::MAX);
        Admission {
            allowed: true,
            remaining,
            retry_after: Duration::ZERO,
        }
    }

    fn lock_schedule(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.schedule.lock().unwrap_or_else(|err| {
            panic!("failed to lock admission schedule: {err}");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(burst: u32) -> RateLimiter {
        RateLimiter::new(BucketConfig {
            burst,
            replenish_period: Duration::from_secs(60),
        })
    }

    #[test]
    fn burst_admits_then_denies() {
        let limiter = limiter(3);
        for _ in 0..3 {
            assert!(limiter.admit("10.0.0.1").allowed);
        }
        let denied = limiter.admit("10.0.0.1");
        assert!(!denied.allowed);
        assert!(denied.retry_after > Duration::ZERO);
    }

    #[test]
    fn keys_have_independent_schedules() {
        let limiter = limiter(1);
        assert!(limiter.admit("10.0.0.1").allowed);
        assert!(!limiter.admit("10.0.0.1").allowed);
        assert!(limiter.admit("10.0.0.2").allowed);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = limiter(5);
        assert_eq!(limiter.admit("k").remaining, 4);
        assert_eq!(limiter.admit("k").remaining, 3);
    }

    #[test]
    fn allowance_replenishes_as_the_schedule_catches_up() {
        let limiter = RateLimiter::new(BucketConfig {
            burst: 1,
            replenish_period: Duration::from_millis(40),
        });
        assert!(limiter.admit("k").allowed);
        assert!(!limiter.admit("k").allowed);

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.admit("k").allowed);
    }

    #[test]
    fn retry_after_shrinks_as_time_passes() {
        let limiter = RateLimiter::new(BucketConfig {
            burst: 2,
            replenish_period: Duration::from_millis(200),
        });
        assert!(limiter.admit("k").allowed);
        assert!(limiter.admit("k").allowed);
        let first_denial = limiter.admit("k");
        assert!(!first_denial.allowed);

        std::thread::sleep(Duration::from_millis(30));
        let later_denial = limiter.admit("k");
        assert!(!later_denial.allowed || later_denial.retry_after == Duration::ZERO);
        if !later_denial.allowed {
            assert!(later_denial.retry_after < first_denial.retry_after);
        }
    }
}
