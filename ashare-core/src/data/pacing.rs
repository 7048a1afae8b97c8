//! Pacing policies for one-call-per-symbol fetches.
//!
//! Fetchers call [`Pacer::before_call`] before and [`Pacer::after_call`]
//! after every remote call. Swapping the policy changes how hard the provider
//! is hit without touching the fetch or reshape logic.

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Back-pressure policy applied around remote calls.
pub trait Pacer: Send + Sync {
    /// Block until the policy admits the next call.
    fn before_call(&self) {}

    /// Block as long as the policy requires. `calls_made` counts completed
    /// calls including the one that just finished.
    fn after_call(&self, calls_made: usize);
}

/// No waiting at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

impl Pacer for NoPacing {
    fn after_call(&self, _calls_made: usize) {}
}

/// Sleep a fixed duration after every call.
#[derive(Debug, Clone, Copy)]
pub struct FixedPause(pub Duration);

impl Pacer for FixedPause {
    fn after_call(&self, _calls_made: usize) {
        if !self.0.is_zero() {
            std::thread::sleep(self.0);
        }
    }
}

/// Provider quota of N calls per minute, enforced before each call.
///
/// Backed by a GCRA limiter: a full burst of N is admitted, after which one
/// call is replenished every `60s / N`.
pub struct RateLimit {
    limiter: DirectLimiter,
    clock: DefaultClock,
    calls_per_minute: NonZeroU32,
}

impl RateLimit {
    pub fn per_minute(calls_per_minute: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(calls_per_minute)),
            clock: DefaultClock::default(),
            calls_per_minute,
        }
    }

    pub fn calls_per_minute(&self) -> NonZeroU32 {
        self.calls_per_minute
    }

    /// Claim one call, or report how long until the quota admits one.
    fn try_claim(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

impl fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimit")
            .field("calls_per_minute", &self.calls_per_minute)
            .finish()
    }
}

impl Pacer for RateLimit {
    fn before_call(&self) {
        while let Err(wait) = self.try_claim() {
            debug!(?wait, limit = self.calls_per_minute.get(), "call quota reached");
            std::thread::sleep(wait);
        }
    }

    fn after_call(&self, _calls_made: usize) {}
}

/// Build the reference policy from a pause length: zero means no pacing.
pub fn pause_policy(pause: Duration) -> Box<dyn Pacer> {
    if pause.is_zero() {
        Box::new(NoPacing)
    } else {
        Box::new(FixedPause(pause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn per_minute(n: u32) -> RateLimit {
        RateLimit::per_minute(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn fixed_pause_blocks_for_duration() {
        let pacer = FixedPause(Duration::from_millis(20));
        let started = Instant::now();
        pacer.after_call(1);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn rate_limit_admits_a_full_burst() {
        let limit = per_minute(3);
        assert!(limit.try_claim().is_ok());
        assert!(limit.try_claim().is_ok());
        assert!(limit.try_claim().is_ok());
    }

    #[test]
    fn rate_limit_reports_wait_when_exhausted() {
        let limit = per_minute(2);
        limit.try_claim().unwrap();
        limit.try_claim().unwrap();

        let wait = limit.try_claim().unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(30), "{wait:?}");
    }

    #[test]
    fn before_call_does_not_block_under_quota() {
        let limit = per_minute(100);
        let started = Instant::now();
        for _ in 0..10 {
            limit.before_call();
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn zero_pause_means_no_pacing() {
        let started = Instant::now();
        let pacer = pause_policy(Duration::ZERO);
        pacer.before_call();
        pacer.after_call(1);
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
