//! Inference rate gate.

use std::num::NonZeroU32;
use std::time::Duration;

/// Default spacing between frames forwarded to inference (10 per second).
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Decides whether a frame captured at `now` should be forwarded to inference.
///
/// `should_accept` is the only mutator of the last-accepted time and takes
/// `&mut self`, so callers on several lanes must serialize access themselves.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_accepted: Option<Duration>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    /// Limiter admitting at most `per_second` frames per second.
    pub fn from_rate(per_second: NonZeroU32) -> Self {
        Self::new(Duration::from_nanos(
            1_000_000_000 / u64::from(per_second.get()),
        ))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_accepted(&self) -> Option<Duration> {
        self.last_accepted
    }

    /// Accept iff `now - last_accepted >= min_interval`, recording `now` on accept.
    ///
    /// A timestamp older than the last accepted one is always rejected.
    pub fn should_accept(&mut self, now: Duration) -> bool {
        let accept = match self.last_accepted {
            None => true,
            Some(last) => now
                .checked_sub(last)
                .is_some_and(|elapsed| elapsed >= self.min_interval),
        };
        if accept {
            self.last_accepted = Some(now);
        }
        accept
    }

    /// Forget the last accepted time; the next frame is accepted unconditionally.
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn accepts_then_throttles_then_accepts() {
        let mut limiter = RateLimiter::default();
        assert!(limiter.should_accept(ms(0)));
        assert!(!limiter.should_accept(ms(50)));
        assert!(limiter.should_accept(ms(110)));
        assert_eq!(limiter.last_accepted(), Some(ms(110)));
    }

    #[test]
    fn interval_boundary_is_inclusive() {
        let mut limiter = RateLimiter::new(ms(100));
        assert!(limiter.should_accept(ms(1_000)));
        assert!(!limiter.should_accept(ms(1_099)));
        assert!(limiter.should_accept(ms(1_100)));
    }

    #[test]
    fn rejected_frames_do_not_move_the_window() {
        let mut limiter = RateLimiter::new(ms(100));
        assert!(limiter.should_accept(ms(0)));
        for t in (10..100).step_by(10) {
            assert!(!limiter.should_accept(ms(t)));
        }
        assert_eq!(limiter.last_accepted(), Some(ms(0)));
        assert!(limiter.should_accept(ms(100)));
    }

    #[test]
    fn clock_regression_is_rejected() {
        let mut limiter = RateLimiter::new(ms(100));
        assert!(limiter.should_accept(ms(500)));
        assert!(!limiter.should_accept(ms(100)));
        assert_eq!(limiter.last_accepted(), Some(ms(500)));
    }

    #[test]
    fn reset_reopens_the_gate() {
        let mut limiter = RateLimiter::new(ms(100));
        assert!(limiter.should_accept(ms(500)));
        limiter.reset();
        assert!(limiter.should_accept(ms(0)));
    }

    #[test]
    fn from_rate_derives_interval() {
        let rate = |n| RateLimiter::from_rate(NonZeroU32::new(n).unwrap());
        assert_eq!(rate(10).min_interval(), ms(100));
        assert_eq!(rate(1).min_interval(), ms(1_000));
        assert!(NonZeroU32::new(0).is_none());
    }
}
