//! Notification rate limiting.
//!
//! Both limiters take the current [`Instant`] from the caller so the
//! scheduler can drive them from the runtime clock.

use std::time::{Duration, Instant};

/// Allows at most one event per `window`, measured from the last event that
/// was let through.
#[derive(Debug, Clone)]
pub struct Cooldown {
    window: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Check if an event is allowed at `now` and record it if so.
    pub fn should_fire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Error notification limiter for one run.
///
/// Lets the first error of a window through and counts the ones it
/// swallows, so the next notification can report how many were skipped.
#[derive(Debug, Clone)]
pub struct ErrorRateLimiter {
    cooldown: Cooldown,
    suppressed: u64,
}

/// Decision for a single error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Notify, mentioning `suppressed` earlier errors that were not sent.
    Notify { suppressed: u64 },
    Suppress,
}

impl ErrorRateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            cooldown: Cooldown::new(window),
            suppressed: 0,
        }
    }

    pub fn check(&mut self, now: Instant) -> ErrorDecision {
        if self.cooldown.should_fire(now) {
            let suppressed = std::mem::take(&mut self.suppressed);
            ErrorDecision::Notify { suppressed }
        } else {
            self.suppressed += 1;
            ErrorDecision::Suppress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_suppresses_within_window() {
        let start = Instant::now();
        let mut cooldown = Cooldown::new(Duration::from_secs(120));

        assert!(cooldown.should_fire(start));
        assert!(!cooldown.should_fire(start + Duration::from_secs(60)));
        assert!(cooldown.should_fire(start + Duration::from_secs(120)));
    }

    #[test]
    fn zero_window_never_suppresses() {
        let start = Instant::now();
        let mut cooldown = Cooldown::new(Duration::ZERO);
        assert!(cooldown.should_fire(start));
        assert!(cooldown.should_fire(start));
    }

    #[test]
    fn reset_reopens_the_window() {
        let start = Instant::now();
        let mut cooldown = Cooldown::new(Duration::from_secs(120));
        assert!(cooldown.should_fire(start));
        cooldown.reset();
        assert!(cooldown.should_fire(start));
    }

    #[test]
    fn error_limiter_counts_suppressed() {
        let start = Instant::now();
        let mut limiter = ErrorRateLimiter::new(Duration::from_secs(300));

        assert_eq!(
            limiter.check(start),
            ErrorDecision::Notify { suppressed: 0 }
        );
        assert_eq!(limiter.check(start + Duration::from_secs(4)), ErrorDecision::Suppress);
        assert_eq!(limiter.check(start + Duration::from_secs(8)), ErrorDecision::Suppress);
        assert_eq!(
            limiter.check(start + Duration::from_secs(301)),
            ErrorDecision::Notify { suppressed: 2 }
        );
    }
}
