//! Reconnection policy: exponential backoff with jitter, error-class
//! gating and a circuit breaker in front of the retry loop.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::error::ErrorClass;

/// Exponential backoff tuning.
#[derive(Debug, Clone)]
pub(crate) struct BackoffPolicy {
    pub(crate) initial_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) multiplier: f64,
    pub(crate) jitter_factor: f64,
    pub(crate) max_attempts: u32,
}

impl BackoffPolicy {
    /// The delay before retry number `attempt` (1-based), with ±jitter.
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter = if self.jitter_factor > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor)
        } else {
            0.0
        };

        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }
}

/// Whether a failed session is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Retry after the regular backoff delay.
    Retry,
    /// Retry, but pad the delay; the failure was resource pressure.
    RetryWithExtraDelay,
    /// Give up.
    GiveUp,
}

/// Classify a session failure against the attempt budget.
pub(crate) fn retry_decision(class: ErrorClass, attempt: u32, max_attempts: u32) -> RetryDecision {
    if attempt >= max_attempts {
        return RetryDecision::GiveUp;
    }

    match class {
        ErrorClass::Transient | ErrorClass::Protocol | ErrorClass::Closed | ErrorClass::Timeout => {
            RetryDecision::Retry
        }
        ErrorClass::Resource => RetryDecision::RetryWithExtraDelay,
        ErrorClass::Authentication | ErrorClass::Configuration | ErrorClass::Codec => {
            RetryDecision::GiveUp
        }
        // Anything unclassified only gets half the budget.
        ErrorClass::Unknown => {
            if attempt < max_attempts / 2 {
                RetryDecision::Retry
            } else {
                RetryDecision::GiveUp
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

/// A circuit breaker fronting the retry loop.
///
/// After `failure_threshold` consecutive failures the breaker opens for
/// `recovery_timeout`; it then allows trial attempts and closes again after
/// `success_threshold` consecutive successes.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl CircuitBreaker {
    pub(crate) fn new(
        failure_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            success_threshold: success_threshold.max(1),
            state: BreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    /// How long to hold off before the next attempt is allowed, if at all.
    pub(crate) fn hold_off(&mut self, now: Instant) -> Option<Duration> {
        match self.state {
            BreakerState::Open { until } if now < until => Some(until - now),
            BreakerState::Open { .. } => {
                self.state = BreakerState::HalfOpen;
                self.consecutive_successes = 0;
                None
            }
            _ => None,
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;

        match self.state {
            BreakerState::HalfOpen => {
                self.consecutive_successes += 1;

                if self.consecutive_successes >= self.success_threshold {
                    self.state = BreakerState::Closed;
                }
            }
            _ => {
                self.state = BreakerState::Closed;
            }
        }
    }

    pub(crate) fn record_failure(&mut self, now: Instant) {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;

        let tripped = match self.state {
            BreakerState::HalfOpen => true,
            _ => self.consecutive_failures >= self.failure_threshold,
        };

        if tripped {
            self.state = BreakerState::Open {
                until: now + self.recovery_timeout,
            };
            self.consecutive_failures = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 8,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let mut policy = policy();
        policy.jitter_factor = 0.1;

        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(90), "{delay:?}");
            assert!(delay <= Duration::from_millis(110), "{delay:?}");
        }
    }

    #[test]
    fn decisions_follow_error_class() {
        assert_eq!(retry_decision(ErrorClass::Transient, 1, 8), RetryDecision::Retry);
        assert_eq!(retry_decision(ErrorClass::Protocol, 1, 8), RetryDecision::Retry);
        assert_eq!(
            retry_decision(ErrorClass::Resource, 1, 8),
            RetryDecision::RetryWithExtraDelay
        );
        assert_eq!(
            retry_decision(ErrorClass::Authentication, 1, 8),
            RetryDecision::GiveUp
        );
        assert_eq!(
            retry_decision(ErrorClass::Configuration, 1, 8),
            RetryDecision::GiveUp
        );
        assert_eq!(retry_decision(ErrorClass::Unknown, 3, 8), RetryDecision::Retry);
        assert_eq!(retry_decision(ErrorClass::Unknown, 4, 8), RetryDecision::GiveUp);
        assert_eq!(retry_decision(ErrorClass::Transient, 8, 8), RetryDecision::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_and_recovers() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(5), 2);
        let now = Instant::now();

        assert_eq!(breaker.hold_off(now), None);

        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.hold_off(now), None);

        breaker.record_failure(now);
        assert_eq!(breaker.hold_off(now), Some(Duration::from_secs(5)));

        // After the recovery timeout a trial attempt is allowed.
        let later = now + Duration::from_secs(6);
        assert_eq!(breaker.hold_off(later), None);

        // One trial failure re-opens immediately.
        breaker.record_failure(later);
        assert!(breaker.hold_off(later).is_some());

        // A successful trial run closes after the success threshold.
        let trial = later + Duration::from_secs(6);
        assert_eq!(breaker.hold_off(trial), None);
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.hold_off(trial), None);
        breaker.record_failure(trial);
        breaker.record_failure(trial);
        assert_eq!(breaker.hold_off(trial), None, "breaker closed again");
    }
}
