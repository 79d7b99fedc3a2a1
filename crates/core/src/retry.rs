//! Retry Policy - bounded exponential backoff for transient store failures
//!
//! The policy never decides on its own what is retryable; callers pass a
//! classifier. Sleeping goes through a [`Sleeper`] so tests can observe the
//! schedule without waiting for it.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Blocks the calling thread between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Sleeper that only records the requested delays.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    pub fn total(&self) -> Duration {
        self.delays.lock().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

/// Outcome bookkeeping of one retried operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Number of times the operation was invoked
    pub attempts: u32,
    /// Sum of all backoff delays slept
    pub total_wait: Duration,
}

/// Exponential backoff with a cap on the total time spent waiting
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Option<Duration>,
    /// Budget for the sum of all delays
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Some(Duration::from_secs(10)),
            max_total_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy that gives up on the first failure
    pub fn no_retry() -> Self {
        Self {
            max_total_wait: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay to sleep before retry number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        // Whole nanoseconds so integral multipliers give exact delays
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let nanos = match self.max_delay {
            Some(max) => nanos.min(max.as_nanos() as f64),
            None => nanos,
        };

        if nanos.is_finite() && nanos >= 0.0 && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            Duration::MAX
        }
    }

    /// Run `operation`, retrying errors `is_retryable` accepts
    pub fn run<T, E, F, R>(&self, sleeper: &dyn Sleeper, operation: F, is_retryable: R) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        self.run_with_report(sleeper, operation, is_retryable).0
    }

    /// Like [`run`](Self::run), also reporting attempts and total wait
    pub fn run_with_report<T, E, F, R>(
        &self,
        sleeper: &dyn Sleeper,
        mut operation: F,
        is_retryable: R,
    ) -> (Result<T, E>, RetryReport)
    where
        E: fmt::Display,
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let mut report = RetryReport::default();

        loop {
            report.attempts += 1;
            let err = match operation() {
                Ok(value) => return (Ok(value), report),
                Err(err) => err,
            };

            if !is_retryable(&err) {
                return (Err(err), report);
            }

            let delay = self.delay_for_attempt(report.attempts - 1);
            let waited = report.total_wait.saturating_add(delay);
            if waited > self.max_total_wait {
                tracing::warn!(
                    "Giving up after {} attempt(s) and {:?} of backoff: {}",
                    report.attempts,
                    report.total_wait,
                    err
                );
                return (Err(err), report);
            }

            tracing::warn!(
                "Transient failure on attempt {}, retrying in {:?}: {}",
                report.attempts,
                delay,
                err
            );
            sleeper.sleep(delay);
            report.total_wait = waited;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Transient,
        Fatal,
    }

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn policy(total_secs: u64) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: None,
            max_total_wait: Duration::from_secs(total_secs),
        }
    }

    #[test]
    fn test_delay_schedule() {
        let capped = RetryPolicy {
            max_delay: Some(Duration::from_secs(5)),
            ..policy(100)
        };
        assert_eq!(capped.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(capped.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(capped.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(capped.delay_for_attempt(3), Duration::from_secs(5));
        assert_eq!(capped.delay_for_attempt(1000), Duration::from_secs(5));

        // Uncapped growth saturates rather than panicking
        assert_eq!(policy(1).delay_for_attempt(5000), Duration::MAX);
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;

        let (result, report) = policy(10).run_with_report(
            &sleeper,
            || {
                calls += 1;
                if calls <= 2 {
                    Err(Failure::Transient)
                } else {
                    Ok(calls)
                }
            },
            |e| *e == Failure::Transient,
        );

        assert_eq!(result, Ok(3));
        assert_eq!(report.attempts, 3);
        assert_eq!(report.total_wait, Duration::from_secs(3));
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn test_fatal_error_is_not_retried() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;

        let result: Result<(), Failure> = policy(10).run(
            &sleeper,
            || {
                calls += 1;
                Err(Failure::Fatal)
            },
            |e| *e == Failure::Transient,
        );

        assert_eq!(result, Err(Failure::Fatal));
        assert_eq!(calls, 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn test_gives_up_when_budget_exhausted() {
        let sleeper = RecordingSleeper::new();

        // 1 + 2 + 4 = 7 fits in 10s; the next 8s delay would not
        let (result, report) = policy(10).run_with_report(
            &sleeper,
            || Err::<(), _>(Failure::Transient),
            |e| *e == Failure::Transient,
        );

        assert_eq!(result, Err(Failure::Transient));
        assert_eq!(report.attempts, 4);
        assert_eq!(sleeper.total(), Duration::from_secs(7));
        assert!(sleeper.total() <= Duration::from_secs(10));
    }

    #[test]
    fn test_no_retry_policy() {
        let sleeper = RecordingSleeper::new();
        let (result, report) = RetryPolicy::no_retry().run_with_report(
            &sleeper,
            || Err::<(), _>(Failure::Transient),
            |_| true,
        );
        assert!(result.is_err());
        assert_eq!(report.attempts, 1);
        assert_eq!(report.total_wait, Duration::ZERO);
    }
}
