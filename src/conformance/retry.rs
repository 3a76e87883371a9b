//! Bounded polling for tasks waiting on an external system.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Fixed attempt count and fixed sleep between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.deployment_poll_attempts,
            config.deployment_poll_interval(),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Call `check` until it reports `true`, at most `policy.max_attempts`
/// times, sleeping `policy.interval` between calls. `check` receives the
/// 1-based attempt number.
///
/// Blocks the calling thread; only call it from a task body.
///
/// # Errors
/// Returns [`Error::NotConverged`] once the attempts are exhausted, or the
/// first error `check` returns.
pub fn poll_until(
    policy: &RetryPolicy,
    target: &str,
    mut check: impl FnMut(u32) -> Result<bool>,
) -> Result<u32> {
    for attempt in 1..=policy.max_attempts {
        if check(attempt)? {
            debug!(target, attempt, "Target state reached");
            return Ok(attempt);
        }
        debug!(target, attempt, max = policy.max_attempts, "Target state not reached yet");
        if attempt < policy.max_attempts {
            thread::sleep(policy.interval);
        }
    }
    Err(Error::NotConverged {
        target: target.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_converges_on_later_attempt() {
        let attempt = poll_until(&fast(5), "web", |n| Ok(n == 3)).unwrap();
        assert_eq!(attempt, 3);
    }

    #[test]
    fn test_exhaustion_reports_attempts() {
        let mut calls = 0;
        let err = poll_until(&fast(3), "Deployment 'web-1'", |_| {
            calls += 1;
            Ok(false)
        })
        .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(err.to_string(), "Deployment 'web-1' did not converge after 3 attempts");
    }

    #[test]
    fn test_check_error_stops_polling() {
        let mut calls = 0;
        let err = poll_until(&fast(5), "web", |_| {
            calls += 1;
            Err(Error::External("connection refused".to_string()))
        })
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, Error::External(_)));
    }

    #[test]
    fn test_policy_from_config() {
        let config = Config {
            deployment_poll_attempts: 4,
            deployment_poll_interval_ms: 250,
            ..Config::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
