//! Exponential backoff for temporary failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::safe_error::SafeError;

const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry("max_attempts must be at least 1".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidRetry("multiplier must be >= 1.0".into()));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::InvalidRetry(
                "base_delay must not exceed max_delay".into(),
            ));
        }
        Ok(())
    }

    /// `min(base * multiplier^(attempt-1), max)`, then optional ±20% jitter.
    /// Attempts below 1 count as the first attempt.
    pub fn next_delay(&self, attempt: i64) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_nanos() as f64;
        let max = self.max_delay.as_nanos() as f64;

        let mut delay = base * self.multiplier.powf((attempt - 1) as f64);
        if !delay.is_finite() || delay > max {
            delay = max;
        }
        if self.jitter {
            let spread = delay * JITTER_FRACTION;
            delay += rand::thread_rng().gen_range(-1.0..=1.0) * spread;
        }
        Duration::from_nanos(delay.max(0.0) as u64)
    }
}

pub fn is_retryable(err: &SafeError) -> bool {
    err.is_temporary()
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
/// Sleeps the calling thread between attempts.
pub fn retry<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, SafeError>
where
    F: FnMut(u32) -> Result<T, SafeError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && attempt < max_attempts => {
                let delay = policy.next_delay(attempt.into());
                warn!(attempt, ?delay, diagnostic = err.diagnostic(), "temporary failure; retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Async variant of [`retry`] that waits with `tokio::time::sleep`.
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, SafeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SafeError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && attempt < max_attempts => {
                let delay = policy.next_delay(attempt.into());
                warn!(attempt, ?delay, diagnostic = err.diagnostic(), "temporary failure; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safe_error::ErrorKind;

    fn fixed(base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn exponential_growth_and_cap() {
        let policy = fixed(100);
        assert_eq!(policy.next_delay(1), Duration::from_millis(100));
        assert_eq!(policy.next_delay(2), Duration::from_millis(200));
        assert_eq!(policy.next_delay(3), Duration::from_millis(400));
        assert_eq!(policy.next_delay(10), policy.max_delay);
        assert_eq!(policy.next_delay(i64::MAX), policy.max_delay);
    }

    #[test]
    fn non_positive_attempt_is_first_attempt() {
        let policy = fixed(100);
        assert_eq!(policy.next_delay(0), Duration::from_millis(100));
        assert_eq!(policy.next_delay(-3), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            ..RetryPolicy::default()
        };
        for _ in 0..200 {
            let d = policy.next_delay(1).as_secs_f64();
            assert!((0.8 - 1e-9..=1.2 + 1e-9).contains(&d), "{d}");
        }
        for _ in 0..200 {
            let d = policy.next_delay(20).as_secs_f64();
            assert!((4.0 - 1e-9..=6.0 + 1e-9).contains(&d), "{d}");
        }
    }

    #[test]
    fn defaults_validate_and_bad_policies_do_not() {
        assert!(RetryPolicy::default().validate().is_ok());
        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(zero.validate().is_err());
        let shrinking = RetryPolicy {
            multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert!(shrinking.validate().is_err());
        let inverted = RetryPolicy {
            base_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn serde_uses_milliseconds() {
        let json = serde_json::to_value(RetryPolicy::default()).unwrap();
        assert_eq!(json["base_delay"], 200);
        assert_eq!(json["max_delay"], 5000);
        let parsed: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 2}"#).unwrap();
        assert_eq!(parsed.max_attempts, 2);
        assert_eq!(parsed.base_delay, Duration::from_millis(200));
    }

    #[test]
    fn retries_only_temporary_errors() {
        let policy = fixed(1);

        let mut calls = 0;
        let out = retry(&policy, |_| {
            calls += 1;
            if calls < 3 {
                Err(SafeError::new(ErrorKind::NetworkTimeout))
            } else {
                Ok("done")
            }
        });
        assert_eq!(out.unwrap(), "done");
        assert_eq!(calls, 3);

        let mut calls = 0;
        let err = retry(&policy, |_| -> Result<(), _> {
            calls += 1;
            Err(SafeError::new(ErrorKind::AuthenticationFailure))
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
        assert_eq!(calls, 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..fixed(1)
        };
        let mut seen = Vec::new();
        let err = retry(&policy, |attempt| -> Result<(), _> {
            seen.push(attempt);
            Err(SafeError::new(ErrorKind::NetworkTimeout))
        })
        .unwrap_err();
        assert!(is_retryable(&err));
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn async_retry_recovers() {
        let policy = fixed(1);
        let mut calls = 0u32;
        let out = retry_async(&policy, |attempt| {
            calls += 1;
            async move {
                if attempt == 1 {
                    Err(SafeError::new(ErrorKind::NetworkTimeout))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls, 2);
    }
}
