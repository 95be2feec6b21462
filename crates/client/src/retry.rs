//! Bounded retry with exponential backoff
//!
//! One policy object parameterizes every write/transaction site; the
//! retry contract lives here instead of scattered timers.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Retry policy: a small fixed attempt count with doubling backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
        }
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// Only transient store failures are retried; every other error
    /// surfaces immediately.
    pub async fn run<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.base_delay;
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(Error::Store(e)) if attempt < self.max_attempts => {
                    warn!(what, attempt, error = %e, "transient store error, backing off");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(Error::Store(e)) => {
                    warn!(what, attempts = self.max_attempts, error = %e, "retry budget exhausted");
                    return Err(Error::RetriesExhausted {
                        what,
                        attempts: self.max_attempts,
                    });
                }
                Err(other) => return Err(other),
            }
        }
        Err(Error::RetriesExhausted {
            what,
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let policy = quick_policy();
        let result: Result<u32> = policy.run("op", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let policy = quick_policy();
        let calls = AtomicU32::new(0);
        let result = policy
            .run("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::Store(deckroom_store::Error::Unavailable(
                            "blip".to_string(),
                        )))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let policy = quick_policy();
        let result: Result<()> = policy
            .run("doomed", || async {
                Err(Error::Store(deckroom_store::Error::Unavailable(
                    "down".to_string(),
                )))
            })
            .await;
        match result {
            Err(Error::RetriesExhausted { what, attempts }) => {
                assert_eq!(what, "doomed");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_domain_errors_not_retried() {
        let policy = quick_policy();
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::NotJoined) }
            })
            .await;
        assert!(matches!(result, Err(Error::NotJoined)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
