//! Retry policies for subgraph fetches.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, FetchError};

fn default_multiplier() -> f64 {
    2.0
}

/// What to do when a subgraph fetch fails with a transport error or timeout.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "camelCase")]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,
    /// Retry up to `retries` times, waiting `delay_ms` between attempts.
    #[serde(rename_all = "camelCase")]
    Fixed { retries: u32, delay_ms: u64 },
    /// Retry up to `max_retries` times with a growing delay.
    #[serde(rename_all = "camelCase")]
    ExponentialBackoff {
        max_retries: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
}

impl RetryPolicy {
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { retries, .. } => *retries,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Delay before retry number `attempt` (0 for the first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { delay_ms, .. } => Duration::from_millis(*delay_ms),
            RetryPolicy::ExponentialBackoff {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
                ..
            } => {
                let millis = *initial_delay_ms as f64 * multiplier.powi(attempt as i32);
                Duration::from_millis(millis.min(*max_delay_ms as f64) as u64)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            RetryPolicy::ExponentialBackoff {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
                ..
            } => {
                if *multiplier < 1.0 {
                    return Err(ConfigError::Invalid("retry multiplier must be at least 1".to_string()));
                }
                if initial_delay_ms > max_delay_ms {
                    return Err(ConfigError::Invalid(
                        "retry initialDelayMs must not exceed maxDelayMs".to_string(),
                    ));
                }
                Ok(())
            }
            RetryPolicy::None | RetryPolicy::Fixed { .. } => Ok(()),
        }
    }

    /// Run `operation`, retrying retryable failures according to the policy.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) if error.is_retryable() && attempt < self.max_retries() => {
                    let delay = self.delay(attempt);
                    tracing::debug!(
                        service = error.service(),
                        attempt = attempt + 1,
                        ?delay,
                        %error,
                        "retrying subgraph fetch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transport() -> FetchError {
        FetchError::Transport {
            service: "users".to_string(),
            reason: "connection refused".to_string(),
            status: None,
        }
    }

    #[test]
    fn exponential_delay_is_capped() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 500,
            multiplier: 2.0,
        };
        let delays: Vec<_> = (0..4).map(|attempt| policy.delay(attempt).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500]);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_policy_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::Fixed {
            retries: 2,
            delay_ms: 10,
        };

        let result = policy
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transport())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn none_policy_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::None
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transport())
            })
            .await;

        assert_eq!(result, Err(transport()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_responses_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::Fixed {
            retries: 3,
            delay_ms: 0,
        };
        let result: Result<(), _> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::MalformedResponse {
                    service: "users".to_string(),
                    reason: "not json".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
