//! HTTP transport with retry and exponential backoff.

use crate::cancel::CancellationToken;
use crate::error::{Result, StatError};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn should_retry_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }
}

/// `reqwest` client that retries transient failures.
///
/// Connection errors, timeouts, 429 and 5xx are retried; anything else is
/// handed back to the caller on the first attempt. Waiting and in-flight
/// requests abort as soon as the run is cancelled.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Sends the request built by `build`, which is invoked once per attempt.
    pub async fn send<F>(&self, build: F, cancel: &CancellationToken) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_err = StatError::Transport("no attempt made".to_string());

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt - 1);
                debug!("retry attempt {}/{} after {:?}: {}", attempt + 1, attempts, delay, last_err);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(StatError::Cancelled),
                }
            }
            cancel.check()?;

            let outcome = tokio::select! {
                outcome = build(&self.client).send() => outcome,
                _ = cancel.cancelled() => return Err(StatError::Cancelled),
            };

            match outcome {
                Ok(response) if RetryPolicy::should_retry_status(response.status()) => {
                    last_err = StatError::Remote {
                        status: response.status().as_u16(),
                        url: response.url().to_string(),
                        message: "transient status".to_string(),
                    };
                }
                Ok(response) => return Ok(response),
                Err(err) if err.is_connect() || err.is_timeout() || err.is_request() => {
                    last_err = err.into();
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(last_err)
    }
}
