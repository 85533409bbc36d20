use crate::{LocatorConfig, LocatorError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound of a single backoff sleep.
const MAX_BACKOFF_MS: u64 = 10_000;

/// Bounded exponential backoff policy for outbound HTTP calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// total number of attempts, including the first one
    pub max_retries: u32,
    /// backoff before the second attempt, doubled for every further attempt
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LocatorConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries.max(1),
            backoff_ms: config.backoff_ms,
        }
    }

    /// Sleep duration after the given (zero-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
    }

    /// Worst-case time to exhaust every attempt when each one may take up to `per_attempt`,
    /// including the backoff sleeps in between.
    pub fn budget(&self, per_attempt: Duration) -> Duration {
        let attempts = self.max_retries.max(1);
        let sleeps: Duration = (0..attempts - 1).map(|attempt| self.backoff(attempt)).sum();
        per_attempt.saturating_mul(attempts).saturating_add(sleeps)
    }
}

/// Send a request with retry logic and exponential backoff.
///
/// `send` is invoked once per attempt. Non-success statuses are turned into
/// [LocatorError::HttpStatus]; only errors for which [LocatorError::is_retryable] holds
/// are attempted again, anything else is returned right away.
pub(crate) async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut send: F,
) -> Result<reqwest::Response, LocatorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut last_error: Option<LocatorError> = None;

    for attempt in 0..policy.max_retries {
        let error = match send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => LocatorError::HttpStatus {
                url: response.url().to_string(),
                status: response.status().as_u16(),
            },
            Err(e) => LocatorError::from(e),
        };

        if !error.is_retryable() {
            debug!("{} failed with non-retryable error: {}", what, error);
            return Err(error);
        }

        if attempt + 1 < policy.max_retries {
            let backoff = policy.backoff(attempt);
            warn!(
                "{} failed (attempt {}/{}), retrying in {}ms: {}",
                what,
                attempt + 1,
                policy.max_retries,
                backoff.as_millis(),
                error
            );
            tokio::time::sleep(backoff).await;
        }
        last_error = Some(error);
    }

    debug!("{} failed after {} attempts", what, policy.max_retries);
    Err(last_error.unwrap_or_else(|| {
        LocatorError::Timeout(format!(
            "{} failed after {} attempts",
            what, policy.max_retries
        ))
    }))
}

/// Fetch the body of a URL as text, with retries.
pub(crate) async fn fetch_body(
    client: &reqwest::Client,
    url: &str,
    policy: &RetryPolicy,
) -> Result<String, LocatorError> {
    let response = send_with_retry(policy, url, || client.get(url).send()).await?;
    Ok(response.text().await?)
}

/// Remove trailing slash from a string.
pub(crate) fn remove_trailing_slash(s: impl ToString) -> String {
    let mut s = s.to_string();
    if s.ends_with('/') {
        s.pop();
    }
    s
}
