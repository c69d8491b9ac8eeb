//! JSON POSTs to model services, with retry.
//!
//! Used by the chat client and the remote embedding providers. Course API
//! and object store calls do not go through here: those are never retried.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use reqwest::{RequestBuilder, StatusCode};
use tracing::warn;

/// Send the request built by `request` until it succeeds or `max_retries`
/// retries are used up, and decode the JSON body.
///
/// `request` is called once per attempt. `service` names the remote side
/// in errors and logs.
pub async fn post_json_with_retry<F>(
    service: &str,
    max_retries: u32,
    request: F,
) -> Result<serde_json::Value>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff(attempt)).await;
        }

        let response = match request().send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(service, attempt, error = %e, "request failed");
                last_err = Some(anyhow!("{} unreachable: {}", service, e));
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        if !is_retryable(status) {
            bail!("{} error {}: {}", service, status, body);
        }
        warn!(service, attempt, %status, "retryable error");
        last_err = Some(anyhow!("{} error {}: {}", service, status, body));
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} failed after {} retries", service, max_retries)))
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
