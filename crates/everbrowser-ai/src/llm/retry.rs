//! Transport-level retry for model requests.
//!
//! This retries one HTTP request. Turn-level retries, which keep partial
//! output, belong to the orchestrator.

use std::future::Future;
use std::time::Duration;

use reqwest::Response;

use crate::error::{AiError, Result};
use crate::text_utils::truncate_with_marker;

// Error bodies can be large or echo the request back
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct LlmRetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for LlmRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl LlmRetryConfig {
    /// Wait before retry number `attempt` (1-based). A server hint wins.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(seconds) = retry_after_secs {
            return Duration::from_secs(seconds);
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis((millis as u64).min(self.max_delay_ms))
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub(crate) async fn with_retry<T, F, Fut>(
    config: &LlmRetryConfig,
    provider: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && retries < config.max_retries => {
                retries += 1;
                let delay = config.delay_for(retries, error.retry_after());
                tracing::warn!(
                    provider,
                    attempt = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying model request"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Turn a non-success HTTP response into an error, keeping any Retry-After hint.
pub(crate) async fn error_from_response(response: Response, provider: &str) -> AiError {
    let status = response.status().as_u16();
    let retry_after_secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    AiError::LlmHttp {
        provider: provider.to_string(),
        status,
        message: truncate_with_marker(&body, MAX_ERROR_BODY),
        retry_after_secs,
    }
}
