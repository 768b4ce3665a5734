//! Retry with exponential backoff for external API calls.

use crate::error::{Result, VitenError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Substrings whose presence in an error's textual form marks it transient.
const RETRYABLE_MARKERS: &[&str] = &["429", "503", "500", "timeout", "connection"];

/// Whether an error is worth retrying.
pub fn is_retryable(error: &VitenError) -> bool {
    let text = error.to_string().to_lowercase();
    RETRYABLE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Run `operation`, retrying transient failures up to `max_retries` times.
///
/// Between attempts the delay is `base_delay * 2^attempt` plus up to one
/// second of jitter. Non-retryable errors propagate unchanged; an
/// exhausted budget surfaces as [`VitenError::MediaProcessing`] carrying
/// the final cause.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if !is_retryable(&error) => return Err(error),
            Err(error) if attempt >= max_retries => {
                return Err(VitenError::MediaProcessing(format!(
                    "retry budget exhausted after {} attempts: {}",
                    attempt + 1,
                    error
                )));
            }
            Err(error) => {
                let delay = base_delay.mul_f64(2f64.powi(attempt as i32))
                    + Duration::from_secs_f64(jitter());
                warn!(
                    "Transient failure (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    max_retries + 1,
                    delay,
                    error
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Uniform-ish jitter in [0, 1) seconds, derived from the clock.
fn jitter() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| f64::from(d.subsec_nanos()) / 1e9)
        .unwrap_or(0.0)
}
