//! Bounded retries for outbound HTTP calls.

use std::future::Future;

use super::*;

/// Delay before the first retry; doubled for each later attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Runs `call` until it succeeds, fails permanently, or `retries` extra attempts are used up.
///
/// Only errors for which [`MillError::is_transient`] holds are retried. `label` names the call
/// in log lines.
pub async fn with_backoff<T, F, Fut>(label: &str, retries: u32, mut call: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>, {
  let mut delay = INITIAL_BACKOFF;
  let mut attempt = 0;
  loop {
    match call().await {
      Ok(value) => return Ok(value),
      Err(e) if attempt < retries && e.is_transient() => {
        attempt += 1;
        warn!("{label} failed ({e}), retry {attempt}/{retries} in {delay:?}");
        tokio::time::sleep(delay).await;
        delay *= 2;
      },
      Err(e) => return Err(e),
    }
  }
}

/// Builds an HTTP client with a total request timeout.
pub fn client(timeout: Duration) -> Result<reqwest::Client> {
  Ok(
    reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("papermill/", env!("CARGO_PKG_VERSION")))
      .build()?,
  )
}
