//! Bounded retry for writes that lose a lock wait.

use std::future::Future;

use rota_core::{policy::Policy, store::StoreError};

/// Run `op`, retrying up to `policy.lock_retry_attempts` times while it fails
/// with lock contention. Retry `n` sleeps `n` backoff units first. Any other
/// error, or contention after the last retry, is returned as-is.
pub(crate) async fn with_lock_retry<T, E, Fut>(
  policy: &Policy,
  mut op: impl FnMut() -> Fut,
) -> Result<T, E>
where
  E: StoreError,
  Fut: Future<Output = Result<T, E>>,
{
  let mut attempt = 0;
  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_lock_contention() && attempt < policy.lock_retry_attempts => {
        attempt += 1;
        let delay = policy.lock_retry_delay(attempt);
        tracing::warn!(
          attempt,
          delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
          error = %e,
          "lock wait; retrying"
        );
        tokio::time::sleep(delay).await;
      }
      Err(e) => return Err(e),
    }
  }
}
