use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Maximum retries for `TransientIo`-class errors (§7).
pub const MAX_RETRIES: u32 = 3;
/// Base backoff: 100ms, doubling each attempt (100, 200, 400).
const BASE_DELAY_MS: u64 = 100;

/// Retry a fallible async operation up to [`MAX_RETRIES`] times with
/// `100ms * 2^n` backoff, surfacing the last error after exhaustion.
///
/// Generalised from `skynet_channels::manager::connect_with_backoff`'s
/// exponential-backoff shape; unlike that helper this one has a small
/// fixed retry budget rather than a connect-forever loop, matching the
/// "retry <=3x" policy for `TransientIO` in the error handling design.
pub async fn with_backoff<T, E, F, Fut>(label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay_ms = BASE_DELAY_MS;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt > MAX_RETRIES => return Err(e),
            Err(e) => {
                warn!(
                    label,
                    attempt,
                    max = MAX_RETRIES,
                    error = %e,
                    retry_after_ms = delay_ms,
                    "transient failure, retrying with backoff"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
        }
    }
}
