//! Bounded retry for remote calls
//!
//! Delta paging and metadata lookups go through [`call_remote`], which
//! classifies every failure into a [`RemoteError`] and retries only the
//! [`RemoteError::Transient`] variant, with exponential backoff: 1s, 2s,
//! 4s, 8s, 16s. Every other variant returns to the caller for
//! variant-specific handling - cursor fallback, not-found convergence.
//!
//! File transfers never pass through here. A failed transfer marks its
//! record failed and the next session reclassifies it, so failures stay
//! visible instead of hiding behind retry loops.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::RemoteError;

/// Retries granted to a transient fault after its first attempt
const MAX_RETRIES: u32 = 5;

/// Base delay of the exponential backoff
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Run a remote call, retrying transient faults with exponential backoff
pub async fn call_remote<F, Fut, T>(operation: &str, f: F) -> Result<T, RemoteError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        let fault = match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempt, "remote call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => RemoteError::classify(err),
        };

        if !fault.is_transient() || attempt >= MAX_RETRIES {
            return Err(fault);
        }

        let delay = BASE_DELAY * 2u32.pow(attempt);
        warn!(
            operation,
            attempt,
            delay_secs = delay.as_secs(),
            fault = %fault,
            "transient remote fault, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
