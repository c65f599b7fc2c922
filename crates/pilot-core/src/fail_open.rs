//! Fail-open helpers for side channels of the step loop
//!
//! Activity logging and checkpoint autosave must never stop a task. These
//! helpers run such operations, log failures via `tracing::warn!` and hand back
//! `None` instead of an error.
//!
//! DO NOT use fail-open for:
//! - Action execution (goes through the Execution Supervisor)
//! - Decision parsing (counted against the failure budget)
//! - Perception (a step cannot proceed without a snapshot)

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// ```no_run
/// use pilot_core::fail_open::fail_open;
/// use pilot_core::Result;
///
/// async fn append_log_line() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("activity_log", || append_log_line()).await;
///     // written is None if the append failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Like [`fail_open`] but retries with a linearly growing delay
///
/// Attempt `n` waits `base_delay * n` before the next try.
pub async fn fail_open_with_retries<F, Fut, T>(
    operation_name: &str,
    mut f: F,
    max_attempts: usize,
    base_delay: Duration,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=max_attempts {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if attempt == max_attempts => {
                warn!(
                    "{} failed after {} attempts (fail-open): {}",
                    operation_name, max_attempts, e
                );
            }
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, e
                );
                tokio::time::sleep(base_delay * attempt as u32).await;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PilotError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, PilotError>(7) }).await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn test_fail_open_swallows_error() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(PilotError::Other("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "checkpoint_autosave",
            || {
                attempts += 1;
                let current = attempts;
                async move {
                    if current < 2 {
                        Err(PilotError::Other("transient".to_string()))
                    } else {
                        Ok(current)
                    }
                }
            },
            3,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(result, Some(2));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "checkpoint_autosave",
            || {
                attempts += 1;
                async { Err::<(), _>(PilotError::Other("persistent".to_string())) }
            },
            3,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(result, None);
        assert_eq!(attempts, 3);
    }
}
