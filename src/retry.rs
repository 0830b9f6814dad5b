//! Per-item retry with exponential backoff
//!
//! Every failed attempt is retried until the attempt budget is spent. The only state
//! carried between attempts is the [`RetryState`]; it is dropped when the item finishes.
//!
//! # Example
//!
//! ```no_run
//! use playlist_dl::config::RetryConfig;
//! use playlist_dl::retry::retry_attempts;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let result = retry_attempts(&config, &cancel, |_state| {}, |_attempt| async {
//!     Ok::<_, String>("fetched")
//! })
//! .await;
//! assert!(result.is_ok());
//! # }
//! ```

use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Ephemeral per-item retry bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far
    pub attempts_made: u32,
    /// Error message of the most recent failed attempt
    pub last_error: Option<String>,
}

/// Run `operation` until it succeeds or `config.max_attempts` attempts have failed
///
/// `operation` receives the 1-based attempt number. `on_retry` is called after each failed
/// attempt that will be followed by another one. Once `cancel` fires, no further attempt is
/// started; the attempt in flight is allowed to finish.
///
/// Returns the value with the number of attempts it took, or the final [`RetryState`].
pub async fn retry_attempts<F, Fut, T, E, R>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut on_retry: R,
    mut operation: F,
) -> Result<(T, u32), RetryState>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: FnMut(&RetryState),
{
    let max_attempts = config.max_attempts.max(1);
    let mut state = RetryState::default();
    let mut delay = config.initial_delay;

    loop {
        state.attempts_made += 1;

        match operation(state.attempts_made).await {
            Ok(value) => {
                if state.attempts_made > 1 {
                    tracing::info!(
                        attempts = state.attempts_made,
                        "Operation succeeded after retry"
                    );
                }
                return Ok((value, state.attempts_made));
            }
            Err(e) => {
                state.last_error = Some(e.to_string());

                if state.attempts_made >= max_attempts {
                    tracing::error!(
                        error = %e,
                        attempts = state.attempts_made,
                        "Operation failed after all attempts exhausted"
                    );
                    return Err(state);
                }

                if cancel.is_cancelled() {
                    tracing::warn!(
                        attempts = state.attempts_made,
                        "Batch cancelled, not retrying"
                    );
                    return Err(state);
                }

                tracing::warn!(
                    error = %e,
                    attempt = state.attempts_made,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Attempt failed, retrying"
                );
                on_retry(&state);

                let sleep_for = backoff_sleep(delay, config);
                if !sleep_for.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::warn!(
                                attempts = state.attempts_made,
                                "Batch cancelled during backoff"
                            );
                            return Err(state);
                        }
                        _ = tokio::time::sleep(sleep_for) => {}
                    }
                }

                delay = next_delay(delay, config);
            }
        }
    }
}

/// Time to sleep before the next attempt: `delay` with optional jitter, never above `max_delay`
fn backoff_sleep(delay: Duration, config: &RetryConfig) -> Duration {
    let delay = if config.jitter { add_jitter(delay) } else { delay };
    delay.min(config.max_delay)
}

/// Grow `delay` by the backoff multiplier, saturating at `max_delay`
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    scale(delay, config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// `delay * factor`, or `None` when the product is not a representable duration
fn scale(delay: Duration, factor: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).ok()
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    scale(delay, 1.0 + jitter_factor).unwrap_or(delay)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn success_on_first_attempt() {
        let config = RetryConfig::immediate(3);
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_attempts(&config, &CancellationToken::new(), |_| {}, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), (42, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let config = RetryConfig::immediate(3);
        let retries = Arc::new(AtomicU32::new(0));

        let result = retry_attempts(
            &config,
            &CancellationToken::new(),
            |_| {
                retries.fetch_add(1, Ordering::SeqCst);
            },
            |attempt| async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt} failed"))
                } else {
                    Ok("done")
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), ("done", 3));
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhaustion_makes_exactly_max_attempts() {
        let config = RetryConfig::immediate(4);
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_attempts(&config, &CancellationToken::new(), |_| {}, |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(format!("HTTP 403 on attempt {attempt}"))
            }
        })
        .await;

        let state = result.unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(state.attempts_made, 4);
        assert_eq!(state.last_error.as_deref(), Some("HTTP 403 on attempt 4"));
    }

    #[tokio::test]
    async fn single_attempt_budget_never_retries() {
        let config = RetryConfig::immediate(1);
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_attempts(&config, &CancellationToken::new(), |_| {}, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("nope")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_further_attempts() {
        let config = RetryConfig::immediate(5);
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_attempts(&config, &cancel, |_| {}, |_| {
            let counter = counter.clone();
            let cancel = cancel.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
                Err::<(), _>("interrupted")
            }
        })
        .await;

        let state = result.unwrap_err();
        assert_eq!(state.attempts_made, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_delays_increase() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        let start = Instant::now();
        let result = retry_attempts(&config, &CancellationToken::new(), |_| {}, |_| async {
            Err::<(), _>("transient")
        })
        .await;

        assert!(result.is_err());
        // 20ms before attempt 2, 40ms before attempt 3
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn max_delay_caps_backoff() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(15),
            backoff_multiplier: 10.0,
            jitter: false,
        };

        let start = Instant::now();
        let _ = retry_attempts(&config, &CancellationToken::new(), |_| {}, |_| async {
            Err::<(), _>("transient")
        })
        .await;

        // 10 + 15 + 15 without the cap would be 10 + 100 + 1000
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn huge_multiplier_saturates_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1e30,
            jitter: false,
        };
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_attempts(&config, &CancellationToken::new(), |_| {}, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("still failing")
            }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts_made, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn next_delay_never_exceeds_max_delay() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: f64::MAX,
            jitter: false,
        };

        let grown = next_delay(Duration::from_secs(20), &config);
        assert_eq!(grown, config.max_delay);
        assert_eq!(next_delay(config.max_delay, &config), config.max_delay);
    }

    #[test]
    fn jittered_sleep_is_capped_by_max_delay() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(120),
            backoff_multiplier: 2.0,
            jitter: true,
        };

        for _ in 0..1000 {
            let sleep_for = backoff_sleep(Duration::from_millis(100), &config);
            assert!(sleep_for >= Duration::from_millis(100));
            assert!(sleep_for <= config.max_delay);
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..1000 {
            let jittered = add_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= base * 2);
        }
    }

    #[test]
    fn jitter_on_zero_delay_is_zero() {
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }
}
