//! Continuous mode: run a sweep, pause for a jittered delay, repeat.

use crate::jitter::{sample_delay, sleep_cancellable};
use chrono::Utc;
use railsweep_core::{DelayRange, Timestamp};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Timestamp for `now + delay`.
#[must_use]
pub fn next_run_timestamp(delay: Duration) -> Timestamp {
    let delta = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    Timestamp::from(Utc::now() + delta)
}

/// Run `sweep` repeatedly until `cancel` fires, sleeping a random delay from
/// `between` after each run. Returns the number of sweeps started.
///
/// Cancellation is observed before each sweep and during the pause; an
/// in-flight sweep is expected to observe the same token itself.
pub async fn run_loop<F, Fut>(between: DelayRange, cancel: CancellationToken, mut sweep: F) -> u64
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut runs = 0;

    tracing::info!("Entering loop mode");
    while !cancel.is_cancelled() {
        sweep(runs).await;
        runs += 1;

        if cancel.is_cancelled() {
            break;
        }

        let delay = sample_delay(&between, &mut rand::thread_rng());
        tracing::info!(
            "Sleeping {:.1}s before next sweep (at {})",
            delay.as_secs_f64(),
            next_run_timestamp(delay)
        );

        if !sleep_cancellable(delay, &cancel).await {
            break;
        }
    }

    tracing::info!("Loop stopped after {} sweep(s)", runs);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_next_run_is_in_future() {
        let now = Timestamp::now();
        let next = next_run_timestamp(Duration::from_secs(30));
        assert!(next > now);
        assert!(next.epoch_millis() - now.epoch_millis() >= 29_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_until_cancelled() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU64::new(0));

        let token = cancel.clone();
        let seen = counter.clone();
        let runs = run_loop(
            DelayRange {
                min_ms: 30_000,
                max_ms: 90_000,
            },
            cancel,
            move |n| {
                let token = token.clone();
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if n == 2 {
                        token.cancel();
                    }
                }
            },
        )
        .await;

        assert_eq!(runs, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_loop_not_started_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runs = run_loop(DelayRange::ZERO, cancel, |_| async {}).await;
        assert_eq!(runs, 0);
    }
}
