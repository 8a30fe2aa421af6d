//! Randomized delays between requests and between sweeps.

use rand::Rng;
use railsweep_core::DelayRange;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sample a delay uniformly from `range` (inclusive).
pub fn sample_delay<R: Rng + ?Sized>(range: &DelayRange, rng: &mut R) -> Duration {
    if range.min_ms >= range.max_ms {
        return range.min();
    }
    Duration::from_millis(rng.gen_range(range.min_ms..=range.max_ms))
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `true` if the full delay elapsed, `false` if cancelled.
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancel.cancelled() => false,
    }
}

/// Polite pause between consecutive requests to the remote service.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    range: DelayRange,
}

impl Pacer {
    /// Create a pacer over `range`.
    #[must_use]
    pub fn new(range: DelayRange) -> Self {
        Self { range }
    }

    /// A pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(DelayRange::ZERO)
    }

    /// Configured range.
    #[must_use]
    pub fn range(&self) -> DelayRange {
        self.range
    }

    /// Sample the next delay.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        sample_delay(&self.range, &mut rand::thread_rng())
    }

    /// Sleep for a sampled delay. Returns `false` if cancelled during the pause.
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tracing::trace!("Pacing for {:?}", delay);
        }
        sleep_cancellable(delay, cancel).await
    }
}
