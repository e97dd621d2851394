use crate::types::{DEFAULT_RECONNECT_FALLBACK, TRANSPORT_RECONNECT_INTERVALS};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Delay policy shared by every retry loop in the crate.
pub trait BackoffStrategy: Send {
    /// Delay before the next attempt; advances the attempt counter.
    fn next_delay(&mut self) -> Duration;

    /// Called after a successful attempt.
    fn reset(&mut self);
}

/// Stepped delay table: walks the table, then repeats its last entry forever.
///
/// This is the transport's own retry policy (bounded per-attempt delay).
pub struct SteppedDelay {
    attempts: u32,
    intervals: Vec<u64>,
}

impl SteppedDelay {
    pub fn new(intervals: Vec<u64>) -> Self {
        Self {
            attempts: 0,
            intervals,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl BackoffStrategy for SteppedDelay {
    fn next_delay(&mut self) -> Duration {
        let delay = self
            .intervals
            .get(self.attempts as usize)
            .or_else(|| self.intervals.last())
            .copied()
            .unwrap_or(DEFAULT_RECONNECT_FALLBACK);

        self.attempts = self.attempts.saturating_add(1);
        Duration::from_millis(delay)
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for SteppedDelay {
    fn default() -> Self {
        Self::new(TRANSPORT_RECONNECT_INTERVALS.to_vec())
    }
}

/// Constant delay, used by the reconnection supervisor.
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffStrategy for FixedDelay {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}
}

/// Sleeps for the strategy's next delay unless `cancel` fires first.
///
/// Returns false when cancelled.
pub async fn backoff_sleep(strategy: &mut dyn BackoffStrategy, cancel: &CancellationToken) -> bool {
    let delay = strategy.next_delay();
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stepped_delay_walks_table_then_repeats_last() {
        let mut timer = SteppedDelay::default();
        let delays: Vec<u64> = (0..6).map(|_| timer.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 5000, 10000, 10000, 10000]);
        assert_eq!(timer.attempts(), 6);

        timer.reset();
        assert_eq!(timer.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_stepped_delay_empty_table_uses_fallback() {
        let mut timer = SteppedDelay::new(Vec::new());
        assert_eq!(timer.next_delay(), Duration::from_millis(DEFAULT_RECONNECT_FALLBACK));
    }

    #[test]
    fn test_fixed_delay_never_grows() {
        let mut fixed = FixedDelay::new(Duration::from_secs(5));
        for _ in 0..10 {
            assert_eq!(fixed.next_delay(), Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleep_is_cancellable() {
        let token = CancellationToken::new();
        token.cancel();
        let mut fixed = FixedDelay::new(Duration::from_secs(3600));
        assert!(!backoff_sleep(&mut fixed, &token).await);

        let live = CancellationToken::new();
        assert!(backoff_sleep(&mut fixed, &live).await);
    }
}
