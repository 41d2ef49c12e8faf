// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Reconnect backoff of a single worker.
//!
//! Consecutive setup failures (dial, channel, declarations, binding, qos,
//! consume) grow the wait additively by the base interval, up to an optional
//! cap. Reaching the consuming state resets the accumulated wait, and a
//! delivery stream that closes after consuming started is retried at once.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Option<Duration>,
    carried: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Option<Duration>) -> Self {
        Backoff {
            base,
            max,
            carried: Duration::ZERO,
        }
    }

    /// Wait before retrying after a failed setup attempt.
    pub fn on_setup_failure(&mut self) -> Duration {
        let next = self.carried.saturating_add(self.base);
        self.carried = match self.max {
            Some(max) => next.min(max),
            None => next,
        };
        self.carried
    }

    /// The worker reached the consuming state.
    pub fn on_consuming(&mut self) {
        self.carried = Duration::ZERO;
    }

    /// Wait before reconnecting after the delivery stream closed.
    pub fn on_stream_closed(&mut self) -> Duration {
        self.carried = Duration::ZERO;
        Duration::ZERO
    }

    /// Accumulated wait carried into the next setup failure.
    pub fn carried(&self) -> Duration {
        self.carried
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(10);

    #[test]
    fn setup_failures_grow_additively() {
        let mut backoff = Backoff::new(BASE, None);

        let waits: Vec<Duration> = (0..3).map(|_| backoff.on_setup_failure()).collect();

        assert_eq!(
            waits,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(30)
            ]
        );
    }

    #[test]
    fn growth_is_capped() {
        let mut backoff = Backoff::new(BASE, Some(Duration::from_secs(25)));

        backoff.on_setup_failure();
        backoff.on_setup_failure();

        assert_eq!(backoff.on_setup_failure(), Duration::from_secs(25));
        assert_eq!(backoff.on_setup_failure(), Duration::from_secs(25));
    }

    #[test]
    fn consuming_resets_accumulated_wait() {
        let mut backoff = Backoff::new(BASE, None);
        backoff.on_setup_failure();
        backoff.on_setup_failure();

        backoff.on_consuming();

        assert_eq!(backoff.carried(), Duration::ZERO);
        assert_eq!(backoff.on_setup_failure(), BASE);
    }

    #[test]
    fn stream_closure_retries_immediately() {
        let mut backoff = Backoff::new(BASE, None);
        backoff.on_setup_failure();

        assert_eq!(backoff.on_stream_closed(), Duration::ZERO);
        assert_eq!(backoff.on_setup_failure(), BASE);
    }

    #[test]
    fn zero_base_never_waits() {
        let mut backoff = Backoff::new(Duration::ZERO, None);
        assert_eq!(backoff.on_setup_failure(), Duration::ZERO);
    }
}
