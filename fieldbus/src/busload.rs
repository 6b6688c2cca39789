//! Bus utilization estimator.
//!
//! A ring of per-interval bit counters covering the configured sample
//! window. Received and successfully transmitted frames both feed the
//! accumulator; once per update interval the accumulator is pushed into
//! the ring and the oldest sample falls out.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::NetworkConfig;

/// ISO 11783 fixes the bus bitrate at 250 kbit/s.
const BUS_BITRATE_BPS: f32 = 250_000.0;

pub(crate) struct BusloadEstimator {
    update_interval: Duration,
    max_samples: usize,
    accumulator: u32,
    history: VecDeque<u32>,
    last_push: Instant,
}

impl BusloadEstimator {
    pub(crate) fn new(config: &NetworkConfig, now: Instant) -> BusloadEstimator {
        let max_samples = (config.busload_sample_window.as_millis()
            / config.busload_update_interval.as_millis().max(1))
        .max(1) as usize;
        BusloadEstimator {
            update_interval: config.busload_update_interval,
            max_samples,
            accumulator: 0,
            history: VecDeque::with_capacity(max_samples),
            last_push: now,
        }
    }

    /// Count bits that crossed the wire.
    pub(crate) fn accumulate(&mut self, bits: u32) {
        self.accumulator = self.accumulator.saturating_add(bits);
    }

    /// Push the accumulator into the ring once the update interval elapsed.
    pub(crate) fn update(&mut self, now: Instant) {
        if now.duration_since(self.last_push) < self.update_interval {
            return;
        }
        self.history.push_back(self.accumulator);
        while self.history.len() > self.max_samples {
            self.history.pop_front();
        }
        self.accumulator = 0;
        self.last_push = now;
    }

    /// Estimated busload in percent over the currently held samples.
    pub(crate) fn estimated_percent(&self) -> f32 {
        let window_seconds =
            self.history.len() as f32 * self.update_interval.as_secs_f32();
        if window_seconds == 0.0 {
            return 0.0;
        }
        let total_bits: u32 = self.history.iter().sum();
        total_bits as f32 / (window_seconds * BUS_BITRATE_BPS) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> (BusloadEstimator, Instant) {
        let now = Instant::now();
        (BusloadEstimator::new(&NetworkConfig::default(), now), now)
    }

    #[test]
    fn empty_history_reports_zero() {
        let (estimator, _) = estimator();
        assert_eq!(estimator.estimated_percent(), 0.0);
    }

    #[test]
    fn known_traffic_reports_expected_load() {
        // 100 frames per second of 8-byte payloads for the full 10 s
        // window. Each frame is 47 + 64 + 24 = 135 bits on the wire.
        let (mut estimator, now) = estimator();
        let frame_bits = 135u32;
        for i in 1..=100 {
            // 10 frames per 100 ms interval.
            estimator.accumulate(frame_bits * 10);
            estimator.update(now + Duration::from_millis(100 * i));
        }
        let expected = (frame_bits * 1000) as f32 / (10.0 * BUS_BITRATE_BPS) * 100.0;
        let reported = estimator.estimated_percent();
        assert!(
            (reported - expected).abs() <= expected * 0.02,
            "reported {reported}, expected {expected}"
        );
    }

    #[test]
    fn ring_drops_oldest_samples() {
        let (mut estimator, now) = estimator();
        // Fill the window with traffic, then push empty intervals through;
        // the estimate must decay to zero.
        for i in 1..=100 {
            estimator.accumulate(10_000);
            estimator.update(now + Duration::from_millis(100 * i));
        }
        assert!(estimator.estimated_percent() > 0.0);
        for i in 101..=200 {
            estimator.update(now + Duration::from_millis(100 * i));
        }
        assert_eq!(estimator.estimated_percent(), 0.0);
    }
}
