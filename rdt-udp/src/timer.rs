//! Retransmission timeout management.
//!
//! Reliable delivery requires that unacknowledged packets are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`TimeoutController`]: owns the current retransmission timeout (RTO)
//!   and the rolling window of RTT samples it is derived from.
//! - [`RetransmitTimer`]: a single start/stop stopwatch the sender arms
//!   while packets are outstanding.
//!
//! RTO is computed from the **lower median** of the most recent samples
//! rather than a smoothed mean:
//!   `RTO = multiplier × sorted(last N)[N / 2]`
//! Until N samples exist the RTO stays at its initial value, or at whatever
//! the handshake's exponential back-off left it at.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ProtocolConfig;

/// Adaptive RTO derived from a bounded window of RTT samples.
#[derive(Debug, Clone)]
pub struct TimeoutController {
    timeout: Duration,
    /// Most recent RTT samples in milliseconds, oldest at the front.
    samples: VecDeque<f64>,
    depth: usize,
    multiplier: u32,
}

impl Default for TimeoutController {
    fn default() -> Self {
        Self::from_config(&ProtocolConfig::default())
    }
}

impl TimeoutController {
    pub fn new(initial: Duration, depth: usize, multiplier: u32) -> Self {
        let depth = depth.max(1);
        Self {
            timeout: initial,
            samples: VecDeque::with_capacity(depth),
            depth,
            multiplier,
        }
    }

    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(
            config.initial_rto,
            config.rtt_sample_depth,
            config.rto_multiplier,
        )
    }

    /// Append an RTT sample, evicting the oldest once the window is full.
    ///
    /// Does not touch the RTO; call [`adjust`](Self::adjust) after a batch.
    pub fn record_sample(&mut self, rtt_ms: f64) {
        if self.samples.len() == self.depth {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
    }

    /// Recompute the RTO from the sample window.
    ///
    /// Returns `false` (leaving the RTO untouched) while fewer than `depth`
    /// samples have been recorded.
    pub fn adjust(&mut self) -> bool {
        if self.samples.len() < self.depth {
            return false;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let median_ms = sorted[self.depth / 2].max(0.0);
        self.timeout = Duration::from_secs_f64(f64::from(self.multiplier) * median_ms / 1000.0);
        log::debug!(
            "[rto] median RTT {median_ms:.3}ms -> timeout {:.3}s",
            self.timeout.as_secs_f64()
        );
        true
    }

    /// Double the RTO (handshake exponential back-off).
    pub fn back_off(&mut self) {
        self.timeout *= 2;
    }

    pub fn current_timeout(&self) -> Duration {
        self.timeout
    }

    /// RTT samples currently in the window, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

/// The sender's retransmission stopwatch.
///
/// One timer covers the whole window: it is (re)started when the window base
/// advances or after a retransmission round, and stopped when nothing is
/// outstanding.
#[derive(Debug, Default, Clone)]
pub struct RetransmitTimer {
    started: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        self.started = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// `true` when running and more than `rto` has elapsed since the last start.
    pub fn is_expired(&self, rto: Duration) -> bool {
        self.started.is_some_and(|t| t.elapsed() > rto)
    }

    /// Time left before expiry, `None` when stopped.
    pub fn remaining(&self, rto: Duration) -> Option<Duration> {
        self.started
            .map(|t| rto.saturating_sub(t.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_timeout_is_300ms() {
        let c = TimeoutController::default();
        assert_eq!(c.current_timeout(), Duration::from_millis(300));
    }

    #[test]
    fn median_of_ten_sets_timeout() {
        let mut c = TimeoutController::default();
        for rtt in [10.0, 12.0, 11.0, 13.0, 9.0, 15.0, 14.0, 8.0, 16.0, 17.0] {
            c.record_sample(rtt);
        }
        assert!(c.adjust());
        // sorted = [8..=17], index 5 = 13 -> 5 * 13 / 1000
        assert!((c.current_timeout().as_secs_f64() - 0.065).abs() < 1e-9);
    }

    #[test]
    fn fewer_than_ten_samples_leaves_timeout() {
        let mut c = TimeoutController::default();
        for _ in 0..9 {
            c.record_sample(1.0);
        }
        assert!(!c.adjust());
        assert_eq!(c.current_timeout(), Duration::from_millis(300));
    }

    #[test]
    fn window_keeps_only_latest_samples() {
        let mut c = TimeoutController::default();
        for rtt in 0..15 {
            c.record_sample(rtt as f64);
        }
        let kept: Vec<f64> = c.samples().collect();
        assert_eq!(kept.len(), 10);
        assert_eq!(kept[0], 5.0);
        assert_eq!(kept[9], 14.0);
    }

    #[test]
    fn single_outlier_does_not_move_median() {
        let mut c = TimeoutController::default();
        for _ in 0..9 {
            c.record_sample(20.0);
        }
        c.record_sample(5_000.0);
        c.adjust();
        assert_eq!(c.current_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn back_off_doubles() {
        let mut c = TimeoutController::default();
        let mut seen = vec![c.current_timeout()];
        for _ in 0..4 {
            c.back_off();
            seen.push(c.current_timeout());
        }
        let ms: Vec<u128> = seen.iter().map(|d| d.as_millis()).collect();
        assert_eq!(ms, vec![300, 600, 1200, 2400, 4800]);
    }

    #[test]
    fn back_off_value_survives_until_ten_samples() {
        let mut c = TimeoutController::default();
        c.back_off();
        c.record_sample(1.0);
        c.adjust();
        assert_eq!(c.current_timeout(), Duration::from_millis(600));
    }

    #[test]
    fn stopped_timer_never_expires() {
        let t = RetransmitTimer::new();
        assert!(!t.is_running());
        assert!(!t.is_expired(Duration::ZERO));
        assert_eq!(t.remaining(Duration::from_secs(1)), None);
    }

    #[tokio::test]
    async fn running_timer_expires_after_rto() {
        let mut t = RetransmitTimer::new();
        t.start();
        assert!(!t.is_expired(Duration::from_secs(10)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(t.is_expired(Duration::from_millis(5)));
        t.stop();
        assert!(!t.is_expired(Duration::from_millis(5)));
    }
}
