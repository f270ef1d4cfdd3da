//! Exponentially decaying peer availability statistics.
//!
//! Each polling window accumulates how many polls we issued to a peer and
//! how many it answered. [`AvailabilityStats::update`] consumes the window
//! and folds its net response into an exponential moving average, so the
//! score tracks recent responsiveness and forgets old behavior with time
//! constant tau. A fully responsive peer converges toward 1.0; a silent
//! peer drifts below zero, since unanswered polls count against it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use portable_atomic::AtomicF64;

/// How often the scheduler is expected to call [`AvailabilityStats::update`].
pub const STATISTICS_REFRESH_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Time constant of the moving average.
pub const STATISTICS_TIME_CONSTANT: Duration = Duration::from_secs(10 * 60);

/// Per-update weight `1 - e^(-step/tau)` for a refresh period of `step`
/// seconds and a time constant of `tau` seconds.
///
/// Smaller `step/tau` ratios yield smaller factors and a slower-responding
/// average. Applying the factor every `step` seconds to a fully responsive
/// peer brings the score to `1 - e^(-k)` after `k * tau` seconds.
pub fn decay_factor(step: Duration, tau: Duration) -> f64 {
    -(-step.as_secs_f64() / tau.as_secs_f64()).exp_m1()
}

/// Poll/vote window counters and the decayed availability score.
///
/// The window counters are packed into a single `AtomicU64` (polls in the
/// low half, votes in the high half) so that `update` can consume and reset
/// the whole window with one `swap`. All operations are lock-free; readers
/// never observe a half-consumed window.
#[derive(Debug)]
pub struct AvailabilityStats {
    /// Packed window: low 32 bits polls issued, high 32 bits polls answered.
    window: AtomicU64,
    score: AtomicF64,
}

impl AvailabilityStats {
    pub fn new() -> Self {
        Self {
            window: AtomicU64::new(0),
            score: AtomicF64::new(0.0),
        }
    }

    /// Records `count` polls issued to the peer in the current window.
    pub fn record_polled(&self, count: u32) {
        self.window.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    /// Records `count` polls the peer answered in the current window.
    pub fn record_voted(&self, count: u32) {
        self.window.fetch_add(u64::from(count) << 32, Ordering::Relaxed);
    }

    /// Consumes the current window and folds it into the score.
    ///
    /// The window's net response is `answered - unanswered`; an empty
    /// window contributes 0. The score moves toward the net response by
    /// `decay_factor`, which callers derive via [`decay_factor`] from their
    /// refresh cadence.
    pub fn update(&self, decay_factor: f64) {
        let window = self.window.swap(0, Ordering::Relaxed);
        let polled = (window & u64::from(u32::MAX)) as i64;
        let voted = (window >> 32) as i64;

        let previous = self.score.load(Ordering::Relaxed);
        let response = (2 * voted - polled) as f64;
        self.score.store(
            decay_factor * response + (1.0 - decay_factor) * previous,
            Ordering::Relaxed,
        );
    }

    /// Current availability score, in `(-inf, 1.0]` under sane polling.
    pub fn score(&self) -> f64 {
        self.score.load(Ordering::Relaxed)
    }
}

impl Default for AvailabilityStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_factor_shape() {
        let d = decay_factor(STATISTICS_REFRESH_PERIOD, STATISTICS_TIME_CONSTANT);
        assert!(d > 0.0 && d < 1.0);
        assert!((d - (1.0 - (-1.0f64).exp())).abs() < 1e-12);

        // A faster cadence relative to tau responds more slowly per update.
        let slow = decay_factor(Duration::from_secs(1), Duration::from_secs(600));
        let fast = decay_factor(Duration::from_secs(60), Duration::from_secs(600));
        assert!(slow < fast);
    }

    #[test]
    fn score_follows_exponential_response() {
        let step = STATISTICS_REFRESH_PERIOD.as_secs() as u32;
        let tau = STATISTICS_TIME_CONSTANT.as_secs() as u32;
        let d = decay_factor(STATISTICS_REFRESH_PERIOD, STATISTICS_TIME_CONSTANT);

        let stats = AvailabilityStats::new();
        let mut previous = stats.score();
        assert!(previous.abs() < 1e-6);

        // Answering every poll rises toward 1 - e^(-i) after i * tau,
        // monotonically. Tolerance matches a 0.1% relative margin.
        for i in 1..=10u32 {
            let mut elapsed = 0;
            while elapsed < tau {
                stats.record_polled(1);
                stats.record_voted(1);
                stats.update(d);

                let current = stats.score();
                assert!(current >= previous);
                previous = current;
                elapsed += step;
            }

            let expected = -(-f64::from(i)).exp_m1();
            assert!(((previous - expected) / expected).abs() < 1e-3);
        }

        // After 10 tau the score is within 0.01% of full availability.
        assert!((previous - 1.0).abs() < 1e-4);

        // Answering half the polls nets zero, decaying toward e^(-i).
        for i in 1..=3u32 {
            let mut elapsed = 0;
            while elapsed < tau {
                stats.record_polled(2);
                stats.record_voted(1);
                stats.update(d);

                let current = stats.score();
                assert!(current <= previous);
                previous = current;
                elapsed += step;
            }

            let expected = (-f64::from(i)).exp();
            assert!(((previous - expected) / expected).abs() < 2e-3);
        }

        assert!(previous < 0.05);
    }

    #[test]
    fn unanswered_polls_drive_the_score_negative() {
        let d = decay_factor(STATISTICS_REFRESH_PERIOD, STATISTICS_TIME_CONSTANT);
        let stats = AvailabilityStats::new();

        stats.record_polled(1);
        stats.record_voted(1);
        stats.update(d);
        let mut previous = stats.score();
        assert!(previous > 0.0);

        // A peer that stops answering falls strictly each update and ends
        // up below zero.
        for _ in 0..10 {
            stats.record_polled(1);
            stats.update(d);
            let current = stats.score();
            assert!(current < previous);
            previous = current;
        }
        assert!(previous < 0.0);
    }

    #[test]
    fn empty_window_decays_toward_zero() {
        let d = decay_factor(STATISTICS_REFRESH_PERIOD, STATISTICS_TIME_CONSTANT);
        let stats = AvailabilityStats::new();

        stats.record_polled(1);
        stats.record_voted(1);
        stats.update(d);
        let after_vote = stats.score();

        // 0 polled / 0 voted counts as a zero response, not a no-op.
        stats.update(d);
        let after_idle = stats.score();
        assert!(after_idle < after_vote);
        assert!(after_idle > 0.0);
    }

    #[test]
    fn update_consumes_the_window() {
        let stats = AvailabilityStats::new();
        stats.record_polled(3);
        stats.record_voted(3);
        stats.update(1.0);
        assert!((stats.score() - 3.0).abs() < 1e-12);

        // Counters were reset; a second update sees an empty window.
        stats.update(1.0);
        assert!(stats.score().abs() < 1e-12);
    }
}
