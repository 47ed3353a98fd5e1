//! Percentage-based downgrade decisions
//!
//! Decides, once per root entry, whether a trace is collected in full or
//! downgraded to endpoint-only collection. The decision is a rolling counter
//! rather than a random draw: with a ratio of 25, exactly 25 of every 100
//! consecutive roots are downgraded.
//!
//! | Ratio | Behavior |
//! |-------|----------|
//! | 0     | never downgrade (default) |
//! | 1-99  | `counter % 100 < ratio` |
//! | 100   | always downgrade |

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Rolling-counter ratio tracker shared across contexts
#[derive(Debug, Default)]
pub struct RatioTracker {
    ratio: AtomicU8,
    counter: AtomicU64,
    downgraded: AtomicU64,
}

impl RatioTracker {
    /// Create a tracker with `ratio` percent (clamped to 100)
    pub fn new(ratio: u8) -> Self {
        Self {
            ratio: AtomicU8::new(ratio.min(100)),
            counter: AtomicU64::new(0),
            downgraded: AtomicU64::new(0),
        }
    }

    pub fn ratio(&self) -> u8 {
        self.ratio.load(Ordering::Relaxed)
    }

    /// Change the percentage; the counter keeps running
    pub fn set_ratio(&mut self, ratio: u8) {
        *self.ratio.get_mut() = ratio.min(100);
    }

    /// Same as [`RatioTracker::set_ratio`] through a shared reference
    pub fn store_ratio(&self, ratio: u8) {
        self.ratio.store(ratio.min(100), Ordering::Relaxed);
    }

    /// Advance the counter and decide for one root
    pub fn should_downgrade(&self) -> bool {
        let ratio = self.ratio() as u64;
        if ratio == 0 {
            return false;
        }
        let tick = self.counter.fetch_add(1, Ordering::Relaxed);
        let downgrade = tick % 100 < ratio;
        if downgrade {
            self.downgraded.fetch_add(1, Ordering::Relaxed);
        }
        downgrade
    }

    /// Roots decided so far (ratio 0 decisions are not counted)
    pub fn decisions(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn downgraded(&self) -> u64 {
        self.downgraded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ratio_never_downgrades() {
        let tracker = RatioTracker::new(0);
        assert!((0..500).all(|_| !tracker.should_downgrade()));
        assert_eq!(tracker.decisions(), 0);
    }

    #[test]
    fn test_full_ratio_always_downgrades() {
        let tracker = RatioTracker::new(100);
        assert!((0..500).all(|_| tracker.should_downgrade()));
    }

    #[test]
    fn test_exact_share_per_hundred() {
        let tracker = RatioTracker::new(25);
        let hits = (0..400).filter(|_| tracker.should_downgrade()).count();
        assert_eq!(hits, 100);
        assert_eq!(tracker.downgraded(), 100);
        assert_eq!(tracker.decisions(), 400);
    }

    #[test]
    fn test_ratio_clamped() {
        let mut tracker = RatioTracker::new(250);
        assert_eq!(tracker.ratio(), 100);
        tracker.set_ratio(10);
        assert_eq!(tracker.ratio(), 10);
        tracker.store_ratio(101);
        assert_eq!(tracker.ratio(), 100);
    }
}
