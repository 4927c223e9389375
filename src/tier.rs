//! Pouch tiers
//!
//! A pouch's entry count maps to one of four levels. The ranges are
//! contiguous: 0-50, 51-100, 101-200, 201 and up. The top level needs the pro
//! entitlement; without it classification stops at `Abundant`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counts above this need the entitlement to reach `Overflow`
pub const LEVEL4_THRESHOLD: u64 = 200;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Sprout = 1,
    Accumulate = 2,
    Abundant = 3,
    Overflow = 4,
}

impl Level {
    pub const ALL: [Level; 4] = [
        Level::Sprout,
        Level::Accumulate,
        Level::Abundant,
        Level::Overflow,
    ];

    /// Classify a pouch count.
    pub fn for_count(count: u64, has_entitlement: bool) -> Level {
        match count {
            0..=50 => Level::Sprout,
            51..=100 => Level::Accumulate,
            101..=LEVEL4_THRESHOLD => Level::Abundant,
            _ if has_entitlement => Level::Overflow,
            _ => Level::Abundant,
        }
    }

    /// True once the count has passed the top threshold without the entitlement.
    pub fn is_level4_locked(count: u64, has_entitlement: bool) -> bool {
        !has_entitlement && count > LEVEL4_THRESHOLD
    }

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Sprout => "sprout",
            Level::Accumulate => "accumulate",
            Level::Abundant => "abundant",
            Level::Overflow => "overflow",
        }
    }

    pub fn lower_bound(self) -> u64 {
        match self {
            Level::Sprout => 0,
            Level::Accumulate => 51,
            Level::Abundant => 101,
            Level::Overflow => 201,
        }
    }

    /// Last count still in this level; `None` for the terminal level.
    pub fn upper_bound(self) -> Option<u64> {
        self.next_threshold().map(|next| next - 1)
    }

    /// Count at which the next level starts
    pub fn next_threshold(self) -> Option<u64> {
        match self {
            Level::Sprout => Some(51),
            Level::Accumulate => Some(101),
            Level::Abundant => Some(201),
            Level::Overflow => None,
        }
    }

    pub fn next(self) -> Option<Level> {
        match self {
            Level::Sprout => Some(Level::Accumulate),
            Level::Accumulate => Some(Level::Abundant),
            Level::Abundant => Some(Level::Overflow),
            Level::Overflow => None,
        }
    }

    /// How full the pouch looks, 0-1
    pub fn fill_ratio(self) -> f64 {
        match self {
            Level::Sprout => 0.05,
            Level::Accumulate => 0.42,
            Level::Abundant => 0.75,
            Level::Overflow => 1.0,
        }
    }

    /// Glow strength, 0-1
    pub fn glow_intensity(self) -> f64 {
        match self {
            Level::Sprout => 0.15,
            Level::Accumulate => 0.40,
            Level::Abundant => 0.70,
            Level::Overflow => 1.00,
        }
    }

    pub fn particle_count(self) -> u32 {
        match self {
            Level::Sprout => 0,
            Level::Accumulate => 3,
            Level::Abundant => 7,
            Level::Overflow => 14,
        }
    }

    /// Progress through this level, 0-1. Reaches exactly 1.0 at the level's
    /// last count, and is always 1.0 for the terminal level.
    pub fn progress(self, count: u64) -> f64 {
        let Some(upper) = self.upper_bound() else {
            return 1.0;
        };
        let lower = self.lower_bound();
        let span = upper.saturating_sub(lower);
        if span == 0 {
            return 1.0;
        }
        let done = count.saturating_sub(lower) as f64 / span as f64;
        done.clamp(0.0, 1.0)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LV{} {}", self.rank(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_without_entitlement() {
        for count in 0..=50 {
            assert_eq!(Level::for_count(count, false), Level::Sprout);
            assert_eq!(Level::for_count(count, true), Level::Sprout);
        }
        for count in 51..=100 {
            assert_eq!(Level::for_count(count, false), Level::Accumulate);
        }
        for count in 101..=200 {
            assert_eq!(Level::for_count(count, true), Level::Abundant);
        }
        for count in [201, 500, u64::MAX] {
            assert_eq!(Level::for_count(count, false), Level::Abundant);
            assert_eq!(Level::for_count(count, true), Level::Overflow);
        }
    }

    #[test]
    fn test_ranges_are_contiguous() {
        for pair in Level::ALL.windows(2) {
            let (this, next) = (pair[0], pair[1]);
            assert_eq!(this.next(), Some(next));
            assert_eq!(this.next_threshold(), Some(next.lower_bound()));
            assert_eq!(Level::for_count(next.lower_bound(), true), next);
        }
        assert_eq!(Level::Overflow.next_threshold(), None);
    }

    #[test]
    fn test_level4_lock() {
        assert!(!Level::is_level4_locked(200, false));
        assert!(Level::is_level4_locked(201, false));
        assert!(!Level::is_level4_locked(201, true));
        assert!(!Level::is_level4_locked(0, false));
    }

    #[test]
    fn test_progress_is_monotonic_and_hits_one_at_upper_bound() {
        for level in [Level::Sprout, Level::Accumulate, Level::Abundant] {
            let lower = level.lower_bound();
            let upper = level.upper_bound().unwrap();
            let mut last = -1.0;
            for count in lower..=upper {
                let p = level.progress(count);
                assert!(p >= last, "{level} regressed at {count}");
                assert!((0.0..=1.0).contains(&p));
                last = p;
            }
            assert_eq!(level.progress(lower), 0.0);
            assert_eq!(level.progress(upper), 1.0);
        }
    }

    #[test]
    fn test_terminal_and_capped_progress() {
        assert_eq!(Level::Overflow.progress(201), 1.0);
        assert_eq!(Level::Overflow.progress(10_000), 1.0);
        // Capped at abundant without the entitlement
        assert_eq!(Level::Abundant.progress(350), 1.0);
    }

    #[test]
    fn test_display_constants() {
        assert_eq!(Level::Accumulate.particle_count(), 3);
        assert_eq!(Level::Overflow.fill_ratio(), 1.0);
        assert!(Level::Sprout.glow_intensity() < Level::Abundant.glow_intensity());
        assert_eq!(Level::Abundant.to_string(), "LV3 abundant");
    }
}
