//! Coil state tracking on the client side
//!
//! Two parallel vectors of equal length:
//!
//! - **pulse**: the last observed value of each coil
//! - **level**: a latch that goes true the first time its coil is seen true
//!   and only returns to false through [`CoilStateTracker::reset_all`]
//!
//! Every mutation returns the list of coils whose `(pulse, level)` pair
//! actually changed, so callers only notify on real transitions.

/// One coil whose visible state changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoilStateChange {
    pub index: usize,
    pub pulse: bool,
    pub level: bool,
}

/// Pulse values and level latches for a fixed number of coils
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoilStateTracker {
    pulse: Vec<bool>,
    level: Vec<bool>,
}

impl CoilStateTracker {
    /// All-false tracker for `num_coils` coils
    pub fn new(num_coils: usize) -> Self {
        Self {
            pulse: vec![false; num_coils],
            level: vec![false; num_coils],
        }
    }

    pub fn len(&self) -> usize {
        self.pulse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulse.is_empty()
    }

    pub fn pulse(&self, index: usize) -> Option<bool> {
        self.pulse.get(index).copied()
    }

    pub fn level(&self, index: usize) -> Option<bool> {
        self.level.get(index).copied()
    }

    pub fn pulses(&self) -> &[bool] {
        &self.pulse
    }

    pub fn levels(&self) -> &[bool] {
        &self.level
    }

    /// Apply a poll result.
    ///
    /// Index `i` takes `states[i]`; positions past the end of `states` read
    /// as false and extra entries are ignored.
    pub fn update(&mut self, states: &[bool]) -> Vec<CoilStateChange> {
        (0..self.len())
            .filter_map(|i| self.apply(i, states.get(i).copied().unwrap_or(false)))
            .collect()
    }

    /// Record a locally written value without waiting for the next poll.
    /// Out-of-range indices are ignored.
    pub fn set_coil(&mut self, index: usize, value: bool) -> Option<CoilStateChange> {
        if index >= self.len() {
            return None;
        }
        self.apply(index, value)
    }

    /// Clear every level latch. Pulse values are untouched.
    pub fn reset_all(&mut self) -> Vec<CoilStateChange> {
        let mut changes = Vec::new();
        for (i, latch) in self.level.iter_mut().enumerate() {
            if *latch {
                *latch = false;
                changes.push(CoilStateChange {
                    index: i,
                    pulse: self.pulse[i],
                    level: false,
                });
            }
        }
        changes
    }

    /// Reinitialise to `num_coils` coils, all false
    pub fn resize(&mut self, num_coils: usize) {
        *self = Self::new(num_coils);
    }

    fn apply(&mut self, index: usize, value: bool) -> Option<CoilStateChange> {
        let old = (self.pulse[index], self.level[index]);
        self.pulse[index] = value;
        if value {
            self.level[index] = true;
        }
        let new = (self.pulse[index], self.level[index]);

        (old != new).then_some(CoilStateChange {
            index,
            pulse: new.0,
            level: new.1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_poll_sets_pulse_and_latch() {
        let mut tracker = CoilStateTracker::new(48);
        let mut states = vec![false; 48];
        states[0] = true;

        let changes = tracker.update(&states);
        assert_eq!(
            changes,
            vec![CoilStateChange {
                index: 0,
                pulse: true,
                level: true
            }]
        );
        assert_eq!(tracker.pulse(0), Some(true));
        assert_eq!(tracker.level(0), Some(true));
        assert_eq!(tracker.pulse(1), Some(false));
        assert_eq!(tracker.level(1), Some(false));
    }

    #[test]
    fn test_level_survives_falling_edge() {
        let mut tracker = CoilStateTracker::new(4);
        tracker.update(&[false, true, false, false]);
        let changes = tracker.update(&[false, false, false, false]);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].index, 1);
        assert!(!changes[0].pulse);
        assert!(changes[0].level);
        assert_eq!(tracker.level(1), Some(true));
    }

    #[test]
    fn test_unchanged_poll_reports_nothing() {
        let mut tracker = CoilStateTracker::new(3);
        tracker.update(&[true, false, true]);
        assert!(tracker.update(&[true, false, true]).is_empty());
    }

    #[test]
    fn test_short_and_long_poll_results() {
        let mut tracker = CoilStateTracker::new(3);
        tracker.update(&[true, true, true]);
        // Missing entries read as false
        tracker.update(&[true]);
        assert_eq!(tracker.pulses(), &[true, false, false]);
        // Extra entries are ignored
        tracker.update(&[false, false, false, true, true]);
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_reset_all() {
        let mut tracker = CoilStateTracker::new(3);
        tracker.update(&[true, true, false]);
        tracker.update(&[true, false, false]);

        let changes = tracker.reset_all();
        assert_eq!(changes.len(), 2);
        assert_eq!(tracker.levels(), &[false, false, false]);
        assert_eq!(tracker.pulses(), &[true, false, false]);
        assert!(tracker.reset_all().is_empty());
    }

    #[test]
    fn test_set_coil_mirrors_poll() {
        let mut tracker = CoilStateTracker::new(2);
        assert!(tracker.set_coil(1, false).is_none());
        let change = tracker.set_coil(1, true).unwrap();
        assert!(change.pulse && change.level);

        let change = tracker.set_coil(1, false).unwrap();
        assert!(!change.pulse && change.level);

        assert!(tracker.set_coil(2, true).is_none());
    }

    #[test]
    fn test_resize_clears() {
        let mut tracker = CoilStateTracker::new(2);
        tracker.update(&[true, true]);
        tracker.resize(5);
        assert_eq!(tracker.len(), 5);
        assert!(tracker.pulses().iter().all(|&p| !p));
        assert!(tracker.levels().iter().all(|&l| !l));
    }

    proptest! {
        #[test]
        fn prop_latch_is_monotonic(
            polls in prop::collection::vec(prop::collection::vec(any::<bool>(), 8), 1..20)
        ) {
            let mut tracker = CoilStateTracker::new(8);
            let mut seen_high = vec![false; 8];
            for poll in &polls {
                let before = tracker.levels().to_vec();
                tracker.update(poll);
                for i in 0..8 {
                    seen_high[i] |= poll[i];
                    prop_assert!(!before[i] || tracker.levels()[i]);
                    prop_assert_eq!(tracker.levels()[i], seen_high[i]);
                    prop_assert_eq!(tracker.pulses()[i], poll[i]);
                }
            }
        }

        #[test]
        fn prop_reset_keeps_pulses(poll in prop::collection::vec(any::<bool>(), 16)) {
            let mut tracker = CoilStateTracker::new(16);
            tracker.update(&poll);
            tracker.reset_all();
            prop_assert_eq!(tracker.pulses(), poll.as_slice());
            prop_assert!(tracker.levels().iter().all(|&l| !l));
        }
    }
}
