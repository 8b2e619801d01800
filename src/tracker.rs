//! Tracking of the physical units this process is responsible for tuning.
//!
//! Ownership is derived from the OS affinity masks of the process and of every thread the host
//! reports. It only ever grows: a thread going away does not release its units.

use crate::platform::Platform;
use crate::units::{PhysicalUnit, UnitSet};
use crate::Result;
use log::{debug, warn};

/// Outcome of merging an affinity mask into the owned set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Units that were not owned before and are now.
    pub added: Vec<PhysicalUnit>,
    /// Units of the mask that could not be admitted and stay unowned.
    pub rejected: Vec<PhysicalUnit>,
}

impl Registration {
    /// Check if some units of the mask could not be admitted.
    #[inline]
    pub fn is_partial(&self) -> bool {
        !self.rejected.is_empty()
    }
}

/// Monotonic set of owned units.
#[derive(Debug, Clone)]
pub struct ResponsibilityTracker {
    owned: UnitSet,
}

impl ResponsibilityTracker {
    /// Tracker owning nothing on a system with `capacity` units.
    pub fn new(capacity: usize) -> Self {
        ResponsibilityTracker {
            owned: UnitSet::new(capacity),
        }
    }

    /// Tracker owning the units in the affinity mask of `id` that `admit` accepts.
    ///
    /// `admit` is called once per unit of the mask, in ascending order, and usually opens the
    /// unit's device.
    pub fn initial_ownership<L, F>(
        platform: &L,
        id: i32,
        capacity: usize,
        admit: F,
    ) -> Result<(Self, Registration)>
    where
        L: Platform,
        F: FnMut(PhysicalUnit) -> bool,
    {
        let mut tracker = ResponsibilityTracker::new(capacity);
        let registration = tracker.register_new_unit_owner(platform, id, admit)?;
        Ok((tracker, registration))
    }

    /// Currently owned units.
    #[inline]
    pub fn owned(&self) -> &UnitSet {
        &self.owned
    }

    /// Union the affinity mask of thread `tid` into the owned set.
    ///
    /// Only units not owned yet are passed to `admit`; the ones it refuses are reported in
    /// `Registration::rejected` and not added. A failing affinity query leaves the set unchanged.
    pub fn register_new_unit_owner<L, F>(
        &mut self,
        platform: &L,
        tid: i32,
        admit: F,
    ) -> Result<Registration>
    where
        L: Platform,
        F: FnMut(PhysicalUnit) -> bool,
    {
        let mask = platform.affinity(tid, self.owned.capacity())?;
        debug!("affinity of {}: {}", tid, mask);
        Ok(self.absorb(&mask, admit))
    }

    /// Union `mask` into the owned set, admitting every new unit through `admit`.
    pub fn absorb<F>(&mut self, mask: &UnitSet, mut admit: F) -> Registration
    where
        F: FnMut(PhysicalUnit) -> bool,
    {
        let mut registration = Registration::default();
        for unit in self.owned.difference(mask) {
            if admit(unit) {
                self.owned.insert(unit);
                registration.added.push(unit);
            } else {
                warn!("unit {} could not be initialized, not taking responsibility", unit);
                registration.rejected.push(unit);
            }
        }
        registration
    }

    /// Forget every owned unit. Only used at teardown.
    pub fn clear(&mut self) {
        self.owned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;

    #[test]
    fn test_initial_ownership_skips_rejected() {
        let platform = FakePlatform::new(4, &[0, 1, 2]);
        let (tracker, reg) =
            ResponsibilityTracker::initial_ownership(&platform, FakePlatform::PROCESS, 4, |u| u != 1)
                .unwrap();
        assert_eq!(tracker.owned().iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(reg.added, vec![0, 2]);
        assert_eq!(reg.rejected, vec![1]);
        assert!(reg.is_partial());
    }

    #[test]
    fn test_monotonic_union() {
        let platform = FakePlatform::new(8, &[0, 1])
            .with_thread(7, &[1, 2, 3])
            .with_thread(8, &[0]);
        let (mut tracker, _) =
            ResponsibilityTracker::initial_ownership(&platform, FakePlatform::PROCESS, 8, |_| true)
                .unwrap();

        let mut admitted = Vec::new();
        let reg = tracker
            .register_new_unit_owner(&platform, 7, |u| {
                admitted.push(u);
                u != 3
            })
            .unwrap();
        assert_eq!(admitted, vec![2, 3]);
        assert_eq!(reg.added, vec![2]);
        assert_eq!(reg.rejected, vec![3]);

        let before = tracker.owned().len();
        let reg = tracker.register_new_unit_owner(&platform, 8, |_| true).unwrap();
        assert!(reg.added.is_empty());
        assert_eq!(tracker.owned().len(), before);
        assert_eq!(tracker.owned().to_string(), "{0,1,2}");
    }

    #[test]
    fn test_failed_affinity_keeps_ownership() {
        let platform = FakePlatform::new(4, &[0, 1]);
        let (mut tracker, _) =
            ResponsibilityTracker::initial_ownership(&platform, FakePlatform::PROCESS, 4, |_| true)
                .unwrap();
        assert!(tracker.register_new_unit_owner(&platform, 42, |_| true).is_err());
        assert_eq!(tracker.owned().to_string(), "{0,1}");
    }

    #[test]
    fn test_mask_truncated_to_capacity() {
        let platform = FakePlatform::new(4, &[1, 3, 5, 9]);
        let (tracker, reg) =
            ResponsibilityTracker::initial_ownership(&platform, FakePlatform::PROCESS, 4, |_| true)
                .unwrap();
        assert_eq!(reg.added, vec![1, 3]);
        assert!(tracker.owned().iter().all(|u| u < 4));
    }
}
