//! Sets of physical units (cores or dies) a process is responsible for.

use std::collections::BTreeSet;
use std::fmt;

/// Index of a controllable hardware entity, a CPU core or a die.
pub type PhysicalUnit = usize;

/// Ordered set of physical units bounded by the number of units discovered on the system.
///
/// The set never holds an index greater or equal to its capacity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnitSet {
    /// Number of units known to exist.
    capacity: usize,
    /// Members of the set.
    units: BTreeSet<PhysicalUnit>,
}

impl UnitSet {
    /// Create an empty set for a system with `capacity` units.
    pub fn new(capacity: usize) -> Self {
        UnitSet {
            capacity,
            units: BTreeSet::new(),
        }
    }

    /// Create a set from `units`, dropping every index outside the capacity.
    pub fn from_units<I>(capacity: usize, units: I) -> Self
    where
        I: IntoIterator<Item = PhysicalUnit>,
    {
        let mut set = UnitSet::new(capacity);
        for unit in units {
            set.insert(unit);
        }
        set
    }

    /// Number of units known to exist.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of units in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if the set has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Check if `unit` is a member.
    #[inline]
    pub fn contains(&self, unit: PhysicalUnit) -> bool {
        self.units.contains(&unit)
    }

    /// Add `unit` to the set.
    ///
    /// Returns `true` if the unit was not a member before. Indices outside the capacity are
    /// rejected and yield `false`.
    pub fn insert(&mut self, unit: PhysicalUnit) -> bool {
        if unit >= self.capacity {
            return false;
        }
        self.units.insert(unit)
    }

    /// Remove `unit` from the set.
    pub fn remove(&mut self, unit: PhysicalUnit) -> bool {
        self.units.remove(&unit)
    }

    /// Members of `other` that are not members of `self`, in ascending order.
    pub fn difference(&self, other: &UnitSet) -> Vec<PhysicalUnit> {
        other.units.difference(&self.units).copied().collect()
    }

    /// Number of members in the half open range `[start, end)`.
    pub fn count_in_range(&self, start: PhysicalUnit, end: PhysicalUnit) -> usize {
        if start >= end {
            return 0;
        }
        self.units.range(start..end).count()
    }

    /// Iterate over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = PhysicalUnit> + '_ {
        self.units.iter().copied()
    }

    /// Remove every member.
    pub fn clear(&mut self) {
        self.units.clear();
    }
}

impl fmt::Display for UnitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self.iter().map(|u| u.to_string()).collect();
        write!(f, "{{{}}}", members.join(","))
    }
}
