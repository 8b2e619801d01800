//! Partition of cores into dies sharing one uncore frequency domain.

use crate::cache::FrequencyValue;
use crate::units::{PhysicalUnit, UnitSet};
use crate::{Error, Result};
use derive_more::Display;
use log::{debug, error};

/// How many cores of a die the process owns.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    /// Some cores are not owned.
    #[display(fmt = "partial")]
    Partial,
    /// Every core is owned.
    #[display(fmt = "full")]
    Full,
    /// More cores are owned than the die has. Never valid.
    #[display(fmt = "overcommitted")]
    Overcommitted,
}

/// Classify a die with `owned` owned cores out of `cores_per_die`.
pub fn classify(owned: usize, cores_per_die: usize) -> Occupancy {
    if owned > cores_per_die {
        Occupancy::Overcommitted
    } else if owned == cores_per_die {
        Occupancy::Full
    } else {
        Occupancy::Partial
    }
}

/// One die: a fixed range of cores and its recorded default frequencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DieGroup {
    /// First core of the die.
    pub first_core: PhysicalUnit,
    /// Number of cores of the die.
    pub cores: usize,
    /// Ownership completeness, recomputed whenever the owned set grows.
    pub occupancy: Occupancy,
    /// Maximum frequency found at initialization.
    pub default_max: Option<FrequencyValue>,
    /// Minimum frequency found at initialization, if the driver can read it.
    pub default_min: Option<FrequencyValue>,
}

impl DieGroup {
    /// Check if the process owns every core of the die.
    #[inline]
    pub fn is_fully_owned(&self) -> bool {
        self.occupancy == Occupancy::Full
    }

    /// One past the last core of the die.
    #[inline]
    pub fn end_core(&self) -> PhysicalUnit {
        self.first_core + self.cores
    }
}

/// Equal sized dies covering the available cores.
#[derive(Debug, Clone)]
pub struct DieLayout {
    cores_per_die: usize,
    dies: Vec<DieGroup>,
}

impl DieLayout {
    /// Split `available_cores` into `num_dies` groups of `available_cores / num_dies` cores.
    pub fn new(num_dies: usize, available_cores: usize) -> Result<Self> {
        if num_dies == 0 || available_cores < num_dies {
            return Err(Error::InvalidValue {
                value: num_dies as i64,
                reason: "die count must be between 1 and the number of cores",
            });
        }
        let cores_per_die = available_cores / num_dies;
        debug!(
            "{} dies with {} cores each ({} cores available)",
            num_dies, cores_per_die, available_cores
        );
        let dies = (0..num_dies)
            .map(|die| DieGroup {
                first_core: die * cores_per_die,
                cores: cores_per_die,
                occupancy: Occupancy::Partial,
                default_max: None,
                default_min: None,
            })
            .collect();
        Ok(DieLayout {
            cores_per_die,
            dies,
        })
    }

    /// Cores of every die.
    #[inline]
    pub fn cores_per_die(&self) -> usize {
        self.cores_per_die
    }

    /// Number of dies.
    #[inline]
    pub fn len(&self) -> usize {
        self.dies.len()
    }

    /// Check if there are no dies.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dies.is_empty()
    }

    /// Die `die`.
    pub fn get(&self, die: usize) -> Option<&DieGroup> {
        self.dies.get(die)
    }

    /// Mutable die `die`.
    pub fn get_mut(&mut self, die: usize) -> Option<&mut DieGroup> {
        self.dies.get_mut(die)
    }

    /// Dies in ascending order.
    pub fn iter(&self) -> std::slice::Iter<'_, DieGroup> {
        self.dies.iter()
    }

    /// Mutable dies in ascending order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, DieGroup> {
        self.dies.iter_mut()
    }

    /// Die containing `core`.
    pub fn die_of(&self, core: PhysicalUnit) -> Option<usize> {
        if self.cores_per_die == 0 {
            return None;
        }
        let die = core / self.cores_per_die;
        if die < self.dies.len() {
            Some(die)
        } else {
            None
        }
    }

    /// Indices of the dies the process fully owns.
    pub fn fully_owned(&self) -> Vec<usize> {
        self.dies
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_fully_owned())
            .map(|(i, _)| i)
            .collect()
    }

    /// Recompute the occupancy of every die from `owned`.
    ///
    /// Returns the dies found overcommitted.
    pub fn recompute(&mut self, owned: &UnitSet) -> Vec<usize> {
        let counts: Vec<usize> = self
            .dies
            .iter()
            .map(|d| owned.count_in_range(d.first_core, d.end_core()))
            .collect();
        self.apply_counts(&counts)
    }

    /// Set the occupancy of every die from its number of owned cores.
    ///
    /// Overcommitted dies are logged, counted as not fully owned and returned.
    pub fn apply_counts(&mut self, counts: &[usize]) -> Vec<usize> {
        let mut violations = Vec::new();
        for (die, (group, &count)) in self.dies.iter_mut().zip(counts).enumerate() {
            group.occupancy = classify(count, group.cores);
            match group.occupancy {
                Occupancy::Overcommitted => {
                    error!(
                        "Internal error: die {} reports {} owned cores but has only {}",
                        die, count, group.cores
                    );
                    violations.push(die);
                }
                occupancy => debug!("die {}: {} of {} cores owned ({})", die, count, group.cores, occupancy),
            }
        }
        violations
    }
}
