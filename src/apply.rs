//! Applying one setting to many devices and aggregating readings.

use crate::registry::DeviceRegistry;
use crate::units::PhysicalUnit;
use crate::Result;
use log::{debug, warn};

/// Host value asking to restore the recorded defaults.
pub const RESET_TO_DEFAULT: i32 = -1;

/// Host values are MHz, driver values are Hz.
pub const HZ_PER_MHZ: i64 = 1_000_000;

/// Convert a host value in MHz to Hz.
#[inline]
pub fn mhz_to_hz(mhz: i32) -> i64 {
    i64::from(mhz) * HZ_PER_MHZ
}

/// Convert a driver value in Hz to MHz, truncating.
#[inline]
pub fn hz_to_mhz(hz: i64) -> i32 {
    (hz / HZ_PER_MHZ) as i32
}

/// Result of applying a setting to one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitResult {
    /// The unit.
    pub unit: PhysicalUnit,
    /// `0` on success, the negative driver code otherwise.
    pub code: i32,
}

/// Per unit results of a fan-out, in the order the units were visited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    results: Vec<UnitResult>,
}

impl ApplyReport {
    /// Empty report.
    pub fn new() -> Self {
        ApplyReport::default()
    }

    /// Record the outcome for `unit`.
    pub fn push(&mut self, unit: PhysicalUnit, code: i32) {
        self.results.push(UnitResult { unit, code });
    }

    /// All recorded results.
    pub fn results(&self) -> &[UnitResult] {
        &self.results
    }

    /// Units that were attempted.
    pub fn units(&self) -> Vec<PhysicalUnit> {
        self.results.iter().map(|r| r.unit).collect()
    }

    /// Results of the units that failed.
    pub fn failures(&self) -> impl Iterator<Item = &UnitResult> + '_ {
        self.results.iter().filter(|r| r.code != 0)
    }

    /// Check if no unit failed.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Host status: the last non-zero code, `0` if every unit succeeded.
    pub fn status(&self) -> i32 {
        self.failures().last().map_or(0, |r| r.code)
    }
}

/// Run `op` on every opened device of `registry` whose unit passes `eligible`.
///
/// Devices are visited in ascending unit order. A failing unit is logged and recorded, the
/// remaining units are still visited.
pub fn fan_out<T, E, F>(registry: &DeviceRegistry<T>, mut eligible: E, mut op: F) -> ApplyReport
where
    E: FnMut(PhysicalUnit) -> bool,
    F: FnMut(PhysicalUnit, &T) -> Result<()>,
{
    let mut report = ApplyReport::new();
    for (unit, device) in registry.iter() {
        if !eligible(unit) {
            continue;
        }
        match op(unit, device) {
            Ok(()) => {
                debug!("unit {} done", unit);
                report.push(unit, 0);
            }
            Err(e) => {
                warn!("Error setting unit {}: {} ({})", unit, e.code(), e);
                report.push(unit, e.code());
            }
        }
    }
    report
}

/// Readings of every opened device, skipping the ones that fail.
pub fn collect_readings<T, F>(registry: &DeviceRegistry<T>, mut read: F) -> Vec<i64>
where
    F: FnMut(&T) -> Result<i64>,
{
    registry
        .iter()
        .filter_map(|(unit, device)| match read(device) {
            Ok(hz) => Some(hz),
            Err(e) => {
                warn!("Error reading unit {}: {}", unit, e);
                None
            }
        })
        .collect()
}

/// Largest reading in MHz, `0` when there is none.
pub fn max_mhz(readings: &[i64]) -> i32 {
    readings.iter().copied().max().map_or(0, hz_to_mhz)
}

/// Integer average of the readings converted to MHz, `0` when there is none.
pub fn average_mhz(readings: &[i64]) -> i32 {
    if readings.is_empty() {
        return 0;
    }
    let sum: i64 = readings.iter().map(|&hz| i64::from(hz_to_mhz(hz))).sum();
    (sum / readings.len() as i64) as i32
}
