//! Uncore frequency control through `MSR_UNCORE_RATIO_LIMIT`.
//!
//! One device per physical package. The register holds the maximum ratio in bits 6:0 and the
//! minimum ratio in bits 14:8, both in units of 100 MHz.

use super::FrequencyDriver;
use crate::arch::{MsrAddress, MsrHandle, MSR_DEVICE_ROOT};
use crate::units::PhysicalUnit;
use crate::{Error, Result};
use log::{debug, info};
use std::path::PathBuf;

/// Frequency of one ratio step.
const HZ_PER_RATIO: i64 = 100_000_000;
/// Ratios are 7 bits wide.
const RATIO_MASK: u64 = 0x7f;
/// Position of the minimum ratio.
const MIN_SHIFT: u64 = 8;

/// Prepared uncore ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UncoreRatio(u64);

impl UncoreRatio {
    /// Ratio in multiples of 100 MHz.
    pub fn ratio(self) -> u64 {
        self.0
    }
}

/// Max ratio stored in `raw`.
fn max_ratio(raw: u64) -> u64 {
    raw & RATIO_MASK
}

/// Min ratio stored in `raw`.
fn min_ratio(raw: u64) -> u64 {
    (raw >> MIN_SHIFT) & RATIO_MASK
}

/// Replace both ratios of `raw` with `ratio`.
fn pin_ratio(raw: u64, ratio: u64) -> u64 {
    let fields = RATIO_MASK | (RATIO_MASK << MIN_SHIFT);
    (raw & !fields) | (ratio & RATIO_MASK) | ((ratio & RATIO_MASK) << MIN_SHIFT)
}

/// Replace the min ratio of `raw` with `ratio`.
fn set_min_ratio(raw: u64, ratio: u64) -> u64 {
    (raw & !(RATIO_MASK << MIN_SHIFT)) | ((ratio & RATIO_MASK) << MIN_SHIFT)
}

/// `FrequencyDriver` writing the uncore ratio limit MSR of the first CPU of every package.
#[derive(Debug)]
pub struct MsrUncoreDriver {
    /// Directory holding the per-CPU MSR device files.
    dev_root: PathBuf,
    /// First CPU of each package, indexed by package.
    package_cpus: Vec<usize>,
}

impl MsrUncoreDriver {
    /// Discover packages through sysfs and use `/dev/cpu/N/msr`.
    pub fn new() -> Result<Self> {
        let package_cpus = crate::platform::package_first_cpus(crate::platform::SYSFS_CPU_ROOT)?;
        MsrUncoreDriver::with_packages(MSR_DEVICE_ROOT, package_cpus)
    }

    /// Use an explicit package to CPU mapping and MSR device root.
    pub fn with_packages<P: Into<PathBuf>>(dev_root: P, package_cpus: Vec<usize>) -> Result<Self> {
        if package_cpus.is_empty() {
            return Err(Error::Discovery(String::from("UNCORE FREQ")));
        }
        info!("uncore: {} packages, first cpus {:?}", package_cpus.len(), package_cpus);
        Ok(MsrUncoreDriver {
            dev_root: dev_root.into(),
            package_cpus,
        })
    }
}

impl FrequencyDriver for MsrUncoreDriver {
    type Device = MsrHandle;
    type Setting = UncoreRatio;

    fn name(&self) -> &str {
        "msr-uncore"
    }

    fn num_devices(&self) -> usize {
        self.package_cpus.len()
    }

    fn open(&mut self, unit: PhysicalUnit) -> Result<MsrHandle> {
        let cpu = *self.package_cpus.get(unit).ok_or_else(|| Error::Driver {
            code: -nix::libc::ENODEV,
            reason: format!("no package {}", unit),
        })?;
        MsrHandle::open_in(&self.dev_root, cpu).map_err(|e| Error::Driver {
            code: e.code(),
            reason: e.to_string(),
        })
    }

    fn read_frequency(&self, device: &MsrHandle) -> Result<i64> {
        let raw = device.read(MsrAddress::MSR_UNCORE_RATIO_LIMIT)?;
        Ok(max_ratio(raw) as i64 * HZ_PER_RATIO)
    }

    fn supports_min(&self) -> bool {
        true
    }

    fn read_min_frequency(&self, device: &MsrHandle) -> Result<i64> {
        let raw = device.read(MsrAddress::MSR_UNCORE_RATIO_LIMIT)?;
        Ok(min_ratio(raw) as i64 * HZ_PER_RATIO)
    }

    fn prepare(&mut self, freq: i64, _flags: u32) -> Option<UncoreRatio> {
        let ratio = freq / HZ_PER_RATIO;
        if ratio < 1 || ratio > RATIO_MASK as i64 {
            debug!("{} Hz is not a valid uncore ratio", freq);
            return None;
        }
        Some(UncoreRatio(ratio as u64))
    }

    fn unprepare(&mut self, _setting: UncoreRatio) {}

    fn apply(&self, device: &MsrHandle, setting: &UncoreRatio) -> Result<()> {
        let raw = device.read(MsrAddress::MSR_UNCORE_RATIO_LIMIT)?;
        device.write(MsrAddress::MSR_UNCORE_RATIO_LIMIT, pin_ratio(raw, setting.0))
    }

    fn apply_min(&self, device: &MsrHandle, setting: &UncoreRatio) -> Result<()> {
        let raw = device.read(MsrAddress::MSR_UNCORE_RATIO_LIMIT)?;
        device.write(MsrAddress::MSR_UNCORE_RATIO_LIMIT, set_min_ratio(raw, setting.0))
    }

    fn close(&mut self, unit: PhysicalUnit, device: MsrHandle) {
        debug!("closing uncore device {} (cpu {})", unit, device.cpu());
    }

    fn shutdown(&mut self) {}
}
