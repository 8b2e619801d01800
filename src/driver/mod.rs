//! Frequency control drivers.
//!
//! A driver enumerates the controllable devices of one kind (cores or uncore domains), opens
//! them, reads their current frequency and applies prepared settings to them. Preparing a setting
//! is the expensive step and is memoized by [`SettingCache`](crate::cache::SettingCache).

use crate::units::PhysicalUnit;
use crate::{Error, Result};
use derive_more::Display;

mod cpufreq;
pub use cpufreq::{CpufreqDevice, CpufreqDriver, CpufreqSetting};

#[cfg(target_arch = "x86_64")]
mod uncore;
#[cfg(target_arch = "x86_64")]
pub use uncore::{MsrUncoreDriver, UncoreRatio};

/// Kind of frequency domain a driver controls.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Per core frequency.
    #[display(fmt = "CORE FREQ")]
    CoreFrequency,
    /// Per die (uncore) frequency.
    #[display(fmt = "UNCORE FREQ")]
    UncoreFrequency,
}

/// Operations the tuning plugins need from a frequency control backend.
///
/// Frequencies are in Hz. Reading functions return a negative driver code through
/// [`Error::Driver`] on failure.
pub trait FrequencyDriver {
    /// Handle to one opened device.
    type Device;
    /// Opaque setting produced by [`prepare`](FrequencyDriver::prepare).
    type Setting;

    /// Human readable name of the backend.
    fn name(&self) -> &str;

    /// Number of devices the backend can control.
    fn num_devices(&self) -> usize;

    /// Open device `unit`.
    fn open(&mut self, unit: PhysicalUnit) -> Result<Self::Device>;

    /// Read the current (maximum) frequency of `device`.
    fn read_frequency(&self, device: &Self::Device) -> Result<i64>;

    /// Whether `read_min_frequency` and `apply_min` are implemented.
    fn supports_min(&self) -> bool {
        false
    }

    /// Read the current minimum frequency of `device`.
    fn read_min_frequency(&self, _device: &Self::Device) -> Result<i64> {
        Err(Error::Unsupported)
    }

    /// Build a setting for `freq`. Returns `None` if the backend can not represent it.
    fn prepare(&mut self, freq: i64, flags: u32) -> Option<Self::Setting>;

    /// Release a setting built by `prepare`.
    fn unprepare(&mut self, setting: Self::Setting);

    /// Apply `setting` to `device`.
    fn apply(&self, device: &Self::Device, setting: &Self::Setting) -> Result<()>;

    /// Apply `setting` as the minimum frequency of `device`.
    fn apply_min(&self, _device: &Self::Device, _setting: &Self::Setting) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Close device `unit`.
    fn close(&mut self, unit: PhysicalUnit, device: Self::Device);

    /// Release the backend itself.
    fn shutdown(&mut self);
}

/// Source of frequency drivers, asked once per discovery attempt.
pub trait DriverProvider {
    /// Driver type handed out by this provider.
    type Driver: FrequencyDriver;

    /// Acquire a driver of `kind`, or `None` if no backend is available.
    fn acquire(&mut self, kind: DriverKind) -> Option<Self::Driver>;
}

impl<D, F> DriverProvider for F
where
    D: FrequencyDriver,
    F: FnMut(DriverKind) -> Option<D>,
{
    type Driver = D;

    fn acquire(&mut self, kind: DriverKind) -> Option<D> {
        self(kind)
    }
}

/// Provider of the Linux sysfs `cpufreq` backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxCoreProvider;

impl DriverProvider for LinuxCoreProvider {
    type Driver = CpufreqDriver;

    fn acquire(&mut self, kind: DriverKind) -> Option<CpufreqDriver> {
        match kind {
            DriverKind::CoreFrequency => CpufreqDriver::new(crate::platform::SYSFS_CPU_ROOT)
                .map_err(|e| log::warn!("cpufreq backend unavailable: {}", e))
                .ok(),
            DriverKind::UncoreFrequency => None,
        }
    }
}

/// Provider of the MSR based uncore backend. Only Intel processors are supported.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxUncoreProvider;

#[cfg(target_arch = "x86_64")]
impl DriverProvider for LinuxUncoreProvider {
    type Driver = MsrUncoreDriver;

    fn acquire(&mut self, kind: DriverKind) -> Option<MsrUncoreDriver> {
        if kind != DriverKind::UncoreFrequency {
            return None;
        }
        if !crate::arch::is_intel() {
            log::warn!("Uncore ratio MSR requires an Intel processor");
            return None;
        }
        MsrUncoreDriver::new()
            .map_err(|e| log::warn!("uncore backend unavailable: {}", e))
            .ok()
    }
}
