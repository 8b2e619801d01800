//! Ordered collection of opened devices, one slot per physical unit.

use crate::driver::FrequencyDriver;
use crate::units::PhysicalUnit;
use crate::{Error, Result};
use log::{debug, warn};

/// What to do when a single unit fails to open during `open_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenPolicy {
    /// Leave the failed slot empty and continue with the remaining units.
    SkipFailed,
    /// Close what was opened so far and report the failure.
    AbortOnFailure,
}

/// Devices opened through a `FrequencyDriver`, indexed by unit.
///
/// Slots of units that were never opened, or failed to open, are empty.
#[derive(Debug)]
pub struct DeviceRegistry<T> {
    /// One slot per unit known to the driver.
    devices: Vec<Option<T>>,
}

impl<T> DeviceRegistry<T> {
    /// Create a registry with `count` empty slots.
    pub fn new(count: usize) -> Self {
        DeviceRegistry {
            devices: (0..count).map(|_| None).collect(),
        }
    }

    /// Open every unit in `[0, count)`.
    ///
    /// With `OpenPolicy::SkipFailed` the units that failed are returned next to the registry.
    /// With `OpenPolicy::AbortOnFailure` the first failure closes every opened device and is
    /// returned as the error.
    pub fn open_all<D>(
        driver: &mut D,
        count: usize,
        policy: OpenPolicy,
    ) -> Result<(Self, Vec<PhysicalUnit>)>
    where
        D: FrequencyDriver<Device = T>,
    {
        let mut registry = DeviceRegistry::new(count);
        let mut failed = Vec::new();
        for unit in 0..count {
            if let Err(e) = registry.ensure_open(driver, unit) {
                match policy {
                    OpenPolicy::SkipFailed => failed.push(unit),
                    OpenPolicy::AbortOnFailure => {
                        registry.close_all(driver);
                        return Err(e);
                    }
                }
            }
        }
        Ok((registry, failed))
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if the registry has no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Check if `unit` holds an opened device.
    #[inline]
    pub fn is_open(&self, unit: PhysicalUnit) -> bool {
        self.get(unit).is_some()
    }

    /// Device of `unit`, if opened.
    pub fn get(&self, unit: PhysicalUnit) -> Option<&T> {
        self.devices.get(unit).and_then(Option::as_ref)
    }

    /// Number of opened devices.
    pub fn open_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_some()).count()
    }

    /// Opened devices in ascending unit order.
    pub fn iter(&self) -> impl Iterator<Item = (PhysicalUnit, &T)> + '_ {
        self.devices
            .iter()
            .enumerate()
            .filter_map(|(unit, dev)| dev.as_ref().map(|d| (unit, d)))
    }

    /// Open `unit` unless it is open already.
    ///
    /// A failure leaves the slot empty.
    pub fn ensure_open<D>(&mut self, driver: &mut D, unit: PhysicalUnit) -> Result<()>
    where
        D: FrequencyDriver<Device = T>,
    {
        let slot = self.devices.get_mut(unit).ok_or(Error::UnitInit {
            unit,
            code: -nix::libc::EINVAL,
        })?;
        if slot.is_some() {
            return Ok(());
        }
        debug!("init device {}", unit);
        match driver.open(unit) {
            Ok(dev) => {
                *slot = Some(dev);
                debug!("init device {} successful", unit);
                Ok(())
            }
            Err(e) => {
                warn!("init device {} failed: {}", unit, e);
                Err(Error::UnitInit {
                    unit,
                    code: e.code(),
                })
            }
        }
    }

    /// Close every opened device in ascending unit order, leaving all slots empty.
    pub fn close_all<D>(&mut self, driver: &mut D)
    where
        D: FrequencyDriver<Device = T>,
    {
        for (unit, slot) in self.devices.iter_mut().enumerate() {
            if let Some(dev) = slot.take() {
                driver.close(unit, dev);
            }
        }
    }
}
