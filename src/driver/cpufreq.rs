//! Core frequency control through the Linux `cpufreq` sysfs interface.

use super::FrequencyDriver;
use crate::units::PhysicalUnit;
use crate::{Error, Result};
use log::{debug, info, warn};
use nix::libc;
use std::path::{Path, PathBuf};

/// Frequencies in sysfs are given in kHz.
const HZ_PER_KHZ: i64 = 1000;

/// File written to change the frequency of one CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// `scaling_setspeed`, available with the `userspace` governor.
    Setspeed,
    /// `scaling_max_freq`, used with every other governor.
    MaxFreq,
}

/// An opened `cpufreq` policy directory of one CPU.
#[derive(Debug)]
pub struct CpufreqDevice {
    /// CPU this device belongs to.
    cpu: PhysicalUnit,
    /// The `cpufreq` directory of the CPU.
    dir: PathBuf,
    /// File written by `apply`.
    target: Target,
}

impl CpufreqDevice {
    /// CPU this device belongs to.
    pub fn cpu(&self) -> PhysicalUnit {
        self.cpu
    }
}

/// Frequency in kHz, clamped to the hardware limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpufreqSetting {
    /// Value written to sysfs.
    khz: i64,
}

impl CpufreqSetting {
    /// Frequency in kHz.
    pub fn khz(&self) -> i64 {
        self.khz
    }
}

/// `FrequencyDriver` over `/sys/devices/system/cpu/cpuN/cpufreq`.
#[derive(Debug)]
pub struct CpufreqDriver {
    /// Root of the per-CPU sysfs hierarchy.
    root: PathBuf,
    /// One past the highest CPU number that has a `cpufreq` directory.
    num_devices: usize,
    /// Hardware frequency limits in kHz, taken from the first CPU.
    limits: (i64, i64),
}

fn read_khz(path: &Path) -> Result<i64> {
    Ok(std::fs::read_to_string(path)?.trim().parse()?)
}

fn driver_error(err: Error) -> Error {
    match err {
        Error::IO(ref e) => Error::Driver {
            code: -e.raw_os_error().unwrap_or(libc::EIO),
            reason: e.to_string(),
        },
        other => Error::Driver {
            code: -libc::EINVAL,
            reason: other.to_string(),
        },
    }
}

impl CpufreqDriver {
    /// Open the backend rooted at `root`, usually `/sys/devices/system/cpu`.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let pattern = format!("{}/cpu[0-9]*/cpufreq", root.display());
        let mut first = None;
        let mut num_devices = 0;
        for entry in glob::glob(&pattern)? {
            let dir = entry?;
            let cpu = dir
                .parent()
                .and_then(Path::file_name)
                .and_then(|n| n.to_str())
                .and_then(|n| n.trim_start_matches("cpu").parse::<usize>().ok());
            if let Some(cpu) = cpu {
                num_devices = std::cmp::max(num_devices, cpu + 1);
                if first.as_ref().map_or(true, |(c, _)| cpu < *c) {
                    first = Some((cpu, dir));
                }
            }
        }
        let (cpu, dir) = first.ok_or_else(|| Error::Discovery(String::from("cpufreq")))?;
        let limits = (
            read_khz(&dir.join("cpuinfo_min_freq"))?,
            read_khz(&dir.join("cpuinfo_max_freq"))?,
        );
        info!(
            "cpufreq: {} cpus, limits {}-{} kHz (from cpu {})",
            num_devices, limits.0, limits.1, cpu
        );
        Ok(CpufreqDriver {
            root,
            num_devices,
            limits,
        })
    }
}

impl FrequencyDriver for CpufreqDriver {
    type Device = CpufreqDevice;
    type Setting = CpufreqSetting;

    fn name(&self) -> &str {
        "cpufreq"
    }

    fn num_devices(&self) -> usize {
        self.num_devices
    }

    fn open(&mut self, unit: PhysicalUnit) -> Result<CpufreqDevice> {
        let dir = self.root.join(format!("cpu{}/cpufreq", unit));
        let governor = std::fs::read_to_string(dir.join("scaling_governor")).map_err(|e| {
            driver_error(Error::IO(e))
        })?;
        let target = if governor.trim() == "userspace" {
            Target::Setspeed
        } else {
            debug!(
                "cpu {} uses governor {}, limiting scaling_max_freq",
                unit,
                governor.trim()
            );
            Target::MaxFreq
        };
        Ok(CpufreqDevice {
            cpu: unit,
            dir,
            target,
        })
    }

    fn read_frequency(&self, device: &CpufreqDevice) -> Result<i64> {
        read_khz(&device.dir.join("scaling_cur_freq"))
            .map(|khz| khz * HZ_PER_KHZ)
            .map_err(driver_error)
    }

    fn read_min_frequency(&self, device: &CpufreqDevice) -> Result<i64> {
        read_khz(&device.dir.join("scaling_min_freq"))
            .map(|khz| khz * HZ_PER_KHZ)
            .map_err(driver_error)
    }

    fn supports_min(&self) -> bool {
        true
    }

    fn prepare(&mut self, freq: i64, _flags: u32) -> Option<CpufreqSetting> {
        if freq <= 0 {
            return None;
        }
        let khz = freq / HZ_PER_KHZ;
        let clamped = std::cmp::min(std::cmp::max(khz, self.limits.0), self.limits.1);
        if clamped != khz {
            warn!("{} kHz is out of range, using {} kHz", khz, clamped);
        }
        Some(CpufreqSetting { khz: clamped })
    }

    fn unprepare(&mut self, _setting: CpufreqSetting) {}

    fn apply(&self, device: &CpufreqDevice, setting: &CpufreqSetting) -> Result<()> {
        let file = match device.target {
            Target::Setspeed => "scaling_setspeed",
            Target::MaxFreq => "scaling_max_freq",
        };
        std::fs::write(device.dir.join(file), setting.khz.to_string())
            .map_err(|e| driver_error(Error::IO(e)))
    }

    fn apply_min(&self, device: &CpufreqDevice, setting: &CpufreqSetting) -> Result<()> {
        std::fs::write(device.dir.join("scaling_min_freq"), setting.khz.to_string())
            .map_err(|e| driver_error(Error::IO(e)))
    }

    fn close(&mut self, unit: PhysicalUnit, device: CpufreqDevice) {
        debug!("closing cpufreq device of cpu {}", unit);
        drop(device);
    }

    fn shutdown(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(name: &str, governors: &[&str]) -> std::io::Result<PathBuf> {
        let root = std::env::temp_dir().join(format!("tuning-cpufreq-{}-{}", name, std::process::id()));
        for (cpu, governor) in governors.iter().enumerate() {
            let dir = root.join(format!("cpu{}/cpufreq", cpu));
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join("cpuinfo_min_freq"), "800000\n")?;
            std::fs::write(dir.join("cpuinfo_max_freq"), "3000000\n")?;
            std::fs::write(dir.join("scaling_governor"), format!("{}\n", governor))?;
            std::fs::write(dir.join("scaling_cur_freq"), "2100000\n")?;
            std::fs::write(dir.join("scaling_min_freq"), "800000\n")?;
        }
        Ok(root)
    }

    #[test]
    fn test_discovers_and_reads() -> crate::Result<()> {
        let root = fake_sysfs("read", &["userspace", "performance"])?;
        let mut driver = CpufreqDriver::new(&root)?;
        assert_eq!(driver.num_devices(), 2);

        let dev = driver.open(1)?;
        assert_eq!(dev.cpu(), 1);
        assert_eq!(driver.read_frequency(&dev)?, 2_100_000_000);
        assert_eq!(driver.read_min_frequency(&dev)?, 800_000_000);

        std::fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[test]
    fn test_prepare_clamps() -> crate::Result<()> {
        let root = fake_sysfs("clamp", &["userspace"])?;
        let mut driver = CpufreqDriver::new(&root)?;
        assert_eq!(driver.prepare(2_000_000_000, 0).map(|s| s.khz()), Some(2_000_000));
        assert_eq!(driver.prepare(5_000_000_000, 0).map(|s| s.khz()), Some(3_000_000));
        assert_eq!(driver.prepare(100_000_000, 0).map(|s| s.khz()), Some(800_000));
        assert!(driver.prepare(-1, 0).is_none());
        std::fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[test]
    fn test_apply_picks_target_by_governor() -> crate::Result<()> {
        let root = fake_sysfs("apply", &["userspace", "powersave"])?;
        let mut driver = CpufreqDriver::new(&root)?;
        let setting = driver.prepare(1_500_000_000, 0).unwrap();

        let user = driver.open(0)?;
        driver.apply(&user, &setting)?;
        let written = std::fs::read_to_string(root.join("cpu0/cpufreq/scaling_setspeed"))?;
        assert_eq!(written, "1500000");

        let other = driver.open(1)?;
        driver.apply(&other, &setting)?;
        let written = std::fs::read_to_string(root.join("cpu1/cpufreq/scaling_max_freq"))?;
        assert_eq!(written, "1500000");

        std::fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[test]
    fn test_open_missing_cpu_fails() -> crate::Result<()> {
        let root = fake_sysfs("missing", &["userspace"])?;
        let mut driver = CpufreqDriver::new(&root)?;
        match driver.open(7) {
            Err(Error::Driver { code, .. }) => assert_eq!(code, -libc::ENOENT),
            other => panic!("unexpected {:?}", other.map(|d| d.cpu())),
        }
        std::fs::remove_dir_all(&root)?;
        Ok(())
    }
}
