//! Operating system queries needed to decide which units a process owns.

use crate::units::UnitSet;
use crate::{Error, Result};
use lazy_static::lazy_static;
use log::{debug, warn};
use nix::errno::Errno;
use nix::libc;
use nix::sched::sched_getaffinity;
use nix::unistd::Pid;
use regex::Regex;
use std::collections::BTreeMap;

lazy_static! {
    static ref CPU_DIR: Regex = Regex::new(r"/cpu(\d+)/").unwrap();
}

/// Root of the per-CPU sysfs hierarchy.
pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// OS services consumed by the frequency plugins.
pub trait Platform {
    /// Number of online logical CPUs.
    fn online_cpus(&self) -> Result<usize>;

    /// ID of the calling process.
    fn current_process(&self) -> i32;

    /// ID of the calling thread.
    fn current_thread(&self) -> i32;

    /// Affinity mask of process or thread `id`, truncated to `capacity` units.
    fn affinity(&self, id: i32, capacity: usize) -> Result<UnitSet>;
}

/// `Platform` backed by Linux system calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxPlatform;

impl Platform for LinuxPlatform {
    fn online_cpus(&self) -> Result<usize> {
        match unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) } {
            n if n < 0 => Err(Error::from_errno()),
            n => Ok(n as usize),
        }
    }

    fn current_process(&self) -> i32 {
        nix::unistd::getpid().as_raw()
    }

    fn current_thread(&self) -> i32 {
        nix::unistd::gettid().as_raw()
    }

    fn affinity(&self, id: i32, capacity: usize) -> Result<UnitSet> {
        let cpus = sched_getaffinity(Pid::from_raw(id)).map_err(|e| {
            log_affinity_error(&e);
            Error::Affinity(e)
        })?;
        let limit = std::cmp::min(capacity, libc::CPU_SETSIZE as usize);
        Ok(UnitSet::from_units(
            capacity,
            (0..limit).filter(|&cpu| cpus.is_set(cpu).unwrap_or(false)),
        ))
    }
}

/// Log why reading an affinity mask failed.
pub fn log_affinity_error(err: &nix::Error) {
    warn!("sched_getaffinity failed: {}", err);
    match err {
        nix::Error::Sys(Errno::EFAULT) => warn!("EFAULT: A supplied memory address was invalid."),
        nix::Error::Sys(Errno::EINVAL) => warn!(
            "EINVAL: cpusetsize is smaller than the size of the affinity mask used by the kernel."
        ),
        nix::Error::Sys(Errno::ESRCH) => {
            warn!("ESRCH: The thread whose ID is pid could not be found.")
        }
        other => warn!("Error {} unknown in this context.", other),
    }
}

/// Extract the CPU number from a path below `SYSFS_CPU_ROOT`.
fn cpu_of_path(path: &str) -> Option<usize> {
    CPU_DIR
        .captures(path)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Map every physical package to the lowest numbered CPU it contains.
///
/// Packages are returned in ascending order of their ID.
pub fn package_first_cpus(root: &str) -> Result<Vec<usize>> {
    let mut packages: BTreeMap<usize, usize> = BTreeMap::new();
    for entry in glob::glob(&format!("{}/cpu[0-9]*/topology/physical_package_id", root))? {
        let path = entry?;
        let cpu = match path.to_str().and_then(cpu_of_path) {
            Some(cpu) => cpu,
            None => continue,
        };
        let package: usize = std::fs::read_to_string(&path)?.trim().parse()?;
        let first = packages.entry(package).or_insert(cpu);
        if cpu < *first {
            *first = cpu;
        }
    }
    debug!("Found {} packages below {}", packages.len(), root);
    Ok(packages.values().copied().collect())
}
