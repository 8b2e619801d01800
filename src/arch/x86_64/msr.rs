//! Utilities to read and write model specific registers (MSRs).

use crate::{Error, Result};
use byteorder::{ByteOrder, NativeEndian};
use nix::libc;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Directory holding the per-CPU MSR device files.
pub const MSR_DEVICE_ROOT: &str = "/dev/cpu";

#[derive(Debug)]
/// Handle to read and write model specific registers of one CPU.
///
/// Requires the `msr` kernel module loaded.
pub struct MsrHandle {
    /// MSR device file.
    file: std::fs::File,
    /// CPU the device file belongs to.
    cpu: usize,
}

impl MsrHandle {
    /// Get a handle to the MSRs of `cpu`.
    pub fn new(cpu: usize) -> Result<MsrHandle> {
        MsrHandle::open_in(Path::new(MSR_DEVICE_ROOT), cpu)
    }

    /// Get a handle to `<root>/<cpu>/msr`.
    pub fn open_in(root: &Path, cpu: usize) -> Result<MsrHandle> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(root.join(cpu.to_string()).join("msr"))?;
        Ok(MsrHandle { file, cpu })
    }

    /// CPU this handle belongs to.
    #[inline]
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Write `value` to `msr`.
    pub fn write(&self, msr: MsrAddress, value: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        NativeEndian::write_u64(&mut buf, value);
        match nix::sys::uio::pwrite(self.file.as_raw_fd(), &buf, msr as libc::off_t)? {
            8 => Ok(()),
            n => Err(short_access(self.cpu, msr, n)),
        }
    }

    /// Read the value of `msr`.
    pub fn read(&self, msr: MsrAddress) -> Result<u64> {
        let mut buf = [0u8; 8];
        match nix::sys::uio::pread(self.file.as_raw_fd(), &mut buf, msr as libc::off_t)? {
            8 => Ok(NativeEndian::read_u64(&buf)),
            n => Err(short_access(self.cpu, msr, n)),
        }
    }
}

fn short_access(cpu: usize, msr: MsrAddress, n: usize) -> Error {
    Error::Driver {
        code: -libc::EIO,
        reason: format!("accessed {} of 8 bytes of MSR {:#x} on cpu {}", n, msr as u64, cpu),
    }
}

/// MSR addresses from "Intel 64 and IA-32 Architectures Software Developers Manual Volume 4:
/// Model-Specific Registers".
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum MsrAddress {
    /// Energy/performance hint, 4 bits wide.
    IA32_ENERGY_PERF_BIAS = 0x1B0,
    /// Min and max uncore ratio in units of 100 MHz.
    MSR_UNCORE_RATIO_LIMIT = 0x620,
}
