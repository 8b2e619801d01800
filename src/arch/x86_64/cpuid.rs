//! Processor identification through the `cpuid` instruction.

use core::arch::x86_64::__cpuid;
use log::debug;

/// Vendor string of Intel processors.
pub const INTEL_VENDOR: &str = "GenuineIntel";

/// Get the vendor string, e.g. `GenuineIntel`.
///
/// More information at https://en.wikipedia.org/wiki/CPUID.
pub fn get_vendor_string() -> String {
    let mut vendor = [0u8; 12];
    let res = unsafe { __cpuid(0) };
    vendor[0..4].copy_from_slice(&res.ebx.to_ne_bytes());
    vendor[4..8].copy_from_slice(&res.edx.to_ne_bytes());
    vendor[8..12].copy_from_slice(&res.ecx.to_ne_bytes());
    String::from_utf8_lossy(&vendor).into_owned()
}

/// Check if the processor is made by Intel. The uncore ratio MSR is Intel only.
pub fn is_intel() -> bool {
    let vendor = get_vendor_string();
    debug!("Detected x86_64 processor - {}", vendor);
    vendor == INTEL_VENDOR
}
