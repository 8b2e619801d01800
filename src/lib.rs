//! Tuning plugins that let a profiling runtime change core and uncore frequencies, the
//! Energy-Performance-Bias, MPI-T control variables and OpenMP parameters while an application
//! runs.
//!
//! Every plugin implements `plugin::TuningPlugin`. The frequency plugins share the building
//! blocks in `tracker`, `registry`, `cache`, `dies` and `apply`, and talk to the hardware through
//! a `driver::FrequencyDriver`.

#![deny(missing_docs, missing_debug_implementations)]

mod errors;
pub use errors::{Error, Result};

pub mod config;
pub mod logging;

pub mod platform;
pub mod units;

pub mod driver;

/// Architecture specific register access.
#[cfg(target_arch = "x86_64")]
#[path = "arch/x86_64/mod.rs"]
pub mod arch;

pub mod apply;
pub mod cache;
pub mod dies;
pub mod registry;
pub mod tracker;

pub mod plugin;
pub mod plugins;

#[cfg(test)]
pub(crate) mod testing;
