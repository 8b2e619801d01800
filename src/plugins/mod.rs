//! The tuning plugins.

pub mod cpu_freq;
pub mod epb;
pub mod mpit;
pub mod openmp;
pub mod uncore_freq;

pub use cpu_freq::CpuFreqPlugin;
pub use epb::EpbPlugin;
pub use mpit::MpitPlugin;
pub use openmp::OpenMpPlugin;
pub use uncore_freq::UncoreFreqPlugin;
