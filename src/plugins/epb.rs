//! Energy-Performance-Bias tuning (`EPB` action).
//!
//! The EPB is a 4 bit hint per CPU, `0` asking for maximum performance and `15` for maximum
//! energy saving.

use crate::config::PluginConfig;
use crate::logging;
use crate::plugin::{self, LocationType, TuningActionInfo, TuningPlugin};
use crate::{Error, Result};
use log::{debug, info, log, warn};

/// Highest EPB value.
pub const EPB_MAX: i32 = 15;

/// Per CPU access to the EPB register.
pub trait EpbRegisters {
    /// Make the registers accessible.
    fn init(&mut self) -> Result<()>;

    /// Number of CPUs with an EPB register.
    fn num_devices(&self) -> usize;

    /// Read the EPB of the `cpu`th device.
    fn read(&mut self, cpu: usize) -> Result<u64>;

    /// Write the EPB of the `cpu`th device.
    fn write(&mut self, cpu: usize, value: u64) -> Result<()>;

    /// Release the registers.
    fn finalize(&mut self) {}
}

/// `EpbRegisters` over `IA32_ENERGY_PERF_BIAS` through the `msr` device files.
#[cfg(target_arch = "x86_64")]
#[derive(Debug)]
pub struct MsrEpb {
    root: std::path::PathBuf,
    handles: Vec<crate::arch::MsrHandle>,
}

#[cfg(target_arch = "x86_64")]
mod msr_epb {
    use super::{EpbRegisters, MsrEpb};
    use crate::arch::{MsrAddress, MsrHandle, MSR_DEVICE_ROOT};
    use crate::{Error, Result};
    use lazy_static::lazy_static;
    use log::debug;
    use regex::Regex;
    use std::path::PathBuf;

    lazy_static! {
        static ref MSR_DIR: Regex = Regex::new(r"/(\d+)/msr$").unwrap();
    }

    const EPB_MASK: u64 = 0xf;

    impl Default for MsrEpb {
        fn default() -> Self {
            MsrEpb::with_root(MSR_DEVICE_ROOT)
        }
    }

    impl MsrEpb {
        /// Registers below `root`, usually `/dev/cpu`.
        pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
            MsrEpb {
                root: root.into(),
                handles: Vec::new(),
            }
        }

        fn handle(&self, cpu: usize) -> Result<&MsrHandle> {
            self.handles.get(cpu).ok_or(Error::InvalidValue {
                value: cpu as i64,
                reason: "no such EPB device",
            })
        }
    }

    impl EpbRegisters for MsrEpb {
        fn init(&mut self) -> Result<()> {
            let mut cpus = Vec::new();
            for entry in glob::glob(&format!("{}/[0-9]*/msr", self.root.display()))? {
                let path = entry?;
                let cpu = path
                    .to_str()
                    .and_then(|p| MSR_DIR.captures(p))
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<usize>().ok());
                if let Some(cpu) = cpu {
                    cpus.push(cpu);
                }
            }
            cpus.sort();
            self.handles = cpus
                .into_iter()
                .map(|cpu| MsrHandle::open_in(&self.root, cpu))
                .collect::<Result<Vec<_>>>()?;
            debug!("opened {} msr devices", self.handles.len());
            if self.handles.is_empty() {
                return Err(Error::Discovery(String::from("EPB")));
            }
            Ok(())
        }

        fn num_devices(&self) -> usize {
            self.handles.len()
        }

        fn read(&mut self, cpu: usize) -> Result<u64> {
            Ok(self.handle(cpu)?.read(MsrAddress::IA32_ENERGY_PERF_BIAS)? & EPB_MASK)
        }

        fn write(&mut self, cpu: usize, value: u64) -> Result<()> {
            let handle = self.handle(cpu)?;
            let raw = handle.read(MsrAddress::IA32_ENERGY_PERF_BIAS)?;
            handle.write(
                MsrAddress::IA32_ENERGY_PERF_BIAS,
                (raw & !EPB_MASK) | (value & EPB_MASK),
            )
        }

        fn finalize(&mut self) {
            self.handles.clear();
        }
    }
}

/// Tuning plugin for the Energy-Performance-Bias.
#[derive(Debug)]
pub struct EpbPlugin<R> {
    registers: R,
    config: PluginConfig,
}

#[cfg(target_arch = "x86_64")]
impl EpbPlugin<MsrEpb> {
    /// Plugin over the EPB MSR, configured from the environment.
    pub fn linux() -> Self {
        EpbPlugin::new(MsrEpb::default(), PluginConfig::from_env("EPB"))
    }
}

impl<R: EpbRegisters> EpbPlugin<R> {
    /// Create an uninitialized plugin.
    pub fn new(registers: R, config: PluginConfig) -> Self {
        EpbPlugin { registers, config }
    }

    /// The register back end.
    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// Write `value` to every CPU, stopping at the first one that fails.
    pub fn set_epb(&mut self, value: i32) -> Result<()> {
        if value < 0 || value > EPB_MAX {
            warn!("Invalid EPB value {}", value);
            return Err(Error::InvalidValue {
                value: i64::from(value),
                reason: "EPB has to be between 0 and 15",
            });
        }
        for cpu in 0..self.registers.num_devices() {
            let old = self.registers.read(cpu).map_err(|e| {
                warn!("Could not get epb for node {}", cpu);
                e
            })?;
            self.registers.write(cpu, value as u64).map_err(|e| {
                warn!("Could not set epb for node {}", cpu);
                e
            })?;
            info!("setting epb from {} to {} (node: {})", old, value, cpu);
        }
        Ok(())
    }

    /// Host setter.
    pub fn set_config(&mut self, value: i32) -> i32 {
        plugin::status(&self.set_epb(value))
    }

    /// Integer average EPB over the CPUs that could be read, `0` if none.
    pub fn current_config(&mut self) -> i32 {
        let mut sum: u64 = 0;
        let mut count: u64 = 0;
        for cpu in 0..self.registers.num_devices() {
            match self.registers.read(cpu) {
                Ok(epb) => {
                    sum += epb;
                    count += 1;
                }
                Err(e) => warn!("Could not get epb for node {}: {}", cpu, e),
            }
        }
        if count > 1 {
            (sum / count) as i32
        } else {
            sum as i32
        }
    }
}

impl<R: EpbRegisters> TuningPlugin for EpbPlugin<R> {
    const NAME: &'static str = "EPB";

    fn initialize(&mut self) -> Result<()> {
        let _scope = logging::enter(Self::NAME);
        logging::init_plugin(Self::NAME, module_path!(), &self.config);
        log!(logging::LIFECYCLE, "EPB tuning plugin: initializing");
        match self.registers.init() {
            Ok(()) => debug!("found {} EPB registers", self.registers.num_devices()),
            Err(e) => warn!("Could not initialize the EPB registers: {}", e),
        }
        Ok(())
    }

    fn finalize(&mut self) {
        self.registers.finalize();
        info!("EPB tuning plugin: finalizing");
    }

    fn create_location(&mut self, _kind: LocationType, _id: u32) -> Result<()> {
        Ok(())
    }

    fn tuning_info() -> Vec<TuningActionInfo<Self>> {
        vec![TuningActionInfo::symmetric(
            "EPB",
            EpbPlugin::current_config,
            EpbPlugin::set_config,
        )]
    }
}
