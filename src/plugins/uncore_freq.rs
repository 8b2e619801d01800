//! Uncore frequency tuning.
//!
//! One device per die. A die is only tuned when the process owns all of its cores, unless
//! `CHECK_IF_NODE_FULLY_OCCUPIED=0`. The minimum and maximum uncore frequency of every die found
//! at initialization are restored by `-1`.

use crate::apply::{self, ApplyReport, RESET_TO_DEFAULT};
use crate::cache::SettingCache;
use crate::config::PluginConfig;
use crate::dies::{DieGroup, DieLayout};
use crate::driver::{DriverKind, DriverProvider, FrequencyDriver};
use crate::logging;
use crate::platform::Platform;
use crate::plugin::{LocationType, TuningActionInfo, TuningPlugin};
use crate::registry::{DeviceRegistry, OpenPolicy};
use crate::tracker::ResponsibilityTracker;
use crate::units::{PhysicalUnit, UnitSet};
use crate::{Error, Result};
use log::{debug, info, log, warn};
use std::fmt;

struct UncoreState<D: FrequencyDriver> {
    driver: D,
    registry: DeviceRegistry<D::Device>,
    tracker: ResponsibilityTracker,
    cache: SettingCache<D::Setting>,
    dies: DieLayout,
}

impl<D: FrequencyDriver> fmt::Debug for UncoreState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UncoreState")
            .field("driver", &self.driver.name())
            .field("owned", self.tracker.owned())
            .field("prepared", &self.cache.len())
            .field("dies", &self.dies)
            .finish()
    }
}

impl<D: FrequencyDriver> UncoreState<D> {
    /// Read and prepare the default frequencies of every die.
    ///
    /// A die whose frequency can not be read fails the whole call. Failing to prepare a default
    /// is only logged.
    fn record_defaults(&mut self) -> Result<()> {
        let UncoreState {
            driver,
            registry,
            cache,
            dies,
            ..
        } = self;

        let supports_min = driver.supports_min();
        if !supports_min {
            warn!(
                "The interface to get minimum uncore frequency is either not there \
                 or not implemented and the frequency is not considered to be a range"
            );
        }

        for (node, device) in registry.iter() {
            let group = match dies.get_mut(node) {
                Some(group) => group,
                None => continue,
            };

            let max = driver.read_frequency(device).map_err(|e| {
                warn!("Could not get default max uncore frequency for node {}: {}", node, e);
                e
            })?;
            debug!("Default max uncore frequency for node {} is {}", node, max);
            group.default_max = Some(max);
            if cache.get_or_prepare(driver, max).is_err() {
                warn!("Could not prepare default max uncore frequency for node {}", node);
            }

            if supports_min {
                let min = driver.read_min_frequency(device).map_err(|e| {
                    warn!("Could not get min. uncore frequency for node {}: {}", node, e);
                    e
                })?;
                debug!("Default min. uncore frequency for node {} is {}", node, min);
                group.default_min = Some(min);
                if cache.get_or_prepare(driver, min).is_err() {
                    warn!("Could not prepare default min uncore frequency for node {}", node);
                }
            }
        }
        Ok(())
    }

    /// Release settings, devices and the driver, in that order.
    fn release(&mut self) {
        self.cache.release_all(&mut self.driver);
        self.registry.close_all(&mut self.driver);
        self.driver.shutdown();
        self.tracker.clear();
    }
}

/// Restore the recorded defaults of one die.
fn reset_die<D: FrequencyDriver>(
    driver: &D,
    cache: &SettingCache<D::Setting>,
    group: &DieGroup,
    node: PhysicalUnit,
    device: &D::Device,
) -> Result<()> {
    let max = group.default_max.and_then(|f| cache.get(f)).ok_or_else(|| {
        warn!("Could not find default max uncore frequency in prepared frequencies");
        Error::NoDefault
    })?;
    driver.apply(device, max)?;
    debug!(
        "setting default max uncore frequency {:?} (node: {})",
        group.default_max, node
    );

    if !driver.supports_min() {
        info!(
            "The interface to set minimum uncore frequency is either not there \
             or not implemented and the frequency is not considered to be a range"
        );
        return Ok(());
    }
    let min = group.default_min.and_then(|f| cache.get(f)).ok_or_else(|| {
        warn!("Could not find default min uncore frequency in prepared frequencies");
        Error::NoDefault
    })?;
    driver.apply_min(device, min)?;
    info!(
        "setting default min uncore frequency {:?} (node: {})",
        group.default_min, node
    );
    Ok(())
}

/// Tuning plugin for the uncore frequency (`UNCORE_FREQ` action, MHz).
#[derive(Debug)]
pub struct UncoreFreqPlugin<P: DriverProvider, L: Platform> {
    provider: P,
    platform: L,
    config: PluginConfig,
    state: Option<UncoreState<P::Driver>>,
}

#[cfg(target_arch = "x86_64")]
impl UncoreFreqPlugin<crate::driver::LinuxUncoreProvider, crate::platform::LinuxPlatform> {
    /// Plugin over the uncore ratio MSR, configured from the environment.
    pub fn linux() -> Self {
        UncoreFreqPlugin::new(
            crate::driver::LinuxUncoreProvider,
            crate::platform::LinuxPlatform,
            PluginConfig::from_env(<Self as TuningPlugin>::NAME),
        )
    }
}

impl<P: DriverProvider, L: Platform> UncoreFreqPlugin<P, L> {
    /// Create an uninitialized plugin.
    pub fn new(provider: P, platform: L, config: PluginConfig) -> Self {
        UncoreFreqPlugin {
            provider,
            platform,
            config,
            state: None,
        }
    }

    /// Cores the process is responsible for, once initialized.
    pub fn owned(&self) -> Option<&UnitSet> {
        self.state.as_ref().map(|s| s.tracker.owned())
    }

    /// Die layout with ownership and defaults, once initialized.
    pub fn dies(&self) -> Option<&DieLayout> {
        self.state.as_ref().map(|s| &s.dies)
    }

    /// Acquire a driver whose devices all open.
    ///
    /// A driver with a failing device is shut down and a new one is acquired, until the provider
    /// runs out of drivers or the configured number of attempts is reached.
    fn discover(&mut self) -> Result<(P::Driver, DeviceRegistry<<P::Driver as FrequencyDriver>::Device>)> {
        let kind = DriverKind::UncoreFrequency;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut driver = self.provider.acquire(kind).ok_or_else(|| {
                warn!("No interface for {} found", kind);
                Error::Discovery(kind.to_string())
            })?;
            debug!("Got the interface {}", driver.name());

            let count = driver.num_devices();
            match DeviceRegistry::open_all(&mut driver, count, OpenPolicy::AbortOnFailure) {
                Ok((registry, _)) if count > 0 => {
                    debug!("got {} devices", count);
                    return Ok((driver, registry));
                }
                Ok(_) => {
                    driver.shutdown();
                    return Err(Error::Discovery(kind.to_string()));
                }
                Err(e) => {
                    warn!("Got error no: {} {}", e.code(), e);
                    driver.shutdown();
                    if let Some(max) = self.config.max_discovery_attempts {
                        if attempt >= max {
                            warn!("Giving up after {} attempts", attempt);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Apply `mhz` to every eligible die, or restore the recorded defaults for `-1`.
    ///
    /// Dies that fail are reported and the remaining dies are still tuned.
    pub fn set_frequency(&mut self, mhz: i32) -> Result<ApplyReport> {
        let _scope = logging::enter(Self::NAME);
        let check_fully_occupied = self.config.check_fully_occupied;
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        let UncoreState {
            driver,
            registry,
            cache,
            dies,
            ..
        } = state;

        let eligible = |node: PhysicalUnit| {
            !check_fully_occupied || dies.get(node).map_or(false, DieGroup::is_fully_owned)
        };

        if mhz == RESET_TO_DEFAULT {
            return Ok(apply::fan_out(registry, eligible, |node, device| {
                let group = dies.get(node).ok_or(Error::NoDefault)?;
                reset_die(&*driver, &*cache, group, node, device)
            }));
        }

        let freq = apply::mhz_to_hz(mhz);
        info!("setting freq to {}", freq);
        let setting = cache.get_or_prepare(driver, freq)?;
        Ok(apply::fan_out(registry, eligible, |node, device| {
            driver.apply(device, setting)?;
            info!("setting uncore frequency {} (node: {})", freq, node);
            Ok(())
        }))
    }

    /// Host setter: `0` or the last failing die's code.
    pub fn set_config(&mut self, mhz: i32) -> i32 {
        match self.set_frequency(mhz) {
            Ok(report) => report.status(),
            Err(e) => {
                warn!("Setting the uncore frequency failed: {}", e);
                e.code()
            }
        }
    }

    /// Average uncore frequency over all dies in MHz, `0` when nothing could be read.
    pub fn current_config(&mut self) -> i32 {
        let _scope = logging::enter(Self::NAME);
        match self.state.as_ref() {
            Some(state) => {
                let readings =
                    apply::collect_readings(&state.registry, |device| state.driver.read_frequency(device));
                apply::average_mhz(&readings)
            }
            None => 0,
        }
    }
}

impl<P: DriverProvider, L: Platform> TuningPlugin for UncoreFreqPlugin<P, L> {
    const NAME: &'static str = "UNCORE_FREQ";

    fn initialize(&mut self) -> Result<()> {
        let _scope = logging::enter(Self::NAME);
        logging::init_plugin(Self::NAME, module_path!(), &self.config);
        log!(logging::LIFECYCLE, "UNCORE_FREQ tuning plugin: initializing");

        let (mut driver, mut registry) = self.discover()?;
        let setup = self.platform.online_cpus().and_then(|cores| {
            debug!("got {} cpus", cores);
            let dies = DieLayout::new(registry.len(), cores)?;
            info!(
                "assuming {} cores per device (processor die)",
                dies.cores_per_die()
            );
            let tid = self.platform.current_thread();
            let (tracker, _) =
                ResponsibilityTracker::initial_ownership(&self.platform, tid, cores, |_| true)?;
            Ok((dies, tracker))
        });
        let (dies, tracker) = match setup {
            Ok(setup) => setup,
            Err(e) => {
                registry.close_all(&mut driver);
                driver.shutdown();
                return Err(e);
            }
        };

        let mut state = UncoreState {
            driver,
            registry,
            tracker,
            cache: SettingCache::new(),
            dies,
        };
        state.dies.recompute(state.tracker.owned());
        if let Err(e) = state.record_defaults() {
            state.release();
            return Err(e);
        }
        self.state = Some(state);
        Ok(())
    }

    fn finalize(&mut self) {
        let _scope = logging::enter(Self::NAME);
        info!("UNCORE_FREQ tuning plugin: finalizing");
        if let Some(mut state) = self.state.take() {
            state.release();
        }
    }

    fn create_location(&mut self, kind: LocationType, id: u32) -> Result<()> {
        let _scope = logging::enter(Self::NAME);
        debug!("create_location for location {} with type {}", id, kind);
        if kind != LocationType::CpuThread {
            return Ok(());
        }
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        let tid = self.platform.current_thread();
        state
            .tracker
            .register_new_unit_owner(&self.platform, tid, |_| true)?;
        debug!("cpus in set: {}", state.tracker.owned());

        let violations = state.dies.recompute(state.tracker.owned());
        if !violations.is_empty() {
            warn!("Won't tune the uncore of dies {:?}", violations);
        }
        Ok(())
    }

    fn tuning_info() -> Vec<TuningActionInfo<Self>> {
        vec![TuningActionInfo::symmetric(
            "UNCORE_FREQ",
            UncoreFreqPlugin::current_config,
            UncoreFreqPlugin::set_config,
        )]
    }
}
