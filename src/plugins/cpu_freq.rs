//! Core frequency tuning.
//!
//! The plugin owns the cores the process (and every thread reported later) may run on, opens one
//! device per owned core and applies the requested frequency to all of them. The highest
//! frequency found at initialization is recorded as the default and restored by `-1`.

use crate::apply::{self, ApplyReport, RESET_TO_DEFAULT};
use crate::cache::SettingCache;
use crate::config::PluginConfig;
use crate::driver::{DriverKind, DriverProvider, FrequencyDriver, LinuxCoreProvider};
use crate::logging;
use crate::platform::{LinuxPlatform, Platform};
use crate::plugin::{LocationType, TuningActionInfo, TuningPlugin};
use crate::registry::DeviceRegistry;
use crate::tracker::ResponsibilityTracker;
use crate::units::UnitSet;
use crate::{Error, Result};
use log::{debug, info, log, warn};
use std::fmt;

/// Everything acquired by `initialize`.
struct CoreState<D: FrequencyDriver> {
    driver: D,
    registry: DeviceRegistry<D::Device>,
    tracker: ResponsibilityTracker,
    cache: SettingCache<D::Setting>,
    default_freq: Option<i64>,
}

impl<D: FrequencyDriver> fmt::Debug for CoreState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreState")
            .field("driver", &self.driver.name())
            .field("owned", self.tracker.owned())
            .field("prepared", &self.cache.len())
            .field("default_freq", &self.default_freq)
            .finish()
    }
}

/// Tuning plugin for the core frequency (`CPU_FREQ` action, MHz).
#[derive(Debug)]
pub struct CpuFreqPlugin<P: DriverProvider, L: Platform> {
    provider: P,
    platform: L,
    config: PluginConfig,
    state: Option<CoreState<P::Driver>>,
}

impl CpuFreqPlugin<LinuxCoreProvider, LinuxPlatform> {
    /// Plugin over sysfs `cpufreq`, configured from the environment.
    pub fn linux() -> Self {
        CpuFreqPlugin::new(
            LinuxCoreProvider,
            LinuxPlatform,
            PluginConfig::from_env(<Self as TuningPlugin>::NAME),
        )
    }
}

impl<P: DriverProvider, L: Platform> CpuFreqPlugin<P, L> {
    /// Create an uninitialized plugin.
    pub fn new(provider: P, platform: L, config: PluginConfig) -> Self {
        CpuFreqPlugin {
            provider,
            platform,
            config,
            state: None,
        }
    }

    /// Cores the plugin is responsible for, once initialized.
    pub fn owned(&self) -> Option<&UnitSet> {
        self.state.as_ref().map(|s| s.tracker.owned())
    }

    /// Frequency restored by `-1`, in Hz.
    pub fn default_frequency(&self) -> Option<i64> {
        self.state.as_ref().and_then(|s| s.default_freq)
    }

    /// Apply `mhz` to every owned core, or the default frequency for `-1`.
    ///
    /// Fails without touching any core when the setting can not be prepared.
    pub fn set_frequency(&mut self, mhz: i32) -> Result<ApplyReport> {
        let _scope = logging::enter(Self::NAME);
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        let CoreState {
            driver,
            registry,
            tracker,
            cache,
            default_freq,
        } = state;

        let (freq, setting) = if mhz == RESET_TO_DEFAULT {
            let freq = default_freq.ok_or(Error::NoDefault)?;
            warn!("Setting to default frequency = {}", freq);
            match cache.get(freq) {
                Some(setting) => (freq, setting),
                None => {
                    warn!("Could not find default core frequency in prepared frequencies");
                    return Err(Error::NoDefault);
                }
            }
        } else {
            let freq = apply::mhz_to_hz(mhz);
            debug!("setting freq to {}", freq);
            (freq, cache.get_or_prepare(driver, freq)?)
        };

        let owned = tracker.owned();
        Ok(apply::fan_out(
            registry,
            |cpu| owned.contains(cpu),
            |cpu, device| {
                debug!("set cpu {} to {}", cpu, freq);
                driver.apply(device, setting)
            },
        ))
    }

    /// Host setter: `0` or the last failing core's code.
    pub fn set_config(&mut self, mhz: i32) -> i32 {
        match self.set_frequency(mhz) {
            Ok(report) => report.status(),
            Err(e) => {
                warn!("Setting the core frequency failed: {}", e);
                e.code()
            }
        }
    }

    /// Highest frequency over the owned cores in MHz, `0` when nothing could be read.
    pub fn current_config(&mut self) -> i32 {
        let _scope = logging::enter(Self::NAME);
        let state = match self.state.as_ref() {
            Some(state) => state,
            None => return 0,
        };
        let owned = state.tracker.owned();
        let readings: Vec<i64> = apply::collect_readings(&state.registry, |device| {
            state.driver.read_frequency(device)
        });
        debug!("Got {} readings from {} owned cpus", readings.len(), owned.len());
        apply::max_mhz(&readings)
    }
}

impl<P: DriverProvider, L: Platform> TuningPlugin for CpuFreqPlugin<P, L> {
    const NAME: &'static str = "CPU_FREQ";

    fn initialize(&mut self) -> Result<()> {
        let _scope = logging::enter(Self::NAME);
        logging::init_plugin(Self::NAME, module_path!(), &self.config);
        log!(logging::LIFECYCLE, "CPU_FREQ tuning plugin: initializing");

        let kind = DriverKind::CoreFrequency;
        let mut driver = self.provider.acquire(kind).ok_or_else(|| {
            warn!("No interface for {} found", kind);
            Error::Discovery(kind.to_string())
        })?;
        info!("Got the interface {}", driver.name());

        let available_cores = driver.num_devices();
        info!("got {} cpus", available_cores);
        if available_cores == 0 {
            driver.shutdown();
            return Err(Error::Discovery(kind.to_string()));
        }

        let mut registry = DeviceRegistry::new(available_cores);
        let pid = self.platform.current_process();
        let initial = ResponsibilityTracker::initial_ownership(
            &self.platform,
            pid,
            available_cores,
            |cpu| registry.ensure_open(&mut driver, cpu).is_ok(),
        );
        let tracker = match initial {
            Ok((tracker, _)) => tracker,
            Err(e) => {
                registry.close_all(&mut driver);
                driver.shutdown();
                return Err(e);
            }
        };
        info!("responsible for cpus {}", tracker.owned());

        let readings = apply::collect_readings(&registry, |device| driver.read_frequency(device));
        let default_freq = readings.iter().copied().max();
        let mut cache = SettingCache::new();
        match default_freq {
            Some(freq) => {
                debug!("Got default freq = {}", freq);
                if let Err(e) = cache.get_or_prepare(&mut driver, freq) {
                    warn!("Could not prepare default core frequency to {}: {}", freq, e);
                }
            }
            None => warn!("Could not read the default core frequency of any cpu"),
        }

        self.state = Some(CoreState {
            driver,
            registry,
            tracker,
            cache,
            default_freq,
        });
        Ok(())
    }

    fn finalize(&mut self) {
        let _scope = logging::enter(Self::NAME);
        info!("CPU_FREQ tuning plugin: finalizing");
        if let Some(mut state) = self.state.take() {
            state.cache.release_all(&mut state.driver);
            state.registry.close_all(&mut state.driver);
            state.driver.shutdown();
            state.tracker.clear();
        }
    }

    fn create_location(&mut self, kind: LocationType, id: u32) -> Result<()> {
        let _scope = logging::enter(Self::NAME);
        debug!("create_location for location {} with type {}", id, kind);
        if kind != LocationType::CpuThread {
            return Ok(());
        }
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        let CoreState {
            driver,
            registry,
            tracker,
            ..
        } = state;

        let tid = self.platform.current_thread();
        let mut failure = None;
        let registration = tracker.register_new_unit_owner(&self.platform, tid, |cpu| {
            match registry.ensure_open(driver, cpu) {
                Ok(()) => true,
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        })?;
        debug!("cpus in set: {}", tracker.owned());

        match failure {
            Some(e) => {
                warn!(
                    "error during cpu initializing, cpus {:?} not added",
                    registration.rejected
                );
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn tuning_info() -> Vec<TuningActionInfo<Self>> {
        vec![TuningActionInfo::symmetric(
            "CPU_FREQ",
            CpuFreqPlugin::current_config,
            CpuFreqPlugin::set_config,
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeDriver, FakePlatform};

    const GHZ: i64 = 1_000_000_000;

    fn provider(driver: &FakeDriver) -> impl FnMut(DriverKind) -> Option<FakeDriver> {
        let driver = driver.clone();
        move |kind| match kind {
            DriverKind::CoreFrequency => Some(driver.clone()),
            DriverKind::UncoreFrequency => None,
        }
    }

    fn plugin(
        driver: &FakeDriver,
        platform: &FakePlatform,
    ) -> CpuFreqPlugin<impl DriverProvider<Driver = FakeDriver>, FakePlatform> {
        crate::logging::init_for_tests();
        CpuFreqPlugin::new(provider(driver), platform.clone(), PluginConfig::default())
    }

    fn four_cores() -> FakeDriver {
        FakeDriver::new(4).with_frequencies(&[1_800_000_000, 2_200_000_000, 3 * GHZ, 3 * GHZ])
    }

    #[test]
    fn test_applies_to_owned_cores_only() {
        let driver = four_cores();
        let platform = FakePlatform::new(4, &[0, 1]);
        let mut plugin = plugin(&driver, &platform);
        plugin.initialize().unwrap();
        assert_eq!(plugin.current_config(), 2200);

        driver.log().clear();
        assert_eq!(plugin.set_config(2000), 0);
        assert_eq!(driver.log().applied_units(), vec![0, 1]);
        assert_eq!(driver.frequency(2), Some(3 * GHZ));
        assert_eq!(driver.frequency(3), Some(3 * GHZ));
        assert_eq!(plugin.current_config(), 2000);
    }

    #[test]
    fn test_reset_uses_recorded_default() {
        let driver = four_cores();
        let platform = FakePlatform::new(4, &[0, 1]);
        let mut plugin = plugin(&driver, &platform);
        plugin.initialize().unwrap();
        assert_eq!(plugin.default_frequency(), Some(2_200_000_000));

        assert_eq!(plugin.set_config(RESET_TO_DEFAULT), 0);
        let log = driver.log();
        assert_eq!(log.calls_of(|c| matches!(c, Call::Prepare(_))), 1);
        assert_eq!(log.calls_of(|c| matches!(c, Call::Prepare(2_200_000_000))), 1);
        assert_eq!(
            log.calls_of(|c| matches!(c, Call::Apply(_, 2_200_000_000))),
            2
        );
    }

    #[test]
    fn test_same_value_prepared_once() {
        let driver = four_cores();
        let platform = FakePlatform::new(4, &[0, 1, 2, 3]);
        let mut plugin = plugin(&driver, &platform);
        plugin.initialize().unwrap();
        assert_eq!(plugin.set_config(1500), 0);
        assert_eq!(plugin.set_config(1500), 0);
        let log = driver.log();
        assert_eq!(log.calls_of(|c| matches!(c, Call::Prepare(1_500_000_000))), 1);
        assert_eq!(
            log.calls_of(|c| matches!(c, Call::Apply(_, 1_500_000_000))),
            8
        );
    }

    #[test]
    fn test_unpreparable_value_touches_nothing() {
        let driver = four_cores().unpreparable(&[5 * GHZ]);
        let platform = FakePlatform::new(4, &[0, 1]);
        let mut plugin = plugin(&driver, &platform);
        plugin.initialize().unwrap();
        driver.log().clear();

        assert_eq!(plugin.set_config(5000), -1);
        assert_eq!(plugin.set_config(5000), -1);
        assert!(driver.log().applied_units().is_empty());
        assert_eq!(driver.log().calls_of(|c| matches!(c, Call::Prepare(_))), 2);
    }

    #[test]
    fn test_failed_core_is_not_owned() {
        let driver = four_cores().fail_open(&[1]);
        let platform = FakePlatform::new(4, &[0, 1, 2]);
        let mut plugin = plugin(&driver, &platform);
        plugin.initialize().unwrap();
        assert_eq!(plugin.owned().map(|o| o.to_string()), Some(String::from("{0,2}")));

        driver.log().clear();
        assert_eq!(plugin.set_config(2000), 0);
        assert_eq!(driver.log().applied_units(), vec![0, 2]);
    }

    #[test]
    fn test_apply_failure_keeps_going() {
        let driver = four_cores().fail_apply(&[1]);
        let platform = FakePlatform::new(4, &[0, 1, 2]);
        let mut plugin = plugin(&driver, &platform);
        plugin.initialize().unwrap();

        let report = plugin.set_frequency(2000).unwrap();
        assert_eq!(report.units(), vec![0, 1, 2]);
        assert_eq!(report.status(), -nix::libc::EIO);
        assert_eq!(driver.frequency(2), Some(2 * GHZ));
    }

    #[test]
    fn test_new_thread_extends_ownership() {
        let driver = four_cores().fail_open(&[3]);
        let platform = FakePlatform::new(4, &[0, 1]).with_thread(7, &[1, 2, 3]);
        let mut plugin = plugin(&driver, &platform);
        plugin.initialize().unwrap();

        assert!(plugin.create_location(LocationType::Gpu, 3).is_ok());
        assert_eq!(plugin.owned().map(UnitSet::len), Some(2));

        platform.switch_to(7);
        assert!(plugin.create_location(LocationType::CpuThread, 1).is_err());
        assert_eq!(plugin.owned().map(|o| o.to_string()), Some(String::from("{0,1,2}")));

        driver.log().clear();
        assert_eq!(plugin.set_config(1200), 0);
        assert_eq!(driver.log().applied_units(), vec![0, 1, 2]);

        plugin.delete_location(LocationType::CpuThread, 1);
        assert_eq!(plugin.owned().map(UnitSet::len), Some(3));
    }

    #[test]
    fn test_finalize_releases_in_order() {
        let driver = four_cores();
        let platform = FakePlatform::new(4, &[1, 3]);
        let mut plugin = plugin(&driver, &platform);
        plugin.initialize().unwrap();
        plugin.set_config(2000);
        plugin.set_config(2400);
        driver.log().clear();

        plugin.finalize();
        let calls = driver.log().calls();
        let unprepared = calls
            .iter()
            .filter(|c| matches!(c, Call::Unprepare(_)))
            .count();
        assert_eq!(unprepared, 3);
        assert!(calls[..3].iter().all(|c| matches!(c, Call::Unprepare(_))));
        assert_eq!(calls[3..], [Call::Close(1), Call::Close(3), Call::Shutdown]);

        assert_eq!(plugin.set_config(2000), -1);
        assert_eq!(plugin.current_config(), 0);
        plugin.finalize();
        assert_eq!(driver.log().calls().len(), calls.len());
    }

    #[test]
    fn test_discovery_failures() {
        crate::logging::init_for_tests();
        let mut plugin = CpuFreqPlugin::new(
            |_: DriverKind| None::<FakeDriver>,
            FakePlatform::new(4, &[0]),
            PluginConfig::default(),
        );
        match plugin.initialize() {
            Err(Error::Discovery(kind)) => assert_eq!(kind, "CORE FREQ"),
            other => panic!("unexpected {:?}", other),
        }

        let empty = FakeDriver::new(0);
        let mut plugin = plugin_with(&empty, 4);
        assert!(plugin.initialize().is_err());
        assert_eq!(empty.log().calls(), vec![Call::Shutdown]);
    }

    fn plugin_with(
        driver: &FakeDriver,
        cpus: usize,
    ) -> CpuFreqPlugin<impl DriverProvider<Driver = FakeDriver>, FakePlatform> {
        plugin(driver, &FakePlatform::new(cpus, &[0]))
    }

    #[test]
    fn test_tuning_info() {
        let names: Vec<_> = CpuFreqPlugin::<LinuxCoreProvider, LinuxPlatform>::tuning_info()
            .iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["CPU_FREQ"]);
    }
}
