//! Lifecycle contract between the host and a tuning plugin.
//!
//! The host loads a plugin, calls `initialize` once, reports every location (thread, GPU
//! stream, metric) it creates, asks for the list of tuning actions and drives them at region
//! entry and exit. All values crossing this boundary are plain integers and every hook returns a
//! status code, `0` for success and negative for errors.

use crate::logging;
use crate::Result;
use derive_more::Display;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Kind of location the host reports.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationType {
    /// A CPU thread. The only kind that changes which units a plugin is responsible for.
    #[display(fmt = "cpu thread")]
    CpuThread,
    /// A GPU stream.
    #[display(fmt = "gpu")]
    Gpu,
    /// A metric location.
    #[display(fmt = "metric")]
    Metric,
}

/// One tunable knob of a plugin.
///
/// `current_config` returns the current value, the two setters apply a value and return a status
/// code.
pub struct TuningActionInfo<P> {
    /// Name of the action as referenced in tuning configurations.
    pub name: &'static str,
    /// Read the current value.
    pub current_config: fn(&mut P) -> i32,
    /// Apply a value when a region is entered.
    pub enter_region_set_config: fn(&mut P, i32) -> i32,
    /// Apply a value when a region is left.
    pub exit_region_set_config: fn(&mut P, i32) -> i32,
}

impl<P> TuningActionInfo<P> {
    /// Action using the same setter for entry and exit.
    pub fn symmetric(
        name: &'static str,
        current_config: fn(&mut P) -> i32,
        set_config: fn(&mut P, i32) -> i32,
    ) -> Self {
        TuningActionInfo {
            name,
            current_config,
            enter_region_set_config: set_config,
            exit_region_set_config: set_config,
        }
    }
}

impl<P> Clone for TuningActionInfo<P> {
    fn clone(&self) -> Self {
        TuningActionInfo {
            name: self.name,
            current_config: self.current_config,
            enter_region_set_config: self.enter_region_set_config,
            exit_region_set_config: self.exit_region_set_config,
        }
    }
}

impl<P> fmt::Debug for TuningActionInfo<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TuningActionInfo")
            .field("name", &self.name)
            .finish()
    }
}

/// Hooks every tuning plugin provides to the host.
pub trait TuningPlugin: Sized {
    /// Plugin name used for configuration variables and log prefixes, e.g. `CPU_FREQ`.
    const NAME: &'static str;

    /// Acquire the hardware or runtime interface. Errors abort plugin activation.
    fn initialize(&mut self) -> Result<()>;

    /// Restore defaults where applicable and release every resource. Never fails.
    fn finalize(&mut self);

    /// A new location was created on the calling thread.
    fn create_location(&mut self, kind: LocationType, id: u32) -> Result<()>;

    /// A location was removed. Ownership is monotonic, so nothing happens by default.
    fn delete_location(&mut self, kind: LocationType, id: u32) {
        log::debug!("delete_location for location {} with type {}", id, kind);
    }

    /// Actions offered by the plugin.
    fn tuning_info() -> Vec<TuningActionInfo<Self>>;
}

/// Host status for `result`.
#[inline]
pub fn status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

/// A plugin whose hooks may be called from several threads.
///
/// Every hook takes the lock, so cache insertion, ownership union and die recomputation never
/// interleave. Hooks run in the plugin's logging scope.
#[derive(Debug)]
pub struct SharedPlugin<P> {
    inner: Mutex<P>,
}

impl<P: TuningPlugin> SharedPlugin<P> {
    /// Wrap `plugin`.
    pub fn new(plugin: P) -> Self {
        SharedPlugin {
            inner: Mutex::new(plugin),
        }
    }

    /// Exclusive access to the plugin. A poisoned lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, P> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// `TuningPlugin::initialize`, as a status code.
    pub fn initialize(&self) -> i32 {
        let _scope = logging::enter(P::NAME);
        status(&self.lock().initialize())
    }

    /// `TuningPlugin::finalize`.
    pub fn finalize(&self) {
        let _scope = logging::enter(P::NAME);
        self.lock().finalize()
    }

    /// `TuningPlugin::create_location`. Failures are logged, the host gets no status.
    pub fn create_location(&self, kind: LocationType, id: u32) {
        let _scope = logging::enter(P::NAME);
        if let Err(e) = self.lock().create_location(kind, id) {
            log::warn!("error during create_location: {}", e);
        }
    }

    /// `TuningPlugin::delete_location`.
    pub fn delete_location(&self, kind: LocationType, id: u32) {
        let _scope = logging::enter(P::NAME);
        self.lock().delete_location(kind, id)
    }

    /// Names of the offered actions.
    pub fn action_names(&self) -> Vec<&'static str> {
        P::tuning_info().iter().map(|a| a.name).collect()
    }

    fn action(name: &str) -> Option<TuningActionInfo<P>> {
        P::tuning_info().into_iter().find(|a| a.name == name)
    }

    /// Current value of action `name`, `None` if there is no such action.
    pub fn current_config(&self, name: &str) -> Option<i32> {
        let _scope = logging::enter(P::NAME);
        let action = SharedPlugin::<P>::action(name)?;
        Some((action.current_config)(&mut self.lock()))
    }

    /// Apply `value` to action `name` on region entry.
    pub fn enter_region(&self, name: &str, value: i32) -> Option<i32> {
        let _scope = logging::enter(P::NAME);
        let action = SharedPlugin::<P>::action(name)?;
        Some((action.enter_region_set_config)(&mut self.lock(), value))
    }

    /// Apply `value` to action `name` on region exit.
    pub fn exit_region(&self, name: &str, value: i32) -> Option<i32> {
        let _scope = logging::enter(P::NAME);
        let action = SharedPlugin::<P>::action(name)?;
        Some((action.exit_region_set_config)(&mut self.lock(), value))
    }

    /// Unwrap the plugin.
    pub fn into_inner(self) -> P {
        match self.inner.into_inner() {
            Ok(plugin) => plugin,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
