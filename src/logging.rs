//! Log backend used by the plugins.
//!
//! The host loads plugins as shared objects and does not install a `log` backend for them. The
//! first plugin to initialize installs a single `env_logger` based router, and every plugin then
//! registers its own verbosity with it. A record belongs to a plugin when its target is the plugin
//! name or lies in the plugin's module, otherwise to the plugin whose `Scope` is active on the
//! emitting thread. Lines are prefixed with `[PLUGIN_NAME]`.

use crate::config::{PluginConfig, Verbosity};
use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Once, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Level of lifecycle messages, shown at every verbosity.
pub const LIFECYCLE: Level = Level::Error;

struct Registration {
    name: &'static str,
    module: &'static str,
    filter: LevelFilter,
}

lazy_static! {
    static ref PLUGINS: RwLock<Vec<Registration>> = RwLock::new(Vec::new());
}

static INSTALL: Once = Once::new();
static INSTALLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static CURRENT: Cell<Option<&'static str>> = Cell::new(None);
}

#[cfg(test)]
thread_local! {
    static CAPTURED: std::cell::RefCell<Option<Vec<String>>> = std::cell::RefCell::new(None);
}

fn plugins() -> RwLockReadGuard<'static, Vec<Registration>> {
    match PLUGINS.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn plugins_mut() -> RwLockWriteGuard<'static, Vec<Registration>> {
    match PLUGINS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Name and filter of the plugin a record with `target` belongs to.
fn owner(target: &str) -> Option<(&'static str, LevelFilter)> {
    let plugins = plugins();
    let current = CURRENT.try_with(Cell::get).ok().flatten();
    plugins
        .iter()
        .find(|p| target == p.name || target.starts_with(p.module))
        .or_else(|| current.and_then(|name| plugins.iter().find(|p| p.name == name)))
        .map(|p| (p.name, p.filter))
}

fn prefix(target: &str) -> &str {
    match owner(target) {
        Some((name, _)) => name,
        None => target.rsplit("::").next().unwrap_or(target),
    }
}

/// Filters by the owning plugin's verbosity, then hands the record to `env_logger`.
struct Router {
    inner: env_logger::Logger,
}

impl Log for Router {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        let filter = owner(metadata.target())
            .map_or_else(|| Verbosity::default().level_filter(), |(_, filter)| filter);
        metadata.level() <= filter
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.inner.log(record);
        #[cfg(test)]
        {
            let line = format!("[{}] {}", prefix(record.target()), record.args());
            let _ = CAPTURED.try_with(|c| {
                if let Some(lines) = c.borrow_mut().as_mut() {
                    lines.push(line);
                }
            });
        }
    }

    fn flush(&self) {
        self.inner.flush()
    }
}

fn install() {
    let inner = env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .format(|buf, record| writeln!(buf, "[{}] {}", prefix(record.target()), record.args()))
        .is_test(cfg!(test))
        .build();
    if log::set_boxed_logger(Box::new(Router { inner })).is_ok() {
        INSTALLED.store(true, Ordering::SeqCst);
    }
}

/// Register `plugin`, whose code lives below `module`, with the filter derived from `verbosity`.
///
/// Installs the backend on first use. Returns `false` when `plugin` was registered before; its
/// verbosity is replaced.
pub fn init(plugin: &'static str, module: &'static str, verbosity: Verbosity) -> bool {
    INSTALL.call_once(install);
    let filter = verbosity.level_filter();
    let mut plugins = plugins_mut();
    let fresh = match plugins.iter_mut().find(|p| p.name == plugin) {
        Some(registration) => {
            registration.module = module;
            registration.filter = filter;
            false
        }
        None => {
            plugins.push(Registration {
                name: plugin,
                module,
                filter,
            });
            true
        }
    };
    if INSTALLED.load(Ordering::SeqCst) {
        let max = plugins
            .iter()
            .map(|p| p.filter)
            .fold(Verbosity::default().level_filter(), std::cmp::max);
        log::set_max_level(max);
    }
    fresh
}

/// `init` with the plugin's configuration, then log what came up while reading it.
pub fn init_plugin(plugin: &'static str, module: &'static str, config: &PluginConfig) {
    init(plugin, module, config.verbosity);
    for diagnostic in &config.diagnostics {
        log::log!(target: plugin, diagnostic.level, "{}", diagnostic.message);
    }
}

/// Attributes records emitted on this thread to a plugin until dropped.
#[derive(Debug)]
pub struct Scope {
    previous: Option<&'static str>,
}

/// Enter the scope of `plugin` on the calling thread.
pub fn enter(plugin: &'static str) -> Scope {
    let previous = CURRENT.with(|c| c.replace(Some(plugin)));
    Scope { previous }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let previous = self.previous;
        let _ = CURRENT.try_with(|c| c.set(previous));
    }
}

/// Install the backend for unit tests.
#[cfg(test)]
pub(crate) fn init_for_tests() {
    INSTALL.call_once(install);
}

/// Lines logged on the calling thread while `f` runs.
#[cfg(test)]
pub(crate) fn capture<F: FnOnce()>(f: F) -> Vec<String> {
    init_for_tests();
    CAPTURED.with(|c| *c.borrow_mut() = Some(Vec::new()));
    f();
    CAPTURED.with(|c| c.borrow_mut().take().unwrap_or_default())
}
