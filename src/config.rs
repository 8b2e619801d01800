//! Environment sourced plugin configuration.
//!
//! Every value is read once, when a plugin is constructed, and stays fixed for the lifetime of
//! the process. No logger is installed at that point, so problems found while reading are kept
//! as `Diagnostic`s and logged once the plugin initializes.

use derive_more::Display;
use log::{Level, LevelFilter};

/// Name of the variable enabling the "fully occupied die" policy of the uncore plugin.
pub const CHECK_FULLY_OCCUPIED_VAR: &str = "CHECK_IF_NODE_FULLY_OCCUPIED";

/// Verbosity of a plugin's log output.
///
/// Ordered from least to most chatty.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Only messages every user wants to see.
    #[display(fmt = "VERBOSE")]
    Verbose,
    /// Warnings, the default.
    #[display(fmt = "WARN")]
    Warn,
    /// Informational messages.
    #[display(fmt = "INFO")]
    Info,
    /// Everything.
    #[display(fmt = "DEBUG")]
    Debug,
    /// The variable held something unknown. Filters like `Warn`.
    #[display(fmt = "INVALID")]
    Invalid,
}

impl Verbosity {
    /// Parse the value of a `*_PLUGIN_VERBOSE` variable.
    ///
    /// Unset values yield `Warn`, unknown ones `Invalid`.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            None | Some("WARN") => Verbosity::Warn,
            Some("DEBUG") => Verbosity::Debug,
            Some("INFO") => Verbosity::Info,
            Some("VERBOSE") => Verbosity::Verbose,
            Some(_) => Verbosity::Invalid,
        }
    }

    /// Filter handed to the logging backend.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Verbose => LevelFilter::Error,
            Verbosity::Warn | Verbosity::Invalid => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Warn
    }
}

/// A message produced while reading the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Level to log the message at.
    pub level: Level,
    /// The message.
    pub message: String,
}

impl Diagnostic {
    fn new(level: Level, message: String) -> Self {
        Diagnostic { level, message }
    }
}

/// Configuration shared by all tuning plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Log verbosity of this plugin.
    pub verbosity: Verbosity,
    /// Only tune uncore domains whose cores are all owned by this process.
    pub check_fully_occupied: bool,
    /// Upper bound on interface acquisition attempts. `None` retries until an interface works.
    pub max_discovery_attempts: Option<u32>,
    /// Deferred log messages, see `logging::init_plugin`.
    pub diagnostics: Vec<Diagnostic>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            verbosity: Verbosity::Warn,
            check_fully_occupied: true,
            max_discovery_attempts: None,
            diagnostics: Vec::new(),
        }
    }
}

impl PluginConfig {
    /// Name of the verbosity variable for `plugin`, e.g. `SCOREP_TUNING_CPU_FREQ_PLUGIN_VERBOSE`.
    pub fn verbosity_var(plugin: &str) -> String {
        format!("SCOREP_TUNING_{}_PLUGIN_VERBOSE", plugin)
    }

    /// Name of the discovery cap variable for `plugin`.
    pub fn discovery_attempts_var(plugin: &str) -> String {
        format!("SCOREP_TUNING_{}_PLUGIN_MAX_DISCOVERY_ATTEMPTS", plugin)
    }

    /// Read the configuration of `plugin` from the process environment.
    pub fn from_env(plugin: &str) -> Self {
        PluginConfig::from_lookup(plugin, |key| std::env::var(key).ok())
    }

    /// Build the configuration of `plugin` from an arbitrary key lookup.
    pub fn from_lookup<F>(plugin: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut diagnostics = Vec::new();
        let verbosity_var = PluginConfig::verbosity_var(plugin);
        let verbosity_val = lookup(&verbosity_var);
        let verbosity = Verbosity::parse(verbosity_val.as_deref());
        if verbosity == Verbosity::Invalid {
            diagnostics.push(Diagnostic::new(
                Level::Warn,
                format!(
                    "Unknown verbosity {:?} in {}, using WARN",
                    verbosity_val.unwrap_or_default(),
                    verbosity_var
                ),
            ));
        }

        let check_fully_occupied = match lookup(CHECK_FULLY_OCCUPIED_VAR) {
            None => true,
            Some(val) => match val.trim().parse::<i32>() {
                Ok(1) => {
                    diagnostics.push(Diagnostic::new(
                        Level::Info,
                        format!(
                            "{} is enabled. Uncore frequency only set when all the cores on the node are occupied",
                            CHECK_FULLY_OCCUPIED_VAR
                        ),
                    ));
                    true
                }
                Ok(0) => false,
                _ => {
                    diagnostics.push(Diagnostic::new(
                        Level::Warn,
                        format!(
                            "Could not parse the value provided. {} should be set to 0 or 1",
                            CHECK_FULLY_OCCUPIED_VAR
                        ),
                    ));
                    false
                }
            },
        };

        let max_discovery_attempts = lookup(&PluginConfig::discovery_attempts_var(plugin))
            .and_then(|val| match val.trim().parse::<u32>() {
                Ok(0) | Err(_) => {
                    diagnostics.push(Diagnostic::new(
                        Level::Warn,
                        format!("Ignoring invalid discovery attempt limit {:?}", val),
                    ));
                    None
                }
                Ok(n) => Some(n),
            });

        PluginConfig {
            verbosity,
            check_fully_occupied,
            max_discovery_attempts,
            diagnostics,
        }
    }
}
