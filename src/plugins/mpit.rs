//! Changing MPI tool interface (MPI-T) control variables (`MPIR_CVAR_REDUCE_SHORT_MSG_SIZE`
//! action).
//!
//! The MPI-T ABI differs between MPI implementations, so the calls themselves sit behind
//! `CvarInterface`. This module adds the name lookup, the support check and the readback.

use crate::config::PluginConfig;
use crate::logging;
use crate::plugin::{LocationType, TuningActionInfo, TuningPlugin};
use crate::{Error, Result};
use derive_more::Display;
use log::{debug, info, warn};
use std::collections::HashMap;

/// Name of the control variable the plugin tunes.
pub const REDUCE_SHORT_MSG_SIZE: &str = "MPIR_CVAR_REDUCE_SHORT_MSG_SIZE";

/// Datatype of a control variable.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Datatype {
    #[display(fmt = "MPI_INT")]
    Int,
    #[display(fmt = "MPI_UNSIGNED")]
    Unsigned,
    #[display(fmt = "MPI_UNSIGNED_LONG")]
    UnsignedLong,
    #[display(fmt = "MPI_UNSIGNED_LONG_LONG")]
    UnsignedLongLong,
    #[display(fmt = "MPI_COUNT")]
    Count,
    #[display(fmt = "MPI_CHAR")]
    Char,
    #[display(fmt = "MPI_DOUBLE")]
    Double,
    /// Any datatype the back end could not map.
    #[display(fmt = "unknown data type")]
    Other,
}

/// MPI object a control variable is bound to.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Bind {
    #[display(fmt = "MPI_T_BIND_NO_OBJECT")]
    NoObject,
    #[display(fmt = "MPI_T_BIND_MPI_COMM")]
    Comm,
    #[display(fmt = "MPI_T_BIND_MPI_DATATYPE")]
    Datatype,
    #[display(fmt = "MPI_T_BIND_MPI_ERRHANDLER")]
    Errhandler,
    #[display(fmt = "MPI_T_BIND_MPI_FILE")]
    File,
    #[display(fmt = "MPI_T_BIND_MPI_GROUP")]
    Group,
    #[display(fmt = "MPI_T_BIND_MPI_OP")]
    Op,
    #[display(fmt = "MPI_T_BIND_MPI_REQUEST")]
    Request,
    #[display(fmt = "MPI_T_BIND_MPI_WIN")]
    Win,
    #[display(fmt = "MPI_T_BIND_MPI_MESSAGE")]
    Message,
    #[display(fmt = "MPI_T_BIND_MPI_INFO")]
    Info,
    #[display(fmt = "Unknown")]
    Other,
}

/// Scope of a control variable.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Scope {
    #[display(fmt = "MPI_T_SCOPE_CONSTANT")]
    Constant,
    #[display(fmt = "MPI_T_SCOPE_READONLY")]
    Readonly,
    #[display(fmt = "MPI_T_SCOPE_LOCAL")]
    Local,
    #[display(fmt = "MPI_T_SCOPE_GROUP")]
    Group,
    #[display(fmt = "MPI_T_SCOPE_GROUP_EQ")]
    GroupEq,
    #[display(fmt = "MPI_T_SCOPE_ALL")]
    All,
    #[display(fmt = "MPI_T_SCOPE_ALL_EQ")]
    AllEq,
    #[display(fmt = "unknown")]
    Other,
}

/// Description of one control variable, as returned by `MPI_T_cvar_get_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvarInfo {
    /// Variable name.
    pub name: String,
    /// Value type.
    pub datatype: Datatype,
    /// Object binding.
    pub bind: Bind,
    /// Scope.
    pub scope: Scope,
    /// Enumeration handle, if the variable is an enumeration.
    pub enumtype: Option<usize>,
}

impl CvarInfo {
    /// Check if the value can be changed through a single integer without an object handle.
    pub fn is_plain_int(&self) -> bool {
        self.bind == Bind::NoObject && self.datatype == Datatype::Int && self.enumtype.is_none()
    }
}

/// The MPI-T calls used by this plugin.
///
/// Failing calls return `Error::Mpit` with the name of the MPI-T error code as `what`.
pub trait CvarInterface {
    /// `MPI_T_init_thread` with `MPI_THREAD_SINGLE`.
    fn init_thread(&mut self) -> Result<()>;

    /// `MPI_T_finalize`.
    fn finalize(&mut self) -> Result<()>;

    /// `MPI_T_cvar_get_num`.
    fn num_cvars(&mut self) -> Result<usize>;

    /// `MPI_T_cvar_get_info`.
    fn cvar_info(&mut self, index: usize) -> Result<CvarInfo>;

    /// Name of enumeration `enumtype` (`MPI_T_enum_get_info`).
    fn enum_name(&mut self, enumtype: usize) -> Result<String>;

    /// Read a single integer variable without object binding.
    fn read_int(&mut self, index: usize) -> Result<i32>;

    /// Write a single integer variable without object binding.
    fn write_int(&mut self, index: usize, value: i32) -> Result<()>;
}

/// Name based access to control variables.
///
/// The tool interface is initialized on construction and finalized on drop.
#[derive(Debug)]
pub struct MpitValues<C: CvarInterface> {
    interface: C,
    indices: HashMap<String, usize>,
    finalized: bool,
}

impl<C: CvarInterface> MpitValues<C> {
    /// Initialize the tool interface.
    pub fn new(mut interface: C) -> Result<Self> {
        interface.init_thread()?;
        Ok(MpitValues {
            interface,
            indices: HashMap::new(),
            finalized: false,
        })
    }

    /// Index of the control variable `name`. Found indices are remembered.
    pub fn cvar_by_name(&mut self, name: &str) -> Result<usize> {
        if let Some(&index) = self.indices.get(name) {
            return Ok(index);
        }
        for index in 0..self.interface.num_cvars()? {
            let info = self.interface.cvar_info(index)?;
            if info.name == name {
                debug!(
                    "found cvar {} at index {} (scope {})",
                    name, index, info.scope
                );
                self.indices.insert(info.name, index);
                return Ok(index);
            }
        }
        Err(Error::CvarNotFound(String::from(name)))
    }

    /// Write `value` to the variable at `index` and return the previous value.
    ///
    /// Only plain integer variables are supported. The written value is read back and a
    /// mismatch is logged.
    pub fn change_variable(&mut self, index: usize, value: i32) -> Result<i32> {
        let info = self.interface.cvar_info(index)?;
        if !info.is_plain_int() {
            let enumtype = match info.enumtype {
                Some(e) if info.datatype == Datatype::Int => self.interface.enum_name(e)?,
                _ => String::from("empty"),
            };
            return Err(Error::Mpit {
                what: format!(
                    "error: Not supported: Bind: {} Datatype: {} Enumtype: {} for parameter {}",
                    info.bind, info.datatype, enumtype, info.name
                ),
                code: -1,
            });
        }
        let old = self.interface.read_int(index)?;
        self.interface.write_int(index, value)?;
        let current = self.interface.read_int(index)?;
        if current != value {
            warn!(
                "{} did not take value {}, it is {} now",
                info.name, value, current
            );
        }
        Ok(old)
    }

    /// `change_variable` for the variable called `name`.
    pub fn change_by_name(&mut self, name: &str, value: i32) -> Result<i32> {
        let index = self.cvar_by_name(name)?;
        self.change_variable(index, value)
    }

    /// Current value of the variable called `name`.
    pub fn read_by_name(&mut self, name: &str) -> Result<i32> {
        let index = self.cvar_by_name(name)?;
        self.interface.read_int(index)
    }

    /// Finalize the tool interface. Later calls do nothing.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        self.interface.finalize()
    }
}

impl<C: CvarInterface> Drop for MpitValues<C> {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!("MPI_T_finalize: {}", e);
        }
    }
}

/// Tuning plugin for MPI-T control variables.
#[derive(Debug)]
pub struct MpitPlugin<C: CvarInterface> {
    interface: Option<C>,
    values: Option<MpitValues<C>>,
    config: PluginConfig,
}

impl<C: CvarInterface> MpitPlugin<C> {
    /// Create an uninitialized plugin over `interface`.
    pub fn new(interface: C, config: PluginConfig) -> Self {
        MpitPlugin {
            interface: Some(interface),
            values: None,
            config,
        }
    }

    fn values(&mut self) -> Result<&mut MpitValues<C>> {
        self.values.as_mut().ok_or(Error::NotInitialized)
    }

    /// Set `MPIR_CVAR_REDUCE_SHORT_MSG_SIZE`, returning `-1` if the variable does not exist.
    pub fn set_reduce_short_msg_size(&mut self, value: i32) -> i32 {
        match self.values().and_then(|v| v.change_by_name(REDUCE_SHORT_MSG_SIZE, value)) {
            Ok(old) => {
                debug!(
                    "MPIT tuning plugin: setting \"{}\" from {} to {}",
                    REDUCE_SHORT_MSG_SIZE, old, value
                );
                0
            }
            Err(e @ Error::CvarNotFound(_)) => {
                warn!("MPIT tuning plugin: {}", e);
                -1
            }
            Err(e) => {
                warn!("MPIT tuning plugin: {}", e);
                e.code()
            }
        }
    }

    /// Current `MPIR_CVAR_REDUCE_SHORT_MSG_SIZE`, `0` if it cannot be read.
    pub fn reduce_short_msg_size(&mut self) -> i32 {
        match self.values().and_then(|v| v.read_by_name(REDUCE_SHORT_MSG_SIZE)) {
            Ok(value) => value,
            Err(e) => {
                warn!("MPIT tuning plugin: {}", e);
                0
            }
        }
    }
}

impl<C: CvarInterface> TuningPlugin for MpitPlugin<C> {
    const NAME: &'static str = "MPIT";

    fn initialize(&mut self) -> Result<()> {
        logging::init_plugin(Self::NAME, module_path!(), &self.config);
        debug!("MPIT tuning plugin: initializing");
        let interface = self.interface.take().ok_or(Error::NotInitialized)?;
        self.values = Some(MpitValues::new(interface)?);
        info!("MPIT tuning plugin: initialised");
        Ok(())
    }

    fn finalize(&mut self) {
        debug!("MPIT tuning plugin: finalizing");
        self.values = None;
    }

    fn create_location(&mut self, _kind: LocationType, _id: u32) -> Result<()> {
        Ok(())
    }

    fn tuning_info() -> Vec<TuningActionInfo<Self>> {
        vec![TuningActionInfo::symmetric(
            REDUCE_SHORT_MSG_SIZE,
            MpitPlugin::reduce_short_msg_size,
            MpitPlugin::set_reduce_short_msg_size,
        )]
    }
}
