//! OpenMP thread count and loop schedule tuning.

use crate::config::PluginConfig;
use crate::logging;
use crate::plugin::{LocationType, TuningActionInfo, TuningPlugin};
use crate::Result;
use log::{debug, info, warn};

/// `omp_sched_static`.
pub const SCHED_STATIC: i32 = 1;
/// `omp_sched_auto`, the highest standard schedule kind.
pub const SCHED_AUTO: i32 = 4;

/// The OpenMP runtime calls used by this plugin.
pub trait OpenMpRuntime {
    /// `omp_set_num_threads`.
    fn set_num_threads(&mut self, threads: i32);

    /// `omp_get_max_threads`.
    fn max_threads(&self) -> i32;

    /// `omp_get_schedule`, as `(kind, chunk_size)`.
    fn schedule(&self) -> (i32, i32);

    /// `omp_set_schedule`.
    fn set_schedule(&mut self, kind: i32, chunk: i32);
}

#[cfg(feature = "openmp")]
pub use self::ffi::SystemRuntime;

#[cfg(feature = "openmp")]
mod ffi {
    use super::{OpenMpRuntime, SCHED_AUTO};
    use std::os::raw::c_int;

    #[link(name = "gomp")]
    extern "C" {
        fn omp_set_num_threads(num_threads: c_int);
        fn omp_get_max_threads() -> c_int;
        fn omp_get_schedule(kind: *mut c_int, chunk_size: *mut c_int);
        fn omp_set_schedule(kind: c_int, chunk_size: c_int);
    }

    /// The OpenMP runtime linked into the process.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SystemRuntime;

    impl OpenMpRuntime for SystemRuntime {
        fn set_num_threads(&mut self, threads: i32) {
            unsafe { omp_set_num_threads(threads) }
        }

        fn max_threads(&self) -> i32 {
            unsafe { omp_get_max_threads() }
        }

        fn schedule(&self) -> (i32, i32) {
            let mut kind: c_int = SCHED_AUTO;
            let mut chunk: c_int = 0;
            unsafe { omp_get_schedule(&mut kind, &mut chunk) };
            (kind, chunk)
        }

        fn set_schedule(&mut self, kind: i32, chunk: i32) {
            unsafe { omp_set_schedule(kind, chunk) }
        }
    }
}

/// Tuning plugin for the OpenMP runtime.
#[derive(Debug)]
pub struct OpenMpPlugin<R> {
    runtime: R,
    config: PluginConfig,
}

#[cfg(feature = "openmp")]
impl OpenMpPlugin<SystemRuntime> {
    /// Plugin over the linked OpenMP runtime, configured from the environment.
    pub fn system() -> Self {
        OpenMpPlugin::new(SystemRuntime, PluginConfig::from_env("OPENMPTP"))
    }
}

impl<R: OpenMpRuntime> OpenMpPlugin<R> {
    /// Create an uninitialized plugin.
    pub fn new(runtime: R, config: PluginConfig) -> Self {
        OpenMpPlugin { runtime, config }
    }

    /// The runtime.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// `NUMTHREADS` setter.
    pub fn set_num_threads(&mut self, threads: i32) -> i32 {
        self.runtime.set_num_threads(threads);
        debug!("[NUMTHREADS]: New Setting = {}", threads);
        0
    }

    /// `NUMTHREADS` getter.
    pub fn num_threads(&mut self) -> i32 {
        self.runtime.max_threads()
    }

    /// `SCHEDULE_TYPE` setter. Kinds outside `1..=4` are rejected, the chunk size is kept.
    pub fn set_schedule_type(&mut self, kind: i32) -> i32 {
        if kind < SCHED_STATIC || kind > SCHED_AUTO {
            warn!(
                "[SCHEDULE_TYPE]: Invalid scheduler type. {} is not allowed, type has to be between 1 and 4",
                kind
            );
            return -1;
        }
        let (_, chunk) = self.runtime.schedule();
        self.runtime.set_schedule(kind, chunk);
        info!("[SCHEDULE_TYPE]: New kind = {} New chunk size = {}", kind, chunk);
        0
    }

    /// `SCHEDULE_TYPE` getter.
    pub fn schedule_type(&mut self) -> i32 {
        self.runtime.schedule().0
    }

    /// `SCHEDULE_CHUNK_SIZE` setter. Switches to the static schedule.
    pub fn set_chunk_size(&mut self, chunk: i32) -> i32 {
        self.runtime.set_schedule(SCHED_STATIC, chunk);
        debug!(
            "[SCHEDULE_CHUNK_SIZE]: New kind = {} New chunk size = {}",
            SCHED_STATIC, chunk
        );
        0
    }

    /// `SCHEDULE_CHUNK_SIZE` getter.
    pub fn chunk_size(&mut self) -> i32 {
        self.runtime.schedule().1
    }
}

impl<R: OpenMpRuntime> TuningPlugin for OpenMpPlugin<R> {
    const NAME: &'static str = "OPENMPTP";

    fn initialize(&mut self) -> Result<()> {
        logging::init_plugin(Self::NAME, module_path!(), &self.config);
        debug!("OpenMP tuning plugin: initialized");
        Ok(())
    }

    fn finalize(&mut self) {
        debug!("OpenMP tuning plugin: finalized");
    }

    fn create_location(&mut self, _kind: LocationType, _id: u32) -> Result<()> {
        Ok(())
    }

    fn tuning_info() -> Vec<TuningActionInfo<Self>> {
        vec![
            TuningActionInfo::symmetric(
                "NUMTHREADS",
                OpenMpPlugin::num_threads,
                OpenMpPlugin::set_num_threads,
            ),
            TuningActionInfo::symmetric(
                "SCHEDULE_TYPE",
                OpenMpPlugin::schedule_type,
                OpenMpPlugin::set_schedule_type,
            ),
            TuningActionInfo::symmetric(
                "SCHEDULE_CHUNK_SIZE",
                OpenMpPlugin::chunk_size,
                OpenMpPlugin::set_chunk_size,
            ),
        ]
    }
}
