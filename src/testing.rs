//! Fakes of the hardware and runtime collaborators, shared by the unit tests.

use crate::driver::FrequencyDriver;
use crate::plugins::epb::EpbRegisters;
use crate::plugins::mpit::{Bind, CvarInfo, CvarInterface, Datatype, Scope};
use crate::plugins::openmp::OpenMpRuntime;
use crate::platform::Platform;
use crate::units::{PhysicalUnit, UnitSet};
use crate::{Error, Result};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Driver call recorded by `FakeDriver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Open(PhysicalUnit),
    Read(PhysicalUnit),
    ReadMin(PhysicalUnit),
    Prepare(i64),
    Unprepare(i64),
    Apply(PhysicalUnit, i64),
    ApplyMin(PhysicalUnit, i64),
    Close(PhysicalUnit),
    Shutdown,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<Call>,
    num_devices: usize,
    supports_min: bool,
    fail_open: HashSet<PhysicalUnit>,
    fail_read: HashSet<PhysicalUnit>,
    fail_apply: HashSet<PhysicalUnit>,
    unpreparable: HashSet<i64>,
    freqs: HashMap<PhysicalUnit, i64>,
    min_freqs: HashMap<PhysicalUnit, i64>,
}

/// Read access to the calls seen by a `FakeDriver` and its clones.
#[derive(Debug, Clone)]
pub(crate) struct CallLog(Rc<RefCell<FakeState>>);

impl CallLog {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.0.borrow().calls.clone()
    }

    pub(crate) fn calls_of<F>(&self, pred: F) -> usize
    where
        F: Fn(&Call) -> bool,
    {
        self.0.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    /// Units `Apply` was called for, in call order.
    pub(crate) fn applied_units(&self) -> Vec<PhysicalUnit> {
        self.0
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Apply(unit, _) => Some(*unit),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.0.borrow_mut().calls.clear();
    }
}

/// Opened fake device.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FakeDevice(pub(crate) PhysicalUnit);

/// Prepared fake setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FakeSetting(i64);

impl FakeSetting {
    pub(crate) fn freq(&self) -> i64 {
        self.0
    }
}

/// Call counting `FrequencyDriver`.
///
/// Clones share their state, so a clone handed to a plugin can be inspected from the test.
/// Applying a setting changes what the device reads afterwards.
#[derive(Debug, Clone)]
pub(crate) struct FakeDriver(Rc<RefCell<FakeState>>);

impl FakeDriver {
    /// `num_devices` devices, all reading 1 GHz.
    pub(crate) fn new(num_devices: usize) -> Self {
        let state = FakeState {
            num_devices,
            freqs: (0..num_devices).map(|u| (u, 1_000_000_000)).collect(),
            min_freqs: (0..num_devices).map(|u| (u, 800_000_000)).collect(),
            ..FakeState::default()
        };
        FakeDriver(Rc::new(RefCell::new(state)))
    }

    pub(crate) fn fail_open(self, units: &[PhysicalUnit]) -> Self {
        self.0.borrow_mut().fail_open.extend(units);
        self
    }

    pub(crate) fn fail_read(self, units: &[PhysicalUnit]) -> Self {
        self.0.borrow_mut().fail_read.extend(units);
        self
    }

    pub(crate) fn fail_apply(self, units: &[PhysicalUnit]) -> Self {
        self.0.borrow_mut().fail_apply.extend(units);
        self
    }

    pub(crate) fn unpreparable(self, freqs: &[i64]) -> Self {
        self.0.borrow_mut().unpreparable.extend(freqs);
        self
    }

    pub(crate) fn with_min(self) -> Self {
        self.0.borrow_mut().supports_min = true;
        self
    }

    /// Current frequencies in Hz, one per device.
    pub(crate) fn with_frequencies(self, freqs: &[i64]) -> Self {
        {
            let mut state = self.0.borrow_mut();
            for (unit, freq) in freqs.iter().enumerate() {
                state.freqs.insert(unit, *freq);
            }
        }
        self
    }

    /// Current minimum frequencies in Hz, one per device.
    pub(crate) fn with_min_frequencies(self, freqs: &[i64]) -> Self {
        {
            let mut state = self.0.borrow_mut();
            for (unit, freq) in freqs.iter().enumerate() {
                state.min_freqs.insert(unit, *freq);
            }
        }
        self
    }

    pub(crate) fn frequency(&self, unit: PhysicalUnit) -> Option<i64> {
        self.0.borrow().freqs.get(&unit).copied()
    }

    pub(crate) fn min_frequency(&self, unit: PhysicalUnit) -> Option<i64> {
        self.0.borrow().min_freqs.get(&unit).copied()
    }

    pub(crate) fn log(&self) -> CallLog {
        CallLog(Rc::clone(&self.0))
    }

    fn record(&self, call: Call) {
        self.0.borrow_mut().calls.push(call);
    }
}

fn fake_error(unit: PhysicalUnit) -> Error {
    Error::Driver {
        code: -nix::libc::EIO,
        reason: format!("fake failure on unit {}", unit),
    }
}

impl FrequencyDriver for FakeDriver {
    type Device = FakeDevice;
    type Setting = FakeSetting;

    fn name(&self) -> &str {
        "fake"
    }

    fn num_devices(&self) -> usize {
        self.0.borrow().num_devices
    }

    fn open(&mut self, unit: PhysicalUnit) -> Result<FakeDevice> {
        self.record(Call::Open(unit));
        if self.0.borrow().fail_open.contains(&unit) {
            return Err(fake_error(unit));
        }
        Ok(FakeDevice(unit))
    }

    fn read_frequency(&self, device: &FakeDevice) -> Result<i64> {
        self.record(Call::Read(device.0));
        let state = self.0.borrow();
        if state.fail_read.contains(&device.0) {
            return Err(fake_error(device.0));
        }
        state.freqs.get(&device.0).copied().ok_or_else(|| fake_error(device.0))
    }

    fn supports_min(&self) -> bool {
        self.0.borrow().supports_min
    }

    fn read_min_frequency(&self, device: &FakeDevice) -> Result<i64> {
        if !self.supports_min() {
            return Err(Error::Unsupported);
        }
        self.record(Call::ReadMin(device.0));
        let state = self.0.borrow();
        if state.fail_read.contains(&device.0) {
            return Err(fake_error(device.0));
        }
        state
            .min_freqs
            .get(&device.0)
            .copied()
            .ok_or_else(|| fake_error(device.0))
    }

    fn prepare(&mut self, freq: i64, _flags: u32) -> Option<FakeSetting> {
        self.record(Call::Prepare(freq));
        if self.0.borrow().unpreparable.contains(&freq) {
            None
        } else {
            Some(FakeSetting(freq))
        }
    }

    fn unprepare(&mut self, setting: FakeSetting) {
        self.record(Call::Unprepare(setting.0));
    }

    fn apply(&self, device: &FakeDevice, setting: &FakeSetting) -> Result<()> {
        self.record(Call::Apply(device.0, setting.0));
        let mut state = self.0.borrow_mut();
        if state.fail_apply.contains(&device.0) {
            return Err(fake_error(device.0));
        }
        state.freqs.insert(device.0, setting.0);
        Ok(())
    }

    fn apply_min(&self, device: &FakeDevice, setting: &FakeSetting) -> Result<()> {
        if !self.supports_min() {
            return Err(Error::Unsupported);
        }
        self.record(Call::ApplyMin(device.0, setting.0));
        let mut state = self.0.borrow_mut();
        if state.fail_apply.contains(&device.0) {
            return Err(fake_error(device.0));
        }
        state.min_freqs.insert(device.0, setting.0);
        Ok(())
    }

    fn close(&mut self, unit: PhysicalUnit, device: FakeDevice) {
        assert_eq!(unit, device.0);
        self.record(Call::Close(unit));
    }

    fn shutdown(&mut self) {
        self.record(Call::Shutdown);
    }
}

/// `Platform` with fixed CPU count and per process/thread affinity masks.
#[derive(Debug, Clone)]
pub(crate) struct FakePlatform {
    cpus: usize,
    process: i32,
    thread: Rc<RefCell<i32>>,
    masks: Rc<RefCell<HashMap<i32, Vec<PhysicalUnit>>>>,
}

impl FakePlatform {
    pub(crate) const PROCESS: i32 = 100;

    /// `cpus` online CPUs, the process (and its main thread) bound to `process_mask`.
    pub(crate) fn new(cpus: usize, process_mask: &[PhysicalUnit]) -> Self {
        let mut masks = HashMap::new();
        masks.insert(FakePlatform::PROCESS, process_mask.to_vec());
        FakePlatform {
            cpus,
            process: FakePlatform::PROCESS,
            thread: Rc::new(RefCell::new(FakePlatform::PROCESS)),
            masks: Rc::new(RefCell::new(masks)),
        }
    }

    /// Register thread `tid` with affinity `mask`.
    pub(crate) fn with_thread(self, tid: i32, mask: &[PhysicalUnit]) -> Self {
        self.masks.borrow_mut().insert(tid, mask.to_vec());
        self
    }

    /// Make `tid` the calling thread.
    pub(crate) fn switch_to(&self, tid: i32) {
        *self.thread.borrow_mut() = tid;
    }
}

impl Platform for FakePlatform {
    fn online_cpus(&self) -> Result<usize> {
        Ok(self.cpus)
    }

    fn current_process(&self) -> i32 {
        self.process
    }

    fn current_thread(&self) -> i32 {
        *self.thread.borrow()
    }

    fn affinity(&self, id: i32, capacity: usize) -> Result<UnitSet> {
        match self.masks.borrow().get(&id) {
            Some(mask) => Ok(UnitSet::from_units(capacity, mask.iter().copied())),
            None => Err(Error::Affinity(nix::Error::Sys(nix::errno::Errno::ESRCH))),
        }
    }
}

/// EPB registers held in memory.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeEpb {
    pub(crate) values: Vec<Option<u64>>,
    pub(crate) fail_write: HashSet<usize>,
    pub(crate) fail_init: bool,
    pub(crate) writes: Vec<(usize, u64)>,
}

impl FakeEpb {
    /// One register per entry; `None` fails to read.
    pub(crate) fn new(values: &[Option<u64>]) -> Self {
        FakeEpb {
            values: values.to_vec(),
            ..FakeEpb::default()
        }
    }
}

impl EpbRegisters for FakeEpb {
    fn init(&mut self) -> Result<()> {
        if self.fail_init {
            Err(Error::Driver {
                code: -nix::libc::ENODEV,
                reason: String::from("no epb"),
            })
        } else {
            Ok(())
        }
    }

    fn num_devices(&self) -> usize {
        self.values.len()
    }

    fn read(&mut self, cpu: usize) -> Result<u64> {
        self.values
            .get(cpu)
            .copied()
            .flatten()
            .ok_or_else(|| fake_error(cpu))
    }

    fn write(&mut self, cpu: usize, value: u64) -> Result<()> {
        if self.fail_write.contains(&cpu) {
            return Err(fake_error(cpu));
        }
        self.writes.push((cpu, value));
        if let Some(slot) = self.values.get_mut(cpu) {
            *slot = Some(value);
        }
        Ok(())
    }
}

/// One fake MPI-T control variable.
#[derive(Debug, Clone)]
pub(crate) struct FakeCvar {
    pub(crate) info: CvarInfo,
    pub(crate) value: i32,
    /// Value actually stored by writes; `None` stores what was written.
    pub(crate) sticky: Option<i32>,
}

impl FakeCvar {
    /// Writable integer variable without an object binding.
    pub(crate) fn int(name: &str, value: i32) -> Self {
        FakeCvar {
            info: CvarInfo {
                name: String::from(name),
                datatype: Datatype::Int,
                bind: Bind::NoObject,
                scope: Scope::All,
                enumtype: None,
            },
            value,
            sticky: None,
        }
    }
}

/// MPI-T tool interface over a list of control variables.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeMpit {
    pub(crate) cvars: Vec<FakeCvar>,
    pub(crate) lookups: Rc<RefCell<usize>>,
    pub(crate) finalized: Rc<RefCell<bool>>,
}

impl FakeMpit {
    pub(crate) fn new(cvars: Vec<FakeCvar>) -> Self {
        FakeMpit {
            cvars,
            ..FakeMpit::default()
        }
    }
}

fn invalid_index(index: usize) -> Error {
    Error::Mpit {
        what: format!("cvar index {}", index),
        code: 59,
    }
}

impl CvarInterface for FakeMpit {
    fn init_thread(&mut self) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        *self.finalized.borrow_mut() = true;
        Ok(())
    }

    fn num_cvars(&mut self) -> Result<usize> {
        Ok(self.cvars.len())
    }

    fn cvar_info(&mut self, index: usize) -> Result<CvarInfo> {
        *self.lookups.borrow_mut() += 1;
        self.cvars
            .get(index)
            .map(|c| c.info.clone())
            .ok_or_else(|| invalid_index(index))
    }

    fn enum_name(&mut self, enumtype: usize) -> Result<String> {
        Ok(format!("ENUM_{}", enumtype))
    }

    fn read_int(&mut self, index: usize) -> Result<i32> {
        self.cvars
            .get(index)
            .map(|c| c.value)
            .ok_or_else(|| invalid_index(index))
    }

    fn write_int(&mut self, index: usize, value: i32) -> Result<()> {
        let cvar = self.cvars.get_mut(index).ok_or_else(|| invalid_index(index))?;
        cvar.value = cvar.sticky.unwrap_or(value);
        Ok(())
    }
}

/// OpenMP runtime state held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FakeOpenMp {
    pub(crate) threads: i32,
    pub(crate) kind: i32,
    pub(crate) chunk: i32,
}

impl Default for FakeOpenMp {
    fn default() -> Self {
        FakeOpenMp {
            threads: 8,
            kind: 2,
            chunk: 1,
        }
    }
}

impl OpenMpRuntime for FakeOpenMp {
    fn set_num_threads(&mut self, threads: i32) {
        self.threads = threads;
    }

    fn max_threads(&self) -> i32 {
        self.threads
    }

    fn schedule(&self) -> (i32, i32) {
        (self.kind, self.chunk)
    }

    fn set_schedule(&mut self, kind: i32, chunk: i32) {
        self.kind = kind;
        self.chunk = chunk;
    }
}
