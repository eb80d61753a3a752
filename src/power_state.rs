//! Snapshot, mutation and guaranteed restoration of the CPU power-management state.
//!
//! The controller is the only component touching process-external state. It is shared between
//! the session thread and the interrupt handler, so every transition happens under one lock and
//! restoration can be requested from either side.
//!
//! Precondition: no other session mutates cpufreq or SMT on the same machine concurrently.

use crate::utils::errors::ExperimentError;
use crate::utils::psutils::{is_privileged, logical_cpu_count, parse_cpu_list};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub const CPU_SYSFS_PATH: &str = "/sys/devices/system/cpu";

/// Per-CPU cpufreq endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CpuKnob {
    Governor,
    MinFreq,
    MaxFreq,
}

impl CpuKnob {
    pub fn file_name(self) -> &'static str {
        match self {
            CpuKnob::Governor => "scaling_governor",
            CpuKnob::MinFreq => "scaling_min_freq",
            CpuKnob::MaxFreq => "scaling_max_freq",
        }
    }
}

impl fmt::Display for CpuKnob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Access to the OS power-management endpoints.
pub trait PowerInterface: Send + Sync {
    /// Logical CPUs exposing cpufreq controls, ascending.
    fn cpus(&self) -> Result<Vec<u32>, ExperimentError>;

    /// Whether the cpufreq endpoints of `cpu` currently exist (offline CPUs lose them).
    fn has_cpufreq(&self, cpu: u32) -> bool;

    fn read_knob(&self, cpu: u32, knob: CpuKnob) -> io::Result<String>;

    fn write_knob(&self, cpu: u32, knob: CpuKnob, value: &str) -> io::Result<()>;

    /// `Ok(None)` when the SMT endpoints are absent.
    fn read_smt(&self) -> io::Result<Option<bool>>;

    fn disable_smt(&self) -> io::Result<()>;

    /// Fails when writes would be rejected for lack of privilege or missing endpoints.
    fn check_access(&self) -> Result<(), ExperimentError>;
}

/// Linux sysfs implementation rooted at `/sys/devices/system/cpu` or a mock of it.
pub struct SysfsPower {
    root: PathBuf,
}

impl SysfsPower {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn knob_path(&self, cpu: u32, knob: CpuKnob) -> PathBuf {
        self.root
            .join(format!("cpu{cpu}"))
            .join("cpufreq")
            .join(knob.file_name())
    }
}

impl Default for SysfsPower {
    fn default() -> Self {
        Self::new(CPU_SYSFS_PATH)
    }
}

impl PowerInterface for SysfsPower {
    fn cpus(&self) -> Result<Vec<u32>, ExperimentError> {
        let present_path = self.root.join("present");
        let present = fs::read_to_string(&present_path).map_err(|e| {
            ExperimentError::PowerControlUnavailable(format!("cannot read {}: {e}", present_path.display()))
        })?;
        let cpus = parse_cpu_list(&present)?;
        let (with_freq, without): (Vec<u32>, Vec<u32>) = cpus.into_iter().partition(|&cpu| self.has_cpufreq(cpu));
        if !without.is_empty() {
            debug!("Skipping CPUs without cpufreq: {:?}", without);
        }
        Ok(with_freq)
    }

    fn has_cpufreq(&self, cpu: u32) -> bool {
        self.root.join(format!("cpu{cpu}")).join("cpufreq").is_dir()
    }

    fn read_knob(&self, cpu: u32, knob: CpuKnob) -> io::Result<String> {
        Ok(fs::read_to_string(self.knob_path(cpu, knob))?.trim().to_string())
    }

    fn write_knob(&self, cpu: u32, knob: CpuKnob, value: &str) -> io::Result<()> {
        fs::write(self.knob_path(cpu, knob), value)
    }

    fn read_smt(&self) -> io::Result<Option<bool>> {
        match fs::read_to_string(self.root.join("smt").join("active")) {
            Ok(active) => Ok(Some(active.trim() == "1")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn disable_smt(&self) -> io::Result<()> {
        fs::write(self.root.join("smt").join("control"), "off")
    }

    fn check_access(&self) -> Result<(), ExperimentError> {
        let probe = self.knob_path(0, CpuKnob::MaxFreq);
        if !probe.exists() {
            return Err(ExperimentError::PowerControlUnavailable(format!(
                "cpufreq endpoints not found at {}",
                probe.display()
            )));
        }
        if is_privileged() || OpenOptions::new().write(true).open(&probe).is_ok() {
            Ok(())
        } else {
            Err(ExperimentError::PowerControlUnavailable(format!(
                "{} is not writable; run the sweep as root",
                probe.display()
            )))
        }
    }
}

#[derive(Default)]
struct MemoryState {
    knobs: BTreeMap<(u32, CpuKnob), String>,
    smt: Option<bool>,
    failing_cpus: BTreeSet<u32>,
    offline_cpus: BTreeSet<u32>,
}

/// In-memory power interface counting every write. Clones share the same state.
#[derive(Clone)]
pub struct InMemoryPower {
    state: Arc<Mutex<MemoryState>>,
    writes: Arc<AtomicUsize>,
    accessible: bool,
}

impl InMemoryPower {
    /// `cpus` lists `(cpu, governor, min_khz, max_khz)`.
    pub fn new(cpus: &[(u32, &str, u64, u64)], smt: Option<bool>) -> Self {
        let mut state = MemoryState {
            smt,
            ..Default::default()
        };
        for &(cpu, governor, min_khz, max_khz) in cpus {
            state.knobs.insert((cpu, CpuKnob::Governor), governor.to_string());
            state.knobs.insert((cpu, CpuKnob::MinFreq), min_khz.to_string());
            state.knobs.insert((cpu, CpuKnob::MaxFreq), max_khz.to_string());
        }
        Self {
            state: Arc::new(Mutex::new(state)),
            writes: Arc::new(AtomicUsize::new(0)),
            accessible: true,
        }
    }

    /// Makes `check_access` fail, as an unprivileged host would.
    pub fn without_access(mut self) -> Self {
        self.accessible = false;
        self
    }

    /// Every later write to `cpu` is rejected.
    pub fn fail_writes_for(&self, cpu: u32) {
        self.lock().failing_cpus.insert(cpu);
    }

    /// Simulates a CPU going offline: its endpoints disappear.
    pub fn set_offline(&self, cpu: u32) {
        self.lock().offline_cpus.insert(cpu);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn value(&self, cpu: u32, knob: CpuKnob) -> Option<String> {
        self.lock().knobs.get(&(cpu, knob)).cloned()
    }

    pub fn smt(&self) -> Option<bool> {
        self.lock().smt
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PowerInterface for InMemoryPower {
    fn cpus(&self) -> Result<Vec<u32>, ExperimentError> {
        let state = self.lock();
        let cpus: BTreeSet<u32> = state.knobs.keys().map(|&(cpu, _)| cpu).collect();
        Ok(cpus.into_iter().collect())
    }

    fn has_cpufreq(&self, cpu: u32) -> bool {
        let state = self.lock();
        !state.offline_cpus.contains(&cpu) && state.knobs.contains_key(&(cpu, CpuKnob::Governor))
    }

    fn read_knob(&self, cpu: u32, knob: CpuKnob) -> io::Result<String> {
        self.lock()
            .knobs
            .get(&(cpu, knob))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cpu{cpu}/{knob}")))
    }

    fn write_knob(&self, cpu: u32, knob: CpuKnob, value: &str) -> io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.failing_cpus.contains(&cpu) || state.offline_cpus.contains(&cpu) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "write rejected"));
        }
        state.knobs.insert((cpu, knob), value.to_string());
        Ok(())
    }

    fn read_smt(&self) -> io::Result<Option<bool>> {
        Ok(self.lock().smt)
    }

    fn disable_smt(&self) -> io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        match state.smt {
            Some(_) => {
                state.smt = Some(false);
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, "smt/control")),
        }
    }

    fn check_access(&self) -> Result<(), ExperimentError> {
        if self.accessible {
            Ok(())
        } else {
            Err(ExperimentError::PowerControlUnavailable("permission denied".to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuPowerState {
    pub cpu: u32,
    pub governor: String,
    pub min_khz: u64,
    pub max_khz: u64,
}

/// State captured once per session, before any mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerSnapshot {
    pub cpus: Vec<CpuPowerState>,
    pub smt_enabled: Option<bool>,
}

/// Outcome of restoration, printed to the operator.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored_cpus: Vec<u32>,
    /// CPUs whose endpoints vanished, typically SMT siblings taken offline.
    pub skipped_cpus: Vec<u32>,
    pub failures: Vec<ExperimentError>,
    /// SMT was on at snapshot time and has been turned off for the session.
    pub smt_left_disabled: bool,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_cpus(&self) -> Vec<u32> {
        let cpus: BTreeSet<u32> = self
            .failures
            .iter()
            .filter_map(|failure| match failure {
                ExperimentError::PowerWriteFailed { cpu, .. } => Some(*cpu),
                _ => None,
            })
            .collect();
        cpus.into_iter().collect()
    }
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            write!(f, "power state restored on {} CPU(s)", self.restored_cpus.len())?;
        } else {
            write!(
                f,
                "power state restored on {} CPU(s), FAILED on cpu {:?}",
                self.restored_cpus.len(),
                self.failed_cpus()
            )?;
        }
        if !self.skipped_cpus.is_empty() {
            write!(f, ", skipped offline cpu {:?}", self.skipped_cpus)?;
        }
        if self.smt_left_disabled {
            write!(f, "; SMT left disabled (echo on > smt/control to re-enable)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPhase {
    Uninitialized,
    Snapshotted,
    Applying,
    Applied,
    Restoring,
    Restored,
}

struct ControllerState {
    phase: PowerPhase,
    snapshot: Option<PowerSnapshot>,
    smt_disabled: bool,
}

/// Owns the lifecycle `Uninitialized → Snapshotted → {Applying → Applied}* → Restoring → Restored`.
pub struct PowerStateController {
    interface: Box<dyn PowerInterface>,
    state: Mutex<ControllerState>,
}

impl PowerStateController {
    pub fn new(interface: Box<dyn PowerInterface>) -> Self {
        Self {
            interface,
            state: Mutex::new(ControllerState {
                phase: PowerPhase::Uninitialized,
                snapshot: None,
                smt_disabled: false,
            }),
        }
    }

    pub fn sysfs(root: &Path) -> Self {
        Self::new(Box::new(SysfsPower::new(root)))
    }

    // Restoration must still run after a panic elsewhere, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> PowerPhase {
        self.lock().phase
    }

    pub fn check_privileges(&self) -> Result<(), ExperimentError> {
        self.interface.check_access()
    }

    /// Reads governor, min and max for every CPU, then the SMT flag. Runs once; later calls
    /// return the stored snapshot.
    pub fn snapshot(&self) -> Result<PowerSnapshot, ExperimentError> {
        let mut state = self.lock();
        if let Some(snapshot) = &state.snapshot {
            return Ok(snapshot.clone());
        }
        if state.phase != PowerPhase::Uninitialized {
            return Err(ExperimentError::PowerControlUnavailable(
                "power state already released for this session".to_string(),
            ));
        }

        let mut cpus = Vec::new();
        for cpu in self.interface.cpus()? {
            match self.read_cpu(cpu) {
                Ok(cpu_state) => cpus.push(cpu_state),
                Err(e) => warn!("cpu{cpu} left out of the snapshot: {e}"),
            }
        }
        if cpus.is_empty() {
            return Err(ExperimentError::PowerControlUnavailable(
                "no CPU exposes readable cpufreq settings".to_string(),
            ));
        }
        let smt_enabled = self.interface.read_smt().unwrap_or_else(|e| {
            warn!("Cannot read SMT state: {e}");
            None
        });

        let logical = logical_cpu_count();
        if cpus.len() != logical {
            debug!("{} CPU(s) with cpufreq out of {logical} logical CPU(s)", cpus.len());
        }
        let snapshot = PowerSnapshot { cpus, smt_enabled };
        info!(
            "Power state snapshot: {} CPU(s), governor {}, SMT {}",
            snapshot.cpus.len(),
            snapshot.cpus[0].governor,
            match smt_enabled {
                Some(true) => "on",
                Some(false) => "off",
                None => "n/a",
            }
        );
        state.snapshot = Some(snapshot.clone());
        state.phase = PowerPhase::Snapshotted;
        Ok(snapshot)
    }

    fn read_cpu(&self, cpu: u32) -> Result<CpuPowerState, ExperimentError> {
        let governor = self.interface.read_knob(cpu, CpuKnob::Governor)?;
        let min_khz = parse_khz(&self.interface.read_knob(cpu, CpuKnob::MinFreq)?)?;
        let max_khz = parse_khz(&self.interface.read_knob(cpu, CpuKnob::MaxFreq)?)?;
        Ok(CpuPowerState {
            cpu,
            governor,
            min_khz,
            max_khz,
        })
    }

    /// Turns SMT off for the rest of the session. Requires a snapshot. Best-effort: returns
    /// whether the write went through.
    pub fn disable_smt(&self) -> Result<bool, ExperimentError> {
        let mut state = self.lock();
        let snapshot = state.snapshot.as_ref().ok_or_else(|| {
            ExperimentError::PowerControlUnavailable("snapshot must be taken before disabling SMT".to_string())
        })?;
        if snapshot.smt_enabled != Some(true) {
            debug!("SMT not active, nothing to disable");
            return Ok(false);
        }
        ensure_mutable(state.phase)?;
        match self.interface.disable_smt() {
            Ok(()) => {
                info!("SMT disabled for the session");
                state.smt_disabled = true;
                Ok(true)
            }
            Err(e) => {
                warn!("Could not disable SMT, continuing with SMT on: {e}");
                Ok(false)
            }
        }
    }

    /// Writes `governor` to every snapshotted CPU; returns the failed writes.
    pub fn set_governor(&self, governor: &str) -> Result<Vec<ExperimentError>, ExperimentError> {
        let state = self.lock();
        ensure_mutable(state.phase)?;
        let cpus = snapshot_cpus(&state)?;
        Ok(cpus
            .iter()
            .filter_map(|cpu| self.write(cpu.cpu, CpuKnob::Governor, governor).err())
            .collect())
    }

    /// Writes the scaling range to every snapshotted CPU; returns the failed writes.
    pub fn set_frequency_range(&self, min_khz: u64, max_khz: u64) -> Result<Vec<ExperimentError>, ExperimentError> {
        let state = self.lock();
        ensure_mutable(state.phase)?;
        let cpus = snapshot_cpus(&state)?;
        Ok(cpus
            .iter()
            .flat_map(|cpu| self.write_range(cpu, min_khz, max_khz))
            .collect())
    }

    /// Pins every CPU to `mhz` under `governor`. Per-CPU failures are logged and counted.
    pub fn apply_frequency(&self, mhz: u32, governor: &str) -> Result<usize, ExperimentError> {
        let khz = mhz as u64 * 1000;
        let mut state = self.lock();
        ensure_mutable(state.phase)?;
        let cpus = snapshot_cpus(&state)?.to_vec();
        state.phase = PowerPhase::Applying;

        let mut failures = 0;
        let mut rejected_cpus = 0;
        for cpu in &cpus {
            let before = failures;
            failures += self.write(cpu.cpu, CpuKnob::Governor, governor).is_err() as usize;
            failures += self.write_range(cpu, khz, khz).len();
            rejected_cpus += (failures > before) as usize;
        }

        state.phase = PowerPhase::Applied;
        if !cpus.is_empty() && rejected_cpus == cpus.len() {
            return Err(ExperimentError::PowerControlUnavailable(format!(
                "every CPU rejected {mhz} MHz with governor {governor}"
            )));
        }
        if failures > 0 {
            warn!("{failures} power write(s) failed while applying {mhz} MHz");
        } else {
            info!("Applied {mhz} MHz with governor {governor} on {} CPU(s)", cpus.len());
        }
        Ok(failures)
    }

    /// Writes back the snapshot: min/max first, then the governor, every write attempted.
    /// Returns `None` when there was nothing to restore or restoration already happened.
    pub fn restore(&self) -> Option<RestoreReport> {
        let mut state = self.lock();
        match state.phase {
            PowerPhase::Restoring | PowerPhase::Restored => return None,
            PowerPhase::Uninitialized => {
                state.phase = PowerPhase::Restored;
                return None;
            }
            _ => {}
        }
        let Some(snapshot) = state.snapshot.clone() else {
            state.phase = PowerPhase::Restored;
            return None;
        };
        state.phase = PowerPhase::Restoring;

        let mut report = RestoreReport {
            smt_left_disabled: state.smt_disabled,
            ..Default::default()
        };
        for cpu in &snapshot.cpus {
            if !self.interface.has_cpufreq(cpu.cpu) {
                debug!("cpu{} is offline, not restored", cpu.cpu);
                report.skipped_cpus.push(cpu.cpu);
                continue;
            }
            let mut errors = self.write_range(cpu, cpu.min_khz, cpu.max_khz);
            if let Err(e) = self.write(cpu.cpu, CpuKnob::Governor, &cpu.governor) {
                errors.push(e);
            }
            if errors.is_empty() {
                report.restored_cpus.push(cpu.cpu);
            }
            report.failures.extend(errors);
        }

        state.phase = PowerPhase::Restored;
        info!("Restoration finished: {report}");
        Some(report)
    }

    /// Writes min and max in the order that keeps `min <= max` at every step.
    fn write_range(&self, cpu: &CpuPowerState, min_khz: u64, max_khz: u64) -> Vec<ExperimentError> {
        let current_max = self
            .interface
            .read_knob(cpu.cpu, CpuKnob::MaxFreq)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(cpu.max_khz);
        let order = if min_khz > current_max {
            [(CpuKnob::MaxFreq, max_khz), (CpuKnob::MinFreq, min_khz)]
        } else {
            [(CpuKnob::MinFreq, min_khz), (CpuKnob::MaxFreq, max_khz)]
        };
        order
            .into_iter()
            .filter_map(|(knob, khz)| self.write(cpu.cpu, knob, &khz.to_string()).err())
            .collect()
    }

    fn write(&self, cpu: u32, knob: CpuKnob, value: &str) -> Result<(), ExperimentError> {
        self.interface.write_knob(cpu, knob, value).map_err(|source| {
            warn!("Failed to write {value:?} to cpu{cpu}/{knob}: {source}");
            ExperimentError::PowerWriteFailed {
                cpu,
                knob: knob.to_string(),
                value: value.to_string(),
                source,
            }
        })
    }
}

fn ensure_mutable(phase: PowerPhase) -> Result<(), ExperimentError> {
    match phase {
        PowerPhase::Restoring | PowerPhase::Restored => Err(ExperimentError::Interrupted),
        _ => Ok(()),
    }
}

fn snapshot_cpus(state: &ControllerState) -> Result<&[CpuPowerState], ExperimentError> {
    state
        .snapshot
        .as_ref()
        .map(|s| s.cpus.as_slice())
        .ok_or_else(|| ExperimentError::PowerControlUnavailable("no snapshot taken before mutation".to_string()))
}

fn parse_khz(value: &str) -> Result<u64, ExperimentError> {
    value
        .trim()
        .parse()
        .map_err(|e| ExperimentError::PowerControlUnavailable(format!("invalid frequency '{value}': {e}")))
}
