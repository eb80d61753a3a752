//! Session sequencing.
//!
//! For each frequency point, then for each selected benchmark in lexicographic order, the
//! runner executes the warmup iterations and then the measured ones, one workload at a time.
//! Every exit path after the power state has been touched goes through restoration.

use crate::config::ExperimentConfig;
use crate::energy_meter::{EnergyMeter, EnergySample};
use crate::plan::FrequencyPlan;
use crate::power_state::{PowerStateController, RestoreReport};
use crate::registry::{BenchmarkRegistry, parse_filter};
use crate::sink::{ResultRecord, ResultSink};
use crate::utils::errors::{ExperimentError, Phase, WorkloadError};
use crate::utils::psutils::current_frequency_mhz;
use crate::utils::result_trace::{ResultTrace, TraceSummary};
use crate::workloads;
use log::{debug, error, info, warn};
use std::any::Any;
use std::fmt;
use std::hint::black_box;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Catalog and selection of one session, passed explicitly instead of living in a global.
pub struct ExperimentContext {
    registry: BenchmarkRegistry,
}

impl ExperimentContext {
    pub fn new(registry: BenchmarkRegistry) -> Self {
        Self { registry }
    }

    /// Context holding the compiled-in catalog and its default selection.
    pub fn with_defaults() -> Self {
        Self::new(workloads::default_registry())
    }

    /// Applies a comma-separated filter. A blank or absent filter keeps the current selection.
    pub fn select(&mut self, filter: Option<&str>) {
        let prefixes = filter.map(parse_filter).unwrap_or_default();
        if !prefixes.is_empty() {
            self.registry.enable_only(&prefixes);
        }
    }

    pub fn registry(&self) -> &BenchmarkRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BenchmarkRegistry {
        &mut self.registry
    }
}

/// Parameters of the measurement loop.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub size: usize,
    pub warmup_iterations: u32,
    pub measurement_iterations: u32,
    pub plan: FrequencyPlan,
    pub governor: String,
    pub disable_smt: bool,
    pub max_sink_failures: u32,
}

impl RunSettings {
    pub fn from_config(config: &ExperimentConfig) -> Result<Self, ExperimentError> {
        config.validate()?;
        Ok(Self {
            size: config.size,
            warmup_iterations: config.warmup_iterations,
            measurement_iterations: config.measurement_iterations,
            plan: FrequencyPlan::from_options(config.sweep)?,
            governor: config.governor.clone(),
            disable_smt: config.disable_smt,
            max_sink_failures: config.max_sink_failures,
        })
    }

    /// Warmup plus measured invocations of one benchmark at one frequency point.
    pub fn iterations_per_point(&self) -> Result<u32, ExperimentError> {
        self.warmup_iterations
            .checked_add(self.measurement_iterations)
            .ok_or_else(|| {
                ExperimentError::Config(format!(
                    "{} warmup + {} measured iterations overflow",
                    self.warmup_iterations, self.measurement_iterations
                ))
            })
    }
}

/// Result of a completed session.
#[derive(Debug)]
pub struct SessionOutcome {
    pub records_written: usize,
    pub summaries: Vec<TraceSummary>,
    /// `None` when no sweep ran or the state was already restored elsewhere.
    pub restore: Option<RestoreReport>,
}

/// A fatal error together with what happened to the power state afterwards.
#[derive(Debug)]
pub struct SessionFailure {
    pub error: ExperimentError,
    pub restore: Option<RestoreReport>,
    /// The power state had been mutated when the error occurred.
    pub power_touched: bool,
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        match (&self.restore, self.power_touched) {
            (Some(report), _) => write!(f, "; {report}"),
            (None, true) => write!(f, "; power state was already restored"),
            (None, false) => write!(f, "; power state untouched"),
        }
    }
}

impl std::error::Error for SessionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Restores the power state when dropped, covering unwinding out of the session.
struct RestoreGuard {
    controller: Option<Arc<PowerStateController>>,
}

impl RestoreGuard {
    fn new() -> Self {
        Self { controller: None }
    }

    fn arm(&mut self, controller: Arc<PowerStateController>) {
        self.controller = Some(controller);
    }

    fn is_armed(&self) -> bool {
        self.controller.is_some()
    }

    fn release(&mut self) -> Option<RestoreReport> {
        self.controller.take().and_then(|controller| controller.restore())
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if let Some(report) = self.release() {
            warn!("Power state restored while unwinding: {report}");
        }
    }
}

/// Persists measured records to the sink and the in-memory trace.
struct Recorder {
    sink: ResultSink,
    trace: ResultTrace,
    consecutive_failures: u32,
    max_failures: u32,
}

impl Recorder {
    /// A sink failure is tolerated until `max_failures` consecutive ones.
    fn persist(&mut self, record: ResultRecord) -> Result<(), ExperimentError> {
        if let Err(e) = self.sink.append(&record) {
            self.consecutive_failures += 1;
            warn!(
                "Result for {} lost ({}/{} consecutive failures): {e}",
                record.algorithm, self.consecutive_failures, self.max_failures
            );
            if self.consecutive_failures >= self.max_failures {
                return Err(ExperimentError::SinkWriteFailed(format!(
                    "{} consecutive write failures, last: {e}",
                    self.consecutive_failures
                )));
            }
            return Ok(());
        }
        self.consecutive_failures = 0;
        if let Err(e) = self.trace.append(std::slice::from_ref(&record)) {
            warn!("Result trace not updated: {e}");
        }
        Ok(())
    }
}

pub struct ExperimentRunner {
    context: ExperimentContext,
    meter: EnergyMeter,
    power: Option<Arc<PowerStateController>>,
    recorder: Recorder,
    settings: RunSettings,
    cancel: Arc<AtomicBool>,
}

impl ExperimentRunner {
    pub fn new(
        context: ExperimentContext,
        meter: EnergyMeter,
        power: Option<Arc<PowerStateController>>,
        sink: ResultSink,
        settings: RunSettings,
    ) -> Result<Self, ExperimentError> {
        let recorder = Recorder {
            sink,
            trace: ResultTrace::new()?,
            consecutive_failures: 0,
            max_failures: settings.max_sink_failures,
        };
        Ok(Self {
            context,
            meter,
            power,
            recorder,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Wires the default catalog, the RAPL meter, the sysfs power controller (sweeps only) and
    /// the CSV sink from `config`.
    pub fn from_config(config: &ExperimentConfig) -> Result<Self, ExperimentError> {
        let settings = RunSettings::from_config(config)?;
        let mut context = ExperimentContext::with_defaults();
        context.select(config.filter.as_deref());
        let power = settings
            .plan
            .is_sweep()
            .then(|| Arc::new(PowerStateController::sysfs(&config.cpu_sysfs_path)));
        let meter = EnergyMeter::detect(&config.rapl_path);
        let sink = ResultSink::new(&config.output_dir, &config.session_id);
        Self::new(context, meter, power, sink, settings)
    }

    /// Flag checked between iterations; setting it stops the session with `Interrupted`.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Shared with the interrupt handler so it can restore directly.
    pub fn power_controller(&self) -> Option<Arc<PowerStateController>> {
        self.power.clone()
    }

    pub fn sink(&self) -> &ResultSink {
        &self.recorder.sink
    }

    pub fn trace(&self) -> &ResultTrace {
        &self.recorder.trace
    }

    /// Checks everything that can be checked without side effects on the machine.
    pub fn validate(&self) -> Result<(), ExperimentError> {
        let selected = self.context.registry().selected();
        if selected.is_empty() {
            return Err(ExperimentError::EmptySelection(format!(
                "none of the {} registered benchmarks matches the filter",
                self.context.registry().len()
            )));
        }
        if self.settings.measurement_iterations == 0 {
            return Err(ExperimentError::Config("at least one measurement iteration is required".to_string()));
        }
        self.settings.iterations_per_point()?;
        if let FrequencyPlan::Sweep(points) = &self.settings.plan {
            if points.is_empty() || points.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ExperimentError::InvalidPlan(format!("{points:?} is not strictly increasing")));
            }
            match &self.power {
                Some(power) => power.check_privileges()?,
                None => {
                    return Err(ExperimentError::PowerControlUnavailable(
                        "a frequency sweep was requested without power control".to_string(),
                    ));
                }
            }
        }
        self.recorder.sink.check_writable()
    }

    /// Runs the whole session. Configuration errors surface before any power-state write.
    pub fn run(&mut self) -> Result<SessionOutcome, SessionFailure> {
        if let Err(error) = self.validate() {
            error!("Session configuration rejected: {error}");
            return Err(SessionFailure {
                error,
                restore: None,
                power_touched: false,
            });
        }

        let mut guard = RestoreGuard::new();
        match self.run_plan(&mut guard) {
            Ok(()) => {
                let restore = guard.release();
                let summaries = self.recorder.trace.summarize().unwrap_or_else(|e| {
                    warn!("Could not summarise the session: {e}");
                    Vec::new()
                });
                for summary in &summaries {
                    info!("{summary}");
                }
                info!(
                    "Session finished: {} record(s) in {}",
                    self.recorder.sink.written(),
                    self.recorder.sink.path().display()
                );
                Ok(SessionOutcome {
                    records_written: self.recorder.sink.written(),
                    summaries,
                    restore,
                })
            }
            Err(error) => {
                let power_touched = guard.is_armed();
                let restore = guard.release();
                let failure = SessionFailure {
                    error,
                    restore,
                    power_touched,
                };
                error!("Session aborted: {failure}");
                Err(failure)
            }
        }
    }

    fn run_plan(&mut self, guard: &mut RestoreGuard) -> Result<(), ExperimentError> {
        let selected = self.context.registry().selected();
        let points = self.settings.plan.points();
        info!("Selected benchmarks: {}", selected.join(", "));

        if let Some(power) = self.power.clone().filter(|_| self.settings.plan.is_sweep()) {
            // from here on every exit path restores
            guard.arm(Arc::clone(&power));
            power.snapshot()?;
            if self.settings.disable_smt {
                power.disable_smt()?;
            }
        }

        for frequency_mhz in points {
            self.check_cancelled()?;
            match (&self.power, self.settings.plan.is_sweep()) {
                (Some(power), true) => {
                    power.apply_frequency(frequency_mhz, &self.settings.governor)?;
                }
                _ => match current_frequency_mhz() {
                    Some(current) => info!("Running at the current frequency (~{current} MHz)"),
                    None => info!("Running at the current frequency"),
                },
            }
            for name in &selected {
                self.run_benchmark(name, frequency_mhz)?;
            }
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), ExperimentError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(ExperimentError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn run_benchmark(&mut self, name: &str, frequency_mhz: u32) -> Result<(), ExperimentError> {
        let unit = self
            .context
            .registry
            .unit_mut(name)
            .ok_or_else(|| ExperimentError::EmptySelection(format!("{name} is not registered")))?;
        let size = unit.effective_size(self.settings.size);
        let warmup = self.settings.warmup_iterations;
        let total = self.settings.iterations_per_point()?;
        info!(
            "Benchmark {name}: size {size}, {warmup} warmup + {} measured",
            self.settings.measurement_iterations
        );

        for iteration in 0..total {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(ExperimentError::Interrupted);
            }
            let phase = if iteration < warmup {
                Phase::Warmup
            } else {
                Phase::Measurement
            };
            let failed = |phase: Phase, message: String| ExperimentError::WorkloadExecutionFailed {
                benchmark: name.to_string(),
                phase,
                frequency_mhz,
                message,
            };

            guarded(|| unit.setup(size)).map_err(|message| failed(Phase::Setup, message))?;

            let before = try_sample(&mut self.meter);
            let start = Instant::now();
            let result = guarded(|| unit.execute(size));
            let elapsed = start.elapsed();
            let after = try_sample(&mut self.meter);

            let checksum = result.map_err(|message| failed(phase, message))?;
            black_box(checksum);

            let energy_joules = match (&before, &after) {
                (Some(before), Some(after)) => self.meter.delta(before, after),
                _ => f64::NAN,
            };
            let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

            if phase == Phase::Warmup {
                debug!(
                    "warmup,energy,algo={name},size={size},freq_mhz={frequency_mhz},joules={energy_joules:.9},time_ms={elapsed_ms:.3} (WARMUP - NOT LOGGED)"
                );
                continue;
            }
            info!(
                "energy,algo={name},size={size},freq_mhz={frequency_mhz},joules={energy_joules:.9},time_ms={elapsed_ms:.3}"
            );
            let record = ResultRecord {
                algorithm: name.to_string(),
                input_size: size,
                frequency_mhz,
                energy_joules,
                elapsed_ms,
            };
            self.recorder.persist(record)?;
        }
        Ok(())
    }
}

/// Samples the meter; a failed read costs this iteration its energy value, not the session.
fn try_sample(meter: &mut EnergyMeter) -> Option<EnergySample> {
    if !meter.is_available() {
        return None;
    }
    match meter.sample() {
        Ok(sample) => Some(sample),
        Err(e) => {
            warn!("Energy sample failed: {e}");
            None
        }
    }
}

/// Runs a workload call, turning both errors and panics into a message.
fn guarded<T>(call: impl FnOnce() -> Result<T, WorkloadError>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
