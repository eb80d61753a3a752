use std::fmt;
use thiserror::Error;

/// Which half of the warmup/measurement lifecycle an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Warmup,
    Measurement,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => f.write_str("setup"),
            Phase::Warmup => f.write_str("warmup"),
            Phase::Measurement => f.write_str("measurement"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Energy meter unavailable: {0}")]
    MeterUnavailable(String),
    #[error("Power control unavailable: {0}")]
    PowerControlUnavailable(String),
    #[error("Failed to write {value:?} to {knob} of cpu{cpu}: {source}")]
    PowerWriteFailed {
        cpu: u32,
        knob: String,
        value: String,
        #[source]
        source: std::io::Error,
    },
    #[error("No benchmark selected: {0}")]
    EmptySelection(String),
    #[error("Invalid frequency plan: {0}")]
    InvalidPlan(String),
    #[error("Benchmark {benchmark} failed during {phase} at {frequency_mhz} MHz: {message}")]
    WorkloadExecutionFailed {
        benchmark: String,
        phase: Phase,
        frequency_mhz: u32,
        message: String,
    },
    #[error("Result sink write failed: {0}")]
    SinkWriteFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Session interrupted")]
    Interrupted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a workload's own `setup` or `execute`.
#[derive(Error, Debug)]
pub enum WorkloadError {
    #[error("invalid input size {size}: {reason}")]
    InvalidSize { size: usize, reason: String },
    #[error("{0}")]
    Other(String),
}
