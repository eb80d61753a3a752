//! Energy measurement of CPU-bound workloads under a controlled CPU power state.
//!
//! A session brackets every workload invocation with RAPL counter reads, runs warmup
//! iterations before the recorded ones, and can sweep the CPU frequency while guaranteeing
//! that the original governor and frequency bounds are written back on every exit path.

pub mod utils {
    pub mod errors;
    pub mod logger;
    pub mod psutils;
    pub mod result_trace;
    pub mod signals;

    #[cfg(test)]
    pub(crate) mod mock_fs;
}

// Measurement
pub mod collectors;
pub mod energy_meter;

// Session
pub mod config;
pub mod plan;
pub mod power_state;
pub mod registry;
pub mod runner;
pub mod sink;
pub mod workloads;

pub use energy_meter::{EnergyDelta, EnergyMeter, EnergySample};
pub use power_state::{PowerStateController, RestoreReport};
pub use registry::{BenchmarkRegistry, ExecutionUnit};
pub use runner::{ExperimentContext, ExperimentRunner, RunSettings, SessionFailure, SessionOutcome};
pub use utils::errors::ExperimentError;
