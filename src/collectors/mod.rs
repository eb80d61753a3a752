//! Energy counter sources.
//!
//! The meter only talks to [`EnergyCounterSource`]. The concrete binding is picked once
//! at startup: [`PowercapSource`] when the RAPL powercap tree is readable, otherwise
//! [`NullCounterSource`].

use crate::utils::errors::ExperimentError;
use std::path::Path;

pub mod dummy;
pub mod rapl;
pub mod synthetic;

pub use dummy::NullCounterSource;
pub use rapl::PowercapSource;
pub use synthetic::SyntheticCounterSource;

/// Raw counter values of one socket, in joules.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelReading {
    /// DRAM energy when the socket exposes it, uncore otherwise.
    pub uncore_or_dram: f64,
    pub core: f64,
    pub package: f64,
}

impl ChannelReading {
    pub fn new(uncore_or_dram: f64, core: f64, package: f64) -> Self {
        Self {
            uncore_or_dram,
            core,
            package,
        }
    }
}

/// Outcome of the one-time capability probe.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterProbe {
    pub available: bool,
    pub socket_count: usize,
    /// Wraparound modulus of the counters, in joules.
    pub counter_max: f64,
    /// Why the source is unavailable, if it is.
    pub reason: Option<String>,
}

impl CounterProbe {
    pub fn available(socket_count: usize, counter_max: f64) -> Self {
        Self {
            available: true,
            socket_count,
            counter_max,
            reason: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            socket_count: 0,
            counter_max: 0.0,
            reason: Some(reason.into()),
        }
    }
}

pub trait EnergyCounterSource: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Discover the counters. Called exactly once, by the meter.
    fn probe(&mut self) -> CounterProbe;

    /// Read the current counters of one socket.
    fn read_raw(&mut self, socket: usize) -> Result<ChannelReading, ExperimentError>;
}

/// Picks the hardware binding if it probes as available, the null source otherwise.
pub fn detect_source(rapl_path: &Path) -> Box<dyn EnergyCounterSource> {
    if PowercapSource::is_available(rapl_path) {
        Box::new(PowercapSource::new(rapl_path))
    } else {
        Box::new(NullCounterSource::new(format!(
            "no powercap RAPL tree at {}",
            rapl_path.display()
        )))
    }
}
