use crate::collectors::{ChannelReading, CounterProbe, EnergyCounterSource};
use crate::utils::errors::ExperimentError;

/// Source used when no energy counters can be read. Every read reports the meter as unavailable.
pub struct NullCounterSource {
    reason: String,
}

impl NullCounterSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl Default for NullCounterSource {
    fn default() -> Self {
        Self::new("energy counters disabled")
    }
}

impl EnergyCounterSource for NullCounterSource {
    fn name(&self) -> &str {
        "null"
    }

    fn probe(&mut self) -> CounterProbe {
        CounterProbe::unavailable(self.reason.clone())
    }

    fn read_raw(&mut self, _socket: usize) -> Result<ChannelReading, ExperimentError> {
        Err(ExperimentError::MeterUnavailable(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_source_is_unavailable() {
        let mut source = NullCounterSource::new("no hardware");
        let probe = source.probe();
        assert!(!probe.available);
        assert_eq!(probe.reason.as_deref(), Some("no hardware"));
        assert!(matches!(source.read_raw(0), Err(ExperimentError::MeterUnavailable(_))));
    }
}
