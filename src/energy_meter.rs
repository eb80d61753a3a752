use crate::collectors::{ChannelReading, EnergyCounterSource, detect_source};
use crate::utils::errors::ExperimentError;
use log::{info, warn};
use std::path::Path;

/// Raw counter values of every socket, captured at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergySample {
    readings: Vec<ChannelReading>,
}

impl EnergySample {
    pub fn new(readings: Vec<ChannelReading>) -> Self {
        Self { readings }
    }

    pub fn sockets(&self) -> &[ChannelReading] {
        &self.readings
    }

    pub fn socket_count(&self) -> usize {
        self.readings.len()
    }
}

/// Per-socket, per-channel energy between two samples, in joules.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyDelta {
    pub per_socket: Vec<ChannelReading>,
    /// At least one channel of one socket wrapped during the interval.
    pub wrapped: bool,
}

impl EnergyDelta {
    /// Package energy summed across sockets.
    pub fn package_total(&self) -> f64 {
        self.per_socket.iter().map(|r| r.package).sum()
    }
}

enum MeterState {
    Available { socket_count: usize, counter_max: f64 },
    Unavailable(String),
}

/// Reads the energy counters around a region of code and turns pairs of samples into deltas.
///
/// The counter source is probed exactly once, in the constructor. When the probe fails the
/// meter stays disabled for its whole lifetime and [`EnergyMeter::sample`] short-circuits.
pub struct EnergyMeter {
    source: Box<dyn EnergyCounterSource>,
    state: MeterState,
}

impl EnergyMeter {
    pub fn new(mut source: Box<dyn EnergyCounterSource>) -> Self {
        let probe = source.probe();
        let state = if probe.available && probe.socket_count > 0 {
            info!(
                "Energy counters available via {}: {} socket(s), wraparound at {:.6} J",
                source.name(),
                probe.socket_count,
                probe.counter_max
            );
            MeterState::Available {
                socket_count: probe.socket_count,
                counter_max: probe.counter_max,
            }
        } else {
            let reason = probe
                .reason
                .unwrap_or_else(|| format!("{} reported no socket", source.name()));
            warn!(
                "{}",
                indoc::formatdoc! {"
                    Energy measurement is not available: {reason}.
                    Timings are still recorded, energy is reported as NaN.
                    Reading RAPL counters usually requires root or read access to the powercap tree, e.g.
                        sudo chmod a+r -R /sys/devices/virtual/powercap/intel-rapl"}
            );
            MeterState::Unavailable(reason)
        };
        Self { source, state }
    }

    /// Meter backed by the powercap tree at `rapl_path`, or a disabled meter if it cannot be used.
    pub fn detect(rapl_path: &Path) -> Self {
        Self::new(detect_source(rapl_path))
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, MeterState::Available { .. })
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            MeterState::Available { .. } => None,
            MeterState::Unavailable(reason) => Some(reason),
        }
    }

    pub fn counter_max(&self) -> Option<f64> {
        match self.state {
            MeterState::Available { counter_max, .. } => Some(counter_max),
            MeterState::Unavailable(_) => None,
        }
    }

    /// Reads every socket. Fails with `MeterUnavailable` without touching the source if the probe failed.
    pub fn sample(&mut self) -> Result<EnergySample, ExperimentError> {
        let socket_count = match &self.state {
            MeterState::Available { socket_count, .. } => *socket_count,
            MeterState::Unavailable(reason) => return Err(ExperimentError::MeterUnavailable(reason.clone())),
        };
        let mut readings = Vec::with_capacity(socket_count);
        for socket in 0..socket_count {
            readings.push(self.source.read_raw(socket)?);
        }
        Ok(EnergySample::new(readings))
    }

    /// Wraparound-corrected difference of every channel, or `None` if the samples do not line up.
    pub fn delta_channels(&self, before: &EnergySample, after: &EnergySample) -> Option<EnergyDelta> {
        let counter_max = self.counter_max()?;
        if before.socket_count() != after.socket_count() {
            warn!(
                "Energy samples have different socket counts ({} vs {})",
                before.socket_count(),
                after.socket_count()
            );
            return None;
        }

        let mut wrapped = false;
        let per_socket = before
            .sockets()
            .iter()
            .zip(after.sockets())
            .map(|(b, a)| {
                wrapped |= a.uncore_or_dram < b.uncore_or_dram || a.core < b.core || a.package < b.package;
                ChannelReading::new(
                    corrected_difference(b.uncore_or_dram, a.uncore_or_dram, counter_max),
                    corrected_difference(b.core, a.core, counter_max),
                    corrected_difference(b.package, a.package, counter_max),
                )
            })
            .collect();
        if wrapped {
            log::debug!("Energy counter wrapped during the measured interval");
        }
        Some(EnergyDelta { per_socket, wrapped })
    }

    /// Package energy in joules, summed across sockets. `NaN` when it cannot be computed.
    pub fn delta(&self, before: &EnergySample, after: &EnergySample) -> f64 {
        self.delta_channels(before, after)
            .map(|d| d.package_total())
            .unwrap_or(f64::NAN)
    }
}

/// Difference between two readings of a counter that wraps at `counter_max`.
///
/// At most one wrap is assumed: a reading lower than the previous one means the counter
/// went past `counter_max` once.
pub fn corrected_difference(before: f64, after: f64, counter_max: f64) -> f64 {
    if after >= before {
        after - before
    } else {
        ((counter_max - before) + after).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{NullCounterSource, SyntheticCounterSource};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const MAX: f64 = 262143.32885;

    fn sample(values: &[(f64, f64, f64)]) -> EnergySample {
        EnergySample::new(values.iter().map(|&(d, c, p)| ChannelReading::new(d, c, p)).collect())
    }

    fn meter_with_max(counter_max: f64) -> EnergyMeter {
        EnergyMeter::new(Box::new(SyntheticCounterSource::new(2, counter_max)))
    }

    #[test]
    fn test_monotonic_delta_is_plain_difference() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let before: f64 = rng.gen_range(0.0..MAX);
            let after: f64 = rng.gen_range(before..=MAX);
            assert_eq!(corrected_difference(before, after, MAX), after - before);
        }
    }

    #[test]
    fn test_wrapped_delta_is_corrected() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let after: f64 = rng.gen_range(0.0..MAX / 2.0);
            let before: f64 = rng.gen_range(after + 1e-3..MAX);
            let delta = corrected_difference(before, after, MAX);
            assert_eq!(delta, (MAX - before) + after);
            assert!(delta >= 0.0);
        }
    }

    #[test]
    fn test_identical_samples_give_zero_not_nan() {
        let meter = meter_with_max(MAX);
        let s = sample(&[(1.0, 2.0, 3.0), (4.0, 5.0, 6.0)]);
        let delta = meter.delta(&s, &s.clone());
        assert_eq!(delta, 0.0);
        assert!(!delta.is_nan());
    }

    #[test]
    fn test_correction_is_per_socket_and_per_channel() {
        let meter = meter_with_max(100.0);
        // socket 0 package wraps, socket 1 does not; socket 0 core wraps independently
        let before = sample(&[(10.0, 95.0, 90.0), (10.0, 10.0, 20.0)]);
        let after = sample(&[(15.0, 5.0, 5.0), (12.0, 11.0, 30.0)]);

        let delta = meter.delta_channels(&before, &after).unwrap();
        assert!(delta.wrapped);
        assert_eq!(delta.per_socket[0], ChannelReading::new(5.0, 10.0, 15.0));
        assert_eq!(delta.per_socket[1], ChannelReading::new(2.0, 1.0, 10.0));
        assert_eq!(meter.delta(&before, &after), 25.0);
    }

    #[test]
    fn test_socket_mismatch_yields_nan() {
        let meter = meter_with_max(MAX);
        let before = sample(&[(0.0, 0.0, 1.0)]);
        let after = sample(&[(0.0, 0.0, 2.0), (0.0, 0.0, 2.0)]);
        assert!(meter.delta(&before, &after).is_nan());
    }

    #[test]
    fn test_sample_reads_every_socket() {
        let mut source = SyntheticCounterSource::new(2, MAX);
        source.push_frame(vec![ChannelReading::new(0.0, 0.0, 1.0), ChannelReading::new(0.0, 0.0, 2.0)]);
        source.push_frame(vec![ChannelReading::new(0.0, 0.0, 4.0), ChannelReading::new(0.0, 0.0, 8.0)]);
        let mut meter = EnergyMeter::new(Box::new(source));

        let before = meter.sample().unwrap();
        let after = meter.sample().unwrap();
        assert_eq!(before.socket_count(), 2);
        assert_eq!(meter.delta(&before, &after), 9.0);
    }

    #[test]
    fn test_unavailable_meter_short_circuits() {
        let mut meter = EnergyMeter::new(Box::new(NullCounterSource::new("virtualized host")));
        assert!(!meter.is_available());
        assert_eq!(meter.unavailable_reason(), Some("virtualized host"));
        assert!(matches!(meter.sample(), Err(ExperimentError::MeterUnavailable(_))));
        assert!(meter.sample().is_err());
        let s = sample(&[(0.0, 0.0, 1.0)]);
        assert!(meter.delta(&s, &s).is_nan());
    }
}
