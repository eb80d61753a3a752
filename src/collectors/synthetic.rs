use crate::collectors::{ChannelReading, CounterProbe, EnergyCounterSource};
use crate::utils::errors::ExperimentError;
use std::collections::VecDeque;

/// Replays scripted counter readings, one frame per full sample.
///
/// A frame holds one [`ChannelReading`] per socket. Reading socket 0 advances to the next
/// frame; once the script is exhausted the last frame is repeated.
pub struct SyntheticCounterSource {
    socket_count: usize,
    counter_max: f64,
    frames: VecDeque<Vec<ChannelReading>>,
    current: Vec<ChannelReading>,
}

impl SyntheticCounterSource {
    pub fn new(socket_count: usize, counter_max: f64) -> Self {
        Self {
            socket_count,
            counter_max,
            frames: VecDeque::new(),
            current: vec![ChannelReading::default(); socket_count],
        }
    }

    /// Queue one frame of readings.
    pub fn push_frame(&mut self, frame: Vec<ChannelReading>) -> &mut Self {
        self.frames.push_back(frame);
        self
    }

    /// Convenience for single-socket scripts where only the package channel matters.
    pub fn with_package_values(counter_max: f64, values: &[f64]) -> Self {
        let mut source = Self::new(1, counter_max);
        for &v in values {
            source.push_frame(vec![ChannelReading::new(0.0, 0.0, v)]);
        }
        source
    }
}

impl EnergyCounterSource for SyntheticCounterSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn probe(&mut self) -> CounterProbe {
        CounterProbe::available(self.socket_count, self.counter_max)
    }

    fn read_raw(&mut self, socket: usize) -> Result<ChannelReading, ExperimentError> {
        if socket == 0 {
            if let Some(frame) = self.frames.pop_front() {
                self.current = frame;
            }
        }
        self.current
            .get(socket)
            .copied()
            .ok_or_else(|| ExperimentError::MeterUnavailable(format!("no synthetic reading for socket {socket}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_advance_on_socket_zero() {
        let mut source = SyntheticCounterSource::new(2, 100.0);
        source
            .push_frame(vec![ChannelReading::new(1.0, 2.0, 3.0), ChannelReading::new(4.0, 5.0, 6.0)])
            .push_frame(vec![ChannelReading::new(7.0, 8.0, 9.0), ChannelReading::new(1.0, 1.0, 1.0)]);

        assert_eq!(source.read_raw(0).unwrap().package, 3.0);
        assert_eq!(source.read_raw(1).unwrap().package, 6.0);
        assert_eq!(source.read_raw(0).unwrap().package, 9.0);
        assert_eq!(source.read_raw(1).unwrap().package, 1.0);
        // exhausted: last frame repeats
        assert_eq!(source.read_raw(0).unwrap().package, 9.0);
        assert!(source.read_raw(2).is_err());
    }
}
