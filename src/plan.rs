use crate::utils::errors::ExperimentError;
use serde::Deserialize;

/// Sweep bounds in MHz, as read from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SweepRange {
    pub start_mhz: u32,
    pub end_mhz: u32,
    pub step_mhz: u32,
}

/// Ordered frequency points of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrequencyPlan {
    /// A single point at whatever frequency the machine is currently running; recorded as 0 MHz.
    Implicit,
    /// Strictly increasing, non-empty.
    Sweep(Vec<u32>),
}

impl FrequencyPlan {
    /// Materializes `start, start + step, ...` up to and including `end`. A point past `end` is
    /// never emitted, so `end` itself only appears when it falls on the step grid.
    pub fn from_range(range: SweepRange) -> Result<Self, ExperimentError> {
        let SweepRange {
            start_mhz,
            end_mhz,
            step_mhz,
        } = range;
        if step_mhz == 0 {
            return Err(ExperimentError::InvalidPlan("step must be positive".to_string()));
        }
        if start_mhz == 0 {
            return Err(ExperimentError::InvalidPlan("start frequency must be positive".to_string()));
        }
        if start_mhz > end_mhz {
            return Err(ExperimentError::InvalidPlan(format!(
                "start {} MHz is above end {} MHz",
                start_mhz, end_mhz
            )));
        }
        let points = (start_mhz..=end_mhz).step_by(step_mhz as usize).collect();
        Ok(FrequencyPlan::Sweep(points))
    }

    pub fn from_options(range: Option<SweepRange>) -> Result<Self, ExperimentError> {
        match range {
            Some(range) => Self::from_range(range),
            None => Ok(FrequencyPlan::Implicit),
        }
    }

    pub fn is_sweep(&self) -> bool {
        matches!(self, FrequencyPlan::Sweep(_))
    }

    /// Points in execution order; the implicit point is reported as `0`.
    pub fn points(&self) -> Vec<u32> {
        match self {
            FrequencyPlan::Implicit => vec![0],
            FrequencyPlan::Sweep(points) => points.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn range(start_mhz: u32, end_mhz: u32, step_mhz: u32) -> SweepRange {
        SweepRange {
            start_mhz,
            end_mhz,
            step_mhz,
        }
    }

    #[test]
    fn test_inclusive_end() {
        let plan = FrequencyPlan::from_range(range(1000, 2000, 500)).unwrap();
        assert_eq!(plan.points(), vec![1000, 1500, 2000]);
    }

    #[test]
    fn test_end_off_grid() {
        let plan = FrequencyPlan::from_range(range(1000, 2100, 500)).unwrap();
        assert_eq!(plan.points(), vec![1000, 1500, 2000]);
    }

    #[test]
    fn test_single_point() {
        let plan = FrequencyPlan::from_range(range(1200, 1200, 100)).unwrap();
        assert_eq!(plan.points(), vec![1200]);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(matches!(
            FrequencyPlan::from_range(range(1000, 2000, 0)),
            Err(ExperimentError::InvalidPlan(_))
        ));
        assert!(matches!(
            FrequencyPlan::from_range(range(2000, 1000, 100)),
            Err(ExperimentError::InvalidPlan(_))
        ));
        assert!(FrequencyPlan::from_range(range(0, 1000, 100)).is_err());
    }

    #[test]
    fn test_implicit() {
        let plan = FrequencyPlan::from_options(None).unwrap();
        assert!(!plan.is_sweep());
        assert_eq!(plan.points(), vec![0]);
    }
}
