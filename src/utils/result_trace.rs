//! Result Trace Module
//!
//! In-memory copy of every record written during a session, kept as a polars `DataFrame`
//! with columns `algorithm | input_size | frequency_mhz | energy_j | elapsed_ms`, and
//! summarised per (algorithm, frequency) when the session ends.
//!
//! # Examples
//!
//! ```ignore
//! let mut trace = ResultTrace::new()?;
//! trace.append(&[record])?;
//! for summary in trace.summarize()? {
//!     info!("{summary}");
//! }
//! ```

use crate::sink::ResultRecord;
use crate::utils::errors::ExperimentError;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fmt;

pub struct ResultTrace {
    /// DataFrame: algorithm | input_size | frequency_mhz | energy_j | elapsed_ms
    data: DataFrame,
}

/// Aggregate of the measured iterations of one benchmark at one frequency point.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSummary {
    pub algorithm: String,
    pub frequency_mhz: u32,
    pub count: usize,
    /// Mean over the iterations with a known energy; `NaN` when there are none.
    pub mean_energy_j: f64,
    pub mean_elapsed_ms: f64,
}

impl fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "summary,algo={},freq_mhz={},n={},mean_joules={:.9},mean_time_ms={:.3}",
            self.algorithm, self.frequency_mhz, self.count, self.mean_energy_j, self.mean_elapsed_ms
        )
    }
}

fn trace_error(context: &str, err: PolarsError) -> ExperimentError {
    ExperimentError::SinkWriteFailed(format!("{context}: {err}"))
}

fn records_frame(records: &[ResultRecord]) -> Result<DataFrame, PolarsError> {
    df![
        "algorithm" => records.iter().map(|r| r.algorithm.clone()).collect::<Vec<_>>(),
        "input_size" => records.iter().map(|r| r.input_size as u64).collect::<Vec<_>>(),
        "frequency_mhz" => records.iter().map(|r| r.frequency_mhz).collect::<Vec<_>>(),
        "energy_j" => records.iter().map(|r| r.energy_joules).collect::<Vec<_>>(),
        "elapsed_ms" => records.iter().map(|r| r.elapsed_ms).collect::<Vec<_>>(),
    ]
}

impl ResultTrace {
    pub fn new() -> Result<Self, ExperimentError> {
        let data = records_frame(&[]).map_err(|e| trace_error("Failed to create result trace", e))?;
        Ok(Self { data })
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn row_count(&self) -> usize {
        self.data.height()
    }

    pub fn append(&mut self, records: &[ResultRecord]) -> Result<(), ExperimentError> {
        if records.is_empty() {
            return Ok(());
        }
        let new_data = records_frame(records).map_err(|e| trace_error("Failed to create record frame", e))?;
        self.data
            .vstack_mut(&new_data)
            .map_err(|e| trace_error("Failed to append trace data", e))?;
        Ok(())
    }

    /// One entry per (algorithm, frequency), ordered by frequency then algorithm.
    pub fn summarize(&self) -> Result<Vec<TraceSummary>, ExperimentError> {
        let column = |name: &str| {
            self.data
                .column(name)
                .map_err(|e| trace_error(&format!("Failed to access {name} column"), e))
        };
        let algorithms = column("algorithm")?.str().map_err(|e| trace_error("algorithm", e))?;
        let frequencies = column("frequency_mhz")?.u32().map_err(|e| trace_error("frequency_mhz", e))?;
        let energies = column("energy_j")?.f64().map_err(|e| trace_error("energy_j", e))?;
        let elapsed = column("elapsed_ms")?.f64().map_err(|e| trace_error("elapsed_ms", e))?;

        // (frequency, algorithm) -> (count, energy sum, energy count, elapsed sum)
        let mut groups: BTreeMap<(u32, String), (usize, f64, usize, f64)> = BTreeMap::new();
        let rows = algorithms
            .iter()
            .zip(frequencies.iter())
            .zip(energies.iter())
            .zip(elapsed.iter());
        for (((algorithm, frequency), energy), time) in rows {
            let (Some(algorithm), Some(frequency)) = (algorithm, frequency) else {
                continue;
            };
            let entry = groups.entry((frequency, algorithm.to_string())).or_default();
            entry.0 += 1;
            if let Some(energy) = energy.filter(|e| !e.is_nan()) {
                entry.1 += energy;
                entry.2 += 1;
            }
            entry.3 += time.unwrap_or(0.0);
        }

        Ok(groups
            .into_iter()
            .map(|((frequency_mhz, algorithm), (count, energy_sum, energy_count, elapsed_sum))| TraceSummary {
                algorithm,
                frequency_mhz,
                count,
                mean_energy_j: if energy_count == 0 {
                    f64::NAN
                } else {
                    energy_sum / energy_count as f64
                },
                mean_elapsed_ms: elapsed_sum / count as f64,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(algorithm: &str, frequency_mhz: u32, energy_joules: f64, elapsed_ms: f64) -> ResultRecord {
        ResultRecord {
            algorithm: algorithm.to_string(),
            input_size: 10,
            frequency_mhz,
            energy_joules,
            elapsed_ms,
        }
    }

    #[test]
    fn test_append_data() {
        let mut trace = ResultTrace::new().unwrap();
        assert_eq!(trace.row_count(), 0);
        trace.append(&[record("a", 0, 1.0, 2.0), record("b", 0, 3.0, 4.0)]).unwrap();
        trace.append(&[]).unwrap();
        trace.append(&[record("a", 0, 5.0, 6.0)]).unwrap();
        assert_eq!(trace.row_count(), 3);
        assert_eq!(trace.data().get_column_names().len(), 5);
    }

    #[test]
    fn test_summary_groups_and_means() {
        let mut trace = ResultTrace::new().unwrap();
        trace
            .append(&[
                record("nbody", 2000, 2.0, 10.0),
                record("nbody", 1000, 1.0, 20.0),
                record("nbody", 1000, 3.0, 40.0),
                record("fasta", 1000, 0.5, 5.0),
            ])
            .unwrap();
        let summaries = trace.summarize().unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].algorithm, "fasta");
        assert_eq!(summaries[1].algorithm, "nbody");
        assert_eq!(summaries[1].frequency_mhz, 1000);
        assert_eq!(summaries[1].count, 2);
        assert_eq!(summaries[1].mean_energy_j, 2.0);
        assert_eq!(summaries[1].mean_elapsed_ms, 30.0);
        assert_eq!(summaries[2].frequency_mhz, 2000);
    }

    #[test]
    fn test_summary_ignores_nan_energy() {
        let mut trace = ResultTrace::new().unwrap();
        trace
            .append(&[record("a", 0, f64::NAN, 1.0), record("a", 0, 4.0, 3.0)])
            .unwrap();
        let summary = &trace.summarize().unwrap()[0];
        assert_eq!(summary.count, 2);
        assert_eq!(summary.mean_energy_j, 4.0);
        assert_eq!(summary.mean_elapsed_ms, 2.0);

        let mut unmetered = ResultTrace::new().unwrap();
        unmetered.append(&[record("a", 0, f64::NAN, 1.0)]).unwrap();
        assert!(unmetered.summarize().unwrap()[0].mean_energy_j.is_nan());
    }
}
