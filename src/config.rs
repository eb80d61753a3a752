//! Session configuration: TOML file, then command-line flags and environment on top.

use crate::collectors::rapl::POWERCAP_RAPL_PATH;
use crate::plan::SweepRange;
use crate::power_state::CPU_SYSFS_PATH;
use crate::utils::errors::ExperimentError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Options of one experiment session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Requested input size, mapped by each workload to the size it actually uses.
    pub size: usize,
    pub warmup_iterations: u32,
    pub measurement_iterations: u32,
    /// Comma-separated names or prefixes. `None` keeps the default selection.
    pub filter: Option<String>,
    /// Absent means a single implicit point at the current frequency.
    pub sweep: Option<SweepRange>,
    pub governor: String,
    pub disable_smt: bool,
    pub output_dir: PathBuf,
    /// Cooperating processes sharing a session id append to the same result file.
    pub session_id: String,
    pub rapl_path: PathBuf,
    pub cpu_sysfs_path: PathBuf,
    /// Consecutive sink failures tolerated before the session stops.
    pub max_sink_failures: u32,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            size: 10_000,
            warmup_iterations: 5,
            measurement_iterations: 5,
            filter: None,
            sweep: None,
            governor: "userspace".to_string(),
            disable_smt: true,
            output_dir: PathBuf::from("target"),
            session_id: default_session_id(),
            rapl_path: PathBuf::from(POWERCAP_RAPL_PATH),
            cpu_sysfs_path: PathBuf::from(CPU_SYSFS_PATH),
            max_sink_failures: 3,
        }
    }
}

pub fn default_session_id() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

impl ExperimentConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ExperimentError> {
        toml::from_str(content).map_err(|e| ExperimentError::Config(e.to_string()))
    }

    /// Loads `path` if given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ExperimentError> {
        match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .map_err(|e| ExperimentError::Config(format!("cannot read {}: {e}", path.display())))?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.size == 0 {
            return Err(ExperimentError::Config("size must be at least 1".to_string()));
        }
        if self.measurement_iterations == 0 {
            return Err(ExperimentError::Config(
                "measurement_iterations must be at least 1".to_string(),
            ));
        }
        if self.warmup_iterations.checked_add(self.measurement_iterations).is_none() {
            return Err(ExperimentError::Config(
                "warmup_iterations + measurement_iterations is too large".to_string(),
            ));
        }
        if self.max_sink_failures == 0 {
            return Err(ExperimentError::Config("max_sink_failures must be at least 1".to_string()));
        }
        if self.session_id.is_empty() || self.session_id.contains(['/', '\\']) {
            return Err(ExperimentError::Config(format!(
                "session id {:?} cannot be used as a file name",
                self.session_id
            )));
        }
        Ok(())
    }
}

/// Command-line flags layered over the file configuration.
pub mod cli {
    use super::ExperimentConfig;
    use crate::plan::SweepRange;
    use clap::Args;
    use std::path::PathBuf;

    #[derive(Args, Debug, Clone, Default)]
    pub struct RunArgs {
        /// Path to a TOML config file.
        #[arg(long, env = "ENERGY_BENCH_CONFIG")]
        pub config: Option<PathBuf>,

        /// Requested input size.
        #[arg(long)]
        pub size: Option<usize>,

        /// Warmup iterations per benchmark and frequency point (not recorded).
        #[arg(long)]
        pub warmup: Option<u32>,

        /// Measured iterations per benchmark and frequency point.
        #[arg(long)]
        pub iterations: Option<u32>,

        /// Comma-separated benchmark names or prefixes.
        #[arg(long, env = "BENCHMARK_FILTER")]
        pub filter: Option<String>,

        /// First frequency of the sweep, in MHz.
        #[arg(long, requires = "sweep_step")]
        pub sweep_start: Option<u32>,

        /// Last frequency of the sweep, in MHz.
        #[arg(long, requires = "sweep_step")]
        pub sweep_end: Option<u32>,

        /// Sweep step in MHz. Without it the machine runs at its current frequency.
        #[arg(long, requires_all = ["sweep_start", "sweep_end"])]
        pub sweep_step: Option<u32>,

        /// Governor applied at each frequency point.
        #[arg(long)]
        pub governor: Option<String>,

        /// Leave SMT enabled during the sweep.
        #[arg(long)]
        pub keep_smt: bool,

        /// Directory receiving `<session-id>.csv`.
        #[arg(long)]
        pub output_dir: Option<PathBuf>,

        /// Session identifier shared by cooperating processes.
        #[arg(long, env = "ENERGY_BENCH_SESSION")]
        pub session_id: Option<String>,

        #[arg(long)]
        pub rapl_path: Option<PathBuf>,

        #[arg(long)]
        pub cpu_sysfs_path: Option<PathBuf>,

        #[arg(long)]
        pub max_sink_failures: Option<u32>,
    }

    impl RunArgs {
        /// Overrides the fields given on the command line.
        pub fn apply(&self, config: &mut ExperimentConfig) {
            if let Some(size) = self.size {
                config.size = size;
            }
            if let Some(warmup) = self.warmup {
                config.warmup_iterations = warmup;
            }
            if let Some(iterations) = self.iterations {
                config.measurement_iterations = iterations;
            }
            if let Some(filter) = &self.filter {
                config.filter = Some(filter.clone());
            }
            if let (Some(start_mhz), Some(end_mhz), Some(step_mhz)) = (self.sweep_start, self.sweep_end, self.sweep_step) {
                config.sweep = Some(SweepRange {
                    start_mhz,
                    end_mhz,
                    step_mhz,
                });
            }
            if let Some(governor) = &self.governor {
                config.governor = governor.clone();
            }
            if self.keep_smt {
                config.disable_smt = false;
            }
            if let Some(dir) = &self.output_dir {
                config.output_dir = dir.clone();
            }
            if let Some(id) = &self.session_id {
                config.session_id = id.clone();
            }
            if let Some(path) = &self.rapl_path {
                config.rapl_path = path.clone();
            }
            if let Some(path) = &self.cpu_sysfs_path {
                config.cpu_sysfs_path = path.clone();
            }
            if let Some(max) = self.max_sink_failures {
                config.max_sink_failures = max;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::cli::RunArgs;
    use super::*;
    use clap::Parser;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_defaults() {
        let config = ExperimentConfig::default();
        assert_eq!(config.size, 10_000);
        assert_eq!(config.warmup_iterations, 5);
        assert_eq!(config.measurement_iterations, 5);
        assert_eq!(config.governor, "userspace");
        assert!(config.disable_smt);
        assert_eq!(config.max_sink_failures, 3);
        assert!(config.sweep.is_none());
        assert_eq!(config.session_id.len(), "20260101-000000".len());
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let config = ExperimentConfig::from_toml(indoc! {r#"
            size = 500
            filter = "nbody,fasta"
            session_id = "run-1"

            [sweep]
            start_mhz = 1000
            end_mhz = 2000
            step_mhz = 500
        "#})
        .unwrap();
        assert_eq!(config.size, 500);
        assert_eq!(config.filter.as_deref(), Some("nbody,fasta"));
        assert_eq!(config.session_id, "run-1");
        assert_eq!(
            config.sweep,
            Some(SweepRange {
                start_mhz: 1000,
                end_mhz: 2000,
                step_mhz: 500
            })
        );
        assert_eq!(config.measurement_iterations, 5);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            ExperimentConfig::from_toml("sise = 3"),
            Err(ExperimentError::Config(_))
        ));
    }

    #[test]
    fn test_validation() {
        let invalid = [
            ExperimentConfig {
                size: 0,
                ..Default::default()
            },
            ExperimentConfig {
                measurement_iterations: 0,
                ..Default::default()
            },
            ExperimentConfig {
                max_sink_failures: 0,
                ..Default::default()
            },
            ExperimentConfig {
                warmup_iterations: u32::MAX,
                ..Default::default()
            },
            ExperimentConfig {
                session_id: "../x/y".to_string(),
                ..Default::default()
            },
        ];
        for config in invalid {
            assert!(config.validate().is_err(), "{config:?}");
        }
        let no_warmup = ExperimentConfig {
            warmup_iterations: 0,
            ..Default::default()
        };
        no_warmup.validate().unwrap();
    }

    #[test]
    fn test_cli_overrides() {
        let cli = TestCli::try_parse_from([
            "test",
            "--size",
            "42",
            "--iterations",
            "2",
            "--sweep-start",
            "1000",
            "--sweep-end",
            "1400",
            "--sweep-step",
            "200",
            "--keep-smt",
            "--session-id",
            "abc",
        ])
        .unwrap();
        let mut config = ExperimentConfig::default();
        cli.run.apply(&mut config);
        assert_eq!(config.size, 42);
        assert_eq!(config.measurement_iterations, 2);
        assert_eq!(config.warmup_iterations, 5);
        assert!(!config.disable_smt);
        assert_eq!(config.session_id, "abc");
        assert_eq!(config.sweep.map(|s| s.step_mhz), Some(200));
    }

    #[test]
    fn test_cli_partial_sweep_is_rejected() {
        assert!(TestCli::try_parse_from(["test", "--sweep-step", "100"]).is_err());
        assert!(TestCli::try_parse_from(["test", "--sweep-start", "100"]).is_err());
    }
}
