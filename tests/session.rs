use energy_bench::collectors::SyntheticCounterSource;
use energy_bench::plan::{FrequencyPlan, SweepRange};
use energy_bench::power_state::{CpuKnob, InMemoryPower, PowerStateController};
use energy_bench::registry::{BenchmarkRegistry, ExecutionUnit};
use energy_bench::runner::{ExperimentContext, ExperimentRunner, RunSettings};
use energy_bench::sink::{HEADER, ResultSink};
use energy_bench::utils::errors::WorkloadError;
use energy_bench::workloads::{self, SortBenchmark};
use energy_bench::{EnergyMeter, ExperimentError};
use std::fs;
use std::sync::Arc;

struct Spin {
    name: &'static str,
}

impl ExecutionUnit for Spin {
    fn name(&self) -> &str {
        self.name
    }

    fn effective_size(&self, requested: usize) -> usize {
        requested / 10
    }

    fn execute(&mut self, size: usize) -> Result<u64, WorkloadError> {
        Ok((0..size as u64).fold(0, |acc, x| acc.wrapping_mul(31).wrapping_add(x)))
    }
}

fn sweep_settings() -> RunSettings {
    RunSettings {
        size: 1000,
        warmup_iterations: 2,
        measurement_iterations: 3,
        plan: FrequencyPlan::from_range(SweepRange {
            start_mhz: 1000,
            end_mhz: 2000,
            step_mhz: 500,
        })
        .unwrap(),
        governor: "userspace".to_string(),
        disable_smt: true,
        max_sink_failures: 3,
    }
}

#[test]
fn sweep_session_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let power = InMemoryPower::new(
        &[(0, "schedutil", 400_000, 4_000_000), (1, "schedutil", 400_000, 4_000_000)],
        Some(true),
    );
    let controller = Arc::new(PowerStateController::new(Box::new(power.clone())));

    let mut registry = BenchmarkRegistry::new();
    registry.register(Box::new(Spin { name: "spin_b" }), true);
    registry.register(Box::new(Spin { name: "spin_a" }), true);
    registry.register(Box::new(Spin { name: "other" }), true);
    let mut context = ExperimentContext::new(registry);
    context.select(Some("spin"));

    // one joule per invocation
    let values: Vec<f64> = (0..60).map(|i| (i / 2 + i % 2) as f64).collect();
    let meter = EnergyMeter::new(Box::new(SyntheticCounterSource::with_package_values(1e6, &values)));

    let mut runner = ExperimentRunner::new(
        context,
        meter,
        Some(Arc::clone(&controller)),
        ResultSink::new(tmp.path(), "it-session"),
        sweep_settings(),
    )
    .unwrap();
    let outcome = runner.run().unwrap();

    // 3 frequencies x 2 benchmarks x 3 measured iterations
    assert_eq!(outcome.records_written, 18);
    assert_eq!(outcome.summaries.len(), 6);
    assert!(outcome.summaries.iter().all(|s| s.count == 3 && s.mean_energy_j == 1.0));

    let content = fs::read_to_string(tmp.path().join("it-session.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines.len(), 19);
    assert!(lines[1].starts_with("spin_a,100,1000,1.000000000,"));
    assert!(lines[4].starts_with("spin_b,100,1000,"));
    assert!(lines[18].starts_with("spin_b,100,2000,"));
    assert!(!content.contains("other"));

    let report = outcome.restore.unwrap();
    assert!(report.is_clean());
    assert!(report.smt_left_disabled);
    assert_eq!(power.smt(), Some(false));
    for cpu in 0..2 {
        assert_eq!(power.value(cpu, CpuKnob::Governor).as_deref(), Some("schedutil"));
        assert_eq!(power.value(cpu, CpuKnob::MinFreq).as_deref(), Some("400000"));
        assert_eq!(power.value(cpu, CpuKnob::MaxFreq).as_deref(), Some("4000000"));
    }
    assert!(controller.restore().is_none());
}

#[test]
fn second_process_appends_to_same_session() {
    let tmp = tempfile::tempdir().unwrap();
    for _ in 0..2 {
        let mut registry = BenchmarkRegistry::new();
        registry.register(Box::new(SortBenchmark::quick()), true);
        let mut runner = ExperimentRunner::new(
            ExperimentContext::new(registry),
            EnergyMeter::detect(&tmp.path().join("no-rapl")),
            None,
            ResultSink::new(tmp.path(), "shared"),
            RunSettings {
                size: 256,
                warmup_iterations: 1,
                measurement_iterations: 2,
                plan: FrequencyPlan::Implicit,
                governor: "userspace".to_string(),
                disable_smt: false,
                max_sink_failures: 1,
            },
        )
        .unwrap();
        runner.run().unwrap();
    }
    let content = fs::read_to_string(tmp.path().join("shared.csv")).unwrap();
    assert_eq!(content.matches(HEADER).count(), 1);
    assert_eq!(content.lines().filter(|l| l.starts_with("quick_sort,256,0,NaN,")).count(), 4);
}

#[test]
fn sweep_without_power_control_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut runner = ExperimentRunner::new(
        ExperimentContext::new(workloads::default_registry()),
        EnergyMeter::detect(&tmp.path().join("no-rapl")),
        None,
        ResultSink::new(tmp.path(), "s"),
        sweep_settings(),
    )
    .unwrap();
    let failure = runner.run().unwrap_err();
    assert!(matches!(failure.error, ExperimentError::PowerControlUnavailable(_)));
    assert!(failure.restore.is_none());
}
