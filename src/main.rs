use clap::{Parser, Subcommand};
use energy_bench::config::ExperimentConfig;
use energy_bench::config::cli::RunArgs;
use energy_bench::runner::{ExperimentContext, ExperimentRunner};
use energy_bench::utils::logger::setup_logger;
use energy_bench::utils::psutils::effective_username;
use energy_bench::utils::signals::Interrupts;
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::atomic::Ordering;

#[derive(Parser)]
#[command(version, about = "Measures the energy of CPU-bound workloads, optionally across a CPU frequency sweep")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

/// Run options when no subcommand is given: defaults plus environment only.
#[derive(Parser)]
struct DefaultRun {
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run a measurement session (default).
    Run(RunArgs),
    /// Print the benchmarks a session would run, then exit.
    List {
        /// Comma-separated benchmark names or prefixes.
        #[arg(long, env = "BENCHMARK_FILTER")]
        filter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logger();
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Run(DefaultRun::parse_from(["energy-bench"]).run));
    match command {
        Command::List { filter } => list(filter.as_deref()),
        Command::Run(args) => run(args).await,
    }
}

fn list(filter: Option<&str>) -> ExitCode {
    let mut context = ExperimentContext::with_defaults();
    context.select(filter);
    for name in context.registry().selected() {
        println!("{name}");
    }
    ExitCode::SUCCESS
}

async fn run(args: RunArgs) -> ExitCode {
    let mut config = match ExperimentConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);
    info!("Session {} started by {}", config.session_id, effective_username());

    let mut runner = match ExperimentRunner::from_config(&config) {
        Ok(runner) => runner,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let cancel = runner.cancel_handle();
    let power = runner.power_controller();
    // installed before any power-state write so that kill and timeout also restore
    let mut interrupts = match Interrupts::listen() {
        Ok(interrupts) => interrupts,
        Err(e) => {
            error!("Cannot install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Workloads are CPU-bound and synchronous: they run on a blocking thread while this task
    // waits for either the session or an interrupt.
    let mut session = tokio::task::spawn_blocking(move || runner.run());
    tokio::select! {
        joined = &mut session => match joined {
            Ok(Ok(outcome)) => {
                if let Some(report) = outcome.restore {
                    println!("{report}");
                }
                println!("{} record(s) written", outcome.records_written);
                ExitCode::SUCCESS
            }
            Ok(Err(failure)) => {
                eprintln!("energy-bench: {failure}");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!("Session thread failed: {e}");
                ExitCode::FAILURE
            }
        },
        signal = interrupts.recv() => {
            warn!("{signal} received, restoring power state");
            cancel.store(true, Ordering::SeqCst);
            match power.as_ref().and_then(|controller| controller.restore()) {
                Some(report) => eprintln!("{report}"),
                None => eprintln!("No power state to restore"),
            }
            // the workload in flight is not waited for
            std::process::exit(signal.exit_code().into());
        }
    }
}
