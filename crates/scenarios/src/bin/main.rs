//! Lockstep demo CLI
//!
//! Runs the bundled scenarios repeatedly and reports whether every run
//! produced the same interleaving.

use anyhow::Context;
use clap::{Parser, Subcommand};
use lockstep_runtime::{CounterSource, ExecutionMode};
use lockstep_scenarios::{ScenarioConfig, ScenarioKind, ScenarioRunner};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lockstep-demo")]
#[command(about = "Deterministic multithreading scenarios")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available scenarios
    List,

    /// Run a scenario repeatedly and compare the runs
    Run {
        /// Scenario TOML file; command line flags override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Scenario name (bank, counter, order, ping-pong, barrier)
        #[arg(short, long)]
        scenario: Option<ScenarioKind>,

        /// Worker threads
        #[arg(short, long)]
        threads: Option<usize>,

        /// Iterations per worker
        #[arg(short, long)]
        iterations: Option<usize>,

        /// Number of runs
        #[arg(short, long)]
        runs: Option<usize>,

        /// Workload seed
        #[arg(long)]
        seed: Option<u64>,

        /// Execution mode (deterministic, passthrough)
        #[arg(long)]
        mode: Option<ExecutionMode>,

        /// Clock source (software, hardware[:event], auto[:event])
        #[arg(long)]
        counter: Option<CounterSource>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            for kind in ScenarioKind::ALL {
                println!("{:<10} {}", kind.name(), kind.description());
            }
        }

        Commands::Run {
            config,
            scenario,
            threads,
            iterations,
            runs,
            seed,
            mode,
            counter,
            json,
        } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .init();

            let mut cfg = match &config {
                Some(path) => ScenarioConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ScenarioConfig::default(),
            };
            if let Some(kind) = scenario {
                cfg.scenario = kind;
            }
            if let Some(n) = threads {
                cfg = cfg.with_threads(n);
            }
            if let Some(n) = iterations {
                cfg = cfg.with_iterations(n);
            }
            if let Some(n) = runs {
                cfg = cfg.with_runs(n);
            }
            if let Some(s) = seed {
                cfg = cfg.with_seed(s);
            }
            if let Some(m) = mode {
                cfg = cfg.with_mode(m);
            }
            if let Some(c) = counter {
                cfg = cfg.with_counter(c);
            }

            let report = ScenarioRunner::new(cfg)?.run()?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                report.print();
            }
        }
    }

    Ok(())
}
