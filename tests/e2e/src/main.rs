//! Pipe runner: one rank of a scenario per process
//!
//! Start it once per rank against the same config file:
//!
//! ```text
//! pipe_runner --config pipe.toml --rank 0 --scenario stress &
//! pipe_runner --config pipe.toml --rank 1 --scenario stress
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use kvpipe_e2e::{latency, smoke, stress, LatencyConfig, ScenarioReport, StressConfig};
use kvpipe_network::{PipeConfig, TensorPipe};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pipe config file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Overrides local_rank from the config file
    #[arg(short, long)]
    rank: Option<u32>,

    /// Scenario to run: smoke, stress or latency
    #[arg(short, long, default_value = "smoke")]
    scenario: String,

    /// Stress triplet count
    #[arg(long, default_value_t = 500)]
    triplets: usize,

    /// Workload seed, must match on both ranks
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Latency round trips per payload size
    #[arg(long, default_value_t = 50)]
    iterations: usize,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("kvpipe_e2e={log_level}").parse()?)
                .add_directive(format!("kvpipe_network={log_level}").parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = PipeConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(rank) = args.rank {
        config.local_rank = rank;
    }
    let rank = config.local_rank;
    info!(rank, scenario = %args.scenario, "Starting pipe runner");

    let pipe = TensorPipe::new(config)?;
    let report = run(&args, rank, &pipe);
    let flushed = pipe.flush();
    pipe.close()?;

    match report {
        Ok(report) => {
            flushed?;
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            error!(rank, error = %e, "Scenario failed");
            Err(e)
        }
    }
}

fn run(args: &Args, rank: u32, pipe: &TensorPipe) -> Result<ScenarioReport> {
    match args.scenario.as_str() {
        "smoke" => smoke(rank, pipe),
        "stress" => {
            let config = StressConfig {
                triplets: args.triplets,
                seed: args.seed,
                ..StressConfig::default()
            };
            stress(rank, pipe, &config)
        }
        "latency" => {
            let config = LatencyConfig {
                iterations: args.iterations,
                ..LatencyConfig::default()
            };
            latency(rank, pipe, &config)
        }
        other => bail!("Unknown scenario: {other}"),
    }
}

fn print_report(report: &ScenarioReport) {
    println!("scenario {} rank {}", report.scenario, report.rank);
    println!("  sent:     {}", report.values_sent);
    println!(
        "  received: {} ({} null)",
        report.values_received, report.nulls_received
    );
    println!("  elapsed:  {} ms", report.elapsed.as_millis());
    for sample in &report.latencies {
        println!(
            "  {:>9} B  mean {:>8} us  p50 {:>8} us  p99 {:>8} us",
            sample.nbytes,
            sample.mean.as_micros(),
            sample.p50.as_micros(),
            sample.p99.as_micros()
        );
    }
}
