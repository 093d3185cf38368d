//! Seeded simulation runner.
//!
//! # Usage
//!
//! ```bash
//! # One chaotic run with faults
//! roomsync-sim --seed 42 --faults
//!
//! # Sweep 100 seeds in lockstep mode
//! roomsync-sim --seed 0 --runs 100 --lockstep
//! ```

use clap::Parser;
use roomsync_harness::{SimConfig, Simulation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Roomsync deterministic simulation
#[derive(Parser, Debug)]
#[command(name = "roomsync-sim")]
#[command(about = "Run seeded multi-client sync simulations against an in-memory hub")]
#[command(version)]
struct Args {
    /// First seed
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Number of consecutive seeds to run
    #[arg(short, long, default_value = "1")]
    runs: u64,

    /// Simulated clients per run
    #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u16).range(1..))]
    clients: u16,

    /// Random steps per run
    #[arg(long, default_value = "500")]
    steps: usize,

    /// Deliver a client's pushes before each of its commands
    #[arg(long)]
    lockstep: bool,

    /// Inject disconnects, request failures and out-of-band changes
    #[arg(long)]
    faults: bool,

    /// Never park hub replies behind other commands and pushes
    #[arg(long)]
    no_overlap: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    for seed in args.seed..args.seed.saturating_add(args.runs) {
        let config = SimConfig {
            seed,
            clients: usize::from(args.clients),
            steps: args.steps,
            lockstep: args.lockstep,
            faults: args.faults,
            overlap: !args.no_overlap,
        };

        let stats = Simulation::new(config).run().await.inspect_err(|err| {
            tracing::error!(seed, error = %err, "simulation failed");
        })?;
        tracing::info!(
            seed,
            commands = stats.commands,
            rejected = stats.rejected,
            overlapped = stats.overlapped,
            pushes = stats.pushes_delivered,
            resyncs = stats.resyncs,
            faults = stats.faults,
            "run passed"
        );
    }

    tracing::info!(runs = args.runs, "all runs converged");
    Ok(())
}
