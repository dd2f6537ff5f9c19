#![allow(missing_docs)]
#![deny(unsafe_code)]

mod limiter_sim;
mod map_workload;

use clap::Parser;
use color_eyre::eyre::ensure;

#[derive(Parser, Debug)]
#[command(version, about = "Drives a Swiss table map workload and a GC CPU limiter simulation", long_about = None)]
struct Args {
    /// Number of distinct keys inserted per round.
    #[clap(short = 'k', long, default_value = "200000")]
    keys: usize,
    /// Number of map workload rounds and of simulated collection cycles.
    #[clap(short = 'r', long, default_value = "3")]
    rounds: usize,
    /// Number of processors the limiter accounts for.
    #[clap(short = 'p', long, default_value = "4")]
    procs: u32,
    /// Number of mutator threads updating the limiter concurrently.
    #[clap(short = 'm', long, default_value = "4")]
    mutators: usize,
    /// Seed for key generation, random if not given.
    #[clap(short = 's', long)]
    seed: Option<u64>,
    /// Share of mutator time spent assisting the collector during a cycle, in percent.
    #[clap(short = 'g', long, default_value = "50")]
    gc_percent: u32,
}

fn main() -> color_eyre::Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    rtk_logger::setup();

    ensure!(args.procs > 0, "--procs must be at least 1");
    ensure!(args.mutators > 0, "--mutators must be at least 1");
    ensure!(args.gc_percent <= 100, "--gc-percent must be at most 100");

    let seed = args.seed.unwrap_or_else(rand::random);
    log::info!("using seed {seed}");

    for round in 0..args.rounds {
        map_workload::run(round, args.keys, seed.wrapping_add(round as u64))?;
    }

    limiter_sim::run(&limiter_sim::SimOptions {
        cycles: args.rounds,
        procs: args.procs,
        mutators: args.mutators,
        gc_percent: args.gc_percent,
        seed,
    })?;

    Ok(())
}
