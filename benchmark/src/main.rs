mod harness;
mod output;
mod workload;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use workload::WorkloadConfig;

#[derive(Parser, Debug)]
#[command(name = "skiff-benchmark")]
struct Args {
    /// Label for this run (used in output).
    #[arg(long, default_value = "run")]
    label: String,

    /// Number of transactions to commit per run.
    #[arg(long, default_value_t = 500)]
    transactions: usize,

    /// Size of each transaction's JSON payload body in bytes.
    #[arg(long, default_value_t = 256)]
    payload_bytes: usize,

    /// Probability in [0, 1) that one transport attempt fails transiently.
    /// Non-zero rates exercise real backoff delays.
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    /// Seed for the failure and payload generators.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Optional root directory for disk-backed storage; omit for memory.
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Directory to write per-experiment CSV files.
    #[arg(long, default_value = "benchmark/reports/csv")]
    csv_dir: PathBuf,

    /// Number of times to run the experiment (middle runs are averaged).
    #[arg(long, default_value_t = 5)]
    runs: usize,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let config = WorkloadConfig {
        transactions: args.transactions,
        payload_bytes: args.payload_bytes,
        failure_rate: args.failure_rate,
        seed: args.seed,
    };

    println!("=== {} ===", args.label);
    let mut runs = Vec::new();
    for run_idx in 0..args.runs {
        let measurement =
            workload::run_workload(&config, run_idx, args.storage_root.as_deref()).await?;
        let snapshot = output::snapshot(run_idx + 1, &measurement);
        output::print_run(&snapshot);
        runs.push(snapshot);
    }

    let trimmed = output::trim_runs(&runs);
    output::print_trimmed(&trimmed);
    output::write_csv(&args.csv_dir, &args.label, &runs, &trimmed)?;

    Ok(())
}
