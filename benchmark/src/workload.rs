use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tracing::info;

use crate::harness::BenchHarness;

#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub transactions: usize,
    pub payload_bytes: usize,
    pub failure_rate: f64,
    pub seed: u64,
}

pub struct RunMeasurement {
    pub duration: Duration,
    pub transactions: usize,
    pub attempts: u64,
    pub failures: u64,
    pub latencies: Vec<Duration>,
}

/// Commits `transactions` drafts one after another, awaiting each waiter,
/// and reports per-transaction latency plus transport attempt counts.
pub async fn run_workload(
    config: &WorkloadConfig,
    run_idx: usize,
    storage_root: Option<&Path>,
) -> Result<RunMeasurement> {
    if config.transactions == 0 {
        return Err(anyhow!("transaction count must be greater than zero"));
    }
    if !(0.0..1.0).contains(&config.failure_rate) {
        return Err(anyhow!("failure rate must be in [0, 1)"));
    }

    let harness = BenchHarness::start(
        storage_root,
        config.failure_rate,
        config.seed.wrapping_add(run_idx as u64),
    )
    .await?;

    let mut payload_rng = StdRng::seed_from_u64(config.seed ^ 0x5eed);
    let mut latencies = Vec::with_capacity(config.transactions);

    let started = Instant::now();
    for index in 0..config.transactions {
        let payload = random_payload(&mut payload_rng, config.payload_bytes);
        let committed = Instant::now();
        let listener = harness
            .coordinator
            .clone()
            .draft("bench_sync")
            .insert(
                &harness.rows,
                format!("rows/{index:08}"),
                json!({ "body": payload }),
            )
            .commit()
            .await?;

        listener
            .wait()
            .await
            .map_err(|err| anyhow!("transaction {index} failed permanently: {err}"))?;
        latencies.push(committed.elapsed());
    }
    let duration = started.elapsed();

    let measurement = RunMeasurement {
        duration,
        transactions: config.transactions,
        attempts: harness.attempts.load(std::sync::atomic::Ordering::SeqCst),
        failures: harness.failures.load(std::sync::atomic::Ordering::SeqCst),
        latencies,
    };

    info!(
        run = run_idx,
        transactions = measurement.transactions,
        attempts = measurement.attempts,
        failures = measurement.failures,
        "run complete"
    );

    harness.shutdown().await;
    Ok(measurement)
}

fn random_payload(rng: &mut StdRng, bytes: usize) -> String {
    (0..bytes)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}
