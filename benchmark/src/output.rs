use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::workload::RunMeasurement;

#[derive(Serialize)]
pub struct RunSnapshot {
    pub run: usize,
    pub duration_ms: u128,
    pub transactions: usize,
    pub attempts: u64,
    pub failures: u64,
    pub tx_per_sec: f64,
    pub p50_ms: u128,
    pub p95_ms: u128,
    pub p99_ms: u128,
}

#[derive(Serialize)]
pub struct TrimmedStats {
    pub runs_used: usize,
    pub mean_ms: f64,
    pub tx_per_sec: f64,
}

pub fn snapshot(run: usize, measurement: &RunMeasurement) -> RunSnapshot {
    let mut sorted = measurement.latencies.clone();
    sorted.sort();
    RunSnapshot {
        run,
        duration_ms: measurement.duration.as_millis(),
        transactions: measurement.transactions,
        attempts: measurement.attempts,
        failures: measurement.failures,
        tx_per_sec: measurement.transactions as f64 / measurement.duration.as_secs_f64(),
        p50_ms: percentile(&sorted, 50).as_millis(),
        p95_ms: percentile(&sorted, 95).as_millis(),
        p99_ms: percentile(&sorted, 99).as_millis(),
    }
}

/// Mean over the middle runs, dropping the fastest and slowest when there
/// are more than two.
pub fn trim_runs(runs: &[RunSnapshot]) -> TrimmedStats {
    if runs.is_empty() {
        return TrimmedStats {
            runs_used: 0,
            mean_ms: 0.0,
            tx_per_sec: 0.0,
        };
    }

    let mut ordered: Vec<(u128, f64)> = runs
        .iter()
        .map(|run| (run.duration_ms, run.tx_per_sec))
        .collect();
    ordered.sort_by_key(|(duration, _)| *duration);
    let slice = if ordered.len() > 2 {
        &ordered[1..ordered.len() - 1]
    } else {
        &ordered[..]
    };

    TrimmedStats {
        runs_used: slice.len(),
        mean_ms: slice.iter().map(|(d, _)| *d as f64).sum::<f64>() / slice.len() as f64,
        tx_per_sec: slice.iter().map(|(_, tps)| *tps).sum::<f64>() / slice.len() as f64,
    }
}

pub fn print_run(snapshot: &RunSnapshot) {
    println!(
        "  run {:>2}: {:>7} ms ({:.1} tx/s, attempts={}, failures={}, p50={}ms p95={}ms p99={}ms)",
        snapshot.run,
        snapshot.duration_ms,
        snapshot.tx_per_sec,
        snapshot.attempts,
        snapshot.failures,
        snapshot.p50_ms,
        snapshot.p95_ms,
        snapshot.p99_ms
    );
}

pub fn print_trimmed(stats: &TrimmedStats) {
    println!(
        "  trimmed (middle {}): mean {:.2} ms, {:.1} tx/s",
        stats.runs_used, stats.mean_ms, stats.tx_per_sec
    );
    println!();
}

pub fn write_csv(
    dir: &Path,
    label: &str,
    runs: &[RunSnapshot],
    trimmed: &TrimmedStats,
) -> Result<()> {
    create_dir_all(dir)?;
    let path = dir.join(format!("{label}.csv"));
    let mut file = File::create(&path)?;
    writeln!(
        file,
        "kind,run,duration_ms,transactions,attempts,failures,tx_per_sec,p50_ms,p95_ms,p99_ms"
    )?;

    for run in runs {
        writeln!(
            file,
            "run,{},{},{},{},{},{:.3},{},{},{}",
            run.run,
            run.duration_ms,
            run.transactions,
            run.attempts,
            run.failures,
            run.tx_per_sec,
            run.p50_ms,
            run.p95_ms,
            run.p99_ms
        )?;
    }
    writeln!(
        file,
        "trimmed_mean,,{:.2},,,,{:.3},,,",
        trimmed.mean_ms, trimmed.tx_per_sec
    )?;

    println!("    wrote {}", path.display());
    Ok(())
}

fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (pct * sorted.len()).div_ceil(100);
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}
