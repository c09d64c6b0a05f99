// ===============================
// src/config.rs
// ===============================
use std::env;

use dotenvy::dotenv;

#[derive(Clone, Debug)]
pub struct Args {
    // metrics / recording
    pub metrics_port: u16,
    pub record_file: Option<String>,

    // snapshot cadence
    pub snapshot_interval_ms: u64,
    pub snapshot_warmup_ms: u64,

    // reconciliation cadence (0 = on-demand only)
    pub reconcile_interval_secs: u64,
}

pub fn load() -> Args {
    // Read .env first so RECORD_FILE etc. are picked up.
    let _ = dotenv();

    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);
    let record_file = env::var("RECORD_FILE").ok();

    let snapshot_interval_ms = env::var("SNAPSHOT_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000);
    let snapshot_warmup_ms = env::var("SNAPSHOT_WARMUP_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3_000);

    let reconcile_interval_secs = env::var("RECONCILE_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    Args {
        metrics_port,
        record_file,
        snapshot_interval_ms,
        snapshot_warmup_ms,
        reconcile_interval_secs,
    }
}
