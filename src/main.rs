// ===============================
// src/main.rs
// ===============================
/*
 # cadence & cache health
curl -s localhost:9898/metrics | egrep '^(risk_snapshots_total|open_positions|cached_prices)'

# ledger activity (events by kind, conflicts, dedup)
curl -s localhost:9898/metrics | grep '^ledger_events_total'
curl -s localhost:9898/metrics | egrep '^(append_conflicts_total|duplicate_trades_total)'

# audit results
curl -s localhost:9898/metrics | grep '^reconciliations_total'

*/
/*
=============================================================================
Project : risk_engine_rust — event-sourced position ledger & risk engine
Version : 0.3.0

Summary : Folds inbound trades into per-instrument event streams with FIFO
          cost-basis P&L, derives periodic portfolio risk snapshots from
          concurrent position/market-data caches, audits live projections
          against a full event replay (SHA-256 checksums + field diffs),
          exposes Prometheus metrics, and records JSONL events.
=============================================================================
*/
use std::sync::Arc;

use tokio::{
    select,
    sync::{mpsc, watch},
    time::Duration,
};
use tracing::info;

use risk_engine_rust::cache::{MarketDataCache, PositionCache};
use risk_engine_rust::domain::{BusMessage, Event, ReconciliationReport, RiskSnapshot};
use risk_engine_rust::store::EventStore;
use risk_engine_rust::{config, market_data, metrics, processor, reconcile, recorder, snapshot};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config ----
    let args = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        metrics_port = args.metrics_port,
        snapshot_interval_ms = args.snapshot_interval_ms,
        reconcile_interval_secs = args.reconcile_interval_secs,
        record_file = ?args.record_file,
        "startup config"
    );

    // ---- Shutdown signal (flipped once by ctrl-c, watched by every loop) ----
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ---- Buses ----
    // Inbound transport edge: raw JSON payloads, partitioned/ordered by key
    // (instrument id for trades and prices, currency pair for fx). The
    // external broker adapter holds these senders.
    let (trade_tx, trade_rx) = mpsc::channel::<BusMessage>(4096);
    let (price_tx, price_rx) = mpsc::channel::<BusMessage>(4096);
    let (fx_tx, fx_rx) = mpsc::channel::<BusMessage>(1024);

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    if let Some(path) = args.record_file.clone() {
        tokio::spawn(recorder::run(rec_rx, path));
    }

    // ---- Event store & shared caches ----
    // Store is the source of truth; caches are read projections. Single
    // writer per cache: processor -> positions, consumers -> market data.
    let store = Arc::new(EventStore::new());
    let positions = Arc::new(PositionCache::new());
    let market = Arc::new(MarketDataCache::new());

    // Latest-value broadcast caches: whole-value swaps, readers never see a
    // partial update. The query/push layer holds these receivers.
    let (snap_tx, snap_rx) = watch::channel::<Option<RiskSnapshot>>(None);
    let (report_tx, report_rx) = watch::channel::<Option<ReconciliationReport>>(None);
    let (reconcile_trigger_tx, reconcile_trigger_rx) = mpsc::channel::<()>(8);

    // ---- Trade pipeline (serial lane per instrument) ----
    tokio::spawn(processor::run(
        trade_rx,
        store.clone(),
        positions.clone(),
        rec_tx.clone(),
        shutdown_rx.clone(),
    ));

    // ---- Market data consumers ----
    tokio::spawn(market_data::run_prices(
        price_rx,
        market.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(market_data::run_fx(
        fx_rx,
        market.clone(),
        shutdown_rx.clone(),
    ));

    // ---- Risk snapshots ----
    tokio::spawn(snapshot::run(
        positions.clone(),
        market.clone(),
        snap_tx,
        rec_tx.clone(),
        args.snapshot_warmup_ms,
        args.snapshot_interval_ms,
        shutdown_rx.clone(),
    ));

    // ---- Reconciliation (periodic + on-demand trigger) ----
    tokio::spawn(reconcile::run(
        store.clone(),
        report_tx,
        reconcile_trigger_rx,
        rec_tx.clone(),
        args.reconcile_interval_secs,
        shutdown_rx.clone(),
    ));

    // ---- Heartbeat + ctrl-c ----
    // The bus senders and watch receivers held here are the integration
    // surface for the external transport and query layers.
    let mut snap_watch = snap_rx.clone();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
    let mut snapshots_seen: u64 = 0;

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
                break;
            }
            Ok(()) = snap_watch.changed() => {
                snapshots_seen += 1;
            }
            _ = heartbeat.tick() => {
                info!(
                    open_positions = positions.len(),
                    cached_prices = market.price_count(),
                    streams = store.stream_count(),
                    events = store.event_count(),
                    snapshots = snapshots_seen,
                    trade_queue_free = trade_tx.capacity(),
                    price_queue_free = price_tx.capacity(),
                    fx_queue_free = fx_tx.capacity(),
                    reconcile_queue_free = reconcile_trigger_tx.capacity(),
                    latest_report_passed = ?report_rx.borrow().as_ref().map(|r| r.passed),
                    "heartbeat"
                );
            }
        }
    }

    // Let the workers observe the signal and finish their in-flight work.
    tokio::time::sleep(Duration::from_millis(250)).await;
    info!("stopped");
}
