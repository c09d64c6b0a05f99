// ===============================
// src/reconcile.rs (replay-vs-live audit)
// ===============================
//
// Rebuilds every position from its full event history ("expected"), loads
// the live inline projections ("actual"), then checksums both sets and diffs
// them field by field. A mismatch is a reportable outcome, never an error.
// Replay cost is O(total events), so the sweep checks the shutdown signal
// between streams and bails out cleanly mid-flight.
//
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::checksum;
use crate::domain::{Event, PositionDiscrepancy, ReconciliationReport};
use crate::metrics::{RECONCILE_DISCREPANCIES, RECONCILE_EVENTS_REPLAYED, RECONCILE_RUNS};
use crate::position::Position;
use crate::store::EventStore;

/// Realized P&L differences at or below a cent are rounding noise, not drift.
pub const PNL_TOLERANCE: Decimal = dec!(0.01);

/// Field-level diff between replayed ("expected") and live ("actual")
/// position sets. One instrument may yield several discrepancies.
pub fn compare(expected: &[Position], actual: &[Position]) -> Vec<PositionDiscrepancy> {
    let mut discrepancies = Vec::new();

    let expected_by_id: ahash::AHashMap<_, _> =
        expected.iter().map(|p| (p.instrument_id, p)).collect();
    let actual_by_id: ahash::AHashMap<_, _> =
        actual.iter().map(|p| (p.instrument_id, p)).collect();

    for (id, exp) in &expected_by_id {
        let Some(act) = actual_by_id.get(id) else {
            discrepancies.push(PositionDiscrepancy {
                instrument_id: *id,
                symbol: exp.symbol.clone(),
                field: "Missing".into(),
                expected: "Present".into(),
                actual: "Missing in live".into(),
                difference: None,
            });
            continue;
        };
        compare_fields(exp, act, &mut discrepancies);
    }

    for (id, act) in &actual_by_id {
        if !expected_by_id.contains_key(id) {
            discrepancies.push(PositionDiscrepancy {
                instrument_id: *id,
                symbol: act.symbol.clone(),
                field: "Missing".into(),
                expected: "Missing in replay".into(),
                actual: "Present".into(),
                difference: None,
            });
        }
    }

    discrepancies
}

fn compare_fields(expected: &Position, actual: &Position, out: &mut Vec<PositionDiscrepancy>) {
    if expected.quantity != actual.quantity {
        out.push(PositionDiscrepancy {
            instrument_id: expected.instrument_id,
            symbol: expected.symbol.clone(),
            field: "Quantity".into(),
            expected: expected.quantity.to_string(),
            actual: actual.quantity.to_string(),
            difference: Some(Decimal::from(actual.quantity - expected.quantity)),
        });
    }

    let pnl_diff = (expected.realized_pnl - actual.realized_pnl).abs();
    if pnl_diff > PNL_TOLERANCE {
        out.push(PositionDiscrepancy {
            instrument_id: expected.instrument_id,
            symbol: expected.symbol.clone(),
            field: "RealizedPnl".into(),
            expected: format!("{:.2}", expected.realized_pnl),
            actual: format!("{:.2}", actual.realized_pnl),
            difference: Some(actual.realized_pnl - expected.realized_pnl),
        });
    }

    if expected.is_open != actual.is_open {
        out.push(PositionDiscrepancy {
            instrument_id: expected.instrument_id,
            symbol: expected.symbol.clone(),
            field: "IsOpen".into(),
            expected: expected.is_open.to_string(),
            actual: actual.is_open.to_string(),
            difference: None,
        });
    }

    if expected.cost_lots.len() != actual.cost_lots.len() {
        out.push(PositionDiscrepancy {
            instrument_id: expected.instrument_id,
            symbol: expected.symbol.clone(),
            field: "CostLots.Count".into(),
            expected: expected.cost_lots.len().to_string(),
            actual: actual.cost_lots.len().to_string(),
            difference: Some(Decimal::from(actual.cost_lots.len() as i64 - expected.cost_lots.len() as i64)),
        });
    }
}

pub struct ReconciliationService {
    store: Arc<EventStore>,
}

impl ReconciliationService {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }

    /// One full audit sweep. None if the shutdown signal fired mid-replay.
    pub fn run_once(&self, shutdown: &watch::Receiver<bool>) -> Option<ReconciliationReport> {
        info!("reconciliation started");

        let mut replayed = Vec::new();
        let mut total_events = 0usize;

        for stream_id in self.store.all_stream_ids() {
            if *shutdown.borrow() {
                info!("reconciliation cancelled mid-replay");
                return None;
            }
            let events = self.store.load_events(stream_id);
            total_events += events.len();
            if let Some(position) = Position::replay(&events) {
                replayed.push(position);
            }
        }

        let live = self.store.live_positions();

        let expected_checksum = checksum::compute(&replayed);
        let actual_checksum = checksum::compute(&live);
        let discrepancies = compare(&replayed, &live);
        let passed = expected_checksum == actual_checksum && discrepancies.is_empty();

        if passed {
            info!(
                events = total_events,
                positions = replayed.len(),
                "reconciliation PASSED"
            );
        } else {
            warn!(
                events = total_events,
                positions = replayed.len(),
                discrepancies = discrepancies.len(),
                "reconciliation FAILED"
            );
        }

        Some(ReconciliationReport {
            timestamp: Utc::now(),
            total_events_replayed: total_events,
            expected_checksum,
            actual_checksum,
            passed,
            discrepancies,
        })
    }
}

/// Worker loop: audits on a fixed interval (0 disables the timer) and on
/// every on-demand trigger; publishes the latest report wholesale.
pub async fn run(
    store: Arc<EventStore>,
    report_tx: watch::Sender<Option<ReconciliationReport>>,
    mut trigger_rx: mpsc::Receiver<()>,
    rec_tx: mpsc::Sender<Event>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs, "reconciliation worker started");
    let service = ReconciliationService::new(store);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() { break; }
            }
            maybe = trigger_rx.recv() => {
                match maybe {
                    Some(()) => run_and_publish(&service, &report_tx, &rec_tx, &shutdown),
                    None => break,
                }
            }
            _ = sleep(Duration::from_secs(interval_secs)), if interval_secs > 0 => {
                run_and_publish(&service, &report_tx, &rec_tx, &shutdown);
            }
        }
    }
    info!("reconciliation worker stopped");
}

fn run_and_publish(
    service: &ReconciliationService,
    report_tx: &watch::Sender<Option<ReconciliationReport>>,
    rec_tx: &mpsc::Sender<Event>,
    shutdown: &watch::Receiver<bool>,
) {
    let Some(report) = service.run_once(shutdown) else { return };

    let result = if report.passed { "passed" } else { "failed" };
    RECONCILE_RUNS.with_label_values(&[result]).inc();
    RECONCILE_DISCREPANCIES.set(report.discrepancies.len() as i64);
    RECONCILE_EVENTS_REPLAYED.set(report.total_events_replayed as i64);

    let _ = rec_tx.try_send(Event::Reconciliation(report.clone()));
    let _ = report_tx.send(Some(report));
}
