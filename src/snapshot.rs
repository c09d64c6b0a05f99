// ===============================
// src/snapshot.rs (periodic risk snapshot worker)
// ===============================
//
// Fixed-cadence read-only sweep: cached positions + cached market data in,
// one RiskSnapshot out, published wholesale through the watch channel and
// recorded. Never touches the event store.
//
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tracing::info;

use crate::cache::{MarketDataCache, PositionCache};
use crate::domain::{Event, RiskSnapshot};
use crate::metrics::{OPEN_POSITIONS, PNL_REALIZED_USD, PNL_UNREALIZED_USD, SNAPSHOTS};
use crate::risk;

/// Values every cached position against the latest market data. Positions
/// with no price tick yet are skipped, not errored.
pub fn build_current_snapshot(
    positions: &PositionCache,
    market: &MarketDataCache,
) -> RiskSnapshot {
    let rate_lookup = |from, to| market.fx_rate(from, to);
    let position_risks = positions
        .get_all()
        .iter()
        .filter_map(|p| {
            risk::build_position_risk(p, market.price(p.instrument_id).as_ref(), &rate_lookup)
        })
        .collect();
    risk::build_snapshot(position_risks, Utc::now())
}

pub async fn run(
    positions: Arc<PositionCache>,
    market: Arc<MarketDataCache>,
    snap_tx: watch::Sender<Option<RiskSnapshot>>,
    rec_tx: mpsc::Sender<Event>,
    warmup_ms: u64,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms, "risk snapshot worker started");

    // Let the trade and market-data consumers populate the caches first.
    tokio::select! {
        _ = sleep(Duration::from_millis(warmup_ms)) => {}
        _ = shutdown.changed() => {
            if *shutdown.borrow() { return; }
        }
    }

    let mut published: u64 = 0;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() { break; }
            }
            _ = sleep(Duration::from_millis(interval_ms)) => {
                let snapshot = build_current_snapshot(&positions, &market);
                if snapshot.position_count == 0 {
                    continue;
                }

                SNAPSHOTS.inc();
                OPEN_POSITIONS.set(snapshot.open_position_count as i64);
                PNL_UNREALIZED_USD.set(snapshot.total_unrealized_pnl_usd.to_f64().unwrap_or(0.0));
                PNL_REALIZED_USD.set(snapshot.total_realized_pnl_usd.to_f64().unwrap_or(0.0));

                published += 1;
                if published % 10 == 0 {
                    info!(
                        count = published,
                        positions = snapshot.position_count,
                        unrealized_usd = %snapshot.total_unrealized_pnl_usd,
                        realized_usd = %snapshot.total_realized_pnl_usd,
                        net_usd = %snapshot.total_net_pnl_usd,
                        "risk snapshot"
                    );
                }

                let _ = rec_tx.try_send(Event::Snapshot(snapshot.clone()));
                let _ = snap_tx.send(Some(snapshot));
            }
        }
    }
    info!(published, "risk snapshot worker stopped");
}
