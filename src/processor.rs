// ===============================
// src/processor.rs (trade pipeline)
// ===============================
//
// Per-trade unit of work: load the instrument's current position from the
// event store, run the determiner, append the event (event + inline
// projection commit atomically in the store), then sync the position cache.
//
// Ordering contract: the determiner's read-decide-append is check-then-act,
// so trades for one instrument must never run concurrently. The dispatcher
// below routes each instrument to its own serial lane; the store's version
// check is the backstop — a conflict means another writer appended first,
// and the unit of work reloads, re-determines and re-appends. A conflicted
// trade is retried, never dropped. Redelivered trades (at-least-once bus)
// are rejected by the store's trade-id dedup and skipped with a log line.
//
use std::sync::Arc;

use ahash::AHashMap;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::PositionCache;
use crate::determiner;
use crate::domain::{BusMessage, Event, Trade};
use crate::metrics::{
    APPEND_CONFLICTS, DROPPED_MESSAGES, DUPLICATE_TRADES, LEDGER_EVENTS, TRADES, TRADES_BY_SYMBOL,
};
use crate::position::{Position, PositionEvent};
use crate::store::{EventStore, StoreError};

const LANE_CAPACITY: usize = 256;

pub struct TradeProcessor {
    store: Arc<EventStore>,
    positions: Arc<PositionCache>,
}

impl TradeProcessor {
    pub fn new(store: Arc<EventStore>, positions: Arc<PositionCache>) -> Self {
        Self { store, positions }
    }

    /// Applies one trade to the ledger. Returns the updated position and the
    /// event that was appended, or None when the trade turned out to be a
    /// redelivery.
    pub fn process(&self, trade: &Trade) -> Option<(Position, PositionEvent)> {
        loop {
            let (current, version) = self.store.aggregate_with_version(trade.instrument_id);
            let event = determiner::determine(current.as_ref(), trade);
            let event_name = event.name();

            match self.store.append(trade.instrument_id, version, event.clone()) {
                Ok(updated) => {
                    self.positions.update(updated.clone());
                    LEDGER_EVENTS.with_label_values(&[event_name]).inc();
                    info!(
                        event = event_name,
                        symbol = %trade.symbol,
                        qty = trade.quantity,
                        price = %trade.price,
                        "ledger event applied"
                    );
                    return Some((updated, event));
                }
                Err(StoreError::VersionConflict { .. }) => {
                    // Someone else appended since our read: reload and redo.
                    APPEND_CONFLICTS.inc();
                    continue;
                }
                Err(e @ StoreError::DuplicateTrade { .. }) => {
                    DUPLICATE_TRADES.inc();
                    warn!(symbol = %trade.symbol, "{e}, skipping redelivery");
                    return None;
                }
            }
        }
    }
}

/// Edge deserialization. Undeserializable payloads and non-positive
/// quantity/price are dropped here — the core downstream assumes well-formed
/// trades and validates nothing.
pub fn parse_trade(payload: &str) -> Option<Trade> {
    let trade: Trade = match serde_json::from_str(payload) {
        Ok(t) => t,
        Err(e) => {
            warn!(?e, "undeserializable trade payload, dropping");
            return None;
        }
    };
    if trade.quantity <= 0 || trade.price <= rust_decimal::Decimal::ZERO {
        warn!(
            symbol = %trade.symbol,
            qty = trade.quantity,
            price = %trade.price,
            "non-positive trade quantity/price, dropping"
        );
        return None;
    }
    Some(trade)
}

/// Dispatcher: consumes the inbound trade bus and fans out to one serial
/// lane task per instrument, preserving arrival order per key.
pub async fn run(
    mut trade_rx: mpsc::Receiver<BusMessage>,
    store: Arc<EventStore>,
    positions: Arc<PositionCache>,
    rec_tx: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("trade processor started");
    let processor = Arc::new(TradeProcessor::new(store, positions));
    let mut lanes: AHashMap<Uuid, mpsc::Sender<Trade>> = AHashMap::new();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() { break; }
            }
            maybe = trade_rx.recv() => {
                let Some(msg) = maybe else { break };
                let Some(trade) = parse_trade(&msg.payload) else {
                    DROPPED_MESSAGES.with_label_values(&["trades"]).inc();
                    continue;
                };

                TRADES.inc();
                TRADES_BY_SYMBOL.with_label_values(&[&trade.symbol]).inc();

                let lane = lanes.entry(trade.instrument_id).or_insert_with(|| {
                    let (tx, rx) = mpsc::channel::<Trade>(LANE_CAPACITY);
                    tokio::spawn(run_lane(rx, processor.clone(), rec_tx.clone(), shutdown.clone()));
                    tx
                });
                if lane.send(trade).await.is_err() {
                    warn!("trade lane closed, dropping trade");
                }
            }
        }
    }
    info!("trade processor stopped");
}

async fn run_lane(
    mut rx: mpsc::Receiver<Trade>,
    processor: Arc<TradeProcessor>,
    rec_tx: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() { break; }
            }
            maybe = rx.recv() => {
                let Some(trade) = maybe else { break };
                if let Some((updated, event)) = processor.process(&trade) {
                    let _ = rec_tx.try_send(Event::Ledger {
                        instrument_id: updated.instrument_id,
                        event,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, Side};
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        "2024-03-01T10:00:00Z".parse().unwrap()
    }

    fn trade(instrument_id: Uuid, side: Side, quantity: i64) -> Trade {
        Trade {
            trade_id: Uuid::new_v4(),
            instrument_id,
            symbol: "AAPL".into(),
            side,
            quantity,
            price: dec!(150),
            currency: Currency::USD,
            timestamp: ts(),
        }
    }

    fn processor() -> TradeProcessor {
        TradeProcessor::new(Arc::new(EventStore::new()), Arc::new(PositionCache::new()))
    }

    #[test]
    fn first_trade_opens_and_caches() {
        let p = processor();
        let id = Uuid::new_v4();

        let (position, event) = p.process(&trade(id, Side::Buy, 100)).unwrap();
        assert_eq!(position.quantity, 100);
        assert_eq!(event.name(), "opened");
        assert_eq!(p.positions.len(), 1);
    }

    #[test]
    fn full_close_evicts_from_cache() {
        let p = processor();
        let id = Uuid::new_v4();
        p.process(&trade(id, Side::Buy, 100)).unwrap();

        let (position, event) = p.process(&trade(id, Side::Sell, 100)).unwrap();
        assert!(!position.is_open);
        assert_eq!(event.name(), "closed");
        assert_eq!(p.positions.len(), 0);
    }

    #[test]
    fn redelivered_trade_is_skipped_once_applied() {
        let p = processor();
        let id = Uuid::new_v4();
        let t = trade(id, Side::Buy, 100);

        assert!(p.process(&t).is_some());
        assert!(p.process(&t).is_none());
        assert_eq!(p.store.event_count(), 1);
    }

    #[test]
    fn malformed_and_non_positive_payloads_are_dropped() {
        assert!(parse_trade("not json").is_none());

        let mut t = trade(Uuid::new_v4(), Side::Buy, 100);
        t.quantity = 0;
        let payload = serde_json::to_string(&t).unwrap();
        assert!(parse_trade(&payload).is_none());

        t.quantity = 100;
        let payload = serde_json::to_string(&t).unwrap();
        assert!(parse_trade(&payload).is_some());
    }
}
