// ===============================
// src/store.rs (event store collaborator)
// ===============================
//
// In-memory stand-in for the durable event store, exposing the contract the
// engine is written against: per-stream atomic append with optimistic version
// checks, an inline projection folded in the same critical section as the
// append, and full-stream replay for reconciliation. One stream per
// instrument; the dashmap entry guard makes each append atomic for its
// stream while leaving other streams fully parallel.
//
use ahash::AHashSet;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::position::{Position, PositionEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict on stream {stream_id}: expected {expected}, actual {actual}")]
    VersionConflict { stream_id: Uuid, expected: u64, actual: u64 },
    #[error("trade {trade_id} already applied to stream {stream_id}")]
    DuplicateTrade { stream_id: Uuid, trade_id: Uuid },
}

#[derive(Default)]
struct StreamState {
    version: u64,
    events: Vec<PositionEvent>,
    applied_trades: AHashSet<Uuid>,
    projection: Position,
}

#[derive(Default)]
pub struct EventStore {
    streams: DashMap<Uuid, StreamState>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event to the instrument's stream and folds it into the
    /// stream's live projection in the same atomic step. Fails on a stale
    /// `expected_version` (another writer appended first) or on a trade id
    /// the stream has already applied (at-least-once redelivery).
    pub fn append(
        &self,
        stream_id: Uuid,
        expected_version: u64,
        event: PositionEvent,
    ) -> Result<Position, StoreError> {
        let mut stream = self.streams.entry(stream_id).or_default();

        let trade_id = event.trade_id();
        if stream.applied_trades.contains(&trade_id) {
            return Err(StoreError::DuplicateTrade { stream_id, trade_id });
        }
        if stream.version != expected_version {
            return Err(StoreError::VersionConflict {
                stream_id,
                expected: expected_version,
                actual: stream.version,
            });
        }

        stream.projection.apply(&event);
        stream.applied_trades.insert(trade_id);
        stream.events.push(event);
        stream.version += 1;

        Ok(stream.projection.clone())
    }

    /// Ordered event sequence for one stream (empty if unknown).
    pub fn load_events(&self, stream_id: Uuid) -> Vec<PositionEvent> {
        self.streams
            .get(&stream_id)
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    /// Fresh fold of the stream's events — replay, not the inline projection.
    pub fn aggregate(&self, stream_id: Uuid) -> Option<Position> {
        self.streams
            .get(&stream_id)
            .and_then(|s| Position::replay(&s.events))
    }

    pub fn aggregate_with_version(&self, stream_id: Uuid) -> (Option<Position>, u64) {
        match self.streams.get(&stream_id) {
            Some(s) => (Position::replay(&s.events), s.version),
            None => (None, 0),
        }
    }

    pub fn all_stream_ids(&self) -> Vec<Uuid> {
        self.streams.iter().map(|s| *s.key()).collect()
    }

    /// Inline projections — the "live" side of a reconciliation.
    pub fn live_positions(&self) -> Vec<Position> {
        self.streams.iter().map(|s| s.projection.clone()).collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn event_count(&self) -> usize {
        self.streams.iter().map(|s| s.events.len()).sum()
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

    fn opened(instrument_id: Uuid) -> PositionEvent {
        PositionEvent::Opened {
            trade_id: Uuid::new_v4(),
            instrument_id,
            symbol: "AAPL".into(),
            currency: Currency::USD,
            side: Side::Buy,
            quantity: 100,
            price: dec!(150),
            timestamp: ts(),
        }
    }

    #[test]
    fn append_advances_version_and_projection() {
        let store = EventStore::new();
        let id = Uuid::new_v4();

        let projection = store.append(id, 0, opened(id)).unwrap();
        assert_eq!(projection.quantity, 100);
        assert_eq!(store.aggregate_with_version(id).1, 1);
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.all_stream_ids(), vec![id]);
    }

    #[test]
    fn stale_version_conflicts() {
        let store = EventStore::new();
        let id = Uuid::new_v4();
        store.append(id, 0, opened(id)).unwrap();

        let err = store.append(id, 0, opened(id)).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 0, actual: 1, .. }));
    }

    #[test]
    fn redelivered_trade_is_rejected() {
        let store = EventStore::new();
        let id = Uuid::new_v4();
        let event = opened(id);
        store.append(id, 0, event.clone()).unwrap();

        let err = store.append(id, 1, event).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTrade { .. }));
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn aggregate_replays_while_live_positions_serve_projections() {
        let store = EventStore::new();
        let id = Uuid::new_v4();
        store.append(id, 0, opened(id)).unwrap();
        store
            .append(
                id,
                1,
                PositionEvent::Increased {
                    trade_id: Uuid::new_v4(),
                    quantity: 50,
                    price: dec!(151),
                    timestamp: ts(),
                },
            )
            .unwrap();

        let replayed = store.aggregate(id).unwrap();
        let live = store.live_positions();
        assert_eq!(live.len(), 1);
        assert_eq!(replayed, live[0]);
        assert_eq!(replayed.quantity, 150);
    }
}
