// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::position::PositionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side { pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } } }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency { USD, EUR, GBP, JPY, CHF }

/// One still-open tranche of a position. FIFO-ordered within `Position::cost_lots`
/// (oldest first); consumed front-to-back on closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLot { pub quantity: Decimal, pub price_per_unit: Decimal }

impl CostLot {
    pub fn new(quantity: Decimal, price_per_unit: Decimal) -> Self {
        Self { quantity, price_per_unit }
    }
}

/// Inbound trade execution. Immutable external input; `quantity` is always
/// positive, direction comes from `side`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: Uuid,
    pub instrument_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    pub currency: Currency,
    pub timestamp: DateTime<Utc>,
}

/// Latest traded price for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub instrument_id: Uuid,
    pub symbol: String,
    pub price: Decimal,
    pub currency: Currency,
    pub timestamp: DateTime<Utc>,
}

/// 1 unit of `base` = `rate` units of `quote` (EUR/USD = 1.08 means 1 EUR = 1.08 USD).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxRate {
    pub base: Currency,
    pub quote: Currency,
    pub rate: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time valuation of one position against a price tick. Derived,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRisk {
    pub instrument_id: Uuid,
    pub symbol: String,
    pub currency: Currency,
    pub side: Side,
    pub quantity: i64,
    pub average_cost_basis: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_usd: Decimal,
    pub realized_pnl: Decimal,
    pub realized_pnl_usd: Decimal,
}

/// Portfolio-level aggregate of all current `PositionRisk` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub timestamp: DateTime<Utc>,
    pub positions: Vec<PositionRisk>,
    pub total_unrealized_pnl_usd: Decimal,
    pub total_realized_pnl_usd: Decimal,
    pub total_net_pnl_usd: Decimal,
    pub position_count: usize,
    pub open_position_count: usize,
}

/// One field-level mismatch between a replayed and a live position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionDiscrepancy {
    pub instrument_id: Uuid,
    pub symbol: String,
    pub field: String,
    pub expected: String,
    pub actual: String,
    pub difference: Option<Decimal>,
}

/// Outcome of a replay-vs-live audit. A failed reconciliation is a normal,
/// reportable result, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub timestamp: DateTime<Utc>,
    pub total_events_replayed: usize,
    pub expected_checksum: String,
    pub actual_checksum: String,
    pub passed: bool,
    pub discrepancies: Vec<PositionDiscrepancy>,
}

/// Raw message as delivered by the transport edge: partition key + JSON payload.
/// Delivery is at-least-once with same-key ordering; anything undeserializable
/// is dropped at this boundary.
#[derive(Debug, Clone)]
pub struct BusMessage { pub key: String, pub payload: String }

/// Fan-in envelope for the JSONL recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Ledger { instrument_id: Uuid, event: PositionEvent },
    Snapshot(RiskSnapshot),
    Reconciliation(ReconciliationReport),
    Note(String),
}
