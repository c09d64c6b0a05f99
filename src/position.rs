// ===============================
// src/position.rs (event-sourced ledger aggregate)
// ===============================
//
// One Position per instrument; stream id = instrument id. Current state is a
// pure left-fold of the instrument's ordered event sequence — replaying the
// same events always yields bit-identical state (Decimal arithmetic, no
// floats). Event ordering is the producer's contract (see determiner.rs);
// apply() itself never fails.
//
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{CostLot, Currency, Side};
use crate::fifo;

/// The five ledger events. Each carries the originating trade id and the
/// exchange timestamp of that trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PositionEvent {
    Opened {
        trade_id: Uuid,
        instrument_id: Uuid,
        symbol: String,
        currency: Currency,
        side: Side,
        quantity: i64,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    Increased {
        trade_id: Uuid,
        quantity: i64,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    Decreased {
        trade_id: Uuid,
        quantity_closed: i64,
        price: Decimal,
        realized_pnl: Decimal,
        timestamp: DateTime<Utc>,
    },
    Closed {
        trade_id: Uuid,
        quantity_closed: i64,
        price: Decimal,
        realized_pnl: Decimal,
        timestamp: DateTime<Utc>,
    },
    Reversed {
        trade_id: Uuid,
        quantity_closed: i64,
        new_quantity: i64,
        new_side: Side,
        close_price: Decimal,
        realized_pnl: Decimal,
        new_position_price: Decimal,
        timestamp: DateTime<Utc>,
    },
}

impl PositionEvent {
    pub fn trade_id(&self) -> Uuid {
        match self {
            PositionEvent::Opened { trade_id, .. }
            | PositionEvent::Increased { trade_id, .. }
            | PositionEvent::Decreased { trade_id, .. }
            | PositionEvent::Closed { trade_id, .. }
            | PositionEvent::Reversed { trade_id, .. } => *trade_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PositionEvent::Opened { .. } => "opened",
            PositionEvent::Increased { .. } => "increased",
            PositionEvent::Decreased { .. } => "decreased",
            PositionEvent::Closed { .. } => "closed",
            PositionEvent::Reversed { .. } => "reversed",
        }
    }
}

/// Ledger state for one instrument. Sign of `quantity` encodes direction
/// (long > 0, short < 0); `cost_lots` sums to `abs(quantity)` while open and
/// is empty when closed. Closing does not delete the position — a later trade
/// reopens it and realized P&L starts over from zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument_id: Uuid,
    pub symbol: String,
    pub currency: Option<Currency>,
    pub quantity: i64,
    pub cost_lots: Vec<CostLot>,
    pub realized_pnl: Decimal,
    pub is_open: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_long(&self) -> bool { self.quantity > 0 }
    pub fn is_short(&self) -> bool { self.quantity < 0 }

    pub fn apply(&mut self, event: &PositionEvent) {
        match event {
            PositionEvent::Opened { instrument_id, symbol, currency, side, quantity, price, timestamp, .. } => {
                self.instrument_id = *instrument_id;
                self.symbol = symbol.clone();
                self.currency = Some(*currency);
                self.quantity = side.sign() * quantity;
                self.cost_lots = vec![CostLot::new(Decimal::from(*quantity), *price)];
                self.realized_pnl = Decimal::ZERO;
                self.is_open = true;
                self.last_updated = Some(*timestamp);
            }
            PositionEvent::Increased { quantity, price, timestamp, .. } => {
                self.quantity += if self.is_long() { *quantity } else { -quantity };
                self.cost_lots.push(CostLot::new(Decimal::from(*quantity), *price));
                self.last_updated = Some(*timestamp);
            }
            PositionEvent::Decreased { quantity_closed, price, realized_pnl, timestamp, .. } => {
                // A decrease never crosses zero, so direction is stable here.
                let was_long = self.is_long();
                self.quantity += if was_long { -quantity_closed } else { *quantity_closed };
                self.realized_pnl += realized_pnl;
                let result = fifo::close_lots(&self.cost_lots, *quantity_closed, *price, was_long);
                self.cost_lots = result.remaining_lots;
                self.last_updated = Some(*timestamp);
            }
            PositionEvent::Closed { realized_pnl, timestamp, .. } => {
                self.quantity = 0;
                self.realized_pnl += realized_pnl;
                self.cost_lots = Vec::new();
                self.is_open = false;
                self.last_updated = Some(*timestamp);
            }
            PositionEvent::Reversed { new_quantity, new_side, realized_pnl, new_position_price, timestamp, .. } => {
                self.realized_pnl += realized_pnl;
                self.quantity = new_side.sign() * new_quantity;
                self.cost_lots = vec![CostLot::new(Decimal::from(*new_quantity), *new_position_price)];
                self.is_open = true;
                self.last_updated = Some(*timestamp);
            }
        }
    }

    /// Fresh fold of an ordered event sequence. None for an empty stream.
    pub fn replay<'a, I>(events: I) -> Option<Position>
    where
        I: IntoIterator<Item = &'a PositionEvent>,
    {
        let mut position = Position::default();
        let mut any = false;
        for event in events {
            position.apply(event);
            any = true;
        }
        any.then_some(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        "2024-03-01T10:00:00Z".parse().unwrap()
    }

    fn opened(id: Uuid, side: Side, qty: i64, price: Decimal) -> PositionEvent {
        PositionEvent::Opened {
            trade_id: Uuid::new_v4(),
            instrument_id: id,
            symbol: "AAPL".into(),
            currency: Currency::USD,
            side,
            quantity: qty,
            price,
            timestamp: ts(),
        }
    }

    #[test]
    fn opened_sets_identity_and_first_lot() {
        let id = Uuid::new_v4();
        let mut p = Position::default();
        p.apply(&opened(id, Side::Buy, 100, dec!(150)));

        assert_eq!(p.instrument_id, id);
        assert_eq!(p.quantity, 100);
        assert!(p.is_open);
        assert!(p.is_long());
        assert_eq!(p.cost_lots, vec![CostLot::new(dec!(100), dec!(150))]);
        assert_eq!(p.realized_pnl, Decimal::ZERO);
        assert_eq!(p.last_updated, Some(ts()));
    }

    #[test]
    fn opened_sell_goes_short() {
        let mut p = Position::default();
        p.apply(&opened(Uuid::new_v4(), Side::Sell, 40, dec!(55)));
        assert_eq!(p.quantity, -40);
        assert!(p.is_short());
        assert_eq!(p.cost_lots.len(), 1);
    }

    #[test]
    fn increase_appends_lot_in_current_direction() {
        let mut p = Position::default();
        p.apply(&opened(Uuid::new_v4(), Side::Sell, 40, dec!(55)));
        p.apply(&PositionEvent::Increased {
            trade_id: Uuid::new_v4(),
            quantity: 10,
            price: dec!(54),
            timestamp: ts(),
        });
        assert_eq!(p.quantity, -50);
        assert_eq!(p.cost_lots.len(), 2);
        assert_eq!(p.cost_lots[1], CostLot::new(dec!(10), dec!(54)));
    }

    #[test]
    fn decrease_reduces_magnitude_and_consumes_lots_fifo() {
        let mut p = Position::default();
        p.apply(&opened(Uuid::new_v4(), Side::Buy, 100, dec!(10)));
        p.apply(&PositionEvent::Increased {
            trade_id: Uuid::new_v4(),
            quantity: 50,
            price: dec!(12),
            timestamp: ts(),
        });
        p.apply(&PositionEvent::Decreased {
            trade_id: Uuid::new_v4(),
            quantity_closed: 120,
            price: dec!(15),
            realized_pnl: dec!(560),
            timestamp: ts(),
        });

        assert_eq!(p.quantity, 30);
        assert_eq!(p.realized_pnl, dec!(560));
        assert_eq!(p.cost_lots, vec![CostLot::new(dec!(30), dec!(12))]);
        assert!(p.is_open);
    }

    #[test]
    fn close_zeroes_state_and_reopen_resets_pnl() {
        let id = Uuid::new_v4();
        let mut p = Position::default();
        p.apply(&opened(id, Side::Buy, 100, dec!(150)));
        p.apply(&PositionEvent::Closed {
            trade_id: Uuid::new_v4(),
            quantity_closed: 100,
            price: dec!(160),
            realized_pnl: dec!(1000),
            timestamp: ts(),
        });

        assert_eq!(p.quantity, 0);
        assert!(!p.is_open);
        assert!(p.cost_lots.is_empty());
        assert_eq!(p.realized_pnl, dec!(1000));

        // Reopen: realized P&L does not carry across the cycle.
        p.apply(&opened(id, Side::Sell, 20, dec!(170)));
        assert_eq!(p.quantity, -20);
        assert!(p.is_open);
        assert_eq!(p.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn reversal_flips_direction_with_single_fresh_lot() {
        let mut p = Position::default();
        p.apply(&opened(Uuid::new_v4(), Side::Buy, 100, dec!(150)));
        p.apply(&PositionEvent::Reversed {
            trade_id: Uuid::new_v4(),
            quantity_closed: 100,
            new_quantity: 50,
            new_side: Side::Sell,
            close_price: dec!(140),
            realized_pnl: dec!(-1000),
            new_position_price: dec!(140),
            timestamp: ts(),
        });

        assert_eq!(p.quantity, -50);
        assert!(p.is_short());
        assert_eq!(p.realized_pnl, dec!(-1000));
        assert_eq!(p.cost_lots, vec![CostLot::new(dec!(50), dec!(140))]);
    }

    #[test]
    fn replay_is_deterministic() {
        let id = Uuid::new_v4();
        let events = vec![
            opened(id, Side::Buy, 100, dec!(150)),
            PositionEvent::Increased {
                trade_id: Uuid::new_v4(),
                quantity: 50,
                price: dec!(152.25),
                timestamp: ts(),
            },
            PositionEvent::Decreased {
                trade_id: Uuid::new_v4(),
                quantity_closed: 60,
                price: dec!(160),
                realized_pnl: dec!(600),
                timestamp: ts(),
            },
        ];

        let first = Position::replay(&events).unwrap();
        let second = Position::replay(&events).unwrap();
        assert_eq!(first, second);

        let no_events: Vec<PositionEvent> = Vec::new();
        assert_eq!(Position::replay(&no_events), None);
    }
}
