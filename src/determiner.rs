// ===============================
// src/determiner.rs (trade -> ledger event decision)
// ===============================
use crate::domain::{Side, Trade};
use crate::fifo;
use crate::position::{Position, PositionEvent};

/// Maps (current position, incoming trade) to the single event that must be
/// appended to the instrument's stream. Pure — the caller owns the append and
/// its atomicity. Callers must also serialize trades per instrument: two
/// concurrent calls against the same stale position produce conflicting
/// events (see processor.rs).
pub fn determine(position: Option<&Position>, trade: &Trade) -> PositionEvent {
    let position = match position {
        Some(p) if p.is_open => p,
        _ => {
            return PositionEvent::Opened {
                trade_id: trade.trade_id,
                instrument_id: trade.instrument_id,
                symbol: trade.symbol.clone(),
                currency: trade.currency,
                side: trade.side,
                quantity: trade.quantity,
                price: trade.price,
                timestamp: trade.timestamp,
            };
        }
    };

    let is_same_side = (position.is_long() && trade.side == Side::Buy)
        || (position.is_short() && trade.side == Side::Sell);

    if is_same_side {
        return PositionEvent::Increased {
            trade_id: trade.trade_id,
            quantity: trade.quantity,
            price: trade.price,
            timestamp: trade.timestamp,
        };
    }

    let abs_position = position.quantity.abs();

    if trade.quantity < abs_position {
        let result = fifo::close_lots(
            &position.cost_lots,
            trade.quantity,
            trade.price,
            position.is_long(),
        );
        return PositionEvent::Decreased {
            trade_id: trade.trade_id,
            quantity_closed: trade.quantity,
            price: trade.price,
            realized_pnl: result.realized_pnl,
            timestamp: trade.timestamp,
        };
    }

    if trade.quantity == abs_position {
        // Equality resolves to a full close, never a reversal.
        let result = fifo::close_lots(
            &position.cost_lots,
            trade.quantity,
            trade.price,
            position.is_long(),
        );
        return PositionEvent::Closed {
            trade_id: trade.trade_id,
            quantity_closed: trade.quantity,
            price: trade.price,
            realized_pnl: result.realized_pnl,
            timestamp: trade.timestamp,
        };
    }

    // trade.quantity > abs_position: close the whole existing side, open the
    // leftover on the opposite side at the trade price.
    let result = fifo::close_lots(
        &position.cost_lots,
        abs_position,
        trade.price,
        position.is_long(),
    );
    PositionEvent::Reversed {
        trade_id: trade.trade_id,
        quantity_closed: abs_position,
        new_quantity: trade.quantity - abs_position,
        new_side: trade.side,
        close_price: trade.price,
        realized_pnl: result.realized_pnl,
        new_position_price: trade.price,
        timestamp: trade.timestamp,
    }
}
