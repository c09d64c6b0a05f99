// ===============================
// src/fifo.rs (FIFO cost-basis matcher)
// ===============================
use rust_decimal::Decimal;

use crate::domain::CostLot;

#[derive(Debug, Clone, PartialEq)]
pub struct FifoResult {
    pub realized_pnl: Decimal,
    pub remaining_lots: Vec<CostLot>,
}

/// Consumes cost lots oldest-first to realize P&L on a reduction or close.
///
/// Per-unit P&L is `close_price - lot_price` for longs and `lot_price -
/// close_price` for shorts. A partially consumed lot stays in the remaining
/// list with its leftover quantity; lots past the closing quantity pass
/// through unchanged. `quantity_to_close` must not exceed the lot total —
/// the caller's boundary logic guarantees that.
pub fn close_lots(
    lots: &[CostLot],
    quantity_to_close: i64,
    close_price: Decimal,
    is_long: bool,
) -> FifoResult {
    debug_assert!(
        Decimal::from(quantity_to_close) <= lots.iter().map(|l| l.quantity).sum::<Decimal>(),
        "closing more quantity than the lots hold"
    );

    let mut remaining = Vec::new();
    let mut realized_pnl = Decimal::ZERO;
    let mut qty_left = Decimal::from(quantity_to_close);

    for lot in lots {
        if qty_left <= Decimal::ZERO {
            remaining.push(lot.clone());
            continue;
        }

        let consumed = qty_left.min(lot.quantity);
        let pnl_per_unit = if is_long {
            close_price - lot.price_per_unit
        } else {
            lot.price_per_unit - close_price
        };

        realized_pnl += pnl_per_unit * consumed;
        qty_left -= consumed;

        let leftover = lot.quantity - consumed;
        if leftover > Decimal::ZERO {
            remaining.push(CostLot::new(leftover, lot.price_per_unit));
        }
    }

    FifoResult { realized_pnl, remaining_lots: remaining }
}
