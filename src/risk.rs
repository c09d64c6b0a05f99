// ===============================
// src/risk.rs (risk calculator)
// ===============================
//
// Pure valuation functions — no caches, no event log, all state passed in.
// The snapshot worker (snapshot.rs) feeds these from the shared caches.
//
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{CostLot, Currency, PositionRisk, PriceTick, RiskSnapshot, Side};
use crate::position::Position;

/// Quantity-weighted mean of lot prices. 0 for empty lots or zero total.
pub fn average_cost_basis(lots: &[CostLot]) -> Decimal {
    if lots.is_empty() {
        return Decimal::ZERO;
    }
    let total_qty: Decimal = lots.iter().map(|l| l.quantity).sum();
    if total_qty == Decimal::ZERO {
        return Decimal::ZERO;
    }
    let weighted: Decimal = lots.iter().map(|l| l.quantity * l.price_per_unit).sum();
    weighted / total_qty
}

/// Signed-quantity convention: long (qty > 0) profits when price rises,
/// short (qty < 0) profits when price falls.
pub fn unrealized_pnl(quantity: i64, avg_cost: Decimal, current_price: Decimal) -> Decimal {
    (current_price - avg_cost) * Decimal::from(quantity)
}

/// `rate_lookup(from, to)` returns units of `to` per unit of `from`.
pub fn convert_to_usd<F>(amount: Decimal, from: Currency, rate_lookup: &F) -> Decimal
where
    F: Fn(Currency, Currency) -> Decimal,
{
    if from == Currency::USD {
        return amount;
    }
    amount * rate_lookup(from, Currency::USD)
}

/// Values one position against its latest tick. None when no tick is known
/// for the instrument — the position is skipped in the snapshot, not an error.
pub fn build_position_risk<F>(
    position: &Position,
    tick: Option<&PriceTick>,
    rate_lookup: &F,
) -> Option<PositionRisk>
where
    F: Fn(Currency, Currency) -> Decimal,
{
    let tick = tick?;
    let currency = position.currency.unwrap_or(Currency::USD);

    let avg_cost = average_cost_basis(&position.cost_lots);
    let unrealized = unrealized_pnl(position.quantity, avg_cost, tick.price);
    let unrealized_usd = convert_to_usd(unrealized, currency, rate_lookup);
    let realized_usd = convert_to_usd(position.realized_pnl, currency, rate_lookup);

    Some(PositionRisk {
        instrument_id: position.instrument_id,
        symbol: position.symbol.clone(),
        currency,
        side: if position.quantity >= 0 { Side::Buy } else { Side::Sell },
        quantity: position.quantity.abs(),
        average_cost_basis: avg_cost,
        current_price: tick.price,
        unrealized_pnl: unrealized,
        unrealized_pnl_usd: unrealized_usd,
        realized_pnl: position.realized_pnl,
        realized_pnl_usd: realized_usd,
    })
}

/// Portfolio totals across all entries. `open_position_count` counts only
/// long entries (signed quantity > 0) while `position_count` counts every
/// entry including shorts — kept exactly as the live system behaves.
pub fn build_snapshot(position_risks: Vec<PositionRisk>, timestamp: DateTime<Utc>) -> RiskSnapshot {
    let total_unrealized_usd: Decimal = position_risks.iter().map(|p| p.unrealized_pnl_usd).sum();
    let total_realized_usd: Decimal = position_risks.iter().map(|p| p.realized_pnl_usd).sum();
    let open_position_count = position_risks
        .iter()
        .filter(|p| p.side == Side::Buy && p.quantity > 0)
        .count();

    RiskSnapshot {
        timestamp,
        position_count: position_risks.len(),
        open_position_count,
        total_unrealized_pnl_usd: total_unrealized_usd,
        total_realized_pnl_usd: total_realized_usd,
        total_net_pnl_usd: total_unrealized_usd + total_realized_usd,
        positions: position_risks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn ts() -> DateTime<Utc> {
        "2024-03-01T10:00:00Z".parse().unwrap()
    }

    fn no_fx(_from: Currency, _to: Currency) -> Decimal {
        Decimal::ONE
    }

    fn tick(instrument_id: Uuid, price: Decimal) -> PriceTick {
        PriceTick {
            instrument_id,
            symbol: "AAPL".into(),
            price,
            currency: Currency::USD,
            timestamp: ts(),
        }
    }

    #[test]
    fn average_cost_basis_is_quantity_weighted() {
        let lots = vec![
            CostLot::new(dec!(100), dec!(10)),
            CostLot::new(dec!(50), dec!(13)),
        ];
        assert_eq!(average_cost_basis(&lots), dec!(11));
        assert_eq!(average_cost_basis(&[]), Decimal::ZERO);
    }

    #[test]
    fn short_position_gains_on_price_decline() {
        assert_eq!(unrealized_pnl(-100, dec!(50), dec!(45)), dec!(500));
        assert_eq!(unrealized_pnl(100, dec!(50), dec!(45)), dec!(-500));
    }

    #[test]
    fn usd_conversion_is_identity_for_usd() {
        let lookup = |from: Currency, to: Currency| {
            assert_eq!((from, to), (Currency::EUR, Currency::USD));
            dec!(1.08)
        };
        assert_eq!(convert_to_usd(dec!(100), Currency::USD, &no_fx), dec!(100));
        assert_eq!(convert_to_usd(dec!(100), Currency::EUR, &lookup), dec!(108.00));
    }

    #[test]
    fn position_without_tick_is_skipped() {
        let mut position = Position::default();
        position.quantity = 10;
        position.is_open = true;
        assert!(build_position_risk(&position, None, &no_fx).is_none());
    }

    #[test]
    fn position_risk_carries_local_and_usd_pnl() {
        let id = Uuid::new_v4();
        let position = Position {
            instrument_id: id,
            symbol: "TTE.PA".into(),
            currency: Some(Currency::EUR),
            quantity: 100,
            cost_lots: vec![CostLot::new(dec!(100), dec!(60))],
            realized_pnl: dec!(50),
            is_open: true,
            last_updated: Some(ts()),
        };
        let lookup = |_: Currency, _: Currency| dec!(1.10);

        let risk = build_position_risk(&position, Some(&tick(id, dec!(62))), &lookup).unwrap();
        assert_eq!(risk.side, Side::Buy);
        assert_eq!(risk.quantity, 100);
        assert_eq!(risk.average_cost_basis, dec!(60));
        assert_eq!(risk.unrealized_pnl, dec!(200));
        assert_eq!(risk.unrealized_pnl_usd, dec!(220.00));
        assert_eq!(risk.realized_pnl_usd, dec!(55.00));
    }

    #[test]
    fn snapshot_totals_and_long_only_open_count() {
        let long = PositionRisk {
            instrument_id: Uuid::new_v4(),
            symbol: "AAPL".into(),
            currency: Currency::USD,
            side: Side::Buy,
            quantity: 100,
            average_cost_basis: dec!(150),
            current_price: dec!(155),
            unrealized_pnl: dec!(500),
            unrealized_pnl_usd: dec!(500),
            realized_pnl: dec!(100),
            realized_pnl_usd: dec!(100),
        };
        let short = PositionRisk {
            instrument_id: Uuid::new_v4(),
            symbol: "MSFT".into(),
            currency: Currency::USD,
            side: Side::Sell,
            quantity: 40,
            average_cost_basis: dec!(380),
            current_price: dec!(375),
            unrealized_pnl: dec!(200),
            unrealized_pnl_usd: dec!(200),
            realized_pnl: dec!(-20),
            realized_pnl_usd: dec!(-20),
        };

        let snapshot = build_snapshot(vec![long, short], ts());
        assert_eq!(snapshot.total_unrealized_pnl_usd, dec!(700));
        assert_eq!(snapshot.total_realized_pnl_usd, dec!(80));
        assert_eq!(snapshot.total_net_pnl_usd, dec!(780));
        assert_eq!(snapshot.position_count, 2);
        // Shorts are valued but never counted as "open" here.
        assert_eq!(snapshot.open_position_count, 1);
    }
}
