// ===============================
// src/cache.rs (shared read projections)
// ===============================
//
// Best-effort, eventually-consistent projections over the event store —
// written by the trade/market-data workers, read by the snapshot worker.
// Never authoritative for audit purposes; reconciliation rebuilds from the
// store. Distinct keys update fully in parallel. The latest-snapshot and
// latest-report "caches" are tokio watch channels wired in main.rs: one
// writer swaps the whole immutable value, readers see old or new, never a
// partial.
//
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Currency, FxRate, PriceTick};
use crate::position::Position;

/// Open positions by instrument id.
#[derive(Default)]
pub struct PositionCache {
    positions: DashMap<Uuid, Position>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open positions are inserted or replaced; a closed position leaves the
    /// cache entirely.
    pub fn update(&self, position: Position) {
        if position.is_open {
            self.positions.insert(position.instrument_id, position);
        } else {
            self.positions.remove(&position.instrument_id);
        }
    }

    pub fn remove(&self, instrument_id: Uuid) {
        self.positions.remove(&instrument_id);
    }

    /// Independent snapshot copy — later updates never show through.
    pub fn get_all(&self) -> Vec<Position> {
        self.positions.iter().map(|p| p.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Latest price per instrument and latest FX rate per currency pair.
#[derive(Default)]
pub struct MarketDataCache {
    prices: DashMap<Uuid, PriceTick>,
    fx_rates: DashMap<(Currency, Currency), FxRate>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_price(&self, tick: PriceTick) {
        self.prices.insert(tick.instrument_id, tick);
    }

    pub fn update_fx_rate(&self, rate: FxRate) {
        self.fx_rates.insert((rate.base, rate.quote), rate);
    }

    pub fn price(&self, instrument_id: Uuid) -> Option<PriceTick> {
        self.prices.get(&instrument_id).map(|t| t.value().clone())
    }

    /// Rate for converting `base` into `quote`: 1 when the currencies are
    /// equal, the direct rate when known, the inverse when only the reverse
    /// pair is known, else 0. Zero is a "no rate" sentinel, never a valid
    /// conversion factor.
    pub fn fx_rate(&self, base: Currency, quote: Currency) -> Decimal {
        if base == quote {
            return Decimal::ONE;
        }
        if let Some(rate) = self.fx_rates.get(&(base, quote)) {
            return rate.rate;
        }
        if let Some(inverse) = self.fx_rates.get(&(quote, base)) {
            return Decimal::ONE / inverse.rate;
        }
        Decimal::ZERO
    }

    pub fn price_count(&self) -> usize {
        self.prices.len()
    }

    pub fn fx_rate_count(&self) -> usize {
        self.fx_rates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        "2024-03-01T10:00:00Z".parse().unwrap()
    }

    fn open_position(quantity: i64) -> Position {
        Position {
            instrument_id: Uuid::new_v4(),
            symbol: "AAPL".into(),
            currency: Some(Currency::USD),
            quantity,
            cost_lots: vec![],
            realized_pnl: dec!(0),
            is_open: quantity != 0,
            last_updated: Some(ts()),
        }
    }

    #[test]
    fn closed_positions_are_evicted() {
        let cache = PositionCache::new();
        let mut position = open_position(100);

        cache.update(position.clone());
        assert_eq!(cache.len(), 1);

        position.quantity = 0;
        position.is_open = false;
        cache.update(position);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn get_all_is_isolated_from_later_updates() {
        let cache = PositionCache::new();
        cache.update(open_position(10));

        let snapshot = cache.get_all();
        cache.update(open_position(20));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_distinct_keys_all_land() {
        let cache = std::sync::Arc::new(PositionCache::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.update(open_position(i + 1)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 16);
    }

    #[test]
    fn fx_rate_identity_direct_inverse_and_sentinel() {
        let cache = MarketDataCache::new();
        cache.update_fx_rate(FxRate {
            base: Currency::EUR,
            quote: Currency::USD,
            rate: dec!(1.25),
            timestamp: ts(),
        });

        assert_eq!(cache.fx_rate(Currency::USD, Currency::USD), Decimal::ONE);
        assert_eq!(cache.fx_rate(Currency::EUR, Currency::USD), dec!(1.25));
        assert_eq!(cache.fx_rate(Currency::USD, Currency::EUR), dec!(0.8));
        assert_eq!(cache.fx_rate(Currency::JPY, Currency::USD), Decimal::ZERO);
    }
}
