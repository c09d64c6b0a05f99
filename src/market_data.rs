// ===============================
// src/market_data.rs (price & FX consumers)
// ===============================
//
// Two worker loops off the market-data bus, both pure cache writers: parse
// the JSON payload, stamp the latest value into the shared cache, count it.
// Undeserializable payloads are dropped at this edge with a warning.
//
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::cache::MarketDataCache;
use crate::domain::{BusMessage, FxRate, PriceTick};
use crate::metrics::{CACHE_FX_RATES, CACHE_PRICES, DROPPED_MESSAGES, FX_RATES, TICKS};

pub async fn run_prices(
    mut price_rx: mpsc::Receiver<BusMessage>,
    cache: Arc<MarketDataCache>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("price consumer started");
    let mut processed: u64 = 0;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() { break; }
            }
            maybe = price_rx.recv() => {
                let Some(msg) = maybe else { break };
                let tick: PriceTick = match serde_json::from_str(&msg.payload) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(?e, key = %msg.key, "undeserializable price payload, dropping");
                        DROPPED_MESSAGES.with_label_values(&["prices"]).inc();
                        continue;
                    }
                };

                cache.update_price(tick);
                processed += 1;
                TICKS.inc();
                CACHE_PRICES.set(cache.price_count() as i64);

                if processed % 1000 == 0 {
                    info!(
                        ticks = processed,
                        instruments = cache.price_count(),
                        "price consumer progress"
                    );
                }
            }
        }
    }
    info!(ticks = processed, "price consumer stopped");
}

pub async fn run_fx(
    mut fx_rx: mpsc::Receiver<BusMessage>,
    cache: Arc<MarketDataCache>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("fx consumer started");
    let mut processed: u64 = 0;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() { break; }
            }
            maybe = fx_rx.recv() => {
                let Some(msg) = maybe else { break };
                let rate: FxRate = match serde_json::from_str(&msg.payload) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(?e, key = %msg.key, "undeserializable fx payload, dropping");
                        DROPPED_MESSAGES.with_label_values(&["fx"]).inc();
                        continue;
                    }
                };

                cache.update_fx_rate(rate);
                processed += 1;
                FX_RATES.inc();
                CACHE_FX_RATES.set(cache.fx_rate_count() as i64);

                if processed % 100 == 0 {
                    info!(
                        rates = processed,
                        pairs = cache.fx_rate_count(),
                        "fx consumer progress"
                    );
                }
            }
        }
    }
    info!(rates = processed, "fx consumer stopped");
}
