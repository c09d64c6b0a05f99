// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Trade pipeline --------
pub static TRADES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("trades_total", "trades consumed").unwrap());

pub static TRADES_BY_SYMBOL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trades_total_by_symbol", "trades consumed per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static LEDGER_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ledger_events_total", "appended ledger events by kind"),
        &["event"],
    )
    .unwrap()
});

pub static APPEND_CONFLICTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "append_conflicts_total",
        "optimistic append conflicts (retried)",
    )
    .unwrap()
});

pub static DUPLICATE_TRADES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "duplicate_trades_total",
        "redelivered trades skipped by dedup",
    )
    .unwrap()
});

pub static DROPPED_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "dropped_messages_total",
            "inbound payloads dropped at the transport edge",
        ),
        &["topic"],
    )
    .unwrap()
});

// -------- Market data --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("price_ticks_total", "price ticks consumed").unwrap());

pub static FX_RATES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("fx_rates_total", "fx rates consumed").unwrap());

pub static CACHE_PRICES: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("cached_prices", "instruments with a cached price").unwrap());

pub static CACHE_FX_RATES: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("cached_fx_rates", "currency pairs with a cached rate").unwrap());

// -------- Risk snapshots --------
pub static SNAPSHOTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("risk_snapshots_total", "risk snapshots published").unwrap());

pub static OPEN_POSITIONS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("open_positions", "open positions in latest snapshot").unwrap());

pub static PNL_UNREALIZED_USD: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new("pnl_unrealized_usd", "portfolio unrealized PnL (USD)").unwrap()
});

pub static PNL_REALIZED_USD: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("pnl_realized_usd", "portfolio realized PnL (USD)").unwrap());

// -------- Reconciliation --------
pub static RECONCILE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reconciliations_total", "reconciliation sweeps by result"),
        &["result"],
    )
    .unwrap()
});

pub static RECONCILE_DISCREPANCIES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reconciliation_discrepancies",
        "discrepancies in the latest reconciliation",
    )
    .unwrap()
});

pub static RECONCILE_EVENTS_REPLAYED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reconciliation_events_replayed",
        "events replayed in the latest reconciliation",
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TRADES.clone())),
        REGISTRY.register(Box::new(TRADES_BY_SYMBOL.clone())),
        REGISTRY.register(Box::new(LEDGER_EVENTS.clone())),
        REGISTRY.register(Box::new(APPEND_CONFLICTS.clone())),
        REGISTRY.register(Box::new(DUPLICATE_TRADES.clone())),
        REGISTRY.register(Box::new(DROPPED_MESSAGES.clone())),
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(FX_RATES.clone())),
        REGISTRY.register(Box::new(CACHE_PRICES.clone())),
        REGISTRY.register(Box::new(CACHE_FX_RATES.clone())),
        REGISTRY.register(Box::new(SNAPSHOTS.clone())),
        REGISTRY.register(Box::new(OPEN_POSITIONS.clone())),
        REGISTRY.register(Box::new(PNL_UNREALIZED_USD.clone())),
        REGISTRY.register(Box::new(PNL_REALIZED_USD.clone())),
        REGISTRY.register(Box::new(RECONCILE_RUNS.clone())),
        REGISTRY.register(Box::new(RECONCILE_DISCREPANCIES.clone())),
        REGISTRY.register(Box::new(RECONCILE_EVENTS_REPLAYED.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps the Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
