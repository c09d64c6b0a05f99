// ===============================
// src/checksum.rs (canonical portfolio hash)
// ===============================
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::position::Position;

/// Deterministic SHA-256 over a position set, used as a cheap equality probe
/// before field-level diffing. Positions are sorted by instrument id so the
/// result is independent of input ordering; only the event-sourced fields
/// participate (instrument id, quantity, realized P&L, cost lots). Any change
/// down to the 8th decimal of P&L or any lot alters the hash.
pub fn compute(positions: &[Position]) -> String {
    let mut sorted: Vec<&Position> = positions.iter().collect();
    sorted.sort_by_key(|p| p.instrument_id);

    let mut canonical = String::new();
    for p in &sorted {
        let _ = write!(canonical, "{}|{}|{:.8}|", p.instrument_id, p.quantity, p.realized_pnl);
        for lot in &p.cost_lots {
            let _ = write!(canonical, "{:.8}:{:.8},", lot.quantity, lot.price_per_unit);
        }
        canonical.push(';');
    }

    hex::encode(Sha256::digest(canonical.as_bytes()))
}
