//! Consistency check between in-memory aggregates and the durable store.
//!
//! The check only reports. Applying the consequence (safe mode, breaker row)
//! is the runtime loop's job, and repairing the divergence is an operator's.

use anyhow::Result;

use crate::storage::{Storage, StoreCounts};

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub mismatch: bool,
    pub reason: Option<&'static str>,
    pub db_counts: StoreCounts,
    pub local_open_positions: usize,
}

pub fn run_check(storage: &dyn Storage, local_open_positions: usize) -> Result<ReconcileReport> {
    let counts = storage.counts()?;

    let mut mismatch = false;
    let mut reason = None;

    // every trade row implies a fill row in this runtime
    if counts.trades > counts.fills {
        mismatch = true;
        reason = Some("trades_exceed_fills");
    }

    if counts.open_trades as usize != local_open_positions {
        mismatch = true;
        reason = Some("open_position_count_divergence");
    }

    Ok(ReconcileReport {
        mismatch,
        reason,
        db_counts: counts,
        local_open_positions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    #[test]
    fn clean_store_matches_empty_local_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init().unwrap();
        let report = run_check(&store, 0).unwrap();
        assert!(!report.mismatch);
        assert!(report.reason.is_none());
    }

    #[test]
    fn trade_without_fill_is_a_mismatch() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init().unwrap();
        store
            .upsert_order("o-1", "sig-1", "filled", "t0", "t0")
            .unwrap();
        // trade row inserted directly, no fill row behind it
        let pos = crate::engine::Position {
            position_id: "pos-1".to_string(),
            signal_id: "sig-1".to_string(),
            instrument: "BTCUSD".to_string(),
            side: crate::events::Side::Buy,
            entry_ts: "t0".to_string(),
            entry_sequence_id: 1,
            entry_price: 100.0,
            risk_r: 1.0,
            qty: 1.0,
            stop_price: 99.0,
            take_price: None,
            status: crate::engine::PositionStatus::Open,
            exit_ts: None,
            exit_price: None,
            exit_reason: None,
        };
        store.upsert_open_trade(&pos).unwrap();

        let report = run_check(&store, 1).unwrap();
        assert!(report.mismatch);
        assert_eq!(report.reason, Some("trades_exceed_fills"));
    }

    #[test]
    fn open_count_divergence_is_a_mismatch() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init().unwrap();
        let report = run_check(&store, 1).unwrap();
        assert!(report.mismatch);
        assert_eq!(report.reason, Some("open_position_count_divergence"));
    }
}
