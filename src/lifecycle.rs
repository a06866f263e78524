//! Process lifecycle: restart-safe state reconstruction and the single-instance
//! advisory lock.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::engine::{Engine, Position, PositionStatus};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapSummary {
    pub open_positions: usize,
    pub open_exposure_r: f64,
}

/// Rebuild engine positions and exposure entirely from storage's OPEN rows.
/// Whatever the engine held before this call is discarded; across restarts
/// the durable store is the only source of truth.
pub fn bootstrap_engine_from_db(engine: &mut Engine, storage: &dyn Storage) -> Result<BootstrapSummary> {
    let mut positions = HashMap::new();
    let mut total_r = 0.0;

    for row in storage.fetch_open_trades()? {
        total_r += row.risk_r;
        positions.insert(
            row.instrument.clone(),
            Position {
                position_id: row.trade_id,
                signal_id: row.signal_id,
                instrument: row.instrument,
                side: row.side,
                entry_ts: row.entry_ts,
                entry_sequence_id: row.entry_sequence_id,
                entry_price: row.entry_price,
                risk_r: row.risk_r,
                qty: row.qty,
                stop_price: row.stop_price,
                take_price: row.take_price,
                status: PositionStatus::Open,
                exit_ts: None,
                exit_price: None,
                exit_reason: None,
            },
        );
    }

    let summary = BootstrapSummary {
        open_positions: positions.len(),
        open_exposure_r: total_r,
    };
    engine.replace_positions(positions, total_r);
    Ok(summary)
}

/// Advisory lock file keeping two runtime instances off the same paper
/// account. Created exclusively with the pid inside; removed on drop.
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| {
                format!(
                    "another runtime instance holds the lock at {}",
                    path.display()
                )
            })?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_first_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.lock");

        let lock = RunLock::acquire(&path).unwrap();
        assert!(RunLock::acquire(&path).is_err());

        drop(lock);
        assert!(RunLock::acquire(&path).is_ok());
    }
}
