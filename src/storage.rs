//! Durable storage: governance, signals, orders, fills, trades.
//!
//! All order/fill/trade writes are idempotent upserts keyed by deterministic
//! ids, so re-delivery after a crash or a replay never duplicates rows. The
//! trades table is the source of truth for open positions across restarts.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::engine::state::{Position, PositionStatus};
use crate::events::Side;
use crate::logging::ts_now;

/// Open trade as stored; consumed by startup bootstrap.
#[derive(Debug, Clone)]
pub struct OpenTradeRow {
    pub trade_id: String,
    pub signal_id: String,
    pub instrument: String,
    pub side: Side,
    pub entry_ts: String,
    pub entry_price: f64,
    pub qty: f64,
    pub risk_r: f64,
    pub entry_sequence_id: u64,
    pub stop_price: f64,
    pub take_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub signals: u64,
    pub orders: u64,
    pub fills: u64,
    pub trades: u64,
    pub open_trades: u64,
}

pub trait Storage {
    fn insert_governance(
        &self,
        kind: &str,
        instrument: &str,
        setup_type: &str,
        action: &str,
        reason: &str,
        stats: &Value,
    ) -> Result<()>;
    fn insert_cb(&self, trigger: &str, threshold: &str, action: &str, details: &Value)
        -> Result<()>;
    fn insert_signal(
        &self,
        signal_id: &str,
        ts: &str,
        instrument: &str,
        strategy: &str,
        decision: &str,
        veto_reason: &str,
    ) -> Result<()>;
    fn upsert_order(
        &self,
        order_id: &str,
        signal_id: &str,
        status: &str,
        sent_at: &str,
        ack_at: &str,
    ) -> Result<()>;
    fn upsert_fill(
        &self,
        fill_id: &str,
        order_id: &str,
        ts: &str,
        fill_px: f64,
        fill_qty: f64,
        ref_px: f64,
        slippage_bps: f64,
    ) -> Result<()>;
    fn upsert_open_trade(&self, pos: &Position) -> Result<()>;
    fn close_trade(&self, pos: &Position, realized_r: f64) -> Result<()>;
    fn fetch_open_trades(&self) -> Result<Vec<OpenTradeRow>>;
    fn open_exposure_r(&self) -> Result<f64>;
    fn counts(&self) -> Result<StoreCounts>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS signals (
                signal_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                instrument TEXT NOT NULL,
                strategy TEXT NOT NULL,
                decision TEXT NOT NULL,
                veto_reason TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                signal_id TEXT NOT NULL,
                status TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                ack_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS fills (
                fill_id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                ts TEXT NOT NULL,
                fill_px REAL NOT NULL,
                fill_qty REAL NOT NULL,
                ref_px REAL NOT NULL,
                slippage_bps REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                signal_id TEXT NOT NULL,
                instrument TEXT NOT NULL,
                side TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_timestamp TEXT NOT NULL,
                exit_timestamp TEXT,
                entry_price REAL NOT NULL,
                exit_price REAL,
                qty REAL NOT NULL,
                risk_r REAL NOT NULL,
                entry_sequence_id INTEGER NOT NULL,
                stop_price REAL NOT NULL,
                take_price REAL,
                realized_r REAL,
                exit_reason TEXT
            );
            CREATE TABLE IF NOT EXISTS governance_events (
                id INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                instrument TEXT NOT NULL,
                setup_type TEXT NOT NULL,
                action TEXT NOT NULL,
                reason TEXT NOT NULL,
                stats TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS circuit_breaker_events (
                id INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                trigger_name TEXT NOT NULL,
                threshold TEXT NOT NULL,
                action TEXT NOT NULL,
                details TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    fn count_table(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

impl Storage for SqliteStore {
    fn insert_governance(
        &self,
        kind: &str,
        instrument: &str,
        setup_type: &str,
        action: &str,
        reason: &str,
        stats: &Value,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO governance_events(timestamp, kind, instrument, setup_type, action, reason, stats)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![ts_now(), kind, instrument, setup_type, action, reason, stats.to_string()],
        )?;
        Ok(())
    }

    fn insert_cb(
        &self,
        trigger: &str,
        threshold: &str,
        action: &str,
        details: &Value,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO circuit_breaker_events(timestamp, trigger_name, threshold, action, details)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![ts_now(), trigger, threshold, action, details.to_string()],
        )?;
        Ok(())
    }

    fn insert_signal(
        &self,
        signal_id: &str,
        ts: &str,
        instrument: &str,
        strategy: &str,
        decision: &str,
        veto_reason: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO signals(signal_id, timestamp, instrument, strategy, decision, veto_reason)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(signal_id) DO UPDATE SET
                timestamp=excluded.timestamp,
                instrument=excluded.instrument,
                strategy=excluded.strategy,
                decision=excluded.decision,
                veto_reason=excluded.veto_reason",
            params![signal_id, ts, instrument, strategy, decision, veto_reason],
        )?;
        Ok(())
    }

    fn upsert_order(
        &self,
        order_id: &str,
        signal_id: &str,
        status: &str,
        sent_at: &str,
        ack_at: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO orders(order_id, signal_id, status, sent_at, ack_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![order_id, signal_id, status, sent_at, ack_at],
        )?;
        Ok(())
    }

    fn upsert_fill(
        &self,
        fill_id: &str,
        order_id: &str,
        ts: &str,
        fill_px: f64,
        fill_qty: f64,
        ref_px: f64,
        slippage_bps: f64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO fills(fill_id, order_id, ts, fill_px, fill_qty, ref_px, slippage_bps)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![fill_id, order_id, ts, fill_px, fill_qty, ref_px, slippage_bps],
        )?;
        Ok(())
    }

    fn upsert_open_trade(&self, pos: &Position) -> Result<()> {
        self.conn.execute(
            "INSERT INTO trades(trade_id, signal_id, instrument, side, status, entry_timestamp,
                                entry_price, qty, risk_r, entry_sequence_id, stop_price, take_price)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(trade_id) DO UPDATE SET
                status=excluded.status,
                entry_price=excluded.entry_price,
                qty=excluded.qty,
                risk_r=excluded.risk_r",
            params![
                pos.position_id,
                pos.signal_id,
                pos.instrument,
                pos.side.as_str(),
                pos.status.as_str(),
                pos.entry_ts,
                pos.entry_price,
                pos.qty,
                pos.risk_r,
                pos.entry_sequence_id as i64,
                pos.stop_price,
                pos.take_price,
            ],
        )?;
        Ok(())
    }

    fn close_trade(&self, pos: &Position, realized_r: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE trades SET status=?2, exit_timestamp=?3, exit_price=?4, realized_r=?5, exit_reason=?6
             WHERE trade_id=?1",
            params![
                pos.position_id,
                PositionStatus::Closed.as_str(),
                pos.exit_ts,
                pos.exit_price,
                realized_r,
                pos.exit_reason,
            ],
        )?;
        Ok(())
    }

    fn fetch_open_trades(&self) -> Result<Vec<OpenTradeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT trade_id, signal_id, instrument, side, entry_timestamp, entry_price, qty,
                    risk_r, entry_sequence_id, stop_price, take_price
             FROM trades WHERE status='OPEN' ORDER BY entry_timestamp ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let side_raw: String = row.get(3)?;
            Ok(OpenTradeRow {
                trade_id: row.get(0)?,
                signal_id: row.get(1)?,
                instrument: row.get(2)?,
                side: Side::parse(&side_raw).unwrap_or(Side::Buy),
                entry_ts: row.get(4)?,
                entry_price: row.get(5)?,
                qty: row.get(6)?,
                risk_r: row.get(7)?,
                entry_sequence_id: row.get::<_, i64>(8)? as u64,
                stop_price: row.get(9)?,
                take_price: row.get(10)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn open_exposure_r(&self) -> Result<f64> {
        let total: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(risk_r), 0.0) FROM trades WHERE status='OPEN'",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    fn counts(&self) -> Result<StoreCounts> {
        let open_trades: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE status='OPEN'",
            [],
            |row| row.get(0),
        )?;
        Ok(StoreCounts {
            signals: self.count_table("signals")?,
            orders: self.count_table("orders")?,
            fills: self.count_table("fills")?,
            trades: self.count_table("trades")?,
            open_trades: open_trades as u64,
        })
    }
}
