//! Engine-owned position and exposure state.
//!
//! EngineState is the single mutable aggregate of the runtime. It is owned by
//! the engine and mutated only through engine transition methods; nothing
//! outside this module writes a Position field directly.

use std::collections::HashMap;

use crate::events::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    ExitPending,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::ExitPending => "EXIT_PENDING",
            PositionStatus::Closed => "CLOSED",
        }
    }

    /// Live means the position still counts toward exposure and blocks a new
    /// entry on its instrument.
    pub fn is_live(&self) -> bool {
        matches!(self, PositionStatus::Open | PositionStatus::ExitPending)
    }
}

#[derive(Debug, Clone)]
pub struct Position {
    pub position_id: String,
    pub signal_id: String,
    pub instrument: String,
    pub side: Side,
    pub entry_ts: String,
    pub entry_sequence_id: u64,
    pub entry_price: f64,
    pub risk_r: f64,
    pub qty: f64,
    pub stop_price: f64,
    pub take_price: Option<f64>,
    pub status: PositionStatus,
    pub exit_ts: Option<String>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<String>,
}

impl Position {
    /// Realized R of closing at `exit_px`: signed price move over the
    /// entry-to-stop distance. The denominator carries the same clamp as
    /// sizing so a degenerate stop cannot produce infinities.
    pub fn realized_r(&self, exit_px: f64) -> f64 {
        let risk_per_unit = (self.entry_price - self.stop_price).abs().max(1e-9);
        self.side.sign() * (exit_px - self.entry_price) / risk_per_unit
    }
}

#[derive(Debug)]
pub struct EngineState {
    pub safe_mode: bool,
    pub open_exposure_r: f64,
    pub max_open_exposure_r: f64,
    pub exit_after_candles: u64,
    /// At most one live position per instrument.
    pub positions: HashMap<String, Position>,
}

impl EngineState {
    pub fn new(max_open_exposure_r: f64, exit_after_candles: u64) -> Self {
        Self {
            safe_mode: false,
            open_exposure_r: 0.0,
            max_open_exposure_r,
            exit_after_candles,
            positions: HashMap::new(),
        }
    }

    pub fn open_positions(&self) -> usize {
        self.positions.values().filter(|p| p.status.is_live()).count()
    }

    /// Sum of risk_r over live positions. With no outstanding entry
    /// reservation this equals `open_exposure_r`.
    pub fn live_exposure_sum(&self) -> f64 {
        self.positions
            .values()
            .filter(|p| p.status.is_live())
            .map(|p| p.risk_r)
            .sum()
    }
}
