//! Event and intent types flowing through the runtime.
//!
//! Everything here is an immutable value object. Identity is content-addressed:
//! ids are sha256 over the fields that make the object unique, truncated to 32
//! hex chars, so replaying the same input stream reproduces the same ids.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Deterministic id over pipe-joined parts, 32 hex chars.
pub fn det_id(parts: &[&str]) -> String {
    let mut h = Sha256::new();
    h.update(parts.join("|").as_bytes());
    hex::encode(h.finalize())[..32].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn flipped(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for long, -1 for short. Used for signed R computations.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// One bar of market data. Produced exactly once per feed row by the
/// market stream, consumed exactly once by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleEvent {
    pub instrument: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Strictly increasing per (instrument, timeframe), starting at 1.
    pub sequence_id: u64,
}

/// Candidate entry produced by a strategy. `ts` is the RFC3339 timestamp of
/// the triggering candle.
#[derive(Debug, Clone)]
pub struct Signal {
    pub signal_id: String,
    pub instrument: String,
    pub ts: String,
    pub side: Side,
    pub entry_px: f64,
    pub stop_px: f64,
    pub target_r: f64,
    pub event_sequence_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Entry,
    Exit,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Entry => "ENTRY",
            IntentKind::Exit => "EXIT",
        }
    }
}

/// Governed order instruction emitted by the engine. For EXIT intents
/// `entry_px` is the reference price the fill model shifts from (the close of
/// the candle that made the exit due) and `position_id` names the position
/// being closed.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub intent_id: String,
    pub signal_id: String,
    pub instrument: String,
    pub side: Side,
    pub entry_px: f64,
    pub stop_px: f64,
    pub qty: f64,
    pub risk_dollars: f64,
    pub event_ts: String,
    pub kind: IntentKind,
    pub position_id: Option<String>,
    pub exit_reason: Option<String>,
}

/// Ephemeral result of one `process_event` call.
#[derive(Debug, Clone, Default)]
pub struct EngineDecision {
    pub signal: Option<Signal>,
    pub intents: Vec<OrderIntent>,
    pub veto_reason: Option<String>,
}

impl EngineDecision {
    pub fn entry_intents(&self) -> impl Iterator<Item = &OrderIntent> {
        self.intents.iter().filter(|i| i.kind == IntentKind::Entry)
    }

    pub fn exit_intents(&self) -> impl Iterator<Item = &OrderIntent> {
        self.intents.iter().filter(|i| i.kind == IntentKind::Exit)
    }
}
