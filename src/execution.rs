//! Paper execution: deterministic fill simulation with idempotent persistence.
//!
//! The fill price shifts the intent's reference price by fee plus calibrated
//! slippage, always against the taker. Order and fill ids are content hashes
//! of the intent, so re-delivering the same intent overwrites the same rows
//! instead of duplicating them.
//!
//! Anything that is not a well-formed intent out of the engine pipeline is a
//! contract violation: the call fails hard and must not be retried.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::events::{det_id, OrderIntent, Side};
use crate::storage::Storage;

pub const FEE_BPS: f64 = 1.0;
pub const FALLBACK_SLIPPAGE_BPS: f64 = 3.0;

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub status: &'static str,
}

#[derive(Debug, Clone)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub fill_px: f64,
    pub fill_qty: f64,
    pub slippage_bps: f64,
}

#[derive(Debug, Deserialize)]
struct InstrumentSummary {
    #[serde(default)]
    p75: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CalibrationReport {
    #[serde(default)]
    instrument_summary: HashMap<String, InstrumentSummary>,
}

/// Per-instrument slippage, pre-computed offline. Missing report or missing
/// instrument falls back to a fixed constant.
#[derive(Debug, Clone, Default)]
pub struct SlippageModel {
    p75_bps: HashMap<String, f64>,
}

impl SlippageModel {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let p75_bps = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<CalibrationReport>(&raw).ok())
            .map(|report| {
                report
                    .instrument_summary
                    .into_iter()
                    .filter_map(|(k, v)| v.p75.map(|p| (k, p)))
                    .collect()
            })
            .unwrap_or_default();
        Self { p75_bps }
    }

    pub fn bps_for(&self, instrument: &str) -> f64 {
        self.p75_bps
            .get(instrument)
            .copied()
            .unwrap_or(FALLBACK_SLIPPAGE_BPS)
    }
}

fn is_hash_id(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Structural well-formedness of an engine-produced intent. A failure here is
/// a bypass attempt or a programming error, never market data.
fn validate_intent(intent: &OrderIntent) -> Result<()> {
    if !is_hash_id(&intent.intent_id) || !is_hash_id(&intent.signal_id) {
        bail!("malformed intent: ids are not content hashes");
    }
    if intent.instrument.is_empty() || intent.event_ts.is_empty() {
        bail!("malformed intent: missing instrument or timestamp");
    }
    if !intent.entry_px.is_finite() || intent.entry_px <= 0.0 {
        bail!("malformed intent: bad reference price {}", intent.entry_px);
    }
    if !intent.qty.is_finite() || intent.qty <= 0.0 {
        bail!("malformed intent: bad qty {}", intent.qty);
    }
    match intent.kind {
        crate::events::IntentKind::Entry => {
            if intent.position_id.is_some() {
                bail!("malformed intent: entry carries a position_id");
            }
        }
        crate::events::IntentKind::Exit => {
            if intent.position_id.as_deref().map_or(true, |p| !is_hash_id(p)) {
                bail!("malformed intent: exit without a valid position_id");
            }
        }
    }
    Ok(())
}

pub struct PaperExecution {
    storage: Rc<dyn Storage>,
    slippage: SlippageModel,
    fee_bps: f64,
}

impl PaperExecution {
    pub fn new(storage: Rc<dyn Storage>, slippage: SlippageModel) -> Self {
        Self {
            storage,
            slippage,
            fee_bps: FEE_BPS,
        }
    }

    /// Simulate and persist one fill. Deterministic for a given intent;
    /// idempotent under re-delivery.
    pub fn place_order(&self, intent: &OrderIntent) -> Result<(OrderResult, Fill)> {
        validate_intent(intent)?;

        let slippage_bps = self.slippage.bps_for(&intent.instrument);
        let bps = (slippage_bps + self.fee_bps) / 10_000.0;
        // cost always lands on the taker side
        let fill_px = match intent.side {
            Side::Buy => intent.entry_px * (1.0 + bps),
            Side::Sell => intent.entry_px * (1.0 - bps),
        };

        let order_id = det_id(&["order", &intent.intent_id]);
        let fill_id = det_id(&["fill", &order_id]);

        self.storage.upsert_order(
            &order_id,
            &intent.signal_id,
            "filled",
            &intent.event_ts,
            &intent.event_ts,
        )?;
        self.storage.upsert_fill(
            &fill_id,
            &order_id,
            &intent.event_ts,
            fill_px,
            intent.qty,
            intent.entry_px,
            slippage_bps,
        )?;

        let result = OrderResult {
            order_id: order_id.clone(),
            status: "filled",
        };
        let fill = Fill {
            fill_id,
            order_id,
            fill_px,
            fill_qty: intent.qty,
            slippage_bps,
        };
        Ok((result, fill))
    }
}
