//! Decision engine: the per-instrument position state machine and the entry
//! admission pipeline.
//!
//! ```text
//! CandleEvent ──► process_event ──► exit-due check ──► EXIT intent
//!                      │
//!                      └─► signal ► safe-mode ► dup-guard ► gate ► risk
//!                                 ► sizing ► exposure cap ► ENTRY intent
//! ```
//!
//! Position lifecycle per instrument: NONE → OPEN → EXIT_PENDING → CLOSED,
//! with CLOSED evicted from the live map. The engine owns all mutation of
//! EngineState; its only I/O is the governance storage and the logger.
//!
//! Exposure accounting reserves 1.0 R at decision time, which is what makes
//! the cap veto deterministic across back-to-back entries inside one drain.
//! `on_entry_filled` converts the reservation into a position without double
//! counting and `abort_entry` releases it when placement fails.

pub mod state;

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{bail, Result};
use serde_json::json;

use crate::events::{det_id, CandleEvent, EngineDecision, IntentKind, OrderIntent, Signal};
use crate::gate::Gate;
use crate::logging::{obj, v_num, v_str, Level, Logger};
use crate::risk::Risk;
use crate::storage::Storage;
use crate::strategy::Strategy;

pub use self::state::{EngineState, Position, PositionStatus};

pub const SAFE_MODE_ACTIVE: &str = "SAFE_MODE_ACTIVE";
pub const POSITION_ALREADY_OPEN: &str = "POSITION_ALREADY_OPEN";
pub const RISK_EXPOSURE_CAP: &str = "RISK_EXPOSURE_CAP";
pub const TIME_EXIT: &str = "time_exit";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub equity: f64,
    pub max_open_exposure_r: f64,
    pub exit_after_candles: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            equity: 1000.0,
            max_open_exposure_r: 2.0,
            exit_after_candles: 12,
        }
    }
}

pub struct Engine {
    strategy: Box<dyn Strategy>,
    risk: Box<dyn Risk>,
    gate: Box<dyn Gate>,
    storage: Rc<dyn Storage>,
    logger: Rc<dyn Logger>,
    equity: f64,
    pub state: EngineState,
}

impl Engine {
    pub fn new(
        strategy: Box<dyn Strategy>,
        risk: Box<dyn Risk>,
        gate: Box<dyn Gate>,
        storage: Rc<dyn Storage>,
        logger: Rc<dyn Logger>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            strategy,
            risk,
            gate,
            storage,
            logger,
            equity: cfg.equity,
            state: EngineState::new(cfg.max_open_exposure_r, cfg.exit_after_candles),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn realized_r_day(&self) -> f64 {
        self.risk.realized_r_day()
    }

    /// Startup-only: replace the live map and exposure wholesale from storage
    /// rows. Used by bootstrap, where storage is the source of truth.
    pub fn replace_positions(&mut self, positions: HashMap<String, Position>, exposure_r: f64) {
        self.state.positions = positions;
        self.state.open_exposure_r = exposure_r;
    }

    fn governance(
        &self,
        kind: &str,
        instrument: &str,
        action: &str,
        reason: &str,
        stats: &serde_json::Value,
    ) -> Result<()> {
        self.storage
            .insert_governance(kind, instrument, self.strategy.name(), action, reason, stats)
    }

    fn veto(
        &self,
        kind: &str,
        signal: Signal,
        intents: Vec<OrderIntent>,
        reason: &str,
        stats: &serde_json::Value,
    ) -> Result<EngineDecision> {
        self.governance(kind, &signal.instrument, "BLOCK", reason, stats)?;
        self.logger.log(
            Level::Warn,
            kind,
            obj(&[
                ("signal", v_str(&signal.signal_id)),
                ("reason", v_str(reason)),
            ]),
        );
        Ok(EngineDecision {
            signal: Some(signal),
            intents,
            veto_reason: Some(reason.to_string()),
        })
    }

    /// Consume one candle event. Evaluated in strict order; the exit-due
    /// check always runs, everything after it short-circuits on the first
    /// veto.
    pub fn process_event(&mut self, event: &CandleEvent) -> Result<EngineDecision> {
        let mut intents = Vec::new();

        // 1. Exit-due check, independent of safe mode and of the signal path.
        if let Some(intent) = self.exit_if_due(event) {
            self.governance(
                "TIME_EXIT_DUE",
                &intent.instrument,
                "EXIT",
                TIME_EXIT,
                &json!({
                    "position_id": &intent.position_id,
                    "sequence_id": event.sequence_id,
                }),
            )?;
            self.logger.log(
                Level::Info,
                "TIME_EXIT_DUE",
                obj(&[
                    ("instrument", v_str(&intent.instrument)),
                    ("seq_id", v_num(event.sequence_id as f64)),
                ]),
            );
            intents.push(intent);
        }

        // 2. Candidate signal.
        let signal = match self.strategy.generate(event) {
            Some(s) => s,
            None => {
                return Ok(EngineDecision {
                    signal: None,
                    intents,
                    veto_reason: None,
                })
            }
        };

        // 3. Safe-mode hard gate: no entry intent, exits still pass through.
        if self.state.safe_mode {
            let stats = json!({ "signal_id": &signal.signal_id });
            return self.veto("SAFE_BLOCK_ENTRY", signal, intents, SAFE_MODE_ACTIVE, &stats);
        }

        // 4. One live position per instrument.
        if self
            .state
            .positions
            .get(&event.instrument)
            .map_or(false, |p| p.status.is_live())
        {
            let stats = json!({ "signal_id": &signal.signal_id });
            return self.veto(
                "DUPLICATE_ENTRY",
                signal,
                intents,
                POSITION_ALREADY_OPEN,
                &stats,
            );
        }

        // 5. External policy gate.
        let verdict = self.gate.allow(&signal)?;
        if !verdict.allowed {
            let reason = verdict.reason.unwrap_or(crate::gate::GATE_MISSING);
            return self.veto("GATE_VETO", signal, intents, reason, &verdict.meta);
        }

        // 6. Risk circuit.
        if let Some(reason) = self.risk.allow(&signal) {
            return self.veto("RISK_BLOCK", signal, intents, reason, &verdict.meta);
        }

        // 7. Sizing. Exposure accounting stays uniform at 1.0 R per entry;
        // qty/risk_dollars ride on the intent only.
        let (qty, risk_dollars) = self.risk.size(&signal, self.equity);

        // 8. Aggregate exposure cap.
        let projected_r = self.state.open_exposure_r + 1.0;
        if projected_r > self.state.max_open_exposure_r {
            let stats = json!({
                "open_exposure_r": self.state.open_exposure_r,
                "attempt_r": 1.0,
                "max_open_exposure_r": self.state.max_open_exposure_r,
            });
            return self.veto("RISK_EXPOSURE_CAP", signal, intents, RISK_EXPOSURE_CAP, &stats);
        }

        // 9. Deterministic entry intent; reserve exposure at decision time.
        let ts = event.timestamp.to_rfc3339();
        let intent_id = det_id(&[
            &signal.signal_id,
            &event.instrument,
            &ts,
            &event.sequence_id.to_string(),
            "intent",
        ]);
        let intent = OrderIntent {
            intent_id: intent_id.clone(),
            signal_id: signal.signal_id.clone(),
            instrument: event.instrument.clone(),
            side: signal.side,
            entry_px: signal.entry_px,
            stop_px: signal.stop_px,
            qty,
            risk_dollars,
            event_ts: signal.ts.clone(),
            kind: IntentKind::Entry,
            position_id: None,
            exit_reason: None,
        };
        self.state.open_exposure_r = projected_r;

        self.governance(
            "ENTRY_INTENT",
            &signal.instrument,
            "ALLOW",
            "",
            &json!({
                "signal_id": &signal.signal_id,
                "intent_id": &intent_id,
                "open_exposure_r": self.state.open_exposure_r,
            }),
        )?;
        self.logger.log(
            Level::Info,
            "ENTRY_INTENT",
            obj(&[
                ("signal", v_str(&signal.signal_id)),
                ("intent", v_str(&intent_id)),
                ("qty", v_num(qty)),
            ]),
        );

        intents.push(intent);
        Ok(EngineDecision {
            signal: Some(signal),
            intents,
            veto_reason: None,
        })
    }

    /// OPEN → EXIT_PENDING when the position has aged past the candle
    /// threshold. Emits at most one EXIT intent; already-pending positions
    /// are left alone.
    fn exit_if_due(&mut self, event: &CandleEvent) -> Option<OrderIntent> {
        let exit_after = self.state.exit_after_candles;
        let pos = self.state.positions.get_mut(&event.instrument)?;
        if pos.status != PositionStatus::Open {
            return None;
        }
        if event.sequence_id.saturating_sub(pos.entry_sequence_id) < exit_after {
            return None;
        }
        pos.status = PositionStatus::ExitPending;

        let ts = event.timestamp.to_rfc3339();
        let intent_id = det_id(&[
            &pos.signal_id,
            &pos.instrument,
            &ts,
            &event.sequence_id.to_string(),
            "exit",
        ]);
        Some(OrderIntent {
            intent_id,
            signal_id: pos.signal_id.clone(),
            instrument: pos.instrument.clone(),
            side: pos.side.flipped(),
            entry_px: event.close,
            stop_px: pos.stop_price,
            qty: pos.qty,
            risk_dollars: 0.0,
            event_ts: ts,
            kind: IntentKind::Exit,
            position_id: Some(pos.position_id.clone()),
            exit_reason: Some(TIME_EXIT.to_string()),
        })
    }

    /// NONE → OPEN on a confirmed entry fill. The decision-time reservation
    /// already counted this entry, so exposure is not incremented again.
    pub fn on_entry_filled(
        &mut self,
        intent: &OrderIntent,
        fill_sequence_id: u64,
        fill_price: f64,
    ) -> Result<Position> {
        if intent.kind != IntentKind::Entry {
            bail!("on_entry_filled called with non-entry intent {}", intent.intent_id);
        }
        let position = Position {
            position_id: det_id(&["position", &intent.intent_id]),
            signal_id: intent.signal_id.clone(),
            instrument: intent.instrument.clone(),
            side: intent.side,
            entry_ts: intent.event_ts.clone(),
            entry_sequence_id: fill_sequence_id,
            entry_price: fill_price,
            risk_r: 1.0,
            qty: intent.qty,
            stop_price: intent.stop_px,
            take_price: None,
            status: PositionStatus::Open,
            exit_ts: None,
            exit_price: None,
            exit_reason: None,
        };
        self.state
            .positions
            .insert(intent.instrument.clone(), position.clone());

        self.governance(
            "ENTRY_FILLED",
            &intent.instrument,
            "ALLOW",
            "",
            &json!({
                "position_id": &position.position_id,
                "fill_px": fill_price,
                "open_exposure_r": self.state.open_exposure_r,
            }),
        )?;
        self.logger.log(
            Level::Info,
            "ENTRY_FILLED",
            obj(&[
                ("instrument", v_str(&intent.instrument)),
                ("position", v_str(&position.position_id)),
                ("fill_px", v_num(fill_price)),
            ]),
        );
        Ok(position)
    }

    /// Release the decision-time reservation after a failed placement. The
    /// vetoed-or-failed entry never becomes a position.
    pub fn abort_entry(&mut self, intent: &OrderIntent) -> Result<()> {
        if intent.kind != IntentKind::Entry {
            bail!("abort_entry called with non-entry intent {}", intent.intent_id);
        }
        self.state.open_exposure_r = (self.state.open_exposure_r - 1.0).max(0.0);
        self.governance(
            "ENTRY_ABORTED",
            &intent.instrument,
            "BLOCK",
            "placement_failed",
            &json!({
                "intent_id": &intent.intent_id,
                "open_exposure_r": self.state.open_exposure_r,
            }),
        )?;
        Ok(())
    }

    /// EXIT_PENDING → CLOSED on a confirmed exit fill. Decrements exposure by
    /// the position's risk_r (floored at zero), evicts the instrument from
    /// the live map, and feeds realized R into the daily risk counter.
    /// Returns the closed position and its realized R.
    pub fn on_exit_filled(
        &mut self,
        intent: &OrderIntent,
        fill_price: f64,
        exit_ts: &str,
        exit_reason: &str,
    ) -> Result<(Position, f64)> {
        if intent.kind != IntentKind::Exit {
            bail!("on_exit_filled called with non-exit intent {}", intent.intent_id);
        }
        let mut position = match self.state.positions.remove(&intent.instrument) {
            Some(p) => p,
            None => bail!("exit fill for unknown position on {}", intent.instrument),
        };
        if intent.position_id.as_deref() != Some(position.position_id.as_str()) {
            // put it back before failing; the map must stay consistent
            let id = position.position_id.clone();
            self.state.positions.insert(intent.instrument.clone(), position);
            bail!(
                "exit fill position mismatch on {}: intent {:?} vs live {}",
                intent.instrument,
                intent.position_id,
                id
            );
        }

        position.status = PositionStatus::Closed;
        position.exit_ts = Some(exit_ts.to_string());
        position.exit_price = Some(fill_price);
        position.exit_reason = Some(exit_reason.to_string());

        self.state.open_exposure_r = (self.state.open_exposure_r - position.risk_r).max(0.0);

        let realized_r = position.realized_r(fill_price);
        let day = chrono::DateTime::parse_from_rfc3339(exit_ts)
            .map(|t| (t.timestamp() / 86_400) as u64)
            .unwrap_or(0);
        self.risk.record_realized(realized_r, day);

        self.governance(
            "EXIT_FILLED",
            &intent.instrument,
            "EXIT",
            exit_reason,
            &json!({
                "position_id": &position.position_id,
                "fill_px": fill_price,
                "realized_r": realized_r,
                "open_exposure_r": self.state.open_exposure_r,
            }),
        )?;
        self.logger.log(
            Level::Info,
            "EXIT_FILLED",
            obj(&[
                ("instrument", v_str(&intent.instrument)),
                ("position", v_str(&position.position_id)),
                ("realized_r", v_num(realized_r)),
            ]),
        );
        Ok((position, realized_r))
    }
}
