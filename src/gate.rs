//! External policy gate: regime classification + promotion verdict.
//!
//! The gate consumes two artifacts computed outside this runtime: a regime
//! label file (latest classification per bar) and a promotion verdict file.
//! Both must agree before a signal may proceed. The engine depends only on
//! the `Gate` trait, never on where the artifacts come from.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::events::Signal;

pub const REGIME_BLOCK: &str = "regime_block";
pub const PROMOTION_REJECT: &str = "promotion_reject";
pub const GATE_MISSING: &str = "gate_missing";
pub const PROMOTE: &str = "PROMOTE";

#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub allowed: bool,
    pub reason: Option<&'static str>,
    pub meta: Value,
}

impl GateVerdict {
    fn block(reason: &'static str, meta: Value) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            meta,
        }
    }
}

pub trait Gate {
    fn allow(&self, signal: &Signal) -> Result<GateVerdict>;
}

#[derive(Debug, Deserialize)]
struct RegimeLabel {
    #[serde(default)]
    regime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegimeArtifact {
    #[serde(default)]
    labels: Vec<RegimeLabel>,
}

#[derive(Debug, Deserialize)]
struct GateArtifact {
    #[serde(default)]
    promotion_status: Option<String>,
    #[serde(default)]
    disable_status: Option<String>,
    #[serde(default)]
    rolling_expectancy: Option<Value>,
}

/// Gate backed by JSON artifacts on disk. Missing files degrade to the
/// corresponding block reason; unparsable files are real errors and surface
/// to the cycle boundary.
pub struct FileGate {
    regime_path: PathBuf,
    gate_path: PathBuf,
    required_regime: String,
}

impl FileGate {
    pub fn new(
        regime_path: impl Into<PathBuf>,
        gate_path: impl Into<PathBuf>,
        required_regime: &str,
    ) -> Self {
        Self {
            regime_path: regime_path.into(),
            gate_path: gate_path.into(),
            required_regime: required_regime.to_string(),
        }
    }

    fn current_regime(&self) -> Result<String> {
        if !self.regime_path.exists() {
            return Ok("UNKNOWN".to_string());
        }
        let raw = std::fs::read_to_string(&self.regime_path)
            .with_context(|| format!("regime artifact read: {}", self.regime_path.display()))?;
        let artifact: RegimeArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("regime artifact parse: {}", self.regime_path.display()))?;
        Ok(artifact
            .labels
            .last()
            .and_then(|l| l.regime.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string()))
    }
}

impl Gate for FileGate {
    fn allow(&self, _signal: &Signal) -> Result<GateVerdict> {
        let regime = self.current_regime()?;
        if regime != self.required_regime {
            return Ok(GateVerdict::block(
                REGIME_BLOCK,
                json!({ "regime": regime, "required_regime": &self.required_regime }),
            ));
        }

        if !self.gate_path.exists() {
            return Ok(GateVerdict::block(
                GATE_MISSING,
                json!({ "regime": regime }),
            ));
        }
        let raw = std::fs::read_to_string(&self.gate_path)
            .with_context(|| format!("gate artifact read: {}", self.gate_path.display()))?;
        let artifact: GateArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("gate artifact parse: {}", self.gate_path.display()))?;

        let expectancy = artifact
            .rolling_expectancy
            .as_ref()
            .and_then(|e| e.get("latest").cloned())
            .unwrap_or(Value::Null);

        if artifact.promotion_status.as_deref() != Some(PROMOTE) {
            return Ok(GateVerdict::block(
                PROMOTION_REJECT,
                json!({
                    "promotion_status": artifact.promotion_status,
                    "disable_status": artifact.disable_status,
                    "rolling_expectancy": expectancy,
                }),
            ));
        }

        Ok(GateVerdict {
            allowed: true,
            reason: None,
            meta: json!({
                "promotion_status": artifact.promotion_status,
                "disable_status": artifact.disable_status,
                "rolling_expectancy": expectancy,
                "regime": regime,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Side;

    fn signal() -> Signal {
        Signal {
            signal_id: "s1".to_string(),
            instrument: "BTCUSD".to_string(),
            ts: "2026-01-01T00:00:00+00:00".to_string(),
            side: Side::Buy,
            entry_px: 100.0,
            stop_px: 99.0,
            target_r: 2.5,
            event_sequence_id: 1,
        }
    }

    fn write(path: &std::path::Path, contents: &str) {
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn wrong_regime_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let regime = dir.path().join("regime.json");
        let gate = dir.path().join("gate.json");
        write(&regime, r#"{"labels":[{"regime":"VOL_SHOCK"}]}"#);
        write(&gate, r#"{"promotion_status":"PROMOTE"}"#);

        let g = FileGate::new(&regime, &gate, "TREND_NORMAL");
        let v = g.allow(&signal()).unwrap();
        assert!(!v.allowed);
        assert_eq!(v.reason, Some(REGIME_BLOCK));
        assert_eq!(v.meta["regime"], "VOL_SHOCK");
    }

    #[test]
    fn missing_verdict_artifact_blocks_as_gate_missing() {
        let dir = tempfile::tempdir().unwrap();
        let regime = dir.path().join("regime.json");
        write(&regime, r#"{"labels":[{"regime":"TREND_NORMAL"}]}"#);

        let g = FileGate::new(&regime, dir.path().join("absent.json"), "TREND_NORMAL");
        let v = g.allow(&signal()).unwrap();
        assert_eq!(v.reason, Some(GATE_MISSING));
    }

    #[test]
    fn non_promote_verdict_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let regime = dir.path().join("regime.json");
        let gate = dir.path().join("gate.json");
        write(&regime, r#"{"labels":[{"regime":"TREND_NORMAL"}]}"#);
        write(
            &gate,
            r#"{"promotion_status":"REJECT","rolling_expectancy":{"latest":0.12}}"#,
        );

        let g = FileGate::new(&regime, &gate, "TREND_NORMAL");
        let v = g.allow(&signal()).unwrap();
        assert_eq!(v.reason, Some(PROMOTION_REJECT));
        assert_eq!(v.meta["rolling_expectancy"], 0.12);
    }

    #[test]
    fn regime_and_promote_both_required_to_pass() {
        let dir = tempfile::tempdir().unwrap();
        let regime = dir.path().join("regime.json");
        let gate = dir.path().join("gate.json");
        write(&regime, r#"{"labels":[{"regime":"TREND_NORMAL"}]}"#);
        write(&gate, r#"{"promotion_status":"PROMOTE","disable_status":"NONE"}"#);

        let g = FileGate::new(&regime, &gate, "TREND_NORMAL");
        let v = g.allow(&signal()).unwrap();
        assert!(v.allowed);
        assert!(v.reason.is_none());
        assert_eq!(v.meta["regime"], "TREND_NORMAL");
    }

    #[test]
    fn missing_regime_artifact_reads_as_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let g = FileGate::new(
            dir.path().join("no_regime.json"),
            dir.path().join("no_gate.json"),
            "TREND_NORMAL",
        );
        let v = g.allow(&signal()).unwrap();
        assert_eq!(v.reason, Some(REGIME_BLOCK));
        assert_eq!(v.meta["regime"], "UNKNOWN");
    }
}
