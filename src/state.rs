//! Runtime configuration and the persisted runtime-state artifact.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::breakers::BreakerConfig;

pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub universe: Vec<String>,
    pub timeframe: String,
    pub data_dir: String,
    pub poll_seconds: u64,
    pub equity: f64,
    pub risk_fraction: f64,
    pub max_daily_loss_r: f64,
    pub max_open_exposure_r: f64,
    pub exit_after_candles: u64,
    pub required_regime: String,
    pub regime_labels_path: String,
    pub gate_verdict_path: String,
    pub calibration_path: String,
    pub sqlite_path: String,
    pub state_path: String,
    pub metrics_path: String,
    pub log_path: String,
    pub lock_path: String,
    pub reconcile_secs: u64,
    pub breakers: BreakerConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            universe: env_str("UNIVERSE", "BTCUSD,ETHUSD,SOLUSD")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            timeframe: env_str("TIMEFRAME", "5m"),
            data_dir: env_str("DATA_DIR", "./data/feed"),
            poll_seconds: env_u64("POLL_SECS", 300),
            equity: env_f64("EQUITY", 1000.0),
            risk_fraction: env_f64("RISK_FRACTION", 0.005),
            max_daily_loss_r: env_f64("MAX_DAILY_LOSS_R", -3.0),
            max_open_exposure_r: env_f64("MAX_OPEN_EXPOSURE_R", 2.0),
            exit_after_candles: env_u64("EXIT_AFTER_CANDLES", 12),
            required_regime: env_str("REQUIRED_REGIME", "TREND_NORMAL"),
            regime_labels_path: env_str(
                "REGIME_LABELS_PATH",
                "./data/reports/regime_labels_latest.json",
            ),
            gate_verdict_path: env_str(
                "GATE_VERDICT_PATH",
                "./data/reports/runtime_gate_latest.json",
            ),
            calibration_path: env_str(
                "CALIBRATION_PATH",
                "./data/reports/calibration_report_latest.json",
            ),
            sqlite_path: env_str("SQLITE_PATH", "./paper.sqlite"),
            state_path: env_str("STATE_PATH", "./data/reports/runtime_state_latest.json"),
            metrics_path: env_str(
                "METRICS_PATH",
                "./data/reports/runtime_metrics_latest.json",
            ),
            log_path: env_str("LOG_PATH", "./logs/paper_runtime.log"),
            lock_path: env_str("LOCK_PATH", "./runtime.lock"),
            reconcile_secs: env_u64("RECONCILE_SECS", 30),
            breakers: BreakerConfig {
                data_stale_seconds: env_f64("DATA_STALE_SECS", 3.0),
                latency_p95_ms: env_f64("LATENCY_P95_MS", 1000.0),
                spread_shock_mult: env_f64("SPREAD_SHOCK_MULT", 2.0),
                spread_shock_minutes: env_u32("SPREAD_SHOCK_MINUTES", 3),
                reject_streak_10m: env_u32("REJECT_STREAK_10M", 5),
                fill_mismatch_polls: env_u32("FILL_MISMATCH_POLLS", 2),
                daily_loss_floor_r: env_f64("DAILY_LOSS_FLOOR_R", -3.0),
            },
        }
    }
}

/// Display/recovery hint rewritten every cycle. Never authoritative: restart
/// state comes from the durable store, this file only carries the safe-mode
/// hint and what dashboards read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeStateFile {
    pub safe_mode: bool,
    pub open_exposure_r: f64,
    pub open_positions: usize,
    pub last_reconcile_ts: Option<String>,
}

impl RuntimeStateFile {
    pub fn load(path: impl AsRef<Path>) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("runtime state write: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_file_roundtrips_and_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime_state.json");

        let missing = RuntimeStateFile::load(&path);
        assert!(!missing.safe_mode);

        let state = RuntimeStateFile {
            safe_mode: true,
            open_exposure_r: 1.0,
            open_positions: 1,
            last_reconcile_ts: Some("2026-01-01T00:00:00+00:00".to_string()),
        };
        state.save(&path).unwrap();
        let loaded = RuntimeStateFile::load(&path);
        assert!(loaded.safe_mode);
        assert_eq!(loaded.open_positions, 1);
    }
}
