//! Runtime counters persisted as a JSON artifact each cycle.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    pub signals_generated: u64,
    pub signals_vetoed: u64,
    pub orders_sent: u64,
    pub fills: u64,
    pub avg_latency_ms: f64,
    latency_samples: u64,
}

impl RuntimeMetrics {
    pub fn add_latency(&mut self, ms: f64) {
        self.latency_samples += 1;
        if self.latency_samples == 1 {
            self.avg_latency_ms = ms;
        } else {
            let n = self.latency_samples as f64;
            self.avg_latency_ms = (self.avg_latency_ms * (n - 1.0) + ms) / n;
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("metrics write: {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }
}
