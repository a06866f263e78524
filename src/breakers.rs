//! Circuit breakers: a pure mapping from a runtime health snapshot to zero or
//! more advisory trigger events.
//!
//! The evaluator never mutates anything and never applies an action; deciding
//! what to do with a trigger (usually forcing safe mode) belongs to the
//! surrounding loop.

/// Point-in-time health readings gathered by the runtime loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeSnapshot {
    pub stale_seconds: f64,
    pub latency_p95_ms: f64,
    pub spread_bps: f64,
    pub daily_median_spread_bps: f64,
    pub spread_shock_minutes: u32,
    pub reject_count_10m: u32,
    pub fill_mismatch_polls: u32,
    pub realized_r_day: f64,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub data_stale_seconds: f64,
    pub latency_p95_ms: f64,
    pub spread_shock_mult: f64,
    pub spread_shock_minutes: u32,
    pub reject_streak_10m: u32,
    pub fill_mismatch_polls: u32,
    pub daily_loss_floor_r: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            data_stale_seconds: 3.0,
            latency_p95_ms: 1000.0,
            spread_shock_mult: 2.0,
            spread_shock_minutes: 3,
            reject_streak_10m: 5,
            fill_mismatch_polls: 2,
            daily_loss_floor_r: -3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub trigger: &'static str,
    pub threshold: String,
    pub action: &'static str,
}

pub fn evaluate(snapshot: &RuntimeSnapshot, cfg: &BreakerConfig) -> Vec<TriggerEvent> {
    let mut events = Vec::new();

    if snapshot.stale_seconds > cfg.data_stale_seconds {
        events.push(TriggerEvent {
            trigger: "data_stale",
            threshold: format!(">{}s", cfg.data_stale_seconds),
            action: "SAFE_BLOCK_NEW_ENTRIES",
        });
    }

    if snapshot.latency_p95_ms > cfg.latency_p95_ms {
        events.push(TriggerEvent {
            trigger: "latency_spike",
            threshold: format!("p95>{}ms(5m)", cfg.latency_p95_ms),
            action: "SAFE_AND_ALERT",
        });
    }

    if snapshot.daily_median_spread_bps > 0.0
        && snapshot.spread_bps > cfg.spread_shock_mult * snapshot.daily_median_spread_bps
        && snapshot.spread_shock_minutes >= cfg.spread_shock_minutes
    {
        events.push(TriggerEvent {
            trigger: "spread_shock",
            threshold: format!(
                "spread>{}x median for >={}m",
                cfg.spread_shock_mult, cfg.spread_shock_minutes
            ),
            action: "VETO_ENTRIES_CANCEL_RESTING",
        });
    }

    if snapshot.reject_count_10m >= cfg.reject_streak_10m {
        events.push(TriggerEvent {
            trigger: "reject_streak",
            threshold: format!(">={} rejects in 10m", cfg.reject_streak_10m),
            action: "SAFE_STOP_SENDING",
        });
    }

    if snapshot.fill_mismatch_polls >= cfg.fill_mismatch_polls {
        events.push(TriggerEvent {
            trigger: "fill_mismatch",
            threshold: format!("mismatch >={} polls", cfg.fill_mismatch_polls),
            action: "SAFE_RECONCILE_OPTIONAL_FLATTEN",
        });
    }

    if snapshot.realized_r_day <= cfg.daily_loss_floor_r {
        events.push(TriggerEvent {
            trigger: "daily_loss_cap",
            threshold: format!("realized_R_day<={}", cfg.daily_loss_floor_r),
            action: "STOP_UNTIL_NEXT_UTC_DAY",
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_snapshot_triggers_nothing() {
        let snap = RuntimeSnapshot {
            stale_seconds: 1.0,
            latency_p95_ms: 200.0,
            spread_bps: 8.0,
            daily_median_spread_bps: 7.0,
            ..Default::default()
        };
        assert!(evaluate(&snap, &BreakerConfig::default()).is_empty());
    }

    #[test]
    fn stale_data_blocks_new_entries() {
        let snap = RuntimeSnapshot {
            stale_seconds: 4.0,
            ..Default::default()
        };
        let events = evaluate(&snap, &BreakerConfig::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trigger, "data_stale");
        assert_eq!(events[0].action, "SAFE_BLOCK_NEW_ENTRIES");
    }

    #[test]
    fn spread_shock_requires_sustained_minutes() {
        let cfg = BreakerConfig::default();
        let mut snap = RuntimeSnapshot {
            spread_bps: 25.0,
            daily_median_spread_bps: 8.0,
            spread_shock_minutes: 2,
            ..Default::default()
        };
        assert!(evaluate(&snap, &cfg).is_empty());
        snap.spread_shock_minutes = 3;
        assert_eq!(evaluate(&snap, &cfg)[0].trigger, "spread_shock");
    }

    #[test]
    fn multiple_rules_fire_in_one_call() {
        let snap = RuntimeSnapshot {
            stale_seconds: 4.0,
            latency_p95_ms: 1200.0,
            spread_bps: 25.0,
            daily_median_spread_bps: 8.0,
            spread_shock_minutes: 5,
            reject_count_10m: 0,
            fill_mismatch_polls: 0,
            realized_r_day: -1.0,
        };
        let events = evaluate(&snap, &BreakerConfig::default());
        let triggers: Vec<&str> = events.iter().map(|e| e.trigger).collect();
        assert_eq!(triggers, vec!["data_stale", "latency_spike", "spread_shock"]);
    }

    #[test]
    fn daily_loss_floor_stops_until_next_day() {
        let snap = RuntimeSnapshot {
            realized_r_day: -3.0,
            ..Default::default()
        };
        let events = evaluate(&snap, &BreakerConfig::default());
        assert_eq!(events[0].trigger, "daily_loss_cap");
        assert_eq!(events[0].action, "STOP_UNTIL_NEXT_UTC_DAY");
    }

    #[test]
    fn thresholds_are_configurable() {
        let cfg = BreakerConfig {
            reject_streak_10m: 2,
            fill_mismatch_polls: 1,
            ..Default::default()
        };
        let snap = RuntimeSnapshot {
            reject_count_10m: 2,
            fill_mismatch_polls: 1,
            ..Default::default()
        };
        let triggers: Vec<&str> = evaluate(&snap, &cfg).iter().map(|e| e.trigger).collect();
        assert_eq!(triggers, vec!["reject_streak", "fill_mismatch"]);
    }
}
