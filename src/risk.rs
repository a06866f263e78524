//! Risk capability: daily-loss circuit and deterministic position sizing.

use crate::events::Signal;

pub const DAILY_LOSS_CAP: &str = "daily_loss_cap";

/// Admission + sizing seam consumed by the engine. The realized-R counter is
/// the only state; everything else is a pure function of its inputs.
pub trait Risk {
    /// None means allowed; Some(reason) is a veto.
    fn allow(&self, signal: &Signal) -> Option<&'static str>;
    /// Returns (qty, risk_dollars).
    fn size(&self, signal: &Signal, equity: f64) -> (f64, f64);
    /// Record realized R for a closed trade. `day` is the UTC day number of
    /// the close; a new day resets the counter before accumulating.
    fn record_realized(&mut self, r: f64, day: u64);
    fn realized_r_day(&self) -> f64;
}

pub struct RiskEngine {
    risk_fraction: f64,
    max_daily_loss_r: f64,
    realized_r_day: f64,
    trade_day: u64,
}

impl RiskEngine {
    pub fn new(risk_fraction: f64, max_daily_loss_r: f64) -> Self {
        Self {
            risk_fraction,
            max_daily_loss_r,
            realized_r_day: 0.0,
            trade_day: 0,
        }
    }
}

impl Risk for RiskEngine {
    fn allow(&self, _signal: &Signal) -> Option<&'static str> {
        if self.realized_r_day <= self.max_daily_loss_r {
            return Some(DAILY_LOSS_CAP);
        }
        None
    }

    fn size(&self, signal: &Signal, equity: f64) -> (f64, f64) {
        let risk_d = equity * self.risk_fraction;
        let denom = (signal.entry_px - signal.stop_px).abs().max(1e-9);
        (risk_d / denom, risk_d)
    }

    fn record_realized(&mut self, r: f64, day: u64) {
        if self.trade_day != day {
            self.trade_day = day;
            self.realized_r_day = 0.0;
        }
        self.realized_r_day += r;
    }

    fn realized_r_day(&self) -> f64 {
        self.realized_r_day
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Side;

    fn signal(entry: f64, stop: f64) -> Signal {
        Signal {
            signal_id: "s1".to_string(),
            instrument: "BTCUSD".to_string(),
            ts: "2026-01-01T00:00:00+00:00".to_string(),
            side: Side::Buy,
            entry_px: entry,
            stop_px: stop,
            target_r: 2.5,
            event_sequence_id: 1,
        }
    }

    #[test]
    fn allows_until_daily_floor_then_fails_closed() {
        let mut risk = RiskEngine::new(0.005, -3.0);
        assert!(risk.allow(&signal(100.0, 99.0)).is_none());

        risk.record_realized(-1.0, 20_000);
        risk.record_realized(-2.0, 20_000);
        assert_eq!(risk.allow(&signal(100.0, 99.0)), Some(DAILY_LOSS_CAP));
    }

    #[test]
    fn counter_resets_on_new_utc_day() {
        let mut risk = RiskEngine::new(0.005, -3.0);
        risk.record_realized(-3.5, 20_000);
        assert!(risk.allow(&signal(100.0, 99.0)).is_some());

        risk.record_realized(0.5, 20_001);
        assert!((risk.realized_r_day() - 0.5).abs() < 1e-12);
        assert!(risk.allow(&signal(100.0, 99.0)).is_none());
    }

    #[test]
    fn sizing_is_deterministic_risk_fraction_over_stop_distance() {
        let risk = RiskEngine::new(0.005, -3.0);
        let (qty, risk_d) = risk.size(&signal(100.0, 99.0), 1000.0);
        assert!((risk_d - 5.0).abs() < 1e-12);
        assert!((qty - 5.0).abs() < 1e-12);
    }

    #[test]
    fn zero_stop_distance_is_clamped() {
        let risk = RiskEngine::new(0.005, -3.0);
        let (qty, _) = risk.size(&signal(100.0, 100.0), 1000.0);
        assert!(qty.is_finite());
    }
}
