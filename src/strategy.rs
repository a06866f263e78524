//! Strategy capability and the default breakout implementation.

use std::collections::{HashMap, VecDeque};

use crate::events::{det_id, CandleEvent, Side, Signal};

/// Signal generator seam. The engine only ever sees this trait.
pub trait Strategy {
    fn name(&self) -> &'static str;
    fn generate(&mut self, event: &CandleEvent) -> Option<Signal>;
}

/// Long-only breakout over the previous completed bars.
///
/// Keeps a rolling candle buffer per instrument; after warmup, a close above
/// the highest high of the prior `lookback` bars (excluding the current one)
/// produces a signal. Signal ids are content hashes, so replays regenerate
/// identical ids.
pub struct BreakoutStrategy {
    buffers: HashMap<String, VecDeque<CandleEvent>>,
    capacity: usize,
    warmup: usize,
}

impl BreakoutStrategy {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            capacity: 40,
            warmup: 25,
        }
    }
}

impl Default for BreakoutStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &'static str {
        "breakout_v2"
    }

    fn generate(&mut self, event: &CandleEvent) -> Option<Signal> {
        let buf = self.buffers.entry(event.instrument.clone()).or_default();
        buf.push_back(event.clone());
        if buf.len() > self.capacity {
            buf.pop_front();
        }
        if buf.len() < self.warmup {
            return None;
        }

        // highest high of the 23 bars preceding the current one
        let n = buf.len();
        let prior_high = buf
            .iter()
            .skip(n.saturating_sub(24))
            .take(23)
            .map(|c| c.high)
            .fold(f64::MIN, f64::max);

        if event.close > prior_high {
            let ts = event.timestamp.to_rfc3339();
            let signal_id = det_id(&[
                &event.instrument,
                &event.timeframe,
                &ts,
                &event.sequence_id.to_string(),
                "long",
            ]);
            return Some(Signal {
                signal_id,
                instrument: event.instrument.clone(),
                ts,
                side: Side::Buy,
                entry_px: event.close,
                stop_px: event.close * 0.99,
                target_r: 2.5,
                event_sequence_id: event.sequence_id,
            });
        }
        None
    }
}
