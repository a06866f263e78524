//! Ordered event queue with per-key sequence assignment.
//!
//! The bus is constructed by the runtime loop and handed to the market stream
//! by reference; nothing here is a process global.

use std::collections::{HashMap, VecDeque};

use crate::events::CandleEvent;

#[derive(Default)]
pub struct EventBus {
    queue: VecDeque<CandleEvent>,
    seq: HashMap<(String, String), u64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number for (instrument, timeframe), starting at 1.
    pub fn next_sequence(&mut self, instrument: &str, timeframe: &str) -> u64 {
        let counter = self
            .seq
            .entry((instrument.to_string(), timeframe.to_string()))
            .or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn emit(&mut self, event: CandleEvent) {
        self.queue.push_back(event);
    }

    pub fn next(&mut self) -> Option<CandleEvent> {
        self.queue.pop_front()
    }

    pub fn depth(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(instrument: &str, seq: u64) -> CandleEvent {
        CandleEvent {
            instrument: instrument.to_string(),
            timeframe: "5m".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            sequence_id: seq,
        }
    }

    #[test]
    fn sequences_are_scoped_per_key() {
        let mut bus = EventBus::new();
        assert_eq!(bus.next_sequence("BTCUSD", "5m"), 1);
        assert_eq!(bus.next_sequence("BTCUSD", "5m"), 2);
        assert_eq!(bus.next_sequence("ETHUSD", "5m"), 1);
        assert_eq!(bus.next_sequence("BTCUSD", "1h"), 1);
        assert_eq!(bus.next_sequence("BTCUSD", "5m"), 3);
    }

    #[test]
    fn fifo_order_and_empty_sentinel() {
        let mut bus = EventBus::new();
        assert!(bus.next().is_none());
        bus.emit(candle("BTCUSD", 1));
        bus.emit(candle("ETHUSD", 1));
        assert_eq!(bus.depth(), 2);
        assert_eq!(bus.next().unwrap().instrument, "BTCUSD");
        assert_eq!(bus.next().unwrap().instrument, "ETHUSD");
        assert!(bus.next().is_none());
    }
}
