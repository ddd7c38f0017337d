//! Shared per-room temperature cache.
//!
//! Single write-through store consulted by the Energy brain's ventilation
//! detector and by the Health brain. Contract: readers compute their
//! gradient against the cached sample first, then overwrite the entry with
//! the latest reading, so consecutive commands always see the previous
//! observation exactly once.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempSample {
    /// Unix timestamp, seconds.
    pub ts: f64,
    /// Temperature, °C.
    pub value: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomTemperatureCache {
    entries: HashMap<String, TempSample>,
}

impl RoomTemperatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room: &str) -> Option<TempSample> {
        self.entries.get(room).copied()
    }

    pub fn record(&mut self, room: &str, ts: f64, value: f64) {
        self.entries
            .insert(room.to_string(), TempSample { ts, value });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_overwrites_previous_sample() {
        let mut cache = RoomTemperatureCache::new();
        cache.record("kitchen", 100.0, 22.0);
        cache.record("kitchen", 700.0, 20.5);

        let sample = cache.get("kitchen").unwrap();
        assert_eq!(sample.ts, 700.0);
        assert_eq!(sample.value, 20.5);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("bath").is_none());
    }
}
