use serde::{Deserialize, Serialize};

use super::time::Timestamp;

pub const DEFAULT_DEBOUNCE_MS: u64 = 1500;

/// A confirmed threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub value: u32,
    pub threshold: u32,
    pub at: Timestamp,
}

/// Rate limiter over the loudness stream.
///
/// There is no hysteresis band: a level at or above the threshold emits an
/// event unless the previous one is within the debounce window. Dropping
/// below the threshold simply emits nothing.
#[derive(Debug, Clone)]
pub struct DetectionTracker {
    debounce_ms: u64,
    last_detected_at: Option<Timestamp>,
}

impl Default for DetectionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}

impl DetectionTracker {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            last_detected_at: None,
        }
    }

    pub fn on_tick(&mut self, loudness: u32, threshold: u32, now: Timestamp) -> Option<DetectionEvent> {
        if loudness < threshold {
            return None;
        }

        if let Some(last) = self.last_detected_at {
            if now.millis_since(last) <= self.debounce_ms as i64 {
                return None;
            }
        }

        self.last_detected_at = Some(now);
        Some(DetectionEvent {
            value: loudness,
            threshold,
            at: now,
        })
    }

    pub fn last_detected_at(&self) -> Option<Timestamp> {
        self.last_detected_at
    }

    pub fn reset(&mut self) {
        self.last_detected_at = None;
    }
}
