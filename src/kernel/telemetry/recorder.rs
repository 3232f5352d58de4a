use std::collections::VecDeque;

use super::event::TelemetryEvent;
use super::metrics::{compute_snapshot, TelemetrySnapshot, Totals};

// Roughly an hour of 100 ms ticks plus headroom for the sparser events.
const MAX_EVENTS: usize = 40_000;

#[derive(Debug)]
pub struct TelemetryRecorder {
    buffer: VecDeque<TelemetryEvent>,
    totals: Totals,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            totals: Totals::default(),
        }
    }

    pub fn record(&mut self, event: TelemetryEvent) {
        self.totals.apply(&event);
        if self.buffer.len() >= MAX_EVENTS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    /// Totals since creation or the last `clear`, including evicted events.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.totals.snapshot()
    }

    /// Summary of the buffered events only.
    pub fn recent_snapshot(&self) -> TelemetrySnapshot {
        compute_snapshot(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.totals = Totals::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::telemetry::event::CloseKind;

    #[test]
    fn snapshot_summarises_levels_and_clips() {
        let mut rec = TelemetryRecorder::new();
        rec.record(TelemetryEvent::Tick { level: 40 });
        rec.record(TelemetryEvent::Tick { level: 80 });
        rec.record(TelemetryEvent::Detection { level: 80, threshold: 60 });
        rec.record(TelemetryEvent::ClipFinalized { bytes: 10, chunks: 2, reason: CloseKind::Stopped });

        let snap = rec.snapshot();
        assert_eq!(snap.level_stats.ticks, 2);
        assert_eq!(snap.level_stats.peak_level, 80);
        assert_eq!(snap.level_stats.avg_level, 60.0);
        assert_eq!(snap.level_stats.detections, 1);
        assert_eq!(snap.capture_stats.clips, 1);
        assert_eq!(snap.capture_stats.clips_on_stop, 1);
        assert_eq!(snap.capture_stats.captured_bytes, 10);
    }

    #[test]
    fn buffer_is_bounded() {
        let mut rec = TelemetryRecorder::new();
        for _ in 0..(MAX_EVENTS + 5) {
            rec.record(TelemetryEvent::PreRollEvicted);
        }
        assert_eq!(rec.len(), MAX_EVENTS);
    }

    #[test]
    fn totals_outlive_evicted_events() {
        let mut rec = TelemetryRecorder::new();
        rec.record(TelemetryEvent::Tick { level: 110 });
        rec.record(TelemetryEvent::Detection { level: 110, threshold: 60 });
        rec.record(TelemetryEvent::ClipFinalized { bytes: 64, chunks: 3, reason: CloseKind::WindowElapsed });
        for _ in 0..(MAX_EVENTS + 100) {
            rec.record(TelemetryEvent::Tick { level: 30 });
        }

        let snap = rec.snapshot();
        assert_eq!(snap.level_stats.ticks, MAX_EVENTS as u64 + 101);
        assert_eq!(snap.level_stats.peak_level, 110);
        assert_eq!(snap.level_stats.detections, 1);
        assert_eq!(snap.capture_stats.clips, 1);
        assert_eq!(snap.capture_stats.captured_bytes, 64);

        let recent = rec.recent_snapshot();
        assert_eq!(recent.level_stats.ticks, MAX_EVENTS as u64);
        assert_eq!(recent.level_stats.detections, 0);
    }

    #[test]
    fn clear_resets_totals() {
        let mut rec = TelemetryRecorder::new();
        rec.record(TelemetryEvent::Tick { level: 50 });
        rec.clear();
        assert_eq!(rec.snapshot(), TelemetrySnapshot::default());
    }
}
