use std::collections::VecDeque;

use super::event::{CloseKind, SessionEdge, TelemetryEvent};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub level_stats: LevelStats,
    pub capture_stats: CaptureStats,
    pub sessions_started: u64,
    pub sessions_stopped: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelStats {
    pub ticks: u64,
    pub peak_level: u32,
    pub avg_level: f64,
    pub detections: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureStats {
    pub armed: u64,
    pub extended: u64,
    pub clips: u64,
    pub clips_on_stop: u64,
    pub captured_bytes: u64,
    pub evicted_chunks: u64,
}

/// Running totals folded one event at a time, so a summary never depends on
/// how much of the event history is still buffered.
#[derive(Debug, Clone, Default)]
pub struct Totals {
    snap: TelemetrySnapshot,
    level_sum: u64,
}

impl Totals {
    pub fn apply(&mut self, event: &TelemetryEvent) {
        let snap = &mut self.snap;
        match event {
            TelemetryEvent::Tick { level } => {
                snap.level_stats.ticks += 1;
                self.level_sum += *level as u64;
                snap.level_stats.peak_level = snap.level_stats.peak_level.max(*level);
            }
            TelemetryEvent::Detection { .. } => snap.level_stats.detections += 1,
            TelemetryEvent::CaptureArmed => snap.capture_stats.armed += 1,
            TelemetryEvent::CaptureExtended => snap.capture_stats.extended += 1,
            TelemetryEvent::ClipFinalized { bytes, reason, .. } => {
                snap.capture_stats.clips += 1;
                snap.capture_stats.captured_bytes += *bytes as u64;
                if *reason != CloseKind::WindowElapsed {
                    snap.capture_stats.clips_on_stop += 1;
                }
            }
            TelemetryEvent::PreRollEvicted => snap.capture_stats.evicted_chunks += 1,
            TelemetryEvent::Session(SessionEdge::Started) => snap.sessions_started += 1,
            TelemetryEvent::Session(SessionEdge::Stopped) => snap.sessions_stopped += 1,
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let mut snap = self.snap.clone();
        if snap.level_stats.ticks > 0 {
            snap.level_stats.avg_level = self.level_sum as f64 / snap.level_stats.ticks as f64;
        }
        snap
    }
}

/// Summary of a window of events.
pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut totals = Totals::default();
    for event in events {
        totals.apply(event);
    }
    totals.snapshot()
}
