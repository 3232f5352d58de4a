use tracing::{debug, info, warn};

use super::detection::DetectionTracker;
use super::encoding::Negotiated;
use super::event::{Event, LogKind, LogRecord, MarkerKind, SessionMarker};
use super::level::{LevelMeter, LoudnessReading};
use super::segment::{CapturePhase, CaptureSegmenter, CloseReason, FinalizedClip};
use super::telemetry::event::SessionEdge;
use super::telemetry::{TelemetryEvent, TelemetryRecorder};
use super::time::Timestamp;
use crate::config::MonitorConfig;
use crate::error::SessionError;

/// Work the driver must carry out after a step. The kernel itself never
/// touches storage or devices.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    Reading(LoudnessReading),
    AppendLog(LogRecord),
    PersistClip(FinalizedClip),
}

/// The monitoring kernel: meter, debounce and capture segmentation behind a
/// single synchronous step function.
pub struct Monitor {
    config: MonitorConfig,
    meter: LevelMeter,
    tracker: DetectionTracker,
    segmenter: CaptureSegmenter,
    threshold: u32,
    running: bool,
    pub telemetry: TelemetryRecorder,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            meter: LevelMeter::new(config.db_offset),
            tracker: DetectionTracker::new(config.debounce_ms),
            segmenter: CaptureSegmenter::new(config.capture_window_ms, config.pre_roll_chunks, None),
            threshold: config.threshold,
            running: false,
            telemetry: TelemetryRecorder::new(),
            config,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn capture_phase(&self) -> CapturePhase {
        self.segmenter.phase()
    }

    pub fn capture_enabled(&self) -> bool {
        self.segmenter.is_enabled()
    }

    /// Begin a session. `capture` is the outcome of encoding negotiation for
    /// this session; `Disabled` keeps detection and logging alive without clips.
    pub fn start(&mut self, at: Timestamp, capture: Negotiated) -> Result<Vec<SideEffect>, SessionError> {
        if self.running {
            return Err(SessionError::AlreadyRunning);
        }

        match capture {
            Negotiated::Preferred(ct) => info!("Capture encoding: {}", ct),
            Negotiated::Fallback(ct) => warn!("No preferred encoding supported, falling back to {}", ct),
            Negotiated::Disabled => warn!("No capture encoding available, clips disabled for this session"),
        }

        self.tracker.reset();
        self.segmenter = CaptureSegmenter::new(
            self.config.capture_window_ms,
            self.config.pre_roll_chunks,
            capture.content_type(),
        );
        self.running = true;
        self.telemetry.record(TelemetryEvent::Session(SessionEdge::Started));

        let marker = SessionMarker { kind: MarkerKind::Start, at };
        Ok(vec![SideEffect::AppendLog(self.marker_record(marker))])
    }

    /// End the session. An open capture is closed with what it has.
    pub fn stop(&mut self, at: Timestamp) -> Result<Vec<SideEffect>, SessionError> {
        if !self.running {
            return Err(SessionError::NotRunning);
        }

        let mut effects = Vec::new();
        if let Some(clip) = self.segmenter.force_finalize(at, CloseReason::Stopped) {
            self.record_clip(&clip);
            effects.push(SideEffect::PersistClip(clip));
        }
        self.segmenter.reset();
        self.running = false;
        self.telemetry.record(TelemetryEvent::Session(SessionEdge::Stopped));

        let marker = SessionMarker { kind: MarkerKind::Stop, at };
        effects.push(SideEffect::AppendLog(self.marker_record(marker)));
        Ok(effects)
    }

    /// One step of the kernel. Events are applied in arrival order, then the
    /// capture deadline is checked against `now`. Must not block.
    pub fn tick_step(&mut self, events: Vec<Event>, now: Timestamp) -> Vec<SideEffect> {
        let mut effects = Vec::new();

        for event in events {
            match event {
                Event::Threshold(t) => self.threshold = t,
                _ if !self.running => {}
                Event::Block(block) => {
                    let value = self.meter.estimate(&block);
                    let above_threshold = value >= self.threshold;
                    self.telemetry.record(TelemetryEvent::Tick { level: value });
                    effects.push(SideEffect::Reading(LoudnessReading { value, at: now, above_threshold }));

                    if let Some(detection) = self.tracker.on_tick(value, self.threshold, now) {
                        debug!("Detection: {} dB (threshold {})", detection.value, detection.threshold);
                        self.telemetry.record(TelemetryEvent::Detection {
                            level: detection.value,
                            threshold: detection.threshold,
                        });

                        let mut before = self.segmenter.phase();
                        if let Some(clip) = self.segmenter.on_detection(&detection) {
                            self.record_clip(&clip);
                            effects.push(SideEffect::PersistClip(clip));
                            before = CapturePhase::Idle;
                        }
                        match (before, self.segmenter.phase()) {
                            (CapturePhase::Idle, CapturePhase::Armed) => {
                                self.telemetry.record(TelemetryEvent::CaptureArmed)
                            }
                            (CapturePhase::Armed | CapturePhase::Extending, CapturePhase::Extending) => {
                                self.telemetry.record(TelemetryEvent::CaptureExtended)
                            }
                            _ => {}
                        }

                        effects.push(SideEffect::AppendLog(LogRecord {
                            kind: LogKind::Detection,
                            display: detection.value.to_string(),
                            threshold: detection.threshold,
                            at: detection.at,
                        }));
                    }
                }
                Event::Chunk(chunk) => {
                    let outcome = self.segmenter.on_chunk(chunk, now);
                    if outcome.evicted {
                        self.telemetry.record(TelemetryEvent::PreRollEvicted);
                    }
                    if let Some(clip) = outcome.finalized {
                        self.record_clip(&clip);
                        effects.push(SideEffect::PersistClip(clip));
                    }
                }
                Event::SourceEnded => {
                    if let Some(clip) = self.segmenter.force_finalize(now, CloseReason::SourceEnded) {
                        self.record_clip(&clip);
                        effects.push(SideEffect::PersistClip(clip));
                    }
                }
            }
        }

        if self.running {
            if let Some(clip) = self.segmenter.poll(now) {
                self.record_clip(&clip);
                effects.push(SideEffect::PersistClip(clip));
            }
        }

        effects
    }

    fn record_clip(&mut self, clip: &FinalizedClip) {
        self.telemetry.record(TelemetryEvent::ClipFinalized {
            bytes: clip.audio.len(),
            chunks: clip.pre_roll_chunks + clip.armed_chunks,
            reason: clip.reason.into(),
        });
    }

    fn marker_record(&self, marker: SessionMarker) -> LogRecord {
        let display = match marker.kind {
            MarkerKind::Start => format!("Monitoring started (gain {:.1})", self.config.gain),
            MarkerKind::Stop => "Monitoring stopped".to_string(),
        };
        LogRecord {
            kind: LogKind::Event,
            display,
            threshold: self.threshold,
            at: marker.at,
        }
    }
}
