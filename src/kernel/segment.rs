use std::collections::VecDeque;
use tracing::{debug, info};

use super::detection::DetectionEvent;
use super::encoding::ContentType;
use super::time::Timestamp;

pub const DEFAULT_CAPTURE_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_PRE_ROLL_CHUNKS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Armed,
    Extending,
}

/// Why a segment was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    WindowElapsed,
    Stopped,
    SourceEnded,
}

/// A completed capture ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedClip {
    pub audio: Vec<u8>,
    pub encoding: ContentType,
    pub armed_at: Timestamp,
    pub closed_at: Timestamp,
    /// Chunks carried over from the pre-roll buffer.
    pub pre_roll_chunks: usize,
    /// Chunks captured while armed.
    pub armed_chunks: usize,
    pub reason: CloseReason,
}

/// Result of feeding one raw chunk.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Set when the chunk arrived after the deadline and closed the segment first.
    pub finalized: Option<FinalizedClip>,
    /// A pre-roll chunk was dropped to make room.
    pub evicted: bool,
}

/// Decides when audio around a detection episode becomes a clip.
///
/// The close time slides: every detection while armed pushes `armed_until`
/// out by the capture window. Deadlines are data; the owner calls
/// [`CaptureSegmenter::poll`] from its own cadence.
#[derive(Debug)]
pub struct CaptureSegmenter {
    capture_window_ms: u64,
    pre_roll_cap: usize,
    encoding: Option<ContentType>,

    phase: CapturePhase,
    armed_at: Option<Timestamp>,
    armed_until: Option<Timestamp>,
    pre_roll: VecDeque<Vec<u8>>,
    lead_in: Vec<Vec<u8>>,
    pending: Vec<Vec<u8>>,
}

impl CaptureSegmenter {
    /// `encoding` of `None` disables capture: detections are ignored and
    /// chunks are discarded.
    pub fn new(capture_window_ms: u64, pre_roll_cap: usize, encoding: Option<ContentType>) -> Self {
        Self {
            capture_window_ms,
            pre_roll_cap,
            encoding,
            phase: CapturePhase::Idle,
            armed_at: None,
            armed_until: None,
            pre_roll: VecDeque::with_capacity(pre_roll_cap + 1),
            lead_in: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn armed_until(&self) -> Option<Timestamp> {
        self.armed_until
    }

    pub fn is_enabled(&self) -> bool {
        self.encoding.is_some()
    }

    pub fn pre_roll_len(&self) -> usize {
        self.pre_roll.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Arm or extend. A segment whose deadline has already passed is closed
    /// first and returned, so the detection opens a fresh one.
    pub fn on_detection(&mut self, event: &DetectionEvent) -> Option<FinalizedClip> {
        if self.encoding.is_none() {
            return None;
        }
        let closed = self.poll(event.at);
        let until = event.at.plus_millis(self.capture_window_ms);

        match self.phase {
            CapturePhase::Idle => {
                self.lead_in = self.pre_roll.drain(..).collect();
                self.armed_at = Some(event.at);
                self.armed_until = Some(until);
                self.phase = CapturePhase::Armed;
                info!(
                    "Capture armed at {} dB (pre-roll {} chunks)",
                    event.value,
                    self.lead_in.len()
                );
            }
            CapturePhase::Armed | CapturePhase::Extending => {
                // A late-arriving event never pulls the deadline earlier.
                if self.armed_until.map_or(true, |current| until > current) {
                    self.armed_until = Some(until);
                }
                self.phase = CapturePhase::Extending;
                debug!("Capture extended to {:?}", self.armed_until);
            }
        }
        closed
    }

    pub fn on_chunk(&mut self, chunk: Vec<u8>, now: Timestamp) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        if self.encoding.is_none() || chunk.is_empty() {
            return outcome;
        }

        outcome.finalized = self.poll(now);

        match self.phase {
            CapturePhase::Armed | CapturePhase::Extending => self.pending.push(chunk),
            CapturePhase::Idle => {
                self.pre_roll.push_back(chunk);
                if self.pre_roll.len() > self.pre_roll_cap {
                    self.pre_roll.pop_front();
                    outcome.evicted = true;
                }
            }
        }

        outcome
    }

    /// Close the segment if its deadline has passed.
    pub fn poll(&mut self, now: Timestamp) -> Option<FinalizedClip> {
        match self.armed_until {
            Some(until) if now >= until && self.phase != CapturePhase::Idle => {
                self.finalize(now, CloseReason::WindowElapsed)
            }
            _ => None,
        }
    }

    /// Close whatever is open, keeping partial audio.
    pub fn force_finalize(&mut self, now: Timestamp, reason: CloseReason) -> Option<FinalizedClip> {
        if self.phase == CapturePhase::Idle {
            return None;
        }
        self.finalize(now, reason)
    }

    /// Drop all buffered audio, including pre-roll. Used between sessions.
    pub fn reset(&mut self) {
        self.phase = CapturePhase::Idle;
        self.armed_at = None;
        self.armed_until = None;
        self.pre_roll.clear();
        self.lead_in.clear();
        self.pending.clear();
    }

    fn finalize(&mut self, now: Timestamp, reason: CloseReason) -> Option<FinalizedClip> {
        let lead_in = std::mem::take(&mut self.lead_in);
        let pending = std::mem::take(&mut self.pending);
        let armed_at = self.armed_at.take().unwrap_or(now);
        self.armed_until = None;
        self.phase = CapturePhase::Idle;

        let encoding = self.encoding?;
        if lead_in.is_empty() && pending.is_empty() {
            debug!("Capture closed with no audio ({:?})", reason);
            return None;
        }

        let pre_roll_chunks = lead_in.len();
        let armed_chunks = pending.len();
        let body: Vec<u8> = lead_in.into_iter().chain(pending).flatten().collect();
        let (audio, encoding) = encoding.seal(body);

        info!(
            "Capture finalized ({:?}): {} bytes, {} + {} chunks",
            reason,
            audio.len(),
            pre_roll_chunks,
            armed_chunks
        );

        Some(FinalizedClip {
            audio,
            encoding,
            armed_at,
            closed_at: now,
            pre_roll_chunks,
            armed_chunks,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> Option<ContentType> {
        Some(ContentType::raw_pcm(16000, 1))
    }

    fn detection(at: i64) -> DetectionEvent {
        DetectionEvent { value: 70, threshold: 50, at: Timestamp(at) }
    }

    #[test]
    fn idle_chunks_roll_through_bounded_pre_roll() {
        let mut seg = CaptureSegmenter::new(60_000, 3, raw());
        let mut evicted = 0;
        for i in 0..5u8 {
            if seg.on_chunk(vec![i], Timestamp(i as i64 * 1000)).evicted {
                evicted += 1;
            }
        }
        assert_eq!(seg.pre_roll_len(), 3);
        assert_eq!(evicted, 2);
        assert_eq!(seg.phase(), CapturePhase::Idle);
    }

    #[test]
    fn isolated_detection_closes_after_window() {
        let mut seg = CaptureSegmenter::new(60_000, 3, raw());
        seg.on_chunk(vec![1], Timestamp(0));
        seg.on_chunk(vec![2], Timestamp(1000));
        seg.on_detection(&detection(1500));
        assert_eq!(seg.phase(), CapturePhase::Armed);
        assert_eq!(seg.armed_until(), Some(Timestamp(61_500)));

        seg.on_chunk(vec![3], Timestamp(2000));
        seg.on_chunk(vec![4], Timestamp(3000));
        assert!(seg.poll(Timestamp(61_499)).is_none());

        let clip = seg.poll(Timestamp(61_500)).expect("clip");
        assert_eq!(clip.audio, vec![1, 2, 3, 4]);
        assert_eq!(clip.pre_roll_chunks, 2);
        assert_eq!(clip.armed_chunks, 2);
        assert_eq!(clip.reason, CloseReason::WindowElapsed);
        assert_eq!(seg.phase(), CapturePhase::Idle);
        assert!(seg.poll(Timestamp(70_000)).is_none());
    }

    #[test]
    fn detection_inside_window_extends_instead_of_splitting() {
        let mut seg = CaptureSegmenter::new(60_000, 3, raw());
        seg.on_detection(&detection(0));
        seg.on_chunk(vec![1], Timestamp(1000));
        seg.on_detection(&detection(30_000));
        assert_eq!(seg.phase(), CapturePhase::Extending);
        assert_eq!(seg.armed_until(), Some(Timestamp(90_000)));

        assert!(seg.poll(Timestamp(60_000)).is_none());
        seg.on_chunk(vec![2], Timestamp(61_000));
        let clip = seg.poll(Timestamp(90_000)).expect("one clip");
        assert_eq!(clip.audio, vec![1, 2]);
    }

    #[test]
    fn late_chunk_closes_before_buffering() {
        let mut seg = CaptureSegmenter::new(1000, 3, raw());
        seg.on_detection(&detection(0));
        seg.on_chunk(vec![1], Timestamp(500));
        let outcome = seg.on_chunk(vec![2], Timestamp(1200));
        let clip = outcome.finalized.expect("closed by late chunk");
        assert_eq!(clip.audio, vec![1]);
        assert_eq!(seg.pre_roll_len(), 1);
    }

    #[test]
    fn force_finalize_keeps_partial_capture() {
        let mut seg = CaptureSegmenter::new(60_000, 3, raw());
        seg.on_chunk(vec![9], Timestamp(0));
        seg.on_detection(&detection(100));
        seg.on_chunk(vec![1], Timestamp(1000));
        let clip = seg.force_finalize(Timestamp(2000), CloseReason::Stopped).expect("partial");
        assert_eq!(clip.audio, vec![9, 1]);
        assert_eq!(clip.reason, CloseReason::Stopped);
        assert!(seg.force_finalize(Timestamp(3000), CloseReason::Stopped).is_none());
    }

    #[test]
    fn disabled_capture_ignores_everything() {
        let mut seg = CaptureSegmenter::new(60_000, 3, None);
        seg.on_chunk(vec![1], Timestamp(0));
        seg.on_detection(&detection(0));
        assert_eq!(seg.phase(), CapturePhase::Idle);
        assert_eq!(seg.pre_roll_len(), 0);
        assert!(!seg.is_enabled());
    }

    #[test]
    fn detection_past_deadline_closes_and_rearms() {
        let mut seg = CaptureSegmenter::new(60_000, 3, raw());
        seg.on_detection(&detection(100));
        seg.on_chunk(vec![1], Timestamp(1000));
        assert!(seg.poll(Timestamp(60_050)).is_none());

        let clip = seg.on_detection(&detection(60_150)).expect("expired segment closed");
        assert_eq!(clip.audio, vec![1]);
        assert_eq!(clip.reason, CloseReason::WindowElapsed);
        assert_eq!(seg.phase(), CapturePhase::Armed);
        assert_eq!(seg.armed_until(), Some(Timestamp(120_150)));
    }

    #[test]
    fn detection_exactly_at_deadline_starts_new_segment() {
        let mut seg = CaptureSegmenter::new(1000, 3, raw());
        seg.on_detection(&detection(0));
        seg.on_chunk(vec![1], Timestamp(500));
        assert!(seg.on_detection(&detection(1000)).is_some());
        assert_eq!(seg.phase(), CapturePhase::Armed);
    }

    #[test]
    fn armed_without_audio_yields_nothing() {
        let mut seg = CaptureSegmenter::new(1000, 3, raw());
        seg.on_detection(&detection(0));
        assert!(seg.poll(Timestamp(1000)).is_none());
        assert_eq!(seg.phase(), CapturePhase::Idle);
    }
}
