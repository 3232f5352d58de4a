use noisewatch::kernel::encoding::{ContentType, Negotiated};
use noisewatch::kernel::event::{Event, LogKind, LogRecord};
use noisewatch::kernel::level::SampleBlock;
use noisewatch::kernel::reactor::{Monitor, SideEffect};
use noisewatch::kernel::segment::{CapturePhase, CloseReason, FinalizedClip};
use noisewatch::kernel::time::{Clock, ManualClock, Timestamp};
use noisewatch::MonitorConfig;

const WINDOW: u64 = 60_000;

fn loud() -> Event {
    Event::Block(SampleBlock::Float(vec![0.5; 128]))
}

fn quiet() -> Event {
    Event::Block(SampleBlock::Float(vec![0.0; 128]))
}

fn clips(effects: &[SideEffect]) -> Vec<FinalizedClip> {
    effects
        .iter()
        .filter_map(|e| match e {
            SideEffect::PersistClip(c) => Some(c.clone()),
            _ => None,
        })
        .collect()
}

fn detections(effects: &[SideEffect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, SideEffect::AppendLog(LogRecord { kind: LogKind::Detection, .. })))
        .count()
}

/// Drives a monitor the way the session does: a block every 100 ms and a
/// one-byte chunk (its index) every 1000 ms, all on a virtual clock.
struct Harness {
    monitor: Monitor,
    clock: ManualClock,
    chunk_no: u8,
    effects: Vec<SideEffect>,
}

impl Harness {
    fn new() -> Self {
        let config = MonitorConfig { threshold: 50, pre_roll_chunks: 3, ..Default::default() };
        let clock = ManualClock::new(Timestamp(1_000_000));
        let mut monitor = Monitor::new(config);
        let start = monitor
            .start(clock.now(), Negotiated::Preferred(ContentType::raw_pcm(16000, 1)))
            .unwrap();
        Self { monitor, clock, chunk_no: 0, effects: start }
    }

    /// Advance `ms` in 100 ms ticks; `noisy` decides the block at each tick.
    fn run(&mut self, ms: u64, noisy: impl Fn(u64) -> bool) {
        let mut elapsed = 0;
        while elapsed < ms {
            let now = self.clock.advance(100);
            elapsed += 100;
            let block = if noisy(elapsed) { loud() } else { quiet() };
            let out = self.monitor.tick_step(vec![block], now);
            self.effects.extend(out);
            if now.as_millis() % 1000 == 0 {
                self.chunk_no = self.chunk_no.wrapping_add(1);
                let out = self.monitor.tick_step(vec![Event::Chunk(vec![self.chunk_no])], now);
                self.effects.extend(out);
            }
        }
    }
}

#[test]
fn test_isolated_detection_yields_one_clip_after_window() {
    let mut h = Harness::new();
    h.run(5_000, |_| false); // chunks 1..=5, pre-roll keeps 3..=5
    h.run(100, |_| true); // single detection at t+5100
    assert_eq!(h.monitor.capture_phase(), CapturePhase::Armed);

    h.run(WINDOW - 200, |_| false);
    assert!(clips(&h.effects).is_empty(), "window has not elapsed yet");

    h.run(200, |_| false);
    let got = clips(&h.effects);
    assert_eq!(got.len(), 1);
    let clip = &got[0];
    assert_eq!(clip.reason, CloseReason::WindowElapsed);
    assert_eq!(clip.pre_roll_chunks, 3);
    assert_eq!(&clip.audio[..3], &[3, 4, 5]);
    // Chunks 6..=65 arrived while armed (one per second for 60 s).
    assert_eq!(clip.armed_chunks, 60);
    assert_eq!(clip.closed_at.millis_since(clip.armed_at), WINDOW as i64);
    assert_eq!(h.monitor.capture_phase(), CapturePhase::Idle);
}

#[test]
fn test_detections_inside_window_extend_one_clip() {
    let mut h = Harness::new();
    h.run(100, |_| true); // arm
    h.run(30_000, |_| false);
    h.run(100, |_| true); // extend from t+30.2 s
    assert_eq!(h.monitor.capture_phase(), CapturePhase::Extending);

    h.run(WINDOW + 1_000, |_| false);
    let got = clips(&h.effects);
    assert_eq!(got.len(), 1, "sliding window merges both detections");
    assert_eq!(got[0].closed_at.millis_since(got[0].armed_at), 30_100 + WINDOW as i64);
    assert_eq!(detections(&h.effects), 2);
}

#[test]
fn test_sustained_noise_keeps_capture_open() {
    let mut h = Harness::new();
    h.run(180_000, |_| true);
    assert!(clips(&h.effects).is_empty());
    assert_eq!(h.monitor.capture_phase(), CapturePhase::Extending);
    // 1.6 s spacing with 100 ms ticks.
    assert_eq!(detections(&h.effects), 113);
}

#[test]
fn test_separate_episodes_make_separate_clips() {
    let mut h = Harness::new();
    h.run(100, |_| true);
    h.run(WINDOW + 5_000, |_| false);
    h.run(100, |_| true);
    h.run(WINDOW + 5_000, |_| false);
    assert_eq!(clips(&h.effects).len(), 2);
}

#[test]
fn test_stop_while_armed_keeps_partial_capture() {
    let mut h = Harness::new();
    h.run(2_000, |_| false);
    h.run(100, |_| true);
    h.run(10_000, |_| false);

    let stop = h.monitor.stop(h.clock.now()).unwrap();
    let got = clips(&stop);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].reason, CloseReason::Stopped);
    assert_eq!(got[0].pre_roll_chunks, 2);
    assert_eq!(got[0].armed_chunks, 10);
    assert!(matches!(
        stop.last(),
        Some(SideEffect::AppendLog(LogRecord { kind: LogKind::Event, .. }))
    ));
}

#[test]
fn test_source_end_finalizes_open_segment() {
    let mut h = Harness::new();
    h.run(100, |_| true);
    h.run(3_000, |_| false);
    let out = h.monitor.tick_step(vec![Event::SourceEnded], h.clock.now());
    let got = clips(&out);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].reason, CloseReason::SourceEnded);
}

#[test]
fn test_chunk_before_detection_in_same_instant_is_pre_roll() {
    let mut h = Harness::new();
    let now = h.clock.advance(1_000);
    h.monitor.tick_step(vec![Event::Chunk(vec![42])], now);
    h.monitor.tick_step(vec![loud()], now);
    let stop = h.monitor.stop(now.plus_millis(10)).unwrap();
    let got = clips(&stop);
    assert_eq!(got[0].audio, vec![42]);
    assert_eq!(got[0].pre_roll_chunks, 1);
}

#[test]
fn test_disabled_capture_still_logs_detections() {
    let clock = ManualClock::new(Timestamp(0));
    let mut monitor = Monitor::new(MonitorConfig { threshold: 50, ..Default::default() });
    monitor.start(clock.now(), Negotiated::Disabled).unwrap();
    assert!(!monitor.capture_enabled());

    let out = monitor.tick_step(vec![loud(), Event::Chunk(vec![1])], clock.advance(100));
    assert_eq!(detections(&out), 1);
    let stop = monitor.stop(clock.advance(100)).unwrap();
    assert!(clips(&stop).is_empty());
}

#[test]
fn test_wav_encoding_produces_riff_clip() {
    let clock = ManualClock::new(Timestamp(0));
    let mut monitor = Monitor::new(MonitorConfig { threshold: 50, ..Default::default() });
    monitor
        .start(clock.now(), Negotiated::Fallback(ContentType::wav(16000, 1)))
        .unwrap();
    monitor.tick_step(vec![loud()], clock.advance(100));
    monitor.tick_step(vec![Event::Chunk(vec![0, 0, 1, 0])], clock.advance(900));
    let stop = monitor.stop(clock.advance(10)).unwrap();
    let got = clips(&stop);
    assert_eq!(got[0].encoding, ContentType::wav(16000, 1));
    assert_eq!(&got[0].audio[0..4], b"RIFF");
    assert_eq!(got[0].audio.len(), 44 + 4);
}
