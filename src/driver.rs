use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::audio::{AudioSource, AudioTap};
use crate::config::MonitorConfig;
use crate::error::SessionError;
use crate::kernel::encoding::negotiate;
use crate::kernel::event::Event;
use crate::kernel::level::LoudnessReading;
use crate::kernel::reactor::{Monitor, SideEffect};
use crate::kernel::telemetry::TelemetrySnapshot;
use crate::kernel::time::Clock;
use crate::store::StoreHandle;

/// Runs one monitoring session: the sampling cadence, the chunking cadence,
/// and the hand-off of kernel side effects to the store.
pub struct Session<C: Clock> {
    config: MonitorConfig,
    monitor: Monitor,
    store: StoreHandle,
    clock: C,
    threshold: watch::Receiver<u32>,
    levels: watch::Sender<Option<LoudnessReading>>,
}

impl<C: Clock> Session<C> {
    /// `threshold` is the host-owned threshold input, read once per tick.
    /// The returned receiver publishes every loudness reading.
    pub fn new(
        config: MonitorConfig,
        store: StoreHandle,
        clock: C,
        threshold: watch::Receiver<u32>,
    ) -> (Self, watch::Receiver<Option<LoudnessReading>>) {
        let (levels, levels_rx) = watch::channel(None);
        let session = Self {
            monitor: Monitor::new(config.clone()),
            config,
            store,
            clock,
            threshold,
            levels,
        };
        (session, levels_rx)
    }

    /// Run until `cancel` fires or the source fails.
    ///
    /// A source that could not be acquired is reported before anything is
    /// logged, leaving the system in its pre-start state. On every exit path
    /// after a successful start, open capture is finalized and the stop
    /// marker is persisted before this returns.
    pub async fn run<S: AudioSource>(
        &mut self,
        source: Result<S, anyhow::Error>,
        cancel: CancellationToken,
    ) -> Result<TelemetrySnapshot, SessionError> {
        let mut source = source.map_err(|e| SessionError::SourceUnavailable(format!("{:#}", e)))?;

        let session_id = Uuid::new_v4();
        let span = info_span!("session", id = %session_id);
        self.run_started(&mut source, cancel).instrument(span).await
    }

    async fn run_started<S: AudioSource>(
        &mut self,
        source: &mut S,
        cancel: CancellationToken,
    ) -> Result<TelemetrySnapshot, SessionError> {
        let capture = negotiate(&self.config.encodings, &source.encodings());
        self.monitor.set_threshold(*self.threshold.borrow_and_update());
        let effects = self.monitor.start(self.clock.now(), capture)?;
        self.dispatch(effects);
        info!(
            "Monitoring started at {} Hz, threshold {}",
            source.sample_rate(),
            self.monitor.threshold()
        );

        let tick = Duration::from_millis(self.config.tick_ms);
        let chunk = Duration::from_millis(self.config.chunk_ms);

        let mut sampling = interval(tick);
        sampling.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut chunking = interval_at(Instant::now() + chunk, chunk);
        chunking.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tap = AudioTap::new(self.config.block_size, self.config.gain);
        let mut scratch = Vec::new();
        let mut lost = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = sampling.tick() => {
                    let mut events = Vec::with_capacity(3);
                    if self.threshold.has_changed().unwrap_or(false) {
                        events.push(Event::Threshold(*self.threshold.borrow_and_update()));
                    }

                    scratch.clear();
                    match source.drain(&mut scratch) {
                        Ok(_) => {
                            tap.ingest(&scratch);
                            events.push(Event::Block(tap.block()));
                        }
                        Err(e) => {
                            error!("Audio source failed mid-session: {}", e);
                            if let Some(rest) = tap.take_chunk() {
                                events.push(Event::Chunk(rest));
                            }
                            events.push(Event::SourceEnded);
                            lost = Some(e.to_string());
                        }
                    }

                    let effects = self.monitor.tick_step(events, self.clock.now());
                    self.dispatch(effects);
                    if lost.is_some() {
                        break;
                    }
                }

                _ = chunking.tick() => {
                    if let Some(bytes) = tap.take_chunk() {
                        let effects = self.monitor.tick_step(vec![Event::Chunk(bytes)], self.clock.now());
                        self.dispatch(effects);
                    }
                }
            }
        }

        // Audio captured since the last chunk still belongs to an open segment.
        let mut effects = Vec::new();
        if let Some(rest) = tap.take_chunk() {
            effects.extend(self.monitor.tick_step(vec![Event::Chunk(rest)], self.clock.now()));
        }
        effects.extend(self.monitor.stop(self.clock.now())?);
        self.dispatch_final(effects).await?;
        self.levels.send_replace(None);
        self.store.flush().await?;

        let snapshot = self.monitor.telemetry.snapshot();
        info!(
            "Monitoring stopped: {} ticks, peak {} dB, {} detections, {} clips",
            snapshot.level_stats.ticks,
            snapshot.level_stats.peak_level,
            snapshot.level_stats.detections,
            snapshot.capture_stats.clips
        );

        match lost {
            Some(reason) => Err(SessionError::SourceLost(reason)),
            None => Ok(snapshot),
        }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Off the tick path: wait for queue room so the closing clip and the
    /// stop marker are never dropped.
    async fn dispatch_final(&self, effects: Vec<SideEffect>) -> Result<(), SessionError> {
        for effect in effects {
            match effect {
                SideEffect::Reading(reading) => {
                    self.levels.send_replace(Some(reading));
                }
                SideEffect::AppendLog(record) => self.store.enqueue_log(record).await?,
                SideEffect::PersistClip(clip) => self.store.enqueue_clip(clip).await?,
            }
        }
        Ok(())
    }

    fn dispatch(&self, effects: Vec<SideEffect>) {
        for effect in effects {
            match effect {
                SideEffect::Reading(reading) => {
                    debug!(level = reading.value, above = reading.above_threshold, "reading");
                    self.levels.send_replace(Some(reading));
                }
                SideEffect::AppendLog(record) => self.store.submit_log(record),
                SideEffect::PersistClip(clip) => self.store.submit_clip(clip),
            }
        }
    }
}
