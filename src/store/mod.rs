//! Durable history: the event log and the clip store.
//!
//! Both collections are owned by a single store thread. Callers talk to it
//! through [`StoreHandle`]: `async` methods for request/response with typed
//! results, `submit_*` for the tick path, which must never wait on disk.

pub mod clips;
pub mod log;

use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

pub use clips::{ClipSegment, ClipStore};
pub use log::{render_export, EventLog, LogEntry, UTF8_BOM};

use crate::kernel::event::LogRecord;
use crate::kernel::segment::FinalizedClip;
use crate::kernel::time::Timestamp;

const EVENTS_FILE: &str = "events.jsonl";
const CLIPS_DIR: &str = "clips";
const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not available")]
    Unavailable,
    #[error("store thread has shut down")]
    Closed,
    #[error("no clip with id {0}")]
    NotFound(u64),
    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read a JSON-lines file, skipping lines that do not parse. The flag is set
/// when the file does not end in a newline (a torn final write).
pub(crate) fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, bool), StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => return Err(e.into()),
    };

    let mut items = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(item) => items.push(item),
            Err(e) => warn!("Skipping unreadable line {} in {}: {}", n + 1, path.display(), e),
        }
    }

    let torn = !content.is_empty() && !content.ends_with('\n');
    Ok((items, torn))
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum StoreRequest {
    AppendLog { record: LogRecord, reply: Option<Reply<LogEntry>> },
    RecentLogs { limit: usize, reply: Reply<Vec<LogEntry>> },
    ExportLogs { reply: Reply<Vec<LogEntry>> },
    ClearLogs { reply: Reply<()> },
    AppendClip { audio: Vec<u8>, encoding: String, at: Timestamp, reply: Option<Reply<ClipSegment>> },
    ListClips { reply: Reply<Vec<ClipSegment>> },
    ReadClip { id: u64, reply: Reply<Vec<u8>> },
    RemoveClip { id: u64, reply: Reply<()> },
    ClearClips { reply: Reply<()> },
    ExportClips { dest: PathBuf, reply: Reply<Vec<PathBuf>> },
    Flush { reply: oneshot::Sender<()> },
}

/// Cloneable front door to the store thread. Requests are served strictly in
/// send order, so fire-and-forget appends keep their relative order.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreRequest>,
}

impl StoreHandle {
    /// Start the store thread over `data_dir`. Opening is attempted lazily on
    /// the first request and retried on later ones while it keeps failing.
    pub fn spawn(data_dir: PathBuf) -> Result<(Self, std::thread::JoinHandle<()>), StoreError> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let actor = StoreActor {
            dir: data_dir,
            log: None,
            clips: None,
            rx,
        };
        let join = std::thread::Builder::new()
            .name("noisewatch-store".into())
            .spawn(move || actor.run())?;
        Ok((Self { tx }, join))
    }

    pub async fn append_log(&self, record: LogRecord) -> Result<LogEntry, StoreError> {
        self.call(|reply| StoreRequest::AppendLog { record, reply: Some(reply) }).await
    }

    /// Queue an append without waiting. A full queue drops the record with a warning.
    pub fn submit_log(&self, record: LogRecord) {
        self.submit(StoreRequest::AppendLog { record, reply: None });
    }

    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        self.call(|reply| StoreRequest::RecentLogs { limit, reply }).await
    }

    pub async fn export_logs(&self) -> Result<Vec<LogEntry>, StoreError> {
        self.call(|reply| StoreRequest::ExportLogs { reply }).await
    }

    pub async fn clear_logs(&self) -> Result<(), StoreError> {
        self.call(|reply| StoreRequest::ClearLogs { reply }).await
    }

    pub async fn append_clip(&self, audio: Vec<u8>, encoding: String, at: Timestamp) -> Result<ClipSegment, StoreError> {
        self.call(|reply| StoreRequest::AppendClip { audio, encoding, at, reply: Some(reply) })
            .await
    }

    pub fn submit_clip(&self, clip: FinalizedClip) {
        self.submit(StoreRequest::AppendClip {
            audio: clip.audio,
            encoding: clip.encoding.mime(),
            at: clip.closed_at,
            reply: None,
        });
    }

    /// Like `submit_log`, but waits for queue room instead of dropping.
    /// Does not wait for the write itself.
    pub async fn enqueue_log(&self, record: LogRecord) -> Result<(), StoreError> {
        self.enqueue(StoreRequest::AppendLog { record, reply: None }).await
    }

    pub async fn enqueue_clip(&self, clip: FinalizedClip) -> Result<(), StoreError> {
        self.enqueue(StoreRequest::AppendClip {
            audio: clip.audio,
            encoding: clip.encoding.mime(),
            at: clip.closed_at,
            reply: None,
        })
        .await
    }

    pub async fn list_clips(&self) -> Result<Vec<ClipSegment>, StoreError> {
        self.call(|reply| StoreRequest::ListClips { reply }).await
    }

    pub async fn read_clip(&self, id: u64) -> Result<Vec<u8>, StoreError> {
        self.call(|reply| StoreRequest::ReadClip { id, reply }).await
    }

    pub async fn remove_clip(&self, id: u64) -> Result<(), StoreError> {
        self.call(|reply| StoreRequest::RemoveClip { id, reply }).await
    }

    pub async fn clear_clips(&self) -> Result<(), StoreError> {
        self.call(|reply| StoreRequest::ClearClips { reply }).await
    }

    pub async fn export_clips(&self, dest: PathBuf) -> Result<Vec<PathBuf>, StoreError> {
        self.call(|reply| StoreRequest::ExportClips { dest, reply }).await
    }

    /// Resolves once every request sent before it has been served.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreRequest::Flush { reply })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> StoreRequest) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    async fn enqueue(&self, request: StoreRequest) -> Result<(), StoreError> {
        self.tx.send(request).await.map_err(|_| StoreError::Closed)
    }

    fn submit(&self, request: StoreRequest) {
        if let Err(e) = self.tx.try_send(request) {
            match e {
                mpsc::error::TrySendError::Full(_) => warn!("Store queue full, write dropped"),
                mpsc::error::TrySendError::Closed(_) => warn!("Store closed, write dropped"),
            }
        }
    }
}

struct StoreActor {
    dir: PathBuf,
    log: Option<EventLog>,
    clips: Option<ClipStore>,
    rx: mpsc::Receiver<StoreRequest>,
}

impl StoreActor {
    fn run(mut self) {
        info!("Store thread started at {}", self.dir.display());
        while let Some(request) = self.rx.blocking_recv() {
            self.handle(request);
        }
        info!("Store thread stopped");
    }

    fn handle(&mut self, request: StoreRequest) {
        match request {
            StoreRequest::AppendLog { record, reply } => {
                let result = self.log().and_then(|log| log.append(&record));
                respond_or_warn(reply, result, "log append");
            }
            StoreRequest::RecentLogs { limit, reply } => {
                let _ = reply.send(self.log().map(|log| log.recent(limit)));
            }
            StoreRequest::ExportLogs { reply } => {
                let _ = reply.send(self.log().map(|log| log.export_all()));
            }
            StoreRequest::ClearLogs { reply } => {
                let _ = reply.send(self.log().and_then(|log| log.clear()));
            }
            StoreRequest::AppendClip { audio, encoding, at, reply } => {
                let result = self.clips().and_then(|c| c.append(&audio, &encoding, at));
                respond_or_warn(reply, result, "clip append");
            }
            StoreRequest::ListClips { reply } => {
                let _ = reply.send(self.clips().map(|c| c.list()));
            }
            StoreRequest::ReadClip { id, reply } => {
                let _ = reply.send(self.clips().and_then(|c| c.read_audio(id)));
            }
            StoreRequest::RemoveClip { id, reply } => {
                let _ = reply.send(self.clips().and_then(|c| c.remove(id)));
            }
            StoreRequest::ClearClips { reply } => {
                let _ = reply.send(self.clips().and_then(|c| c.clear()));
            }
            StoreRequest::ExportClips { dest, reply } => {
                let _ = reply.send(self.clips().and_then(|c| c.export_to(&dest)));
            }
            StoreRequest::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn log(&mut self) -> Result<&mut EventLog, StoreError> {
        if self.log.is_none() {
            match EventLog::open(&self.dir.join(EVENTS_FILE)) {
                Ok(log) => {
                    info!("Event log opened ({} entries)", log.len());
                    self.log = Some(log);
                }
                Err(e) => {
                    warn!("Event log unavailable: {}", e);
                    return Err(StoreError::Unavailable);
                }
            }
        }
        self.log.as_mut().ok_or(StoreError::Unavailable)
    }

    fn clips(&mut self) -> Result<&mut ClipStore, StoreError> {
        if self.clips.is_none() {
            match ClipStore::open(&self.dir.join(CLIPS_DIR)) {
                Ok(store) => {
                    info!("Clip store opened ({} clips)", store.len());
                    self.clips = Some(store);
                }
                Err(e) => {
                    warn!("Clip store unavailable: {}", e);
                    return Err(StoreError::Unavailable);
                }
            }
        }
        self.clips.as_mut().ok_or(StoreError::Unavailable)
    }
}

fn respond_or_warn<T>(reply: Option<Reply<T>>, result: Result<T, StoreError>, what: &str) {
    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => {
            if let Err(e) = result {
                warn!("Queued {} failed: {}", what, e);
            }
        }
    }
}
