use serde::{Deserialize, Serialize};

use super::level::SampleBlock;
use super::time::Timestamp;

/// Inputs the driver hands to the kernel on each step.
#[derive(Debug, Clone)]
pub enum Event {
    /// One analysis window from the sampling cadence.
    Block(SampleBlock),
    /// One encoded chunk from the chunking cadence.
    Chunk(Vec<u8>),
    /// New threshold value from the host.
    Threshold(u32),
    /// The chunk source stopped producing; any open capture must close.
    SourceEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarkerKind {
    Start,
    Stop,
}

/// Session boundary produced by the lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMarker {
    pub kind: MarkerKind,
    pub at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogKind {
    Event,
    Detection,
}

/// A log line the kernel wants persisted. The store assigns id and time text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub kind: LogKind,
    pub display: String,
    pub threshold: u32,
    pub at: Timestamp,
}
