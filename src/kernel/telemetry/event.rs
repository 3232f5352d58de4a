use serde::{Deserialize, Serialize};

use crate::kernel::segment::CloseReason;

// Allowed: counts, levels, sizes, enums
// Forbidden: audio bytes, log text

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEvent {
    Tick {
        level: u32,
    },

    Detection {
        level: u32,
        threshold: u32,
    },

    CaptureArmed,

    CaptureExtended,

    ClipFinalized {
        bytes: usize,
        chunks: usize,
        reason: CloseKind,
    },

    PreRollEvicted,

    Session(SessionEdge),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseKind {
    WindowElapsed,
    Stopped,
    SourceEnded,
}

impl From<CloseReason> for CloseKind {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::WindowElapsed => CloseKind::WindowElapsed,
            CloseReason::Stopped => CloseKind::Stopped,
            CloseReason::SourceEnded => CloseKind::SourceEnded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEdge {
    Started,
    Stopped,
}
