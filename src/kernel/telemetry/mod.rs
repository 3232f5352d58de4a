//! Session telemetry.
//!
//! Telemetry is write-only from the kernel's point of view: nothing in the
//! detection or capture path reads it back. Events carry counts and levels,
//! never audio or log text.

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::TelemetryEvent;
pub use metrics::TelemetrySnapshot;
pub use recorder::TelemetryRecorder;
