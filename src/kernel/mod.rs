//! Synchronous monitoring kernel.
//!
//! Nothing in here awaits, sleeps or performs I/O. Time enters only as
//! [`time::Timestamp`] arguments, so every state machine can be driven by a
//! virtual clock.

pub mod detection;
pub mod encoding;
pub mod event;
pub mod level;
pub mod reactor;
pub mod segment;
pub mod telemetry;
pub mod time;
