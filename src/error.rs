use thiserror::Error;

use crate::store::StoreError;

/// Failures at the session boundary. Tick-path code never returns these.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("audio source lost mid-session: {0}")]
    SourceLost(String),
    #[error("monitoring is already running")]
    AlreadyRunning,
    #[error("monitoring is not running")]
    NotRunning,
    #[error(transparent)]
    Store(#[from] StoreError),
}
