//! Error taxonomy shared by the pool and the scanning engine.

use std::time::Duration;
use thiserror::Error;

/// Boxed collaborator error (RPC client, dial factory, event hook).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum WatchError {
    /// Slot 0 of the filter is frozen once the engine runs with watched events.
    #[error("already running, registration of watched events is prohibited")]
    AlreadyRunning,

    #[error("already closed")]
    AlreadyClosed,

    #[error("not running, event dispatch is prohibited")]
    NotRunning,

    #[error("invalid filter slot {0}, expected 0..=3")]
    InvalidFilterSlot(usize),

    #[error("no clients available, failed to connect to blockchain")]
    NoClientAvailable,

    #[error("chain id mismatch: pool serves {expected}, endpoint {url} reports {actual}")]
    ChainIdMismatch {
        expected: u64,
        actual: u64,
        url: String,
    },

    #[error("{op} failed: {source}")]
    UpstreamQueryFailed {
        op: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("hook for event {event} failed: {source}")]
    HookFailed {
        event: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl WatchError {
    pub(crate) fn upstream(op: &'static str, err: anyhow::Error) -> Self {
        WatchError::UpstreamQueryFailed {
            op,
            source: err.into(),
        }
    }
}
