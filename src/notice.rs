//! # Error Notices
//!
//! A shared channel carrying the most recent user-facing error. The UI
//! observes it, shows a transient notice and then dismisses it, which clears
//! the channel.
//!
//! ```text
//!  repositories ── raise() ──► [ watch<Option<ErrorNotice>> ] ──► UI
//!                                         ▲                        │
//!                                         └──── dismiss() ─────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Error;

/// A user-facing error awaiting display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    /// Numeric error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// Whether retrying may help
    pub recoverable: bool,
    /// When it was raised (Unix ms)
    pub raised_at: i64,
}

impl From<&Error> for ErrorNotice {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            raised_at: crate::time::now_timestamp_millis(),
        }
    }
}

/// Cloneable handle to the shared notice channel
#[derive(Clone)]
pub struct ErrorChannel {
    tx: Arc<watch::Sender<Option<ErrorNotice>>>,
    raised: Arc<AtomicU64>,
}

impl ErrorChannel {
    /// Create an empty channel
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            raised: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an error, replacing any notice not yet shown
    pub fn raise(&self, err: &Error) {
        self.raised.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(code = err.code(), "Raising error notice: {}", err);
        self.tx.send_replace(Some(ErrorNotice::from(err)));
    }

    /// The notice currently pending, if any
    pub fn current(&self) -> Option<ErrorNotice> {
        self.tx.borrow().clone()
    }

    /// Take the pending notice and clear the channel
    pub fn dismiss(&self) -> Option<ErrorNotice> {
        self.tx.send_replace(None)
    }

    /// Observe the channel
    pub fn subscribe(&self) -> watch::Receiver<Option<ErrorNotice>> {
        self.tx.subscribe()
    }

    /// Total number of notices raised since creation
    pub fn raised_count(&self) -> u64 {
        self.raised.load(Ordering::SeqCst)
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}
