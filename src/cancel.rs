//! Build-wide cancellation.
//!
//! A [`CancelToken`] carries two independent stop conditions: an optional
//! deadline fixed at construction, and a cancelled flag that can be raised
//! at any time. Tokens form a tree through [`CancelToken::child`]: a child
//! is stopped whenever any ancestor is, but cancelling a child never touches
//! its parent. The orchestrator creates one root token per build (carrying
//! the build deadline) and every fan-out group works under a child of it, so
//! one failing job stops its siblings without stopping the build's other
//! phases' bookkeeping.
//!
//! Blocking operations observe the token where they can: HTTP requests use
//! [`CancelToken::remaining`] as their timeout, shell commands are polled and
//! killed. Filesystem calls are not interruptible and simply run to
//! completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a piece of work stopped before it finished.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<CancelToken>,
}

impl CancelToken {
    /// A token with no deadline that only stops when cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: Instant::now().checked_add(timeout),
                parent: None,
            }),
        }
    }

    /// A token stopped by this one, but which can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: None,
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// `Ok` while work may continue. An explicit cancel anywhere up the
    /// chain wins over an expired deadline.
    pub fn check(&self) -> Result<(), Interrupted> {
        let mut expired = false;
        let mut token = Some(self);
        while let Some(t) = token {
            if t.inner.cancelled.load(Ordering::SeqCst) {
                return Err(Interrupted::Cancelled);
            }
            if t.inner.deadline.is_some_and(|d| Instant::now() >= d) {
                expired = true;
            }
            token = t.inner.parent.as_ref();
        }
        if expired {
            Err(Interrupted::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.check().is_err()
    }

    /// The earliest deadline on this token or any ancestor.
    pub fn deadline(&self) -> Option<Instant> {
        let mut earliest: Option<Instant> = None;
        let mut token = Some(self);
        while let Some(t) = token {
            if let Some(d) = t.inner.deadline {
                earliest = Some(earliest.map_or(d, |e| e.min(d)));
            }
            token = t.inner.parent.as_ref();
        }
        earliest
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}
