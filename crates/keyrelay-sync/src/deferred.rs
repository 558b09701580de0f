//! # Deferred-Send Queue
//!
//! Holds user requests issued while the bus is down and releases them on
//! the next connect.
//!
//! ```text
//!   enqueue(Upload)    [Upload]
//!   enqueue(Download)  [Upload, Download]
//!   enqueue(Upload)    [Download, Upload]      replaced, moved to the back
//!   drain_on_connect() → Download, Upload      queue now empty
//! ```
//!
//! An upload is queued as an intent, not as bytes: the store is read when
//! it fires, so the peer receives the contents current at connect time.

use std::collections::VecDeque;

/// A request waiting for the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    Upload,
    Download,
}

impl DeferredAction {
    pub fn name(&self) -> &'static str {
        match self {
            DeferredAction::Upload => "upload",
            DeferredAction::Download => "download",
        }
    }
}

/// One slot per action kind, fired in FIFO order.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    pending: VecDeque<DeferredAction>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `action`, replacing a pending one of the same kind.
    ///
    /// Returns true if an earlier request was superseded.
    pub fn enqueue(&mut self, action: DeferredAction) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| *pending != action);
        let replaced = self.pending.len() != before;
        self.pending.push_back(action);
        replaced
    }

    /// Removes and returns every pending action, oldest first.
    pub fn drain_on_connect(&mut self) -> Vec<DeferredAction> {
        self.pending.drain(..).collect()
    }

    pub fn is_pending(&self, action: DeferredAction) -> bool {
        self.pending.contains(&action)
    }

    /// Pending actions in firing order.
    pub fn pending(&self) -> Vec<DeferredAction> {
        self.pending.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
