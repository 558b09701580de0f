//! # Status Reporting
//!
//! Every request and every bus-driven transition ends in a [`StatusReport`]
//! handed to a [`StatusReporter`]. The presentation layer (the CLI here)
//! decides how to show it.
//!
//! ```text
//! SyncResult<Progress> ──► StatusReport::from_result ──► StatusReporter
//!                               │                          ├─ LogReporter
//!                               │                          ├─ ChannelReporter
//!                               ▼                          └─ NoOpReporter
//!                     { operation, level, message, pending, at }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Operations and Progress
// =============================================================================

/// What a report is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Upload,
    Download,
    Save,
    Connection,
    /// Companion side: a pushed document arrived.
    Push,
    /// Companion side: the terminal asked for a document.
    PullRequest,
    /// Companion side: a card was presented.
    Card,
    /// Companion side: a PIN was entered.
    Pin,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
            Operation::Save => "save",
            Operation::Connection => "connection",
            Operation::Push => "push",
            Operation::PullRequest => "pull request",
            Operation::Card => "card",
            Operation::Pin => "pin",
        };
        f.write_str(name)
    }
}

/// Successful outcome of a step in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Document and start flag were published.
    Uploaded { bytes: usize },

    /// Pull flag published; the session now awaits `response-data`.
    PullRequested,

    /// Pulled document written to the store.
    PullCompleted { entries: usize },

    /// User text validated and written to the store.
    Saved { entries: usize },

    /// Bus connection established.
    Connected { fired: usize, subscribed: usize },

    /// Bus connection lost.
    Disconnected { abandoned_pull: bool },

    /// Companion merged a pushed document.
    Merged { updated: usize, rejected: usize },

    /// Companion saw a flag that needs no reply.
    Acknowledged(&'static str),

    /// Companion staged the entry for a presented card.
    CardAccepted { uid: String },

    /// Companion replied to a pull after a PIN match.
    PinAccepted { uid: String },
}

impl Progress {
    /// True when the operation is still under way after this step.
    pub fn is_pending(&self) -> bool {
        matches!(self, Progress::PullRequested)
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Progress::Uploaded { bytes } => write!(f, "Uploaded credential store ({} bytes)", bytes),
            Progress::PullRequested => write!(f, "Download requested, waiting for the companion"),
            Progress::PullCompleted { entries } => {
                write!(f, "Downloaded credential store ({} entries)", entries)
            }
            Progress::Saved { entries } => write!(f, "Saved credential store ({} entries)", entries),
            Progress::Connected { fired, subscribed } => write!(
                f,
                "Connected to bus ({} deferred sent, {} topics subscribed)",
                fired, subscribed
            ),
            Progress::Disconnected { abandoned_pull: true } => {
                write!(f, "Disconnected from bus, pending download abandoned")
            }
            Progress::Disconnected { abandoned_pull: false } => write!(f, "Disconnected from bus"),
            Progress::Merged { updated, rejected } => write!(
                f,
                "Merged pushed document ({} updated, {} unknown keys rejected)",
                updated, rejected
            ),
            Progress::Acknowledged(what) => write!(f, "Acknowledged {}", what),
            Progress::CardAccepted { uid } => write!(f, "Card {} accepted", uid),
            Progress::PinAccepted { uid } => write!(f, "PIN accepted, entry {} sent", uid),
        }
    }
}

// =============================================================================
// Status Report
// =============================================================================

/// Severity of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A status line for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub operation: Operation,
    pub level: StatusLevel,
    pub message: String,

    /// The operation continues (deferred, or awaiting a reply).
    pub pending: bool,

    pub at: DateTime<Utc>,
}

impl StatusReport {
    pub fn new(operation: Operation, level: StatusLevel, message: impl Into<String>) -> Self {
        StatusReport {
            operation,
            level,
            message: message.into(),
            pending: false,
            at: Utc::now(),
        }
    }

    /// Turns the result of a step into a report.
    pub fn from_result(operation: Operation, result: &SyncResult<Progress>) -> Self {
        match result {
            Ok(progress) => {
                let level = if progress.is_pending() {
                    StatusLevel::Info
                } else {
                    StatusLevel::Success
                };
                let mut report = StatusReport::new(operation, level, progress.to_string());
                report.pending = progress.is_pending();
                report
            }
            Err(err @ SyncError::NotConnected { .. }) => {
                let mut report = StatusReport::new(operation, StatusLevel::Warning, err.to_string());
                report.pending = true;
                report
            }
            Err(err) => StatusReport::new(operation, StatusLevel::Error, err.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == StatusLevel::Error
    }
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.operation, self.message)
    }
}

// =============================================================================
// Reporter Trait
// =============================================================================

/// Receives every status report (implemented by the presentation layer).
pub trait StatusReporter: Send + Sync {
    fn report(&self, report: &StatusReport);
}

/// Writes reports to the tracing log.
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report(&self, report: &StatusReport) {
        match report.level {
            StatusLevel::Info | StatusLevel::Success => {
                info!(operation = %report.operation, pending = report.pending, "{}", report.message)
            }
            StatusLevel::Warning => warn!(operation = %report.operation, "{}", report.message),
            StatusLevel::Error => error!(operation = %report.operation, "{}", report.message),
        }
    }
}

/// Forwards reports over a channel so a caller can await later outcomes.
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<StatusReport>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelReporter { tx }, rx)
    }
}

impl StatusReporter for ChannelReporter {
    fn report(&self, report: &StatusReport) {
        // A dropped receiver only means nobody is watching any more.
        let _ = self.tx.send(report.clone());
    }
}

/// Discards reports.
pub struct NoOpReporter;

impl StatusReporter for NoOpReporter {
    fn report(&self, _report: &StatusReport) {}
}
