//! # Store Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  std::io::Error / CoreError                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (this module) ← Adds path and operation context            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError::StoreReadFailed / StoreWriteFailed                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StatusReport shown to the user                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// Persisted store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file does not exist yet.
    #[error("Credential store not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The store file exists but does not hold a credential document.
    ///
    /// ## When This Occurs
    /// - The file was edited by hand outside KeyRelay
    /// - A pre-atomic-write version left a truncated file behind
    #[error("Credential store {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be encoded for writing.
    #[error("Encoding failed: {0}")]
    Codec(#[from] keyrelay_core::CoreError),
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
