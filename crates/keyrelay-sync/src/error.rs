//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  NotConnected   │  │  DecodeError            │ │
//! │  │  ConfigLoad     │  │  PublishFailed  │  │  InvalidMessage         │ │
//! │  │  ConfigSave     │  │  SubscribeFailed│  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Store        │  │    Session      │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  StoreRead      │  │  SessionBusy    │  │  ChannelError           │ │
//! │  │  StoreWrite     │  │  PullTimedOut   │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these are fatal to the controller: every one is turned into a
//! [`StatusReport`](crate::report::StatusReport) and the controller keeps
//! serving requests.

use keyrelay_core::CoreError;
use keyrelay_store::StoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid relay configuration.
    #[error("Invalid relay configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The bus is not connected; the operation was deferred until it is.
    #[error("Not connected to the bus, {operation} will be sent on connect")]
    NotConnected { operation: &'static str },

    /// The bus client refused or failed a publish.
    #[error("Publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// The bus client refused a subscription.
    #[error("Subscribe to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Bus client error outside of a specific publish or subscribe.
    #[error("Bus error: {0}")]
    Bus(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Payload or user text is not a credential document.
    #[error("Not a valid credential document: {0}")]
    DecodeError(String),

    /// A message that does not fit the topic contract.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Persisted store could not be read.
    #[error("Failed to read credential store: {0}")]
    StoreReadFailed(String),

    /// Persisted store could not be written.
    #[error("Failed to write credential store: {0}")]
    StoreWriteFailed(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// A download is already awaiting its response.
    #[error("A download is already in progress")]
    SessionBusy,

    /// No response arrived before the pull timeout expired.
    #[error("Download timed out after {after_secs} seconds")]
    PullTimedOut { after_secs: u64 },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Decode(_) | CoreError::NotAnObject { .. } => {
                SyncError::DecodeError(err.to_string())
            }
            CoreError::UnknownFlag(_) => SyncError::InvalidMessage(err.to_string()),
            CoreError::Encode(_) => SyncError::StoreWriteFailed(err.to_string()),
            CoreError::UnknownRole(_)
            | CoreError::DuplicateTopic { .. }
            | CoreError::Validation(_) => SyncError::InvalidConfig(err.to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } | StoreError::Corrupt { .. } => {
                SyncError::StoreReadFailed(err.to_string())
            }
            StoreError::Io { .. } | StoreError::Codec(_) => {
                SyncError::StoreWriteFailed(err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::DecodeError(err.to_string())
    }
}

impl From<rumqttc::ClientError> for SyncError {
    fn from(err: rumqttc::ClientError) -> Self {
        SyncError::Bus(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl SyncError {
    /// Maps a failed store read. Any store failure on the read path is a
    /// read failure, including I/O errors.
    pub fn store_read(err: StoreError) -> Self {
        SyncError::StoreReadFailed(err.to_string())
    }

    /// Maps a failed store write.
    pub fn store_write(err: StoreError) -> Self {
        SyncError::StoreWriteFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if repeating the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NotConnected { .. }
                | SyncError::PublishFailed { .. }
                | SyncError::SubscribeFailed { .. }
                | SyncError::Bus(_)
                | SyncError::SessionBusy
                | SyncError::PullTimedOut { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the peer sent something outside the topic contract.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::DecodeError(_) | SyncError::InvalidMessage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::NotConnected { operation: "upload" }.is_retryable());
        assert!(SyncError::SessionBusy.is_retryable());
        assert!(SyncError::PullTimedOut { after_secs: 120 }.is_retryable());

        assert!(!SyncError::DecodeError("bad".into()).is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_core_error_conversion() {
        let decode: SyncError = CoreError::Decode("eof".into()).into();
        assert!(matches!(decode, SyncError::DecodeError(_)));
        assert!(decode.is_protocol_error());

        let topic: SyncError = CoreError::DuplicateTopic {
            topic: "pin".into(),
            first: "presence",
            second: "pin",
        }
        .into();
        assert!(topic.is_config_error());
    }

    #[test]
    fn test_store_error_conversion() {
        let missing: SyncError = StoreError::NotFound {
            path: PathBuf::from("passwords.json"),
        }
        .into();
        assert!(matches!(missing, SyncError::StoreReadFailed(_)));
        assert!(missing.to_string().contains("passwords.json"));
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::PublishFailed {
            topic: "pc-to-rpi-data".into(),
            reason: "request queue full".into(),
        };
        assert!(err.to_string().contains("pc-to-rpi-data"));
        assert_eq!(
            SyncError::NotConnected { operation: "upload" }.to_string(),
            "Not connected to the bus, upload will be sent on connect"
        );
    }
}
