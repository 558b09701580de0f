//! # Error Types
//!
//! Domain-specific error types for keyrelay-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  keyrelay-core errors (this file)                                      │
//! │  ├── CoreError        - Codec and protocol vocabulary errors           │
//! │  └── ValidationError  - PIN / card UID input failures                  │
//! │                                                                         │
//! │  keyrelay-store errors (separate crate)                                │
//! │  └── StoreError       - File read / atomic write failures              │
//! │                                                                         │
//! │  keyrelay-sync errors (separate crate)                                 │
//! │  └── SyncError        - What the status report shows                   │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → StatusReport          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Protocol vocabulary errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload is not parseable as JSON.
    ///
    /// ## When This Occurs
    /// - User typed free text into the editor and pressed save
    /// - A `response-data` payload was truncated on the bus
    #[error("Not a credential document: {0}")]
    Decode(String),

    /// Payload is valid JSON but its top level is not an object.
    #[error("Credential document must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    /// Document could not be serialized.
    #[error("Failed to encode credential document: {0}")]
    Encode(String),

    /// A flag topic carried a token neither node understands.
    #[error("Unknown flag token: {0:?}")]
    UnknownFlag(String),

    /// Node role string did not match a known role.
    #[error("Unknown node role: '{0}'. Valid options: terminal, companion")]
    UnknownRole(String),

    /// Two logical channels were mapped onto the same wire topic.
    #[error("Topic '{topic}' is assigned to both {first} and {second}")]
    DuplicateTopic {
        topic: String,
        first: &'static str,
        second: &'static str,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Decode(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors for presence-check input.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field has the wrong number of characters.
    #[error("{field} must be exactly {expected} characters, got {actual}")]
    WrongLength {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (non-digit PIN, non-hex UID, wildcard in topic).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::NotAnObject { found: "array" };
        assert_eq!(
            err.to_string(),
            "Credential document must be a JSON object, got array"
        );

        let err = CoreError::UnknownFlag("start".into());
        assert_eq!(err.to_string(), "Unknown flag token: \"start\"");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "pin".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }

    #[test]
    fn test_json_error_becomes_decode() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(CoreError::from(err), CoreError::Decode(_)));
    }
}
