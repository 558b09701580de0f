//! # keyrelay-core: Pure Protocol Types for KeyRelay
//!
//! This crate holds the vocabulary shared by both nodes of a KeyRelay
//! deployment: the credential document codec, the topic contract, the flag
//! tokens and the presence-check validators. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        KeyRelay Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    keyrelay CLI (apps/cli)                      │   │
//! │  │     upload ──► download ──► save ──► companion ──► presence    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    keyrelay-sync                                │   │
//! │  │      SyncAgent ─► SyncController ─► BusClient (MQTT)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ keyrelay-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────┐  ┌────────────┐  ┌────────────────────────┐   │   │
//! │  │   │  document  │  │   topic    │  │      validation        │   │   │
//! │  │   │  Codec     │  │  TopicMap  │  │  PIN, card UID         │   │   │
//! │  │   │  Merge     │  │  Flag      │  │                        │   │   │
//! │  │   └────────────┘  └────────────┘  └────────────────────────┘   │   │
//! │  │                                                                 │   │
//! │  │           NO I/O • NO FILES • NO NETWORK • PURE FUNCTIONS       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`] - `CredentialDocument` and its JSON codec
//! - [`topic`] - Bus channels, wire topic names, flag tokens, node roles
//! - [`validation`] - PIN and card identifier rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use keyrelay_core::CredentialDocument;
//!
//! let doc = CredentialDocument::decode(br#"{"site":"example.com"}"#).unwrap();
//! let bytes = doc.encode().unwrap();
//! assert_eq!(CredentialDocument::decode(&bytes).unwrap(), doc);
//! assert!(!CredentialDocument::validate(b"not json"));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod document;
pub mod error;
pub mod topic;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use document::{CredentialDocument, MergeOutcome};
pub use error::{CoreError, CoreResult, ValidationError};
pub use topic::{Channel, Flag, NodeRole, TopicMap};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Number of digits the companion keypad collects before submitting a PIN.
pub const PIN_LENGTH: usize = 4;

/// Longest card UID an ISO 14443 reader reports (triple-size UID).
pub const MAX_CARD_UID_BYTES: usize = 10;

/// Default port of the message bus broker shared by both nodes.
pub const DEFAULT_BUS_PORT: u16 = 9999;
