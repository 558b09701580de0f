//! # keyrelay-sync: Sync Protocol Engine for KeyRelay
//!
//! This crate moves the credential store between the desk terminal and the
//! companion device over an MQTT bus, using a flag-then-payload handshake.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │   TERMINAL NODE                              COMPANION NODE             │
//! │   ─────────────                              ──────────────             │
//! │  ┌────────────────┐                        ┌────────────────────┐      │
//! │  │   SyncAgent    │                        │ CompanionResponder │      │
//! │  │ (single actor) │                        │                    │      │
//! │  └───────┬────────┘                        │ merge pushes       │      │
//! │          ▼                                 │ card + PIN gate    │      │
//! │  ┌────────────────┐     request-flag       │ reply to pulls     │      │
//! │  │ SyncController │ ─── request-data ────► │                    │      │
//! │  │ DeferredQueue  │ ◄── response-data ──── │                    │      │
//! │  └───────┬────────┘     response-flag      └─────────▲──────────┘      │
//! │          │                                           │ presence, pin   │
//! │          ▼                                 ┌─────────┴──────────┐      │
//! │   CredentialStore                          │  PresenceTrigger   │      │
//! │   (atomic replace)                         │ CardReader, PinPad │      │
//! │                                            └────────────────────┘      │
//! │                                                                         │
//! │   All bus I/O goes through BusClient (MqttBus in production).          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent` actor and its handle
//! - [`bus`] - `BusClient` trait and `BusEvent`
//! - [`companion`] - Device-side responder
//! - [`config`] - Relay configuration (TOML + environment)
//! - [`controller`] - Terminal-side handshake state machine
//! - [`deferred`] - Deferred-send queue
//! - [`error`] - Sync error types
//! - [`mqtt`] - MQTT bus client with reconnection
//! - [`presence`] - Card reader polling and PIN entry
//! - [`report`] - Status reports for the presentation layer
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keyrelay_sync::{MqttBus, MqttConfig, RelayConfig, SyncAgent, SyncController};
//!
//! let config = RelayConfig::load(None)?;
//! let (bus, events) = MqttBus::spawn(MqttConfig::from_relay(&config)?);
//! let controller = SyncController::new(bus, store, config.topics.clone(), reporter);
//! let (agent, handle) = SyncAgent::new(controller, events, config.sync.tick_interval());
//! agent.spawn();
//!
//! let report = handle.request_upload().await?;
//! println!("{}", report);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod bus;
pub mod companion;
pub mod config;
pub mod controller;
pub mod deferred;
pub mod error;
pub mod mqtt;
pub mod presence;
pub mod report;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentStatus, SyncAgent, SyncAgentHandle};
pub use bus::{BusClient, BusEvent, OfflineBus};
pub use companion::CompanionResponder;
pub use config::{BusSettings, NodeConfig, RelayConfig, StoreSettings, SyncSettings};
pub use controller::{SessionState, SyncController};
pub use deferred::{DeferredAction, DeferredQueue};
pub use error::{SyncError, SyncResult};
pub use mqtt::{MqttBus, MqttConfig};
pub use presence::{CardReader, PinPad, PresenceTrigger};
pub use report::{
    ChannelReporter, LogReporter, NoOpReporter, Operation, Progress, StatusLevel, StatusReport,
    StatusReporter,
};
