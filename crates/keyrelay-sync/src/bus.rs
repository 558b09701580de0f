//! # Bus Client Adapter
//!
//! The narrow capability the protocol drives: subscribe, publish, and a
//! stream of [`BusEvent`]s. The MQTT implementation lives in
//! [`crate::mqtt`]; tests use an in-memory recorder.
//!
//! ```text
//!   SyncController ──publish/subscribe──► BusClient ──► broker
//!         ▲                                                │
//!         └──────────── BusEvent (mpsc) ◄──────────────────┘
//!                Connected | Disconnected | Message
//! ```

use crate::error::{SyncError, SyncResult};

/// Lifecycle and delivery events coming from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A (re)connection completed. Subscriptions must be renewed.
    Connected,

    /// The connection dropped. The adapter keeps reconnecting.
    Disconnected,

    /// An inbound message on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
}

impl BusEvent {
    pub fn message(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        BusEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound half of a bus connection.
///
/// Both calls queue work and return without waiting for the broker; an
/// `Err` means the request was refused outright.
pub trait BusClient: Send {
    fn subscribe(&mut self, topic: &str) -> SyncResult<()>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> SyncResult<()>;

    /// Closes the connection. Adapters without one do nothing.
    fn disconnect(&mut self) -> SyncResult<()> {
        Ok(())
    }
}

/// A bus that never connects. Used for local-only operations such as save,
/// which must not wait on a broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineBus;

impl BusClient for OfflineBus {
    fn subscribe(&mut self, _topic: &str) -> SyncResult<()> {
        Err(SyncError::NotConnected {
            operation: "subscribe",
        })
    }

    fn publish(&mut self, _topic: &str, _payload: &[u8]) -> SyncResult<()> {
        Err(SyncError::NotConnected { operation: "publish" })
    }
}

// =============================================================================
// In-Memory Bus (tests)
// =============================================================================

#[cfg(test)]
pub(crate) use recording::RecordingBus;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_bus_refuses() {
        let mut bus = OfflineBus;
        assert!(matches!(
            bus.publish("pin", b"1234"),
            Err(SyncError::NotConnected { .. })
        ));
        assert!(bus.subscribe("pin").is_err());
        assert!(bus.disconnect().is_ok());
    }

    #[test]
    fn test_message_constructor() {
        assert_eq!(
            BusEvent::message("rfid", "04A1B2C3"),
            BusEvent::Message {
                topic: "rfid".to_string(),
                payload: b"04A1B2C3".to_vec(),
            }
        );
    }
}
