//! # MQTT Transport
//!
//! [`BusClient`] over an MQTT broker, with automatic reconnection and backoff.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MQTT Event Loop Task                               │
//! │                                                                         │
//! │  ┌────────────┐   ConnAck    ┌────────────┐                            │
//! │  │Disconnected│ ───────────► │ Connected  │ ──► BusEvent::Connected    │
//! │  └────────────┘              └─────┬──────┘                            │
//! │        ▲                           │ Publish ──► BusEvent::Message     │
//! │        │                           │                                    │
//! │        │                     poll() error                               │
//! │        │                           ▼                                    │
//! │        │                     ┌────────────┐                             │
//! │        └──────────────────── │  Backoff   │ ──► BusEvent::Disconnected  │
//! │              timer expired   └────────────┘     (once per outage)       │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential with Jitter)                            │
//! │  Attempt 1: 500ms, Attempt 2: 1s, Attempt 3: 2s ... Max: 60s           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sessions are clean: the broker forgets subscriptions on every reconnect,
//! so consumers renew them on each [`BusEvent::Connected`].

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::{BusClient, BusEvent};
use crate::config::RelayConfig;
use crate::error::{SyncError, SyncResult};

/// Capacity of the channel carrying [`BusEvent`]s to the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 100;

// =============================================================================
// Transport Configuration
// =============================================================================

/// Settings for one MQTT connection.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub qos: QoS,
    pub max_packet_bytes: usize,
    pub queue_capacity: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl MqttConfig {
    /// Builds the transport settings from a validated relay config.
    pub fn from_relay(config: &RelayConfig) -> SyncResult<Self> {
        Ok(MqttConfig {
            client_id: config.node.client_id.clone(),
            host: config.bus.host.clone(),
            port: config.bus.port,
            keep_alive: config.bus.keep_alive(),
            qos: qos_from_level(config.bus.qos)?,
            max_packet_bytes: config.bus.max_packet_bytes,
            queue_capacity: config.bus.queue_capacity,
            initial_backoff: config.bus.initial_backoff(),
            max_backoff: config.bus.max_backoff(),
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true)
            .set_max_packet_size(self.max_packet_bytes, self.max_packet_bytes);
        options
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

fn qos_from_level(level: u8) -> SyncResult<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(SyncError::InvalidConfig(format!("Invalid QoS level: {}", other))),
    }
}

// =============================================================================
// MQTT Bus
// =============================================================================

/// MQTT-backed bus client.
///
/// ## Usage
/// ```rust,ignore
/// let (bus, events) = MqttBus::spawn(MqttConfig::from_relay(&config)?);
/// let controller = SyncController::new(bus, store, config.topics.clone(), reporter);
/// ```
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
}

impl MqttBus {
    /// Creates the client and spawns its event loop task.
    ///
    /// Returns the client and the receiver for lifecycle and message events.
    /// Must be called inside a Tokio runtime.
    pub fn spawn(config: MqttConfig) -> (MqttBus, mpsc::Receiver<BusEvent>) {
        let (client, eventloop) = AsyncClient::new(config.options(), config.queue_capacity);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let backoff = config.backoff();
        info!(
            client_id = %config.client_id,
            broker = %format!("{}:{}", config.host, config.port),
            "MQTT transport starting"
        );
        tokio::spawn(drive_event_loop(eventloop, events_tx, backoff));

        (
            MqttBus {
                client,
                qos: config.qos,
            },
            events_rx,
        )
    }
}

impl BusClient for MqttBus {
    fn subscribe(&mut self, topic: &str) -> SyncResult<()> {
        self.client
            .try_subscribe(topic, self.qos)
            .map_err(|e| SyncError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> SyncResult<()> {
        self.client
            .try_publish(topic, self.qos, false, payload.to_vec())
            .map_err(|e| SyncError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn disconnect(&mut self) -> SyncResult<()> {
        self.client.try_disconnect()?;
        Ok(())
    }
}

// =============================================================================
// Event Loop Task
// =============================================================================

/// Polls the MQTT event loop until the consumer goes away.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    events_tx: mpsc::Sender<BusEvent>,
    mut backoff: ExponentialBackoff,
) {
    let mut connected = false;

    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    warn!(code = ?ack.code, "Broker refused connection");
                    continue;
                }
                info!("MQTT connected");
                backoff.reset();
                connected = true;
                Some(BusEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, bytes = publish.payload.len(), "Received message");
                Some(BusEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                })
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                info!("MQTT disconnect requested");
                break;
            }
            Ok(_) => None,
            Err(e) => {
                let lost = std::mem::replace(&mut connected, false);
                if lost {
                    warn!(error = %e, "MQTT connection lost");
                } else {
                    error!(error = %e, "MQTT connection failed");
                }

                if lost && events_tx.send(BusEvent::Disconnected).await.is_err() {
                    break;
                }

                let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                debug!(?delay, "Waiting before reconnect");
                tokio::time::sleep(delay).await;
                None
            }
        };

        if let Some(event) = event {
            if events_tx.send(event).await.is_err() {
                debug!("Bus event receiver dropped");
                break;
            }
        }
    }

    if connected {
        let _ = events_tx.send(BusEvent::Disconnected).await;
    }
    info!("MQTT transport stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_level(3).is_err());
    }

    #[test]
    fn test_config_from_relay() {
        let mut relay = RelayConfig::default();
        relay.node.client_id = "desk".to_string();
        relay.bus.qos = 1;

        let config = MqttConfig::from_relay(&relay).unwrap();

        assert_eq!(config.client_id, "desk");
        assert_eq!(config.port, 9999);
        assert_eq!(config.qos, QoS::AtLeastOnce);
        assert_eq!(config.initial_backoff, Duration::from_millis(500));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_bounds() {
        let config = MqttConfig::from_relay(&RelayConfig::default()).unwrap();
        let mut backoff = config.backoff();
        for _ in 0..20 {
            let delay = backoff.next_backoff().unwrap();
            assert!(delay <= Duration::from_secs(90));
        }
    }
}
