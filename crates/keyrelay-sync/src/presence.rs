//! # Presence Trigger
//!
//! The embedded-side event source that gates a pull: a card reader polled
//! on an interval and a keypad that collects a four-digit PIN. Both only
//! publish onto the bus; neither knows about the sync handshake.
//!
//! ```text
//!   CardReader::poll() ──(every 1s)──► format_card_uid ──► presence topic
//!   PinPad::press(d) ×4 ─────────────────────────────────► pin topic
//! ```
//!
//! A card that stays on the reader is reported once; it is reported again
//! only after it has been removed.

use std::time::Duration;

use keyrelay_core::validation::{format_card_uid, validate_pin};
use keyrelay_core::{Channel, TopicMap, PIN_LENGTH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{BusClient, BusEvent};
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Card Reader Seam
// =============================================================================

/// Source of raw card UIDs (implemented by the reader driver).
pub trait CardReader: Send {
    /// Returns the UID of the card currently on the reader, if any.
    fn poll(&mut self) -> SyncResult<Option<Vec<u8>>>;
}

// =============================================================================
// PIN Pad
// =============================================================================

/// Collects keypad digits until a full PIN is entered.
#[derive(Debug, Default)]
pub struct PinPad {
    digits: String,
}

impl PinPad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one key press. Returns the PIN once [`PIN_LENGTH`] digits are in,
    /// and starts over.
    pub fn press(&mut self, key: char) -> SyncResult<Option<String>> {
        if !key.is_ascii_digit() {
            return Err(SyncError::InvalidMessage(format!(
                "Keypad sent non-digit {:?}",
                key
            )));
        }

        self.digits.push(key);
        if self.digits.len() < PIN_LENGTH {
            return Ok(None);
        }

        Ok(Some(std::mem::take(&mut self.digits)))
    }

    /// Discards a partially entered PIN.
    pub fn clear(&mut self) {
        self.digits.clear();
    }

    pub fn entered(&self) -> usize {
        self.digits.len()
    }
}

// =============================================================================
// Presence Trigger
// =============================================================================

/// Publishes card taps and PINs onto the bus.
pub struct PresenceTrigger<R: CardReader, B: BusClient> {
    reader: R,
    bus: B,
    topics: TopicMap,
    connected: bool,
    last_uid: Option<String>,
}

impl<R: CardReader, B: BusClient> PresenceTrigger<R, B> {
    pub fn new(reader: R, bus: B, topics: TopicMap) -> Self {
        PresenceTrigger {
            reader,
            bus,
            topics,
            connected: false,
            last_uid: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Tracks bus connectivity. Inbound messages are not expected.
    pub fn handle_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected => {
                info!("Presence trigger connected");
                self.connected = true;
            }
            BusEvent::Disconnected => {
                self.connected = false;
            }
            BusEvent::Message { topic, .. } => debug!(topic = %topic, "Ignoring inbound message"),
        }
    }

    /// Polls the reader once and publishes a newly presented card.
    ///
    /// Returns the published UID.
    pub fn poll_once(&mut self) -> SyncResult<Option<String>> {
        let uid = match self.reader.poll()? {
            Some(raw) if !raw.is_empty() => format_card_uid(&raw),
            _ => {
                self.last_uid = None;
                return Ok(None);
            }
        };

        if self.last_uid.as_deref() == Some(uid.as_str()) {
            return Ok(None);
        }

        self.publish(Channel::Presence, uid.as_bytes())?;
        info!(uid = %uid, "Card presented");
        self.last_uid = Some(uid.clone());
        Ok(Some(uid))
    }

    /// Publishes a complete PIN.
    pub fn submit_pin(&mut self, pin: &str) -> SyncResult<()> {
        validate_pin(pin).map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        self.publish(Channel::Pin, pin.as_bytes())?;
        info!("PIN submitted");
        Ok(())
    }

    /// Polls the reader on `interval` until shutdown, submitting PINs that
    /// arrive on `pins`.
    pub async fn run(
        mut self,
        interval: Duration,
        mut events: mpsc::Receiver<BusEvent>,
        mut pins: mpsc::Receiver<String>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.connected {
                        continue;
                    }
                    if let Err(e) = self.poll_once() {
                        warn!(error = %e, "Card poll failed");
                    }
                }
                Some(pin) = pins.recv() => {
                    if let Err(e) = self.submit_pin(&pin) {
                        warn!(error = %e, "PIN not submitted");
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = shutdown_rx.recv() => {
                    info!("Presence trigger received shutdown");
                    break;
                }
            }
        }

        let _ = self.bus.disconnect();
        info!("Presence trigger stopped");
    }

    fn publish(&mut self, channel: Channel, payload: &[u8]) -> SyncResult<()> {
        let topic = self.topics.name(channel);
        if !self.connected {
            return Err(SyncError::NotConnected {
                operation: channel.logical_name(),
            });
        }
        self.bus.publish(topic, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingBus;
    use std::collections::VecDeque;

    struct ScriptedReader {
        polls: VecDeque<Option<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(polls: Vec<Option<Vec<u8>>>) -> Self {
            ScriptedReader {
                polls: polls.into(),
            }
        }
    }

    impl CardReader for ScriptedReader {
        fn poll(&mut self) -> SyncResult<Option<Vec<u8>>> {
            Ok(self.polls.pop_front().flatten())
        }
    }

    fn trigger(polls: Vec<Option<Vec<u8>>>) -> (PresenceTrigger<ScriptedReader, RecordingBus>, RecordingBus) {
        let bus = RecordingBus::new();
        let mut trigger =
            PresenceTrigger::new(ScriptedReader::new(polls), bus.clone(), TopicMap::default());
        trigger.handle_event(BusEvent::Connected);
        (trigger, bus)
    }

    #[test]
    fn test_card_published_once_while_present() {
        let card = vec![0x04, 0xa1, 0xb2, 0xc3];
        let (mut trigger, bus) = trigger(vec![
            Some(card.clone()),
            Some(card.clone()),
            None,
            Some(card),
        ]);

        assert_eq!(trigger.poll_once().unwrap().as_deref(), Some("04A1B2C3"));
        assert_eq!(trigger.poll_once().unwrap(), None);
        assert_eq!(trigger.poll_once().unwrap(), None);
        assert_eq!(trigger.poll_once().unwrap().as_deref(), Some("04A1B2C3"));

        assert_eq!(
            bus.published(),
            vec![
                ("rfid".to_string(), b"04A1B2C3".to_vec()),
                ("rfid".to_string(), b"04A1B2C3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_no_publish_while_disconnected() {
        let (mut trigger, bus) = trigger(vec![Some(vec![0x01])]);
        trigger.handle_event(BusEvent::Disconnected);

        assert!(matches!(
            trigger.poll_once(),
            Err(SyncError::NotConnected { .. })
        ));
        assert!(bus.published().is_empty());
    }

    #[test]
    fn test_submit_pin() {
        let (mut trigger, bus) = trigger(vec![]);
        trigger.submit_pin("1234").unwrap();
        assert!(trigger.submit_pin("12").is_err());
        assert_eq!(bus.published(), vec![("pin".to_string(), b"1234".to_vec())]);
    }

    #[test]
    fn test_pin_pad_collects_four_digits() {
        let mut pad = PinPad::new();
        assert_eq!(pad.press('1').unwrap(), None);
        assert_eq!(pad.press('2').unwrap(), None);
        assert_eq!(pad.press('3').unwrap(), None);
        assert_eq!(pad.press('4').unwrap().as_deref(), Some("1234"));
        assert_eq!(pad.entered(), 0);

        assert!(pad.press('#').is_err());
        pad.press('9').unwrap();
        pad.clear();
        assert_eq!(pad.entered(), 0);
    }
}
