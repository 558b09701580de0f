//! # Companion Responder
//!
//! The device-side half of the handshake. It keeps the canonical remote
//! copy of the credential store and answers the terminal.
//!
//! ## Message Handling
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Companion Message Flow                              │
//! │                                                                         │
//! │  request-data ──► decode ──► merge existing keys ──► write_atomic      │
//! │                                                                         │
//! │  request-flag                                                          │
//! │    send_start_flag ──► acknowledge push                                │
//! │    pull-start-flag ──► open pull window, clear staged card             │
//! │                                                                         │
//! │  presence (UID) ──► entry exists? ──► stage card   (else: rejected)    │
//! │                                                                         │
//! │  pin ──► staged card? ──► pin matches entry? ──► publish               │
//! │                                    response-data  {uid: entry}         │
//! │                                    response-flag  pull-end-flag        │
//! │                           (else: rejected, card stays staged)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A push can only replace entries the companion already holds; new keys
//! are rejected and logged.

use std::sync::Arc;

use keyrelay_core::validation::{validate_card_uid, validate_pin};
use keyrelay_core::{Channel, CredentialDocument, Flag, NodeRole, TopicMap};
use keyrelay_store::CredentialStore;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{BusClient, BusEvent};
use crate::error::{SyncError, SyncResult};
use crate::report::{Operation, Progress, StatusReport, StatusReporter};

/// Device-side responder.
pub struct CompanionResponder<B: BusClient> {
    bus: B,
    store: CredentialStore,
    topics: TopicMap,
    reporter: Arc<dyn StatusReporter>,
    connected: bool,
    pull_window_open: bool,
    staged_uid: Option<String>,
}

impl<B: BusClient> CompanionResponder<B> {
    pub fn new(
        bus: B,
        store: CredentialStore,
        topics: TopicMap,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        CompanionResponder {
            bus,
            store,
            topics,
            reporter,
            connected: false,
            pull_window_open: false,
            staged_uid: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// UID of the card whose entry will be sent on a PIN match.
    pub fn staged_uid(&self) -> Option<&str> {
        self.staged_uid.as_deref()
    }

    pub fn pull_window_open(&self) -> bool {
        self.pull_window_open
    }

    /// Processes bus events until the stream ends or shutdown is signalled.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<BusEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!(store = %self.store.path().display(), "Companion responder starting");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Bus event stream closed");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Companion responder received shutdown");
                    break;
                }
            }
        }

        if let Err(e) = self.bus.disconnect() {
            warn!(error = %e, "Bus disconnect failed");
        }
        info!("Companion responder stopped");
    }

    /// Applies one bus event.
    pub fn handle_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected => {
                self.connected = true;
                let result = self.subscribe_all().map(|subscribed| Progress::Connected {
                    fired: 0,
                    subscribed,
                });
                self.finish(Operation::Connection, result);
            }
            BusEvent::Disconnected => {
                if !self.connected {
                    return;
                }
                self.connected = false;
                self.pull_window_open = false;
                self.staged_uid = None;
                self.finish(
                    Operation::Connection,
                    Ok(Progress::Disconnected {
                        abandoned_pull: false,
                    }),
                );
            }
            BusEvent::Message { topic, payload } => self.on_message(&topic, &payload),
        }
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        let Some(channel) = self.topics.channel_of(topic) else {
            debug!(topic, "Ignoring message on unknown topic");
            return;
        };

        match channel {
            Channel::RequestData => {
                let result = self.on_push(payload);
                self.finish(Operation::Push, result);
            }
            Channel::RequestFlag => {
                let result = self.on_request_flag(payload);
                self.finish(Operation::PullRequest, result);
            }
            Channel::Presence => {
                let uid = String::from_utf8_lossy(payload).trim().to_string();
                let result = self.on_card(&uid);
                self.finish(Operation::Card, result);
            }
            Channel::Pin => {
                let pin = String::from_utf8_lossy(payload).trim().to_string();
                let result = self.on_pin(&pin);
                self.finish(Operation::Pin, result);
            }
            Channel::ResponseData | Channel::ResponseFlag => {
                debug!(%channel, "Ignoring own outbound traffic");
            }
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    fn on_push(&mut self, payload: &[u8]) -> SyncResult<Progress> {
        let incoming = CredentialDocument::decode(payload)?;
        let mut local = self
            .store
            .read_document_or_empty()
            .map_err(SyncError::store_read)?;

        let outcome = local.merge_existing(&incoming);
        if !outcome.rejected.is_empty() {
            warn!(keys = ?outcome.rejected, "Pushed entries with unknown keys rejected");
        }
        if outcome.changed() {
            self.store
                .write_document(&local)
                .map_err(SyncError::store_write)?;
        }

        Ok(Progress::Merged {
            updated: outcome.updated.len(),
            rejected: outcome.rejected.len(),
        })
    }

    fn on_request_flag(&mut self, payload: &[u8]) -> SyncResult<Progress> {
        match Flag::parse(payload)? {
            Flag::SendStart => Ok(Progress::Acknowledged("push")),
            Flag::PullStart => {
                self.pull_window_open = true;
                self.staged_uid = None;
                info!("Pull requested, waiting for card");
                Ok(Progress::Acknowledged("pull request"))
            }
            Flag::PullEnd => Err(SyncError::InvalidMessage(
                "pull-end-flag on the request channel".to_string(),
            )),
        }
    }

    fn on_card(&mut self, uid: &str) -> SyncResult<Progress> {
        validate_card_uid(uid).map_err(|e| SyncError::InvalidMessage(e.to_string()))?;

        let doc = self
            .store
            .read_document_or_empty()
            .map_err(SyncError::store_read)?;
        if !doc.contains_key(uid) {
            return Err(SyncError::InvalidMessage(format!("Card {} rejected", uid)));
        }

        self.staged_uid = Some(uid.to_string());
        Ok(Progress::CardAccepted {
            uid: uid.to_string(),
        })
    }

    fn on_pin(&mut self, pin: &str) -> SyncResult<Progress> {
        validate_pin(pin).map_err(|e| SyncError::InvalidMessage(e.to_string()))?;

        let uid = self
            .staged_uid
            .clone()
            .ok_or_else(|| SyncError::InvalidMessage("PIN rejected: no card presented".into()))?;

        let doc = self
            .store
            .read_document_or_empty()
            .map_err(SyncError::store_read)?;
        if doc.entry_pin(&uid).as_deref() != Some(pin) {
            return Err(SyncError::InvalidMessage("PIN rejected".into()));
        }

        let reply = doc
            .select(&uid)
            .ok_or_else(|| SyncError::InvalidMessage(format!("Card {} no longer stored", uid)))?;
        let bytes = reply.encode()?;

        if !self.pull_window_open {
            debug!(uid = %uid, "Answering PIN without an open pull request");
        }

        self.publish(Channel::ResponseData, &bytes)?;
        self.publish(Channel::ResponseFlag, Flag::PullEnd.as_str().as_bytes())?;

        self.staged_uid = None;
        self.pull_window_open = false;
        Ok(Progress::PinAccepted { uid })
    }

    // =========================================================================
    // Bus Helpers
    // =========================================================================

    fn subscribe_all(&mut self) -> SyncResult<usize> {
        let channels = NodeRole::Companion.inbound_channels();
        for channel in channels {
            let topic = self.topics.name(*channel);
            self.bus.subscribe(topic).map_err(|e| SyncError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(channels.len())
    }

    fn publish(&mut self, channel: Channel, payload: &[u8]) -> SyncResult<()> {
        if !self.connected {
            return Err(SyncError::PublishFailed {
                topic: self.topics.name(channel).to_string(),
                reason: "not connected".to_string(),
            });
        }
        let topic = self.topics.name(channel);
        debug!(%channel, topic, bytes = payload.len(), "Publishing");
        self.bus.publish(topic, payload)
    }

    fn finish(&self, operation: Operation, result: SyncResult<Progress>) {
        self.reporter
            .report(&StatusReport::from_result(operation, &result));
    }
}
