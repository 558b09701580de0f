//! # Sync Controller
//!
//! The terminal-side handshake state machine. It owns the bus client, the
//! persisted store and the deferred queue, and is driven by exactly one
//! caller at a time (the [`SyncAgent`](crate::agent::SyncAgent) actor).
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Controller States                                │
//! │                                                                         │
//! │  ┌──────────────┐  Connected: fire deferred, subscribe  ┌────────────┐ │
//! │  │ Disconnected │ ─────────────────────────────────────► │    Idle    │ │
//! │  └──────────────┘ ◄───────────────────────────────────── └─────┬──────┘ │
//! │         ▲                    Disconnected                 │    ▲        │
//! │         │                                   request_      │    │ response│
//! │         │ Disconnected                      download()    │    │ timeout │
//! │         │ (session abandoned)                             ▼    │ decode  │
//! │         │                               ┌───────────────────────┴─┐    │
//! │         └────────────────────────────── │  AwaitingPullResponse   │    │
//! │                                          └─────────────────────────┘    │
//! │                                                                         │
//! │  UPLOAD:  read store ─► publish request-data ─► publish send_start_flag│
//! │           (data failure: no flag)                                      │
//! │  SAVE:    decode text ─► write_atomic (any state, never touches bus)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A second download while one is awaiting its reply is refused with
//! [`SyncError::SessionBusy`]; a late reply can therefore never be taken
//! for the answer to a newer request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use keyrelay_core::{Channel, CredentialDocument, Flag, NodeRole, TopicMap};
use keyrelay_store::CredentialStore;
use tracing::{debug, info, warn};

use crate::bus::{BusClient, BusEvent};
use crate::deferred::{DeferredAction, DeferredQueue};
use crate::error::{SyncError, SyncResult};
use crate::report::{Operation, Progress, StatusReport, StatusReporter};

// =============================================================================
// Session State
// =============================================================================

/// Where the controller is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Idle,
    AwaitingPullResponse { since: Instant },
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self, SessionState::AwaitingPullResponse { .. })
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Idle => write!(f, "idle"),
            SessionState::AwaitingPullResponse { .. } => write!(f, "awaiting pull response"),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Terminal-side sync controller.
pub struct SyncController<B: BusClient> {
    bus: B,
    store: CredentialStore,
    topics: TopicMap,
    state: SessionState,
    deferred: DeferredQueue,
    pull_timeout: Option<Duration>,
    reporter: Arc<dyn StatusReporter>,
}

impl<B: BusClient> SyncController<B> {
    pub fn new(
        bus: B,
        store: CredentialStore,
        topics: TopicMap,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        SyncController {
            bus,
            store,
            topics,
            state: SessionState::Disconnected,
            deferred: DeferredQueue::new(),
            pull_timeout: None,
            reporter,
        }
    }

    /// Sets how long a download waits for `response-data`.
    pub fn with_pull_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pull_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    // =========================================================================
    // User Requests
    // =========================================================================

    /// Pushes the stored document to the companion.
    pub fn request_upload(&mut self) -> SyncResult<Progress> {
        let result = if self.state.is_connected() {
            self.upload_now()
        } else {
            self.defer(DeferredAction::Upload)
        };
        self.finish(Operation::Upload, result)
    }

    /// Asks the companion for its document.
    pub fn request_download(&mut self) -> SyncResult<Progress> {
        let result = match self.state {
            SessionState::Disconnected => self.defer(DeferredAction::Download),
            SessionState::AwaitingPullResponse { .. } => Err(SyncError::SessionBusy),
            SessionState::Idle => self.download_now(),
        };
        self.finish(Operation::Download, result)
    }

    /// Validates `text` and replaces the stored document with it.
    pub fn request_save(&mut self, text: &str) -> SyncResult<Progress> {
        let result = self.save(text);
        self.finish(Operation::Save, result)
    }

    // =========================================================================
    // Bus Events
    // =========================================================================

    /// Applies one bus event.
    pub fn handle_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected => self.on_connected(),
            BusEvent::Disconnected => self.on_disconnected(),
            BusEvent::Message { topic, payload } => self.on_message(&topic, &payload),
        }
    }

    /// Expires an outstanding download whose timeout has passed.
    pub fn tick(&mut self, now: Instant) {
        let (SessionState::AwaitingPullResponse { since }, Some(timeout)) =
            (self.state, self.pull_timeout)
        else {
            return;
        };

        if now.saturating_duration_since(since) >= timeout {
            warn!(timeout_secs = timeout.as_secs(), "Download timed out, session reset");
            self.state = SessionState::Idle;
            let result = Err(SyncError::PullTimedOut {
                after_secs: timeout.as_secs(),
            });
            let _ = self.finish(Operation::Download, result);
        }
    }

    fn on_connected(&mut self) {
        if self.state.is_awaiting() {
            warn!("Reconnected while a download was outstanding, session abandoned");
        }
        self.state = SessionState::Idle;
        info!("Bus connected");

        let actions = self.deferred.drain_on_connect();
        let fired = actions.len();
        for action in actions {
            debug!(action = action.name(), "Firing deferred action");
            match action {
                DeferredAction::Upload => {
                    let result = self.upload_now();
                    let _ = self.finish(Operation::Upload, result);
                }
                DeferredAction::Download => {
                    let result = self.download_now();
                    let _ = self.finish(Operation::Download, result);
                }
            }
        }

        let result = self.subscribe_all().map(|subscribed| Progress::Connected { fired, subscribed });
        let _ = self.finish(Operation::Connection, result);
    }

    fn on_disconnected(&mut self) {
        if !self.state.is_connected() {
            return;
        }
        let abandoned_pull = self.state.is_awaiting();
        self.state = SessionState::Disconnected;
        warn!(abandoned_pull, "Bus disconnected");
        let _ = self.finish(Operation::Connection, Ok(Progress::Disconnected { abandoned_pull }));
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        match self.topics.channel_of(topic) {
            Some(Channel::ResponseData) => {
                if !self.state.is_awaiting() {
                    debug!(topic, bytes = payload.len(), "Ignoring response data outside a download");
                    return;
                }
                // Any reply ends the session, a malformed one included.
                self.state = SessionState::Idle;
                let result = self.accept_pull_response(payload);
                let _ = self.finish(Operation::Download, result);
            }
            Some(Channel::ResponseFlag) => match Flag::parse(payload) {
                Ok(Flag::PullEnd) => debug!(awaiting = self.state.is_awaiting(), "Companion finished pull reply"),
                Ok(other) => debug!(flag = %other, "Unexpected flag on response channel"),
                Err(e) => warn!(error = %e, "Unreadable response flag"),
            },
            Some(channel) => {
                debug!(%channel, bytes = payload.len(), "Ignoring message on outbound channel");
            }
            None => debug!(topic, "Ignoring message on unknown topic"),
        }
    }

    // =========================================================================
    // Steps
    // =========================================================================

    fn defer(&mut self, action: DeferredAction) -> SyncResult<Progress> {
        if self.deferred.enqueue(action) {
            debug!(action = action.name(), "Replaced pending deferred request");
        }
        Err(SyncError::NotConnected {
            operation: action.name(),
        })
    }

    fn upload_now(&mut self) -> SyncResult<Progress> {
        let bytes = self.store.read().map_err(SyncError::store_read)?;

        self.publish(Channel::RequestData, &bytes)?;
        // Only after the data was accepted: a bare flag would desync the peer.
        self.publish(Channel::RequestFlag, Flag::SendStart.as_str().as_bytes())?;

        Ok(Progress::Uploaded { bytes: bytes.len() })
    }

    fn download_now(&mut self) -> SyncResult<Progress> {
        self.publish(Channel::RequestFlag, Flag::PullStart.as_str().as_bytes())?;
        self.state = SessionState::AwaitingPullResponse {
            since: Instant::now(),
        };
        Ok(Progress::PullRequested)
    }

    fn accept_pull_response(&mut self, payload: &[u8]) -> SyncResult<Progress> {
        let doc = CredentialDocument::decode(payload)?;
        self.store.write_document(&doc).map_err(SyncError::store_write)?;
        Ok(Progress::PullCompleted { entries: doc.len() })
    }

    fn save(&mut self, text: &str) -> SyncResult<Progress> {
        let doc = CredentialDocument::decode(text.as_bytes())?;
        self.store.write_document(&doc).map_err(SyncError::store_write)?;
        Ok(Progress::Saved { entries: doc.len() })
    }

    fn subscribe_all(&mut self) -> SyncResult<usize> {
        let channels = NodeRole::Terminal.inbound_channels();
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
        let topic = self.topics.name(channel);
        debug!(%channel, topic, bytes = payload.len(), "Publishing");
        self.bus.publish(topic, payload).map_err(|e| match e {
            err @ SyncError::PublishFailed { .. } => err,
            other => SyncError::PublishFailed {
                topic: topic.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn finish(&self, operation: Operation, result: SyncResult<Progress>) -> SyncResult<Progress> {
        self.reporter
            .report(&StatusReport::from_result(operation, &result));
        result
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingBus;
    use crate::report::{ChannelReporter, StatusLevel};
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    const DOC: &str = r#"{"site":"example.com","user":"a","pass":"x"}"#;
    const PRETTY: &str =
        "{\n    \"pass\": \"x\",\n    \"site\": \"example.com\",\n    \"user\": \"a\"\n}\n";

    struct Harness {
        _dir: TempDir,
        bus: RecordingBus,
        controller: SyncController<RecordingBus>,
        reports: UnboundedReceiver<StatusReport>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = CredentialStore::new(dir.path().join("passwords.json"));
            let bus = RecordingBus::new();
            let (reporter, reports) = ChannelReporter::new();
            let controller =
                SyncController::new(bus.clone(), store, TopicMap::default(), Arc::new(reporter))
                    .with_pull_timeout(Some(Duration::from_secs(120)));
            Harness {
                _dir: dir,
                bus,
                controller,
                reports,
            }
        }

        fn connected() -> Self {
            let mut h = Self::new();
            h.controller.handle_event(BusEvent::Connected);
            h.bus.clear();
            h.drain_reports();
            h
        }

        fn drain_reports(&mut self) -> Vec<StatusReport> {
            let mut out = Vec::new();
            while let Ok(report) = self.reports.try_recv() {
                out.push(report);
            }
            out
        }

        fn store_bytes(&self) -> Vec<u8> {
            self.controller.store().read().unwrap()
        }
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    #[test]
    fn test_connect_subscribes_terminal_topics() {
        let mut h = Harness::new();
        h.controller.handle_event(BusEvent::Connected);

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(
            h.bus.subscribed(),
            vec!["rpi-to-pc-data", "rpi-to-pc-flag"]
        );
        let reports = h.drain_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].operation, Operation::Connection);
    }

    #[test]
    fn test_disconnect_abandons_session() {
        let mut h = Harness::connected();
        h.controller.request_download().unwrap();
        assert!(h.controller.state().is_awaiting());

        h.controller.handle_event(BusEvent::Disconnected);
        assert_eq!(h.controller.state(), SessionState::Disconnected);

        // A late reply after reconnecting is not taken for a download.
        h.controller.handle_event(BusEvent::Connected);
        h.controller
            .handle_event(BusEvent::message("rpi-to-pc-data", DOC));
        assert!(h.controller.store().read().is_err());
    }

    // -------------------------------------------------------------------------
    // Upload
    // -------------------------------------------------------------------------

    #[test]
    fn test_upload_publishes_data_then_flag() {
        let mut h = Harness::connected();
        h.controller.request_save(DOC).unwrap();

        let progress = h.controller.request_upload().unwrap();

        assert_eq!(progress, Progress::Uploaded { bytes: PRETTY.len() });
        assert_eq!(
            h.bus.published(),
            vec![
                ("pc-to-rpi-data".to_string(), PRETTY.as_bytes().to_vec()),
                ("pc-to-rpi-flag".to_string(), b"send_start_flag".to_vec()),
            ]
        );
    }

    #[test]
    fn test_failed_data_publish_sends_no_flag() {
        let mut h = Harness::connected();
        h.controller.request_save(DOC).unwrap();
        h.bus.fail_topic("pc-to-rpi-data");

        let result = h.controller.request_upload();

        assert!(matches!(result, Err(SyncError::PublishFailed { .. })));
        assert!(h.bus.published().is_empty());
        // Still usable afterwards.
        assert!(h.controller.request_download().is_ok());
    }

    #[test]
    fn test_upload_without_store_reports_read_failure() {
        let mut h = Harness::connected();
        let result = h.controller.request_upload();
        assert!(matches!(result, Err(SyncError::StoreReadFailed(_))));
        assert!(h.bus.published().is_empty());
    }

    #[test]
    fn test_deferred_upload_fires_once_after_connect() {
        let mut h = Harness::new();
        h.controller.request_save(r#"{"v":1}"#).unwrap();

        let first = h.controller.request_upload();
        assert!(matches!(first, Err(SyncError::NotConnected { operation: "upload" })));
        let _ = h.controller.request_upload();
        assert!(h.bus.published().is_empty());
        assert_eq!(h.controller.deferred().len(), 1);

        // The store changes before connect; the current contents are sent.
        h.controller.request_save(DOC).unwrap();
        h.controller.handle_event(BusEvent::Connected);

        assert_eq!(
            h.bus.published(),
            vec![
                ("pc-to-rpi-data".to_string(), PRETTY.as_bytes().to_vec()),
                ("pc-to-rpi-flag".to_string(), b"send_start_flag".to_vec()),
            ]
        );
        assert!(h.controller.deferred().is_empty());

        h.controller.handle_event(BusEvent::Disconnected);
        h.controller.handle_event(BusEvent::Connected);
        assert_eq!(h.bus.published().len(), 2);
    }

    #[test]
    fn test_deferred_actions_fire_before_subscribing() {
        let mut h = Harness::new();
        let _ = h.controller.request_download();
        h.controller.handle_event(BusEvent::Connected);

        assert_eq!(h.bus.published_topics(), vec!["pc-to-rpi-flag"]);
        assert!(h.controller.state().is_awaiting());
        assert_eq!(h.bus.subscribed().len(), 2);

        let reports = h.drain_reports();
        let ops: Vec<_> = reports.iter().map(|r| r.operation).collect();
        assert_eq!(
            ops,
            vec![Operation::Download, Operation::Download, Operation::Connection]
        );
    }

    // -------------------------------------------------------------------------
    // Download
    // -------------------------------------------------------------------------

    #[test]
    fn test_download_end_to_end() {
        let mut h = Harness::connected();

        assert_eq!(h.controller.request_download().unwrap(), Progress::PullRequested);
        assert_eq!(
            h.bus.published(),
            vec![("pc-to-rpi-flag".to_string(), b"pull-start-flag".to_vec())]
        );

        h.controller
            .handle_event(BusEvent::message("rpi-to-pc-data", DOC));

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.store_bytes(), PRETTY.as_bytes());
        let reports = h.drain_reports();
        let last = reports.last().unwrap();
        assert_eq!(last.operation, Operation::Download);
        assert_eq!(last.level, StatusLevel::Success);
        assert!(!last.pending);
    }

    #[test]
    fn test_second_download_is_busy() {
        let mut h = Harness::connected();
        h.controller.request_download().unwrap();

        assert!(matches!(
            h.controller.request_download(),
            Err(SyncError::SessionBusy)
        ));
        assert_eq!(h.bus.published().len(), 1);
    }

    #[test]
    fn test_response_consumed_only_once() {
        let mut h = Harness::connected();
        h.controller.request_download().unwrap();

        h.controller
            .handle_event(BusEvent::message("rpi-to-pc-data", DOC));
        h.controller
            .handle_event(BusEvent::message("rpi-to-pc-data", r#"{"other":true}"#));

        assert_eq!(h.store_bytes(), PRETTY.as_bytes());
        let downloads = h
            .drain_reports()
            .into_iter()
            .filter(|r| r.operation == Operation::Download && !r.pending)
            .count();
        assert_eq!(downloads, 1);
    }

    #[test]
    fn test_malformed_response_resets_session() {
        let mut h = Harness::connected();
        h.controller.request_save(DOC).unwrap();
        h.controller.request_download().unwrap();
        h.drain_reports();

        h.controller
            .handle_event(BusEvent::message("rpi-to-pc-data", "{broken"));

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.store_bytes(), PRETTY.as_bytes());
        let reports = h.drain_reports();
        assert!(reports[0].is_error());
        assert!(h.controller.request_download().is_ok());
    }

    #[test]
    fn test_unrelated_traffic_is_ignored() {
        let mut h = Harness::connected();
        h.controller.request_download().unwrap();

        h.controller
            .handle_event(BusEvent::message("weather", DOC));
        h.controller
            .handle_event(BusEvent::message("pc-to-rpi-data", DOC));
        h.controller
            .handle_event(BusEvent::message("rpi-to-pc-flag", "pull-end-flag"));

        assert!(h.controller.state().is_awaiting());
        assert!(h.controller.store().read().is_err());
    }

    #[test]
    fn test_pull_timeout() {
        let mut h = Harness::connected();
        h.controller.request_download().unwrap();
        h.drain_reports();

        h.controller.tick(Instant::now() + Duration::from_secs(60));
        assert!(h.controller.state().is_awaiting());

        h.controller.tick(Instant::now() + Duration::from_secs(121));
        assert_eq!(h.controller.state(), SessionState::Idle);
        let reports = h.drain_reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].message.contains("timed out"));
    }

    #[test]
    fn test_no_timeout_when_disabled() {
        let mut h = Harness::connected();
        h.controller.pull_timeout = None;
        h.controller.request_download().unwrap();

        h.controller.tick(Instant::now() + Duration::from_secs(86_400));
        assert!(h.controller.state().is_awaiting());
    }

    // -------------------------------------------------------------------------
    // Save
    // -------------------------------------------------------------------------

    #[test]
    fn test_save_is_idempotent() {
        let mut h = Harness::new();
        h.controller.request_save(DOC).unwrap();
        let once = h.store_bytes();
        h.controller.request_save(DOC).unwrap();

        assert_eq!(h.store_bytes(), once);
        assert_eq!(once, PRETTY.as_bytes());
    }

    #[test]
    fn test_save_keeps_wide_integers_exact() {
        let mut h = Harness::new();
        h.controller
            .request_save(r#"{"bank":{"account":123456789012345678901234,"rate":0.10}}"#)
            .unwrap();

        let stored = String::from_utf8(h.store_bytes()).unwrap();
        assert!(stored.contains("\"account\": 123456789012345678901234"));
        assert!(stored.contains("\"rate\": 0.10"));
        assert!(!stored.contains("e+23"));
    }

    #[test]
    fn test_pulled_wide_integers_are_kept_exact() {
        let mut h = Harness::connected();
        h.controller.request_download().unwrap();

        h.controller.handle_event(BusEvent::message(
            "rpi-to-pc-data",
            r#"{"04A1B2C3":{"pin":"1234","card":98765432109876543210987}}"#,
        ));

        let stored = String::from_utf8(h.store_bytes()).unwrap();
        assert!(stored.contains("98765432109876543210987"));
    }

    #[test]
    fn test_save_rejects_invalid_text() {
        let mut h = Harness::new();
        h.controller.request_save(DOC).unwrap();
        h.drain_reports();

        let result = h.controller.request_save("not json");

        assert!(matches!(result, Err(SyncError::DecodeError(_))));
        assert_eq!(h.store_bytes(), PRETTY.as_bytes());
        assert!(h.drain_reports()[0].is_error());
    }

    #[test]
    fn test_save_does_not_touch_bus() {
        let mut h = Harness::new();
        h.controller.request_save(DOC).unwrap();
        assert!(h.bus.published().is_empty());
        assert!(h.controller.deferred().is_empty());
    }
}
