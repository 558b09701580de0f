//! # Sync Agent
//!
//! The single logical actor of a terminal node. It owns the
//! [`SyncController`] and serializes everything that touches it.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │   SyncAgentHandle (clone per caller)                                   │
//! │      │ upload / download / save / status / shutdown                    │
//! │      ▼                                                                  │
//! │   ┌────────────── commands (mpsc) ─────────────┐                       │
//! │   │                                            ▼                        │
//! │   │   bus events (mpsc) ──────────────► ┌──────────────┐               │
//! │   │                                     │  SyncAgent   │──► reporter   │
//! │   │   tick interval (1s) ─────────────► │  run loop    │               │
//! │   │                                     └──────┬───────┘               │
//! │   │                                            │ &mut                   │
//! │   │                                            ▼                        │
//! │   │                                     SyncController                  │
//! │   └── oneshot reply: StatusReport ◄────────────┘                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing else holds a reference to the controller, so bus callbacks, user
//! requests and timeout checks can never interleave.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bus::{BusClient, BusEvent};
use crate::controller::{SessionState, SyncController};
use crate::deferred::DeferredAction;
use crate::error::{SyncError, SyncResult};
use crate::report::{Operation, StatusReport};

/// Capacity of the command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// Agent Status
// =============================================================================

/// Snapshot of the controller for external queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub connected: bool,
    pub awaiting_pull: bool,
    pub deferred: Vec<DeferredAction>,
}

impl AgentStatus {
    fn of<B: BusClient>(controller: &SyncController<B>) -> Self {
        let state = controller.state();
        AgentStatus {
            connected: state.is_connected(),
            awaiting_pull: matches!(state, SessionState::AwaitingPullResponse { .. }),
            deferred: controller.deferred().pending(),
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

enum AgentCommand {
    Upload(oneshot::Sender<StatusReport>),
    Download(oneshot::Sender<StatusReport>),
    Save {
        text: String,
        reply: oneshot::Sender<StatusReport>,
    },
    Status(oneshot::Sender<AgentStatus>),
    Shutdown,
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Actor wrapping a [`SyncController`].
pub struct SyncAgent<B: BusClient> {
    controller: SyncController<B>,
    events: mpsc::Receiver<BusEvent>,
    commands: mpsc::Receiver<AgentCommand>,
    tick_interval: Duration,
}

impl<B: BusClient + 'static> SyncAgent<B> {
    /// Creates the agent and the handle used to talk to it.
    pub fn new(
        controller: SyncController<B>,
        events: mpsc::Receiver<BusEvent>,
        tick_interval: Duration,
    ) -> (Self, SyncAgentHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let agent = SyncAgent {
            controller,
            events,
            commands,
            tick_interval,
        };
        (agent, SyncAgentHandle { commands: commands_tx })
    }

    /// Spawns the run loop on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Main loop. Ends on shutdown, when every handle is dropped, or when
    /// the bus event stream closes.
    pub async fn run(mut self) {
        info!("Sync agent started");

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(AgentCommand::Shutdown) | None => {
                        info!("Sync agent received shutdown");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                event = self.events.recv() => match event {
                    Some(event) => self.controller.handle_event(event),
                    None => {
                        warn!("Bus event stream closed");
                        break;
                    }
                },
                now = ticker.tick() => self.controller.tick(now.into_std()),
            }
        }

        if let Err(e) = self.controller.bus_mut().disconnect() {
            warn!(error = %e, "Bus disconnect failed");
        }
        info!("Sync agent stopped");
    }

    fn handle_command(&mut self, command: AgentCommand) {
        match command {
            AgentCommand::Upload(reply) => {
                let result = self.controller.request_upload();
                let _ = reply.send(StatusReport::from_result(Operation::Upload, &result));
            }
            AgentCommand::Download(reply) => {
                let result = self.controller.request_download();
                let _ = reply.send(StatusReport::from_result(Operation::Download, &result));
            }
            AgentCommand::Save { text, reply } => {
                let result = self.controller.request_save(&text);
                let _ = reply.send(StatusReport::from_result(Operation::Save, &result));
            }
            AgentCommand::Status(reply) => {
                let _ = reply.send(AgentStatus::of(&self.controller));
            }
            AgentCommand::Shutdown => debug!("Shutdown handled by run loop"),
        }
    }
}

// =============================================================================
// Agent Handle
// =============================================================================

/// Handle for driving a running [`SyncAgent`] from the presentation layer.
#[derive(Clone)]
pub struct SyncAgentHandle {
    commands: mpsc::Sender<AgentCommand>,
}

impl SyncAgentHandle {
    pub async fn request_upload(&self) -> SyncResult<StatusReport> {
        self.call(AgentCommand::Upload).await
    }

    pub async fn request_download(&self) -> SyncResult<StatusReport> {
        self.call(AgentCommand::Download).await
    }

    pub async fn request_save(&self, text: impl Into<String>) -> SyncResult<StatusReport> {
        let text = text.into();
        self.call(|reply| AgentCommand::Save { text, reply }).await
    }

    pub async fn status(&self) -> SyncResult<AgentStatus> {
        self.call(AgentCommand::Status).await
    }

    /// Signals the agent to stop.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.commands
            .send(AgentCommand::Shutdown)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> AgentCommand) -> SyncResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        reply_rx
            .await
            .map_err(|_| SyncError::ChannelError("Agent dropped the reply".into()))
    }
}
