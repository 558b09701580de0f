use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyrelay_core::NodeRole;
use keyrelay_store::CredentialStore;
use keyrelay_sync::{
    CardReader, ChannelReporter, CompanionResponder, LogReporter, MqttBus, MqttConfig,
    NoOpReporter, OfflineBus, Operation, PinPad, PresenceTrigger, RelayConfig, StatusReport,
    StatusReporter, SyncAgent, SyncAgentHandle, SyncController, SyncError, SyncResult,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::*;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

pub async fn run_command(cli: Cli) -> CliResult<()> {
    let Cli {
        command,
        config,
        format,
        ..
    } = cli;

    match command {
        Command::Upload(args) => cmd_upload(load_config(config)?, args, format).await,
        Command::Download(args) => cmd_download(load_config(config)?, args, format).await,
        Command::Save(args) => cmd_save(load_config(config)?, args, format).await,
        Command::Companion => cmd_companion(load_config(config)?, format).await,
        Command::Presence => cmd_presence(load_config(config)?).await,
        Command::Config(args) => cmd_config(config, args, format),
    }
}

fn load_config(path: Option<PathBuf>) -> CliResult<RelayConfig> {
    let config = RelayConfig::load(path)?;
    debug!(
        role = %config.role(),
        broker = %config.broker_address(),
        store = %config.store.path.display(),
        "Relay config loaded"
    );
    Ok(config)
}

/// Transport settings for one process. The suffix keeps the client ids of
/// several processes sharing a config file distinct on the broker.
fn bus_config(config: &RelayConfig, role: NodeRole, suffix: &str) -> SyncResult<MqttConfig> {
    if config.role() != role {
        warn!(configured = %config.role(), running = %role, "Running as a different role than configured");
    }
    let mut mqtt = MqttConfig::from_relay(config)?;
    mqtt.client_id = format!("{}-{}", mqtt.client_id, suffix);
    Ok(mqtt)
}

// =============================================================================
// Terminal Commands
// =============================================================================

struct TerminalSession {
    handle: SyncAgentHandle,
    reports: mpsc::UnboundedReceiver<StatusReport>,
    task: tokio::task::JoinHandle<()>,
}

impl TerminalSession {
    fn start(config: &RelayConfig) -> SyncResult<Self> {
        let (bus, events) = MqttBus::spawn(bus_config(config, NodeRole::Terminal, "terminal")?);
        let (reporter, reports) = ChannelReporter::new();
        let controller = SyncController::new(
            bus,
            CredentialStore::new(&config.store.path),
            config.topics.clone(),
            Arc::new(reporter),
        )
        .with_pull_timeout(config.sync.pull_timeout());

        let (agent, handle) = SyncAgent::new(controller, events, config.sync.tick_interval());
        Ok(TerminalSession {
            handle,
            reports,
            task: agent.spawn(),
        })
    }

    /// Waits for the first report on `operation` that is not pending.
    ///
    /// Returns `None` on Ctrl+C, after `limit`, or if the agent stops.
    async fn outcome(
        &mut self,
        operation: Operation,
        limit: Option<Duration>,
    ) -> Option<StatusReport> {
        let reports = &mut self.reports;
        let wait = async {
            while let Some(report) = reports.recv().await {
                if report.operation != operation {
                    info!(operation = %report.operation, "{}", report.message);
                    continue;
                }
                if report.pending {
                    info!(operation = %operation, "{}", report.message);
                    continue;
                }
                return Some(report);
            }
            None
        };

        tokio::select! {
            outcome = wait => outcome,
            _ = sleep_for(limit) => None,
            _ = shutdown_signal() => {
                info!("Interrupted");
                None
            }
        }
    }

    async fn stop(self) {
        if let Err(e) = self.handle.shutdown().await {
            debug!(error = %e, "Agent already stopped");
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Agent task failed");
        }
    }
}

async fn cmd_upload(config: RelayConfig, args: WaitArgs, format: OutputFormat) -> CliResult<()> {
    let mut session = TerminalSession::start(&config)?;

    let first = session.handle.request_upload().await?;
    let outcome = if first.pending {
        print_report(&first, format)?;
        session
            .outcome(Operation::Upload, Some(Duration::from_secs(args.wait_secs)))
            .await
    } else {
        Some(first)
    };

    session.stop().await;
    finish(Operation::Upload, outcome, format)
}

async fn cmd_download(
    config: RelayConfig,
    args: WaitArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let mut session = TerminalSession::start(&config)?;

    let first = session.handle.request_download().await?;
    let outcome = if first.pending {
        print_report(&first, format)?;
        let limit = download_limit(
            Duration::from_secs(args.wait_secs),
            config.sync.pull_timeout(),
        );
        session.outcome(Operation::Download, limit).await
    } else {
        Some(first)
    };

    session.stop().await;
    finish(Operation::Download, outcome, format)
}

/// How long `download` waits in total: the time allowed to reach the bus
/// plus the pull timeout the controller enforces once the request is out.
/// A disabled pull timeout waits until interrupted.
fn download_limit(wait: Duration, pull_timeout: Option<Duration>) -> Option<Duration> {
    pull_timeout.map(|timeout| wait + timeout)
}

async fn cmd_save(config: RelayConfig, args: SaveArgs, format: OutputFormat) -> CliResult<()> {
    let text = if args.file.as_os_str() == "-" {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await?;
        text
    } else {
        std::fs::read_to_string(&args.file)?
    };

    let mut controller = SyncController::new(
        OfflineBus,
        CredentialStore::new(&config.store.path),
        config.topics.clone(),
        Arc::new(NoOpReporter),
    );
    let result = controller.request_save(&text);
    finish(
        Operation::Save,
        Some(StatusReport::from_result(Operation::Save, &result)),
        format,
    )
}

// =============================================================================
// Companion-Side Commands
// =============================================================================

/// Prints every report as it happens.
struct PrintReporter {
    format: OutputFormat,
}

impl StatusReporter for PrintReporter {
    fn report(&self, report: &StatusReport) {
        if let Err(e) = print_report(report, self.format) {
            warn!(error = %e, "Failed to print status");
        }
    }
}

async fn cmd_companion(config: RelayConfig, format: OutputFormat) -> CliResult<()> {
    let (bus, events) = MqttBus::spawn(bus_config(&config, NodeRole::Companion, "companion")?);
    // A long-running daemon: text goes to the log, JSON lines to stdout.
    let reporter: Arc<dyn StatusReporter> = match format {
        OutputFormat::Text => Arc::new(LogReporter),
        OutputFormat::Json => Arc::new(PrintReporter { format }),
    };
    let responder = CompanionResponder::new(
        bus,
        CredentialStore::new(&config.store.path),
        config.topics.clone(),
        reporter,
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let task = tokio::spawn(responder.run(events, shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(()).await;
    task.await?;
    Ok(())
}

/// Card reader fed from the console. A card stays "on the reader" until
/// `remove` is typed.
#[derive(Clone, Default)]
struct ConsoleReader {
    card: Arc<Mutex<Option<Vec<u8>>>>,
}

impl ConsoleReader {
    fn place(&self, uid: Option<Vec<u8>>) {
        match self.card.lock() {
            Ok(mut card) => *card = uid,
            Err(poisoned) => *poisoned.into_inner() = uid,
        }
    }
}

impl CardReader for ConsoleReader {
    fn poll(&mut self) -> SyncResult<Option<Vec<u8>>> {
        let card = self
            .card
            .lock()
            .map_err(|_| SyncError::ChannelError("Card slot poisoned".into()))?;
        Ok(card.clone())
    }
}

/// Reads console lines and publishes card taps and PINs.
///
/// ```text
///   04A1B2C3        tap the card with this UID (hex)
///   card 04A1B2C3   same
///   remove          take the card off the reader
///   pin 1234        type digits on the keypad
///   quit            stop (EOF works too)
/// ```
async fn cmd_presence(config: RelayConfig) -> CliResult<()> {
    let (bus, events) = MqttBus::spawn(bus_config(&config, NodeRole::Companion, "presence")?);
    let reader = ConsoleReader::default();
    let trigger = PresenceTrigger::new(reader.clone(), bus, config.topics.clone());

    let poll_interval = config.sync.card_poll_interval();
    let (pins_tx, pins_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let task = tokio::spawn(trigger.run(poll_interval, events, pins_rx, shutdown_rx));

    let mut pad = PinPad::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown_signal() => break,
        };
        let Some(line) = line else { break };

        match parse_console_line(&line) {
            ConsoleInput::Card(hex_uid) => match hex::decode(&hex_uid) {
                Ok(uid) if !uid.is_empty() => reader.place(Some(uid)),
                _ => warn!(input = %hex_uid, "Not a hex card UID"),
            },
            ConsoleInput::Remove => reader.place(None),
            ConsoleInput::Keys(keys) => {
                for key in keys.chars() {
                    match pad.press(key) {
                        Ok(Some(pin)) => pins_tx.send(pin).await?,
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Keypad entry discarded");
                            pad.clear();
                            break;
                        }
                    }
                }
            }
            ConsoleInput::Quit => break,
            ConsoleInput::Empty => {}
        }
    }

    // Let the last tap reach the next poll before shutting down.
    tokio::time::sleep(poll_interval * 2).await;
    let _ = shutdown_tx.send(()).await;
    task.await?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ConsoleInput {
    Card(String),
    Remove,
    Keys(String),
    Quit,
    Empty,
}

fn parse_console_line(line: &str) -> ConsoleInput {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "" => ConsoleInput::Empty,
        "quit" | "exit" => ConsoleInput::Quit,
        "remove" => ConsoleInput::Remove,
        "pin" => ConsoleInput::Keys(rest.replace(char::is_whitespace, "")),
        "card" => ConsoleInput::Card(rest.to_string()),
        _ => ConsoleInput::Card(line.to_string()),
    }
}

// =============================================================================
// Config Command
// =============================================================================

fn cmd_config(path: Option<PathBuf>, args: ConfigArgs, format: OutputFormat) -> CliResult<()> {
    match args.action {
        ConfigAction::Show => {
            let config = load_config(path)?;
            match format {
                OutputFormat::Text => print!("{}", toml::to_string_pretty(&config)?),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
        ConfigAction::Init { force } => {
            let target = path
                .or_else(RelayConfig::default_config_path)
                .ok_or("No config path available")?;
            if target.exists() && !force {
                return Err(format!(
                    "{} already exists (use --force to overwrite)",
                    target.display()
                )
                .into());
            }
            let written = RelayConfig::new().save(Some(target))?;
            println!("Wrote {}", written.display());
        }
        ConfigAction::Path => {
            let target = path
                .or_else(RelayConfig::default_config_path)
                .ok_or("No config path available")?;
            println!("{}", target.display());
        }
    }
    Ok(())
}

// =============================================================================
// Output
// =============================================================================

fn print_report(report: &StatusReport, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Text => println!("{}", report),
        OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
    }
    Ok(())
}

/// Prints the final report and turns an error report into a failing exit.
fn finish(
    operation: Operation,
    outcome: Option<StatusReport>,
    format: OutputFormat,
) -> CliResult<()> {
    let report = outcome.ok_or_else(|| format!("No {} outcome before giving up", operation))?;
    print_report(&report, format)?;
    if report.is_error() {
        return Err(report.message.into());
    }
    Ok(())
}

async fn sleep_for(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_console_lines() {
        assert_eq!(parse_console_line("04A1B2C3"), ConsoleInput::Card("04A1B2C3".into()));
        assert_eq!(parse_console_line("card 04a1b2c3"), ConsoleInput::Card("04a1b2c3".into()));
        assert_eq!(parse_console_line("pin 12 34"), ConsoleInput::Keys("1234".into()));
        assert_eq!(parse_console_line("  REMOVE "), ConsoleInput::Remove);
        assert_eq!(parse_console_line("quit"), ConsoleInput::Quit);
        assert_eq!(parse_console_line("   "), ConsoleInput::Empty);
    }

    #[test]
    fn test_console_reader_holds_card_until_removed() {
        let reader = ConsoleReader::default();
        let mut polling = reader.clone();
        assert_eq!(polling.poll().unwrap(), None);

        reader.place(Some(vec![0x04, 0xA1]));
        assert_eq!(polling.poll().unwrap(), Some(vec![0x04, 0xA1]));
        assert_eq!(polling.poll().unwrap(), Some(vec![0x04, 0xA1]));

        reader.place(None);
        assert_eq!(polling.poll().unwrap(), None);
    }

    #[test]
    fn test_download_accepts_wait_secs() {
        let cli = Cli::try_parse_from(["keyrelay", "download", "--wait-secs", "5"]).unwrap();
        match cli.command {
            Command::Download(args) => assert_eq!(args.wait_secs, 5),
            _ => panic!("expected download"),
        }

        let cli = Cli::try_parse_from(["keyrelay", "download"]).unwrap();
        assert!(matches!(cli.command, Command::Download(WaitArgs { wait_secs: 30 })));
    }

    #[test]
    fn test_download_limit_covers_connect_and_pull() {
        assert_eq!(
            download_limit(Duration::from_secs(30), Some(Duration::from_secs(120))),
            Some(Duration::from_secs(150))
        );
        assert_eq!(download_limit(Duration::from_secs(30), None), None);
    }

    #[test]
    fn test_finish_without_outcome_fails() {
        assert!(finish(Operation::Upload, None, OutputFormat::Text).is_err());
    }
}
