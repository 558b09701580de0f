//! # keyrelay
//!
//! Command line front end for both KeyRelay node roles.
//!
//! ```text
//!   keyrelay upload            push the local store to the companion
//!   keyrelay download          pull the companion's entry (card + PIN)
//!   keyrelay save FILE|-       validate and replace the local store
//!   keyrelay companion         run the device-side responder
//!   keyrelay presence          feed card taps and PINs from stdin
//!   keyrelay config show|init|path
//! ```

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);
    commands::run_command(cli).await
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=keyrelay_sync=trace` - Trace the sync engine only
/// - Default: INFO, DEBUG for the binary (and the library crates with `--verbose`)
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,keyrelay=debug,keyrelay_sync=debug,keyrelay_store=debug,rumqttc=warn"
    } else {
        "info,keyrelay=debug,rumqttc=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
