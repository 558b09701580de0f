use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "keyrelay",
    about = "Move a credential store between a desk terminal and its companion device",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true, env = "KEYRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Push the local credential store to the companion
    Upload(WaitArgs),
    /// Request the companion's entry (tap a card and enter the PIN on the device)
    Download(WaitArgs),
    /// Validate a document and replace the local credential store with it
    Save(SaveArgs),
    /// Run the companion responder until interrupted
    Companion,
    /// Publish card taps and PINs read from stdin
    Presence,
    /// Inspect or create the config file
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct WaitArgs {
    /// Give up waiting for the bus after this many seconds (a download also
    /// gets the configured pull timeout on top)
    #[arg(long, default_value_t = 30)]
    pub wait_secs: u64,
}

#[derive(Args)]
pub struct SaveArgs {
    /// Document to save, or `-` for stdin
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file path
    Path,
}
