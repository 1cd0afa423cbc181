//! dbfleet: multi-client database backup daemon CLI.
//!
//! # Usage
//!
//! ```text
//! dbfleet init [--watch-dir <dir>]... [--replica-root <dir>] [--remote-root <prefix>] [--force]
//! dbfleet run [--config <file>] [--watch-dir <dir>]... [--replica-root <dir>] [--remote-root <prefix>]
//! dbfleet status [--json]
//! dbfleet stop
//! dbfleet client <id>
//! dbfleet snapshots <id> [--json]
//! dbfleet restore <id> --output <file>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::{ClientArgs, RunArgs},
    init::InitArgs,
    snapshots::{RestoreArgs, SnapshotsArgs},
    status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "dbfleet",
    version,
    about = "Continuously replicate every client database found in watched directories",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.dbfleet/config.yaml.
    Init(InitArgs),

    /// Run the daemon in the foreground (watcher + replication + status socket).
    Run(RunArgs),

    /// Show registered clients from the running daemon.
    Status(StatusArgs),

    /// Request graceful daemon shutdown over the Unix socket.
    Stop,

    /// Show one registered client and its stored snapshots.
    Client(ClientArgs),

    /// List stored snapshots for a client (works without the daemon).
    Snapshots(SnapshotsArgs),

    /// Restore a client's newest snapshot to a file.
    Restore(RestoreArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Run(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Stop => commands::daemon::stop(),
        Commands::Client(args) => args.run(),
        Commands::Snapshots(args) => args.run(),
        Commands::Restore(args) => args.run(),
    }
}
