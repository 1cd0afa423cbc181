//! `dbfleet run | stop | client`: daemon lifecycle and socket queries.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use dbfleet_core::config::split_dir_list;
use dbfleet_core::ClientId;
use dbfleet_daemon::{request_client, request_stop, start_blocking, DaemonError};

use super::{home_dir, load_config};

/// Run the daemon in the foreground.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file to load instead of ~/.dbfleet/config.yaml.
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Replace the configured watch directories. Repeatable; commas split.
    #[arg(long = "watch-dir", short = 'w', value_name = "DIR")]
    pub watch_dirs: Vec<String>,

    #[arg(long, value_name = "DIR")]
    pub replica_root: Option<PathBuf>,

    #[arg(long, value_name = "PREFIX")]
    pub remote_root: Option<String>,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let mut config = load_config(&home, self.config.as_deref())?;
        if !self.watch_dirs.is_empty() {
            config.watch_dirs = self
                .watch_dirs
                .iter()
                .flat_map(|raw| split_dir_list(raw))
                .collect();
        }
        if let Some(root) = self.replica_root {
            config.replica_root = root;
        }
        if let Some(remote) = self.remote_root {
            config.remote_root = remote;
        }
        config.validate().context("invalid configuration")?;

        start_blocking(&home, config).context("daemon exited with error")
    }
}

pub fn stop() -> Result<()> {
    let home = home_dir()?;
    match request_stop(&home) {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}

/// Show one client as the daemon sees it.
#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Client identifier (xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx).
    pub id: ClientId,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ClientArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let detail = request_client(&home, self.id.as_str())
            .with_context(|| format!("failed to query client '{}'", self.id))?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&detail).context("failed to render client JSON")?
            );
            return Ok(());
        }
        print_detail(&detail);
        Ok(())
    }
}

fn print_detail(detail: &Value) {
    let field = |key: &str| detail[key].as_str().unwrap_or("-").to_string();
    println!("{}", field("clientId").bold());
    println!("  database:   {}", field("databasePath"));
    println!("  remote:     {}", field("remotePath"));
    println!("  registered: {}", field("createdAt"));
    let snapshots = detail["snapshots"].as_array().map(Vec::len).unwrap_or(0);
    let latest = detail["snapshots"]
        .as_array()
        .and_then(|s| s.last())
        .and_then(|s| s["id"].as_str())
        .unwrap_or("none");
    println!("  snapshots:  {snapshots} (latest: {latest})");
}
