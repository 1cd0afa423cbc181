//! `dbfleet status`: registered clients as reported by the daemon.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use dbfleet_core::ClientView;
use dbfleet_daemon::paths::socket_path;
use dbfleet_daemon::{request_status, DaemonError};

use super::{format_age, home_dir};

/// Arguments for `dbfleet status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ClientRow {
    #[tabled(rename = "client")]
    client: String,
    #[tabled(rename = "database")]
    database: String,
    #[tabled(rename = "remote")]
    remote: String,
    #[tabled(rename = "age")]
    age: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let status = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => json!({
                "running": false,
                "socket": socket_path(&home).display().to_string(),
            }),
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to render daemon status JSON")?
            );
            return Ok(());
        }
        print_table(&status)
    }
}

fn print_table(status: &Value) -> Result<()> {
    if status["running"] != true {
        println!("{} daemon is not running", "■".bright_black().bold());
        return Ok(());
    }

    let clients: Vec<ClientView> = serde_json::from_value(status["clients"].clone())
        .context("daemon returned malformed client list")?;

    println!(
        "dbfleet v{} | {} clients | up {} | replica {}",
        env!("CARGO_PKG_VERSION"),
        clients.len(),
        status["uptime"].as_str().unwrap_or("-"),
        status["replica_root"].as_str().unwrap_or("-"),
    );

    if let Some(dirs) = status["watch_dirs"].as_array() {
        for dir in dirs {
            let path = dir["path"].as_str().unwrap_or("-");
            match dir["state"].as_str() {
                Some("watching") => println!("{} {path}", "■".green().bold()),
                _ => println!(
                    "{} {path} ({})",
                    "■".red().bold(),
                    dir["reason"].as_str().unwrap_or("not watched"),
                ),
            }
        }
    }

    if clients.is_empty() {
        println!("No clients registered.");
        return Ok(());
    }

    let rows: Vec<ClientRow> = clients
        .into_iter()
        .map(|view| ClientRow {
            client: view.identity.to_string(),
            database: view.file_path.display().to_string(),
            remote: view.remote_locator.to_string(),
            age: format_age(view.registered_at),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
