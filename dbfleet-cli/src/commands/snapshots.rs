//! `dbfleet snapshots` and `dbfleet restore`: read the replica directly.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use dbfleet_core::{ClientId, RemoteLocator};
use dbfleet_replica::{list_snapshots, restore_latest, RestoreOutcome};

use super::{format_age, home_dir, load_config};

/// List stored snapshots for a client.
#[derive(Args, Debug)]
pub struct SnapshotsArgs {
    /// Client identifier.
    pub id: ClientId,

    /// Config file to read the replica root from.
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "snapshot")]
    id: String,
    #[tabled(rename = "size")]
    size: u64,
    #[tabled(rename = "age")]
    age: String,
    #[tabled(rename = "sha256")]
    sha256: String,
}

impl SnapshotsArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home, self.config.as_deref())?;
        let locator = RemoteLocator::for_client(&config.remote_root, &self.id);
        let snapshots = list_snapshots(&config.replica_root, &locator)
            .with_context(|| format!("failed to read snapshots for {locator}"))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshots)
                    .context("failed to render snapshots JSON")?
            );
            return Ok(());
        }

        if snapshots.is_empty() {
            println!("No snapshots stored for {locator}.");
            return Ok(());
        }
        println!("{} ({} snapshots)", locator.to_string().bold(), snapshots.len());
        let rows: Vec<SnapshotRow> = snapshots
            .into_iter()
            .rev()
            .map(|entry| SnapshotRow {
                id: entry.id,
                size: entry.size,
                age: format_age(entry.created_at),
                sha256: entry.sha256.chars().take(12).collect(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

/// Restore a client's newest snapshot.
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Client identifier.
    pub id: ClientId,

    /// Destination file. Never overwritten if it already exists.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: PathBuf,

    /// Config file to read the replica root from.
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl RestoreArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home, self.config.as_deref())?;
        let locator = RemoteLocator::for_client(&config.remote_root, &self.id);
        let outcome = restore_latest(&config.replica_root, &locator, &self.output)
            .with_context(|| format!("failed to restore {locator}"))?;
        match outcome {
            RestoreOutcome::Restored { snapshot, output } => println!(
                "{} Restored {} to {}",
                "✓".green().bold(),
                snapshot.id,
                output.display()
            ),
            RestoreOutcome::SkippedExisting { output } => println!(
                "{} {} already exists; nothing restored",
                "■".yellow().bold(),
                output.display()
            ),
        }
        Ok(())
    }
}
