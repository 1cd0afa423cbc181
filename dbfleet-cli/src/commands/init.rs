//! `dbfleet init [--watch-dir …] [--replica-root …] [--remote-root …] [--force]`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use dbfleet_core::config::{self, split_dir_list};
use dbfleet_core::FleetConfig;

use super::home_dir;

/// Write the daemon configuration file.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to watch for client databases. Repeatable; commas split.
    #[arg(long = "watch-dir", short = 'w', value_name = "DIR")]
    pub watch_dirs: Vec<String>,

    /// Where replicas are stored. Defaults to ~/.dbfleet/replica.
    #[arg(long, value_name = "DIR")]
    pub replica_root: Option<PathBuf>,

    /// Prefix of every remote locator (`<prefix>/<client-id>`).
    #[arg(long, value_name = "PREFIX")]
    pub remote_root: Option<String>,

    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            bail!(
                "config already exists at {} (use --force to overwrite)",
                path.display()
            );
        }

        let mut watch_dirs = Vec::new();
        for raw in &self.watch_dirs {
            for dir in split_dir_list(raw) {
                let dir = dir
                    .canonicalize()
                    .with_context(|| format!("cannot resolve watch directory '{}'", dir.display()))?;
                watch_dirs.push(dir);
            }
        }

        let mut fleet = FleetConfig {
            watch_dirs,
            ..FleetConfig::default()
        };
        if let Some(root) = self.replica_root {
            fleet.replica_root = root;
        }
        if let Some(remote) = self.remote_root {
            fleet.remote_root = remote;
        }
        let fleet = fleet.with_home_defaults(&home);

        let saved = config::save_at(&home, &fleet).context("failed to write config")?;
        println!("{} Wrote {}", "✓".green().bold(), saved.display());
        if fleet.watch_dirs.is_empty() {
            println!("  No watch directories yet; add them to watch_dirs before `dbfleet run`.");
        }
        for dir in &fleet.watch_dirs {
            println!("  watching: {}", dir.display());
        }
        println!("  replica:  {}", fleet.replica_root.display());
        Ok(())
    }
}
