//! `clap`-derived CLI surface for local operation: start the manager, add a
//! URL, list repos, watch progress — useful for smoke-testing the manager
//! without the HTTP layer. Grounded on `src/cli.rs` /
//! `clap::CommandFactory`/`Cli::command()` pattern, restyled as a
//! standalone binary with no Tauri `AppHandle`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gitvista",
    version,
    about = "Self-hosted service that clones and serves a live view of Git repositories"
)]
pub struct Cli {
    /// Path to a TOML config file. Falls back to GITVISTA_CONFIG if unset.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a remote repository URL and begin cloning it.
    Add { url: String },
    /// List every managed repository.
    List,
    /// Show the current state, error, and progress of a managed repository.
    Status { id: String },
    /// Remove a managed repository and its on-disk data.
    Remove { id: String },
    /// Add a repository and stream its clone progress until it finishes.
    Watch { url: String },
    /// Start the manager's background loops and block until Ctrl-C.
    Serve,
}
