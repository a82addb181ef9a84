//! CLI module - Command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod commands;
pub mod output;
pub mod progress;

/// Tombstone archive - content-addressed, auditable archival of removed files
#[derive(Parser, Debug)]
#[command(name = "tomb")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Emit JSON for machine consumption
    #[arg(long, global = true)]
    pub robot: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: $TOMB_CONFIG, then ./.tomb/archive.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the schema to the configured backend
    Init(commands::init::InitArgs),

    /// Print the DDL for a backend dialect
    Schema(commands::schema::SchemaArgs),

    /// Archive a file and print its tombstone
    Store(commands::store::StoreArgs),

    /// List archived items, most recent first
    List(commands::list::ListArgs),

    /// Show one tombstone with its event history
    Show(commands::show::ShowArgs),

    /// Restore a tombstone's bytes to a path
    Restore(commands::restore::RestoreArgs),

    /// Record a request to purge a tombstone
    PruneRequest(commands::prune_request::PruneRequestArgs),

    /// Record dual-control approval and optionally scrub the blob
    Purge(commands::purge::PurgeArgs),

    /// Check that the backend is reachable and migrated
    HealthCheck(commands::health_check::HealthCheckArgs),

    /// Restore every entry of a manifest
    BatchRestore(commands::batch_restore::BatchRestoreArgs),

    /// Attach an external reference to a tombstone
    #[command(name = "ref")]
    Referent(commands::referent::ReferentArgs),

    /// Inspect the effective configuration
    Config(commands::config::ConfigArgs),
}
