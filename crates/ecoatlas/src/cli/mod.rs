//! Command-line interface for ecoatlas.
//!
//! This module provides the CLI structure and command handlers for the
//! `ecoatlas` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AlertLevelArg, ConfigCommand, DiscardCommand, MapCommand, OutputFormat, PendingCommand,
    ReportCommand, StatusCommand, SyncCommand, UploadCommand,
};

/// ecoatlas - Report wildlife sightings in Togo, even offline
///
/// Reports are queued locally and submitted to the EcoAtlas backend when a
/// connection is available.
#[derive(Debug, Parser)]
#[command(name = "ecoatlas")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record an observation or alert
    Report(ReportCommand),

    /// List reports waiting to be synchronized
    Pending(PendingCommand),

    /// Submit all pending reports
    Sync(SyncCommand),

    /// Show queue status
    Status(StatusCommand),

    /// Drop a pending report without submitting it
    Discard(DiscardCommand),

    /// Upload a photo and print its public URL
    Upload(UploadCommand),

    /// Fetch map overlays
    #[command(subcommand)]
    Map(MapCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
