//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::report::AlertLevel;

/// Report command arguments.
#[derive(Debug, Args)]
pub struct ReportCommand {
    /// What was seen
    #[arg(short, long)]
    pub description: String,

    /// Latitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lng: f64,

    /// Species identifier, if known
    #[arg(short, long, conflicts_with = "alert")]
    pub species: Option<String>,

    /// Photo URL or local file to upload
    #[arg(short, long, value_name = "URL|PATH")]
    pub image: Option<String>,

    /// Send an urgent alert at this level instead of an observation
    #[arg(short, long, value_enum, value_name = "LEVEL")]
    pub alert: Option<AlertLevelArg>,

    /// Only queue the report; submit on the next sync
    #[arg(long)]
    pub offline: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Pending command arguments.
#[derive(Debug, Args)]
pub struct PendingCommand {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Discard command arguments.
#[derive(Debug, Args)]
pub struct DiscardCommand {
    /// Local id of the pending report
    pub id: i64,
}

/// Upload command arguments.
#[derive(Debug, Args)]
pub struct UploadCommand {
    /// Photo to upload
    pub file: PathBuf,
}

/// Map overlay commands.
#[derive(Debug, Subcommand)]
pub enum MapCommand {
    /// Protected area polygons
    Areas {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Verified observation markers
    Observations {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Alert level argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlertLevelArg {
    /// Low urgency
    Low,
    /// Medium urgency
    Medium,
    /// High urgency
    High,
    /// Needs action now
    Critical,
}

impl From<AlertLevelArg> for AlertLevel {
    fn from(arg: AlertLevelArg) -> Self {
        match arg {
            AlertLevelArg::Low => Self::Low,
            AlertLevelArg::Medium => Self::Medium,
            AlertLevelArg::High => Self::High,
            AlertLevelArg::Critical => Self::Critical,
        }
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}
