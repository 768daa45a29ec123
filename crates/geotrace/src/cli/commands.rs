//! Command definitions for the geotrk CLI.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Run the telemetry producer.
#[derive(Debug, Args)]
pub struct TrackCommand {
    /// JSON file of position fixes to replay as the device position source
    #[arg(long, value_name = "FILE")]
    pub replay: PathBuf,

    /// Run silently: discard classified failures and duration ticks
    #[arg(long)]
    pub silent: bool,
}

/// Observe and control tracked sessions.
#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    /// List tracked users
    List {
        /// Show only active (or only inactive with --inactive) sessions
        #[arg(long, conflicts_with = "inactive")]
        active: bool,

        /// Show only inactive sessions
        #[arg(long)]
        inactive: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop tracking for a user (honored within one command-poll period)
    Stop {
        /// Target user identifier
        user_id: String,
    },

    /// Stop every active session
    StopAll,

    /// Ask a producer to resume (best-effort notification only)
    Resume {
        /// Target user identifier
        user_id: String,
    },

    /// Remove a user's record from the registry
    Remove {
        /// Target user identifier
        user_id: String,
    },

    /// Send a free-form command (best-effort notification only)
    Send {
        /// Target user identifier
        user_id: String,

        /// Command text
        text: String,
    },

    /// Delete every record and stop flag
    Clear {
        /// Skip the confirmation requirement
        #[arg(long)]
        yes: bool,
    },
}

/// Show registry and configuration status.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// View or validate configuration.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the current configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the configuration file path
    Path,

    /// Validate a configuration file
    Validate {
        /// Path to validate (defaults to the standard location)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}
