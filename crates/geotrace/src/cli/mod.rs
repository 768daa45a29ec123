//! Command-line interface for geotrace.
//!
//! This module provides the CLI structure and command definitions for the
//! `geotrk` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{AdminCommand, ConfigCommand, StatusCommand, TrackCommand};

/// geotrk - location telemetry producer and admin console
///
/// Continuously captures device position, ships enriched telemetry to a
/// remote collector, and lets an administrator observe and control tracked
/// sessions through a shared registry.
#[derive(Debug, Parser)]
#[command(name = "geotrk")]
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
    /// Run the telemetry producer
    Track(TrackCommand),

    /// Observe and control tracked sessions
    #[command(subcommand)]
    Admin(AdminCommand),

    /// Show registry and configuration status
    Status(StatusCommand),

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
