//! Command-line interface for fakeloc.
//!
//! This module provides the CLI structure for the `fakeloc` binary.

mod commands;

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, DeviceArgs, DevicesCommand, EncodeCommand, SetCommand, StopCommand,
};

/// fakeloc - Simulate the location of an iOS device
///
/// Talks to an attached iPhone or iPad through usbmuxd and the device's
/// developer services to pin its reported GPS position, or release it.
#[derive(Debug, Parser)]
#[command(name = "fakeloc")]
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
    /// Pin the device to a coordinate
    Set(SetCommand),

    /// Stop simulating and restore the real location
    Stop(StopCommand),

    /// List attached devices
    Devices(DevicesCommand),

    /// Print the message bytes for a command without a device
    Encode(EncodeCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.verbose, self.quiet)
    }
}

/// Render bytes as space separated lowercase hex pairs.
#[must_use]
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}
