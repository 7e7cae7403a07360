//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::config::{Config, Connection};
use crate::error::{Error, Result};
use crate::location::{Coordinate, LocationCommand};
use crate::simulate::DeviceTarget;

/// Device selection flags shared by device commands.
#[derive(Debug, Clone, Default, Args)]
pub struct DeviceArgs {
    /// UDID of the device (defaults to the configured or first device)
    #[arg(short, long)]
    pub udid: Option<String>,

    /// Look the device up over Wi-Fi instead of USB
    #[arg(short, long)]
    pub network: bool,
}

impl DeviceArgs {
    /// Resolve the target, letting flags override the configuration.
    #[must_use]
    pub fn target(&self, config: &Config) -> DeviceTarget {
        let connection = if self.network {
            Connection::Network
        } else {
            config.device.connection
        };
        DeviceTarget {
            udid: self.udid.clone().or_else(|| config.device.udid.clone()),
            connection,
        }
    }
}

/// Set command arguments.
#[derive(Debug, Args)]
pub struct SetCommand {
    /// Latitude in degrees (-90 to 90)
    #[arg(allow_negative_numbers = true)]
    pub latitude: f64,

    /// Longitude in degrees (-180 to 180)
    #[arg(allow_negative_numbers = true)]
    pub longitude: f64,

    /// Device selection
    #[command(flatten)]
    pub device: DeviceArgs,
}

impl SetCommand {
    /// The validated coordinate.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordinate is out of range.
    pub fn coordinate(&self) -> Result<Coordinate> {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Stop command arguments.
#[derive(Debug, Args)]
pub struct StopCommand {
    /// Device selection
    #[command(flatten)]
    pub device: DeviceArgs,
}

/// Devices command arguments.
#[derive(Debug, Args)]
pub struct DevicesCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Encode command arguments.
#[derive(Debug, Args)]
pub struct EncodeCommand {
    /// Encode the stop message
    #[arg(long, conflicts_with_all = ["latitude", "longitude"])]
    pub stop: bool,

    /// Latitude in degrees
    #[arg(allow_negative_numbers = true, required_unless_present = "stop")]
    pub latitude: Option<f64>,

    /// Longitude in degrees
    #[arg(allow_negative_numbers = true, required_unless_present = "stop")]
    pub longitude: Option<f64>,
}

impl EncodeCommand {
    /// The command these arguments describe.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordinate is missing or out of range.
    pub fn command(&self) -> Result<LocationCommand> {
        if self.stop {
            return Ok(LocationCommand::Stop);
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Ok(LocationCommand::Start(Coordinate::new(lat, lng)?)),
            _ => Err(Error::invalid_coordinate(
                "both latitude and longitude are required",
            )),
        }
    }
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
