//! `fakeloc` - Simulate the GPS location of an attached iOS device
//!
//! This library drives the developer location simulation service on an
//! iPhone or iPad: it finds the device through usbmuxd, authenticates with
//! lockdownd using the host's pair record, starts the first available
//! simulation service and sends it a single start or stop message.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod location;
pub mod logging;
pub mod simulate;

pub use backend::UsbmuxBackend;
pub use config::Config;
pub use error::{Error, Result};
pub use location::{Coordinate, LocationCommand};
pub use logging::init_logging;
pub use simulate::{DeviceBackend, DeviceTarget, LocationSimulator};
