//! `fakeloc` - CLI for simulating an iOS device's location
//!
//! This binary sets or clears the simulated location of an attached device
//! and provides a few inspection helpers.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use fakeloc::cli::{hex, Cli, Command, ConfigCommand, DeviceArgs, EncodeCommand};
use fakeloc::device::describe_addr;

use fakeloc::{init_logging, Config, Coordinate, LocationSimulator, UsbmuxBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Config validation is reported by the command itself
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        return handle_validate(file.clone().or_else(|| cli.config.clone()));
    }

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    // Execute the command
    match cli.command {
        Command::Set(set_cmd) => {
            let coordinate = set_cmd.coordinate()?;
            handle_location(&config, &set_cmd.device, Some(coordinate)).await
        }
        Command::Stop(stop_cmd) => handle_location(&config, &stop_cmd.device, None).await,
        Command::Devices(devices_cmd) => handle_devices(&config, devices_cmd.json).await,
        Command::Encode(encode_cmd) => handle_encode(&encode_cmd),
        Command::Config(config_cmd) => handle_config(&config, cli.config, config_cmd),
    }
}

async fn handle_location(
    config: &Config,
    device: &DeviceArgs,
    coordinate: Option<Coordinate>,
) -> anyhow::Result<()> {
    let target = device.target(config);
    let backend = UsbmuxBackend::from_config(config);
    let mut simulator = LocationSimulator::from_config(backend, target, config);

    if let Err(e) = simulator.set_location(coordinate).await {
        if let Some(hint) = e.hint() {
            eprintln!("hint: {hint}");
        }
        return Err(e.into());
    }

    match coordinate {
        Some(coordinate) => println!("Location set to {coordinate}"),
        None => println!("Location simulation stopped"),
    }
    Ok(())
}

async fn handle_devices(config: &Config, json: bool) -> anyhow::Result<()> {
    let backend = UsbmuxBackend::from_config(config);
    let devices = backend
        .list_devices()
        .await
        .with_context(|| {
            format!(
                "failed to list devices from usbmuxd at {}",
                describe_addr(backend.addr())
            )
        })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("No devices attached.");
    } else {
        println!("{:<6} {:<10} UDID", "ID", "CONNECTION");
        for d in &devices {
            println!("{:<6} {:<10} {}", d.device_id, d.connection, d.udid);
        }
    }
    Ok(())
}

fn handle_encode(cmd: &EncodeCommand) -> anyhow::Result<()> {
    let command = cmd.command()?;
    println!("{}", hex(&command.encode()?));
    Ok(())
}

fn handle_validate(file: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path)) {
        Ok(_) => {
            println!("Configuration is valid.");
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {e}");
            Err(e.into())
        }
    }
}

fn handle_config(
    config: &Config,
    custom_path: Option<std::path::PathBuf>,
    cmd: ConfigCommand,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Device]");
                println!(
                    "  UDID:               {}",
                    config.device.udid.as_deref().unwrap_or("(first attached)")
                );
                println!("  Connection:         {}", config.device.connection);
                println!(
                    "  usbmuxd:            {}",
                    describe_addr(&config.usbmuxd_addr())
                );
                println!("  Label:              {}", config.device.label);
                println!();
                println!("[Simulation]");
                println!("  Timeout (ms):       {}", config.simulation.timeout_ms);
                println!("  Services:");
                for service in &config.simulation.services {
                    println!("    - {service}");
                }
            }
        }
        ConfigCommand::Path => {
            let path = custom_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => handle_validate(file.or(custom_path))?,
    }
    Ok(())
}
