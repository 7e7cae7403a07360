//! Sending location commands to a device.
//!
//! One command is one short conversation with the device:
//!
//! 1. open a device handle
//! 2. perform the lockdown handshake
//! 3. start the first available candidate service
//! 4. open a client for the service
//! 5. send the encoded command
//!
//! Each step yields a handle owned by a local binding, so on every exit path
//! the handles are released in reverse order of acquisition.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{Config, Connection, DEFAULT_SERVICES};
use crate::device::{DeviceError, DeviceResult};
use crate::error::{Error, Result};
use crate::location::{Coordinate, LocationCommand};

/// Which device to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    /// Unique device identifier; the first matching device when `None`.
    pub udid: Option<String>,
    /// How the device is looked up.
    pub connection: Connection,
}

impl DeviceTarget {
    /// Target the first device attached over USB.
    #[must_use]
    pub fn any_usb() -> Self {
        Self {
            udid: None,
            connection: Connection::Usb,
        }
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.udid {
            Some(udid) => write!(f, "{udid} ({})", self.connection),
            None => write!(f, "first {} device", self.connection),
        }
    }
}

/// The device operations a location command needs.
///
/// Handles release whatever they hold when dropped.
#[async_trait]
pub trait DeviceBackend: Send {
    /// An open device.
    type Device: Send + Sync;
    /// An authenticated lockdown session.
    type Lockdown: Send + Sync;
    /// A started service.
    type Descriptor: Send + Sync;
    /// A connection to a started service.
    type Client: Send + Sync;

    /// Find and open the target device.
    async fn open_device(&mut self, target: &DeviceTarget) -> DeviceResult<Self::Device>;

    /// Perform the lockdown handshake.
    async fn lockdown_handshake(
        &mut self,
        device: &Self::Device,
    ) -> DeviceResult<Self::Lockdown>;

    /// Start the named service.
    async fn start_service(
        &mut self,
        lockdown: &mut Self::Lockdown,
        name: &str,
    ) -> DeviceResult<Self::Descriptor>;

    /// Connect to a started service.
    async fn open_service_client(
        &mut self,
        device: &Self::Device,
        lockdown: &Self::Lockdown,
        descriptor: &Self::Descriptor,
    ) -> DeviceResult<Self::Client>;

    /// Write one message to the service.
    async fn send(
        &mut self,
        client: &mut Self::Client,
        message: &[u8],
    ) -> DeviceResult<()>;
}

/// Sets or clears the simulated location of one device.
#[derive(Debug)]
pub struct LocationSimulator<B> {
    backend: B,
    target: DeviceTarget,
    services: Vec<String>,
    timeout: Duration,
}

impl<B: DeviceBackend> LocationSimulator<B> {
    /// Create a simulator with the default service candidates.
    #[must_use]
    pub fn new(backend: B, target: DeviceTarget) -> Self {
        Self {
            backend,
            target,
            services: DEFAULT_SERVICES.iter().map(ToString::to_string).collect(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Create a simulator using the candidates and timeout from `config`.
    #[must_use]
    pub fn from_config(backend: B, target: DeviceTarget, config: &Config) -> Self {
        Self::new(backend, target)
            .with_services(config.simulation.services.clone())
            .with_timeout(config.timeout())
    }

    /// Replace the candidate service names.
    #[must_use]
    pub fn with_services(mut self, services: Vec<String>) -> Self {
        self.services = services;
        self
    }

    /// Bound each command by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The device this simulator talks to.
    #[must_use]
    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    /// The candidate services, in the order they are tried.
    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Simulate `location`, or stop simulating when it is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the step that failed. Handles acquired
    /// before the failure are released first.
    pub async fn set_location(&mut self, location: Option<Coordinate>) -> Result<()> {
        let command = LocationCommand::from_target(location);
        let timeout = self.timeout;
        let outcome = tokio::time::timeout(timeout, self.run(command)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "{} command to {} after {timeout:?}",
                command.name(),
                self.target
            ))),
        }
    }

    /// Pin the device to `coordinate`.
    ///
    /// # Errors
    ///
    /// See [`LocationSimulator::set_location`].
    pub async fn start(&mut self, coordinate: Coordinate) -> Result<()> {
        self.set_location(Some(coordinate)).await
    }

    /// Return the device to its real location.
    ///
    /// # Errors
    ///
    /// See [`LocationSimulator::set_location`].
    pub async fn stop(&mut self) -> Result<()> {
        self.set_location(None).await
    }

    async fn run(&mut self, command: LocationCommand) -> Result<()> {
        debug!(target_device = %self.target, command = command.name(), "sending location command");

        let device = self
            .backend
            .open_device(&self.target)
            .await
            .map_err(|e| match e {
                DeviceError::NotFound { .. } => Error::DeviceNotFound {
                    udid: self.target.udid.clone(),
                },
                other => Error::Device(other),
            })?;

        let mut lockdown = self
            .backend
            .lockdown_handshake(&device)
            .await
            .map_err(|source| Error::Handshake { source })?;

        let (service, descriptor) = self.start_first_service(&mut lockdown).await?;

        let mut client = self
            .backend
            .open_service_client(&device, &lockdown, &descriptor)
            .await
            .map_err(|source| Error::ServiceClient {
                service: service.clone(),
                source,
            })?;

        let message = command.encode()?;
        self.backend
            .send(&mut client, &message)
            .await
            .map_err(|source| Error::Send {
                command: command.name(),
                service: service.clone(),
                source,
            })?;

        match command {
            LocationCommand::Start(coordinate) => {
                info!(%coordinate, service = %service, "simulated location set");
            }
            LocationCommand::Stop => info!(service = %service, "location simulation stopped"),
        }
        Ok(())
    }

    async fn start_first_service(
        &mut self,
        lockdown: &mut B::Lockdown,
    ) -> Result<(String, B::Descriptor)> {
        for name in &self.services {
            match self.backend.start_service(lockdown, name).await {
                Ok(descriptor) => {
                    debug!(service = %name, "service started");
                    return Ok((name.clone(), descriptor));
                }
                Err(e) => debug!(service = %name, error = %e, "service did not start"),
            }
        }

        warn!(tried = ?self.services, "no location service could be started");
        Err(Error::ServiceUnavailable {
            tried: self.services.clone(),
        })
    }
}
