//! Device lookup and service start on top of the `idevice` stack.
//!
//! usbmuxd owns the links to attached devices. This module resolves where
//! it listens, picks a device from its list, and turns a lockdownd
//! `StartService` reply into a [`ServiceDescriptor`].

use std::net::SocketAddr;

use idevice::lockdown::LockdownClient;
use idevice::provider::UsbmuxdProvider;
use idevice::usbmuxd::{Connection as LinkType, UsbmuxdAddr, UsbmuxdDevice};
use idevice::IdeviceError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Connection;

/// Environment variable overriding the usbmuxd socket location.
pub const SOCKET_ADDRESS_ENV: &str = "USBMUXD_SOCKET_ADDRESS";

/// Errors raised while talking to usbmuxd, lockdownd, or a device service.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device stack reported a failure.
    #[error(transparent)]
    Idevice(#[from] IdeviceError),

    /// No attached device matched the request.
    #[error("no {connection} device{} is attached", udid_suffix(.udid.as_deref()))]
    NotFound {
        /// The requested device, if one was named.
        udid: Option<String>,
        /// How the device was looked up.
        connection: Connection,
    },

    /// usbmuxd holds no usable pair record for the device.
    #[error("no pair record for {udid}; unlock the device and trust this computer")]
    PairRecord {
        /// The device that has not been paired.
        udid: String,
        /// The underlying failure.
        #[source]
        source: IdeviceError,
    },

    /// lockdownd started a service but gave no port to reach it on.
    #[error("service `{0}` started without a port")]
    NoPort(String),

    /// A usbmuxd address is neither `UNIX:/path` nor `host:port`.
    #[error("invalid usbmuxd address `{0}`")]
    InvalidAddress(String),
}

/// Result type for device operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

fn udid_suffix(udid: Option<&str>) -> String {
    udid.map(|u| format!(" {u}")).unwrap_or_default()
}

/// Parse a usbmuxd address in the `UNIX:/path` or `host:port` form.
///
/// # Errors
///
/// Returns [`DeviceError::InvalidAddress`] if the value is neither form, or
/// names a Unix socket on a platform without them.
pub fn parse_addr(value: &str) -> DeviceResult<UsbmuxdAddr> {
    if let Some(path) = value.strip_prefix("UNIX:") {
        #[cfg(unix)]
        return Ok(UsbmuxdAddr::UnixSocket(path.to_string()));
        #[cfg(not(unix))]
        return Err(DeviceError::InvalidAddress(format!("UNIX:{path}")));
    }
    value
        .parse::<SocketAddr>()
        .map(UsbmuxdAddr::TcpSocket)
        .map_err(|_| DeviceError::InvalidAddress(value.to_string()))
}

/// Resolve the usbmuxd address from `USBMUXD_SOCKET_ADDRESS`, falling back
/// to the platform default.
#[must_use]
pub fn addr_from_env() -> UsbmuxdAddr {
    resolve_env_addr(std::env::var(SOCKET_ADDRESS_ENV).ok().as_deref())
}

fn resolve_env_addr(value: Option<&str>) -> UsbmuxdAddr {
    match value.map(parse_addr) {
        Some(Ok(addr)) => addr,
        Some(Err(e)) => {
            warn!(error = %e, "ignoring {SOCKET_ADDRESS_ENV}, using the default usbmuxd socket");
            UsbmuxdAddr::default()
        }
        None => UsbmuxdAddr::default(),
    }
}

/// Human readable form of a usbmuxd address, as accepted by [`parse_addr`].
#[must_use]
pub fn describe_addr(addr: &UsbmuxdAddr) -> String {
    match addr {
        #[cfg(unix)]
        UsbmuxdAddr::UnixSocket(path) => format!("UNIX:{path}"),
        UsbmuxdAddr::TcpSocket(socket) => socket.to_string(),
    }
}

/// A device attached through usbmuxd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedDevice {
    /// usbmuxd's handle for the device, valid while it stays attached.
    pub device_id: u32,
    /// The device's unique identifier.
    pub udid: String,
    /// How the device is linked.
    pub connection: Connection,
}

impl AttachedDevice {
    /// Links other than USB and Wi-Fi are not usable.
    fn from_usbmuxd(device: &UsbmuxdDevice) -> Option<Self> {
        let connection = match &device.connection_type {
            LinkType::Usb => Connection::Usb,
            LinkType::Network(_) => Connection::Network,
            _ => return None,
        };
        Some(Self {
            device_id: device.device_id,
            udid: device.udid.clone(),
            connection,
        })
    }
}

/// Fetch the usbmuxd device list.
async fn usbmuxd_devices(addr: &UsbmuxdAddr) -> DeviceResult<Vec<UsbmuxdDevice>> {
    let mut mux = addr.connect(0).await?;
    Ok(mux.get_devices().await?)
}

/// List the devices usbmuxd currently knows about.
///
/// # Errors
///
/// Returns an error if usbmuxd cannot be reached.
pub async fn list_devices(addr: &UsbmuxdAddr) -> DeviceResult<Vec<AttachedDevice>> {
    let devices: Vec<AttachedDevice> = usbmuxd_devices(addr)
        .await?
        .iter()
        .filter_map(AttachedDevice::from_usbmuxd)
        .collect();
    debug!(count = devices.len(), "usbmuxd listed devices");
    Ok(devices)
}

/// Find an attached device and build a provider for it.
///
/// # Errors
///
/// Returns [`DeviceError::NotFound`] if no device matches.
pub async fn find_device(
    addr: &UsbmuxdAddr,
    udid: Option<&str>,
    connection: Connection,
    label: &str,
) -> DeviceResult<(AttachedDevice, UsbmuxdProvider)> {
    let devices = usbmuxd_devices(addr).await?;
    let attached: Vec<Option<AttachedDevice>> =
        devices.iter().map(AttachedDevice::from_usbmuxd).collect();

    let (info, device) = select_device(&attached, udid, connection)
        .and_then(|i| Some((attached[i].clone()?, &devices[i])))
        .ok_or_else(|| DeviceError::NotFound {
            udid: udid.map(ToString::to_string),
            connection,
        })?;
    debug!(udid = %info.udid, device_id = info.device_id, "selected device");
    Ok((info, device.to_provider(addr.clone(), label)))
}

/// Position of the device matching `udid` (case-insensitively), or of the
/// first device with the given connection kind.
#[must_use]
pub fn select_device(
    devices: &[Option<AttachedDevice>],
    udid: Option<&str>,
    connection: Connection,
) -> Option<usize> {
    devices.iter().position(|d| match d {
        Some(d) if d.connection == connection => {
            udid.map_or(true, |udid| d.udid.eq_ignore_ascii_case(udid))
        }
        _ => false,
    })
}

/// Where and how to reach a started service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// The service name that was started.
    pub name: String,
    /// Device port the service listens on.
    pub port: u16,
    /// Whether the service expects a TLS session.
    pub ssl_enabled: bool,
}

/// Ask lockdownd to start `name`.
///
/// A reply without a usable port is a failed start.
///
/// # Errors
///
/// Returns [`DeviceError::NoPort`] for a zero port, or the device's error
/// if it refuses the service.
pub async fn start_service(
    lockdown: &mut LockdownClient,
    name: &str,
) -> DeviceResult<ServiceDescriptor> {
    let (port, ssl_enabled) = lockdown.start_service(name).await?;
    if port == 0 {
        return Err(DeviceError::NoPort(name.to_string()));
    }
    debug!(service = name, port, ssl_enabled, "service started");
    Ok(ServiceDescriptor {
        name: name.to_string(),
        port,
        ssl_enabled,
    })
}
