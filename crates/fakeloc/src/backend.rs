//! The usbmuxd-backed device backend.

use std::fmt;

use async_trait::async_trait;
use idevice::lockdown::LockdownClient;
use idevice::pairing_file::PairingFile;
use idevice::provider::{IdeviceProvider, UsbmuxdProvider};
use idevice::usbmuxd::UsbmuxdAddr;
use idevice::{Idevice, IdeviceService};
use tracing::debug;

use crate::config::Config;
use crate::device::{self, AttachedDevice, DeviceError, DeviceResult, ServiceDescriptor};
use crate::simulate::{DeviceBackend, DeviceTarget};

/// Reaches devices through the host's usbmuxd.
#[derive(Debug, Clone)]
pub struct UsbmuxBackend {
    addr: UsbmuxdAddr,
    label: String,
}

/// A device selected from the usbmuxd list.
#[derive(Debug)]
pub struct OpenDevice {
    /// What usbmuxd reported for the device.
    pub info: AttachedDevice,
    provider: UsbmuxdProvider,
}

impl OpenDevice {
    async fn pairing_file(&self) -> DeviceResult<PairingFile> {
        self.provider
            .get_pairing_file()
            .await
            .map_err(|source| DeviceError::PairRecord {
                udid: self.info.udid.clone(),
                source,
            })
    }
}

/// A connection to a started service.
pub struct ServiceConnection {
    name: String,
    idevice: Idevice,
}

impl fmt::Debug for ServiceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConnection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl UsbmuxBackend {
    /// Create a backend talking to usbmuxd at `addr`.
    #[must_use]
    pub fn new(addr: UsbmuxdAddr, label: impl Into<String>) -> Self {
        Self {
            addr,
            label: label.into(),
        }
    }

    /// Create a backend from the device section of `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.usbmuxd_addr(), config.device.label.clone())
    }

    /// The usbmuxd address in use.
    #[must_use]
    pub fn addr(&self) -> &UsbmuxdAddr {
        &self.addr
    }

    /// List attached devices.
    ///
    /// # Errors
    ///
    /// Returns an error if usbmuxd cannot be reached.
    pub async fn list_devices(&self) -> DeviceResult<Vec<AttachedDevice>> {
        device::list_devices(&self.addr).await
    }
}

#[async_trait]
impl DeviceBackend for UsbmuxBackend {
    type Device = OpenDevice;
    type Lockdown = LockdownClient;
    type Descriptor = ServiceDescriptor;
    type Client = ServiceConnection;

    async fn open_device(&mut self, target: &DeviceTarget) -> DeviceResult<OpenDevice> {
        let (info, provider) = device::find_device(
            &self.addr,
            target.udid.as_deref(),
            target.connection,
            &self.label,
        )
        .await?;
        Ok(OpenDevice { info, provider })
    }

    async fn lockdown_handshake(&mut self, device: &OpenDevice) -> DeviceResult<LockdownClient> {
        let mut lockdown = LockdownClient::connect(&device.provider).await?;
        let pairing = device.pairing_file().await?;
        lockdown.start_session(&pairing).await?;
        debug!(udid = %device.info.udid, "lockdown session started");
        Ok(lockdown)
    }

    async fn start_service(
        &mut self,
        lockdown: &mut LockdownClient,
        name: &str,
    ) -> DeviceResult<ServiceDescriptor> {
        device::start_service(lockdown, name).await
    }

    async fn open_service_client(
        &mut self,
        device: &OpenDevice,
        _lockdown: &LockdownClient,
        descriptor: &ServiceDescriptor,
    ) -> DeviceResult<ServiceConnection> {
        let pairing = if descriptor.ssl_enabled {
            Some(device.pairing_file().await?)
        } else {
            None
        };

        let mut idevice = device.provider.connect(descriptor.port).await?;
        if let Some(pairing) = &pairing {
            idevice.start_session(pairing, false).await?;
        }
        debug!(service = %descriptor.name, port = descriptor.port, "service connected");
        Ok(ServiceConnection {
            name: descriptor.name.clone(),
            idevice,
        })
    }

    async fn send(&mut self, client: &mut ServiceConnection, message: &[u8]) -> DeviceResult<()> {
        client.idevice.send_raw(message).await?;
        debug!(service = %client.name, sent = message.len(), "location message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Connection, DEFAULT_SERVICES};
    use crate::device::tests::{answer_start_service, lockdown_pair};
    use crate::simulate::LocationSimulator;
    use idevice::usbmuxd::UsbmuxdDevice;
    use idevice::IdeviceError;
    use std::sync::{Arc, Mutex};

    /// Runs the real service start against a lockdownd peer on a duplex
    /// stream. The other steps are stand-ins.
    struct DuplexBackend {
        inner: UsbmuxBackend,
        lockdown: Option<LockdownClient>,
        sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    }

    impl fmt::Debug for DuplexBackend {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("DuplexBackend").finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl DeviceBackend for DuplexBackend {
        type Device = ();
        type Lockdown = LockdownClient;
        type Descriptor = ServiceDescriptor;
        type Client = String;

        async fn open_device(&mut self, _target: &DeviceTarget) -> DeviceResult<()> {
            Ok(())
        }

        async fn lockdown_handshake(&mut self, _device: &()) -> DeviceResult<LockdownClient> {
            self.lockdown
                .take()
                .ok_or(DeviceError::Idevice(IdeviceError::NoEstablishedConnection))
        }

        async fn start_service(
            &mut self,
            lockdown: &mut LockdownClient,
            name: &str,
        ) -> DeviceResult<ServiceDescriptor> {
            self.inner.start_service(lockdown, name).await
        }

        async fn open_service_client(
            &mut self,
            _device: &(),
            _lockdown: &LockdownClient,
            descriptor: &ServiceDescriptor,
        ) -> DeviceResult<String> {
            Ok(format!("{}:{}", descriptor.name, descriptor.port))
        }

        async fn send(&mut self, client: &mut String, message: &[u8]) -> DeviceResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((client.clone(), message.to_vec()));
            Ok(())
        }
    }

    /// A backend whose usbmuxd is never reached.
    fn idle_backend() -> UsbmuxBackend {
        UsbmuxBackend::new(device::parse_addr("127.0.0.1:1").unwrap(), "fakeloc")
    }

    #[cfg(unix)]
    fn unix_backend(path: &str) -> UsbmuxBackend {
        UsbmuxBackend::new(device::parse_addr(&format!("UNIX:{path}")).unwrap(), "fakeloc")
    }

    #[cfg(unix)]
    #[test]
    fn test_from_config_uses_custom_address_and_label() {
        let mut config = Config::default();
        config.device.usbmuxd_address = Some("UNIX:/tmp/fakeloc-usbmuxd".to_string());
        config.device.label = "tester".to_string();

        let backend = UsbmuxBackend::from_config(&config);
        assert_eq!(
            device::describe_addr(backend.addr()),
            "UNIX:/tmp/fakeloc-usbmuxd"
        );
        assert_eq!(backend.label, "tester");
    }

    #[tokio::test]
    async fn test_start_service_passes_port_and_ssl() {
        let mut backend = idle_backend();
        let (mut lockdown, mut server) = lockdown_pair();

        let (descriptor, _) = tokio::join!(
            backend.start_service(&mut lockdown, DEFAULT_SERVICES[1]),
            answer_start_service(&mut server, 62078)
        );
        let descriptor = descriptor.unwrap();

        assert_eq!(descriptor.port, 62078);
        assert!(descriptor.ssl_enabled);
    }

    #[tokio::test]
    async fn test_zero_port_falls_back_to_next_candidate() {
        let (lockdown, mut server) = lockdown_pair();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let backend = DuplexBackend {
            inner: idle_backend(),
            lockdown: Some(lockdown),
            sent: sent.clone(),
        };

        let peer = tokio::spawn(async move {
            let first = answer_start_service(&mut server, 0).await;
            let second = answer_start_service(&mut server, 5000).await;
            vec![first, second]
        });

        let mut sim = LocationSimulator::new(backend, DeviceTarget::any_usb());
        sim.stop().await.unwrap();

        assert_eq!(peer.await.unwrap(), vec![DEFAULT_SERVICES[0], DEFAULT_SERVICES[1]]);
        assert_eq!(
            sent.lock().unwrap().as_slice(),
            &[(format!("{}:5000", DEFAULT_SERVICES[1]), vec![0u8, 0, 0, 1])]
        );
    }

    #[tokio::test]
    async fn test_all_zero_ports_mean_no_service() {
        let (lockdown, mut server) = lockdown_pair();
        let backend = DuplexBackend {
            inner: idle_backend(),
            lockdown: Some(lockdown),
            sent: Arc::default(),
        };

        let peer = tokio::spawn(async move {
            for _ in 0..DEFAULT_SERVICES.len() {
                answer_start_service(&mut server, 0).await;
            }
        });

        let mut sim = LocationSimulator::new(backend, DeviceTarget::any_usb());
        let err = sim.stop().await.unwrap_err();
        peer.await.unwrap();

        assert!(matches!(err, crate::Error::ServiceUnavailable { ref tried } if tried.len() == 3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_device_fails_without_usbmuxd() {
        let mut backend = unix_backend("/nonexistent/fakeloc/usbmuxd");
        let err = backend
            .open_device(&DeviceTarget::any_usb())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Idevice(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tls_service_needs_pair_record() {
        let mut backend = unix_backend("/nonexistent/fakeloc/usbmuxd");
        let usbmuxd_device = UsbmuxdDevice {
            connection_type: idevice::usbmuxd::Connection::Usb,
            udid: "00008030-FAKE".to_string(),
            device_id: 7,
        };
        let device = OpenDevice {
            info: AttachedDevice {
                device_id: 7,
                udid: "00008030-FAKE".to_string(),
                connection: Connection::Usb,
            },
            provider: usbmuxd_device.to_provider(backend.addr().clone(), "fakeloc"),
        };
        let (lockdown, _server) = lockdown_pair();
        let mut descriptor = ServiceDescriptor {
            name: DEFAULT_SERVICES[1].to_string(),
            port: 5000,
            ssl_enabled: true,
        };

        let err = backend
            .open_service_client(&device, &lockdown, &descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::PairRecord { ref udid, .. } if udid == "00008030-FAKE"));

        descriptor.ssl_enabled = false;
        let err = backend
            .open_service_client(&device, &lockdown, &descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Idevice(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_device_through_fake_usbmuxd() {
        use plist::{Dictionary, Value};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = std::env::temp_dir().join(format!("fakeloc-backend-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let socket_path = dir.join("usbmuxd");
        let _ = std::fs::remove_file(&socket_path);
        let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let len = stream.read_u32_le().await.unwrap() as usize;
            let _version = stream.read_u32_le().await.unwrap();
            let _message = stream.read_u32_le().await.unwrap();
            let tag = stream.read_u32_le().await.unwrap();
            let mut body = vec![0u8; len - 16];
            stream.read_exact(&mut body).await.unwrap();
            let request = Value::from_reader(std::io::Cursor::new(body))
                .unwrap()
                .into_dictionary()
                .unwrap();
            assert_eq!(
                request.get("MessageType").and_then(Value::as_string),
                Some("ListDevices")
            );

            let mut props = Dictionary::new();
            props.insert("ConnectionType".into(), "USB".into());
            props.insert("DeviceID".into(), 7u64.into());
            props.insert("SerialNumber".into(), "00008030-FAKE".into());
            let mut entry = Dictionary::new();
            entry.insert("DeviceID".into(), 7u64.into());
            entry.insert("MessageType".into(), "Attached".into());
            entry.insert("Properties".into(), Value::Dictionary(props));
            let mut reply = Dictionary::new();
            reply.insert("DeviceList".into(), Value::Array(vec![Value::Dictionary(entry)]));

            let mut out = Vec::new();
            Value::Dictionary(reply).to_writer_xml(&mut out).unwrap();
            let total = u32::try_from(out.len() + 16).unwrap();
            for word in [total, 1, 8, tag] {
                stream.write_u32_le(word).await.unwrap();
            }
            stream.write_all(&out).await.unwrap();
        });

        let mut backend = unix_backend(&socket_path.to_string_lossy());
        let device = backend
            .open_device(&DeviceTarget::any_usb())
            .await
            .unwrap();
        server.await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(device.info.udid, "00008030-FAKE");
        assert_eq!(device.info.device_id, 7);
        assert_eq!(device.info.connection, Connection::Usb);
    }
}
