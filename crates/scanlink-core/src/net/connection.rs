//! Connections to a SANE daemon.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::net::auth::Credentials;
use crate::net::caller::{DeviceInfo, ProcedureCaller};
use crate::net::device::{Device, OpenedDevice, SessionContext};
use crate::net::transport::{dial, Transport};
use crate::wire::SaneVersion;
use parking_lot::Mutex;
use std::net::TcpStream;
use std::sync::Arc;
use tracing::{info, warn};

/// An initialized session with a SANE daemon.
///
/// Dropping the connection sends Exit. Devices opened through it keep the
/// control channel alive but fail with
/// [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) once Exit
/// has been sent.
pub struct Connection<T: Transport = TcpStream> {
    context: SessionContext<T>,
    version: SaneVersion,
    devices: Mutex<Option<Vec<DeviceInfo>>>,
}

impl Connection<TcpStream> {
    /// Connects to `host:port` with default settings
    pub fn at(address: &str) -> Result<Self> {
        Self::connect(&ClientConfig::from_address(address)?)
    }

    /// Connects to `host:port` with explicit credentials
    pub fn at_with(address: &str, username: &str, password: &str) -> Result<Self> {
        let config = ClientConfig::from_address(address)?
            .username(username)
            .password(password);
        Self::connect(&config)
    }

    /// Connects using a full configuration
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        info!("connecting to saned at {}", config.address());
        let stream = dial(config)?;
        Self::with_transport(stream, config)
    }
}

impl<T: Transport> Connection<T> {
    /// Initializes a session over an already connected transport
    pub fn with_transport(transport: T, config: &ClientConfig) -> Result<Self> {
        let mut caller = ProcedureCaller::new(transport);
        let version = caller.initialize(config.version, &config.username)?;
        info!("saned speaks protocol {}", version);

        Ok(Self {
            context: SessionContext {
                caller: Arc::new(Mutex::new(caller)),
                credentials: Credentials::new(
                    Some(config.username.as_str()),
                    config.password.as_deref(),
                ),
                image: config.image.clone(),
            },
            version,
            devices: Mutex::new(None),
        })
    }

    /// Version reported by the daemon
    pub fn version(&self) -> SaneVersion {
        self.version
    }

    /// Devices known to the daemon, fetched once and cached
    pub fn devices(&self) -> Result<Vec<Device<T>>> {
        let mut cached = self.devices.lock();
        if cached.is_none() {
            *cached = Some(self.context.caller.lock().get_devices()?);
        }
        Ok(cached
            .iter()
            .flatten()
            .map(|info| Device::new(info.clone(), self.context.clone()))
            .collect())
    }

    /// Drops the cached device list so the next call refetches it
    pub fn refresh_devices(&self) {
        self.devices.lock().take();
    }

    /// Opens a device by name without listing devices first
    pub fn open_device(&self, name: &str) -> Result<OpenedDevice<T>> {
        let info = DeviceInfo {
            name: name.to_string(),
            ..DeviceInfo::default()
        };
        Device::new(info, self.context.clone()).open()
    }

    /// Sends Exit and closes the session
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        let mut caller = self.context.caller.lock();
        if caller.is_exited() {
            return Ok(());
        }
        info!("closing saned session");
        caller.exit()
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("failed to send exit: {}", e);
        }
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("version", &self.version)
            .field("credentials", &self.context.credentials)
            .finish()
    }
}
