//! Client configuration.

use crate::error::{Error, Result};
use crate::image::ImageConfig;
use crate::wire::SaneVersion;
use std::time::Duration;

/// Default saned control port
pub const DEFAULT_PORT: u16 = 6566;

/// Settings used to open a connection to a SANE daemon
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon host name or address
    pub host: String,
    /// Daemon control port
    pub port: u16,
    /// User name announced on Initialize and used for authorization
    pub username: String,
    /// Password used when a resource challenge is raised
    pub password: Option<String>,
    /// Protocol version announced to the daemon
    pub version: SaneVersion,
    /// Timeout for establishing TCP connections (none = OS default)
    pub connect_timeout: Option<Duration>,
    /// Read timeout on the control and data channels (none = block)
    pub read_timeout: Option<Duration>,
    /// Image reassembly settings
    pub image: ImageConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: default_username(),
            password: None,
            version: SaneVersion::CLIENT,
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: None,
            image: ImageConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config from a `host` or `host:port` address.
    ///
    /// Without a port, [`DEFAULT_PORT`] is used. IPv6 literals take a port
    /// only in brackets (`[::1]:6566`); a bare `::1` is a host.
    pub fn from_address(address: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(address.to_string());
        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match address.split_once(':') {
                Some((host, port)) if !port.contains(':') => (host, Some(port)),
                _ => (address, None),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        Ok(Self::new().host(host).port(port))
    }

    /// Sets the daemon host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the daemon port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the user name
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Sets the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the announced protocol version
    pub fn version(mut self, version: SaneVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets the connect timeout
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the image reassembly settings
    pub fn image(mut self, image: ImageConfig) -> Self {
        self.image = image;
        self
    }

    /// `host:port` string for display and dialing
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn default_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}
