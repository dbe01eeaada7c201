//! Control-channel transport and per-acquisition data channels.

use crate::cancel::AbortHook;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use tracing::debug;

/// Byte stream carrying the control channel.
///
/// Besides being a stream, a transport knows how to reach the data port
/// the daemon hands out for each acquisition.
pub trait Transport: Read + Write + Send + 'static {
    /// Opens the data channel for one acquisition
    fn open_data_channel(&self, port: u16) -> io::Result<DataChannel>;
}

/// Read side of an acquisition's data connection
pub struct DataChannel {
    reader: Box<dyn Read + Send>,
    abort: Option<AbortHook>,
}

impl DataChannel {
    /// Wraps a reader without any way to interrupt it
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            abort: None,
        }
    }

    /// Attaches a hook that unblocks a pending read when called
    pub fn with_abort(mut self, hook: AbortHook) -> Self {
        self.abort = Some(hook);
        self
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Read + Send>, Option<AbortHook>) {
        (self.reader, self.abort)
    }
}

impl std::fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannel")
            .field("abortable", &self.abort.is_some())
            .finish()
    }
}

impl Transport for TcpStream {
    fn open_data_channel(&self, port: u16) -> io::Result<DataChannel> {
        let addr = SocketAddr::new(self.peer_addr()?.ip(), port);
        debug!("opening data channel to {}", addr);
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(self.read_timeout()?)?;
        let handle = stream.try_clone()?;
        Ok(DataChannel::new(stream).with_abort(Box::new(move || {
            let _ = handle.shutdown(Shutdown::Both);
        })))
    }
}

/// Dials the daemon named by the config
pub(crate) fn dial(config: &ClientConfig) -> Result<TcpStream> {
    let address = config.address();
    let targets = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| Error::connect(&address, e))?;

    let mut last_err = None;
    for target in targets {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&target, timeout),
            None => TcpStream::connect(target),
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(|e| Error::connect(&address, e))?;
                stream
                    .set_read_timeout(config.read_timeout)
                    .map_err(|e| Error::connect(&address, e))?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("connect to {} failed: {}", target, e);
                last_err = Some(e);
            }
        }
    }

    let err = last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    });
    Err(Error::connect(address, err))
}
