//! Devices reachable through a connection.
//!
//! A [`Device`] is an entry of the daemon's device list. Opening it yields
//! an [`OpenedDevice`], which owns a handle on the daemon together with
//! the option list of that handle. Dropping an opened device closes the
//! handle, cancelling a running scan first.

use crate::backend::{DeviceBackend, Parameters};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::image::{Image, ImageConfig};
use crate::net::auth::Credentials;
use crate::net::caller::{DeviceInfo, ProcedureCaller};
use crate::net::transport::Transport;
use crate::option::{DeviceOption, OptionCommand, OptionDescriptor, OptionValue};
use crate::scan_result::{Dispatcher, InlineDispatcher, ScanResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

pub(crate) type SharedCaller<T> = Arc<Mutex<ProcedureCaller<T>>>;

/// State shared by the pieces of one connection
pub(crate) struct SessionContext<T> {
    pub(crate) caller: SharedCaller<T>,
    pub(crate) credentials: Credentials,
    pub(crate) image: ImageConfig,
}

impl<T> Clone for SessionContext<T> {
    fn clone(&self) -> Self {
        Self {
            caller: Arc::clone(&self.caller),
            credentials: self.credentials.clone(),
            image: self.image.clone(),
        }
    }
}

/// A device listed by the daemon, not yet opened
pub struct Device<T: Transport = TcpStream> {
    info: DeviceInfo,
    context: SessionContext<T>,
}

impl<T: Transport> Device<T> {
    pub(crate) fn new(info: DeviceInfo, context: SessionContext<T>) -> Self {
        Self { info, context }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Manufacturer (empty when the device was not listed)
    pub fn vendor(&self) -> &str {
        &self.info.vendor
    }

    /// Model name (empty when the device was not listed)
    pub fn model(&self) -> &str {
        &self.info.model
    }

    /// Device type (empty when the device was not listed)
    pub fn kind(&self) -> &str {
        &self.info.kind
    }

    /// Full device entry
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Opens the device on the daemon
    pub fn open(&self) -> Result<OpenedDevice<T>> {
        let handle = self
            .context
            .caller
            .lock()
            .open(&self.info.name, &self.context.credentials)?;
        Ok(OpenedDevice {
            session: NetworkSession::new(self.info.name.clone(), handle, self.context.clone()),
        })
    }
}

impl<T: Transport> Clone for Device<T> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            context: self.context.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("info", &self.info).finish()
    }
}

/// Open handle on the daemon plus its option list
pub(crate) struct NetworkSession<T: Transport> {
    name: String,
    handle: i32,
    context: SessionContext<T>,
    options: RwLock<Option<Vec<Arc<DeviceOption>>>>,
    active_scan: Mutex<Option<CancelToken>>,
    scanning: AtomicBool,
    closed: AtomicBool,
    this: Weak<NetworkSession<T>>,
}

impl<T: Transport> NetworkSession<T> {
    fn new(name: String, handle: i32, context: SessionContext<T>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name,
            handle,
            context,
            options: RwLock::new(None),
            active_scan: Mutex::new(None),
            scanning: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::device_closed(&self.name));
        }
        Ok(())
    }

    /// Refetches descriptors and rebinds them onto the existing options by
    /// number. Runs with the caller lock held.
    fn reload_options(&self, caller: &mut ProcedureCaller<T>) -> Result<()> {
        let descriptors = caller.get_option_descriptors(self.handle)?;
        let backend: Weak<dyn DeviceBackend> = self.this.clone();

        let mut list = self.options.write();
        let mut existing: HashMap<i32, Arc<DeviceOption>> = list
            .take()
            .unwrap_or_default()
            .into_iter()
            .map(|opt| (opt.number(), opt))
            .collect();

        let mut fresh = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match existing.remove(&descriptor.number) {
                Some(option) => {
                    option.rebind(descriptor);
                    fresh.push(option);
                }
                None => fresh.push(Arc::new(DeviceOption::new(descriptor, backend.clone()))),
            }
        }
        if !existing.is_empty() {
            debug!("{} options vanished on reload", existing.len());
        }
        debug!("{} now has {} options", self.name, fresh.len());
        *list = Some(fresh);
        Ok(())
    }

    fn run_scan(&self, cancel: &CancelToken) -> Result<Image> {
        self.ensure_open()?;
        *self.active_scan.lock() = Some(cancel.clone());

        let result = {
            let mut caller = self.context.caller.lock();
            self.scanning.store(true, Ordering::SeqCst);
            let result = caller.scan(
                self.handle,
                &self.context.credentials,
                cancel,
                &self.context.image,
            );
            self.scanning.store(false, Ordering::SeqCst);
            result
        };

        self.active_scan.lock().take();
        result
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let active = self.active_scan.lock().clone();
        if let Some(token) = active {
            debug!("cancelling active scan on {} before closing", self.name);
            token.cancel();
        }

        let mut caller = self.context.caller.lock();
        if caller.is_exited() {
            return Ok(());
        }
        if self.scanning.load(Ordering::SeqCst) {
            caller.cancel(self.handle)?;
        }
        caller.close(self.handle)
    }
}

impl<T: Transport> DeviceBackend for NetworkSession<T> {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn control_option(
        &self,
        descriptor: &OptionDescriptor,
        command: OptionCommand<'_>,
    ) -> Result<OptionValue> {
        self.ensure_open()?;
        let mut caller = self.context.caller.lock();
        caller.control_option(
            self.handle,
            descriptor,
            command,
            &self.context.credentials,
            |caller| self.reload_options(caller),
        )
    }

    fn options(&self) -> Result<Vec<Arc<DeviceOption>>> {
        self.ensure_open()?;
        if let Some(list) = self.options.read().as_ref() {
            return Ok(list.clone());
        }

        let mut caller = self.context.caller.lock();
        // another thread may have loaded the list while we waited
        if self.options.read().is_none() {
            self.reload_options(&mut caller)?;
        }
        Ok(self.options.read().clone().unwrap_or_default())
    }

    fn parameters(&self) -> Result<Parameters> {
        self.ensure_open()?;
        self.context.caller.lock().get_parameters(self.handle)
    }

    fn scan(&self, cancel: &CancelToken) -> Result<Image> {
        self.run_scan(cancel)
    }
}

/// An opened device
pub struct OpenedDevice<T: Transport = TcpStream> {
    session: Arc<NetworkSession<T>>,
}

impl<T: Transport> OpenedDevice<T> {
    /// Device name
    pub fn name(&self) -> &str {
        &self.session.name
    }

    /// Option list, fetched on first use
    pub fn options(&self) -> Result<Vec<Arc<DeviceOption>>> {
        self.session.options()
    }

    /// Looks an option up by name
    pub fn option(&self, name: &str) -> Result<Option<Arc<DeviceOption>>> {
        Ok(self.options()?.into_iter().find(|opt| opt.name() == name))
    }

    /// Parameters of the next frame
    pub fn parameters(&self) -> Result<Parameters> {
        self.session.parameters()
    }

    /// Scans one image, blocking the calling thread
    pub fn scan(&self) -> Result<Image> {
        self.session.run_scan(&CancelToken::new())
    }

    /// Scans one image; cancelling `cancel` aborts the acquisition
    pub fn scan_with(&self, cancel: &CancelToken) -> Result<Image> {
        self.session.run_scan(cancel)
    }

    /// Scans in the background, running callbacks on the worker thread
    pub fn scan_async<C, E>(&self, on_complete: C, on_failure: E) -> Result<ScanResult>
    where
        C: FnOnce(Image) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        self.scan_async_on(Arc::new(InlineDispatcher), on_complete, on_failure)
    }

    /// Scans in the background, running callbacks through `dispatcher`
    pub fn scan_async_on<C, E>(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        on_complete: C,
        on_failure: E,
    ) -> Result<ScanResult>
    where
        C: FnOnce(Image) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        self.session.ensure_open()?;
        let session = Arc::clone(&self.session);
        ScanResult::spawn(
            CancelToken::new(),
            dispatcher,
            move |token| session.run_scan(token),
            on_complete,
            on_failure,
        )
    }

    /// Closes the handle, cancelling a running scan first
    pub fn close(self) -> Result<()> {
        self.session.close()
    }
}

impl<T: Transport> Drop for OpenedDevice<T> {
    fn drop(&mut self) {
        if let Err(e) = self.session.close() {
            warn!("failed to close {}: {}", self.session.name, e);
        }
    }
}

impl<T: Transport> std::fmt::Debug for OpenedDevice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedDevice")
            .field("name", &self.session.name)
            .field("handle", &self.session.handle)
            .finish()
    }
}
