//! SANE network client.
//!
//! ## Session flow
//!
//! 1. [`Connection`] dials the daemon and sends Initialize
//! 2. [`Connection::devices`] lists devices, [`Device::open`] opens one
//! 3. [`OpenedDevice::options`] loads option descriptors; options are read
//!    and written through [`DeviceOption`](crate::DeviceOption)
//! 4. [`OpenedDevice::scan`] runs the acquisition loop
//!
//! All calls of one connection share a single control channel and are
//! serialized by a lock around the procedure caller.

mod auth;
mod caller;
mod connection;
mod device;
mod transport;

pub use auth::{Credentials, MD5_MARKER};
pub use caller::DeviceInfo;
pub use connection::Connection;
pub use device::{Device, OpenedDevice};
pub use transport::{DataChannel, Transport};
