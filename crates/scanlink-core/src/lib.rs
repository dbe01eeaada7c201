//! # scanlink-core
//!
//! A client library for the SANE network protocol, as spoken by `saned`.
//!
//! This crate provides the core functionality for:
//! - Connecting to a scanner daemon and listing its devices
//! - Reading and writing device options with local constraint checks
//! - Running multi-frame acquisitions, synchronously or in the background
//! - Reassembling raw scan data into a structured image buffer
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`wire`]: Word, string and array codec plus the protocol enums
//! - [`net`]: Procedure calls, authorization, connections and devices
//! - [`option`] and [`constraint`]: Typed option cells and their rules
//! - [`image`]: Raw data to pixel buffer
//! - [`scan_result`]: Background scans with callbacks
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use scanlink_core::{Connection, OptionValue};
//!
//! let conn = Connection::at_with("scanhost:6566", "bob", "secret")?;
//! for device in conn.devices()? {
//!     println!("{} ({} {})", device.name(), device.vendor(), device.model());
//! }
//!
//! let device = conn.open_device("pixma:04A91736")?;
//! if let Some(resolution) = device.option("resolution")? {
//!     let applied = resolution.set(&OptionValue::Int(300))?;
//!     println!("resolution set to {}", applied);
//! }
//!
//! let image = device.scan()?;
//! println!("{}x{} at depth {}", image.width(), image.height(), image.depth());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`Transport`]: Run the control channel over something other than TCP
//! - [`DeviceBackend`]: Drive options and scans from another source
//! - [`Dispatcher`]: Choose where background scan callbacks run
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod backend;
pub mod cancel;
pub mod config;
pub mod constraint;
pub mod error;
pub mod image;
pub mod net;
pub mod option;
pub mod scan_result;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

// Re-export primary types for convenience
pub use backend::{DeviceBackend, Parameters};
pub use cancel::CancelToken;
pub use config::{ClientConfig, DEFAULT_PORT};
pub use constraint::Constraint;
pub use error::{Error, Result};
pub use image::{ByteOrder, Image, ImageConfig, ImageLayout, Pixel, PixelFormat};
pub use net::{Connection, Credentials, DataChannel, Device, DeviceInfo, OpenedDevice, Transport};
pub use option::{DeviceOption, OptionCommand, OptionDescriptor, OptionValue};
pub use scan_result::{Dispatcher, InlineDispatcher, QueueDispatcher, ScanResult};
pub use wire::{Capabilities, FrameFormat, SaneVersion, Status, Unit, ValueType};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
