//! Capability seam between device options and whatever drives the device.
//!
//! The network session in [`crate::net`] is the implementation shipped
//! with this crate. A binding to a local driver library would implement
//! the same trait.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::image::Image;
use crate::option::{DeviceOption, OptionCommand, OptionDescriptor, OptionValue};
use crate::wire::FrameFormat;
use std::sync::Arc;

/// Geometry of the next frame, as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    /// Layout of the frame
    pub format: FrameFormat,
    /// True when this is the last frame of the image
    pub last_frame: bool,
    /// Bytes per scan line
    pub bytes_per_line: i32,
    /// Pixels per scan line
    pub pixels_per_line: i32,
    /// Number of lines, or -1 when unknown in advance
    pub lines: i32,
    /// Bits per sample
    pub depth: i32,
}

/// Operations an opened device must support.
pub trait DeviceBackend: Send + Sync {
    /// Name the device was opened with
    fn device_name(&self) -> &str;

    /// Gets, sets or automates an option. Local validation has already
    /// happened by the time this is called.
    fn control_option(
        &self,
        descriptor: &OptionDescriptor,
        command: OptionCommand<'_>,
    ) -> Result<OptionValue>;

    /// Returns the option list, loading it on first use
    fn options(&self) -> Result<Vec<Arc<DeviceOption>>>;

    /// Fetches the parameters of the next frame
    fn parameters(&self) -> Result<Parameters>;

    /// Acquires a complete image
    fn scan(&self, cancel: &CancelToken) -> Result<Image>;
}
