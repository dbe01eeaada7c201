//! Image reassembly.
//!
//! Turns the raw bytes of an acquisition into an immutable [`Image`].
//! The pixel layout follows the depth and colour flag reported with the
//! frame parameters:
//!
//! | depth | gray                          | colour                  |
//! |-------|-------------------------------|-------------------------|
//! | 1     | packed bits, white/black palette | not supported        |
//! | 8     | one byte, linear gray palette | three bytes, R G B      |
//! | 16    | one sample, little endian     | three samples, little endian |
//!
//! Rendering the buffer into a displayable bitmap is left to the caller.

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use tracing::debug;

/// Byte order of 16-bit samples on the data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Most significant byte first
    #[default]
    BigEndian,
    /// Least significant byte first
    LittleEndian,
}

impl ByteOrder {
    /// Marker word the daemon sends for little-endian data
    pub const LITTLE_ENDIAN_MARKER: i32 = 0x1234;

    /// Decodes the byte-order word returned by a Start call
    pub fn from_word(word: i32) -> Self {
        if word == Self::LITTLE_ENDIAN_MARKER {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }
}

/// Options applied while reassembling images
#[derive(Debug, Clone, Default)]
pub struct ImageConfig {
    /// Swap the first and third byte of 8-bit colour pixels
    pub swap_red_blue: bool,
}

impl ImageConfig {
    /// Creates the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether 8-bit colour pixels arrive as B G R
    pub fn swap_red_blue(mut self, swap: bool) -> Self {
        self.swap_red_blue = swap;
        self
    }
}

/// Shape of the raw data handed to [`Image::assemble`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    /// Pixels per line
    pub width: usize,
    /// Number of lines
    pub lines: usize,
    /// Bits per sample
    pub depth: i32,
    /// Three samples per pixel instead of one
    pub color: bool,
    /// Byte order of 16-bit samples
    pub byte_order: ByteOrder,
}

impl ImageLayout {
    fn samples_per_pixel(&self) -> usize {
        if self.color {
            3
        } else {
            1
        }
    }

    /// Bytes per line of the reassembled image
    pub fn stride(&self) -> Result<usize> {
        match (self.depth, self.color) {
            (1, false) => Ok((self.width + 7) / 8),
            (8, _) => Ok(self.width * self.samples_per_pixel()),
            (16, _) => Ok(self.width * self.samples_per_pixel() * 2),
            (depth, _) => Err(Error::UnsupportedDepth(depth)),
        }
    }
}

/// Pixel encoding of an [`Image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One bit per pixel, indexed into a white/black palette
    Indexed1,
    /// One byte per pixel, indexed into a 256-step gray palette
    Indexed8,
    /// Three bytes per pixel, R G B
    Rgb24,
    /// One little-endian 16-bit sample per pixel
    Gray16,
    /// Three little-endian 16-bit samples per pixel
    Rgb48,
}

/// A single decoded pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pixel {
    /// Palette index
    Indexed(u8),
    /// 8-bit colour
    Rgb8([u8; 3]),
    /// 16-bit gray level
    Gray16(u16),
    /// 16-bit colour
    Rgb16([u16; 3]),
}

/// RGB palette entry
pub type PaletteEntry = [u8; 3];

static MONO_PALETTE: [PaletteEntry; 2] = [[255, 255, 255], [0, 0, 0]];

static GRAY_PALETTE: [PaletteEntry; 256] = gray_palette();

const fn gray_palette() -> [PaletteEntry; 256] {
    let mut entries = [[0u8; 3]; 256];
    let mut i = 0;
    while i < 256 {
        entries[i] = [i as u8, i as u8, i as u8];
        i += 1;
    }
    entries
}

/// Frozen pixel buffer.
///
/// Cloning is cheap; the pixel data is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: usize,
    height: usize,
    depth: i32,
    format: PixelFormat,
    stride: usize,
    data: Bytes,
}

impl Image {
    /// Reassembles raw acquisition bytes.
    ///
    /// Bytes beyond `stride * lines` are ignored. 16-bit data is always
    /// stored little endian.
    pub fn assemble(raw: Bytes, layout: ImageLayout, config: &ImageConfig) -> Result<Self> {
        let stride = layout.stride()?;
        let expected = stride * layout.lines;
        if raw.len() < expected {
            return Err(Error::ImageSize {
                expected,
                actual: raw.len(),
            });
        }

        let format = match (layout.depth, layout.color) {
            (1, _) => PixelFormat::Indexed1,
            (8, false) => PixelFormat::Indexed8,
            (8, true) => PixelFormat::Rgb24,
            (_, false) => PixelFormat::Gray16,
            (_, true) => PixelFormat::Rgb48,
        };

        let raw = raw.slice(..expected);
        let data = match format {
            PixelFormat::Gray16 | PixelFormat::Rgb48
                if layout.byte_order == ByteOrder::BigEndian =>
            {
                let mut buf = BytesMut::from(&raw[..]);
                swap_pairs(&mut buf);
                buf.freeze()
            }
            PixelFormat::Rgb24 if config.swap_red_blue => {
                let mut buf = BytesMut::from(&raw[..]);
                for px in buf.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                buf.freeze()
            }
            _ => raw,
        };

        debug!(
            "assembled {}x{} image, depth {}, {:?}",
            layout.width, layout.lines, layout.depth, format
        );
        Ok(Self {
            width: layout.width,
            height: layout.lines,
            depth: layout.depth,
            format,
            stride,
            data,
        })
    }

    /// Width in pixels
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> usize {
        self.height
    }

    /// Bits per sample
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// True for three-sample pixels
    pub fn is_color(&self) -> bool {
        matches!(self.format, PixelFormat::Rgb24 | PixelFormat::Rgb48)
    }

    /// Pixel encoding
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per line
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Raw pixel data, `stride * height` bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Palette for indexed formats
    pub fn palette(&self) -> Option<&'static [PaletteEntry]> {
        match self.format {
            PixelFormat::Indexed1 => Some(&MONO_PALETTE),
            PixelFormat::Indexed8 => Some(&GRAY_PALETTE),
            _ => None,
        }
    }

    /// Decodes the pixel at `(x, y)`
    pub fn pixel(&self, x: usize, y: usize) -> Option<Pixel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let line = &self.data[y * self.stride..(y + 1) * self.stride];
        let sample16 = |i: usize| u16::from_le_bytes([line[i], line[i + 1]]);
        Some(match self.format {
            PixelFormat::Indexed1 => Pixel::Indexed((line[x / 8] >> (7 - x % 8)) & 1),
            PixelFormat::Indexed8 => Pixel::Indexed(line[x]),
            PixelFormat::Rgb24 => Pixel::Rgb8([line[x * 3], line[x * 3 + 1], line[x * 3 + 2]]),
            PixelFormat::Gray16 => Pixel::Gray16(sample16(x * 2)),
            PixelFormat::Rgb48 => {
                let base = x * 6;
                Pixel::Rgb16([sample16(base), sample16(base + 2), sample16(base + 4)])
            }
        })
    }
}

/// Swaps adjacent bytes; an odd trailing byte stays where it is
fn swap_pairs(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
