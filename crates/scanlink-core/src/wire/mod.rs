//! SANE network wire codec.
//!
//! Everything on the control channel is built from a handful of primitives:
//!
//! - **Word**: 32-bit big-endian signed integer
//! - **String**: outbound, the word `255` followed by a 255-byte slot
//!   (value bytes, then zero padding); inbound, a length word followed by
//!   that many bytes, of which only the part before the first NUL is kept
//! - **Pointer array**: a count word, then for every slot an is-null word
//!   and, when the slot is present, the element itself
//! - **Array**: a count word, then that many elements
//!
//! The data channel of an acquisition carries image records: a length word
//! followed by the payload, terminated by a length of `-1`.
//!
//! Writes are buffered and flushed lazily before the next read, so a
//! request is put on the socket in one piece.

pub mod types;

pub use types::{
    Capabilities, Command, ConstraintKind, FrameFormat, OptionAction, OptionInfo, SaneVersion,
    Status, Unit, ValueType,
};

use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::io::{BufReader, Read, Write};
use tracing::{debug, trace};

/// Size of the fixed string slot used for every outbound string
pub const STRING_SLOT: usize = 255;

/// Record length that terminates an image stream
pub const END_OF_RECORDS: i32 = -1;

/// Number of fractional bits in a SANE fixed-point word
pub const FIXED_SHIFT: u32 = 16;

/// Converts a float to 16.16 fixed point, truncating toward zero
pub fn to_fixed(value: f64) -> i32 {
    (value * f64::from(1u32 << FIXED_SHIFT)) as i32
}

/// Converts a 16.16 fixed-point word back to a float
pub fn from_fixed(word: i32) -> f64 {
    f64::from(word) / f64::from(1u32 << FIXED_SHIFT)
}

/// Buffered codec over a bidirectional byte stream.
pub struct Wire<S> {
    stream: BufReader<S>,
    pending: BytesMut,
}

impl<S: Read + Write> Wire<S> {
    /// Wraps a connected stream
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            pending: BytesMut::with_capacity(512),
        }
    }

    /// Borrows the underlying stream
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Queues a word
    pub fn send_word(&mut self, word: i32) {
        trace!("send word {}", word);
        self.pending.put_i32(word);
    }

    /// Queues a string in a 255-byte slot, truncating longer values
    pub fn send_string(&mut self, value: &str) {
        trace!("send string {:?}", value);
        let bytes = value.as_bytes();
        let len = bytes.len().min(STRING_SLOT);
        self.pending.put_i32(STRING_SLOT as i32);
        self.pending.put_slice(&bytes[..len]);
        self.pending.put_bytes(0, STRING_SLOT - len);
    }

    /// Writes every queued byte to the stream
    pub fn flush(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            trace!("flush {} bytes", self.pending.len());
            let out = self.pending.split();
            let stream = self.stream.get_mut();
            stream.write_all(&out)?;
            stream.flush()?;
        }
        Ok(())
    }

    /// Reads one word, flushing pending output first
    pub fn read_word(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        let word = i32::from_be_bytes(buf);
        trace!("read word {}", word);
        Ok(word)
    }

    /// Reads a length-prefixed string.
    ///
    /// All declared bytes are consumed even when a NUL ends the value
    /// early, so the stream stays aligned.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_word()?;
        if len <= 0 {
            return Ok(String::new());
        }
        let raw = self.read_block(len as usize)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let value = String::from_utf8_lossy(&raw[..end]).into_owned();
        trace!("read string {:?}", value);
        Ok(value)
    }

    /// Reads exactly `len` bytes
    pub fn read_block(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a pointer array, skipping null slots.
    ///
    /// The decoder receives the slot index of each present element.
    pub fn read_pointer_array<T, F>(&mut self, mut decode: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self, usize) -> Result<T>,
    {
        let count = self.read_word()?;
        let mut items = Vec::with_capacity(count.clamp(0, 1024) as usize);
        for index in 0..count.max(0) as usize {
            let is_null = self.read_word()?;
            if is_null == 0 {
                items.push(decode(self, index)?);
            }
        }
        debug!("pointer array: {} slots, {} present", count, items.len());
        Ok(items)
    }

    /// Reads a plain array, dropping elements equal to `T::default()`
    pub fn read_array<T, F>(&mut self, mut decode: F) -> Result<Vec<T>>
    where
        T: Default + PartialEq,
        F: FnMut(&mut Self) -> Result<T>,
    {
        let count = self.read_word()?;
        let mut items = Vec::with_capacity(count.clamp(0, 1024) as usize);
        for _ in 0..count.max(0) {
            let item = decode(self)?;
            if item != T::default() {
                items.push(item);
            }
        }
        debug!("array: {} entries, {} kept", count, items.len());
        Ok(items)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.flush()?;
        self.stream.read_exact(buf).map_err(Error::from_read)?;
        Ok(())
    }
}

/// Reads one image record from a data channel and appends its payload.
///
/// Returns `Ok(None)` at the end-of-stream marker and the payload length
/// otherwise.
pub fn read_record<R: Read + ?Sized>(
    reader: &mut R,
    frame: &mut BytesMut,
) -> Result<Option<usize>> {
    let mut word = [0u8; 4];
    reader.read_exact(&mut word).map_err(Error::from_read)?;
    let len = i32::from_be_bytes(word);
    if len == END_OF_RECORDS {
        debug!("end of image records");
        return Ok(None);
    }
    if len < 0 {
        return Err(Error::protocol_violation(format!(
            "negative image record length {}",
            len
        )));
    }

    let len = len as usize;
    let start = frame.len();
    frame.resize(start + len, 0);
    reader
        .read_exact(&mut frame[start..])
        .map_err(Error::from_read)?;
    trace!("image record of {} bytes", len);
    Ok(Some(len))
}
