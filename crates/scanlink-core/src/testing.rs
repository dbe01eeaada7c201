//! In-memory daemon stand-in for protocol tests.
//!
//! A [`Script`] lists the bytes the daemon would send; a [`MockTransport`]
//! replays them and records everything the client writes, so tests can
//! compare requests byte for byte.

use crate::net::{DataChannel, Transport};
use crate::wire::STRING_SLOT;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::mpsc;
use std::sync::Arc;

/// Byte sequence builder for replies and expected requests
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    bytes: Vec<u8>,
}

impl Script {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn word(mut self, word: i32) -> Self {
        self.bytes.extend_from_slice(&word.to_be_bytes());
        self
    }

    pub(crate) fn words(self, words: &[i32]) -> Self {
        words.iter().fold(self, |s, &w| s.word(w))
    }

    /// String as the daemon sends it: length including a trailing NUL
    pub(crate) fn string(self, value: &str) -> Self {
        if value.is_empty() {
            return self.word(0);
        }
        let mut s = self.word(value.len() as i32 + 1);
        s.bytes.extend_from_slice(value.as_bytes());
        s.bytes.push(0);
        s
    }

    /// String as the client sends it: a 255-byte slot
    pub(crate) fn slot(self, value: &str) -> Self {
        let mut s = self.word(STRING_SLOT as i32);
        let bytes = &value.as_bytes()[..value.len().min(STRING_SLOT)];
        s.bytes.extend_from_slice(bytes);
        s.bytes.resize(s.bytes.len() + STRING_SLOT - bytes.len(), 0);
        s
    }

    pub(crate) fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub(crate) fn then(mut self, other: Script) -> Self {
        self.bytes.extend(other.bytes);
        self
    }

    /// Option descriptor without a constraint
    pub(crate) fn descriptor(self, name: &str, value_type: i32, size: i32, caps: i32) -> Self {
        self.string(name)
            .string(name)
            .string("")
            .words(&[value_type, 0, size, caps, 0])
    }

    /// Image records terminated by the end marker
    pub(crate) fn records(chunks: &[&[u8]]) -> Self {
        chunks
            .iter()
            .fold(Script::new(), |s, chunk| s.word(chunk.len() as i32).raw(chunk))
            .word(-1)
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

enum DataFeed {
    Bytes(Vec<u8>),
    Stalled,
}

/// Reader that blocks until its abort hook fires
struct StalledReader(mpsc::Receiver<()>);

impl Read for StalledReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        let _ = self.0.recv();
        Err(io::ErrorKind::ConnectionAborted.into())
    }
}

/// Scripted transport
pub(crate) struct MockTransport {
    input: Cursor<Vec<u8>>,
    sent: Arc<Mutex<Vec<u8>>>,
    feeds: Mutex<VecDeque<DataFeed>>,
    ports: Arc<Mutex<Vec<u16>>>,
}

impl MockTransport {
    pub(crate) fn new(replies: Script) -> Self {
        Self {
            input: Cursor::new(replies.into_bytes()),
            sent: Arc::default(),
            feeds: Mutex::default(),
            ports: Arc::default(),
        }
    }

    /// Queues the payload of the next data channel
    pub(crate) fn with_data(self, payload: Script) -> Self {
        self.feeds
            .lock()
            .push_back(DataFeed::Bytes(payload.into_bytes()));
        self
    }

    /// Queues a data channel that never delivers anything
    pub(crate) fn with_stalled_data(self) -> Self {
        self.feeds.lock().push_back(DataFeed::Stalled);
        self
    }

    pub(crate) fn sent_handle(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.sent)
    }

    pub(crate) fn ports_handle(&self) -> Arc<Mutex<Vec<u16>>> {
        Arc::clone(&self.ports)
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sent.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn open_data_channel(&self, port: u16) -> io::Result<DataChannel> {
        self.ports.lock().push(port);
        match self.feeds.lock().pop_front() {
            Some(DataFeed::Bytes(bytes)) => Ok(DataChannel::new(Cursor::new(bytes))),
            Some(DataFeed::Stalled) => {
                let (tx, rx) = mpsc::channel::<()>();
                Ok(DataChannel::new(StalledReader(rx)).with_abort(Box::new(move || drop(tx))))
            }
            None => Err(io::ErrorKind::ConnectionRefused.into()),
        }
    }
}
