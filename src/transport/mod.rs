//! Serial transport collaborator
//!
//! The bridge only needs byte-level access to the link. Line discipline
//! (baud rate, raw mode) is set up when a device is opened. The link is split
//! into a read half owned by the inbound loop and a write half owned by the
//! outbound loop, so the two directions never share mutable state.

pub mod memory;
#[cfg(unix)]
pub mod tty;

use async_trait::async_trait;
use std::io;
use std::time::Duration;

pub use memory::{memory_link, MemoryPeer, MemoryReader, MemoryWriter};
#[cfg(unix)]
pub use tty::{open_tty, LineSettings};

/// Result of a bounded read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Byte(u8),
    /// Nothing arrived within the wait
    Timeout,
    /// The device went away
    Hangup,
}

/// Read half of the serial link
#[async_trait]
pub trait SerialReader: Send {
    /// Wait at most `timeout` for the next byte
    async fn read_byte(&mut self, timeout: Duration) -> io::Result<ReadOutcome>;
}

/// Write half of the serial link
#[async_trait]
pub trait SerialWriter: Send {
    /// Write some prefix of `bytes`, returning how many were accepted.
    /// `ErrorKind::Interrupted` is retryable.
    async fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Block until everything written has left the host
    async fn drain(&mut self) -> io::Result<()>;
}

/// Errors that mean the device is gone rather than a single failed transfer
pub fn is_hangup(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
    )
}

/// Hands out bytes of the last received chunk one at a time
#[derive(Debug, Default)]
pub(crate) struct ChunkCursor {
    chunk: Vec<u8>,
    pos: usize,
}

impl ChunkCursor {
    pub(crate) fn next_byte(&mut self) -> Option<u8> {
        let byte = self.chunk.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }

    /// Replace the chunk and return its first byte
    pub(crate) fn refill(&mut self, chunk: Vec<u8>) -> Option<u8> {
        self.chunk = chunk;
        self.pos = 0;
        self.next_byte()
    }
}
