//! In-memory serial link
//!
//! Stands in for a device in tests and demos. The `MemoryPeer` plays the
//! hardware side: it injects bytes towards the bridge, collects what the
//! bridge writes, and can simulate partial writes, write errors and hangup.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{ChunkCursor, ReadOutcome, SerialReader, SerialWriter};

#[derive(Debug, Default)]
struct WriteFaults {
    errors: Mutex<VecDeque<io::ErrorKind>>,
    /// 0 means unlimited
    max_write: AtomicUsize,
}

/// Create a connected reader/writer pair plus the device-side handle
pub fn memory_link() -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (to_bridge, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_bridge) = mpsc::unbounded_channel();
    let faults = Arc::new(WriteFaults::default());

    (
        MemoryReader {
            rx: from_peer,
            cursor: ChunkCursor::default(),
        },
        MemoryWriter {
            tx: to_peer,
            faults: faults.clone(),
        },
        MemoryPeer {
            tx: Some(to_bridge),
            rx: from_bridge,
            faults,
            pending: VecDeque::new(),
        },
    )
}

/// Device side of an in-memory link
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<io::Result<Vec<u8>>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    faults: Arc<WriteFaults>,
    pending: VecDeque<u8>,
}

impl MemoryPeer {
    /// Send bytes to the bridge as one read chunk
    pub fn send(&self, bytes: &[u8]) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(bytes.to_vec()));
        }
    }

    /// Fail the bridge's next read with `kind`, after any bytes already sent
    pub fn inject_read_error(&self, kind: io::ErrorKind) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(io::Error::from(kind)));
        }
    }

    /// Simulate the device disappearing
    pub fn hangup(&mut self) {
        self.tx = None;
    }

    /// Fail the next write with `kind`
    pub fn inject_write_error(&self, kind: io::ErrorKind) {
        self.faults.errors.lock().push_back(kind);
    }

    /// Accept at most `n` bytes per write call (0 = unlimited)
    pub fn limit_write_size(&self, n: usize) {
        self.faults.max_write.store(n, Ordering::Relaxed);
    }

    /// Collect exactly `n` bytes written by the bridge, or whatever arrived
    /// before `timeout` elapsed
    pub async fn recv_bytes(&mut self, n: usize, timeout: Duration) -> Vec<u8> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.pending.len() < n {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(chunk)) => self.pending.extend(chunk),
                Ok(None) | Err(_) => break,
            }
        }
        let take = n.min(self.pending.len());
        self.pending.drain(..take).collect()
    }

    /// Everything written so far that has not been collected
    pub fn take_written(&mut self) -> Vec<u8> {
        while let Ok(chunk) = self.rx.try_recv() {
            self.pending.extend(chunk);
        }
        self.pending.drain(..).collect()
    }
}

/// Bridge-side read half of an in-memory link
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
    cursor: ChunkCursor,
}

#[async_trait]
impl SerialReader for MemoryReader {
    async fn read_byte(&mut self, timeout: Duration) -> io::Result<ReadOutcome> {
        if let Some(byte) = self.cursor.next_byte() {
            return Ok(ReadOutcome::Byte(byte));
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(ReadOutcome::Timeout),
            Ok(None) => Ok(ReadOutcome::Hangup),
            Ok(Some(Err(e))) => Err(e),
            Ok(Some(Ok(chunk))) => Ok(self
                .cursor
                .refill(chunk)
                .map_or(ReadOutcome::Timeout, ReadOutcome::Byte)),
        }
    }
}

/// Bridge-side write half of an in-memory link
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    faults: Arc<WriteFaults>,
}

#[async_trait]
impl SerialWriter for MemoryWriter {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.faults.errors.lock().pop_front() {
            return Err(io::Error::from(kind));
        }
        let limit = match self.faults.max_write.load(Ordering::Relaxed) {
            0 => bytes.len(),
            max => max.min(bytes.len()),
        };
        self.tx
            .send(bytes[..limit].to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(limit)
    }

    async fn drain(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let (mut reader, mut writer, mut peer) = memory_link();
        peer.send(&[0x90, 0x40]);

        let timeout = Duration::from_millis(100);
        assert_eq!(reader.read_byte(timeout).await.unwrap(), ReadOutcome::Byte(0x90));
        assert_eq!(reader.read_byte(timeout).await.unwrap(), ReadOutcome::Byte(0x40));
        assert_eq!(reader.read_byte(timeout).await.unwrap(), ReadOutcome::Timeout);

        assert_eq!(writer.write(&[0xF8]).await.unwrap(), 1);
        assert_eq!(peer.recv_bytes(1, timeout).await, vec![0xF8]);
    }

    #[tokio::test]
    async fn test_hangup_reported_after_buffered_bytes() {
        let (mut reader, _writer, mut peer) = memory_link();
        peer.send(&[0xFE]);
        peer.hangup();

        let timeout = Duration::from_millis(100);
        assert_eq!(reader.read_byte(timeout).await.unwrap(), ReadOutcome::Byte(0xFE));
        assert_eq!(reader.read_byte(timeout).await.unwrap(), ReadOutcome::Hangup);
    }

    #[tokio::test]
    async fn test_read_error_arrives_in_order() {
        let (mut reader, _writer, peer) = memory_link();
        peer.send(&[0x90]);
        peer.inject_read_error(io::ErrorKind::Other);
        peer.send(&[0x40]);

        let timeout = Duration::from_millis(100);
        assert_eq!(reader.read_byte(timeout).await.unwrap(), ReadOutcome::Byte(0x90));
        let err = reader.read_byte(timeout).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(reader.read_byte(timeout).await.unwrap(), ReadOutcome::Byte(0x40));
    }

    #[tokio::test]
    async fn test_write_faults() {
        let (_reader, mut writer, peer) = memory_link();
        peer.limit_write_size(2);
        peer.inject_write_error(io::ErrorKind::Interrupted);

        let err = writer.write(&[1, 2, 3]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert_eq!(writer.write(&[1, 2, 3]).await.unwrap(), 2);
    }
}
