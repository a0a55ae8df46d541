//! Print-only mode for debugging a serial link
//!
//! Dumps every byte read from the device as hex and does nothing else: no
//! framing, no port routing, no bus traffic.

use std::io::{self, Write};
use std::time::Duration;
use tracing::{debug, info};

use crate::bridge::{ErrorStreak, StopFlag};
use crate::error::Result;
use crate::transport::{is_hangup, ReadOutcome, SerialReader};

/// Hex-dump serial input into `out` until hangup or stop. Returns the number
/// of bytes seen.
pub async fn run_print_only<R, O>(
    reader: &mut R,
    out: &mut O,
    read_timeout: Duration,
    stop: &StopFlag,
) -> Result<u64>
where
    R: SerialReader,
    O: Write,
{
    info!("Print-only mode: dumping serial input, nothing is forwarded");
    let mut errors = ErrorStreak::new("Serial read");
    let mut seen = 0u64;

    while !stop.is_stopped() {
        match reader.read_byte(read_timeout).await {
            Ok(ReadOutcome::Byte(byte)) => {
                errors.clear();
                write!(out, "{:02X} ", byte)?;
                out.flush()?;
                seen += 1;
            }
            Ok(ReadOutcome::Timeout) => {}
            Ok(ReadOutcome::Hangup) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if is_hangup(&e) => break,
            Err(e) => {
                errors.report(&e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    writeln!(out)?;
    debug!("Print-only mode done after {} bytes", seen);
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_link;

    #[tokio::test]
    async fn test_dumps_bytes_until_hangup() {
        let (mut reader, _writer, mut peer) = memory_link();
        peer.send(&[0x90, 0x40, 0x7F]);
        peer.send(&[0xF8]);
        peer.hangup();

        let mut out = Vec::new();
        let seen = run_print_only(
            &mut reader,
            &mut out,
            Duration::from_millis(50),
            &StopFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(seen, 4);
        assert_eq!(String::from_utf8(out).unwrap(), "90 40 7F F8 \n");
    }

    #[tokio::test]
    async fn test_returns_when_stopped() {
        let (mut reader, _writer, _peer) = memory_link();
        let stop = StopFlag::new();
        stop.request_stop();

        let mut out = Vec::new();
        let seen = run_print_only(&mut reader, &mut out, Duration::from_millis(10), &stop)
            .await
            .unwrap();
        assert_eq!(seen, 0);
    }
}
