//! Serial device transport
//!
//! Reads happen on a dedicated OS thread so a blocking tty read never holds
//! up runtime shutdown; bytes are handed to the async side over a channel.
//! Writes are issued synchronously on the descriptor (on the blocking pool),
//! so a failed write is reported for the frame that caused it.
//!
//! The line is switched to raw 8N1 at the requested baud rate on open. The
//! previous settings are kept in `LineSettings` and put back by `restore`.

use async_trait::async_trait;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, SetArg, SpecialCharacterIndices, Termios,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ChunkCursor, ReadOutcome, SerialReader, SerialWriter};

const READ_CHUNK: usize = 256;

/// Backoff after a failed read, keeps a broken device from spinning the CPU
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// EIO, reported by USB serial adapters when unplugged
const EIO: i32 = 5;

fn is_device_gone(err: &io::Error) -> bool {
    err.raw_os_error() == Some(EIO) || super::is_hangup(err)
}

fn baud_rate(rate: u32) -> io::Result<BaudRate> {
    let baud = match rate {
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("baud rate {} is not supported", other),
            ))
        }
    };
    Ok(baud)
}

/// Line settings the device had before it was opened
pub struct LineSettings {
    file: File,
    saved: Termios,
}

impl LineSettings {
    /// Put the saved settings back. Call after both loops have stopped.
    pub fn restore(self) -> io::Result<()> {
        termios::tcsetattr(&self.file, SetArg::TCSANOW, &self.saved)?;
        debug!("Serial line settings restored");
        Ok(())
    }
}

fn configure_raw(file: &File, baud: BaudRate) -> io::Result<Termios> {
    let saved = termios::tcgetattr(file)?;

    let mut raw = saved.clone();
    termios::cfmakeraw(&mut raw);
    raw.control_flags.remove(ControlFlags::CSTOPB | ControlFlags::PARENB);
    raw.control_flags |= ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD;
    raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    termios::cfsetspeed(&mut raw, baud)?;

    termios::tcflush(file, termios::FlushArg::TCIOFLUSH)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &raw)?;
    Ok(saved)
}

/// Open a serial device in raw mode and split it into read and write halves
pub fn open_tty(
    path: impl AsRef<Path>,
    baud: u32,
) -> io::Result<(TtyReader, TtyWriter, LineSettings)> {
    let path = path.as_ref();
    let baud = baud_rate(baud)?;
    let file = OpenOptions::new().read(true).write(true).open(path)?;

    let saved = configure_raw(&file, baud)?;
    let settings = LineSettings {
        file: file.try_clone()?,
        saved,
    };
    let read_file = file.try_clone()?;

    let (tx, rx) = mpsc::channel(64);
    let name = path.display().to_string();
    thread::Builder::new()
        .name("serial-reader".to_string())
        .spawn(move || read_thread(read_file, tx, name))?;

    debug!("Opened serial device {} at {:?}", path.display(), baud);
    Ok((
        TtyReader {
            rx,
            cursor: ChunkCursor::default(),
        },
        TtyWriter::from_file(file),
        settings,
    ))
}

fn read_thread(mut file: File, tx: mpsc::Sender<io::Result<Vec<u8>>>, name: String) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match file.read(&mut buf) {
            Ok(0) => {
                debug!("Serial device {} reached EOF", name);
                break;
            }
            Ok(n) => {
                if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let gone = is_device_gone(&e);
                if tx.blocking_send(Err(e)).is_err() || gone {
                    break;
                }
                thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }
    // Dropping the sender reports a hangup to the reader
}

/// Read half of a serial device
pub struct TtyReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    cursor: ChunkCursor,
}

#[async_trait]
impl SerialReader for TtyReader {
    async fn read_byte(&mut self, timeout: Duration) -> io::Result<ReadOutcome> {
        if let Some(byte) = self.cursor.next_byte() {
            return Ok(ReadOutcome::Byte(byte));
        }

        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(ReadOutcome::Timeout),
            Ok(None) => Ok(ReadOutcome::Hangup),
            Ok(Some(Err(e))) if is_device_gone(&e) => {
                warn!("Serial device error: {}", e);
                Ok(ReadOutcome::Hangup)
            }
            Ok(Some(Err(e))) => Err(e),
            Ok(Some(Ok(chunk))) => Ok(self
                .cursor
                .refill(chunk)
                .map_or(ReadOutcome::Timeout, ReadOutcome::Byte)),
        }
    }
}

/// Write half of a serial device
pub struct TtyWriter {
    file: Arc<File>,
}

impl TtyWriter {
    pub(crate) fn from_file(file: File) -> Self {
        Self {
            file: Arc::new(file),
        }
    }
}

async fn on_blocking_pool<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[async_trait]
impl SerialWriter for TtyWriter {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let file = Arc::clone(&self.file);
        let bytes = bytes.to_vec();
        on_blocking_pool(move || (&*file).write(&bytes)).await
    }

    async fn drain(&mut self) -> io::Result<()> {
        let file = Arc::clone(&self.file);
        on_blocking_pool(move || termios::tcdrain(&*file).map_err(io::Error::from)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::OFlag;
    use nix::sys::termios::LocalFlags;

    #[test]
    fn test_rejects_unsupported_baud_rate() {
        assert!(baud_rate(115200).is_ok());
        assert_eq!(
            baud_rate(31250).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_write_error_belongs_to_the_failing_write() {
        let file = OpenOptions::new().write(true).open("/dev/full").unwrap();
        let mut writer = TtyWriter::from_file(file);

        assert!(writer.write(&[0x90, 0x40, 0x7F]).await.is_err());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_write_reports_bytes_accepted() {
        let file = OpenOptions::new().write(true).open("/dev/null").unwrap();
        let mut writer = TtyWriter::from_file(file);

        assert_eq!(writer.write(&[0x90, 0x40, 0x7F]).await.unwrap(), 3);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_raw_mode_passes_bytes_untouched_and_restores() {
        use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};

        let mut master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).unwrap();
        grantpt(&master).unwrap();
        unlockpt(&master).unwrap();
        let path = ptsname_r(&master).unwrap();

        let line = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        assert!(termios::tcgetattr(&line)
            .unwrap()
            .local_flags
            .contains(LocalFlags::ICANON));

        let (mut reader, _writer, settings) = open_tty(&path, 115200).unwrap();
        assert!(!termios::tcgetattr(&line)
            .unwrap()
            .local_flags
            .contains(LocalFlags::ICANON));

        // CR and DEL are line-editing characters in canonical mode
        master.write_all(&[0x90, 0x0D, 0x7F]).unwrap();
        let wait = Duration::from_secs(2);
        let mut got = Vec::new();
        while got.len() < 3 {
            match reader.read_byte(wait).await.unwrap() {
                ReadOutcome::Byte(byte) => got.push(byte),
                other => panic!("expected a byte, got {:?}", other),
            }
        }
        assert_eq!(got, vec![0x90, 0x0D, 0x7F]);

        settings.restore().unwrap();
        assert!(termios::tcgetattr(&line)
            .unwrap()
            .local_flags
            .contains(LocalFlags::ICANON));
    }
}
