//! Serial -> bus direction

use std::io;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use super::{ErrorStreak, LoopExit, LoopReport, LoopStats, StopFlag};
use crate::bus::BusSink;
use crate::config::BridgeConfig;
use crate::midi::{Frame, FrameDecoder};
use crate::router::InboundRoute;
use crate::transport::{is_hangup, ReadOutcome, SerialReader};

/// Pause after a failed read so a wedged device does not spin the loop
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

pub struct InboundLoop {
    decoder: FrameDecoder,
    route: InboundRoute,
    read_timeout: Duration,
    stop: StopFlag,
    stats: LoopStats,
    read_errors: ErrorStreak,
    bus_errors: ErrorStreak,
}

impl InboundLoop {
    pub fn new(config: &BridgeConfig, route: InboundRoute, stop: StopFlag) -> Self {
        Self {
            decoder: FrameDecoder::new(config.sysex_buffer_size, config.sysex_overflow),
            route,
            read_timeout: config.read_timeout(),
            stop,
            stats: LoopStats::default(),
            read_errors: ErrorStreak::new("Serial read"),
            bus_errors: ErrorStreak::new("Bus send"),
        }
    }

    /// Read and forward until hangup or stop. Raises the stop flag on exit.
    pub async fn run<R, S>(mut self, mut reader: R, mut sink: S) -> LoopReport
    where
        R: SerialReader,
        S: BusSink,
    {
        debug!("Inbound loop started");

        let exit = loop {
            if self.stop.is_stopped() {
                break LoopExit::StopRequested;
            }

            match reader.read_byte(self.read_timeout).await {
                Ok(ReadOutcome::Byte(byte)) => {
                    self.read_errors.clear();
                    let now = Instant::now();
                    self.route.expire_if_idle(now);
                    self.route.record_traffic(now);
                    self.handle_byte(byte, &mut sink).await;
                }
                Ok(ReadOutcome::Timeout) => {
                    self.route.expire_if_idle(Instant::now());
                }
                Ok(ReadOutcome::Hangup) => {
                    info!("Serial device hung up");
                    break LoopExit::Hangup;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_hangup(&e) => {
                    info!("Serial device hung up: {}", e);
                    break LoopExit::Hangup;
                }
                Err(e) => {
                    self.read_errors.report(&e);
                    self.stats.dropped += 1;
                    // Whatever was half-assembled is no longer trustworthy
                    self.decoder.reset();
                    sleep(READ_ERROR_BACKOFF).await;
                }
            }
        };

        self.stop.request_stop();
        debug!("Inbound loop stopped: {:?}", exit);
        LoopReport {
            exit,
            stats: self.stats,
        }
    }

    async fn handle_byte<S: BusSink>(&mut self, byte: u8, sink: &mut S) {
        match self.decoder.feed(byte) {
            Ok(None) => {}
            Ok(Some(Frame::PortSelect(value))) => {
                self.stats.port_selects += 1;
                self.route.apply_port_select(value);
            }
            Ok(Some(Frame::Event(event))) => {
                let port = self.route.port();
                trace!("Serial -> bus [{}] {}", port, event);
                match sink.send_event(event, port).await {
                    Ok(()) => {
                        self.bus_errors.clear();
                        self.stats.events += 1;
                    }
                    Err(e) => {
                        self.bus_errors.report(&e);
                        self.stats.dropped += 1;
                    }
                }
            }
            Err(e) => {
                warn!("Dropped serial frame: {}", e);
                self.stats.dropped += 1;
            }
        }
    }
}
