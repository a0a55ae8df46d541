//! Bus -> serial direction

use std::io;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{ErrorStreak, LoopExit, LoopReport, LoopStats, StopFlag};
use crate::bus::{BusInput, BusReceive, BusSource};
use crate::config::BridgeConfig;
use crate::midi::{format_hex, FrameEncoder, MidiEvent};
use crate::router::OutboundRoute;
use crate::transport::{is_hangup, SerialWriter};

pub struct OutboundLoop {
    encoder: FrameEncoder,
    route: OutboundRoute,
    poll_interval: Duration,
    stop: StopFlag,
    stats: LoopStats,
    write_errors: ErrorStreak,
    buf: Vec<u8>,
}

impl OutboundLoop {
    pub fn new(config: &BridgeConfig, route: OutboundRoute, stop: StopFlag) -> Self {
        Self {
            encoder: FrameEncoder::new(),
            route,
            poll_interval: config.poll_interval(),
            stop,
            stats: LoopStats::default(),
            write_errors: ErrorStreak::new("Serial write"),
            buf: Vec::with_capacity(64),
        }
    }

    /// Forward bus input until hangup, bus close or stop. Raises the stop
    /// flag on exit.
    pub async fn run<W, B>(mut self, mut writer: W, mut source: B) -> LoopReport
    where
        W: SerialWriter,
        B: BusSource,
    {
        debug!("Outbound loop started");

        let exit = 'outer: loop {
            if self.stop.is_stopped() {
                break LoopExit::StopRequested;
            }

            let first = match source.receive_event(self.poll_interval).await {
                BusReceive::Input(input) => input,
                BusReceive::Timeout => {
                    self.route.expire_if_idle(Instant::now());
                    continue;
                }
                BusReceive::Closed => {
                    info!("Bus closed, stopping bridge");
                    break LoopExit::BusClosed;
                }
            };

            // Drain whatever is already queued before polling again
            let mut next = Some(first);
            while let Some(input) = next {
                if let ControlFlow::Break(exit) = self.handle_input(input, &mut writer).await {
                    break 'outer exit;
                }
                next = source.try_receive();
            }
        };

        self.stop.request_stop();
        debug!("Outbound loop stopped: {:?}", exit);
        LoopReport {
            exit,
            stats: self.stats,
        }
    }

    async fn handle_input<W: SerialWriter>(
        &mut self,
        input: BusInput,
        writer: &mut W,
    ) -> ControlFlow<LoopExit> {
        match input {
            BusInput::SubscriptionChanged { delta } => {
                self.route.subscription_changed(delta);
                ControlFlow::Continue(())
            }
            BusInput::Event { port, event } => self.send_event(port, &event, writer).await,
        }
    }

    async fn send_event<W: SerialWriter>(
        &mut self,
        port: u8,
        event: &MidiEvent,
        writer: &mut W,
    ) -> ControlFlow<LoopExit> {
        self.buf.clear();

        match self.route.resolve(port, Instant::now()) {
            Ok(Some(select)) => {
                self.encoder.encode_port_select_into(select, &mut self.buf);
                self.stats.port_selects += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Dropping {}: {}", event, e);
                self.stats.dropped += 1;
                return ControlFlow::Continue(());
            }
        }

        if let Err(e) = self.encoder.encode_into(event, &mut self.buf) {
            warn!("Dropping {}: {}", event, e);
            self.stats.dropped += 1;
            // A port select may have been queued but will not be written
            self.route.invalidate();
            self.encoder.reset();
            return ControlFlow::Continue(());
        }

        trace!("Bus [{}] -> serial {}: {}", port, event, format_hex(&self.buf));

        let mut result = write_all(writer, &self.buf, &self.stop).await;
        if result.is_ok() && matches!(event, MidiEvent::SysEx { .. }) {
            result = writer.drain().await;
        }
        self.route.record_activity(Instant::now());

        match result {
            Ok(()) => {
                self.write_errors.clear();
                self.stats.events += 1;
                ControlFlow::Continue(())
            }
            Err(e) => {
                // The peer may have seen a partial frame; start from a clean slate
                self.encoder.reset();
                self.route.invalidate();
                self.stats.dropped += 1;

                if self.stop.is_stopped() {
                    return ControlFlow::Break(LoopExit::StopRequested);
                }
                if is_hangup(&e) {
                    info!("Serial device hung up: {}", e);
                    return ControlFlow::Break(LoopExit::Hangup);
                }
                self.write_errors.report(&e);
                ControlFlow::Continue(())
            }
        }
    }
}

/// Write every byte, retrying interrupted and partial writes
async fn write_all<W: SerialWriter>(
    writer: &mut W,
    mut bytes: &[u8],
    stop: &StopFlag,
) -> io::Result<()> {
    while !bytes.is_empty() {
        match writer.write(bytes).await {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "serial device accepted no bytes",
                ))
            }
            Ok(n) => bytes = &bytes[n.min(bytes.len())..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                if stop.is_stopped() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_link;

    #[tokio::test]
    async fn test_write_all_survives_partial_and_interrupted_writes() {
        let (_reader, mut writer, mut peer) = memory_link();
        peer.limit_write_size(2);
        peer.inject_write_error(io::ErrorKind::Interrupted);

        write_all(&mut writer, &[0x90, 0x40, 0x7F, 0x41, 0x7F], &StopFlag::new())
            .await
            .unwrap();

        assert_eq!(peer.take_written(), vec![0x90, 0x40, 0x7F, 0x41, 0x7F]);
    }

    #[tokio::test]
    async fn test_write_all_gives_up_when_stopped() {
        let (_reader, mut writer, peer) = memory_link();
        peer.inject_write_error(io::ErrorKind::Interrupted);
        let stop = StopFlag::new();
        stop.request_stop();

        let err = write_all(&mut writer, &[0xF8], &stop).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
