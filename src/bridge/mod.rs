//! Bridge orchestration
//!
//! Two independent loops share one serial link:
//! - `InboundLoop`: serial bytes -> `FrameDecoder` -> bus
//! - `OutboundLoop`: bus events -> `FrameEncoder` -> serial bytes
//!
//! Each loop owns its half of the transport and its own route state. The only
//! shared piece is the `StopFlag`, which either loop raises when it exits so
//! the other follows within one timeout.

pub mod inbound;
pub mod outbound;

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::{BusSink, BusSource};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::transport::{SerialReader, SerialWriter};

pub use inbound::InboundLoop;
pub use outbound::OutboundLoop;

/// Cooperative shutdown signal, checked by both loops between operations
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The stop flag was raised
    StopRequested,
    /// The serial device went away
    Hangup,
    /// The bus side closed
    BusClosed,
}

/// Per-loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub events: u64,
    pub port_selects: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub exit: LoopExit,
    pub stats: LoopStats,
}

/// Outcome of a full bridge run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeReport {
    pub inbound: LoopReport,
    pub outbound: LoopReport,
}

/// Logs the first failure of a streak at warn level and repeats at debug
#[derive(Debug)]
pub(crate) struct ErrorStreak {
    what: &'static str,
    count: u64,
}

impl ErrorStreak {
    pub(crate) fn new(what: &'static str) -> Self {
        Self { what, count: 0 }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn report(&mut self, err: &dyn Display) {
        self.count += 1;
        if self.count == 1 {
            warn!("{} failed: {}", self.what, err);
        } else {
            debug!("{} failed ({} in a row): {}", self.what, self.count, err);
        }
    }

    pub(crate) fn clear(&mut self) {
        if self.count > 1 {
            info!("{} recovered after {} errors", self.what, self.count);
        }
        self.count = 0;
    }
}

/// Runs both directions over one serial link until hangup, bus close or stop
pub struct Bridge {
    config: BridgeConfig,
    stop: StopFlag,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        Self::with_stop_flag(config, StopFlag::new())
    }

    /// Use an externally owned stop flag (e.g. raised by a signal handler)
    pub fn with_stop_flag(config: BridgeConfig, stop: StopFlag) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, stop })
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Spawn both loops and wait for both to finish.
    ///
    /// The transport halves are moved into the loops and dropped only after
    /// the loop owning them has returned.
    pub async fn run<R, W, S, B>(
        self,
        reader: R,
        writer: W,
        sink: S,
        source: B,
    ) -> Result<BridgeReport>
    where
        R: SerialReader + 'static,
        W: SerialWriter + 'static,
        S: BusSink + 'static,
        B: BusSource + 'static,
    {
        let router = self.config.port_router()?;
        info!(
            "Bridge starting: {} logical port(s), idle reset {:?}",
            router.port_count(),
            self.config.idle_reset()
        );

        let inbound = InboundLoop::new(&self.config, router.inbound(), self.stop.clone());
        let outbound = OutboundLoop::new(&self.config, router.outbound(), self.stop.clone());

        let inbound_task = tokio::spawn(inbound.run(reader, sink));
        let outbound_task = tokio::spawn(outbound.run(writer, source));

        let (inbound, outbound) = tokio::join!(inbound_task, outbound_task);
        // A panicked loop never raised the flag itself
        self.stop.request_stop();

        let report = BridgeReport {
            inbound: inbound?,
            outbound: outbound?,
        };
        info!(
            "Bridge stopped: inbound {:?} ({} events), outbound {:?} ({} events)",
            report.inbound.exit,
            report.inbound.stats.events,
            report.outbound.exit,
            report.outbound.stats.events
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_flag_is_shared() {
        let flag = StopFlag::new();
        let other = flag.clone();
        assert!(!other.is_stopped());

        flag.request_stop();
        assert!(other.is_stopped());
    }

    #[test]
    fn test_error_streak_counts_until_cleared() {
        let mut streak = ErrorStreak::new("Serial read");
        streak.report(&"EIO");
        streak.report(&"EIO");
        assert_eq!(streak.count(), 2);

        streak.clear();
        assert_eq!(streak.count(), 0);
    }

    #[test]
    fn test_bridge_rejects_invalid_config() {
        let config = BridgeConfig {
            ports: 0,
            ..BridgeConfig::default()
        };
        assert!(Bridge::new(config).is_err());
    }
}
