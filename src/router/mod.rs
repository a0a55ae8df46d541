//! Logical port routing over a single serial line
//!
//! Up to 16 logical ports share one physical link. The active port is
//! announced in-band with a port-select frame (`F5 <port>`). Each direction
//! owns its own route state:
//! - `InboundRoute`: which port incoming serial events belong to
//! - `OutboundRoute`: which port the peer last heard announced, and when to
//!   announce again
//!
//! With a single configured port nothing is ever announced.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Maximum number of logical ports on one link
pub const MAX_PORTS: u8 = 16;

/// Quiet period after which the announced port is considered unknown
pub const DEFAULT_IDLE_RESET: Duration = Duration::from_secs(3);

/// Port-select values meaning "no specific port"
const BROADCAST_VALUES: [u8; 2] = [0x00, 0x7F];

/// Port router configuration, split into one route per direction
#[derive(Debug, Clone, Copy)]
pub struct PortRouter {
    port_count: u8,
    idle_reset: Duration,
}

impl PortRouter {
    pub fn new(port_count: u8, idle_reset: Duration) -> Result<Self> {
        if port_count == 0 || port_count > MAX_PORTS {
            return Err(BridgeError::InvalidConfig(format!(
                "port count must be 1..={}, got {}",
                MAX_PORTS, port_count
            )));
        }
        Ok(Self {
            port_count,
            idle_reset,
        })
    }

    pub fn port_count(&self) -> u8 {
        self.port_count
    }

    pub fn inbound(&self) -> InboundRoute {
        InboundRoute {
            port_count: self.port_count,
            selected: 0,
            idle_reset: self.idle_reset,
            last_traffic: None,
        }
    }

    pub fn outbound(&self) -> OutboundRoute {
        OutboundRoute {
            port_count: self.port_count,
            last_sent: None,
            idle_reset: self.idle_reset,
            last_activity: None,
            subscribers: 0,
        }
    }
}

/// Serial -> bus port attribution
#[derive(Debug)]
pub struct InboundRoute {
    port_count: u8,
    /// 0-based
    selected: usize,
    idle_reset: Duration,
    last_traffic: Option<Instant>,
}

impl InboundRoute {
    /// Currently selected logical port (1-based)
    pub fn port(&self) -> u8 {
        self.selected as u8 + 1
    }

    /// Apply a received port-select value and return the resulting port
    pub fn apply_port_select(&mut self, value: u8) -> u8 {
        if self.port_count == 1 {
            debug!("Ignoring port select {:02X} on single-port link", value);
            return self.port();
        }

        let port = if BROADCAST_VALUES.contains(&value) { 1 } else { value };
        if port > self.port_count {
            warn!(
                "Port select {} out of range (1..={}), staying on port {}",
                port,
                self.port_count,
                self.port()
            );
            return self.port();
        }

        if port != self.port() {
            debug!("Inbound port {} -> {}", self.port(), port);
        }
        self.selected = (port - 1) as usize;
        self.port()
    }

    pub fn record_traffic(&mut self, now: Instant) {
        self.last_traffic = Some(now);
    }

    /// Fall back to port 1 after a quiet period; the peer re-announces after
    /// its own idle reset. Returns true if the selection was reset.
    pub fn expire_if_idle(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_traffic else {
            return false;
        };
        if now.saturating_duration_since(last) < self.idle_reset {
            return false;
        }
        self.last_traffic = None;
        if self.selected == 0 {
            return false;
        }
        debug!("Inbound idle, port {} -> 1", self.port());
        self.selected = 0;
        true
    }
}

/// Bus -> serial port announcement tracking
#[derive(Debug)]
pub struct OutboundRoute {
    port_count: u8,
    /// 0-based index of the last announced port, `None` forces a resend
    last_sent: Option<usize>,
    idle_reset: Duration,
    last_activity: Option<Instant>,
    subscribers: i64,
}

impl OutboundRoute {
    /// Last announced port (1-based), `None` if unknown
    pub fn last_sent_port(&self) -> Option<u8> {
        self.last_sent.map(|i| i as u8 + 1)
    }

    pub fn subscribers(&self) -> i64 {
        self.subscribers
    }

    /// Decide whether `port` must be announced before the next event.
    ///
    /// Returns the port-select value to emit, or `None` when the peer already
    /// has this port selected (or the link is single-port).
    pub fn resolve(&mut self, port: u8, now: Instant) -> Result<Option<u8>> {
        if port == 0 || port > self.port_count {
            return Err(BridgeError::PortOutOfRange {
                port,
                count: self.port_count,
            });
        }
        if self.port_count == 1 {
            return Ok(None);
        }

        self.expire_if_idle(now);

        let index = (port - 1) as usize;
        if self.last_sent == Some(index) {
            return Ok(None);
        }
        self.last_sent = Some(index);
        Ok(Some(port))
    }

    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Forget the announced port after the idle interval. Returns true if the
    /// route was invalidated.
    pub fn expire_if_idle(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_activity else {
            return false;
        };
        if self.last_sent.is_none() || now.saturating_duration_since(last) < self.idle_reset {
            return false;
        }
        debug!("Outbound idle for {:?}, port will be re-announced", self.idle_reset);
        self.invalidate();
        true
    }

    /// Force a fresh announcement on the next event
    pub fn invalidate(&mut self) {
        self.last_sent = None;
    }

    /// Track bus subscriptions; reaching or leaving zero invalidates the route
    pub fn subscription_changed(&mut self, delta: i32) {
        let before = self.subscribers;
        self.subscribers = (self.subscribers + delta as i64).max(0);
        if (before == 0) != (self.subscribers == 0) {
            debug!(
                "Subscriptions {} -> {}, invalidating outbound route",
                before, self.subscribers
            );
            self.invalidate();
        }
    }
}

#[cfg(test)]
mod tests;
