//! Host-side MIDI bus collaborator
//!
//! The bus exchanges parsed `MidiEvent`s tagged with a 1-based logical port.
//! `BusSink` is fed by the inbound loop, `BusSource` drives the outbound loop.

pub mod channel;
#[cfg(unix)]
pub mod virtual_port;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::midi::MidiEvent;

pub use channel::{channel_bus, BusHandle, ChannelSink, ChannelSource};

/// Something the bus wants delivered to the serial side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusInput {
    /// An event for logical `port` (1-based)
    Event { port: u8, event: MidiEvent },
    /// Subscriber count on the bus-side ports changed by `delta`
    SubscriptionChanged { delta: i32 },
}

/// Result of a bounded wait on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusReceive {
    Input(BusInput),
    Timeout,
    /// The bus went away; nothing more will arrive
    Closed,
}

/// Delivers serial-side events to the bus
#[async_trait]
pub trait BusSink: Send {
    async fn send_event(&mut self, event: MidiEvent, port: u8) -> Result<()>;
}

/// Yields bus-side events destined for the serial line
#[async_trait]
pub trait BusSource: Send {
    /// Wait at most `timeout` for the next input
    async fn receive_event(&mut self, timeout: Duration) -> BusReceive;

    /// Next input if one is already queued
    fn try_receive(&mut self) -> Option<BusInput>;
}
