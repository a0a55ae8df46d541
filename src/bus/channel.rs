//! Channel-backed bus adapter
//!
//! Used directly by tests and embedders, and as the async side of the
//! virtual-port adapter.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::{BusInput, BusReceive, BusSink, BusSource};
use crate::error::{BridgeError, Result};
use crate::midi::MidiEvent;

/// Create a sink/source pair and the bus-side handle driving them
pub fn channel_bus(capacity: usize) -> (ChannelSink, ChannelSource, BusHandle) {
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (input_tx, input_rx) = mpsc::channel(capacity);
    (
        ChannelSink::new(event_tx),
        ChannelSource::new(input_rx),
        BusHandle {
            tx: input_tx,
            rx: event_rx,
        },
    )
}

/// Sink forwarding `(port, event)` pairs into a channel
pub struct ChannelSink {
    tx: mpsc::Sender<(u8, MidiEvent)>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<(u8, MidiEvent)>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl BusSink for ChannelSink {
    async fn send_event(&mut self, event: MidiEvent, port: u8) -> Result<()> {
        self.tx
            .send((port, event))
            .await
            .map_err(|_| BridgeError::Bus("bus receiver dropped".to_string()))
    }
}

/// Source reading `BusInput`s from a channel
pub struct ChannelSource {
    rx: mpsc::Receiver<BusInput>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<BusInput>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl BusSource for ChannelSource {
    async fn receive_event(&mut self, timeout: Duration) -> BusReceive {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(input)) => BusReceive::Input(input),
            Ok(None) => BusReceive::Closed,
            Err(_) => BusReceive::Timeout,
        }
    }

    fn try_receive(&mut self) -> Option<BusInput> {
        match self.rx.try_recv() {
            Ok(input) => Some(input),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// The bus side of a channel bus
pub struct BusHandle {
    tx: mpsc::Sender<BusInput>,
    rx: mpsc::Receiver<(u8, MidiEvent)>,
}

impl BusHandle {
    /// Queue an event for the serial side
    pub async fn send(&self, port: u8, event: MidiEvent) -> Result<()> {
        self.send_input(BusInput::Event { port, event }).await
    }

    /// Report a subscriber count change
    pub async fn subscription_changed(&self, delta: i32) -> Result<()> {
        self.send_input(BusInput::SubscriptionChanged { delta }).await
    }

    async fn send_input(&self, input: BusInput) -> Result<()> {
        self.tx
            .send(input)
            .await
            .map_err(|_| BridgeError::Bus("bridge stopped".to_string()))
    }

    /// Next event delivered from the serial side, `None` on timeout or close
    pub async fn recv(&mut self, timeout: Duration) -> Option<(u8, MidiEvent)> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::RealTimeKind;

    #[tokio::test]
    async fn test_source_reports_timeout_and_close() {
        let (_sink, mut source, handle) = channel_bus(8);
        let wait = Duration::from_millis(20);

        assert_eq!(source.receive_event(wait).await, BusReceive::Timeout);

        handle.subscription_changed(1).await.unwrap();
        assert_eq!(
            source.receive_event(wait).await,
            BusReceive::Input(BusInput::SubscriptionChanged { delta: 1 })
        );

        drop(handle);
        assert_eq!(source.receive_event(wait).await, BusReceive::Closed);
    }

    #[tokio::test]
    async fn test_sink_delivers_to_handle() {
        let (mut sink, _source, mut handle) = channel_bus(8);
        let clock = MidiEvent::realtime(RealTimeKind::Clock);

        sink.send_event(clock.clone(), 3).await.unwrap();
        assert_eq!(handle.recv(Duration::from_millis(20)).await, Some((3, clock)));
    }

    #[tokio::test]
    async fn test_try_receive_drains_queue() {
        let (_sink, mut source, handle) = channel_bus(8);
        handle.send(1, MidiEvent::note_on(0, 1, 1)).await.unwrap();
        handle.send(2, MidiEvent::note_on(0, 2, 2)).await.unwrap();

        assert!(source.try_receive().is_some());
        assert!(source.try_receive().is_some());
        assert!(source.try_receive().is_none());
    }
}
