//! Serial MIDI bridge
//!
//! Bridges a raw MIDI byte stream on a serial device to a host MIDI bus,
//! multiplexing up to 16 logical ports over the one line with in-band
//! port-select frames (`F5 <port>`).

pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod midi;
pub mod router;
pub mod sniffer;
pub mod transport;

pub use bridge::{Bridge, BridgeReport, LoopExit, StopFlag};
pub use config::AppConfig;
pub use error::{BridgeError, Result};
pub use midi::{Frame, FrameDecoder, FrameEncoder, MidiEvent};
pub use router::PortRouter;
