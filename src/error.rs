//! Error types for the serial MIDI bridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("logical port {port} out of range (1..={count})")]
    PortOutOfRange { port: u8, count: u8 },

    #[error("controller {0} has no 14-bit LSB pair")]
    UnsupportedController(u8),

    #[error("SysEx frame exceeded the {limit} byte reassembly buffer")]
    SysexOverflow { limit: usize },

    #[error("bus error: {0}")]
    Bus(String),

    #[error("MIDI port error: {0}")]
    MidiPort(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("bridge task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<midir::InitError> for BridgeError {
    fn from(e: midir::InitError) -> Self {
        BridgeError::MidiPort(e.to_string())
    }
}

impl From<midir::SendError> for BridgeError {
    fn from(e: midir::SendError) -> Self {
        BridgeError::Bus(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiOutput>> for BridgeError {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        BridgeError::MidiPort(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for BridgeError {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        BridgeError::MidiPort(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
