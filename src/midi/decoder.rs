//! Serial byte stream to MIDI event framing
//!
//! Tracks running status, lets real-time bytes interrupt any frame without
//! disturbing it, and reassembles SysEx into a bounded buffer.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    ChannelOp, CommonKind, MidiEvent, RealTimeKind, FOURTEEN_BIT_BIAS, PORT_SELECT, SYSEX_END,
    SYSEX_START,
};
use crate::error::{BridgeError, Result};

/// Default SysEx reassembly buffer size
pub const DEFAULT_SYSEX_CAPACITY: usize = 1024;

/// What to do when a SysEx frame outgrows the reassembly buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SysexOverflow {
    /// Emit the full buffer as a fragment and keep accumulating
    #[default]
    Split,
    /// Drop the whole frame and report `SysexOverflow`
    Discard,
}

/// A completed serial-side frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Event(MidiEvent),
    /// Raw port-select value as received (0-127)
    PortSelect(u8),
}

/// Bounded byte buffer for SysEx reassembly
#[derive(Debug)]
struct FrameBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl FrameBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a byte; returns false (and stores nothing) when full
    fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.bytes.push(byte);
        true
    }

    fn is_full(&self) -> bool {
        self.bytes.len() >= self.capacity
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::replace(&mut self.bytes, Vec::with_capacity(self.capacity))
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// Not aligned on any status; data bytes are dropped
    Idle,
    /// Waiting for `expected` data bytes after `status`
    Message { status: u8, expected: usize },
    /// Accumulating an exclusive frame
    SysEx,
    /// Swallowing the rest of an oversized exclusive frame
    Discarding,
}

/// Inbound framing state. One instance per byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    running_status: Option<u8>,
    pending: Pending,
    data: [u8; 2],
    data_len: usize,
    sysex: FrameBuffer,
    overflow: SysexOverflow,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSEX_CAPACITY, SysexOverflow::default())
    }
}

impl FrameDecoder {
    /// `sysex_capacity` bounds a single SysEx frame, markers included
    pub fn new(sysex_capacity: usize, overflow: SysexOverflow) -> Self {
        Self {
            running_status: None,
            pending: Pending::Idle,
            data: [0; 2],
            data_len: 0,
            sysex: FrameBuffer::with_capacity(sysex_capacity.max(2)),
            overflow,
        }
    }

    /// Current running status (last channel voice status byte), if any
    pub fn running_status(&self) -> Option<u8> {
        self.running_status
    }

    /// Drop any partial frame and the running status
    pub fn reset(&mut self) {
        self.running_status = None;
        self.pending = Pending::Idle;
        self.data_len = 0;
        self.sysex.clear();
    }

    /// Lazily decode a chunk of bytes
    pub fn decode<'a>(&'a mut self, bytes: &'a [u8]) -> impl Iterator<Item = Result<Frame>> + 'a {
        bytes.iter().filter_map(move |&b| self.feed(b).transpose())
    }

    /// Consume one byte, returning a frame when one completes
    pub fn feed(&mut self, byte: u8) -> Result<Option<Frame>> {
        if byte & 0x80 != 0 {
            self.on_status(byte)
        } else {
            self.on_data(byte)
        }
    }

    fn on_status(&mut self, status: u8) -> Result<Option<Frame>> {
        match status {
            0x80..=0xEF => {
                self.abandon_sysex();
                self.running_status = Some(status);
                let expected = ChannelOp::from_status(status).map_or(2, ChannelOp::data_len);
                self.begin(status, expected);
                Ok(None)
            }
            SYSEX_START => {
                self.abandon_sysex();
                self.running_status = None;
                self.sysex.push(SYSEX_START);
                self.pending = Pending::SysEx;
                Ok(None)
            }
            0xF1 | 0xF3 | 0xF4 | PORT_SELECT => {
                self.abandon_sysex();
                self.running_status = None;
                self.begin(status, 1);
                Ok(None)
            }
            0xF2 => {
                self.abandon_sysex();
                self.running_status = None;
                self.begin(status, 2);
                Ok(None)
            }
            0xF6 => {
                self.abandon_sysex();
                self.running_status = None;
                self.pending = Pending::Idle;
                Ok(Some(Frame::Event(MidiEvent::SystemCommon {
                    kind: CommonKind::TuneRequest,
                    value: None,
                })))
            }
            SYSEX_END => {
                self.running_status = None;
                Ok(self.end_sysex())
            }
            0xF8..=0xFF => match RealTimeKind::from_status(status) {
                Some(kind) => Ok(Some(Frame::Event(MidiEvent::SystemRealTime { kind }))),
                None => {
                    trace!("Ignoring undefined real-time byte {:02X}", status);
                    Ok(None)
                }
            },
            // High bit is set, so nothing else reaches here
            _ => Ok(None),
        }
    }

    fn on_data(&mut self, byte: u8) -> Result<Option<Frame>> {
        match self.pending {
            Pending::Idle => {
                trace!("Discarding data byte {:02X} with no active status", byte);
                Ok(None)
            }
            Pending::Discarding => Ok(None),
            Pending::Message { status, expected } => {
                self.data[self.data_len] = byte;
                self.data_len += 1;
                if self.data_len < expected {
                    return Ok(None);
                }
                let frame = self.complete(status);
                self.data_len = 0;
                self.pending = match self.running_status {
                    Some(running) => Pending::Message {
                        status: running,
                        expected,
                    },
                    None => Pending::Idle,
                };
                Ok(frame)
            }
            Pending::SysEx => {
                self.sysex.push(byte);
                if !self.sysex.is_full() {
                    return Ok(None);
                }
                match self.overflow {
                    SysexOverflow::Split => {
                        debug!("SysEx buffer full, emitting {} byte fragment", self.sysex.len());
                        Ok(Some(Frame::Event(MidiEvent::SysEx {
                            payload: self.sysex.take(),
                        })))
                    }
                    SysexOverflow::Discard => {
                        let limit = self.sysex.capacity;
                        self.sysex.clear();
                        self.pending = Pending::Discarding;
                        Err(BridgeError::SysexOverflow { limit })
                    }
                }
            }
        }
    }

    fn begin(&mut self, status: u8, expected: usize) {
        self.pending = Pending::Message { status, expected };
        self.data_len = 0;
    }

    /// A new non-real-time status byte ends any open exclusive frame
    fn abandon_sysex(&mut self) {
        match self.pending {
            Pending::SysEx if self.sysex.len() > 0 => {
                debug!(
                    "Dropping {} byte SysEx interrupted by a status byte",
                    self.sysex.len()
                );
                self.sysex.clear();
            }
            Pending::SysEx | Pending::Discarding => self.sysex.clear(),
            _ => {}
        }
    }

    fn end_sysex(&mut self) -> Option<Frame> {
        let pending = std::mem::replace(&mut self.pending, Pending::Idle);
        self.data_len = 0;
        match pending {
            Pending::SysEx => {
                // Room for EOX is guaranteed: a full buffer is flushed on the byte that filled it
                self.sysex.push(SYSEX_END);
                Some(Frame::Event(MidiEvent::SysEx {
                    payload: self.sysex.take(),
                }))
            }
            Pending::Discarding => None,
            _ => {
                trace!("Resynchronizing on stray EOX");
                None
            }
        }
    }

    fn complete(&self, status: u8) -> Option<Frame> {
        let [d1, d2] = self.data;
        if let Some(op) = ChannelOp::from_status(status) {
            return Some(Frame::Event(MidiEvent::ChannelVoice {
                op,
                channel: status & 0x0F,
                data1: d1,
                data2: (op.data_len() == 2).then_some(d2),
            }));
        }

        let common = |kind, value| Some(Frame::Event(MidiEvent::SystemCommon { kind, value }));
        match status {
            0xF1 => common(CommonKind::QuarterFrame, Some(d1 as i16)),
            0xF2 => {
                let raw = d1 as i32 | ((d2 as i32) << 7);
                common(CommonKind::SongPosition, Some((raw - FOURTEEN_BIT_BIAS) as i16))
            }
            0xF3 => common(CommonKind::SongSelect, Some(d1 as i16)),
            PORT_SELECT => Some(Frame::PortSelect(d1)),
            _ => {
                trace!("Ignoring undefined system common {:02X} {:02X}", status, d1);
                None
            }
        }
    }
}
