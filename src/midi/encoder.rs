//! MIDI event to serial byte encoding with running-status compression

use super::{ChannelOp, CommonKind, MidiEvent, FOURTEEN_BIT_BIAS, PORT_SELECT};
use crate::error::{BridgeError, Result};

/// Controller numbers used by parameter-number sequences
const NRPN_MSB: u8 = 0x63;
const NRPN_LSB: u8 = 0x62;
const RPN_MSB: u8 = 0x65;
const RPN_LSB: u8 = 0x64;
const DATA_ENTRY_MSB: u8 = 0x06;
const DATA_ENTRY_LSB: u8 = 0x26;

/// Outbound encoding state. One instance per byte stream.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    running_status: Option<u8>,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last channel voice status written, if the receiver can still rely on it
    pub fn running_status(&self) -> Option<u8> {
        self.running_status
    }

    /// Forget the running status (after a write error the peer state is unknown)
    pub fn reset(&mut self) {
        self.running_status = None;
    }

    /// Encode an event into a fresh buffer
    pub fn encode(&mut self, event: &MidiEvent) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(9);
        self.encode_into(event, &mut out)?;
        Ok(out)
    }

    /// Append the port-select frame `F5 <port>`; clears running status since
    /// the receiver treats it as system common.
    pub fn encode_port_select_into(&mut self, port: u8, out: &mut Vec<u8>) {
        self.running_status = None;
        out.extend_from_slice(&[PORT_SELECT, port & 0x7F]);
    }

    /// Append the encoded event to `out`. On error nothing is appended.
    pub fn encode_into(&mut self, event: &MidiEvent, out: &mut Vec<u8>) -> Result<()> {
        match *event {
            MidiEvent::ChannelVoice {
                op,
                channel,
                data1,
                data2,
            } => {
                self.put_status(op.status_nibble() | (channel & 0x0F), out);
                out.push(data1 & 0x7F);
                if op.data_len() == 2 {
                    out.push(data2.unwrap_or(0) & 0x7F);
                }
            }
            MidiEvent::SysEx { ref payload } => {
                self.running_status = None;
                out.extend_from_slice(payload);
            }
            MidiEvent::SystemCommon { kind, value } => {
                self.running_status = None;
                let value = value.unwrap_or(0) as i32;
                out.push(kind.status());
                match kind {
                    CommonKind::QuarterFrame | CommonKind::SongSelect => {
                        out.push((value & 0x7F) as u8)
                    }
                    CommonKind::SongPosition => {
                        let raw = value + FOURTEEN_BIT_BIAS;
                        out.push((raw & 0x7F) as u8);
                        out.push(((raw >> 7) & 0x7F) as u8);
                    }
                    CommonKind::TuneRequest => {}
                }
            }
            MidiEvent::SystemRealTime { kind } => out.push(kind.status()),
            MidiEvent::Control14 {
                channel,
                controller,
                value,
            } => {
                if controller >= 32 {
                    return Err(BridgeError::UnsupportedController(controller));
                }
                self.put_status(ChannelOp::Controller.status_nibble() | (channel & 0x0F), out);
                out.extend_from_slice(&[
                    controller,
                    ((value >> 7) & 0x7F) as u8,
                    controller + 32,
                    (value & 0x7F) as u8,
                ]);
            }
            MidiEvent::Nrpn {
                channel,
                parameter,
                value,
            } => self.put_parameter(channel, NRPN_MSB, NRPN_LSB, parameter, value, out),
            MidiEvent::Rpn {
                channel,
                parameter,
                value,
            } => self.put_parameter(channel, RPN_MSB, RPN_LSB, parameter, value, out),
        }
        Ok(())
    }

    /// Write the status byte unless the receiver's running status already matches
    fn put_status(&mut self, status: u8, out: &mut Vec<u8>) {
        if self.running_status != Some(status) {
            out.push(status);
            self.running_status = Some(status);
        }
    }

    fn put_parameter(
        &mut self,
        channel: u8,
        msb_cc: u8,
        lsb_cc: u8,
        parameter: u16,
        value: u16,
        out: &mut Vec<u8>,
    ) {
        self.put_status(ChannelOp::Controller.status_nibble() | (channel & 0x0F), out);
        out.extend_from_slice(&[
            msb_cc,
            ((parameter >> 7) & 0x7F) as u8,
            lsb_cc,
            (parameter & 0x7F) as u8,
            DATA_ENTRY_MSB,
            ((value >> 7) & 0x7F) as u8,
            DATA_ENTRY_LSB,
            (value & 0x7F) as u8,
        ]);
    }
}
