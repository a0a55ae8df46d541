//! MIDI event model
//!
//! `MidiEvent` is the unit exchanged with the bus. The serial side speaks raw
//! MIDI 1.0 bytes; `decoder` and `encoder` translate between the two.

pub mod decoder;
pub mod encoder;

use std::fmt;

pub use decoder::{Frame, FrameDecoder, SysexOverflow};
pub use encoder::FrameEncoder;

/// Status byte of the non-standard port-select frame (`F5 <port>`).
pub const PORT_SELECT: u8 = 0xF5;

/// Start of exclusive
pub const SYSEX_START: u8 = 0xF0;

/// End of exclusive
pub const SYSEX_END: u8 = 0xF7;

/// Bias between the signed bus-side 14-bit values and the unsigned wire value.
pub const FOURTEEN_BIT_BIAS: i32 = 8192;

/// Channel voice operation (high nibble of the status byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOp {
    NoteOff,
    NoteOn,
    PolyPressure,
    Controller,
    ProgramChange,
    ChannelPressure,
    PitchBend,
}

impl ChannelOp {
    /// Classify a channel voice status byte (0x80-0xEF)
    pub fn from_status(status: u8) -> Option<Self> {
        match status & 0xF0 {
            0x80 => Some(ChannelOp::NoteOff),
            0x90 => Some(ChannelOp::NoteOn),
            0xA0 => Some(ChannelOp::PolyPressure),
            0xB0 => Some(ChannelOp::Controller),
            0xC0 => Some(ChannelOp::ProgramChange),
            0xD0 => Some(ChannelOp::ChannelPressure),
            0xE0 => Some(ChannelOp::PitchBend),
            _ => None,
        }
    }

    /// High nibble of the status byte
    pub fn status_nibble(self) -> u8 {
        match self {
            ChannelOp::NoteOff => 0x80,
            ChannelOp::NoteOn => 0x90,
            ChannelOp::PolyPressure => 0xA0,
            ChannelOp::Controller => 0xB0,
            ChannelOp::ProgramChange => 0xC0,
            ChannelOp::ChannelPressure => 0xD0,
            ChannelOp::PitchBend => 0xE0,
        }
    }

    /// Number of data bytes following the status byte
    pub fn data_len(self) -> usize {
        match self {
            ChannelOp::ProgramChange | ChannelOp::ChannelPressure => 1,
            _ => 2,
        }
    }
}

/// System common message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommonKind {
    QuarterFrame,
    SongPosition,
    SongSelect,
    TuneRequest,
}

impl CommonKind {
    pub fn from_status(status: u8) -> Option<Self> {
        match status {
            0xF1 => Some(CommonKind::QuarterFrame),
            0xF2 => Some(CommonKind::SongPosition),
            0xF3 => Some(CommonKind::SongSelect),
            0xF6 => Some(CommonKind::TuneRequest),
            _ => None,
        }
    }

    pub fn status(self) -> u8 {
        match self {
            CommonKind::QuarterFrame => 0xF1,
            CommonKind::SongPosition => 0xF2,
            CommonKind::SongSelect => 0xF3,
            CommonKind::TuneRequest => 0xF6,
        }
    }
}

/// System real-time message kind (single byte, may interrupt anything)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealTimeKind {
    Clock,
    Tick,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    Reset,
}

impl RealTimeKind {
    /// 0xFD is undefined and yields `None`
    pub fn from_status(status: u8) -> Option<Self> {
        match status {
            0xF8 => Some(RealTimeKind::Clock),
            0xF9 => Some(RealTimeKind::Tick),
            0xFA => Some(RealTimeKind::Start),
            0xFB => Some(RealTimeKind::Continue),
            0xFC => Some(RealTimeKind::Stop),
            0xFE => Some(RealTimeKind::ActiveSensing),
            0xFF => Some(RealTimeKind::Reset),
            _ => None,
        }
    }

    pub fn status(self) -> u8 {
        match self {
            RealTimeKind::Clock => 0xF8,
            RealTimeKind::Tick => 0xF9,
            RealTimeKind::Start => 0xFA,
            RealTimeKind::Continue => 0xFB,
            RealTimeKind::Stop => 0xFC,
            RealTimeKind::ActiveSensing => 0xFE,
            RealTimeKind::Reset => 0xFF,
        }
    }
}

/// A discrete MIDI event as seen by the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    /// Channel voice message: channel (0-15), data bytes (0-127).
    /// `data2` is `None` for ProgramChange and ChannelPressure.
    /// PitchBend carries LSB in `data1` and MSB in `data2`.
    ChannelVoice {
        op: ChannelOp,
        channel: u8,
        data1: u8,
        data2: Option<u8>,
    },

    /// System common message. SongPosition carries the signed value
    /// (wire value - 8192), TuneRequest carries nothing.
    SystemCommon { kind: CommonKind, value: Option<i16> },

    /// Single-byte real-time message
    SystemRealTime { kind: RealTimeKind },

    /// Raw exclusive frame including its 0xF0 / 0xF7 markers when present.
    /// Split fragments of an oversized frame lack one or both markers.
    SysEx { payload: Vec<u8> },

    /// 14-bit controller pair (controller 0-31 and its LSB at controller + 32)
    Control14 { channel: u8, controller: u8, value: u16 },

    /// Non-registered parameter number, 14-bit parameter and value
    Nrpn { channel: u8, parameter: u16, value: u16 },

    /// Registered parameter number, 14-bit parameter and value
    Rpn { channel: u8, parameter: u16, value: u16 },
}

impl MidiEvent {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_voice(ChannelOp::NoteOn, channel, note, Some(velocity))
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_voice(ChannelOp::NoteOff, channel, note, Some(velocity))
    }

    pub fn controller(channel: u8, controller: u8, value: u8) -> Self {
        Self::channel_voice(ChannelOp::Controller, channel, controller, Some(value))
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::channel_voice(ChannelOp::ProgramChange, channel, program, None)
    }

    /// Pitch bend from a signed value (-8192..=8191, 0 = center)
    pub fn pitch_bend(channel: u8, value: i16) -> Self {
        let raw = (value as i32 + FOURTEEN_BIT_BIAS).clamp(0, 0x3FFF) as u16;
        Self::channel_voice(
            ChannelOp::PitchBend,
            channel,
            (raw & 0x7F) as u8,
            Some(((raw >> 7) & 0x7F) as u8),
        )
    }

    pub fn realtime(kind: RealTimeKind) -> Self {
        MidiEvent::SystemRealTime { kind }
    }

    fn channel_voice(op: ChannelOp, channel: u8, data1: u8, data2: Option<u8>) -> Self {
        MidiEvent::ChannelVoice {
            op,
            channel: channel & 0x0F,
            data1: data1 & 0x7F,
            data2: data2.map(|d| d & 0x7F),
        }
    }

    /// Signed pitch bend value, `None` for anything but PitchBend
    pub fn pitch_bend_value(&self) -> Option<i16> {
        match *self {
            MidiEvent::ChannelVoice {
                op: ChannelOp::PitchBend,
                data1,
                data2,
                ..
            } => {
                let raw = (data1 as i32 & 0x7F) | ((data2.unwrap_or(0) as i32 & 0x7F) << 7);
                Some((raw - FOURTEEN_BIT_BIAS) as i16)
            }
            _ => None,
        }
    }

    /// Get the channel (0-15) for channel messages, None for system messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiEvent::ChannelVoice { channel, .. }
            | MidiEvent::Control14 { channel, .. }
            | MidiEvent::Nrpn { channel, .. }
            | MidiEvent::Rpn { channel, .. } => Some(channel),
            _ => None,
        }
    }

    pub fn is_realtime(&self) -> bool {
        matches!(self, MidiEvent::SystemRealTime { .. })
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiEvent::ChannelVoice {
                op: ChannelOp::PitchBend,
                channel,
                ..
            } => write!(
                f,
                "PitchBend ch:{} v:{}",
                channel + 1,
                self.pitch_bend_value().unwrap_or(0)
            ),
            MidiEvent::ChannelVoice {
                op,
                channel,
                data1,
                data2: Some(data2),
            } => write!(f, "{:?} ch:{} {:02X} {:02X}", op, channel + 1, data1, data2),
            MidiEvent::ChannelVoice {
                op,
                channel,
                data1,
                data2: None,
            } => write!(f, "{:?} ch:{} {:02X}", op, channel + 1, data1),
            MidiEvent::SystemCommon { kind, value: Some(v) } => write!(f, "{:?} {}", kind, v),
            MidiEvent::SystemCommon { kind, value: None } => write!(f, "{:?}", kind),
            MidiEvent::SystemRealTime { kind } => write!(f, "{:?}", kind),
            MidiEvent::SysEx { payload } => {
                write!(f, "SysEx {} bytes: {}", payload.len(), format_hex(payload))
            }
            MidiEvent::Control14 {
                channel,
                controller,
                value,
            } => write!(f, "CC14 ch:{} cc:{} v:{:04X}", channel + 1, controller, value),
            MidiEvent::Nrpn {
                channel,
                parameter,
                value,
            } => write!(f, "NRPN ch:{} p:{:04X} v:{:04X}", channel + 1, parameter, value),
            MidiEvent::Rpn {
                channel,
                parameter,
                value,
            } => write!(f, "RPN ch:{} p:{:04X} v:{:04X}", channel + 1, parameter, value),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_op_classification() {
        assert_eq!(ChannelOp::from_status(0x93), Some(ChannelOp::NoteOn));
        assert_eq!(ChannelOp::from_status(0xCF), Some(ChannelOp::ProgramChange));
        assert_eq!(ChannelOp::from_status(0xF0), None);
        assert_eq!(ChannelOp::ChannelPressure.data_len(), 1);
        assert_eq!(ChannelOp::PitchBend.data_len(), 2);
    }

    #[test]
    fn test_pitch_bend_center() {
        let msg = MidiEvent::pitch_bend(0, 0);
        assert_eq!(
            msg,
            MidiEvent::ChannelVoice {
                op: ChannelOp::PitchBend,
                channel: 0,
                data1: 0x00,
                data2: Some(0x40),
            }
        );
        assert_eq!(msg.pitch_bend_value(), Some(0));
    }

    #[test]
    fn test_pitch_bend_extremes() {
        assert_eq!(MidiEvent::pitch_bend(2, -8192).pitch_bend_value(), Some(-8192));
        assert_eq!(MidiEvent::pitch_bend(2, 8191).pitch_bend_value(), Some(8191));
    }

    #[test]
    fn test_constructors_mask_values() {
        assert_eq!(
            MidiEvent::note_on(0x1F, 0xC0, 0xFF),
            MidiEvent::ChannelVoice {
                op: ChannelOp::NoteOn,
                channel: 0x0F,
                data1: 0x40,
                data2: Some(0x7F),
            }
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(MidiEvent::note_on(0, 0x40, 0x7F).to_string(), "NoteOn ch:1 40 7F");
        assert_eq!(
            MidiEvent::SysEx { payload: vec![0xF0, 0x01, 0xF7] }.to_string(),
            "SysEx 3 bytes: F0 01 F7"
        );
        assert_eq!(MidiEvent::realtime(RealTimeKind::Clock).to_string(), "Clock");
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xF5, 0x02, 0x90]), "F5 02 90");
        assert_eq!(format_hex(&[]), "");
    }
}
