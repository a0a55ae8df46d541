//! Property tests: the decoder recovers what the encoder produced

use proptest::prelude::*;

use serial_midi_bridge::midi::{ChannelOp, Frame, FrameDecoder, FrameEncoder, MidiEvent};

fn channel_op() -> impl Strategy<Value = ChannelOp> {
    prop_oneof![
        Just(ChannelOp::NoteOff),
        Just(ChannelOp::NoteOn),
        Just(ChannelOp::PolyPressure),
        Just(ChannelOp::Controller),
        Just(ChannelOp::ProgramChange),
        Just(ChannelOp::ChannelPressure),
        Just(ChannelOp::PitchBend),
    ]
}

fn channel_voice() -> impl Strategy<Value = MidiEvent> {
    (channel_op(), 0u8..16, 0u8..128, 0u8..128).prop_map(|(op, channel, data1, data2)| {
        MidiEvent::ChannelVoice {
            op,
            channel,
            data1,
            data2: (op.data_len() == 2).then_some(data2),
        }
    })
}

fn decode_all(bytes: &[u8]) -> Vec<MidiEvent> {
    let mut decoder = FrameDecoder::default();
    decoder
        .decode(bytes)
        .map(|frame| match frame.unwrap() {
            Frame::Event(event) => event,
            Frame::PortSelect(port) => panic!("unexpected port select {}", port),
        })
        .collect()
}

proptest! {
    #[test]
    fn channel_voice_sequences_survive_running_status(
        events in prop::collection::vec(channel_voice(), 1..32)
    ) {
        let mut encoder = FrameEncoder::new();
        let mut bytes = Vec::new();
        for event in &events {
            encoder.encode_into(event, &mut bytes).unwrap();
        }

        prop_assert_eq!(decode_all(&bytes), events);
    }

    #[test]
    fn clock_bytes_never_disturb_a_message(
        events in prop::collection::vec(channel_voice(), 1..8),
        positions in prop::collection::vec(any::<prop::sample::Index>(), 0..4),
    ) {
        let mut encoder = FrameEncoder::new();
        let mut bytes = Vec::new();
        for event in &events {
            encoder.encode_into(event, &mut bytes).unwrap();
        }
        let mut at: Vec<usize> = positions.iter().map(|i| i.index(bytes.len() + 1)).collect();
        at.sort_unstable();
        for &pos in at.iter().rev() {
            bytes.insert(pos, 0xF8);
        }

        let decoded = decode_all(&bytes);
        let clocks = decoded.iter().filter(|e| e.is_realtime()).count();
        let rest: Vec<MidiEvent> = decoded.into_iter().filter(|e| !e.is_realtime()).collect();

        prop_assert_eq!(clocks, at.len());
        prop_assert_eq!(rest, events);
    }
}
