//! Virtual MIDI ports via midir
//!
//! Each logical port becomes a readable `<name> In [k]` port carrying
//! serial input, and a writable `<name> Out [k]` port whose traffic goes to
//! the serial line. midir connections stay on the thread that created them;
//! the async side only sees `ChannelSink` / `ChannelSource`.

use midir::os::unix::{VirtualInput, VirtualOutput};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::{BusInput, ChannelSink, ChannelSource};
use crate::error::{BridgeError, Result};
use crate::midi::{Frame, FrameDecoder, FrameEncoder, MidiEvent, SysexOverflow};

const QUEUE_DEPTH: usize = 1000;

/// Keeps the virtual ports alive; drop to remove them
pub struct VirtualPorts {
    _inputs: Vec<MidiInputConnection<FrameDecoder>>,
}

fn port_name(client_name: &str, direction: &str, port: u8, port_count: u8) -> String {
    if port_count == 1 {
        format!("{} {}", client_name, direction)
    } else {
        format!("{} {} {}", client_name, direction, port)
    }
}

/// Create the virtual ports for `port_count` logical ports.
///
/// midir reports no subscription changes, so the returned source never
/// yields `BusInput::SubscriptionChanged`.
pub async fn open_virtual_ports(
    client_name: &str,
    port_count: u8,
    sysex_capacity: usize,
) -> Result<(VirtualPorts, ChannelSink, ChannelSource)> {
    let (event_tx, event_rx) = mpsc::channel::<(u8, MidiEvent)>(QUEUE_DEPTH);
    let (ready_tx, ready_rx) = oneshot::channel();
    let name = client_name.to_string();

    thread::Builder::new()
        .name("bus-writer".to_string())
        .spawn(move || output_thread(name, port_count, event_rx, ready_tx))?;

    ready_rx
        .await
        .map_err(|_| BridgeError::MidiPort("bus writer thread exited".to_string()))??;

    let (input_tx, input_rx) = mpsc::channel(QUEUE_DEPTH);
    let mut inputs = Vec::with_capacity(port_count as usize);
    for port in 1..=port_count {
        let mut midi_in = MidiInput::new(client_name)?;
        midi_in.ignore(Ignore::None);
        let name = port_name(client_name, "Out", port, port_count);
        let tx = input_tx.clone();
        let decoder = FrameDecoder::new(sysex_capacity, SysexOverflow::Split);

        let conn = midi_in.create_virtual(
            &name,
            move |_timestamp, message, decoder: &mut FrameDecoder| {
                for frame in decoder.decode(message) {
                    match frame {
                        Ok(Frame::Event(event)) => {
                            if let Err(e) = tx.try_send(BusInput::Event { port, event }) {
                                warn!("Dropping bus event for port {}: {}", port, e);
                            }
                        }
                        Ok(Frame::PortSelect(value)) => {
                            trace!("Ignoring port select {:02X} from bus", value);
                        }
                        Err(e) => warn!("Bad bus message on port {}: {}", port, e),
                    }
                }
            },
            decoder,
        )?;
        debug!("Created virtual port '{}'", name);
        inputs.push(conn);
    }

    info!(
        "Virtual MIDI ports ready: client '{}', {} logical port(s)",
        client_name, port_count
    );

    Ok((
        VirtualPorts { _inputs: inputs },
        ChannelSink::new(event_tx),
        ChannelSource::new(input_rx),
    ))
}

fn create_outputs(client_name: &str, port_count: u8) -> Result<Vec<MidiOutputConnection>> {
    (1..=port_count)
        .map(|port| -> Result<MidiOutputConnection> {
            let name = port_name(client_name, "In", port, port_count);
            let conn = MidiOutput::new(client_name)?.create_virtual(&name)?;
            debug!("Created virtual port '{}'", name);
            Ok(conn)
        })
        .collect()
}

fn output_thread(
    client_name: String,
    port_count: u8,
    mut rx: mpsc::Receiver<(u8, MidiEvent)>,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut outputs = match create_outputs(&client_name, port_count) {
        Ok(outputs) => {
            let _ = ready.send(Ok(()));
            outputs
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Some((port, event)) = rx.blocking_recv() {
        let Some(conn) = outputs.get_mut((port as usize).wrapping_sub(1)) else {
            warn!("No virtual port {} for {}", port, event);
            continue;
        };
        // Bus clients expect complete messages, so never carry running status
        match FrameEncoder::new().encode(&event) {
            Ok(bytes) => {
                if let Err(e) = conn.send(&bytes) {
                    warn!("Failed to send {} to bus port {}: {}", event, port, e);
                }
            }
            Err(e) => warn!("Cannot encode {} for bus: {}", event, e),
        }
    }
    debug!("Bus writer stopped");
}
