use anyhow::{anyhow, Context, Result};
use std::sync::mpsc;

use midir::{MidiInput, MidiInputConnection};
use midly::live::LiveEvent;
use midly::MidiMessage;

pub const STATUS_NOTE_OFF: u8 = 0x80;
pub const STATUS_NOTE_ON: u8 = 0x90;

const MAX_EVENTS_PER_POLL: usize = 64;
const CLIENT_NAME: &str = "midisynth";

/// A decoded channel voice message as a raw (status, note, velocity) triple.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    pub timestamp: u64,
    pub status: u8,
    pub note: u8,
    pub velocity: u8,
}

impl MidiEvent {
    pub fn new(status: u8, note: u8, velocity: u8) -> Self {
        Self {
            timestamp: 0,
            status,
            note,
            velocity,
        }
    }

    pub fn kind(&self) -> u8 {
        self.status & 0xF0
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }
}

/// Anything that yields batches of note events until it is closed.
pub trait MidiEventSource {
    /// Return whatever events arrived since the last call; never waits for more.
    fn poll_events(&mut self) -> Result<Vec<MidiEvent>>;

    /// Release the underlying device handles.
    fn close(self)
    where
        Self: Sized;
}


/// Translate raw MIDI bytes into a note event. Anything other than a
/// note-on/note-off channel message yields `None`.
pub fn decode(timestamp: u64, bytes: &[u8]) -> Option<MidiEvent> {
    match LiveEvent::parse(bytes) {
        Ok(LiveEvent::Midi { channel, message }) => {
            let channel: u8 = channel.into();
            let (status, key, vel) = match message {
                MidiMessage::NoteOn { key, vel } => (STATUS_NOTE_ON, key, vel),
                MidiMessage::NoteOff { key, vel } => (STATUS_NOTE_OFF, key, vel),
                _ => return None,
            };

            Some(MidiEvent {
                timestamp,
                status: status | channel,
                note: key.into(),
                velocity: vel.into(),
            })
        }

        Ok(_) => None,

        Err(err) => {
            log::debug!("midly failed to parse {:?}, error: {:?}", bytes, err);
            None
        }
    }
}


pub fn list_devices() -> Result<Vec<String>> {
    let midi_in = MidiInput::new(CLIENT_NAME).context("could not initialise MIDI input")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

pub struct Connection(MidiInputConnection<mpsc::SyncSender<MidiEvent>>);

/// Event source backed by one or more hardware MIDI input ports.
pub struct PortSource {
    events: mpsc::Receiver<MidiEvent>,
    connections: Vec<Connection>,
}

impl PortSource {
    pub fn connect(midi_ports: &[String]) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(1024);

        let connections = midi_ports
            .iter()
            .map(|port_name| connect_port(port_name, sender.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            events: receiver,
            connections,
        })
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }
}

fn connect_port(port_name: &str, sender: mpsc::SyncSender<MidiEvent>) -> Result<Connection> {
    let midi_in = MidiInput::new(&format!("{} to {}", CLIENT_NAME, port_name))
        .context("could not initialise MIDI input")?;

    let selected_port = midi_in
        .ports()
        .into_iter()
        .find(|p| midi_in.port_name(p).map_or(false, |name| name == port_name))
        .ok_or_else(|| anyhow!("could not find MIDI port {}", port_name))?;

    let conn = midi_in
        .connect(
            &selected_port,
            &format!("{} conn to {}", CLIENT_NAME, port_name),
            |timestamp, bytes, sender| {
                if let Some(event) = decode(timestamp, bytes) {
                    if let Err(err) = sender.try_send(event) {
                        log::warn!("failed to queue MIDI event, error: {}", err);
                    }
                }
            },
            sender,
        )
        .map_err(|err| anyhow!("could not connect to MIDI port {}: {}", port_name, err))?;

    log::info!("listening on MIDI port {}", port_name);
    Ok(Connection(conn))
}

impl MidiEventSource for PortSource {
    fn poll_events(&mut self) -> Result<Vec<MidiEvent>> {
        let mut batch = Vec::new();
        while batch.len() < MAX_EVENTS_PER_POLL {
            match self.events.try_recv() {
                Ok(event) => batch.push(event),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    if batch.is_empty() {
                        return Err(anyhow!("all MIDI connections are gone"));
                    }
                    break;
                }
            }
        }
        Ok(batch)
    }

    fn close(self) {
        for Connection(conn) in self.connections {
            conn.close();
        }
        log::info!("MIDI ports closed");
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_note_on_with_channel() {
        let event = decode(7, &[0x93, 60, 100]).unwrap();
        assert_eq!(event.timestamp, 7);
        assert_eq!(event.status, 0x93);
        assert_eq!(event.kind(), STATUS_NOTE_ON);
        assert_eq!(event.channel(), 3);
        assert_eq!((event.note, event.velocity), (60, 100));
    }

    #[test]
    fn decodes_note_off() {
        let event = decode(0, &[0x80, 64, 0]).unwrap();
        assert_eq!(event, MidiEvent::new(0x80, 64, 0));
    }

    #[test]
    fn ignores_other_messages() {
        // control change, pitch bend, clock
        assert_eq!(decode(0, &[0xB0, 7, 100]), None);
        assert_eq!(decode(0, &[0xE0, 0, 64]), None);
        assert_eq!(decode(0, &[0xF8]), None);
    }

    #[test]
    fn ignores_malformed_bytes() {
        assert_eq!(decode(0, &[]), None);
        assert_eq!(decode(0, &[0x90]), None);
    }
}
