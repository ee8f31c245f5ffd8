use crate::engine::SynthHandle;
use crate::midi::{self, MidiEvent, MidiEventSource};
use crate::pitch::{is_valid_note, note_to_frequency};


/// Turns note events into engine calls.
pub struct MidiController {
    synth: SynthHandle,
    channel: Option<u8>,
    max_note_duration: Option<f32>,
}

impl MidiController {
    pub fn new(synth: SynthHandle, channel: Option<u8>, max_note_duration: Option<f32>) -> Self {
        Self {
            synth,
            channel,
            max_note_duration,
        }
    }

    pub fn synth(&mut self) -> &mut SynthHandle {
        &mut self.synth
    }

    fn key_on(&mut self, key: u8, vel: u8) {
        if !is_valid_note(key) {
            log::warn!("ignoring note-on for out-of-range note {}", key);
            return;
        }
        self.synth
            .add_note(key, note_to_frequency(key), self.max_note_duration, vel);
    }

    fn key_off(&mut self, key: u8) {
        self.synth.remove_note(key);
    }

    pub fn handle_midi_event(&mut self, event: MidiEvent) {
        if let Some(channel) = self.channel {
            if event.channel() != channel {
                return;
            }
        }

        match event.kind() {
            midi::STATUS_NOTE_ON if event.velocity > 0 => self.key_on(event.note, event.velocity),
            midi::STATUS_NOTE_ON | midi::STATUS_NOTE_OFF => self.key_off(event.note),
            _ => log::debug!("ignoring MIDI status {:#04x}", event.status),
        }
    }

    /// Handle one batch from `source`. A failed poll is logged and skipped.
    /// Commands held back by a full queue are retried first, even when the
    /// batch turns out empty. Returns the number of events handled.
    pub fn pump_events<M: MidiEventSource>(&mut self, source: &mut M) -> usize {
        self.synth.flush_pending();

        match source.poll_events() {
            Ok(events) => {
                let n = events.len();
                for event in events {
                    self.handle_midi_event(event);
                }
                n
            }

            Err(err) => {
                log::warn!("MIDI poll failed: {:#}", err);
                0
            }
        }
    }
}
