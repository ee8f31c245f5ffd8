//! The set of sounding voices, shared between one writer (the MIDI event
//! path) and one reader (the audio render path).
//!
//! The writer never touches voice state directly. Each `upsert`/`remove` is
//! encoded as a [`NoteCommand`] and pushed into a wait-free single-producer
//! single-consumer ring buffer. The reader drains that buffer at the start of
//! every render pass and applies the commands to voices it owns outright, so
//! a voice is always either fully present or fully absent during a render.
//! Neither side ever waits on the other: a command that finds the queue full
//! is held back by the writer and pushed once the reader has made room, and an
//! empty queue simply means nothing changed.

use rtrb::{Consumer, Producer, RingBuffer};
use slotmap::{DefaultKey, DenseSlotMap, Key};

use crate::pitch::{is_valid_note, NUM_NOTES};
use crate::voice::{Envelope, EnvelopeConfig, VoiceState, Waveform};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum NoteCommand {
    Upsert {
        note: u8,
        frequency: f64,
        amplitude: f32,
        hold_frames: Option<u64>,
    },
    Remove {
        note: u8,
    },
    AllOff,
}

/// What happened to a command handed to [`NoteWriter`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue was full. The command waits in the writer's backlog and is
    /// pushed by a later `send` or `flush`.
    Deferred,
}

/// Writer half, owned by the event path.
///
/// Commands that do not fit in the queue are kept per note, latest wins, and
/// retried before anything newer is pushed. A deferred `AllOff` discards the
/// per-note backlog behind it and goes out first.
pub struct NoteWriter {
    commands: Producer<NoteCommand>,
    backlog: [Option<NoteCommand>; NUM_NOTES],
    backlog_notes: usize,
    all_off_deferred: bool,
}

impl NoteWriter {
    pub fn upsert(
        &mut self,
        note: u8,
        frequency: f64,
        amplitude: f32,
        hold_frames: Option<u64>,
    ) -> Delivery {
        self.send(NoteCommand::Upsert {
            note,
            frequency,
            amplitude,
            hold_frames,
        })
    }

    pub fn remove(&mut self, note: u8) -> Delivery {
        self.send(NoteCommand::Remove { note })
    }

    pub fn all_off(&mut self) -> Delivery {
        self.send(NoteCommand::AllOff)
    }

    /// Number of commands still waiting for room in the queue.
    pub fn backlog_len(&self) -> usize {
        self.backlog_notes + self.all_off_deferred as usize
    }

    /// Push as much of the backlog as the queue has room for.
    /// Returns how many commands are still waiting.
    pub fn flush(&mut self) -> usize {
        if self.all_off_deferred {
            if self.commands.push(NoteCommand::AllOff).is_err() {
                return self.backlog_len();
            }
            self.all_off_deferred = false;
        }

        if self.backlog_notes > 0 {
            for slot in self.backlog.iter_mut() {
                let Some(command) = *slot else {
                    continue;
                };
                if self.commands.push(command).is_err() {
                    break;
                }
                *slot = None;
                self.backlog_notes -= 1;
            }
        }

        self.backlog_len()
    }

    fn send(&mut self, command: NoteCommand) -> Delivery {
        // Anything already deferred goes first, so nothing overtakes it.
        if self.flush() == 0 && self.commands.push(command).is_ok() {
            return Delivery::Queued;
        }
        self.defer(command);
        Delivery::Deferred
    }

    fn defer(&mut self, command: NoteCommand) {
        match command {
            NoteCommand::AllOff => {
                self.backlog = [None; NUM_NOTES];
                self.backlog_notes = 0;
                self.all_off_deferred = true;
            }

            NoteCommand::Upsert { note, .. } | NoteCommand::Remove { note } => {
                // Out-of-range notes are ignored by the reader anyway.
                if let Some(slot) = self.backlog.get_mut(note as usize) {
                    if slot.replace(command).is_none() {
                        self.backlog_notes += 1;
                    }
                }
            }
        }
    }
}


/// Reader half, owned by the render path.
pub struct NoteRegistry {
    commands: Consumer<NoteCommand>,
    voices: DenseSlotMap<DefaultKey, VoiceState>,
    voice_by_note: [DefaultKey; NUM_NOTES],
    envelope: EnvelopeConfig,
    sample_rate: f32,
    max_voices: usize,
    id_ctr: u64,
}

/// Create a connected writer/reader pair.
///
/// All storage is reserved here; applying commands and rendering never
/// allocates afterwards.
pub fn channel(
    queue_capacity: usize,
    max_voices: usize,
    envelope: EnvelopeConfig,
    sample_rate: f32,
) -> (NoteWriter, NoteRegistry) {
    let (producer, consumer) = RingBuffer::new(queue_capacity.max(1));
    let max_voices = max_voices.clamp(1, NUM_NOTES);

    let registry = NoteRegistry {
        commands: consumer,
        voices: DenseSlotMap::with_capacity(max_voices + 1),
        voice_by_note: [DefaultKey::null(); NUM_NOTES],
        envelope,
        sample_rate,
        max_voices,
        id_ctr: 0,
    };

    let writer = NoteWriter {
        commands: producer,
        backlog: [None; NUM_NOTES],
        backlog_notes: 0,
        all_off_deferred: false,
    };
    (writer, registry)
}

impl NoteRegistry {
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn get(&self, note: u8) -> Option<&VoiceState> {
        self.voice_by_note
            .get(note as usize)
            .and_then(|&key| self.voices.get(key))
    }

    pub fn voices(&self) -> impl Iterator<Item = &VoiceState> {
        self.voices.values()
    }

    /// Apply every command published so far. Returns how many were applied.
    pub fn apply_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
            applied += 1;
        }
        applied
    }

    /// Bring the registry up to date and expose the voices for one render pass.
    pub fn snapshot_for_render(&mut self) -> impl Iterator<Item = &mut VoiceState> {
        self.apply_pending();
        self.voices.values_mut()
    }

    /// Drop voices whose envelope has run out.
    pub fn collect_finished(&mut self) {
        let voice_by_note = &mut self.voice_by_note;
        self.voices.retain(|key, v| {
            if v.is_done() {
                if let Some(slot) = voice_by_note.get_mut(v.note() as usize) {
                    if *slot == key {
                        *slot = DefaultKey::null();
                    }
                }
                false
            } else {
                true
            }
        });
    }

    pub fn render_into(&mut self, out: &mut [f32], waveform: Waveform) {
        let sample_rate = self.sample_rate as f64;
        for voice in self.snapshot_for_render() {
            voice.render_into(out, waveform, sample_rate);
        }
        self.collect_finished();
    }

    fn apply(&mut self, command: NoteCommand) {
        match command {
            NoteCommand::Upsert {
                note,
                frequency,
                amplitude,
                hold_frames,
            } => self.upsert(note, frequency, amplitude, hold_frames),

            NoteCommand::Remove { note } => self.remove(note),

            NoteCommand::AllOff => {
                for v in self.voices.values_mut() {
                    v.notify_release();
                }
            }
        }
    }

    fn upsert(&mut self, note: u8, frequency: f64, amplitude: f32, hold_frames: Option<u64>) {
        if !is_valid_note(note) {
            return;
        }

        let envelope = Envelope::new(&self.envelope, self.sample_rate);
        let voice = VoiceState::new(note, frequency, amplitude, envelope, hold_frames, self.id_ctr);
        self.id_ctr = self.id_ctr.wrapping_add(1);

        let existing = self.voice_by_note[note as usize];
        if let Some(v) = self.voices.get_mut(existing) {
            v.retrigger(voice);
            return;
        }

        if self.voices.len() >= self.max_voices {
            self.steal_voice();
        }

        let key = self.voices.insert(voice);
        self.voice_by_note[note as usize] = key;
    }

    fn remove(&mut self, note: u8) {
        let Some(&key) = self.voice_by_note.get(note as usize) else {
            return;
        };

        if let Some(v) = self.voices.get_mut(key) {
            v.notify_release();
            if v.is_done() {
                self.voices.remove(key);
                self.voice_by_note[note as usize] = DefaultKey::null();
            }
        }
    }

    // Released voices go first, then the oldest.
    fn steal_voice(&mut self) {
        let victim = self
            .voices
            .iter()
            .min_by_key(|(_, v)| (!v.is_released(), v.id()))
            .map(|(key, v)| (key, v.note()));

        if let Some((key, note)) = victim {
            self.voices.remove(key);
            if self.voice_by_note[note as usize] == key {
                self.voice_by_note[note as usize] = DefaultKey::null();
            }
        }
    }
}
