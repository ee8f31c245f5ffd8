use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::SynthConfig;
use crate::pitch::is_valid_note;
use crate::registry::{self, Delivery, NoteRegistry, NoteWriter};
use crate::util::log_if_error;
use crate::voice::{VoiceState, Waveform};

/// Output samples are hard-clamped to this magnitude.
pub const CLIP_LEVEL: f32 = 1.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NoteError {
    #[error("note number {0} is outside the MIDI range 0..=127")]
    InvalidNote(u8),
    #[error("velocity {0} is outside the MIDI range 0..=127")]
    InvalidVelocity(u8),
    #[error("frequency {0} Hz is not a positive finite number")]
    InvalidFrequency(f64),
}

/// Counters updated by the render path and read from anywhere.
#[derive(Debug, Default)]
pub struct EngineStats {
    buffers_rendered: AtomicU64,
    clipped_samples: AtomicU64,
    deferred_commands: AtomicU64,
}

impl EngineStats {
    pub fn buffers_rendered(&self) -> u64 {
        self.buffers_rendered.load(Ordering::Relaxed)
    }

    pub fn clipped_samples(&self) -> u64 {
        self.clipped_samples.load(Ordering::Relaxed)
    }

    /// Commands that found the queue full and had to wait in the backlog.
    pub fn deferred_commands(&self) -> u64 {
        self.deferred_commands.load(Ordering::Relaxed)
    }
}


/// Producer side of the engine, used from the MIDI event path.
pub struct SynthHandle {
    writer: NoteWriter,
    sample_rate: f32,
    stats: Arc<EngineStats>,
}

impl SynthHandle {
    /// Start (or retrigger) a note. Invalid input is logged and ignored.
    ///
    /// `duration_hint` caps how long the voice may be held, in seconds; a
    /// voice that outlives it is released as if a note-off had arrived.
    pub fn add_note(&mut self, note: u8, frequency: f64, duration_hint: Option<f32>, velocity: u8) {
        log_if_error(
            "add_note ignored",
            self.try_add_note(note, frequency, duration_hint, velocity),
        );
    }

    /// Stop a note. Stopping a note that is not sounding does nothing.
    pub fn remove_note(&mut self, note: u8) {
        log_if_error("remove_note ignored", self.try_remove_note(note));
    }

    pub fn all_notes_off(&mut self) {
        let delivery = self.writer.all_off();
        self.track(delivery);
    }

    /// Retry commands that were held back by a full queue.
    /// Returns how many are still waiting.
    pub fn flush_pending(&mut self) -> usize {
        self.writer.flush()
    }

    pub fn try_add_note(
        &mut self,
        note: u8,
        frequency: f64,
        duration_hint: Option<f32>,
        velocity: u8,
    ) -> Result<(), NoteError> {
        if !is_valid_note(note) {
            return Err(NoteError::InvalidNote(note));
        }
        if velocity > 127 {
            return Err(NoteError::InvalidVelocity(velocity));
        }
        if velocity == 0 {
            return self.try_remove_note(note);
        }
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(NoteError::InvalidFrequency(frequency));
        }

        let amplitude = velocity as f32 / 127.0;
        let hold_frames = duration_hint
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d as f64 * self.sample_rate as f64).round() as u64);

        let delivery = self.writer.upsert(note, frequency, amplitude, hold_frames);
        self.track(delivery);
        Ok(())
    }

    pub fn try_remove_note(&mut self, note: u8) -> Result<(), NoteError> {
        if !is_valid_note(note) {
            return Err(NoteError::InvalidNote(note));
        }
        let delivery = self.writer.remove(note);
        self.track(delivery);
        Ok(())
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    fn track(&self, delivery: Delivery) {
        if delivery == Delivery::Deferred {
            self.stats.deferred_commands.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "note command queue is full, {} command(s) waiting",
                self.writer.backlog_len()
            );
        }
    }
}


/// Render side of the engine, owned by the audio callback.
pub struct SynthEngine {
    registry: NoteRegistry,
    waveform: Waveform,
    master_gain: f32,
    stats: Arc<EngineStats>,
}

impl SynthEngine {
    pub fn new(config: &SynthConfig, sample_rate: f32) -> (SynthHandle, SynthEngine) {
        let (writer, registry) = registry::channel(
            config.event_queue_capacity,
            config.max_voices,
            config.envelope,
            sample_rate,
        );
        let stats = Arc::new(EngineStats::default());

        let handle = SynthHandle {
            writer,
            sample_rate,
            stats: stats.clone(),
        };
        let engine = SynthEngine {
            registry,
            waveform: config.waveform,
            master_gain: config.master_gain.clamp(0.0, 1.0),
            stats,
        };
        (handle, engine)
    }

    /// Fill `out` with the next `out.len()` mono samples.
    ///
    /// Overwrites the whole buffer: silence when nothing is sounding,
    /// otherwise the sum of all voices scaled by the master gain and
    /// hard-clamped to [-CLIP_LEVEL, CLIP_LEVEL]. Never allocates, never
    /// blocks and never fails.
    pub fn render_buffer(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        self.registry.render_into(out, self.waveform);

        let mut clipped = 0u64;
        for sample in out.iter_mut() {
            let mut v = *sample * self.master_gain;
            if !v.is_finite() {
                v = 0.0;
            }
            if v.abs() > CLIP_LEVEL {
                clipped += 1;
                v = v.clamp(-CLIP_LEVEL, CLIP_LEVEL);
            }
            *sample = v;
        }

        if clipped > 0 {
            self.stats.clipped_samples.fetch_add(clipped, Ordering::Relaxed);
        }
        self.stats.buffers_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_voices(&self) -> usize {
        self.registry.len()
    }

    pub fn voices(&self) -> impl Iterator<Item = &VoiceState> {
        self.registry.voices()
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }
}
