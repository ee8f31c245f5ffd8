//! A real-time polyphonic MIDI synthesizer.
//!
//! The MIDI event path talks to the engine through a [`engine::SynthHandle`];
//! the audio callback owns the [`engine::SynthEngine`] and calls
//! [`engine::SynthEngine::render_buffer`] once per device buffer. The two
//! meet only in the [`registry`], whose render side never blocks or
//! allocates.

pub mod audio;
pub mod config;
pub mod engine;
pub mod midi;
pub mod midi_controller;
pub mod pitch;
pub mod registry;
pub mod util;
pub mod voice;

pub use config::SynthConfig;
pub use engine::{EngineStats, NoteError, SynthEngine, SynthHandle};
pub use pitch::note_to_frequency;
