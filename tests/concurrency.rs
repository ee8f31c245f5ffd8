use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use midisynth::voice::{EnvelopeConfig, Waveform};
use midisynth::{note_to_frequency, SynthConfig, SynthEngine};

const OPERATIONS: usize = 10_000;

fn velocity_for(note: u8) -> u8 {
    note % 127 + 1
}

fn check_engine(engine: &SynthEngine, max_voices: usize) {
    let mut seen = HashSet::new();
    for v in engine.voices() {
        assert!(seen.insert(v.note()), "note {} has two voices", v.note());
        assert_eq!(v.frequency(), note_to_frequency(v.note()));
        assert_eq!(v.amplitude(), velocity_for(v.note()) as f32 / 127.0);
        assert!(v.phase() >= 0.0 && v.phase() < 1.0);
    }
    assert!(seen.len() <= max_voices);
}

fn stress(config: SynthConfig, seed: u64) {
    let (mut handle, mut engine) = SynthEngine::new(&config, 44100.0);
    let writer_done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..OPERATIONS {
                let note = rng.random_range(0..128u8);
                if rng.random_bool(0.6) {
                    handle.add_note(note, note_to_frequency(note), None, velocity_for(note));
                } else {
                    handle.remove_note(note);
                }
                if rng.random_bool(0.05) {
                    thread::yield_now();
                }
            }
            writer_done.store(true, Ordering::Release);
        });

        let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
        let mut buffer = vec![0.0f32; 512];
        let mut renders = 0;
        while !writer_done.load(Ordering::Acquire) || renders < 100 {
            let frames = rng.random_range(1..=512usize);
            let out = &mut buffer[..frames];
            engine.render_buffer(out);

            assert_eq!(out.len(), frames);
            assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
            check_engine(&engine, config.max_voices);
            renders += 1;
        }
    });
}

#[test]
fn randomized_interleavings_with_gate() {
    let config = SynthConfig {
        waveform: Waveform::Sawtooth,
        ..SynthConfig::default()
    };
    stress(config, 1);
}

#[test]
fn randomized_interleavings_with_envelope_and_small_queue() {
    let config = SynthConfig {
        envelope: EnvelopeConfig::adsr(),
        max_voices: 8,
        event_queue_capacity: 16,
        ..SynthConfig::default()
    };
    stress(config, 2);
}

#[test]
fn note_on_before_render_is_audible() {
    let config = SynthConfig {
        waveform: Waveform::Square,
        ..SynthConfig::default()
    };
    let (mut handle, mut engine) = SynthEngine::new(&config, 44100.0);
    let (applied_tx, applied_rx) = mpsc::channel();

    let writer = thread::spawn(move || {
        handle.add_note(60, note_to_frequency(60), None, 127);
        applied_tx.send(()).unwrap();
        handle
    });

    applied_rx.recv().unwrap();
    let mut out = [0.0f32; 128];
    engine.render_buffer(&mut out);
    assert_eq!(out[0], 1.0);
    assert_eq!(engine.active_voices(), 1);

    let mut handle = writer.join().unwrap();
    handle.remove_note(60);
    engine.render_buffer(&mut out);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(engine.active_voices(), 0);
}

#[test]
fn all_notes_off_from_another_thread_silences_output() {
    let (mut handle, mut engine) = SynthEngine::new(&SynthConfig::default(), 44100.0);
    for note in 48..72 {
        handle.add_note(note, note_to_frequency(note), None, 100);
    }

    let mut out = [0.0f32; 256];
    engine.render_buffer(&mut out);
    assert_eq!(engine.active_voices(), 24);

    thread::spawn(move || handle.all_notes_off()).join().unwrap();
    engine.render_buffer(&mut out);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(engine.active_voices(), 0);
}
