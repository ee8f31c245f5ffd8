use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::*;
use structopt::StructOpt;

use midisynth::audio::{self, AudioOutput};
use midisynth::config::SynthConfig;
use midisynth::engine::SynthEngine;
use midisynth::midi::{self, MidiEventSource, PortSource};
use midisynth::midi_controller::MidiController;
use midisynth::voice::Waveform;


#[derive(StructOpt)]
struct PlayOpt {
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    /// TOML file with synthesizer settings.
    config: Option<PathBuf>,

    #[structopt(short = "k", long = "channel")]
    /// Only listen on this MIDI channel (0-15). Listens on all channels if omitted.
    midi_channel: Option<u8>,

    #[structopt(short = "w", long = "waveform")]
    /// Oscillator waveform: sine, square, triangle or sawtooth.
    waveform: Option<Waveform>,

    /// Names of the MIDI input ports to listen on.
    input_midi_ports: Vec<String>,
}

#[derive(StructOpt)]
#[structopt(about = "A polyphonic software synthesizer played over MIDI.")]
enum SynthOpt {
    /// List all available MIDI ports.
    ListMIDI,

    /// Play the software synth.
    Play(PlayOpt),
}


fn load_config(opt: &PlayOpt) -> Result<SynthConfig> {
    let mut config = match &opt.config {
        Some(path) => SynthConfig::from_toml(path)?,
        None => SynthConfig::default(),
    };

    if opt.midi_channel.is_some() {
        config.midi_channel = opt.midi_channel;
    }
    if let Some(waveform) = opt.waveform {
        config.waveform = waveform;
    }

    config.validate()?;
    Ok(config)
}

fn play(opt: PlayOpt) -> Result<()> {
    if opt.input_midi_ports.is_empty() {
        bail!("no MIDI input ports given, see `list-midi`");
    }
    let config = load_config(&opt)?;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device available"))?;
    log::info!(
        "using output device {}",
        device.name().unwrap_or_else(|_| "<unnamed>".into())
    );

    let (stream_config, sample_format) = audio::choose_config(&device, config.sample_rate)?;
    let (synth_handle, engine) = SynthEngine::new(&config, stream_config.sample_rate.0 as f32);

    let mut midi_source =
        PortSource::connect(&opt.input_midi_ports).context("could not open MIDI input")?;
    let mut midi_ctrlr = MidiController::new(synth_handle, config.midi_channel, config.max_note_duration);

    let output = AudioOutput::start(&device, &stream_config, sample_format, engine)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    log::info!(
        "playing from {} MIDI port(s), press Ctrl+C to stop",
        midi_source.num_connections()
    );
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    while running.load(Ordering::SeqCst) {
        midi_ctrlr.pump_events(&mut midi_source);
        std::thread::sleep(poll_interval);
    }

    log::info!("stopping");
    midi_ctrlr.synth().all_notes_off();
    let stats = midi_ctrlr.synth().stats().clone();
    let closed = output.close();
    midi_source.close();

    log::info!(
        "rendered {} buffers, clipped {} samples, deferred {} note commands",
        stats.buffers_rendered(),
        stats.clipped_samples(),
        stats.deferred_commands()
    );
    closed
}


fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = SynthOpt::from_args();

    match opt {
        SynthOpt::ListMIDI => {
            println!("Available devices:");
            for device_name in midi::list_devices()? {
                println!("{}", device_name);
            }
        }

        SynthOpt::Play(playopt) => {
            return play(playopt);
        }
    }

    Ok(())
}
