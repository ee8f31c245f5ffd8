use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::*;
use cpal::{SampleFormat, SampleRate, StreamConfig};

use crate::engine::SynthEngine;

/// Largest block rendered in one go; longer device buffers are rendered in pieces.
const RENDER_CHUNK: usize = 1024;

/// How long `close` waits for in-flight callbacks to pick up the silence flag.
const CLOSE_GRACE: Duration = Duration::from_millis(50);


/// Pick an output configuration, preferring mono at `sample_rate`.
///
/// Falls back to any channel count at `sample_rate`, then to the device
/// default. The engine renders mono either way and the sink copies it to
/// every channel.
pub fn choose_config(device: &cpal::Device, sample_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
    let wanted = SampleRate(sample_rate);
    let ranges: Vec<_> = device
        .supported_output_configs()
        .context("error while querying configs")?
        .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
        .collect();

    let best = ranges
        .iter()
        .find(|r| r.channels() == 1)
        .or_else(|| ranges.first())
        .cloned();

    let supported = match best {
        Some(range) => range.with_sample_rate(wanted),
        None => {
            log::warn!(
                "output device does not support {} Hz, using its default configuration",
                sample_rate
            );
            device
                .default_output_config()
                .context("no supported output config")?
        }
    };

    let sample_format = supported.sample_format();
    Ok((supported.into(), sample_format))
}

/// A running output stream that pulls audio from a [`SynthEngine`].
pub struct AudioOutput {
    stream: cpal::Stream,
    silenced: Arc<AtomicBool>,
}

impl AudioOutput {
    pub fn start(
        device: &cpal::Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        engine: SynthEngine,
    ) -> Result<Self> {
        let silenced = Arc::new(AtomicBool::new(false));

        let stream = match sample_format {
            SampleFormat::F32 => run::<f32>(device, config, engine, silenced.clone()),
            SampleFormat::I16 => run::<i16>(device, config, engine, silenced.clone()),
            SampleFormat::U16 => run::<u16>(device, config, engine, silenced.clone()),
        }?;

        Ok(Self { stream, silenced })
    }

    /// Switch the output to silence, then stop the stream.
    pub fn close(self) -> Result<()> {
        self.silenced.store(true, Ordering::Relaxed);
        std::thread::sleep(CLOSE_GRACE);
        self.stream
            .pause()
            .map_err(|err| anyhow!("could not pause output stream: {}", err))?;
        log::info!("audio stream closed");
        Ok(())
    }
}

fn run<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut engine: SynthEngine,
    silenced: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample,
{
    let channels = config.channels.max(1) as usize;

    // A host-reported error silences the next callback instead of rendering into it.
    let faulted = Arc::new(AtomicBool::new(false));
    let err_faulted = faulted.clone();
    let err_fn = move |err: cpal::StreamError| {
        log::error!("an error occurred on stream: {}", err);
        err_faulted.store(true, Ordering::Relaxed);
    };

    let mut scratch = [0.0f32; RENDER_CHUNK];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if silenced.load(Ordering::Relaxed) || faulted.swap(false, Ordering::Relaxed) {
                for sample in data.iter_mut() {
                    *sample = cpal::Sample::from(&0.0f32);
                }
                return;
            }

            for block in data.chunks_mut(RENDER_CHUNK * channels) {
                let frames = block.len() / channels;
                let mono = &mut scratch[..frames];
                engine.render_buffer(mono);

                for (frame, value) in block.chunks_mut(channels).zip(mono.iter()) {
                    for sample in frame.iter_mut() {
                        *sample = cpal::Sample::from(value);
                    }
                }
            }
        },
        err_fn,
    )?;
    stream.play()?;

    log::info!(
        "audio stream running: {} Hz, {} channel(s)",
        config.sample_rate.0,
        config.channels
    );
    Ok(stream)
}
