use serde::Deserialize;
use std::f64::consts::TAU;


#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform::Sine
    }
}

impl std::str::FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sine" => Ok(Waveform::Sine),
            "square" => Ok(Waveform::Square),
            "triangle" => Ok(Waveform::Triangle),
            "sawtooth" | "saw" => Ok(Waveform::Sawtooth),
            other => Err(format!("unknown waveform '{}'", other)),
        }
    }
}

impl Waveform {
    /// Evaluate the waveform at `phase`, measured in cycles in [0, 1).
    pub fn sample(self, phase: f64) -> f32 {
        let v = match self {
            Waveform::Sine => (phase * TAU).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Waveform::Sawtooth => {
                if phase < 0.5 {
                    2.0 * phase
                } else {
                    2.0 * (phase - 0.5) - 1.0
                }
            }
        };
        v as f32
    }
}


/// Envelope times in seconds, `sustain` as a level in [0, 1].
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl EnvelopeConfig {
    /// On/off gate: full level at the first sample, silent right after release.
    pub fn gate() -> Self {
        Self {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
        }
    }

    pub fn adsr() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.2,
        }
    }

    pub fn is_gate(&self) -> bool {
        self.attack <= 0.0 && self.decay <= 0.0 && self.sustain >= 1.0 && self.release <= 0.0
    }
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self::gate()
    }
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Attack,
    Decay,
    Sustain,
    Release,
    Idle,
}

/// Per-voice linear envelope, advanced one sample at a time.
#[derive(Copy, Clone, Debug)]
pub struct Envelope {
    stage: Stage,
    level: f32,
    sustain: f32,
    attack_step: f32,
    decay_step: f32,
    release_time: f32,
    release_step: f32,
    sample_rate: f32,
}

// Zero-length segments complete within a single sample.
fn step_for(distance: f32, seconds: f32, sample_rate: f32) -> f32 {
    if seconds <= 0.0 {
        f32::INFINITY
    } else {
        distance / (seconds * sample_rate)
    }
}

impl Envelope {
    pub fn new(config: &EnvelopeConfig, sample_rate: f32) -> Self {
        let sustain = config.sustain.clamp(0.0, 1.0);
        Self {
            stage: Stage::Attack,
            level: 0.0,
            sustain,
            attack_step: step_for(1.0, config.attack, sample_rate),
            decay_step: step_for(1.0 - sustain, config.decay, sample_rate),
            release_time: config.release,
            release_step: 0.0,
            sample_rate,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_released(&self) -> bool {
        matches!(self.stage, Stage::Release | Stage::Idle)
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Idle
    }

    /// Start the release ramp from whatever level the envelope is at now.
    pub fn release(&mut self) {
        if self.is_released() {
            return;
        }

        if self.release_time <= 0.0 || self.level <= 0.0 {
            self.level = 0.0;
            self.stage = Stage::Idle;
        } else {
            self.release_step = step_for(self.level, self.release_time, self.sample_rate);
            self.stage = Stage::Release;
        }
    }

    /// Restart the attack from the current level instead of from silence.
    pub fn retrigger_from(&mut self, level: f32) {
        self.level = level.clamp(0.0, 1.0);
        self.stage = Stage::Attack;
        self.release_step = 0.0;
    }

    pub fn next_level(&mut self) -> f32 {
        match self.stage {
            Stage::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }

            Stage::Decay => {
                self.level -= self.decay_step;
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = Stage::Sustain;
                }
            }

            Stage::Sustain => {
                self.level = self.sustain;
            }

            Stage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }

            Stage::Idle => {
                self.level = 0.0;
            }
        }

        self.level
    }
}


/// One sounding note. Created and mutated only by the render side of the registry.
#[derive(Copy, Clone, Debug)]
pub struct VoiceState {
    note: u8,
    frequency: f64,
    amplitude: f32,
    phase: f64,
    envelope: Envelope,
    hold_remaining: Option<u64>,
    id: u64,
}

impl VoiceState {
    pub fn new(
        note: u8,
        frequency: f64,
        amplitude: f32,
        envelope: Envelope,
        hold_frames: Option<u64>,
        id: u64,
    ) -> Self {
        Self {
            note,
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
            envelope,
            hold_remaining: hold_frames,
            id,
        }
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    /// Oscillator position in cycles, always in [0, 1).
    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.envelope.is_released()
    }

    pub fn is_done(&self) -> bool {
        self.envelope.is_finished()
    }

    /// Retrigger in place. The oscillator keeps running and the new attack
    /// starts from the current envelope level; everything else restarts.
    pub fn retrigger(&mut self, replacement: VoiceState) {
        let phase = self.phase;
        let level = self.envelope.level();
        *self = replacement;
        self.phase = phase;
        self.envelope.retrigger_from(level);
    }

    pub fn notify_release(&mut self) {
        self.hold_remaining = None;
        self.envelope.release();
    }

    pub fn step_frame(&mut self, waveform: Waveform, sample_rate: f64) -> f32 {
        if let Some(remaining) = self.hold_remaining {
            if remaining == 0 {
                self.notify_release();
            } else {
                self.hold_remaining = Some(remaining - 1);
            }
        }

        let env = self.envelope.next_level();
        let value = waveform.sample(self.phase) * self.amplitude * env;

        self.phase += self.frequency / sample_rate;
        self.phase %= 1.0;
        value
    }

    /// Add this voice's next `out.len()` samples onto `out`.
    pub fn render_into(&mut self, out: &mut [f32], waveform: Waveform, sample_rate: f64) {
        for sample in out.iter_mut() {
            *sample += self.step_frame(waveform, sample_rate);
        }
    }
}
