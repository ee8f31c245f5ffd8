use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::pitch::NUM_NOTES;
use crate::voice::{EnvelopeConfig, Waveform};

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Everything tunable about the synthesizer, loadable from a TOML file.
///
/// Missing keys fall back to their defaults, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthConfig {
    pub sample_rate: u32,
    pub waveform: Waveform,
    pub master_gain: f32,
    pub envelope: EnvelopeConfig,
    pub max_voices: usize,
    /// Seconds after which a held note is released automatically.
    pub max_note_duration: Option<f32>,
    /// Only listen to this MIDI channel (0-15); all channels when unset.
    pub midi_channel: Option<u8>,
    pub poll_interval_ms: u64,
    pub event_queue_capacity: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            waveform: Waveform::Sine,
            master_gain: 1.0,
            envelope: EnvelopeConfig::gate(),
            max_voices: 64,
            max_note_duration: None,
            midi_channel: None,
            poll_interval_ms: 5,
            event_queue_capacity: 1024,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl SynthConfig {
    pub fn from_toml(fname: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = fname.as_ref();
        let mut file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut file_as_string = String::new();
        file.read_to_string(&mut file_as_string)
            .map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?;

        let config: Self = toml::from_str(&file_as_string).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.master_gain) {
            return Err(invalid("master_gain", "must be within [0, 1]"));
        }

        let env = &self.envelope;
        for (field, secs) in [
            ("envelope.attack", env.attack),
            ("envelope.decay", env.decay),
            ("envelope.release", env.release),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(invalid(field, "must be a non-negative number of seconds"));
            }
        }
        if !(0.0..=1.0).contains(&env.sustain) {
            return Err(invalid("envelope.sustain", "must be within [0, 1]"));
        }

        if self.max_voices == 0 || self.max_voices > NUM_NOTES {
            return Err(invalid("max_voices", format!("must be within 1..={}", NUM_NOTES)));
        }
        if let Some(d) = self.max_note_duration {
            if !d.is_finite() || d <= 0.0 {
                return Err(invalid("max_note_duration", "must be a positive number of seconds"));
            }
        }
        if let Some(ch) = self.midi_channel {
            if ch > 15 {
                return Err(invalid("midi_channel", "must be within 0..=15"));
            }
        }
        if self.event_queue_capacity == 0 {
            return Err(invalid("event_queue_capacity", "must be positive"));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SynthConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert!(config.envelope.is_gate());
    }

    #[test]
    fn empty_document_gives_defaults() {
        let config: SynthConfig = toml::from_str("").unwrap();
        assert_eq!(config, SynthConfig::default());
    }

    #[test]
    fn parses_full_document() {
        let doc = r#"
            waveform = "triangle"
            master_gain = 0.8
            max_voices = 16
            max_note_duration = 4.0
            midi_channel = 2

            [envelope]
            attack = 0.02
            release = 0.3
        "#;
        let config: SynthConfig = toml::from_str(doc).unwrap();
        config.validate().unwrap();

        assert_eq!(config.waveform, Waveform::Triangle);
        assert_eq!(config.max_voices, 16);
        assert_eq!(config.max_note_duration, Some(4.0));
        assert_eq!(config.midi_channel, Some(2));
        assert_eq!(config.envelope.attack, 0.02);
        assert_eq!(config.envelope.sustain, 1.0);
        assert_eq!(config.envelope.release, 0.3);
        assert_eq!(config.poll_interval_ms, 5);
    }

    #[test]
    fn example_file_is_valid() {
        let config: SynthConfig =
            toml::from_str(include_str!("../synth.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.waveform, Waveform::Sawtooth);
        assert_eq!(config.envelope, EnvelopeConfig::adsr());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<SynthConfig>("cutoff = 1000").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad = [
            SynthConfig { master_gain: 1.5, ..SynthConfig::default() },
            SynthConfig { max_voices: 0, ..SynthConfig::default() },
            SynthConfig { max_voices: 129, ..SynthConfig::default() },
            SynthConfig { midi_channel: Some(16), ..SynthConfig::default() },
            SynthConfig { max_note_duration: Some(0.0), ..SynthConfig::default() },
            SynthConfig { event_queue_capacity: 0, ..SynthConfig::default() },
            SynthConfig {
                envelope: EnvelopeConfig { release: -1.0, ..EnvelopeConfig::adsr() },
                ..SynthConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SynthConfig::from_toml("/nonexistent/midisynth.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
