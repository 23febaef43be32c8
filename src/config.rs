//! Runtime configuration for the synthesizer.
//!
//! Loaded from a JSON file when one is supplied on the command line;
//! every field has a default so partial files work.

use crate::synth::{Waveform, DEFAULT_VOICES_PER_CHANNEL};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Default output sample rate (44.1 kHz).
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default pitch-bend range in semitones at full wheel deflection.
pub const DEFAULT_BEND_RANGE: f32 = 2.0;

/// Tunable synthesis parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Voice pool size for each polyphonic channel.
    pub voices_per_channel: usize,
    /// Pitch-bend range in semitones.
    pub bend_range: f32,
    /// Waveform played by channels without a bound instrument.
    pub default_waveform: Waveform,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            voices_per_channel: DEFAULT_VOICES_PER_CHANNEL,
            bend_range: DEFAULT_BEND_RANGE,
            default_waveform: Waveform::default(),
        }
    }
}

impl SynthConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open config: {}", path.as_ref().display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))
    }

    /// Seconds per output frame at the configured sample rate.
    pub fn frame_seconds(&self) -> f32 {
        1.0 / self.sample_rate.max(1) as f32
    }
}
