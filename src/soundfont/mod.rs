//! Wavetable sound bank loading and resolution.
//!
//! A bank file is parsed in two passes: [`chunk`] reads the recursive
//! chunked container into a tree, then [`parser`] resolves the generator
//! records inside it into playable [`SampleZone`] descriptors grouped into
//! [`Instrument`]s and keyed by `(bank, program)` in a [`Soundbank`].
//! Everything here is immutable after loading and designed to be shared
//! with the audio thread behind an `Arc`.

mod chunk;
mod generator;
mod parser;

pub use chunk::Chunk;
pub use generator::{GeneratorRecord, GeneratorTable, Operator, GENERATOR_SLOTS};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while loading a sound bank.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A chunk identifier or declared size did not match the container.
    #[error("invalid bank data: {0}")]
    Format(String),
    /// The decoder ran past the end of the buffer.
    #[error("unexpected end of data while reading {0}")]
    Truncated(&'static str),
    /// A chunk required for resolution is absent.
    #[error("missing required chunk \"{0}\"")]
    MissingChunk(&'static str),
    /// The file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Amplitude envelope parameters resolved from generator records.
///
/// Durations are in seconds; the sustain level is a plain amplitude
/// factor. A zone that carries no envelope generators gates on at full
/// level: zero-length stages fall through immediately and sustain sits at
/// 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// Attack ramp duration.
    pub attack: f32,
    /// Full-level hold duration.
    pub hold: f32,
    /// Decay-to-sustain duration.
    pub decay: f32,
    /// Sustain amplitude, 0..1.
    pub sustain: f32,
    /// Release-to-silence duration.
    pub release: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: 0.0,
            hold: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
        }
    }
}

/// A resolved playback descriptor for one zone of an instrument.
///
/// Loop points are expressed as loop-relative phase: a phase of 0 is the
/// loop start, 1.0 the loop end. `initial_offset` is negative when the
/// sample has a lead-in before the loop region, and `ending_offset` marks
/// where a non-looping sample runs out.
#[derive(Debug, Clone)]
pub struct SampleZone {
    /// The bank's whole 16-bit sample pool, shared between zones.
    pub samples: Arc<[i16]>,
    /// Index of the loop start within the pool.
    pub loop_start: usize,
    /// Loop length in samples (whole region when not looping).
    pub loop_len: f64,
    /// Starting phase, ≤ 0 (lead-in before the loop region).
    pub initial_offset: f64,
    /// Phase at which a non-looping sample ends.
    pub ending_offset: f64,
    /// Whether playback wraps at the loop end.
    pub looped: bool,
    /// Amplitude envelope for voices playing this zone.
    pub envelope: Envelope,
    /// Zone pan contribution, −0.5..0.5.
    pub pan: f32,
    /// Lowest tone this zone covers.
    pub min_key: u8,
    /// Highest tone this zone covers.
    pub max_key: u8,
    /// Tone at which the sample plays at its recorded rate.
    pub original_pitch: u8,
    /// Fine pitch correction in cents.
    pub pitch_correction: i8,
    /// Native sample rate of the recording.
    pub sample_rate: u32,
}

impl SampleZone {
    /// Reads the sample value at a loop-relative phase.
    ///
    /// Out-of-range phases read as silence; the index math can step
    /// outside the recorded region for malformed banks and must not
    /// leave the buffer.
    pub fn sample_at(&self, phase: f64) -> i16 {
        let index = self.loop_start as f64 + phase * self.loop_len;
        if index < 0.0 {
            return 0;
        }
        self.samples.get(index as usize).copied().unwrap_or(0)
    }
}

/// A `tone → zone` mapping for one `(bank, program)` pair.
///
/// Zone assignment is order dependent: the first zone added claims all
/// 128 tones as the default, later zones claim only their own key range.
#[derive(Debug, Clone)]
pub struct Instrument {
    zones: Vec<Option<Arc<SampleZone>>>,
    empty: bool,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            zones: vec![None; 128],
            empty: true,
        }
    }
}

impl Instrument {
    /// Adds a zone under the first-claims-all, later-claim-range rule.
    pub fn add_zone(&mut self, zone: Arc<SampleZone>) {
        if self.empty {
            for slot in &mut self.zones {
                *slot = Some(zone.clone());
            }
        } else {
            let lo = zone.min_key as usize;
            let hi = (zone.max_key as usize).min(127);
            if lo <= hi {
                for slot in &mut self.zones[lo..=hi] {
                    *slot = Some(zone.clone());
                }
            }
        }
        self.empty = false;
    }

    /// Returns the zone covering a tone, if any.
    pub fn zone(&self, tone: u8) -> Option<&Arc<SampleZone>> {
        self.zones[(tone & 0x7F) as usize].as_ref()
    }

    /// Returns true when no zone has been added.
    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

/// A resolved sound bank: instruments keyed by `(bank, program)`.
#[derive(Debug, Clone, Default)]
pub struct Soundbank {
    /// Bank name from the INAM chunk, when present.
    pub name: String,
    /// Target engine name from the isng chunk, when present.
    pub engine: String,
    /// Format version from the ifil chunk, when present.
    pub version: (u16, u16),
    instruments: HashMap<(u16, u8), Arc<Instrument>>,
}

impl Soundbank {
    /// Parses and resolves a sound bank from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the container is malformed or any of
    /// the record chunks required for resolution is missing. No partial
    /// bank is ever returned.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let root = Chunk::parse(data)?;
        parser::resolve(&root, data)
    }

    /// Reads and resolves a sound bank from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Io`] if the file cannot be read, or any
    /// error from [`Soundbank::from_bytes`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, ParseError> {
        let data = std::fs::read(path)?;
        Ok(Arc::new(Self::from_bytes(&data)?))
    }

    /// Looks up the instrument bound to a `(bank, program)` pair.
    pub fn instrument(&self, bank: u16, program: u8) -> Option<&Arc<Instrument>> {
        self.instruments.get(&(bank, program))
    }

    /// Returns the number of resolved instruments.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Returns true when no instrument resolved.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Assembles a bank from resolved instruments, dropping any that
    /// never received a zone.
    pub(crate) fn assemble(
        name: String,
        engine: String,
        version: (u16, u16),
        instruments: HashMap<(u16, u8), Instrument>,
    ) -> Self {
        let instruments = instruments
            .into_iter()
            .filter(|(_, inst)| !inst.is_empty())
            .map(|(key, inst)| (key, Arc::new(inst)))
            .collect();
        Self {
            name,
            engine,
            version,
            instruments,
        }
    }
}
