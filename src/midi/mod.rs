//! MIDI sequence data structures.
//!
//! This module provides the in-memory representation of a Standard MIDI
//! File: timed events grouped into tracks, plus the timing metadata needed
//! to schedule them. Parsing lives in [`parser`].

mod parser;

pub use parser::ParseError;

use std::path::Path;
use std::sync::Arc;

/// Note-off channel voice message (high nibble).
pub const STATUS_NOTE_OFF: u8 = 0x80;
/// Note-on channel voice message (high nibble).
pub const STATUS_NOTE_ON: u8 = 0x90;
/// Polyphonic key pressure (high nibble).
pub const STATUS_NOTE_AFTERTOUCH: u8 = 0xA0;
/// Controller change (high nibble).
pub const STATUS_CONTROLLER: u8 = 0xB0;
/// Program change (high nibble).
pub const STATUS_PROGRAM_CHANGE: u8 = 0xC0;
/// Channel pressure (high nibble).
pub const STATUS_CHANNEL_AFTERTOUCH: u8 = 0xD0;
/// Pitch-bend change (high nibble).
pub const STATUS_PITCH_BEND: u8 = 0xE0;
/// System exclusive / system common (high nibble).
pub const STATUS_SYSTEM: u8 = 0xF0;
/// Meta event status byte.
pub const STATUS_META: u8 = 0xFF;

/// Bank select controller number.
pub const CONTROLLER_BANK_SELECT: u8 = 0x00;
/// Modulation wheel controller number.
pub const CONTROLLER_MODULATION: u8 = 0x01;
/// Data entry MSB controller number.
pub const CONTROLLER_DATA_ENTRY_MSB: u8 = 0x06;
/// Channel volume controller number.
pub const CONTROLLER_VOLUME: u8 = 0x07;
/// Pan controller number.
pub const CONTROLLER_PAN: u8 = 0x0A;
/// Data entry LSB controller number.
pub const CONTROLLER_DATA_ENTRY_LSB: u8 = 0x26;
/// Non-registered parameter LSB controller number.
pub const CONTROLLER_NRPN_LSB: u8 = 0x62;
/// Non-registered parameter MSB controller number.
pub const CONTROLLER_NRPN_MSB: u8 = 0x63;
/// Registered parameter LSB controller number.
pub const CONTROLLER_RPN_LSB: u8 = 0x64;
/// Registered parameter MSB controller number.
pub const CONTROLLER_RPN_MSB: u8 = 0x65;

/// End-of-track meta type.
pub const META_END_OF_TRACK: u8 = 0x2F;
/// Tempo-change meta type.
pub const META_TEMPO: u8 = 0x51;
/// Time-signature meta type.
pub const META_TIME_SIGNATURE: u8 = 0x58;

/// Number of MIDI channels a sequence can address.
pub const NUM_CHANNELS: usize = 16;

/// A single timed MIDI event.
///
/// `tick` is the absolute position in sequence ticks (delta times are
/// resolved during parsing). For channel voice messages `data` holds the
/// one or two data bytes. For meta events it holds
/// `[meta_type, length, payload...]`, and for system exclusive messages
/// the body through the terminating `0xF7`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Absolute tick at which the event fires.
    pub tick: u64,
    /// Status byte, possibly inherited via running status.
    pub status: u8,
    /// Message bytes following the status byte.
    pub data: Vec<u8>,
}

impl Event {
    /// Returns the channel this event addresses (low nibble of status).
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    /// Returns true for note-on and note-off messages.
    pub fn is_note(&self) -> bool {
        matches!(self.status & 0xF0, STATUS_NOTE_OFF | STATUS_NOTE_ON)
    }
}

/// An ordered list of events decoded from one track chunk.
///
/// Events are appended in file order with non-decreasing ticks. The
/// playback cursor over a track lives in the sequencer, keeping the
/// loaded sequence immutable and shareable.
#[derive(Debug, Clone, Default)]
pub struct Track {
    /// Decoded events in tick order.
    pub events: Vec<Event>,
}

impl Track {
    /// Returns the number of events in the track.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the track decoded to no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A fully decoded MIDI sequence: all tracks plus the time division.
///
/// The time division is either ticks-per-quarter-note, or an SMPTE
/// frames/ticks pairing when the high bit is set. Sequences are immutable
/// once loaded and are shared with the audio thread as `Arc<Sequence>`.
#[derive(Debug, Clone)]
pub struct Sequence {
    /// Decoded tracks, one per track chunk in the file.
    pub tracks: Vec<Track>,
    /// SMF time division field (ticks per quarter note, or SMPTE).
    pub time_division: u16,
}

impl Sequence {
    /// Parses a sequence from raw SMF bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the header or any track chunk is
    /// structurally invalid. Individually malformed channel events are
    /// skipped with a warning rather than failing the load.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        parser::parse_sequence(data)
    }

    /// Reads and parses a sequence from a `.mid` file.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Io`] if the file cannot be read, or any
    /// parse error from [`Sequence::from_bytes`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, ParseError> {
        let data = std::fs::read(path)?;
        Ok(Arc::new(Self::from_bytes(&data)?))
    }

    /// Returns true when the sequence uses SMPTE (frames-per-second)
    /// timing rather than ticks per quarter note.
    pub fn is_smpte(&self) -> bool {
        self.time_division & 0x8000 != 0
    }
}

/// Returns the frequency in Hz of a tone number.
///
/// Tone 49 is concert A at 440 Hz; each step is one equal-tempered
/// semitone.
pub fn tone_frequency(tone: u8) -> f64 {
    440.0 * 2f64.powf((tone as f64 - 49.0) / 12.0)
}
