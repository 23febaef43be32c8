//! Real-time synthesis engine.
//!
//! The synthesis chain mirrors the data flow of playback: the
//! [`Sequencer`] consumes decoded events in tick order and dispatches
//! them to its sixteen [`Channel`]s, each of which owns one or more
//! [`Voice`]s that are ticked once per output frame to produce stereo
//! samples.

mod channel;
mod sequencer;
mod voice;
mod waveform;

pub use channel::{Channel, DEFAULT_VOICES_PER_CHANNEL};
pub use sequencer::{Sequencer, DEFAULT_TEMPO_MICROS};
pub use voice::{EnvelopeStage, Voice, VoiceParams};
pub use waveform::Waveform;
