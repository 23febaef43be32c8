//! Audio streaming and rendering.
//!
//! This module connects the synthesis engine to the outside world:
//! - Real-time playback through rodio, with a bounded command queue from
//!   the control thread to the audio thread
//! - Block-based mixing of the sequencer's channels into interleaved
//!   16-bit stereo buffers
//! - Offline WAV rendering

pub mod engine;
pub mod export;
pub mod mixer;

pub use engine::AudioEngine;
pub use export::export_to_wav;
pub use mixer::Mixer;
