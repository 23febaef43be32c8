//! midisynth - a real-time MIDI sequencer and wavetable synthesizer.
//!
//! This library turns a Standard MIDI File and an optional SoundFont-style
//! sample bank into a continuous stereo audio stream: binary codecs for
//! both formats, a tick-driven sequencer dispatching events to sixteen
//! channels, per-voice envelope shaping with polyphonic voice stealing,
//! and a block mixer feeding the audio device or a WAV file.

pub mod audio;
pub mod config;
pub mod midi;
pub mod soundfont;
pub mod synth;

// Re-export commonly used types
pub use audio::{engine::AudioEngine, export::export_to_wav};
pub use config::SynthConfig;
pub use midi::Sequence;
pub use soundfont::Soundbank;
pub use synth::Sequencer;
