//! Audio engine for real-time playback.
//!
//! Owns the audio output stream and the control side of the synthesizer.
//! The sequencer and mixer are moved into the rodio source and live on
//! the audio thread; this side holds only a bounded command sender and a
//! pair of shared atomics, so control calls never block the callback and
//! never mutate synthesis state directly.

use crate::audio::mixer::{Mixer, MixerCommand, SharedState};
use crate::config::SynthConfig;
use crate::midi::{Sequence, STATUS_NOTE_OFF, STATUS_NOTE_ON};
use crate::soundfont::Soundbank;
use crate::synth::Sequencer;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Frames rendered per mixer block.
/// Smaller = lower latency but higher per-block overhead.
const BUFFER_FRAMES: usize = 256;

/// Capacity of the control-to-audio command queue.
const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Audio source that renders mixer blocks on the playback thread.
/// Implements rodio's Source trait.
struct SynthSource {
    mixer: Mixer,
    buffer: Vec<i16>,
    position: usize,
    sample_rate: u32,
}

impl SynthSource {
    fn new(mixer: Mixer, sample_rate: u32) -> Self {
        Self {
            mixer,
            buffer: vec![0; BUFFER_FRAMES * 2],
            position: BUFFER_FRAMES * 2, // start exhausted to trigger the first render
            sample_rate,
        }
    }
}

impl Iterator for SynthSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.position >= self.buffer.len() {
            self.mixer.fill(&mut self.buffer);
            self.position = 0;
        }
        let sample = self.buffer[self.position] as f32 / 32768.0;
        self.position += 1;
        Some(sample)
    }
}

impl Source for SynthSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        2 // Interleaved stereo
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None // Infinite stream
    }
}

/// The main engine for real-time sequencing and synthesis.
///
/// Construction wires the sequencer into the audio device; afterwards
/// all interaction goes through posted commands and shared atomics.
pub struct AudioEngine {
    commands: Sender<MixerCommand>,
    shared: Arc<SharedState>,
    /// Audio output stream (must be kept alive).
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
}

impl AudioEngine {
    /// Builds the synthesis chain and starts streaming to the default
    /// audio device.
    ///
    /// # Arguments
    ///
    /// * `config` - Synthesis parameters
    /// * `sequence` - Sequence to play, or None for live input only
    /// * `soundbank` - Sound bank for program changes, or None for
    ///   synthetic waveforms
    ///
    /// # Errors
    ///
    /// Returns an error if the audio output cannot be initialized.
    pub fn new(
        config: &SynthConfig,
        sequence: Option<Arc<Sequence>>,
        soundbank: Option<Arc<Soundbank>>,
    ) -> Result<Self> {
        let mut sequencer = Sequencer::new(config);
        if let Some(bank) = soundbank {
            sequencer.set_soundbank(bank);
        }
        if let Some(sequence) = sequence {
            sequencer.load_sequence(sequence);
        }

        let (commands, receiver) = bounded(COMMAND_QUEUE_CAPACITY);
        let shared = Arc::new(SharedState::new());
        let mixer = Mixer::new(sequencer, receiver, shared.clone());

        let (stream, stream_handle) =
            OutputStream::try_default().context("Failed to open audio output")?;
        stream_handle
            .play_raw(SynthSource::new(mixer, config.sample_rate))
            .context("Failed to start audio playback")?;

        Ok(Self {
            commands,
            shared,
            _stream: stream,
            _stream_handle: stream_handle,
        })
    }

    /// Posts an input event shaped like a file-decoded channel message.
    ///
    /// # Arguments
    ///
    /// * `channel` - MIDI channel (0-15)
    /// * `kind` - Status nibble, e.g. 0x90 for note-on
    /// * `tone` - Tone number (0-127)
    /// * `velocity` - Velocity or controller value (0-127)
    pub fn post(&self, channel: u8, kind: u8, tone: u8, velocity: u8) {
        self.send(MixerCommand::Message {
            status: (kind & 0xF0) | (channel & 0x0F),
            data: [tone, velocity],
        });
    }

    /// Starts a note immediately.
    pub fn note_on(&self, channel: u8, tone: u8, velocity: u8) {
        self.post(channel, STATUS_NOTE_ON, tone, velocity);
    }

    /// Stops a playing note.
    pub fn note_off(&self, channel: u8, tone: u8) {
        self.post(channel, STATUS_NOTE_OFF, tone, 0);
    }

    /// Stops all playing notes.
    ///
    /// # Arguments
    ///
    /// * `immediate` - If true, notes stop without their release stage
    pub fn all_notes_off(&self, immediate: bool) {
        self.send(MixerCommand::AllNotesOff { immediate });
    }

    /// Pauses or resumes the sequencer clock.
    pub fn set_paused(&self, paused: bool) {
        self.send(MixerCommand::SetPaused(paused));
    }

    /// Flips a channel's mute flag.
    pub fn toggle_mute(&self, channel: u8) {
        self.send(MixerCommand::ToggleMute(channel));
    }

    /// Rewinds the sequence to tick zero.
    pub fn rewind(&self) {
        self.send(MixerCommand::Rewind);
    }

    /// Stops playback; the stream keeps running but outputs silence.
    pub fn stop(&self) {
        self.shared.playing.store(false, Ordering::Relaxed);
        self.all_notes_off(true);
    }

    /// Returns the current playback position in sequence ticks.
    pub fn position_ticks(&self) -> u64 {
        self.shared.position.load(Ordering::Relaxed)
    }

    fn send(&self, command: MixerCommand) {
        if self.commands.try_send(command).is_err() {
            // Dropping is preferable to blocking the control thread or
            // growing without bound.
            warn!("command queue full, dropping command");
        }
    }
}
