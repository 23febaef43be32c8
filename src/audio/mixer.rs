//! The stream mixer.
//!
//! The mixer owns the sequencer on the audio thread. Each call to
//! [`Mixer::fill`] drains the pending command queue, then renders a block
//! of interleaved stereo frames by driving the sequencer's tick once per
//! frame and summing the channel outputs. Commands therefore apply at
//! block boundaries, and the audio thread never touches a lock.

use crate::synth::Sequencer;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A control message applied by the mixer at its next block boundary.
///
/// Live input events are shaped exactly like file-decoded events: a
/// status byte plus two data bytes.
#[derive(Debug, Clone, Copy)]
pub enum MixerCommand {
    /// Dispatch a MIDI message to the sequencer.
    Message {
        /// Status byte (kind nibble | channel nibble).
        status: u8,
        /// The message's two data bytes.
        data: [u8; 2],
    },
    /// Pause or resume the sequencer clock.
    SetPaused(bool),
    /// Flip a channel's mute flag.
    ToggleMute(u8),
    /// Stop every voice; immediate bypasses release stages.
    AllNotesOff {
        /// Hard-silence instead of releasing.
        immediate: bool,
    },
    /// Rewind the sequence to tick zero.
    Rewind,
}

/// State shared between the control thread and the audio thread.
#[derive(Debug)]
pub struct SharedState {
    /// Cleared to stop playback; checked at block boundaries.
    pub playing: AtomicBool,
    /// Current playback position in sequence ticks.
    pub position: AtomicU64,
}

impl SharedState {
    /// Creates shared state with playback enabled.
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(true),
            position: AtomicU64::new(0),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a float sample to a clamped 16-bit output sample.
pub(crate) fn clamp_sample(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Pulls frames from the sequencer into interleaved stereo buffers.
pub struct Mixer {
    sequencer: Sequencer,
    commands: Receiver<MixerCommand>,
    shared: Arc<SharedState>,
}

impl Mixer {
    /// Creates a mixer over a prepared sequencer.
    pub fn new(
        sequencer: Sequencer,
        commands: Receiver<MixerCommand>,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            sequencer,
            commands,
            shared,
        }
    }

    /// Fully populates an interleaved stereo buffer.
    ///
    /// Stopped or paused playback still fills the buffer (with silence)
    /// so the device callback is never starved.
    pub fn fill(&mut self, buffer: &mut [i16]) {
        self.drain_commands();

        if !self.shared.playing.load(Ordering::Relaxed) || self.sequencer.is_paused() {
            buffer.fill(0);
            return;
        }

        for frame in buffer.chunks_exact_mut(2) {
            self.sequencer.tick();
            let (left, right) = self.sequencer.generate();
            frame[0] = clamp_sample(left);
            frame[1] = clamp_sample(right);
        }
        // Odd-length buffers never happen with a stereo device, but the
        // contract is to fill every slot.
        if buffer.len() % 2 == 1 {
            if let Some(last) = buffer.last_mut() {
                *last = 0;
            }
        }

        self.shared
            .position
            .store(self.sequencer.position(), Ordering::Relaxed);
    }

    /// Applies every queued command. Runs at block boundaries only.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                MixerCommand::Message { status, data } => {
                    self.sequencer.handle_message(status, &data);
                }
                MixerCommand::SetPaused(paused) => self.sequencer.set_paused(paused),
                MixerCommand::ToggleMute(channel) => {
                    let muted = self.sequencer.toggle_mute(channel);
                    debug!(channel, muted, "channel mute toggled");
                }
                MixerCommand::AllNotesOff { immediate } => {
                    self.sequencer.all_notes_off(immediate)
                }
                MixerCommand::Rewind => self.sequencer.rewind(),
            }
        }
    }
}
