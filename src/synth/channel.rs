//! Per-channel voice management.
//!
//! A channel owns its voices and the channel-wide volume, pan, pitch-bend
//! and mute state that apply identically to all of them. Synthetic
//! channels drive a single oscillator voice; sample channels keep a fixed
//! voice pool with FIFO voice stealing.

use super::voice::{Voice, VoiceParams};
use super::waveform::Waveform;
use crate::soundfont::Instrument;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Default size of a polyphonic channel's voice pool.
pub const DEFAULT_VOICES_PER_CHANNEL: usize = 5;

/// A single MIDI channel's synthesis state.
#[derive(Debug)]
pub struct Channel {
    volume: f32,
    pan: f32,
    bend: f64,
    muted: bool,
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    /// One voice playing a synthetic waveform.
    Single { voice: Voice, waveform: Waveform },
    /// A pool of sample-playing voices with FIFO stealing.
    Multi {
        voices: Vec<Voice>,
        active: VecDeque<usize>,
        instrument: Arc<Instrument>,
    },
}

impl Channel {
    /// Creates a monophonic synthetic-waveform channel.
    pub fn single(waveform: Waveform) -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            bend: 1.0,
            muted: false,
            kind: Kind::Single {
                voice: Voice::new(),
                waveform,
            },
        }
    }

    /// Creates a polyphonic sample-playback channel.
    pub fn multi(instrument: Arc<Instrument>, pool_size: usize) -> Self {
        let mut channel = Self::single(Waveform::Silence);
        channel.set_instrument(instrument, pool_size);
        channel
    }

    /// Rebinds the channel to an instrument, swapping it to sample
    /// playback. Channel-wide volume, pan and bend survive the swap.
    pub fn set_instrument(&mut self, instrument: Arc<Instrument>, pool_size: usize) {
        let pool_size = pool_size.max(1);
        self.kind = Kind::Multi {
            voices: vec![Voice::new(); pool_size],
            active: VecDeque::with_capacity(pool_size),
            instrument,
        };
    }

    /// Sets the channel volume multiplier.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    /// Sets the channel pan, −0.5..0.5.
    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan;
    }

    /// Sets the pitch-bend frequency ratio.
    pub fn set_bend(&mut self, bend: f64) {
        self.bend = bend;
    }

    /// Returns the current pitch-bend frequency ratio.
    pub fn bend(&self) -> f64 {
        self.bend
    }

    /// Flips the mute flag and returns the new state.
    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }

    /// Returns whether the channel is muted.
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Starts a tone at the given volume.
    ///
    /// On a polyphonic channel a voice already bound to the tone is
    /// retriggered; otherwise a free voice is taken, and when the pool
    /// is full the oldest active voice is stolen.
    pub fn start(&mut self, tone: u8, volume: f32, freq_table: &[f64; 128], sample_rate: u32) {
        match &mut self.kind {
            Kind::Single { voice, .. } => voice.start_oscillator(tone, volume, freq_table),
            Kind::Multi {
                voices,
                active,
                instrument,
            } => {
                let Some(zone) = instrument.zone(tone) else {
                    trace!(tone, "no zone covers tone");
                    return;
                };
                let slot = voices
                    .iter()
                    .position(|v| v.bound_tone() == Some(tone))
                    .or_else(|| voices.iter().position(|v| v.bound_tone().is_none()))
                    .unwrap_or_else(|| active.pop_front().unwrap_or(0));

                // The slot moves to the FIFO tail exactly once, whether
                // retriggered, fresh, or stolen.
                active.retain(|&i| i != slot);
                active.push_back(slot);
                voices[slot].start_tone(tone, volume, zone.clone(), freq_table, sample_rate);
            }
        }
    }

    /// Stops the voice bound to a tone, if any.
    pub fn stop(&mut self, tone: u8) {
        match &mut self.kind {
            Kind::Single { voice, .. } => voice.stop_tone(tone),
            Kind::Multi { voices, active, .. } => {
                if let Some(slot) = voices.iter().position(|v| v.bound_tone() == Some(tone)) {
                    voices[slot].stop();
                    voices[slot].unbind();
                    active.retain(|&i| i != slot);
                }
            }
        }
    }

    /// Releases every voice (normal note-off behavior).
    pub fn release_all(&mut self) {
        match &mut self.kind {
            Kind::Single { voice, .. } => voice.stop(),
            Kind::Multi { voices, active, .. } => {
                for voice in voices.iter_mut() {
                    voice.stop();
                    voice.unbind();
                }
                active.clear();
            }
        }
    }

    /// Hard-silences every voice, bypassing release stages.
    pub fn silence_all(&mut self) {
        match &mut self.kind {
            Kind::Single { voice, .. } => voice.silence(),
            Kind::Multi { voices, active, .. } => {
                for voice in voices.iter_mut() {
                    voice.silence();
                    voice.unbind();
                }
                active.clear();
            }
        }
    }

    /// Returns true when every voice is in its off stage.
    pub fn is_silent(&self) -> bool {
        match &self.kind {
            Kind::Single { voice, .. } => voice.stage() == super::EnvelopeStage::Off,
            Kind::Multi { voices, .. } => voices
                .iter()
                .all(|v| v.stage() == super::EnvelopeStage::Off),
        }
    }

    /// Produces one stereo frame, summing every voice in the pool.
    pub fn generate(&mut self, dt: f32) -> (f32, f32) {
        if self.muted {
            return (0.0, 0.0);
        }
        let waveform = match &self.kind {
            Kind::Single { waveform, .. } => *waveform,
            Kind::Multi { .. } => Waveform::Silence,
        };
        let params = VoiceParams {
            dt,
            bend: self.bend,
            volume: self.volume,
            pan: self.pan,
            waveform,
        };
        match &mut self.kind {
            Kind::Single { voice, .. } => voice.tick(&params),
            Kind::Multi { voices, .. } => voices.iter_mut().fold((0.0, 0.0), |(l, r), voice| {
                let (vl, vr) = voice.tick(&params);
                (l + vl, r + vr)
            }),
        }
    }
}
