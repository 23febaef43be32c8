//! Tick-driven sequencing and event dispatch.
//!
//! The sequencer owns the sixteen channels and the playback clock. Once
//! per output frame [`Sequencer::tick`] accumulates the tick ratio and,
//! on each tick boundary, dispatches every due event from every track;
//! [`Sequencer::generate`] then sums the channels into one stereo frame.
//! Tempo changes rescale the clock, and when every track has ended the
//! sequence either rewinds (looping playback) or reports completion
//! (offline rendering).

use super::channel::Channel;
use crate::config::SynthConfig;
use crate::midi::{
    tone_frequency, Sequence, CONTROLLER_BANK_SELECT, CONTROLLER_DATA_ENTRY_LSB,
    CONTROLLER_DATA_ENTRY_MSB, CONTROLLER_MODULATION, CONTROLLER_NRPN_LSB, CONTROLLER_NRPN_MSB,
    CONTROLLER_PAN, CONTROLLER_RPN_LSB, CONTROLLER_RPN_MSB, CONTROLLER_VOLUME, META_END_OF_TRACK,
    META_TEMPO, META_TIME_SIGNATURE, NUM_CHANNELS, STATUS_CHANNEL_AFTERTOUCH, STATUS_CONTROLLER,
    STATUS_META, STATUS_NOTE_AFTERTOUCH, STATUS_NOTE_OFF, STATUS_NOTE_ON, STATUS_PITCH_BEND,
    STATUS_PROGRAM_CHANGE, STATUS_SYSTEM,
};
use crate::soundfont::Soundbank;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default tempo in microseconds per quarter note (120 BPM), used until
/// the first tempo meta event.
pub const DEFAULT_TEMPO_MICROS: u32 = 500_000;

/// Read cursor over one track during playback.
#[derive(Debug, Clone, Copy, Default)]
struct TrackCursor {
    event_index: usize,
    ended: bool,
}

/// The playback controller: sixteen channels, the tick clock, and the
/// event dispatch loop.
#[derive(Debug)]
pub struct Sequencer {
    channels: [Channel; NUM_CHANNELS],
    cursors: Vec<TrackCursor>,
    sequence: Option<Arc<Sequence>>,
    soundbank: Option<Arc<Soundbank>>,
    freq_table: [f64; 128],
    samples_per_tick: f64,
    tick_advance: f64,
    tick_offset: f64,
    sequence_tick: u64,
    time_division: u16,
    selected_bank: u16,
    bend_range: f32,
    voices_per_channel: usize,
    sample_rate: u32,
    dt: f32,
    paused: bool,
    looping: bool,
    finished: bool,
    passes: u64,
}

impl Sequencer {
    /// Creates a sequencer with no sequence or sound bank loaded.
    pub fn new(config: &SynthConfig) -> Self {
        let sample_rate = config.sample_rate.max(1);
        let freq_table =
            std::array::from_fn(|i| tone_frequency(i as u8) / sample_rate as f64);
        let mut sequencer = Self {
            channels: std::array::from_fn(|_| Channel::single(config.default_waveform)),
            cursors: Vec::new(),
            sequence: None,
            soundbank: None,
            freq_table,
            samples_per_tick: 1.0,
            tick_advance: 1.0,
            tick_offset: 0.0,
            sequence_tick: 0,
            time_division: 1,
            selected_bank: 0,
            bend_range: config.bend_range,
            voices_per_channel: config.voices_per_channel.max(1),
            sample_rate,
            dt: config.frame_seconds(),
            paused: false,
            looping: true,
            finished: false,
            passes: 0,
        };
        sequencer.set_tempo(DEFAULT_TEMPO_MICROS);
        sequencer
    }

    /// Loads a sequence and rewinds the clock.
    pub fn load_sequence(&mut self, sequence: Arc<Sequence>) {
        self.time_division = sequence.time_division;
        self.cursors = vec![TrackCursor::default(); sequence.tracks.len()];
        self.sequence_tick = 0;
        self.tick_offset = 0.0;
        self.finished = false;
        if sequence.is_smpte() {
            self.set_smpte_rate();
        } else {
            self.set_tempo(DEFAULT_TEMPO_MICROS);
        }
        self.sequence = Some(sequence);
    }

    /// Attaches a resolved sound bank for program changes to bind from.
    pub fn set_soundbank(&mut self, soundbank: Arc<Soundbank>) {
        self.soundbank = Some(soundbank);
    }

    /// Recomputes the tick ratio from a tempo in microseconds per
    /// quarter note. Ignored for SMPTE-timed sequences.
    fn set_tempo(&mut self, micros_per_quarter: u32) {
        if self.time_division & 0x8000 != 0 {
            return;
        }
        let division = (self.time_division & 0x7FFF).max(1) as f64;
        let micros = micros_per_quarter.max(1) as f64;
        self.samples_per_tick = self.sample_rate as f64 * micros / 1_000_000.0 / division;
        self.tick_advance = self.samples_per_tick.recip();
    }

    /// Derives the tick ratio from an SMPTE time division: the high byte
    /// is a negated frame rate, the low byte ticks per frame.
    fn set_smpte_rate(&mut self) {
        let frames = (-((self.time_division >> 8) as i8)) as i32;
        let ticks_per_frame = (self.time_division & 0xFF) as i32;
        let ticks_per_second = (frames.max(1) * ticks_per_frame.max(1)) as f64;
        self.samples_per_tick = self.sample_rate as f64 / ticks_per_second;
        self.tick_advance = self.samples_per_tick.recip();
    }

    /// Output frames per sequencer tick at the current tempo.
    pub fn samples_per_tick(&self) -> f64 {
        self.samples_per_tick
    }

    /// Current playback position in sequence ticks.
    pub fn position(&self) -> u64 {
        self.sequence_tick
    }

    /// Pauses or resumes the tick clock.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Returns whether the clock is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Enables or disables loop-on-completion (enabled for live
    /// playback, disabled for offline rendering).
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// True once a non-looping sequence has dispatched every event.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Flips a channel's mute flag and returns the new state.
    pub fn toggle_mute(&mut self, channel: u8) -> bool {
        self.channels[(channel as usize) % NUM_CHANNELS].toggle_mute()
    }

    /// Stops every voice on every channel, releasing or hard-silencing.
    pub fn all_notes_off(&mut self, immediate: bool) {
        for channel in &mut self.channels {
            if immediate {
                channel.silence_all();
            } else {
                channel.release_all();
            }
        }
    }

    /// Rewinds to tick zero and silences all channels.
    pub fn rewind(&mut self) {
        self.sequence_tick = 0;
        for cursor in &mut self.cursors {
            cursor.event_index = 0;
            cursor.ended = false;
        }
        for channel in &mut self.channels {
            channel.silence_all();
        }
        self.finished = false;
        self.passes += 1;
        debug!(passes = self.passes, "sequence rewound");
    }

    /// Advances the playback clock by one output frame, dispatching all
    /// events on every tick boundary crossed.
    pub fn tick(&mut self) {
        if !self.paused {
            self.tick_offset += self.tick_advance;
        }
        while self.tick_offset >= 1.0 {
            self.tick_offset -= 1.0;
            self.dispatch();
        }
    }

    /// Produces one stereo frame by summing all sixteen channels.
    pub fn generate(&mut self) -> (f32, f32) {
        let mut left = 0.0;
        let mut right = 0.0;
        for channel in &mut self.channels {
            let (l, r) = channel.generate(self.dt);
            left += l;
            right += r;
        }
        (left, right)
    }

    /// Dispatches every due event across all tracks for the current
    /// sequence tick, then advances it. When every track has ended the
    /// sequence loops or finishes.
    fn dispatch(&mut self) {
        let Some(sequence) = self.sequence.clone() else {
            return;
        };
        if self.finished {
            return;
        }

        let mut all_ended = !sequence.tracks.is_empty();
        for (index, track) in sequence.tracks.iter().enumerate() {
            loop {
                let at = self.cursors[index].event_index;
                let Some(event) = track.events.get(at) else {
                    // A track that runs out of events is done even
                    // without an end-of-track meta.
                    self.cursors[index].ended = true;
                    break;
                };
                if event.tick > self.sequence_tick {
                    break;
                }
                self.cursors[index].event_index += 1;
                if self.handle_message(event.status, &event.data) {
                    self.cursors[index].ended = true;
                }
            }
            all_ended &= self.cursors[index].ended;
        }

        if all_ended {
            if self.looping && sequence.tracks.iter().any(|t| !t.is_empty()) {
                self.rewind();
            } else {
                self.finished = true;
            }
        } else {
            self.sequence_tick += 1;
        }
    }

    /// Applies one MIDI message to the synthesis state.
    ///
    /// Returns true when the message ends its track. Live input posts
    /// messages through here in the same shape as file-decoded events.
    pub fn handle_message(&mut self, status: u8, data: &[u8]) -> bool {
        let ch = (status & 0x0F) as usize;
        match status & 0xF0 {
            STATUS_NOTE_OFF => {
                if let Some(&tone) = data.first() {
                    self.channels[ch].stop(tone);
                }
            }
            STATUS_NOTE_ON => {
                if let [tone, velocity] = *data {
                    if velocity == 0 {
                        // Velocity zero is the running-status idiom for
                        // a note-off.
                        self.channels[ch].stop(tone);
                    } else {
                        self.channels[ch].start(
                            tone,
                            velocity as f32 / 127.0,
                            &self.freq_table,
                            self.sample_rate,
                        );
                    }
                }
            }
            STATUS_NOTE_AFTERTOUCH | STATUS_CHANNEL_AFTERTOUCH => {}
            STATUS_CONTROLLER => {
                if let [controller, value] = *data {
                    self.handle_controller(ch, controller, value);
                }
            }
            STATUS_PROGRAM_CHANGE => {
                if let Some(&program) = data.first() {
                    self.handle_program_change(ch, program);
                }
            }
            STATUS_PITCH_BEND => {
                if let [lsb, msb] = *data {
                    let value = ((lsb & 0x7F) as i32) | (((msb & 0x7F) as i32) << 7);
                    let semitones = (value - 8192) as f64 / 8192.0 * self.bend_range as f64;
                    self.channels[ch].set_bend(2f64.powf(semitones / 12.0));
                }
            }
            STATUS_SYSTEM => {
                if status == STATUS_META {
                    return self.handle_meta(data);
                }
                debug!("ignoring system exclusive message");
            }
            _ => warn!(status, tick = self.sequence_tick, "unknown event status"),
        }
        false
    }

    fn handle_controller(&mut self, ch: usize, controller: u8, value: u8) {
        match controller {
            CONTROLLER_BANK_SELECT => self.selected_bank = value as u16,
            CONTROLLER_VOLUME => self.channels[ch].set_volume(value as f32 / 127.0),
            CONTROLLER_PAN => self.channels[ch].set_pan(value as f32 / 127.0 - 0.5),
            CONTROLLER_MODULATION
            | CONTROLLER_DATA_ENTRY_MSB
            | CONTROLLER_DATA_ENTRY_LSB
            | CONTROLLER_NRPN_LSB
            | CONTROLLER_NRPN_MSB
            | CONTROLLER_RPN_LSB
            | CONTROLLER_RPN_MSB => {
                debug!(controller, value, "controller recognized but unhandled")
            }
            _ => warn!(controller, value, "unknown controller"),
        }
    }

    /// Rebinds a channel to the instrument at `(selected_bank, program)`.
    /// A lookup miss silences the channel and playback continues.
    fn handle_program_change(&mut self, ch: usize, program: u8) {
        let instrument = self
            .soundbank
            .as_ref()
            .and_then(|bank| bank.instrument(self.selected_bank, program))
            .cloned();
        match instrument {
            Some(instrument) => {
                info!(
                    channel = ch,
                    bank = self.selected_bank,
                    program,
                    "binding channel to instrument"
                );
                self.channels[ch].set_instrument(instrument, self.voices_per_channel);
            }
            None => {
                warn!(
                    channel = ch,
                    bank = self.selected_bank,
                    program,
                    "missing program, silencing channel"
                );
                self.channels[ch].silence_all();
            }
        }
    }

    fn handle_meta(&mut self, data: &[u8]) -> bool {
        let Some(&meta_type) = data.first() else {
            return false;
        };
        match meta_type {
            META_END_OF_TRACK => return true,
            META_TEMPO => {
                if self.time_division & 0x8000 == 0 {
                    let length = data.get(1).copied().unwrap_or(0) as usize;
                    let payload = data.get(2..2 + length).unwrap_or(&[]);
                    let mut tempo = 0u64;
                    for &byte in payload {
                        tempo = (tempo << 8) | byte as u64;
                    }
                    if tempo > 0 {
                        self.set_tempo(tempo as u32);
                        debug!(
                            micros_per_quarter = tempo,
                            samples_per_tick = self.samples_per_tick,
                            "tempo change"
                        );
                    }
                }
            }
            META_TIME_SIGNATURE => debug!("time signature meta ignored"),
            // Text-class metas carry no playback semantics.
            0x01..=0x09 => {}
            _ => warn!(meta_type, "unknown meta message"),
        }
        false
    }
}
