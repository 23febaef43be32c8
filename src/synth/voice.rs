//! A single synthesis voice.
//!
//! A voice is the unit of polyphony: one sample player or one synthetic
//! oscillator with its own envelope and phase. Channels own voices and
//! tick them once per output frame.

use super::waveform::Waveform;
use crate::soundfont::{Envelope, SampleZone};
use std::sync::Arc;

/// Tones at which the frequency lookup is shifted against a sample's
/// recorded root pitch.
const PITCH_SHIFT: i32 = 16;

/// Frequency ratio of one cent.
const CENT: f64 = 1.000_577_790;

/// Envelope progression of a voice.
///
/// Transitions run strictly forward except through `start` (back to
/// `Attack`) and `stop` (into `Release`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeStage {
    /// Silent; the voice contributes nothing.
    #[default]
    Off,
    /// Fading from the sustain level to silence.
    Release,
    /// Holding the sustain level until stopped.
    Sustain,
    /// Falling from full level to the sustain level.
    Decay,
    /// Holding full level.
    Hold,
    /// Rising from silence to full level.
    Attack,
}

/// Channel-wide parameters applied identically to every voice in a pool.
#[derive(Debug, Clone, Copy)]
pub struct VoiceParams {
    /// Seconds per output frame.
    pub dt: f32,
    /// Pitch-bend frequency ratio.
    pub bend: f64,
    /// Channel volume multiplier.
    pub volume: f32,
    /// Channel pan, −0.5..0.5.
    pub pan: f32,
    /// Oscillator shape for voices without a bound sample zone.
    pub waveform: Waveform,
}

/// One monophonic synthesis unit.
#[derive(Debug, Clone, Default)]
pub struct Voice {
    stage: EnvelopeStage,
    env_elapsed: f32,
    phase: f64,
    frequency: f64,
    volume: f32,
    zone: Option<Arc<SampleZone>>,
    bound_tone: Option<u8>,
}

impl Voice {
    /// Creates a silent, unbound voice.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts playback at an explicit frequency (cycles per output
    /// frame), resetting the envelope to the attack stage.
    pub fn start(&mut self, frequency: f64, volume: f32, initial_phase: f64) {
        self.frequency = frequency;
        self.volume = volume;
        self.phase = initial_phase;
        self.stage = EnvelopeStage::Attack;
        self.env_elapsed = 0.0;
    }

    /// Binds a sample zone to this voice and starts it at the pitch of
    /// the given tone.
    ///
    /// The playback rate corrects for the zone's recorded root pitch,
    /// its native sample rate against the output rate, and its fine
    /// pitch correction in cents.
    pub fn start_tone(
        &mut self,
        tone: u8,
        volume: f32,
        zone: Arc<SampleZone>,
        freq_table: &[f64; 128],
        sample_rate: u32,
    ) {
        let shifted = zone.original_pitch as i32 - PITCH_SHIFT;
        let index = if (0..128).contains(&shifted) {
            shifted as usize
        } else {
            60
        };
        let ratio_length = zone.loop_len * freq_table[index];
        let ratio_rate = zone.sample_rate as f64 / sample_rate as f64;
        let correct = ratio_rate / ratio_length * CENT.powi(zone.pitch_correction as i32);

        let frequency = freq_table[(tone & 0x7F) as usize] * correct;
        let initial_phase = zone.initial_offset;
        self.zone = Some(zone);
        self.bound_tone = Some(tone);
        self.start(frequency, volume, initial_phase);
    }

    /// Starts a synthetic oscillator voice at the pitch of a tone.
    pub fn start_oscillator(&mut self, tone: u8, volume: f32, freq_table: &[f64; 128]) {
        self.zone = None;
        self.bound_tone = Some(tone);
        self.start(freq_table[(tone & 0x7F) as usize], volume, 0.0);
    }

    /// Moves the voice into its release stage; already-silent voices
    /// stay off.
    pub fn stop(&mut self) {
        self.stage = if self.stage == EnvelopeStage::Off {
            EnvelopeStage::Off
        } else {
            EnvelopeStage::Release
        };
        self.env_elapsed = 0.0;
    }

    /// Stops the voice only if it is bound to the given tone.
    pub fn stop_tone(&mut self, tone: u8) {
        if self.bound_tone == Some(tone) {
            self.stop();
        }
    }

    /// Hard-stops the voice, bypassing the release stage.
    pub fn silence(&mut self) {
        self.stage = EnvelopeStage::Off;
        self.env_elapsed = 0.0;
    }

    /// Clears the tone binding without touching the envelope.
    pub fn unbind(&mut self) {
        self.bound_tone = None;
    }

    /// Returns the tone this voice is bound to, if any.
    pub fn bound_tone(&self) -> Option<u8> {
        self.bound_tone
    }

    /// Returns the current envelope stage.
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Produces one stereo frame and advances the voice state.
    ///
    /// Sample voices run the full envelope; oscillator voices treat the
    /// envelope as a gate that is audible only while attacking.
    pub fn tick(&mut self, params: &VoiceParams) -> (f32, f32) {
        if self.stage == EnvelopeStage::Off {
            return (0.0, 0.0);
        }

        if let Some(zone) = &self.zone {
            let level = envelope_level(&mut self.stage, &mut self.env_elapsed, &zone.envelope);
            self.env_elapsed += params.dt;

            let out = self.volume * params.volume * level * zone.sample_at(self.phase) as f32
                / 32768.0;
            let pan = (params.pan + zone.pan).clamp(-0.5, 0.5);
            let frame = (out * (0.5 - pan), out * (0.5 + pan));

            self.phase += self.frequency * params.bend;
            if zone.looped {
                if self.phase >= 1.0 {
                    self.phase -= self.phase.floor();
                }
            } else if self.phase >= zone.ending_offset {
                // One-shot samples end hard, bypassing the release.
                self.stage = EnvelopeStage::Off;
            }
            frame
        } else {
            if self.stage != EnvelopeStage::Attack {
                return (0.0, 0.0);
            }
            let out = self.volume * params.volume * params.waveform.eval(self.phase);
            let frame = (out * (0.5 - params.pan), out * (0.5 + params.pan));
            self.phase += self.frequency * params.bend;
            self.phase -= self.phase.floor();
            frame
        }
    }
}

/// Evaluates the envelope at the current stage offset, falling through
/// to later stages as their durations elapse.
///
/// Each stage subtracts its own duration from the elapsed counter when
/// it completes, so time is never double-counted; zero-length stages
/// fall through without dividing.
fn envelope_level(stage: &mut EnvelopeStage, elapsed: &mut f32, env: &Envelope) -> f32 {
    loop {
        match *stage {
            EnvelopeStage::Attack => {
                if *elapsed < env.attack {
                    return *elapsed / env.attack;
                }
                *elapsed -= env.attack;
                *stage = EnvelopeStage::Hold;
            }
            EnvelopeStage::Hold => {
                if *elapsed < env.hold {
                    return 1.0;
                }
                *elapsed -= env.hold;
                *stage = EnvelopeStage::Decay;
            }
            EnvelopeStage::Decay => {
                if *elapsed < env.decay {
                    return 1.0 - (1.0 - env.sustain) * *elapsed / env.decay;
                }
                *elapsed -= env.decay;
                *stage = EnvelopeStage::Sustain;
            }
            EnvelopeStage::Sustain => return env.sustain,
            EnvelopeStage::Release => {
                if *elapsed < env.release {
                    return env.sustain * (1.0 - *elapsed / env.release);
                }
                *elapsed = 0.0;
                *stage = EnvelopeStage::Off;
            }
            EnvelopeStage::Off => return 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundfont::Envelope;

    fn test_table(sample_rate: u32) -> [f64; 128] {
        std::array::from_fn(|i| {
            440.0 * 2f64.powf((i as f64 - 49.0) / 12.0) / sample_rate as f64
        })
    }

    fn test_zone(looped: bool, envelope: Envelope) -> Arc<SampleZone> {
        // A constant full-scale sample so envelope effects are visible
        // directly in the output.
        Arc::new(SampleZone {
            samples: Arc::from(vec![16384i16; 64].into_boxed_slice()),
            loop_start: 0,
            loop_len: 64.0,
            initial_offset: 0.0,
            ending_offset: 1.0,
            looped,
            envelope,
            pan: 0.0,
            min_key: 0,
            max_key: 127,
            original_pitch: 49 + 16,
            pitch_correction: 0,
            sample_rate: 44100,
        })
    }

    fn params() -> VoiceParams {
        VoiceParams {
            dt: 0.01,
            bend: 1.0,
            volume: 1.0,
            pan: 0.0,
            waveform: Waveform::Square,
        }
    }

    #[test]
    fn test_envelope_stage_order() {
        let env = Envelope {
            attack: 1.0,
            hold: 1.0,
            decay: 1.0,
            sustain: 0.5,
            release: 1.0,
        };
        let mut stage = EnvelopeStage::Attack;
        let mut elapsed = 0.5;
        assert!((envelope_level(&mut stage, &mut elapsed, &env) - 0.5).abs() < 1e-6);
        assert_eq!(stage, EnvelopeStage::Attack);

        // Past the attack duration the hold stage answers at full level.
        let mut elapsed = 1.5;
        assert_eq!(envelope_level(&mut stage, &mut elapsed, &env), 1.0);
        assert_eq!(stage, EnvelopeStage::Hold);
        assert!((elapsed - 0.5).abs() < 1e-6);

        // Decay interpolates from 1.0 down to the sustain level.
        let mut stage = EnvelopeStage::Decay;
        let mut elapsed = 0.5;
        assert!((envelope_level(&mut stage, &mut elapsed, &env) - 0.75).abs() < 1e-6);

        // Sustain holds indefinitely.
        let mut elapsed = 1000.0;
        let mut stage = EnvelopeStage::Decay;
        assert!((envelope_level(&mut stage, &mut elapsed, &env) - 0.5).abs() < 1e-6);
        assert_eq!(stage, EnvelopeStage::Sustain);

        // Release fades from the sustain level to zero.
        let mut stage = EnvelopeStage::Release;
        let mut elapsed = 0.5;
        assert!((envelope_level(&mut stage, &mut elapsed, &env) - 0.25).abs() < 1e-6);
        let mut elapsed = 1.5;
        let mut stage = EnvelopeStage::Release;
        assert_eq!(envelope_level(&mut stage, &mut elapsed, &env), 0.0);
        assert_eq!(stage, EnvelopeStage::Off);
    }

    #[test]
    fn test_envelope_attack_is_monotone() {
        let env = Envelope {
            attack: 1.0,
            hold: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.5,
        };
        let mut last = -1.0f32;
        for i in 0..100 {
            let mut stage = EnvelopeStage::Attack;
            let mut elapsed = i as f32 / 100.0;
            let level = envelope_level(&mut stage, &mut elapsed, &env);
            assert!(level >= last);
            assert!(level >= 0.0);
            last = level;
        }
    }

    #[test]
    fn test_zero_duration_stages_fall_through() {
        let env = Envelope::default();
        let mut stage = EnvelopeStage::Attack;
        let mut elapsed = 0.0;
        // All durations are zero, so the level lands at the default
        // sustain of 1.0 without dividing by zero.
        assert_eq!(envelope_level(&mut stage, &mut elapsed, &env), 1.0);
        assert_eq!(stage, EnvelopeStage::Sustain);
    }

    #[test]
    fn test_start_stop_reaches_silence() {
        let env = Envelope {
            attack: 0.02,
            hold: 0.02,
            decay: 0.02,
            sustain: 0.5,
            release: 0.05,
        };
        let zone = test_zone(true, env);
        let table = test_table(44100);
        let mut voice = Voice::new();
        voice.start_tone(60, 1.0, zone, &table, 44100);
        voice.stop();
        assert_eq!(voice.stage(), EnvelopeStage::Release);

        // After the release duration has elapsed the voice must be off
        // and produce exact silence.
        let p = params();
        let frames_needed = (0.05 / p.dt as f64).ceil() as usize + 2;
        for _ in 0..frames_needed {
            voice.tick(&p);
        }
        assert_eq!(voice.stage(), EnvelopeStage::Off);
        assert_eq!(voice.tick(&p), (0.0, 0.0));
    }

    #[test]
    fn test_amplitude_never_negative() {
        let env = Envelope {
            attack: 0.03,
            hold: 0.01,
            decay: 0.02,
            sustain: 0.4,
            release: 0.03,
        };
        let zone = test_zone(true, env);
        let table = test_table(44100);
        let mut voice = Voice::new();
        voice.start_tone(49, 1.0, zone, &table, 44100);
        let p = params();
        for i in 0..50 {
            if i == 20 {
                voice.stop();
            }
            let (l, r) = voice.tick(&p);
            assert!(l >= 0.0 && r >= 0.0, "frame {} went negative", i);
        }
    }

    #[test]
    fn test_one_shot_sample_hard_stops() {
        let zone = test_zone(false, Envelope::default());
        let table = test_table(44100);
        let mut voice = Voice::new();
        voice.start_tone(49 + 12, 1.0, zone, &table, 44100);
        let p = params();
        // An octave above the root pitch plays at twice the rate and
        // must run off the end of the region, forcing the voice off
        // without a release stage.
        for _ in 0..100 {
            voice.tick(&p);
        }
        assert_eq!(voice.stage(), EnvelopeStage::Off);
    }

    #[test]
    fn test_root_pitch_plays_at_unit_rate() {
        // At the zone's root pitch the corrected frequency advances one
        // loop per loop_len output frames.
        let zone = test_zone(true, Envelope::default());
        let table = test_table(44100);
        let mut voice = Voice::new();
        voice.start_tone(49, 1.0, zone.clone(), &table, 44100);
        let expected = 1.0 / zone.loop_len;
        assert!((voice.frequency - expected).abs() < 1e-9);
    }

    #[test]
    fn test_pan_splits_stereo() {
        let zone = test_zone(true, Envelope::default());
        let table = test_table(44100);
        let mut voice = Voice::new();
        voice.start_tone(49, 1.0, zone, &table, 44100);

        let mut p = params();
        p.pan = 0.5;
        let (l, r) = voice.tick(&p);
        assert_eq!(l, 0.0);
        assert!(r > 0.0);

        let mut voice = Voice::new();
        let zone = test_zone(true, Envelope::default());
        voice.start_tone(49, 1.0, zone, &table, 44100);
        p.pan = -0.5;
        let (l, r) = voice.tick(&p);
        assert!(l > 0.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn test_oscillator_gate() {
        let table = test_table(44100);
        let mut voice = Voice::new();
        voice.start_oscillator(49, 1.0, &table);
        let p = params();
        let (l, r) = voice.tick(&p);
        // Square wave starts at full level, split evenly.
        assert!((l - 0.5).abs() < 1e-6);
        assert!((r - 0.5).abs() < 1e-6);

        voice.stop();
        assert_eq!(voice.tick(&p), (0.0, 0.0));
    }

    #[test]
    fn test_stop_tone_matches_binding() {
        let table = test_table(44100);
        let mut voice = Voice::new();
        voice.start_oscillator(60, 1.0, &table);
        voice.stop_tone(61);
        assert_eq!(voice.stage(), EnvelopeStage::Attack);
        voice.stop_tone(60);
        assert_ne!(voice.stage(), EnvelopeStage::Attack);
    }
}
