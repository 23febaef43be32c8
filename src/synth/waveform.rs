//! Synthetic waveform shapes.
//!
//! Channels without a sample bank bound play one of these shapes. The
//! phase argument is a cycle position in [0, 1).

use serde::{Deserialize, Serialize};

/// A synthetic oscillator shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    /// No output.
    Silence,
    /// Pure sine cycle.
    Sine,
    /// Half-on, half-off pulse.
    #[default]
    Square,
    /// Linear rise and fall.
    Triangle,
    /// Linear ramp over the cycle.
    Sawtooth,
    /// Deterministic pseudo-random samples.
    Noise,
}

impl Waveform {
    /// Evaluates the waveform at a cycle position.
    pub fn eval(self, phase: f64) -> f32 {
        let pos = (phase - phase.floor()) as f32;
        match self {
            Self::Silence => 0.0,
            Self::Sine => (pos * std::f32::consts::TAU).sin(),
            Self::Square => {
                if pos < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Triangle => {
                if pos < 0.5 {
                    pos * 2.0
                } else {
                    2.0 - pos * 2.0
                }
            }
            Self::Sawtooth => pos,
            Self::Noise => {
                // Hash the phase bits so the "random" stream is
                // reproducible for a given phase sequence.
                let mut x = phase.to_bits();
                x ^= x >> 33;
                x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
                x ^= x >> 33;
                (x as u32) as f32 / u32::MAX as f32 * 2.0 - 1.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_zero() {
        for i in 0..10 {
            assert_eq!(Waveform::Silence.eval(i as f64 * 0.1), 0.0);
        }
    }

    #[test]
    fn test_square_duty_cycle() {
        assert_eq!(Waveform::Square.eval(0.25), 1.0);
        assert_eq!(Waveform::Square.eval(0.75), 0.0);
    }

    #[test]
    fn test_triangle_shape() {
        assert!((Waveform::Triangle.eval(0.25) - 0.5).abs() < 1e-6);
        assert!((Waveform::Triangle.eval(0.5) - 1.0).abs() < 1e-6);
        assert!((Waveform::Triangle.eval(0.75) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_phase_wraps() {
        for wave in [Waveform::Sine, Waveform::Square, Waveform::Triangle, Waveform::Sawtooth] {
            assert!((wave.eval(0.3) - wave.eval(2.3)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_output_in_range() {
        for wave in [
            Waveform::Sine,
            Waveform::Square,
            Waveform::Triangle,
            Waveform::Sawtooth,
            Waveform::Noise,
        ] {
            for i in 0..100 {
                let sample = wave.eval(i as f64 / 100.0);
                assert!((-1.0..=1.0).contains(&sample), "{:?} at {}", wave, i);
            }
        }
    }
}
