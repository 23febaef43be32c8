//! Offline rendering to WAV.
//!
//! Renders a sequence through the same sequencer used for live playback,
//! with looping disabled so the render stops after one pass, plus a short
//! tail so release stages ring out.

use crate::audio::mixer::clamp_sample;
use crate::config::SynthConfig;
use crate::midi::Sequence;
use crate::soundfont::Soundbank;
use crate::synth::Sequencer;
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;
use std::sync::Arc;

/// Seconds rendered after the last event for note releases.
const RELEASE_TAIL_SECONDS: f64 = 2.0;

/// Upper bound on the rendered length, as a safety net against
/// sequences that never report completion.
const MAX_RENDER_SECONDS: u64 = 3600;

/// Renders a sequence to a 16-bit stereo WAV file.
///
/// # Arguments
///
/// * `sequence` - The sequence to render
/// * `soundbank` - Sound bank for program changes, or None for synthetic
///   waveforms
/// * `config` - Synthesis parameters
/// * `output_path` - Path for the output WAV file
///
/// # Errors
///
/// Returns error if the output file cannot be created or written.
pub fn export_to_wav<P: AsRef<Path>>(
    sequence: Arc<Sequence>,
    soundbank: Option<Arc<Soundbank>>,
    config: &SynthConfig,
    output_path: P,
) -> Result<()> {
    let mut sequencer = Sequencer::new(config);
    sequencer.set_looping(false);
    if let Some(bank) = soundbank {
        sequencer.set_soundbank(bank);
    }
    sequencer.load_sequence(sequence);

    let spec = WavSpec {
        channels: 2,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output_path.as_ref(), spec).with_context(|| {
        format!(
            "Failed to create output WAV file: {}",
            output_path.as_ref().display()
        )
    })?;

    let max_frames = MAX_RENDER_SECONDS * config.sample_rate as u64;
    let mut rendered = 0u64;
    while !sequencer.is_finished() && rendered < max_frames {
        write_frame(&mut sequencer, &mut writer)?;
        rendered += 1;
    }

    // Let release stages ring out instead of cutting at the last event.
    let tail_frames = (RELEASE_TAIL_SECONDS * config.sample_rate as f64) as u64;
    for _ in 0..tail_frames {
        write_frame(&mut sequencer, &mut writer)?;
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

fn write_frame<W: std::io::Write + std::io::Seek>(
    sequencer: &mut Sequencer,
    writer: &mut WavWriter<W>,
) -> Result<()> {
    sequencer.tick();
    let (left, right) = sequencer.generate();
    writer.write_sample(clamp_sample(left))?;
    writer.write_sample(clamp_sample(right))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{Event, Track, META_END_OF_TRACK, META_TEMPO};

    fn tiny_sequence() -> Arc<Sequence> {
        // A very fast tempo keeps the rendered pass short.
        let track = Track {
            events: vec![
                Event {
                    tick: 0,
                    status: 0xFF,
                    data: vec![META_TEMPO, 3, 0x00, 0x04, 0x00],
                },
                Event {
                    tick: 0,
                    status: 0x90,
                    data: vec![49, 100],
                },
                Event {
                    tick: 200,
                    status: 0x80,
                    data: vec![49, 0],
                },
                Event {
                    tick: 240,
                    status: 0xFF,
                    data: vec![META_END_OF_TRACK, 0],
                },
            ],
        };
        Arc::new(Sequence {
            tracks: vec![track],
            time_division: 480,
        })
    }

    #[test]
    fn test_export_writes_playable_wav() {
        let path = std::env::temp_dir().join("midisynth_export_test.wav");
        let config = SynthConfig {
            sample_rate: 8000,
            ..SynthConfig::default()
        };
        export_to_wav(tiny_sequence(), None, &config, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(spec.bits_per_sample, 16);
        // One pass plus the release tail, in frames.
        assert!(reader.duration() > 0);

        std::fs::remove_file(&path).ok();
    }
}
