//! midisynth - a command-line MIDI player and renderer.
//!
//! Plays a Standard MIDI File through a SoundFont-style sample bank (or
//! synthetic waveforms when no bank is given), streaming to the default
//! audio device in real time or rendering offline to WAV.
//!
//! # Usage
//!
//! ```bash
//! midisynth song.mid                      # synthetic waveforms
//! midisynth song.mid -sf bank.sf2         # sample playback
//! midisynth song.mid -sf bank.sf2 -e out.wav
//! ```
//!
//! During playback, `p` pauses, `r` rewinds, `0-9`/`a-f` toggle channel
//! mutes, and `q` quits.

use anyhow::{Context, Result};
use midisynth::audio::{export_to_wav, AudioEngine};
use midisynth::config::SynthConfig;
use midisynth::midi::Sequence;
use midisynth::soundfont::Soundbank;
use std::io::BufRead;
use std::path::PathBuf;
use tracing::info;

/// Command-line options for the player.
struct CliOptions {
    /// The MIDI file to play.
    midi: PathBuf,
    /// Optional sound bank file.
    soundfont: Option<PathBuf>,
    /// Render to this WAV file instead of playing.
    export: Option<PathBuf>,
    /// Optional JSON configuration file.
    config: Option<PathBuf>,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `<file.mid>`: The sequence to play (required)
    /// - `--soundfont <path>` or `-sf <path>`: Sample bank file
    /// - `--export <path>` or `-e <path>`: Render to WAV and exit
    /// - `--config <path>` or `-c <path>`: JSON synthesis configuration
    /// - `--help` or `-h`: Print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut midi: Option<PathBuf> = None;
        let mut soundfont: Option<PathBuf> = None;
        let mut export: Option<PathBuf> = None;
        let mut config: Option<PathBuf> = None;
        let mut i = 1;

        let take_value = |i: &mut usize, flag: &str| -> PathBuf {
            *i += 1;
            if *i >= args.len() {
                eprintln!("Error: {} requires a path argument", flag);
                std::process::exit(1);
            }
            PathBuf::from(&args[*i])
        };

        while i < args.len() {
            match args[i].as_str() {
                "--soundfont" | "-sf" => soundfont = Some(take_value(&mut i, "--soundfont")),
                "--export" | "-e" => export = Some(take_value(&mut i, "--export")),
                "--config" | "-c" => config = Some(take_value(&mut i, "--config")),
                "--help" | "-h" => {
                    eprintln!("midisynth - MIDI sequencer and wavetable synthesizer");
                    eprintln!();
                    eprintln!(
                        "Usage: {} <file.mid> [OPTIONS]",
                        args.first().map(String::as_str).unwrap_or("midisynth")
                    );
                    eprintln!();
                    eprintln!("Options:");
                    eprintln!("  -sf, --soundfont PATH  Load a sample bank (.sf2)");
                    eprintln!("  -e,  --export PATH     Render to a WAV file instead of playing");
                    eprintln!("  -c,  --config PATH     Load synthesis settings from JSON");
                    eprintln!("  -h,  --help            Print this help message");
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
                other => midi = Some(PathBuf::from(other)),
            }
            i += 1;
        }

        let Some(midi) = midi else {
            eprintln!("Error: no MIDI file given; use --help for usage");
            std::process::exit(1);
        };

        Ok(Self {
            midi,
            soundfont,
            export,
            config,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = CliOptions::parse()?;
    let config = match &options.config {
        Some(path) => SynthConfig::from_file(path)?,
        None => SynthConfig::default(),
    };

    let sequence = Sequence::from_file(&options.midi)
        .with_context(|| format!("Failed to load MIDI file: {}", options.midi.display()))?;
    info!(
        tracks = sequence.tracks.len(),
        time_division = sequence.time_division,
        "sequence loaded"
    );

    let soundbank = match &options.soundfont {
        Some(path) => {
            let bank = Soundbank::from_file(path)
                .with_context(|| format!("Failed to load sound bank: {}", path.display()))?;
            info!(
                name = %bank.name,
                instruments = bank.len(),
                "sound bank loaded"
            );
            Some(bank)
        }
        None => None,
    };

    if let Some(output) = &options.export {
        export_to_wav(sequence, soundbank, &config, output)?;
        println!("Rendered to {}", output.display());
        return Ok(());
    }

    let engine = AudioEngine::new(&config, Some(sequence), soundbank)?;
    run_console(&engine)
}

/// Reads single-character commands from stdin until quit or EOF.
fn run_console(engine: &AudioEngine) -> Result<()> {
    println!("Playing. Commands: p pause/resume, r rewind, 0-9/a-f toggle channel, q quit.");
    let stdin = std::io::stdin();
    let mut paused = false;

    for line in stdin.lock().lines() {
        for command in line?.trim().chars() {
            match command {
                'q' => {
                    engine.stop();
                    return Ok(());
                }
                'p' => {
                    paused = !paused;
                    engine.set_paused(paused);
                    println!(
                        "{} at tick {}",
                        if paused { "Paused" } else { "Resumed" },
                        engine.position_ticks()
                    );
                }
                'r' => engine.rewind(),
                '0'..='9' => engine.toggle_mute(command as u8 - b'0'),
                'a'..='f' => engine.toggle_mute(command as u8 - b'a' + 10),
                _ => eprintln!("Unknown command: {}", command),
            }
        }
    }

    engine.stop();
    Ok(())
}
