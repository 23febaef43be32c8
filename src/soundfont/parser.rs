//! Record parsing and generator resolution.
//!
//! The second pass over a parsed chunk tree: fixed-size preset, zone,
//! generator, instrument, and sample-header records are decoded from their
//! leaf chunks, instrument zones are materialized into [`SampleZone`]
//! descriptors, and preset zones bind those descriptors into the
//! `(bank, program)` instrument map.

use super::chunk::{u16_le, u32_le, Chunk};
use super::generator::{GeneratorRecord, GeneratorTable, Operator};
use super::{Envelope, Instrument, ParseError, SampleZone, Soundbank};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Preset header record size in bytes.
const PRESET_RECORD_SIZE: usize = 38;
/// Zone index ("bag") record size in bytes.
const ZONE_INDEX_RECORD_SIZE: usize = 4;
/// Generator record size in bytes.
const GENERATOR_RECORD_SIZE: usize = 4;
/// Instrument header record size in bytes.
const INSTRUMENT_RECORD_SIZE: usize = 22;
/// Sample header record size in bytes.
const SAMPLE_RECORD_SIZE: usize = 46;

struct PresetHeader {
    name: String,
    preset: u16,
    bank: u16,
    bag_index: u16,
}

struct ZoneIndex {
    gen_index: u16,
}

struct InstrumentHeader {
    name: String,
    bag_index: u16,
}

struct SampleHeader {
    name: String,
    start: u32,
    end: u32,
    start_loop: u32,
    end_loop: u32,
    sample_rate: u32,
    original_pitch: u8,
    pitch_correction: i8,
}

/// Reads a fixed-size, NUL-padded name field.
fn fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Splits a chunk payload into fixed-size records, ignoring a trailing
/// partial record.
fn records<T>(payload: &[u8], size: usize, parse: impl Fn(&[u8]) -> T) -> Vec<T> {
    payload.chunks_exact(size).map(parse).collect()
}

fn require<'a>(
    root: &'a Chunk,
    id: &[u8; 4],
    name: &'static str,
) -> Result<&'a Chunk, ParseError> {
    root.find(id).ok_or(ParseError::MissingChunk(name))
}

/// Resolves a parsed chunk tree into a playable [`Soundbank`].
///
/// # Errors
///
/// Returns [`ParseError::MissingChunk`] when any of the record chunks or
/// the sample pool is absent. Malformed individual records degrade with a
/// warning instead of failing the load.
pub(super) fn resolve(root: &Chunk, data: &[u8]) -> Result<Soundbank, ParseError> {
    let name = root
        .find(b"INAM")
        .map(|c| fixed_string(c.payload(data)))
        .unwrap_or_default();
    let engine = root
        .find(b"isng")
        .map(|c| fixed_string(c.payload(data)))
        .unwrap_or_default();
    let version = root
        .find(b"ifil")
        .and_then(|c| {
            let p = c.payload(data);
            (p.len() >= 4).then(|| (u16_le(p, 0), u16_le(p, 2)))
        })
        .unwrap_or_default();
    debug!(
        name = %name,
        engine = %engine,
        version = ?version,
        "resolving sound bank"
    );

    let smpl = require(root, b"smpl", "smpl")?;
    let samples: Arc<[i16]> = smpl
        .payload(data)
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    let presets = records(
        require(root, b"phdr", "phdr")?.payload(data),
        PRESET_RECORD_SIZE,
        |r| PresetHeader {
            name: fixed_string(&r[0..20]),
            preset: u16_le(r, 20),
            bank: u16_le(r, 22),
            bag_index: u16_le(r, 24),
        },
    );
    let preset_zones = records(
        require(root, b"pbag", "pbag")?.payload(data),
        ZONE_INDEX_RECORD_SIZE,
        |r| ZoneIndex {
            gen_index: u16_le(r, 0),
        },
    );
    let preset_gens = records(
        require(root, b"pgen", "pgen")?.payload(data),
        GENERATOR_RECORD_SIZE,
        parse_generator,
    );
    let instrument_headers = records(
        require(root, b"inst", "inst")?.payload(data),
        INSTRUMENT_RECORD_SIZE,
        |r| InstrumentHeader {
            name: fixed_string(&r[0..20]),
            bag_index: u16_le(r, 20),
        },
    );
    let instrument_zones = records(
        require(root, b"ibag", "ibag")?.payload(data),
        ZONE_INDEX_RECORD_SIZE,
        |r| ZoneIndex {
            gen_index: u16_le(r, 0),
        },
    );
    let instrument_gens = records(
        require(root, b"igen", "igen")?.payload(data),
        GENERATOR_RECORD_SIZE,
        parse_generator,
    );
    let sample_headers = records(
        require(root, b"shdr", "shdr")?.payload(data),
        SAMPLE_RECORD_SIZE,
        |r| SampleHeader {
            name: fixed_string(&r[0..20]),
            start: u32_le(r, 20),
            end: u32_le(r, 24),
            start_loop: u32_le(r, 28),
            end_loop: u32_le(r, 32),
            sample_rate: u32_le(r, 36),
            original_pitch: r[40],
            pitch_correction: r[41] as i8,
        },
    );

    // Materialize one zone per instrument zone-index record. Records
    // without a sample binding (global zones, terminals) resolve to None.
    let mut zones: Vec<Option<Arc<SampleZone>>> = Vec::with_capacity(instrument_zones.len());
    for (i, zone_index) in instrument_zones.iter().enumerate() {
        let end = instrument_zones
            .get(i + 1)
            .map(|z| z.gen_index as usize)
            .unwrap_or(instrument_gens.len())
            .min(instrument_gens.len());
        let start = (zone_index.gen_index as usize).min(end);

        let mut table = GeneratorTable::new();
        for gen in &instrument_gens[start..end] {
            table.put(*gen);
        }
        zones.push(build_zone(&table, &sample_headers, &samples).map(Arc::new));
    }

    // Walk every preset's zones; instrument generators bind zones into
    // the (bank, program) map, everything else accumulates as unused
    // preset-level defaults.
    let mut bank_instruments: HashMap<(u16, u8), Instrument> = HashMap::new();
    for p in 0..presets.len().saturating_sub(1) {
        let header = &presets[p];
        if header.preset > 127 {
            warn!(
                preset = header.preset,
                name = %header.name,
                "preset number out of range, skipping"
            );
            continue;
        }

        let bag_end = (presets[p + 1].bag_index as usize).min(preset_zones.len());
        let bag_start = (header.bag_index as usize).min(bag_end);
        let mut defaults = GeneratorTable::new();

        for z in bag_start..bag_end {
            let gen_end = preset_zones
                .get(z + 1)
                .map(|x| x.gen_index as usize)
                .unwrap_or(preset_gens.len())
                .min(preset_gens.len());
            let gen_start = (preset_zones[z].gen_index as usize).min(gen_end);

            for gen in &preset_gens[gen_start..gen_end] {
                if gen.oper == Operator::Instrument as u16 {
                    let target = bank_instruments
                        .entry((header.bank, header.preset as u8))
                        .or_default();
                    bind_instrument_zones(target, gen.amount, &instrument_headers, &zones);
                } else {
                    defaults.put(*gen);
                }
            }
        }

        if !defaults.is_empty() {
            debug!(
                preset = header.preset,
                bank = header.bank,
                generators = defaults.records().count(),
                "preset-level generators recorded but unused by playback"
            );
        }
    }

    Ok(Soundbank::assemble(name, engine, version, bank_instruments))
}

fn parse_generator(r: &[u8]) -> GeneratorRecord {
    GeneratorRecord {
        oper: u16_le(r, 0),
        amount: u16_le(r, 2) as i16,
    }
}

/// Binds every zone of an instrument's zone-index range into a preset's
/// instrument map entry.
fn bind_instrument_zones(
    target: &mut Instrument,
    instrument_index: i16,
    headers: &[InstrumentHeader],
    zones: &[Option<Arc<SampleZone>>],
) {
    let Ok(index) = usize::try_from(instrument_index) else {
        warn!(instrument_index, "negative instrument generator amount");
        return;
    };
    let Some(header) = headers.get(index) else {
        warn!(index, "instrument generator points past the instrument table");
        return;
    };
    let zone_end = headers
        .get(index + 1)
        .map(|h| h.bag_index as usize)
        .unwrap_or(zones.len())
        .min(zones.len());
    let zone_start = (header.bag_index as usize).min(zone_end);

    debug!(
        name = %header.name,
        zones = zone_end - zone_start,
        "binding instrument zones"
    );
    for zone in zones[zone_start..zone_end].iter().flatten() {
        target.add_zone(zone.clone());
    }
}

/// Applies an accumulated generator table, materializing a zone when a
/// sample binding is present.
fn build_zone(
    table: &GeneratorTable,
    sample_headers: &[SampleHeader],
    samples: &Arc<[i16]>,
) -> Option<SampleZone> {
    let mut envelope = Envelope::default();
    let mut pan = 0.0f32;
    let mut min_key = 0u8;
    let mut max_key = 127u8;
    let mut sample_index: Option<i16> = None;
    let mut loop_override: Option<bool> = None;

    for record in table.records() {
        match Operator::from_id(record.oper) {
            Some(Operator::Pan) => pan = (0.001 * record.amount as f32).clamp(-0.5, 0.5),
            Some(Operator::AttackEnvelope) => envelope.attack = timecents(record.amount),
            Some(Operator::HoldEnvelope) => envelope.hold = timecents(record.amount),
            Some(Operator::DecayEnvelope) => envelope.decay = timecents(record.amount),
            Some(Operator::SustainEnvelope) => {
                envelope.sustain = (record.amount as f32 / 1000.0).clamp(0.0, 1.0)
            }
            Some(Operator::ReleaseEnvelope) => envelope.release = timecents(record.amount),
            Some(Operator::KeyRange) => {
                let amount = record.amount as u16;
                min_key = (amount & 0xFF) as u8;
                max_key = (amount >> 8) as u8;
            }
            Some(Operator::SampleId) => sample_index = Some(record.amount),
            Some(Operator::SampleMode) => loop_override = Some(record.amount & 1 == 1),
            Some(_) => {}
            None => warn!(operator = record.oper, "unknown generator operator"),
        }
    }

    let index = usize::try_from(sample_index?).ok()?;
    let Some(header) = sample_headers.get(index) else {
        warn!(index, "sample id points past the sample header table");
        return None;
    };

    let start = header.start as usize;
    let end = header.end as usize;
    if end <= start || end > samples.len() {
        warn!(
            sample = %header.name,
            start,
            end,
            "sample region is empty or out of range"
        );
        return None;
    }

    // Loop points become loop-relative phase; a zero-length loop region
    // means the whole sample plays once.
    let loop_len = header.end_loop as i64 - header.start_loop as i64;
    let (loop_start, loop_len, initial_offset, ending_offset, looped) = if loop_len <= 0 {
        (start, (end - start) as f64, 0.0, 1.0, false)
    } else {
        let len = loop_len as f64;
        (
            header.start_loop as usize,
            len,
            -((header.start_loop as f64 - header.start as f64) / len),
            (header.end as f64 - header.start_loop as f64) / len,
            true,
        )
    };

    Some(SampleZone {
        samples: samples.clone(),
        loop_start,
        loop_len,
        initial_offset,
        ending_offset,
        looped: loop_override.unwrap_or(looped),
        envelope,
        pan,
        min_key,
        max_key,
        original_pitch: header.original_pitch,
        pitch_correction: header.pitch_correction,
        sample_rate: header.sample_rate,
    })
}

/// Converts a timecent-style amount into seconds.
fn timecents(amount: i16) -> f32 {
    2f32.powf(amount as f32 / 1200.0)
}
