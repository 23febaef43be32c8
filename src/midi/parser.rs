//! Standard MIDI File (SMF) parsing.
//!
//! Decodes the binary container: a 14-byte header chunk followed by one
//! track chunk per track, each holding a delta-time/running-status event
//! stream. Structural problems (bad magic, bad sizes, truncation, missing
//! running status) fail the whole load; a single channel event carrying an
//! invalid data byte is skipped with a warning and decoding continues.

use super::{Event, Sequence, Track, STATUS_META};
use thiserror::Error;
use tracing::warn;

/// Magic identifier of the header chunk ("MThd").
const HEADER_MAGIC: [u8; 4] = *b"MThd";
/// Magic identifier of a track chunk ("MTrk").
const TRACK_MAGIC: [u8; 4] = *b"MTrk";
/// Declared length of the header chunk body.
const HEADER_LENGTH: u32 = 6;
/// A delta time is at most 28 bits, so at most four VLQ bytes.
const MAX_VLQ_BYTES: u32 = 4;

/// Errors that can occur while parsing a MIDI file.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A magic identifier or declared size did not match the container.
    #[error("invalid MIDI data: {0}")]
    Format(String),
    /// The decoder ran past the end of the buffer.
    #[error("unexpected end of data while reading {0}")]
    Truncated(&'static str),
    /// An event needed running status but no status byte was ever seen.
    #[error("missing status byte in track {0}")]
    MissingStatus(usize),
    /// The file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bounds-checked big-endian reader over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn peek(&self, context: &'static str) -> Result<u8, ParseError> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(ParseError::Truncated(context))
    }

    fn u8(&mut self, context: &'static str) -> Result<u8, ParseError> {
        let b = self.peek(context)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self, context: &'static str) -> Result<u16, ParseError> {
        let bytes = self.take(2, context)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self, context: &'static str) -> Result<u32, ParseError> {
        let bytes = self.take(4, context)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::Truncated(context));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Decodes a variable-length quantity: seven value bits per byte, the
    /// high bit signalling continuation.
    fn vlq(&mut self, context: &'static str) -> Result<u32, ParseError> {
        let mut value = 0u32;
        for _ in 0..MAX_VLQ_BYTES {
            let b = self.u8(context)?;
            value = (value << 7) | (b & 0x7F) as u32;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ParseError::Format(
            "variable-length quantity exceeds four bytes".into(),
        ))
    }
}

/// Parses a complete SMF byte stream into a [`Sequence`].
pub fn parse_sequence(data: &[u8]) -> Result<Sequence, ParseError> {
    let mut r = Reader::new(data);

    let magic = r.take(4, "header magic")?;
    if magic != HEADER_MAGIC {
        return Err(ParseError::Format("bad header magic".into()));
    }
    let header_length = r.u32("header length")?;
    if header_length != HEADER_LENGTH {
        return Err(ParseError::Format(format!(
            "header declares length {} (expected {})",
            header_length, HEADER_LENGTH
        )));
    }
    let _format_type = r.u16("format type")?;
    let num_tracks = r.u16("track count")?;
    if num_tracks == 0 {
        return Err(ParseError::Format("track count is zero".into()));
    }
    let time_division = r.u16("time division")?;
    if time_division == 0 {
        return Err(ParseError::Format("time division is zero".into()));
    }

    let mut tracks = Vec::with_capacity(num_tracks as usize);
    for index in 0..num_tracks as usize {
        // Fewer chunks than declared is tolerated if the buffer ends
        // cleanly between chunks.
        if r.is_empty() {
            break;
        }

        let magic = r.take(4, "track magic")?;
        if magic != TRACK_MAGIC {
            return Err(ParseError::Format(format!("bad magic in track {}", index)));
        }
        let size = r.u32("track size")? as usize;
        if size > r.remaining() {
            return Err(ParseError::Format(format!(
                "track {} declares {} bytes but only {} remain",
                index,
                size,
                r.remaining()
            )));
        }
        let body = r.take(size, "track body")?;
        tracks.push(decode_track(body, index)?);
    }

    Ok(Sequence {
        tracks,
        time_division,
    })
}

/// Decodes one track chunk body into an event list.
///
/// Running status is scoped to this decode: the first event of a track
/// must carry its own status byte.
fn decode_track(body: &[u8], index: usize) -> Result<Track, ParseError> {
    let mut r = Reader::new(body);
    let mut events = Vec::new();
    let mut tick = 0u64;
    let mut last_status: Option<u8> = None;

    while !r.is_empty() {
        let delta = r.vlq("delta time")?;
        tick += delta as u64;

        let status = if r.peek("event status")? & 0x80 != 0 {
            let s = r.u8("event status")?;
            last_status = Some(s);
            s
        } else {
            last_status.ok_or(ParseError::MissingStatus(index))?
        };

        let data = decode_message(&mut r, status)?;
        match data {
            Some(data) => events.push(Event { tick, status, data }),
            None => warn!(
                track = index,
                tick, status, "skipping event with invalid data byte"
            ),
        }
    }

    Ok(Track { events })
}

/// Reads the message bytes following a status byte.
///
/// Returns `Ok(None)` when a channel voice event carries a data byte with
/// its high bit set; the cursor has already advanced past the event so the
/// caller can skip it and continue.
fn decode_message(r: &mut Reader, status: u8) -> Result<Option<Vec<u8>>, ParseError> {
    if status == STATUS_META {
        let meta_type = r.u8("meta type")?;
        let length = r.u8("meta length")?;
        let payload = r.take(length as usize, "meta payload")?;
        let mut data = Vec::with_capacity(payload.len() + 2);
        data.push(meta_type);
        data.push(length);
        data.extend_from_slice(payload);
        return Ok(Some(data));
    }

    if status & 0xF0 == 0xF0 {
        // System exclusive: everything through the terminating EOX byte.
        let mut data = Vec::new();
        loop {
            let b = r.u8("system exclusive body")?;
            data.push(b);
            if b == 0xF7 {
                return Ok(Some(data));
            }
        }
    }

    // Program change and channel pressure carry one data byte, the rest
    // of the channel voice messages carry two.
    let length = if status & 0xE0 == 0xC0 { 1 } else { 2 };
    let bytes = r.take(length, "event data bytes")?;
    if bytes.iter().any(|b| b & 0x80 != 0) {
        return Ok(None);
    }
    Ok(Some(bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{META_END_OF_TRACK, META_TEMPO};

    /// Builds an SMF byte stream around the given track bodies.
    fn build_file(division: u16, track_bodies: &[&[u8]]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"MThd");
        data.extend_from_slice(&6u32.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&(track_bodies.len() as u16).to_be_bytes());
        data.extend_from_slice(&division.to_be_bytes());
        for body in track_bodies {
            data.extend_from_slice(b"MTrk");
            data.extend_from_slice(&(body.len() as u32).to_be_bytes());
            data.extend_from_slice(body);
        }
        data
    }

    #[test]
    fn test_vlq_decoding() {
        let cases: [(&[u8], u32); 5] = [
            (&[0x00], 0),
            (&[0x40], 0x40),
            (&[0x7F], 0x7F),
            (&[0x81, 0x00], 128),
            (&[0xFF, 0xFF, 0xFF, 0x7F], 0x0FFF_FFFF),
        ];
        for (bytes, expected) in cases {
            let mut r = Reader::new(bytes);
            assert_eq!(r.vlq("test").unwrap(), expected);
        }
    }

    #[test]
    fn test_vlq_truncated() {
        let mut r = Reader::new(&[0x81]);
        assert!(matches!(r.vlq("test"), Err(ParseError::Truncated(_))));
    }

    #[test]
    fn test_header_validation() {
        // Wrong magic.
        assert!(matches!(
            Sequence::from_bytes(b"MIDI\x00\x00\x00\x06\x00\x00\x00\x01\x01\xE0"),
            Err(ParseError::Format(_))
        ));
        // Wrong header length.
        let mut bad = build_file(480, &[&[]]);
        bad[7] = 7;
        assert!(matches!(
            Sequence::from_bytes(&bad),
            Err(ParseError::Format(_))
        ));
        // Zero tracks.
        let mut bad = build_file(480, &[&[]]);
        bad[11] = 0;
        assert!(matches!(
            Sequence::from_bytes(&bad),
            Err(ParseError::Format(_))
        ));
        // Zero time division.
        let bad = build_file(0, &[&[]]);
        assert!(matches!(
            Sequence::from_bytes(&bad),
            Err(ParseError::Format(_))
        ));
    }

    #[test]
    fn test_empty_track_is_legal() {
        let seq = Sequence::from_bytes(&build_file(480, &[&[]])).unwrap();
        assert_eq!(seq.tracks.len(), 1);
        assert!(seq.tracks[0].is_empty());
        assert_eq!(seq.time_division, 480);
    }

    #[test]
    fn test_note_events_and_ticks() {
        // Note on at delta 0, note off at delta 128 (two-byte VLQ).
        let body = [0x00, 0x90, 60, 100, 0x81, 0x00, 0x80, 60, 0];
        let seq = Sequence::from_bytes(&build_file(480, &[&body])).unwrap();
        let events = &seq.tracks[0].events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tick, 0);
        assert_eq!(events[0].status, 0x90);
        assert_eq!(events[0].data, vec![60, 100]);
        assert_eq!(events[1].tick, 128);
        assert_eq!(events[1].status, 0x80);
    }

    #[test]
    fn test_running_status() {
        // Second event has no status byte and must inherit 0x90.
        let body = [0x00, 0x90, 60, 100, 0x10, 64, 100];
        let seq = Sequence::from_bytes(&build_file(480, &[&body])).unwrap();
        let events = &seq.tracks[0].events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, 0x90);
        assert_eq!(events[1].tick, 0x10);
        assert_eq!(events[1].data, vec![64, 100]);
    }

    #[test]
    fn test_missing_status_fails() {
        let body = [0x00, 60, 100];
        assert!(matches!(
            Sequence::from_bytes(&build_file(480, &[&body])),
            Err(ParseError::MissingStatus(0))
        ));
    }

    #[test]
    fn test_running_status_does_not_cross_tracks() {
        let with_status = [0x00, 0x90, 60, 100];
        let without = [0x00, 62, 100];
        assert!(matches!(
            Sequence::from_bytes(&build_file(480, &[&with_status, &without])),
            Err(ParseError::MissingStatus(1))
        ));
    }

    #[test]
    fn test_invalid_data_byte_skips_event_only() {
        // First event has a data byte with the high bit set, second is fine.
        let body = [0x00, 0x90, 0x85, 100, 0x00, 0x90, 60, 100];
        let seq = Sequence::from_bytes(&build_file(480, &[&body])).unwrap();
        let events = &seq.tracks[0].events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, vec![60, 100]);
    }

    #[test]
    fn test_meta_event_payload() {
        let body = [
            0x00,
            0xFF,
            META_TEMPO,
            3,
            0x07,
            0xA1,
            0x20,
            0x00,
            0xFF,
            META_END_OF_TRACK,
            0,
        ];
        let seq = Sequence::from_bytes(&build_file(480, &[&body])).unwrap();
        let events = &seq.tracks[0].events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, 0xFF);
        assert_eq!(events[0].data, vec![META_TEMPO, 3, 0x07, 0xA1, 0x20]);
        assert_eq!(events[1].data, vec![META_END_OF_TRACK, 0]);
    }

    #[test]
    fn test_system_exclusive_runs_to_terminator() {
        let body = [0x00, 0xF0, 0x01, 0x02, 0x03, 0xF7];
        let seq = Sequence::from_bytes(&build_file(480, &[&body])).unwrap();
        let events = &seq.tracks[0].events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, vec![0x01, 0x02, 0x03, 0xF7]);
    }

    #[test]
    fn test_unterminated_sysex_is_truncated() {
        let body = [0x00, 0xF0, 0x01, 0x02];
        assert!(matches!(
            Sequence::from_bytes(&build_file(480, &[&body])),
            Err(ParseError::Truncated(_))
        ));
    }

    #[test]
    fn test_track_size_exceeding_buffer_fails() {
        let mut data = build_file(480, &[&[0x00, 0x90, 60, 100]]);
        // Inflate the declared track size beyond the real payload. The
        // size field sits right after the 14-byte header and track magic.
        data[18..22].copy_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            Sequence::from_bytes(&data),
            Err(ParseError::Format(_))
        ));
    }

    #[test]
    fn test_program_change_is_single_byte() {
        let body = [0x00, 0xC1, 42, 0x00, 0x90, 60, 100];
        let seq = Sequence::from_bytes(&build_file(480, &[&body])).unwrap();
        let events = &seq.tracks[0].events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, 0xC1);
        assert_eq!(events[0].data, vec![42]);
    }
}
