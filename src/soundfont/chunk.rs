//! Recursive chunk container parsing.
//!
//! A bank file is a RIFF-style tree: every chunk is a 4-byte identifier, a
//! 4-byte little-endian size, and a payload whose first 4 bytes name the
//! chunk's kind when it nests further. Subdivision is speculative: a chunk
//! splits only while the next 4 bytes form a recognized identifier, and
//! whatever remains is leaf data. All offsets are validated at parse time
//! so later payload access never leaves the buffer.

use super::ParseError;

/// Identifier of the outermost container chunk.
const ROOT_ID: [u8; 4] = *b"RIFF";

/// Every chunk identifier the bank format defines.
const KNOWN_IDS: [[u8; 4]; 24] = [
    *b"LIST", *b"ifil", *b"isng", *b"INAM", *b"ICRD", *b"ISFT", *b"smpl", *b"phdr", *b"pbag",
    *b"pmod", *b"pgen", *b"inst", *b"ibag", *b"imod", *b"igen", *b"shdr", *b"irom", *b"iver",
    *b"IENG", *b"IPRD", *b"ICOP", *b"ICMT", *b"ISFT", *b"sm24",
];

pub(super) fn u16_le(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(super) fn u32_le(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn is_known_id(id: &[u8; 4]) -> bool {
    KNOWN_IDS.contains(id)
}

fn tag(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}

/// One node of the chunk tree.
///
/// `offset` and `size` locate the chunk's payload within the load buffer;
/// the payload of a nested chunk starts with its 4-byte `kind` tag.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Four-byte chunk identifier.
    pub id: [u8; 4],
    /// Kind tag (first 4 payload bytes), zeroed for short leaf chunks.
    pub kind: [u8; 4],
    /// Payload offset within the load buffer.
    pub offset: usize,
    /// Declared payload size in bytes.
    pub size: usize,
    /// Recognized subchunks, in file order.
    pub children: Vec<Chunk>,
}

impl Chunk {
    /// Parses the outermost chunk of a bank buffer and subdivides it.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the root identifier, the declared
    /// sizes, or any nested chunk header is invalid.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 8 {
            return Err(ParseError::Truncated("container header"));
        }
        let id = tag(data, 0);
        if id != ROOT_ID {
            return Err(ParseError::Format("bad container identifier".into()));
        }
        let size = u32_le(data, 4) as usize;
        if size == 0 {
            return Err(ParseError::Format("container declares zero size".into()));
        }
        if size > data.len() - 8 {
            return Err(ParseError::Truncated("container body"));
        }
        if size < 4 {
            return Err(ParseError::Format("container has no form type".into()));
        }

        let mut root = Chunk {
            id,
            kind: tag(data, 8),
            offset: 8,
            size,
            children: Vec::new(),
        };
        root.subdivide(data)?;
        Ok(root)
    }

    /// Returns this chunk's payload bytes.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset..self.offset + self.size]
    }

    /// Recursively searches the tree for a chunk with the given id.
    pub fn find(&self, id: &[u8; 4]) -> Option<&Chunk> {
        if self.id == *id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Splits the payload into recognized subchunks.
    ///
    /// Scanning starts 4 bytes in, past this chunk's kind tag, and stops
    /// at the first unrecognized identifier: the rest is leaf data.
    fn subdivide(&mut self, data: &[u8]) -> Result<(), ParseError> {
        let payload = self.payload(data);
        let mut at = 4usize;
        while at + 8 <= self.size {
            let id = tag(payload, at);
            if !is_known_id(&id) {
                break;
            }
            let size = u32_le(payload, at + 4) as usize;
            if size == 0 {
                return Err(ParseError::Format(format!(
                    "subchunk {} declares zero size",
                    String::from_utf8_lossy(&id)
                )));
            }
            if size >= self.size {
                return Err(ParseError::Format(format!(
                    "subchunk {} is larger than its parent",
                    String::from_utf8_lossy(&id)
                )));
            }
            if at + 8 + size > self.size {
                return Err(ParseError::Truncated("subchunk body"));
            }

            let kind = if size >= 4 { tag(payload, at + 8) } else { [0u8; 4] };
            let mut child = Chunk {
                id,
                kind,
                offset: self.offset + at + 8,
                size,
                children: Vec::new(),
            };
            child.subdivide(data)?;
            self.children.push(child);
            at += size + 8;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn list(kind: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = kind.to_vec();
        for child in children {
            payload.extend_from_slice(child);
        }
        raw_chunk(b"LIST", &payload)
    }

    fn riff(children: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = b"sfbk".to_vec();
        for child in children {
            payload.extend_from_slice(child);
        }
        raw_chunk(b"RIFF", &payload)
    }

    /// Recursively checks the subdivision invariant: the children of a
    /// node fit inside its payload after the kind tag.
    fn assert_coverage(chunk: &Chunk) {
        let used: usize = chunk.children.iter().map(|c| c.size + 8).sum();
        assert!(used <= chunk.size.saturating_sub(4));
        for child in &chunk.children {
            assert_coverage(child);
        }
    }

    #[test]
    fn test_parse_nested_tree() {
        let data = riff(&[
            list(
                b"INFO",
                &[raw_chunk(b"INAM", b"Test Bank\0"), raw_chunk(b"ifil", &[2, 0, 1, 0])],
            ),
            list(b"sdta", &[raw_chunk(b"smpl", &[0u8; 32])]),
        ]);
        let root = Chunk::parse(&data).unwrap();
        assert_eq!(root.id, *b"RIFF");
        assert_eq!(root.kind, *b"sfbk");
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].kind, *b"INFO");

        let inam = root.find(b"INAM").unwrap();
        assert_eq!(inam.payload(&data), b"Test Bank\0");
        let smpl = root.find(b"smpl").unwrap();
        assert_eq!(smpl.size, 32);
        assert!(root.find(b"phdr").is_none());

        assert_coverage(&root);
    }

    #[test]
    fn test_unrecognized_id_stops_subdivision() {
        // The payload after the kind tag is not a known chunk id, so the
        // chunk stays a leaf rather than failing.
        let data = riff(&[raw_chunk(b"smpl", b"XXXXrest of the data")]);
        let root = Chunk::parse(&data).unwrap();
        assert_eq!(root.children.len(), 1);
        assert!(root.children[0].children.is_empty());
    }

    #[test]
    fn test_bad_root_identifier() {
        let mut data = riff(&[]);
        data[0..4].copy_from_slice(b"JUNK");
        assert!(matches!(
            Chunk::parse(&data),
            Err(ParseError::Format(_))
        ));
    }

    #[test]
    fn test_zero_size_subchunk_fails() {
        let mut payload = b"sfbk".to_vec();
        payload.extend_from_slice(b"INAM");
        payload.extend_from_slice(&0u32.to_le_bytes());
        let data = raw_chunk(b"RIFF", &payload);
        assert!(matches!(Chunk::parse(&data), Err(ParseError::Format(_))));
    }

    #[test]
    fn test_truncated_container_fails() {
        let mut data = riff(&[raw_chunk(b"INAM", b"name\0\0")]);
        data.truncate(data.len() - 4);
        assert!(matches!(
            Chunk::parse(&data),
            Err(ParseError::Truncated(_))
        ));
    }

    #[test]
    fn test_oversized_subchunk_fails() {
        let mut payload = b"sfbk".to_vec();
        payload.extend_from_slice(b"INAM");
        payload.extend_from_slice(&1000u32.to_le_bytes());
        payload.extend_from_slice(&[0u8; 8]);
        let data = raw_chunk(b"RIFF", &payload);
        assert!(Chunk::parse(&data).is_err());
    }
}
