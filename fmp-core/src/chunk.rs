//! The chunk parser: turns a block's payload into an ordered chain
//! of tagged chunks.
//!
//! The on-disk tag byte values below are this decoder's own choice of
//! encoding, not a claim to match any particular real FileMaker byte
//! assignment one for one -- only the *shape* of the chunk taxonomy is
//! pinned down (path push/pop, short/long refs, segmented data, raw data,
//! no-ops). This crate's tests are written purely in terms of chunk
//! *behavior*; the tag values are an implementation detail behind that
//! behavior.
//!
//! Tag layout, one byte, then type-dependent fields:
//!
//! | tag  | chunk            | fields following the tag                       |
//! |------|-------------------|------------------------------------------------|
//! | 0x00 | `NOOP`            | (none)                                          |
//! | 0x01 | `PATH_PUSH`       | 1-byte len, then `len` data bytes               |
//! | 0x02 | `PATH_POP`        | (none)                                          |
//! | 0x03 | `FIELD_REF_SIMPLE`| 1-byte ref, 2-byte LE len, then `len` data bytes|
//! | 0x04 | `FIELD_REF_LONG`  | varint ref, 2-byte LE len, then `len` data bytes|
//! | 0x05 | `DATA_SEGMENT`    | 1-byte segment index, 2-byte LE len, then data  |
//! | 0x06 | `DATA_SIMPLE`     | 2-byte LE len, then `len` data bytes            |
//!
//! Any other tag byte is unknown; the remainder of the payload is
//! discarded and the chain ends there without an error.
//!
//! The long ref's varint uses the usual base-128 continuation encoding:
//! each byte contributes its low 7 bits, high bit set means "more bytes
//! follow", most significant group first.

/// A byte range into a `Block`'s payload buffer. Never valid on its own;
/// always resolved via `Block::chunk_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRef {
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl DataRef {
    pub(crate) fn empty() -> Self {
        DataRef { offset: 0, len: 0 }
    }

    pub(crate) fn resolve<'a>(&self, payload: &'a [u8]) -> &'a [u8] {
        &payload[self.offset..self.offset + self.len]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    PathPush,
    PathPop,
    FieldRefSimple { r#ref: u8 },
    FieldRefLong { r#ref: u64 },
    DataSegment { segment_index: u8 },
    DataSimple,
    Noop,
}

/// The atomic decoded unit of a block's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub(crate) data: DataRef,
    pub version_num: u8,
}

impl Chunk {
    pub fn data<'a>(&self, payload: &'a [u8]) -> &'a [u8] {
        self.data.resolve(payload)
    }
}

/// Consumes `payload` and emits its chunk chain. Never fails: an
/// unrecognized tag or a length that overruns the remaining bytes just
/// ends the chain early, per the edge-case rule that truncated or
/// malformed payloads terminate cleanly rather than erroring the block.
pub(crate) fn parse_payload(payload: &[u8], version_num: u8) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut pos = 0usize;

    while pos < payload.len() {
        let tag = payload[pos];
        pos += 1;

        let chunk = match tag {
            0x00 => Chunk {
                kind: ChunkKind::Noop,
                data: DataRef::empty(),
                version_num,
            },
            0x01 => {
                let Some(len) = payload.get(pos).copied() else {
                    break;
                };
                pos += 1;
                let len = len as usize;
                if pos + len > payload.len() {
                    break;
                }
                let data = DataRef { offset: pos, len };
                pos += len;
                Chunk {
                    kind: ChunkKind::PathPush,
                    data,
                    version_num,
                }
            }
            0x02 => Chunk {
                kind: ChunkKind::PathPop,
                data: DataRef::empty(),
                version_num,
            },
            0x03 => {
                let Some(r#ref) = payload.get(pos).copied() else {
                    break;
                };
                pos += 1;
                let Some(data) = read_len16_data(payload, &mut pos) else {
                    break;
                };
                Chunk {
                    kind: ChunkKind::FieldRefSimple { r#ref },
                    data,
                    version_num,
                }
            }
            0x04 => {
                let Some(r#ref) = read_varint(payload, &mut pos) else {
                    break;
                };
                let Some(data) = read_len16_data(payload, &mut pos) else {
                    break;
                };
                Chunk {
                    kind: ChunkKind::FieldRefLong { r#ref },
                    data,
                    version_num,
                }
            }
            0x05 => {
                let Some(segment_index) = payload.get(pos).copied() else {
                    break;
                };
                pos += 1;
                let Some(data) = read_len16_data(payload, &mut pos) else {
                    break;
                };
                Chunk {
                    kind: ChunkKind::DataSegment { segment_index },
                    data,
                    version_num,
                }
            }
            0x06 => {
                let Some(data) = read_len16_data(payload, &mut pos) else {
                    break;
                };
                Chunk {
                    kind: ChunkKind::DataSimple,
                    data,
                    version_num,
                }
            }
            _ => break,
        };
        chunks.push(chunk);
    }

    chunks
}

fn read_len16_data(payload: &[u8], pos: &mut usize) -> Option<DataRef> {
    let lo = *payload.get(*pos)?;
    let hi = *payload.get(*pos + 1)?;
    *pos += 2;
    let len = u16::from_le_bytes([lo, hi]) as usize;
    if *pos + len > payload.len() {
        return None;
    }
    let data = DataRef { offset: *pos, len };
    *pos += len;
    Some(data)
}

fn read_varint(payload: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    loop {
        let byte = *payload.get(*pos)?;
        *pos += 1;
        value = (value << 7) | (byte & 0x7F) as u64;
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path::path_element_value;
    use test_log::test;

    #[test]
    fn noop_and_pop_are_single_byte() {
        let chunks = parse_payload(&[0x00, 0x02, 0x00], 7);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].kind, ChunkKind::Noop);
        assert_eq!(chunks[1].kind, ChunkKind::PathPop);
        assert_eq!(chunks[2].kind, ChunkKind::Noop);
    }

    #[test]
    fn path_push_carries_its_data() {
        let payload = [0x01, 0x01, 0x80];
        let chunks = parse_payload(&payload, 7);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::PathPush);
        assert_eq!(
            path_element_value(chunks[0].data(&payload), chunks[0].version_num),
            0x80
        );
    }

    #[test]
    fn field_ref_simple_round_trip() {
        let payload = [0x03, 16, 0x03, 0x00, b'A', b'd', b'a'];
        let chunks = parse_payload(&payload, 7);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::FieldRefSimple { r#ref: 16 });
        assert_eq!(chunks[0].data(&payload), b"Ada");
    }

    #[test]
    fn field_ref_long_varint() {
        // 300 encoded as varint: 0x82 0x2C -> (0x02 << 7) | 0x2c = 300
        let payload = [0x04, 0x82, 0x2C, 0x00, 0x00];
        let chunks = parse_payload(&payload, 7);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::FieldRefLong { r#ref: 300 });
    }

    #[test]
    fn data_segment_carries_index() {
        let payload = [0x05, 2, 0x03, 0x00, b'f', b'o', b'o'];
        let chunks = parse_payload(&payload, 7);
        assert_eq!(
            chunks[0].kind,
            ChunkKind::DataSegment { segment_index: 2 }
        );
        assert_eq!(chunks[0].data(&payload), b"foo");
    }

    #[test]
    fn unknown_tag_ends_chain_without_panicking() {
        let payload = [0x00, 0xFF, 0x00, 0x00, 0x00];
        let chunks = parse_payload(&payload, 7);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Noop);
    }

    #[test]
    fn truncated_length_prefix_ends_chain_cleanly() {
        let payload = [0x06, 0x05, 0x00, b'h', b'i'];
        let chunks = parse_payload(&payload, 7);
        assert!(chunks.is_empty());
    }

    #[test]
    fn zero_length_data_is_legal() {
        let payload = [0x06, 0x00, 0x00];
        let chunks = parse_payload(&payload, 7);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data(&payload), b"");
    }
}
