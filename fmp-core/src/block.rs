//! The block decoder: turns a raw sector into a decoded block
//! carrying link ids, its payload, and the payload's chunk chain.

use fmp_base::{Error, Result};

use crate::chunk::{parse_payload, Chunk};
use crate::sector::Dialect;

/// A decoded sector. Owns its payload; every `Chunk` in
/// `chunks` is a byte range into that payload, never a standalone slice,
/// so a block and its chunks can never outlive each other.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) this_id: u32,
    pub(crate) prev_id: u32,
    pub(crate) next_id: u32,
    payload: Vec<u8>,
    pub(crate) chunks: Vec<Chunk>,
}

impl Block {
    pub(crate) fn chunk_data(&self, chunk: &Chunk) -> &[u8] {
        chunk.data(&self.payload)
    }
}

/// Decodes a raw sector buffer (already demasked upstream, see note
/// below) into a `Block`.
///
/// Sector ids are stored as 2-byte units for the pre-v7 dialects; the
/// dialect's `sector_index_shift` folds that back down to sector-addressable
/// units.
pub(crate) fn decode_sector(raw: &[u8], this_id: u32, dialect: &Dialect) -> Result<Block> {
    if raw.len() < dialect.head_len {
        return Err(Error::bad_sector("sector shorter than header"));
    }

    let prev_id = read_u32(raw, dialect.prev_off)? >> dialect.sector_index_shift;
    let next_id = read_u32(raw, dialect.next_off)? >> dialect.sector_index_shift;

    let payload = match dialect.paylen_off {
        // Pre-v7 dialects pack the payload length into the 2-byte gap
        // between the link fields and `head_len` (offset 12..14) -- a u32
        // read here would run past `head_len` into the payload itself.
        Some(off) => {
            let paylen = read_u16(raw, off)? as usize;
            let start = dialect.head_len;
            let end = (start + paylen).min(raw.len());
            raw[start..end].to_vec()
        }
        None => raw[dialect.head_len..].to_vec(),
    };

    let chunks = parse_payload(&payload, dialect.version_num);

    Ok(Block {
        this_id,
        prev_id,
        next_id,
        payload,
        chunks,
    })
}

fn read_u32(raw: &[u8], off: usize) -> Result<u32> {
    let bytes: [u8; 4] = raw
        .get(off..off + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::bad_sector("link field past end of sector"))?;
    Ok(u32::from_be_bytes(bytes))
}

fn read_u16(raw: &[u8], off: usize) -> Result<u16> {
    let bytes: [u8; 2] = raw
        .get(off..off + 2)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::bad_sector("payload length field past end of sector"))?;
    Ok(u16::from_be_bytes(bytes))
}
