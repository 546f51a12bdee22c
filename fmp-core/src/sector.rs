//! The sector loader: opens a file or buffer, validates the magic
//! and dialect header, and hands out sectors by 1-based index.

use std::borrow::Cow;
use std::fs::File as StdFile;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use fmp_base::{Error, Result};
use memmap2::Mmap;
use tracing::debug;

use crate::text::TextDecoder;

const MAGIC: [u8; 15] = [
    0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x00, 0x05, 0x00, 0x02, 0x00, 0x02, 0xC0,
];

/// Threshold above which path-backed input is memory-mapped rather than
/// streamed.
const MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Parameters derived from the dialect tag.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dialect {
    pub(crate) version_num: u8,
    pub(crate) sector_size: usize,
    pub(crate) xor_mask: u8,
    pub(crate) prev_off: usize,
    pub(crate) next_off: usize,
    pub(crate) paylen_off: Option<usize>,
    pub(crate) head_len: usize,
    /// Pre-v7 dialects store sector ids in 2-byte units.
    pub(crate) sector_index_shift: u32,
}

impl Dialect {
    fn from_header(buf: &[u8]) -> Result<Self> {
        if buf.len() < 542 || buf[0..15] != MAGIC {
            return Err(Error::new(fmp_base::ErrorKind::BadMagic));
        }
        let tag = &buf[15..20];
        if tag == b"HBAM7" {
            let version_num = if buf[521] == 0x1E { 12 } else { 7 };
            Ok(Dialect {
                version_num,
                sector_size: 4096,
                xor_mask: 0x5A,
                prev_off: 4,
                next_off: 8,
                paylen_off: None,
                head_len: 20,
                sector_index_shift: 0,
            })
        } else if tag == b"HBAM3" || tag == b"HBAM5" {
            let version_num = if tag == b"HBAM3" { 3 } else { 5 };
            Ok(Dialect {
                version_num,
                sector_size: 1024,
                xor_mask: 0x00,
                prev_off: 4,
                next_off: 8,
                paylen_off: Some(12),
                head_len: 14,
                sector_index_shift: 1,
            })
        } else {
            Err(Error::new(fmp_base::ErrorKind::UnsupportedCharset(
                String::from_utf8_lossy(tag).into_owned(),
            )))
        }
    }

    pub(crate) fn text_decoder(&self) -> TextDecoder {
        match self.version_num {
            3 => TextDecoder::MacRoman,
            5 | 6 => TextDecoder::Windows1252,
            _ => TextDecoder::Scsu,
        }
    }
}

enum Backing {
    Mapped(Mmap),
    Buffered(StdFile),
    InMemory(Vec<u8>),
}

/// An open decoding session. Immutable after header parse except for the
/// traversal path stack, which lives in `crate::lib::File` alongside this
/// loader.
pub(crate) struct SectorLoader {
    backing: Backing,
    pub(crate) dialect: Dialect,
    pub(crate) file_size: u64,
    pub(crate) version_date: String,
    pub(crate) version_string: String,
}

impl SectorLoader {
    /// Mapped files are never cached at the `File` level; everything else
    /// is read once and retained.
    pub(crate) fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    pub(crate) fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = StdFile::open(path.as_ref()).map_err(Error::open)?;
        let file_size = file.metadata().map_err(Error::open)?.len();
        if file_size >= MMAP_THRESHOLD {
            debug!(target: "fmp", file_size, "mapping file read-only");
            let mmap = unsafe { Mmap::map(&file).map_err(Error::open)? };
            Self::from_bytes(Backing::Mapped(mmap), file_size)
        } else {
            debug!(target: "fmp", file_size, "streaming file via buffered reads");
            Self::from_bytes(Backing::Buffered(file), file_size)
        }
    }

    pub(crate) fn open_buffer(bytes: Vec<u8>) -> Result<Self> {
        let file_size = bytes.len() as u64;
        Self::from_bytes(Backing::InMemory(bytes), file_size)
    }

    fn from_bytes(backing: Backing, file_size: u64) -> Result<Self> {
        let mut loader = SectorLoader {
            backing,
            dialect: Dialect {
                version_num: 0,
                sector_size: 1024,
                xor_mask: 0,
                prev_off: 0,
                next_off: 0,
                paylen_off: None,
                head_len: 0,
                sector_index_shift: 0,
            },
            file_size,
            version_date: String::new(),
            version_string: String::new(),
        };
        let header = loader.read_raw(0, 1024)?.into_owned();
        loader.dialect = Dialect::from_header(&header)?;
        loader.version_date = String::from_utf8_lossy(&header[531..538]).into_owned();
        loader.version_string = read_pascal_string(&header[541..]);
        Ok(loader)
    }

    /// Reads `len` bytes starting at byte offset `offset`, zero-copy if
    /// mapped, freshly read if streamed.
    fn read_raw(&mut self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        match &mut self.backing {
            Backing::Mapped(mmap) => {
                let start = offset as usize;
                let end = start
                    .checked_add(len)
                    .filter(|&e| e <= mmap.len())
                    .ok_or_else(|| Error::bad_sector("sector range past end of mapping"))?;
                Ok(Cow::Borrowed(&mmap[start..end]))
            }
            Backing::Buffered(file) => {
                file.seek(SeekFrom::Start(offset)).map_err(Error::seek)?;
                let mut buf = vec![0u8; len];
                read_exact_or_bad_sector(file, &mut buf)?;
                Ok(Cow::Owned(buf))
            }
            Backing::InMemory(bytes) => {
                let start = offset as usize;
                let end = start
                    .checked_add(len)
                    .filter(|&e| e <= bytes.len())
                    .ok_or_else(|| Error::bad_sector("sector range past end of buffer"))?;
                Ok(Cow::Borrowed(&bytes[start..end]))
            }
        }
    }

    /// Returns the raw bytes of 1-based sector `index`. Sector 0 is the
    /// header sector.
    pub(crate) fn get_sector(&mut self, index: usize) -> Result<Cow<'_, [u8]>> {
        let sector_size = self.dialect.sector_size;
        let offset = (index as u64) * sector_size as u64;
        if offset + sector_size as u64 > self.file_size {
            return Err(Error::new(fmp_base::ErrorKind::BadSectorCount));
        }
        self.read_raw(offset, sector_size)
    }

    /// Derives the total block count geometrically from the file size
    /// (`file_size == (num_blocks+1+(version<7))×sector_size`), rather
    /// than trusting any single block's `next_id` field -- the chain may
    /// visit blocks out of order, so no one block's link is a safe
    /// stand-in for the total. A non-exact multiple of the sector size
    /// (e.g. a truncated final sector) is `BAD_SECTOR_COUNT`.
    pub(crate) fn total_blocks(&self) -> Result<u32> {
        let sector_size = self.dialect.sector_size as u64;
        let header_sectors = 1 + u64::from(self.dialect.version_num < 7);
        if self.file_size % sector_size != 0 {
            return Err(Error::new(fmp_base::ErrorKind::BadSectorCount));
        }
        let total_sectors = self.file_size / sector_size;
        total_sectors
            .checked_sub(header_sectors)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| Error::new(fmp_base::ErrorKind::BadSectorCount))
    }
}

fn read_exact_or_bad_sector(file: &mut StdFile, buf: &mut [u8]) -> Result<()> {
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(Error::new(fmp_base::ErrorKind::BadSectorCount))
        }
        Err(e) => Err(Error::read(e)),
    }
}

fn read_pascal_string(buf: &[u8]) -> String {
    let Some(&len) = buf.first() else {
        return String::new();
    };
    let len = len as usize;
    let bytes = &buf[1..(1 + len).min(buf.len())];
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn header_with(tag: &[u8], extra: impl FnOnce(&mut [u8])) -> Vec<u8> {
        let mut buf = vec![0u8; 542];
        buf[0..15].copy_from_slice(&MAGIC);
        buf[15..20].copy_from_slice(tag);
        extra(&mut buf);
        buf
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = vec![0u8; 542];
        buf[15..20].copy_from_slice(b"HBAM7");
        assert!(Dialect::from_header(&buf).is_err());
    }

    #[test]
    fn hbam3_dialect_parameters() {
        let buf = header_with(b"HBAM3", |_| {});
        let d = Dialect::from_header(&buf).unwrap();
        assert_eq!(d.version_num, 3);
        assert_eq!(d.sector_size, 1024);
        assert_eq!(d.xor_mask, 0x00);
        assert_eq!(d.sector_index_shift, 1);
        assert_eq!(d.head_len, 14);
        assert_eq!(d.paylen_off, Some(12));
    }

    #[test]
    fn hbam5_dialect_parameters() {
        let buf = header_with(b"HBAM5", |_| {});
        let d = Dialect::from_header(&buf).unwrap();
        assert_eq!(d.version_num, 5);
        assert_eq!(d.sector_size, 1024);
    }

    #[test]
    fn hbam7_discriminates_v7_from_v12_at_byte_521() {
        let buf7 = header_with(b"HBAM7", |b| b[521] = 0x00);
        let buf12 = header_with(b"HBAM7", |b| b[521] = 0x1E);
        assert_eq!(Dialect::from_header(&buf7).unwrap().version_num, 7);
        assert_eq!(Dialect::from_header(&buf12).unwrap().version_num, 12);
        let d = Dialect::from_header(&buf7).unwrap();
        assert_eq!(d.sector_size, 4096);
        assert_eq!(d.xor_mask, 0x5A);
        assert_eq!(d.paylen_off, None);
        assert_eq!(d.head_len, 20);
        assert_eq!(d.sector_index_shift, 0);
    }

    #[test]
    fn unrecognized_dialect_tag_is_unsupported_charset() {
        let buf = header_with(b"XXXXX", |_| {});
        let err = Dialect::from_header(&buf).unwrap_err();
        assert!(matches!(err.kind(), fmp_base::ErrorKind::UnsupportedCharset(_)));
    }

    #[test]
    fn pascal_string_reads_length_prefixed_ascii() {
        let buf = [3, b'f', b'o', b'o', b'X'];
        assert_eq!(read_pascal_string(&buf), "foo");
    }

    #[test]
    fn pascal_string_empty_buffer_is_empty_string() {
        assert_eq!(read_pascal_string(&[]), "");
    }
}
