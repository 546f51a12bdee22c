//! FileMaker Pro (v3-v12) binary decoder.
//!
//! Five components, leaves first: the sector loader (`sector`), the
//! block decoder (`block`), the chunk parser (`chunk`), the path
//! interpreter & traversal (this module, `File::walk`), and the two
//! semantic extractors built on top of it (`metadata`, `values`).
//!
//! The crate never mutates the file it reads. Data flows strictly: bytes
//! -> sectors -> blocks -> chunks -> path-qualified chunks -> domain
//! events (table/column/value).

mod block;
mod chunk;
mod metadata;
mod path;
mod scsu;
mod sector;
mod text;
mod values;

pub use chunk::{Chunk, ChunkKind};
pub use metadata::{Column, ColumnType, Metadata, Table};
pub use path::PathStack;
pub use values::ValueControl;

use std::collections::HashSet;
use std::path::Path;

use fmp_base::{Error, Result};
use tracing::{trace, warn};

use block::{decode_sector, Block};
use sector::SectorLoader;
use text::TextDecoder;

/// Outcome of a low-level chunk callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkControl {
    /// Continue the traversal.
    Next,
    /// Stop the traversal cleanly; not an error.
    Done,
}

/// The link fields of a decoded block, handed to a block filter callback
/// without exposing the block's internal chunk representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    pub this_id: u32,
    pub prev_id: u32,
    pub next_id: u32,
}

/// A decoding session. Immutable after the header parse except for the
/// traversal path stack.
pub struct File {
    loader: SectorLoader,
    path_stack: PathStack,
    basename: String,
    /// Pre-decoded blocks for non-mapped backings: mapped files are
    /// re-viewed from the mapping on every visit instead, since that's
    /// `O(1)` pointer arithmetic and needs no cache.
    blocks: Option<Vec<Block>>,
    total_blocks: u32,
}

impl File {
    /// Opens a path-backed file. Files at or above the
    /// mmap threshold are mapped read-only; smaller files stream through
    /// buffered reads and have every block decoded once, up front.
    pub fn open(path: impl AsRef<Path>) -> Result<File> {
        let path = path.as_ref();
        let basename = metadata::basename_without_extension(path);
        let loader = SectorLoader::open_path(path)?;
        Self::from_loader(loader, basename)
    }

    /// Opens an in-memory buffer. There is no
    /// filename to synthesize a v<=6 table name from, so the basename is
    /// empty; callers decoding a v<=6 buffer who want a named table
    /// should rename the resulting `Table` themselves.
    pub fn open_buffer(bytes: Vec<u8>) -> Result<File> {
        let loader = SectorLoader::open_buffer(bytes)?;
        Self::from_loader(loader, String::new())
    }

    fn from_loader(mut loader: SectorLoader, basename: String) -> Result<File> {
        let total_blocks = loader.total_blocks()?;
        let blocks = if loader.is_mapped() {
            None
        } else {
            Some(Self::load_all_blocks(&mut loader, total_blocks)?)
        };
        Ok(File {
            loader,
            path_stack: PathStack::new(),
            basename,
            blocks,
            total_blocks,
        })
    }

    fn load_all_blocks(loader: &mut SectorLoader, total_blocks: u32) -> Result<Vec<Block>> {
        let start = start_block_id(loader.dialect.version_num);
        let mut blocks = Vec::with_capacity(total_blocks as usize);
        for id in start..start + total_blocks {
            let raw = loader.get_sector(id as usize)?.into_owned();
            blocks.push(decode_sector(&raw, id, &loader.dialect)?);
        }
        Ok(blocks)
    }

    /// Releases the mapping/stream and all decoded blocks. Equivalent to
    /// dropping the `File`; kept as an explicit method for callers that
    /// want to close without relying on scope exit.
    pub fn close(self) {}

    pub fn version(&self) -> u8 {
        self.loader.dialect.version_num
    }

    pub fn version_date(&self) -> &str {
        &self.loader.version_date
    }

    pub fn version_string(&self) -> &str {
        &self.loader.version_string
    }

    pub fn file_size(&self) -> u64 {
        self.loader.file_size
    }

    pub(crate) fn version_num(&self) -> u8 {
        self.loader.dialect.version_num
    }

    pub(crate) fn xor_mask(&self) -> u8 {
        self.loader.dialect.xor_mask
    }

    pub(crate) fn text_decoder(&self) -> TextDecoder {
        self.loader.dialect.text_decoder()
    }

    pub(crate) fn basename(&self) -> String {
        self.basename.clone()
    }

    /// Returns a decoded block by id, re-deriving it from the mapping
    /// (mapped backing) or indexing the pre-loaded vector (streamed
    /// backing). `id` is the 1-based sector/block id.
    fn get_block(&mut self, id: u32) -> Result<Block> {
        match &self.blocks {
            Some(blocks) => {
                let start = start_block_id(self.loader.dialect.version_num);
                let idx = id.checked_sub(start).ok_or_else(|| {
                    Error::bad_sector("block id before start of chain")
                })?;
                blocks
                    .get(idx as usize)
                    .cloned()
                    .ok_or_else(|| Error::bad_sector("block id out of range"))
            }
            None => {
                let raw = self.loader.get_sector(id as usize)?.into_owned();
                decode_sector(&raw, id, &self.loader.dialect)
            }
        }
    }

    /// The path interpreter & traversal. Walks blocks in next-id
    /// order starting from the chain head, maintaining the path stack
    /// across block boundaries (it is reset once here, at the start of
    /// the traversal, never per block), and presents every chunk to
    /// `on_chunk` alongside a snapshot of the current path. `on_block` is
    /// the optional per-block filter; returning `false` skips that
    /// block's chunks but still follows its `next_id` link.
    pub fn walk<C, B>(&mut self, mut on_chunk: C, mut on_block: B) -> Result<()>
    where
        C: FnMut(&PathStack, &Chunk, &[u8]) -> ChunkControl,
        B: FnMut(&BlockMeta) -> bool,
    {
        self.path_stack.reset();
        let version_num = self.loader.dialect.version_num;
        let mut current = start_block_id(version_num);
        let max_iters = 2 * self.total_blocks.max(1) as u64;
        let mut visited = HashSet::new();
        let mut iters = 0u64;

        while current != 0 {
            if !visited.insert(current) {
                warn!(target: "fmp", block_id = current, "loop detected in sector chain, halting traversal");
                break;
            }
            iters += 1;
            if iters > max_iters {
                warn!(target: "fmp", "exceeded traversal safety cap, halting");
                break;
            }

            let block = self.get_block(current)?;
            let meta = BlockMeta {
                this_id: block.this_id,
                prev_id: block.prev_id,
                next_id: block.next_id,
            };
            let next_id = block.next_id;

            if on_block(&meta) {
                let mut done = false;
                for chunk in &block.chunks {
                    match chunk.kind {
                        chunk::ChunkKind::PathPush => {
                            let data = block.chunk_data(chunk);
                            self.path_stack
                                .push(path::path_element_value(data, version_num));
                        }
                        chunk::ChunkKind::PathPop => self.path_stack.pop(),
                        _ => {}
                    }
                    let data = block.chunk_data(chunk);
                    trace!(target: "fmp", block_id = current, depth = self.path_stack.depth(), "visiting chunk");
                    match on_chunk(&self.path_stack, chunk, data) {
                        ChunkControl::Next => {}
                        ChunkControl::Done => {
                            done = true;
                            break;
                        }
                    }
                }
                if done {
                    break;
                }
            }

            current = next_id;
        }

        Ok(())
    }

    /// Internal convenience over `walk` for the extractors, which never
    /// need the block filter.
    pub(crate) fn walk_chunks<C>(&mut self, on_chunk: C) -> Result<()>
    where
        C: FnMut(&PathStack, &Chunk, &[u8]) -> ChunkControl,
    {
        self.walk(on_chunk, |_| true)
    }

    /// Discovers every table and column in the file in one traversal.
    pub fn discover_all_metadata(&mut self) -> Result<Metadata> {
        metadata::discover_metadata(self)
    }

    /// Convenience over `discover_all_metadata` returning just the tables.
    pub fn list_tables(&mut self) -> Result<Vec<Table>> {
        Ok(self.discover_all_metadata()?.tables)
    }

    /// Convenience over `discover_all_metadata` returning one table's columns.
    pub fn list_columns(&mut self, table_index: u32) -> Result<Vec<Column>> {
        Ok(self
            .discover_all_metadata()?
            .columns_for(table_index)
            .to_vec())
    }

    /// One scan emitting cell values for every non-skipped table.
    pub fn read_all_values<F>(&mut self, metadata: &Metadata, on_value: F) -> Result<()>
    where
        F: FnMut(u32, u64, u32, &str) -> ValueControl,
    {
        values::read_all_values(self, metadata, on_value)
    }

    /// Single-table scan over the same underlying extractor.
    pub fn read_values<F>(
        &mut self,
        metadata: &Metadata,
        table_index: u32,
        on_value: F,
    ) -> Result<()>
    where
        F: FnMut(u64, u32, &str) -> ValueControl,
    {
        values::read_values(self, metadata, table_index, on_value)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        trace!(target: "fmp", "closing file");
    }
}

fn start_block_id(version_num: u8) -> u32 {
    if version_num >= 7 {
        1
    } else {
        2
    }
}
