//! Row-value extraction: cell emission with long-string reassembly
//! and row-boundary inference.

use std::collections::BTreeMap;

use tracing::trace;

use crate::chunk::ChunkKind;
use crate::metadata::Metadata;
use crate::text::decode_text;
use crate::{ChunkControl, File};

/// Outcome of a value callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueControl {
    Ok,
    Abort,
}

/// A pending, possibly-partial cell value. Short cells are flushed the
/// instant they're read; long-string cells accumulate here until a
/// column/row change or end-of-stream flushes them.
struct Pending {
    row: u64,
    column_index: u32,
    buf: Vec<u8>,
}

/// Per-table bookkeeping.
struct TableState {
    column_count: u32,
    current_row: u64,
    last_column: u32,
    pending: Option<Pending>,
}

impl TableState {
    fn new(column_count: u32) -> Self {
        TableState {
            column_count,
            current_row: 1,
            last_column: 0,
            pending: None,
        }
    }

    /// Row-boundary inference: a column index that does not strictly
    /// exceed the last one seen starts a new row. Applied only when a
    /// *new* value group begins -- a continuing long-string fragment of an
    /// already-open group never re-triggers this check, which is what
    /// lets a single-column table still advance one row per cell (see
    /// DESIGN.md for the worked case that rules out the stricter "regresses
    /// below" reading of this rule).
    fn advance(&mut self, column_index: u32) -> u64 {
        if self.last_column > 0 && column_index <= self.last_column {
            self.current_row += 1;
        }
        self.last_column = column_index;
        self.current_row
    }
}

/// Drives a traversal emitting `(table_index, row, column_index,
/// value)` to `on_value` for every table not marked `skip` in `metadata`.
pub(crate) fn read_all_values<F>(
    file: &mut File,
    metadata: &Metadata,
    mut on_value: F,
) -> fmp_base::Result<()>
where
    F: FnMut(u32, u64, u32, &str) -> ValueControl,
{
    let version_num = file.version_num();
    let skip: BTreeMap<u32, bool> = metadata.tables.iter().map(|t| (t.index, t.skip)).collect();
    let mut states: BTreeMap<u32, TableState> = metadata
        .tables
        .iter()
        .filter(|t| !t.skip)
        .map(|t| (t.index, TableState::new(metadata.columns_for(t.index).len() as u32)))
        .collect();

    let mut aborted = false;

    file.walk_chunks(|stack, chunk, data| {
        let path = stack.as_slice();
        let p0 = path.first().copied().unwrap_or(0);

        let table_index = if version_num >= 7 {
            if p0 < 128 {
                return ChunkControl::Next;
            }
            p0 - 128
        } else {
            1
        };

        if skip.get(&table_index).copied().unwrap_or(true) {
            return ChunkControl::Next;
        }
        let Some(state) = states.get_mut(&table_index) else {
            return ChunkControl::Next;
        };

        // Long-string fragment: [*, 5, C] at depth 3.
        if path.len() == 3 && path[1] == 5 {
            if matches!(chunk.kind, ChunkKind::FieldRefSimple { r#ref: 0 }) {
                // Rich-text formatting fragment; discarded.
                return ChunkControl::Next;
            }
            let column_index = path[2] as u32;
            if column_index == 0 || column_index > state.column_count {
                return ChunkControl::Next;
            }
            let data = data;
            let continues = state
                .pending
                .as_ref()
                .is_some_and(|p| p.column_index == column_index && p.row == state.current_row);
            if continues {
                state.pending.as_mut().unwrap().buf.extend_from_slice(data);
            } else {
                if let Some(done) = state.pending.take() {
                    let control = flush(table_index, done, version_num, file, &mut on_value);
                    if control == ChunkControl::Done {
                        aborted = true;
                        return ChunkControl::Done;
                    }
                }
                let row = state.advance(column_index);
                state.pending = Some(Pending {
                    row,
                    column_index,
                    buf: data.to_vec(),
                });
            }
            return ChunkControl::Next;
        }

        // Short cell: [*, 5] at depth 2.
        if path.len() == 2 && path[1] == 5 {
            let column_index = match chunk.kind {
                ChunkKind::FieldRefSimple { r#ref } if r#ref != 252 => Some(r#ref as u32),
                ChunkKind::DataSegment { segment_index } => Some(segment_index as u32),
                _ => None,
            };
            let Some(column_index) = column_index else {
                return ChunkControl::Next;
            };
            if column_index == 0 || column_index > state.column_count {
                return ChunkControl::Next;
            }

            if let Some(done) = state.pending.take() {
                let control = flush(table_index, done, version_num, file, &mut on_value);
                if control == ChunkControl::Done {
                    aborted = true;
                    return ChunkControl::Done;
                }
            }

            let row = state.advance(column_index);
            let data = data;
            let value = decode_text(data, file.xor_mask(), file.text_decoder());
            trace!(target: "fmp", table_index, row, column_index, "emitting short cell");
            match on_value(table_index, row, column_index, &value) {
                ValueControl::Ok => {}
                ValueControl::Abort => {
                    aborted = true;
                    return ChunkControl::Done;
                }
            }
        }

        ChunkControl::Next
    })?;

    if !aborted {
        for (table_index, state) in states.into_iter() {
            if let Some(done) = state.pending {
                if flush(table_index, done, version_num, file, &mut on_value) == ChunkControl::Done
                {
                    aborted = true;
                    break;
                }
            }
        }
    }

    if aborted {
        return Err(fmp_base::Error::new(fmp_base::ErrorKind::UserAborted));
    }
    Ok(())
}

fn flush<F>(
    table_index: u32,
    pending: Pending,
    _version_num: u8,
    file: &File,
    on_value: &mut F,
) -> ChunkControl
where
    F: FnMut(u32, u64, u32, &str) -> ValueControl,
{
    let value = decode_text(&pending.buf, file.xor_mask(), file.text_decoder());
    trace!(target: "fmp", table_index, row = pending.row, column_index = pending.column_index, "emitting long-string cell");
    match on_value(table_index, pending.row, pending.column_index, &value) {
        ValueControl::Ok => ChunkControl::Next,
        ValueControl::Abort => ChunkControl::Done,
    }
}

/// Single-table convenience over [`read_all_values`].
pub(crate) fn read_values<F>(
    file: &mut File,
    metadata: &Metadata,
    table_index: u32,
    mut on_value: F,
) -> fmp_base::Result<()>
where
    F: FnMut(u64, u32, &str) -> ValueControl,
{
    read_all_values(file, metadata, |t, row, column, value| {
        if t == table_index {
            on_value(row, column, value)
        } else {
            ValueControl::Ok
        }
    })
}
