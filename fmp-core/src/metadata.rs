//! Metadata discovery: tables and columns, reassembled from the
//! path-qualified chunk stream.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::chunk::ChunkKind;
use crate::text::decode_text;
use crate::{ChunkControl, File};

/// A column's declared type. Closed enum; any
/// on-disk value above `Global` clamps to `Unknown` rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    Text = 0,
    Number = 1,
    Date = 2,
    Time = 3,
    Timestamp = 4,
    Container = 5,
    Calc = 6,
    Summary = 7,
    Global = 8,
    Unknown = 9,
}

impl ColumnType {
    pub(crate) fn from_byte(b: u8) -> ColumnType {
        match b {
            0 => ColumnType::Text,
            1 => ColumnType::Number,
            2 => ColumnType::Date,
            3 => ColumnType::Time,
            4 => ColumnType::Timestamp,
            5 => ColumnType::Container,
            6 => ColumnType::Calc,
            7 => ColumnType::Summary,
            8 => ColumnType::Global,
            _ => ColumnType::Unknown,
        }
    }
}

/// One table. `skip` is caller policy: set after `discover_all_metadata`
/// and before `read_all_values` to exclude a table from value extraction
/// entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub skip: bool,
}

/// One column, 1-based within its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub index: u32,
    pub name: String,
    pub col_type: ColumnType,
    pub collation: u8,
}

/// The tuple `(tables[], columns_by_table_index[])`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub tables: Vec<Table>,
    pub columns: BTreeMap<u32, Vec<Column>>,
}

impl Metadata {
    pub fn columns_for(&self, table_index: u32) -> &[Column] {
        self.columns
            .get(&table_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Default)]
struct PartialColumn {
    name: Option<String>,
    col_type: Option<ColumnType>,
    collation: u8,
}

#[derive(Default)]
struct Discovery {
    table_names: BTreeMap<u32, String>,
    columns: BTreeMap<u32, BTreeMap<u32, PartialColumn>>,
}

/// Drives a traversal with a handler that populates tables and columns
/// per the dialect's path-matching rules, then compacts the sparse result.
pub(crate) fn discover_metadata(file: &mut File) -> fmp_base::Result<Metadata> {
    let version_num = file.version_num();
    let basename = file.basename();
    let mut disco = Discovery::default();

    file.walk_chunks(|stack, chunk, data| {
        let path = stack.as_slice();
        let p0 = path.first().copied().unwrap_or(0);

        if version_num >= 7 {
            if p0 > 3 && p0 < 128 {
                return ChunkControl::Done;
            }
        } else if p0 > 3 {
            return ChunkControl::Done;
        }

        match chunk.kind {
            ChunkKind::FieldRefSimple { r#ref: 16 } if version_num >= 7 => {
                if path.len() == 4 && path[0] >= 128 && path[1] == 16 && path[2] == 5 {
                    // Table name: [T, 16, 5, K], T >= 128, K >= 128.
                    let k = path[3];
                    if k >= 128 {
                        let table_index = (k - 128) as u32;
                        let name = decode_text(data, file.xor_mask(), file.text_decoder());
                        trace!(target: "fmp", table_index, %name, "discovered table name");
                        disco.table_names.insert(table_index, name);
                    }
                } else if path.len() == 5
                    && path[0] >= 128
                    && path[1] == 3
                    && path[2] == 3
                    && path[3] == 5
                {
                    // Column name (v>=7): [T, 3, 3, 5, C], T >= 128.
                    let table_index = (path[0] - 128) as u32;
                    let column_index = path[4] as u32;
                    let name = decode_text(data, file.xor_mask(), file.text_decoder());
                    trace!(target: "fmp", table_index, column_index, %name, "discovered column name");
                    disco
                        .columns
                        .entry(table_index)
                        .or_default()
                        .entry(column_index)
                        .or_default()
                        .name = Some(name);
                }
            }
            ChunkKind::FieldRefSimple { r#ref: 1 } if version_num < 7 => {
                // Column name (v<=6): [P0, 3, 5, C], P0 <= 3.
                if path.len() == 4 && path[0] <= 3 && path[1] == 3 && path[2] == 5 {
                    let column_index = path[3] as u32;
                    let name = decode_text(data, file.xor_mask(), file.text_decoder());
                    disco
                        .columns
                        .entry(1)
                        .or_default()
                        .entry(column_index)
                        .or_default()
                        .name = Some(name);
                }
            }
            ChunkKind::FieldRefSimple { r#ref: 2 } if version_num < 7 => {
                // Column type + collation (v<=6 only), same path shape.
                if path.len() == 4 && path[0] <= 3 && path[1] == 3 && path[2] == 5 {
                    let column_index = path[3] as u32;
                    let raw = data;
                    let col_type = raw.get(1).copied().map(ColumnType::from_byte);
                    let collation = raw.get(3).copied().unwrap_or(0);
                    let entry = disco
                        .columns
                        .entry(1)
                        .or_default()
                        .entry(column_index)
                        .or_default();
                    entry.col_type = col_type;
                    entry.collation = collation;
                }
            }
            _ => {}
        }

        ChunkControl::Next
    })?;

    Ok(compact(disco, version_num, basename))
}

fn compact(disco: Discovery, version_num: u8, basename: String) -> Metadata {
    let mut tables = Vec::new();
    let mut columns = BTreeMap::new();

    if version_num < 7 {
        // For v<=6 there is exactly one synthesized table.
        tables.push(Table {
            index: 1,
            name: basename,
            skip: false,
        });
    } else {
        // `table_index = K - 128` (see `discover_metadata` above) means a
        // table at wire slot 128 -- the first table a v>=7 file can have --
        // legitimately decodes to index 0. Unlike the legacy sparse C array
        // this `BTreeMap` has no notion of a "hole": every key present here
        // was put there by an actual table-name chunk, so index 0 is kept.
        for (index, name) in disco.table_names {
            tables.push(Table {
                index,
                name,
                skip: false,
            });
        }
        tables.sort_by_key(|t| t.index);
    }

    // Same reasoning as above: `table_index` here is never offset, so a
    // present key (including 0) is a table that was genuinely discovered.
    for (table_index, partials) in disco.columns {
        let mut cols: Vec<Column> = partials
            .into_iter()
            .filter(|(index, _)| *index != 0)
            .map(|(index, p)| Column {
                index,
                name: p.name.unwrap_or_default(),
                col_type: p.col_type.unwrap_or(ColumnType::Unknown),
                collation: p.collation,
            })
            .collect();
        cols.sort_by_key(|c| c.index);
        columns.insert(table_index, cols);
    }

    for table in &tables {
        if columns.get(&table.index).map(Vec::is_empty).unwrap_or(true) {
            warn!(target: "fmp", table_index = table.index, table_name = %table.name, "table skipped for zero columns");
        }
    }

    Metadata { tables, columns }
}

pub(crate) fn basename_without_extension(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
