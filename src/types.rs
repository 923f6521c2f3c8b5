//! # Domain Types for the Tile Store
//!
//! Typed names for the MBTiles tables and columns, the staged-row shape used by
//! the write-back cache, and the small option/value structs that cross the
//! public API.
//!
//! ## Design Philosophy: Enums Instead of Strings
//!
//! The write-back cache keys pending rows by `(Table, row_key)` and each row is
//! a map from [`Column`] to value. Using enums for both means:
//!
//! - **Type safety**: a typo in a column name is a compile error, not a failed
//!   commit that discards a whole batch
//! - **Safe SQL assembly**: only names from the enums ever reach a statement
//!   string; values always go through parameter binding

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

// =============================================================================
// Tables
// =============================================================================

/// A table the write-back cache can stage rows for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Images,
    GridUtfgrid,
    GridKey,
    Keymap,
    GeocoderData,
    Metadata,
    /// The `(z, column, row) -> (tile_id, grid_id)` index. Flushed with the
    /// three-way upsert instead of plain `INSERT OR REPLACE`.
    Map,
}

impl Table {
    /// Every stageable table, in the order a commit flushes them. Content
    /// tables go before `map`.
    pub const ALL: [Table; 7] = [
        Table::Images,
        Table::GridUtfgrid,
        Table::GridKey,
        Table::Keymap,
        Table::GeocoderData,
        Table::Metadata,
        Table::Map,
    ];

    /// SQL name of the table.
    pub fn name(self) -> &'static str {
        match self {
            Table::Images => "images",
            Table::GridUtfgrid => "grid_utfgrid",
            Table::GridKey => "grid_key",
            Table::Keymap => "keymap",
            Table::GeocoderData => "geocoder_data",
            Table::Metadata => "metadata",
            Table::Map => "map",
        }
    }

    /// Columns that exist on this table.
    pub fn columns(self) -> &'static [Column] {
        match self {
            Table::Images => &[Column::TileId, Column::TileData],
            Table::GridUtfgrid => &[Column::GridId, Column::GridUtfgrid],
            Table::GridKey => &[Column::GridId, Column::KeyName],
            Table::Keymap => &[Column::KeyName, Column::KeyJson],
            Table::GeocoderData => &[Column::Type, Column::Shard, Column::Data],
            Table::Metadata => &[Column::Name, Column::Value],
            Table::Map => &[
                Column::ZoomLevel,
                Column::TileColumn,
                Column::TileRow,
                Column::TileId,
                Column::GridId,
            ],
        }
    }

    /// True when `column` belongs to this table.
    pub fn has_column(self, column: Column) -> bool {
        self.columns().contains(&column)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Columns
// =============================================================================

/// A column of one of the MBTiles tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    ZoomLevel,
    TileColumn,
    TileRow,
    TileId,
    GridId,
    TileData,
    GridUtfgrid,
    KeyName,
    KeyJson,
    Name,
    Value,
    Type,
    Shard,
    Data,
}

impl Column {
    /// SQL name of the column.
    pub fn as_str(self) -> &'static str {
        match self {
            Column::ZoomLevel => "zoom_level",
            Column::TileColumn => "tile_column",
            Column::TileRow => "tile_row",
            Column::TileId => "tile_id",
            Column::GridId => "grid_id",
            Column::TileData => "tile_data",
            Column::GridUtfgrid => "grid_utfgrid",
            Column::KeyName => "key_name",
            Column::KeyJson => "key_json",
            Column::Name => "name",
            Column::Value => "value",
            Column::Type => "type",
            Column::Shard => "shard",
            Column::Data => "data",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column values staged for one row. Later writes to the same row overwrite
/// only the columns they carry.
///
/// # Rust Pattern: BTreeMap for Deterministic Order
///
/// A `BTreeMap` iterates in column order, so the SQL generated for two rows with
/// the same column set is byte-identical and `prepare_cached` reuses the
/// statement.
pub type PartialRow = BTreeMap<Column, Value>;

// =============================================================================
// UTFGrid
// =============================================================================

/// A UTFGrid interactivity payload.
///
/// `grid` holds one string per row of 4-pixel cells; each character encodes an
/// index into `keys`. `data` maps keys to their feature attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtfGrid {
    pub grid: Vec<String>,
    pub keys: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

// =============================================================================
// Options and Results
// =============================================================================

/// Per-call options for `put_tile` and `put_grid`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Content id to use instead of the MD5 of the payload.
    pub key: Option<String>,
}

impl PutOptions {
    /// Options that store the payload under an explicit content id.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
        }
    }
}

/// Counters exposed by `writer_stats()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Public write operations staged since the last commit.
    pub pending_ops: usize,
    /// Commits that wrote at least one row, successful or not.
    pub commits: u64,
}

/// Options for the coordinate stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordStreamOptions {
    /// Rows fetched per query, and per emitted chunk.
    pub batch: usize,
    /// Cap on total rows emitted.
    pub limit: Option<usize>,
}

impl Default for CoordStreamOptions {
    fn default() -> Self {
        Self {
            batch: 1000,
            limit: None,
        }
    }
}

/// Paging cursor for `get_indexable_docs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocPointer {
    pub limit: usize,
    pub offset: usize,
    /// Set once the store turns out to have no grid tables; docs then come
    /// straight from `keymap`.
    pub nogrids: bool,
}

impl Default for DocPointer {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            nogrids: false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        let names: Vec<_> = Table::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            [
                "images",
                "grid_utfgrid",
                "grid_key",
                "keymap",
                "geocoder_data",
                "metadata",
                "map"
            ]
        );
        assert_eq!(Table::ALL.last(), Some(&Table::Map));
    }

    #[test]
    fn test_table_columns() {
        assert!(Table::Map.has_column(Column::GridId));
        assert!(Table::Images.has_column(Column::TileData));
        assert!(!Table::Images.has_column(Column::GridId));
        assert!(!Table::Metadata.has_column(Column::TileId));
    }

    #[test]
    fn test_utfgrid_data_defaults_to_empty() {
        let grid: UtfGrid = serde_json::from_str(r#"{"grid":[" "],"keys":[""]}"#).unwrap();
        assert!(grid.data.is_empty());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(CoordStreamOptions::default().batch, 1000);
        assert_eq!(DocPointer::default().offset, 0);
        assert_eq!(PutOptions::with_key("abc").key.as_deref(), Some("abc"));
    }
}
