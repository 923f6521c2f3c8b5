//! # Tile and Grid Reader
//!
//! Read operations for the store. Every function here goes through the schema
//! gate first, so a store without grid tables (or without any tables at all)
//! reports "not found" instead of an SQL error.
//!
//! ## Lookup Path
//!
//! ```text
//! get_tile(z, x, y_xyz)
//!     │
//!     ├─ out of pyramid? ─────────────► TileNotFound
//!     ├─ no `tiles` view? ────────────► TileNotFound
//!     ├─ no row / NULL data? ─────────► TileNotFound
//!     ├─ zlib/gzip? ── inflate ──┬───► (bytes, application/x-protobuf)
//!     │                          └───► InvalidTile (inflate failed)
//!     └─ sniff signature ────────┬───► (bytes, image/png | ...)
//!                                └───► InvalidTile (empty / unknown)
//! ```
//!
//! The two error classes never overlap: a tile that is absent is never invalid.

use rusqlite::{params, OptionalExtension};
use tracing::warn;

use crate::codec::{self, Compression, FileStat, TileFormat, TileHeaders};
use crate::coord::TileCoord;
use crate::error::{Error, Result};
use crate::schema::Database;
use crate::types::UtfGrid;

// =============================================================================
// Tiles
// =============================================================================

/// Reads the tile at an XYZ position.
///
/// Compressed payloads are inflated and reported as protobuf with no content
/// encoding.
pub fn read_tile(db: &Database, coord: TileCoord, stat: &FileStat) -> Result<(Vec<u8>, TileHeaders)> {
    let Ok((z, x, y)) = coord.to_storage_row() else {
        return Err(Error::TileNotFound);
    };
    if !db.table_exists("tiles")? {
        return Err(Error::TileNotFound);
    }

    let data: Option<Vec<u8>> = db
        .conn()
        .prepare_cached(
            "SELECT tile_data FROM tiles \
             WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
        )?
        .query_row(params![z, x, y], |row| row.get::<_, Option<Vec<u8>>>(0))
        .optional()?
        .flatten();

    let data = data.ok_or(Error::TileNotFound)?;

    if Compression::detect(&data).is_some() {
        let inflated = codec::inflate_any(&data).map_err(|_| Error::InvalidTile)?;
        return Ok((inflated, TileHeaders::for_tile(TileFormat::Pbf, stat)));
    }

    let format = TileFormat::detect(&data)?;
    Ok((data, TileHeaders::for_tile(format, stat)))
}

// =============================================================================
// Grids
// =============================================================================

/// Reads the UTFGrid at an XYZ position, with its feature data attached.
///
/// Feature data comes from the `grid_data` view when it exists; a store without
/// it returns the bare grid.
pub fn read_grid(db: &Database, coord: TileCoord, stat: &FileStat) -> Result<(UtfGrid, TileHeaders)> {
    let Ok((z, x, y)) = coord.to_storage_row() else {
        return Err(Error::GridNotFound);
    };
    if !db.table_exists("grids")? {
        return Err(Error::GridNotFound);
    }

    let blob: Option<Vec<u8>> = db
        .conn()
        .prepare_cached(
            "SELECT grid FROM grids \
             WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
        )?
        .query_row(params![z, x, y], |row| row.get::<_, Option<Vec<u8>>>(0))
        .optional()?
        .flatten();

    let blob = blob.ok_or(Error::GridNotFound)?;
    let mut grid = codec::decompress_grid(&blob)?;

    if db.table_exists("grid_data")? {
        let mut stmt = db.conn().prepare_cached(
            "SELECT key_name, key_json FROM grid_data \
             WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
        )?;
        let rows = stmt.query_map(params![z, x, y], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, json) = row?;
            let value = serde_json::from_str(&json)
                .map_err(|e| Error::InvalidGrid(format!("feature {key}: {e}")))?;
            grid.data.insert(key, value);
        }
    }

    Ok((grid, TileHeaders::for_grid(stat)))
}

// =============================================================================
// Coordinate Batches
// =============================================================================

/// Table the coordinate stream reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordSource {
    /// The indexed `map` table.
    Map,
    /// The `tiles` table or view, for stores without an indexed `map`.
    Tiles,
}

impl CoordSource {
    pub fn table_name(self) -> &'static str {
        match self {
            CoordSource::Map => "map",
            CoordSource::Tiles => "tiles",
        }
    }
}

/// Picks `map` when it carries an index, `tiles` otherwise.
pub fn coordinate_source(db: &Database) -> Result<CoordSource> {
    let indexes: i64 = db.conn().query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'map'",
        [],
        |row| row.get(0),
    )?;
    Ok(if indexes >= 1 {
        CoordSource::Map
    } else {
        CoordSource::Tiles
    })
}

/// One page of the coordinate enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordPage {
    /// Positions inside the pyramid, in XYZ order.
    pub coords: Vec<TileCoord>,
    /// Rows scanned, including skipped ones. Zero means the table is exhausted.
    pub rows: usize,
}

/// Reads one page of tile positions, converted to XYZ.
///
/// Rows that do not name a tile inside the pyramid are skipped with a warning
/// but still count towards `rows`, so paging stays aligned with the table.
/// Returns `None` when the source table does not exist.
pub fn read_coordinates(
    db: &Database,
    source: CoordSource,
    limit: usize,
    offset: usize,
) -> Result<Option<CoordPage>> {
    if !db.table_exists(source.table_name())? {
        return Ok(None);
    }

    let sql = format!(
        "SELECT zoom_level, tile_column, tile_row FROM {} LIMIT ?1 OFFSET ?2",
        source.table_name()
    );
    let mut stmt = db.conn().prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![limit as i64, offset as i64], |row| {
            Ok((
                row.get::<_, Option<i64>>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let table = source.table_name();
    let mut coords = Vec::with_capacity(rows.len());
    for &(z, x, y) in &rows {
        let (Some(z), Some(x), Some(y)) = (z, x, y) else {
            warn!(table, "skipping row with NULL position");
            continue;
        };
        match TileCoord::from_storage_row(z, x, y) {
            Some(coord) => coords.push(coord),
            None => warn!(table, z, x, y, "skipping row outside the tile pyramid"),
        }
    }
    Ok(Some(CoordPage {
        coords,
        rows: rows.len(),
    }))
}

// =============================================================================
// Tests
// =============================================================================
