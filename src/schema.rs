//! # SQLite Schema for MBTiles
//!
//! This module defines the MBTiles schema and the existence gate every read path
//! goes through.
//!
//! ## Table Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Schema Overview                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  map (TMS rows)             images              grid_utfgrid            │
//! │  ┌──────────────────┐       ┌──────────────┐    ┌──────────────────┐    │
//! │  │ zoom_level       │       │ tile_id (UQ) │    │ grid_id (UQ)     │    │
//! │  │ tile_column      │  ┌───►│ tile_data    │    │ grid_utfgrid     │    │
//! │  │ tile_row         │  │    └──────────────┘    └──────────────────┘    │
//! │  │ tile_id ─────────┼──┘                                 ▲              │
//! │  │ grid_id ─────────┼────────────────────────────────────┘              │
//! │  └──────────────────┘                                                   │
//! │                                                                         │
//! │  grid_key                   keymap              metadata                │
//! │  ┌──────────────────┐       ┌──────────────┐    ┌──────────────┐        │
//! │  │ grid_id          │       │ key_name (UQ)│    │ name (UQ)    │        │
//! │  │ key_name ────────┼──────►│ key_json     │    │ value        │        │
//! │  └──────────────────┘       └──────────────┘    └──────────────┘        │
//! │                                                                         │
//! │  geocoder_data: (type, shard) UQ → data BLOB                            │
//! │  views: tiles = map ⋈ images, grids = map ⋈ grid_utfgrid,               │
//! │         grid_data = map ⋈ grid_key ⋈ keymap                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### Why a `map` table plus content tables?
//!
//! Ocean and empty tiles repeat millions of times in a typical tileset. Storing
//! each distinct payload once in `images` (keyed by its content hash) and
//! pointing many `map` rows at it keeps files small. The `tiles` view restores
//! the flat layout readers expect.
//!
//! ### Why memoize table existence?
//!
//! Stores written by other tools may lack the grid tables, the geocoder table,
//! or even `metadata`. Every read checks the relevant name first so a missing
//! table reads as "absent" instead of an SQL error, and the check is a
//! `HashSet` lookup after the first query.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::OpenMode;
use crate::error::{Error, Result};

// =============================================================================
// DDL Statements
// =============================================================================

/// Deduplicated tile payloads.
///
/// # Columns
///
/// - `tile_data`: Raw tile bytes (PNG/JPEG/... or zlib-compressed protobuf)
/// - `tile_id`: MD5 hex of the payload, or a caller-supplied key
const CREATE_IMAGES: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    tile_data BLOB,
    tile_id   TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS images_id ON images (tile_id);
"#;

/// Maps tile positions (TMS rows) to content ids.
///
/// Either id may be NULL: a position can have a tile without a grid or the
/// other way round.
const CREATE_MAP: &str = r#"
CREATE TABLE IF NOT EXISTS map (
    zoom_level  INTEGER,
    tile_column INTEGER,
    tile_row    INTEGER,
    tile_id     TEXT,
    grid_id     TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS map_index ON map (zoom_level, tile_column, tile_row);
CREATE INDEX IF NOT EXISTS map_grid_id ON map (grid_id);
"#;

/// Deduplicated, zlib-compressed UTFGrid JSON.
const CREATE_GRID_UTFGRID: &str = r#"
CREATE TABLE IF NOT EXISTS grid_utfgrid (
    grid_id      TEXT,
    grid_utfgrid BLOB
);
CREATE UNIQUE INDEX IF NOT EXISTS grid_utfgrid_lookup ON grid_utfgrid (grid_id);
"#;

/// Which feature keys appear in which grid.
const CREATE_GRID_KEY: &str = r#"
CREATE TABLE IF NOT EXISTS grid_key (
    grid_id  TEXT,
    key_name TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS grid_key_lookup ON grid_key (grid_id, key_name);
"#;

/// Feature attributes as JSON text, one row per key.
const CREATE_KEYMAP: &str = r#"
CREATE TABLE IF NOT EXISTS keymap (
    key_name TEXT,
    key_json TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS keymap_lookup ON keymap (key_name);
"#;

/// Tileset metadata as text name/value pairs.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    name  TEXT,
    value TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS name ON metadata (name);
"#;

/// Opaque geocoder index shards, zlib-compressed.
const CREATE_GEOCODER_DATA: &str = r#"
CREATE TABLE IF NOT EXISTS geocoder_data (
    type  TEXT,
    shard INTEGER,
    data  BLOB
);
CREATE UNIQUE INDEX IF NOT EXISTS geocoder_type_index ON geocoder_data (type, shard);
"#;

/// Read-side views over the normalized tables.
const CREATE_VIEWS: &str = r#"
CREATE VIEW IF NOT EXISTS tiles AS
    SELECT
        map.zoom_level  AS zoom_level,
        map.tile_column AS tile_column,
        map.tile_row    AS tile_row,
        images.tile_data AS tile_data
    FROM map
    JOIN images ON images.tile_id = map.tile_id;

CREATE VIEW IF NOT EXISTS grids AS
    SELECT
        map.zoom_level  AS zoom_level,
        map.tile_column AS tile_column,
        map.tile_row    AS tile_row,
        grid_utfgrid.grid_utfgrid AS grid
    FROM map
    JOIN grid_utfgrid ON grid_utfgrid.grid_id = map.grid_id;

CREATE VIEW IF NOT EXISTS grid_data AS
    SELECT
        map.zoom_level  AS zoom_level,
        map.tile_column AS tile_column,
        map.tile_row    AS tile_row,
        keymap.key_name AS key_name,
        keymap.key_json AS key_json
    FROM map
    JOIN grid_key ON map.grid_id = grid_key.grid_id
    JOIN keymap ON grid_key.key_name = keymap.key_name;
"#;

/// Every DDL block, in creation order.
const SCHEMA: [&str; 8] = [
    CREATE_IMAGES,
    CREATE_MAP,
    CREATE_GRID_UTFGRID,
    CREATE_GRID_KEY,
    CREATE_KEYMAP,
    CREATE_METADATA,
    CREATE_GEOCODER_DATA,
    CREATE_VIEWS,
];

// =============================================================================
// Pragmas
// =============================================================================

/// Values for `PRAGMA synchronous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchronous {
    /// No fsync. Used for the duration of a write session.
    Off,
    /// SQLite's default durability.
    Normal,
}

impl Synchronous {
    fn pragma(self) -> &'static str {
        match self {
            Synchronous::Off => "PRAGMA synchronous = OFF",
            Synchronous::Normal => "PRAGMA synchronous = NORMAL",
        }
    }
}

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection to an MBTiles file plus the memoized table list.
///
/// # Rust Pattern: Interior Mutability for a Cache
///
/// The table list is filled lazily on the first `table_exists` call. Wrapping it
/// in a `RefCell` lets read paths take `&Database` while still populating the
/// cache. `Database` is owned by exactly one thread, so `RefCell` (not `Mutex`)
/// is enough.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    path: PathBuf,
    mode: OpenMode,
    tables: RefCell<Option<HashSet<String>>>,
}

impl Database {
    /// Opens an MBTiles file.
    ///
    /// No schema is created here; see [`Database::ensure_schema`].
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file is missing in `ro`/`rw` mode or cannot be
    ///   opened
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, mode.open_flags())?;
        info!(path = %path.display(), mode = mode.as_str(), "opened mbtiles");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            mode,
            tables: RefCell::new(None),
        })
    }

    /// Creates an in-memory database for testing.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_with_flags(
            ":memory:",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
            mode: OpenMode::ReadWriteCreate,
            tables: RefCell::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Existence Gate
    // =========================================================================

    /// True when a table **or view** called `name` exists.
    ///
    /// The first call lists `sqlite_master`; later calls are served from the
    /// cache until [`Database::refresh_tables`].
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        if let Some(tables) = self.tables.borrow().as_ref() {
            return Ok(tables.contains(name));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'view')")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;

        let exists = names.contains(name);
        *self.tables.borrow_mut() = Some(names);
        Ok(exists)
    }

    /// Drops the memoized table list.
    pub fn refresh_tables(&self) {
        self.tables.borrow_mut().take();
    }

    // =========================================================================
    // Schema Setup
    // =========================================================================

    /// Creates the MBTiles tables, indexes, and views if `tiles` is absent.
    ///
    /// Every statement is `IF NOT EXISTS`, so a partially created schema is
    /// completed without touching existing rows.
    ///
    /// # Returns
    ///
    /// `true` when the DDL ran.
    pub fn ensure_schema(&self) -> Result<bool> {
        if self.table_exists("tiles")? {
            return Ok(false);
        }

        for ddl in SCHEMA {
            self.conn.execute_batch(ddl)?;
        }
        self.refresh_tables();

        debug!(path = %self.path.display(), "created mbtiles schema");
        Ok(true)
    }

    /// Runs `PRAGMA quick_check(1)`.
    ///
    /// # Errors
    ///
    /// `Error::Corrupted` for any result other than `ok`, including the check
    /// itself failing.
    pub fn integrity_check(&self) -> Result<()> {
        let result: std::result::Result<String, _> =
            self.conn
                .query_row("PRAGMA quick_check(1)", [], |row| row.get(0));
        match result {
            Ok(status) if status == "ok" => Ok(()),
            Ok(status) => Err(Error::Corrupted(status)),
            Err(e) => Err(Error::Corrupted(e.to_string())),
        }
    }

    /// Sets `PRAGMA synchronous`.
    pub fn set_synchronous(&self, level: Synchronous) -> Result<()> {
        self.conn.execute_batch(level.pragma())?;
        Ok(())
    }

    /// Reads back `PRAGMA synchronous` (0 = OFF, 1 = NORMAL, 2 = FULL).
    pub fn synchronous(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA synchronous", [], |row| row.get(0))?)
    }

    /// Current size of the database file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
