//! # mbtiles-store - MBTiles Tile Store
//!
//! A tile store for raster and vector map tiles and UTFGrid interactivity data,
//! kept in a single MBTiles file (a conventional schema over SQLite). It provides:
//!
//! - **Content-addressed storage**: tiles and grids are keyed by the MD5 of
//!   their content, so identical tiles are stored once
//! - **Batched writes**: a coalescing write-back cache flushed in one
//!   transaction when a pending-operation threshold is reached
//! - **XYZ addressing**: callers use XYZ rows; the file stores TMS rows
//! - **Resolved metadata**: explicit metadata merged with derived zoom range,
//!   bounds, and center
//! - **Streaming enumeration**: every stored position as `z/x/y` lines, read
//!   page by page
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Async API Layer                          │
//! │         (MBTiles, CoordinateStream, list, StoreRegistry)        │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ mpsc + oneshot
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Store Actor                             │
//! │              (single thread, owns the connection)               │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │ TileWriter  │  │   Reader    │  │  Metadata Resolver      │  │
//! │  │ (buffer +   │  │ (tiles,     │  │  (info cache, format)   │  │
//! │  │  commit)    │  │  grids)     │  │                         │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      SQLite (MBTiles)                           │
//! │   images · map · grid_utfgrid · grid_key · keymap · metadata    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Stored rows are TMS**: `tile_row = 2^z - 1 - y` for every XYZ `y`
//! 2. **Content ids are stable**: the same bytes (or the same grid content)
//!    always produce the same id
//! 3. **Partial map rows never clobber**: writing a tile leaves the grid id of
//!    the same position untouched, and the other way round
//! 4. **Commits are single-flight**: the actor serves one request at a time
//! 5. **Absent is not invalid**: a missing tile is `TileNotFound`, never
//!   `InvalidTile`
//!
//! ## Module Organization
//!
//! - [`error`]: Error taxonomy
//! - [`coord`]: XYZ/TMS transform and Web Mercator helpers
//! - [`codec`]: Content ids, compression, type sniffing, response headers
//! - [`schema`]: DDL, table-existence gate, integrity check
//! - [`writer`]: Write-back cache and commit engine
//! - [`reader`]: Tile, grid, and coordinate reads
//! - [`info`]: Metadata resolver
//! - [`geocoder`]: Geocoder shard storage and indexable documents
//! - [`actor`]: The thread that owns a store
//! - [`stream`]: Coordinate stream
//! - [`api`]: Async API (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for tile store operations.
pub mod error;

/// Store URIs and open options.
pub mod config;

/// Tile coordinates, the XYZ/TMS flip, and Web Mercator projection.
pub mod coord;

/// Shared value types: tables, columns, grids, options.
pub mod types;

/// Content ids, zlib/gzip, tile type detection, and HTTP header values.
pub mod codec;

/// MBTiles DDL and the SQLite connection wrapper.
pub mod schema;

/// Write-back cache with threshold-triggered commits.
///
/// Pending rows are coalesced per table and row key, then flushed in one
/// `BEGIN IMMEDIATE` transaction. `map` rows use a three-way upsert so a tile
/// write never erases a grid id and the other way round.
pub mod writer;

/// Tile, grid, and coordinate-page reads.
pub mod reader;

/// Metadata resolution with derived zoom range, bounds, and center.
pub mod info;

/// Geocoder index shards and indexable documents.
pub mod geocoder;

/// The per-store actor thread and its request channel.
pub mod actor;

/// Lazily paged coordinate stream.
pub mod stream;

/// Async API for MBTiles stores.
///
/// The main entry point is [`MBTiles`](api::MBTiles).
pub mod api;

/// `tracing-subscriber` setup for binaries.
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::{find_id, list, MBTiles, StoreRegistry};
pub use codec::TileHeaders;
pub use config::{OpenMode, StoreConfig, StoreUri};
pub use coord::TileCoord;
pub use error::{Error, Result};
pub use info::TileInfo;
pub use stream::CoordinateStream;
pub use types::{
    Column, CoordStreamOptions, DocPointer, PartialRow, PutOptions, Table, UtfGrid, WriterStats,
};
pub use writer::StoreState;
