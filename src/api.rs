//! # Async API for MBTiles Stores
//!
//! [`MBTiles`] is the public handle. Each method turns into one request on the
//! store actor's channel (see [`crate::actor`]); the actor thread owns the
//! connection and answers on a oneshot channel.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Tokio Runtime                            │
//! │                                                             │
//! │   task1 ─┐                                                  │
//! │   task2 ─┼── MBTiles (clones) ── tokio::sync::mpsc ──┐      │
//! │   task3 ─┘                                          │      │
//! └─────────────────────────────────────────────────────┼──────┘
//!                                                       ▼
//!                                      ┌─────────────────────────┐
//!                                      │  Dedicated OS Thread    │
//!                                      │  Database + TileWriter  │
//!                                      └─────────────────────────┘
//! ```
//!
//! ## Write Sessions
//!
//! Mutations are only accepted between `start_writing` and `stop_writing`.
//! Sessions nest: every `start_writing` must be paired with a `stop_writing`,
//! and the buffer is flushed on each `stop_writing`.
//!
//! ```ignore
//! let tiles = MBTiles::open("mbtiles:///data/world.mbtiles?batch=500").await?;
//! tiles.start_writing().await?;
//! tiles.put_tile(0, 0, 0, png, PutOptions::default()).await?;
//! tiles.stop_writing().await?;
//! ```
//!
//! ## Directory Helpers
//!
//! [`list`] maps tileset ids (file stems) to store URIs for every
//! `*.mbtiles` file in a directory, and [`find_id`] resolves a single id.
//!
//! ## Per-Path Sharing
//!
//! Opening the same file twice would create two actors racing on one SQLite
//! file. Hosts that open stores by URI keep a [`StoreRegistry`], which hands
//! back the existing handle for an already-open path.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::actor::{spawn_store_actor, StoreHandle};
use crate::codec::TileHeaders;
use crate::config::StoreUri;
use crate::coord::TileCoord;
use crate::error::{Error, Result};
use crate::info::TileInfo;
use crate::stream::CoordinateStream;
use crate::types::{CoordStreamOptions, DocPointer, PartialRow, PutOptions, Table, UtfGrid, WriterStats};

// =============================================================================
// MBTiles - The Main Async Handle
// =============================================================================

/// Async handle to one open MBTiles file.
///
/// # Thread Safety
///
/// `MBTiles` is `Clone`, `Send`, and `Sync`. All clones share one actor, one
/// pending-write buffer, and one write-session counter.
#[derive(Debug, Clone)]
pub struct MBTiles {
    handle: StoreHandle,
    uri: Arc<StoreUri>,
}

impl MBTiles {
    /// Opens a store from an `mbtiles://` URI or a bare path.
    ///
    /// Query options: `mode=ro|rw|rwc` (default `rwc`) and `batch=N`
    /// (default 100).
    pub async fn open(uri: &str) -> Result<Self> {
        Self::open_uri(StoreUri::parse(uri)?).await
    }

    /// Opens a store from an already-parsed URI.
    pub async fn open_uri(uri: StoreUri) -> Result<Self> {
        let handle = spawn_store_actor(uri.path.clone(), uri.config)?;
        Ok(Self {
            handle,
            uri: Arc::new(uri),
        })
    }

    pub fn uri(&self) -> &StoreUri {
        &self.uri
    }

    pub fn path(&self) -> &Path {
        self.uri.path()
    }

    /// Whether the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads the tile at an XYZ position.
    ///
    /// Absent tiles are [`Error::TileNotFound`]; present but unrecognizable
    /// bytes are [`Error::InvalidTile`].
    pub async fn get_tile(&self, z: u8, x: u32, y: u32) -> Result<(Vec<u8>, TileHeaders)> {
        self.handle.get_tile(TileCoord::new(z, x, y)).await
    }

    /// Reads the UTFGrid at an XYZ position, feature data attached.
    pub async fn get_grid(&self, z: u8, x: u32, y: u32) -> Result<(UtfGrid, TileHeaders)> {
        self.handle.get_grid(TileCoord::new(z, x, y)).await
    }

    /// Resolved tileset description, memoized until the next `put_info`.
    pub async fn get_info(&self) -> Result<TileInfo> {
        self.handle.get_info().await
    }

    /// Raw value of one `metadata` row.
    pub async fn metadata(&self, key: &str) -> Result<String> {
        self.handle.metadata(key.to_string()).await
    }

    /// Runs `PRAGMA quick_check`.
    pub async fn integrity_check(&self) -> Result<()> {
        self.handle.integrity_check().await
    }

    /// Streams every stored position as `z/x/y\n` chunks.
    pub fn coordinate_stream(&self, options: CoordStreamOptions) -> CoordinateStream {
        CoordinateStream::new(self.handle.clone(), options)
    }

    // =========================================================================
    // Write Sessions
    // =========================================================================

    pub async fn start_writing(&self) -> Result<()> {
        self.handle.start_writing().await
    }

    pub async fn stop_writing(&self) -> Result<()> {
        self.handle.stop_writing().await
    }

    /// Writes tileset metadata immediately, in its own transaction.
    pub async fn put_info(&self, info: Map<String, Value>) -> Result<()> {
        self.handle.put_info(info).await
    }

    /// Stages a tile. The call that reaches the batch threshold receives the
    /// resulting commit's outcome.
    pub async fn put_tile(
        &self,
        z: u8,
        x: u32,
        y: u32,
        data: impl Into<Vec<u8>>,
        opts: PutOptions,
    ) -> Result<()> {
        self.handle
            .put_tile(TileCoord::new(z, x, y), data.into(), opts)
            .await
    }

    /// Stages a UTFGrid with its keys and feature data.
    pub async fn put_grid(&self, z: u8, x: u32, y: u32, grid: UtfGrid, opts: PutOptions) -> Result<()> {
        self.handle.put_grid(TileCoord::new(z, x, y), grid, opts).await
    }

    /// Stages an arbitrary partial row.
    pub async fn write(&self, table: Table, row_key: impl Into<String>, row: PartialRow) -> Result<()> {
        self.handle.write(table, row_key.into(), row).await
    }

    /// Flushes every pending row in one transaction.
    pub async fn commit(&self) -> Result<()> {
        self.handle.commit().await
    }

    pub async fn writer_stats(&self) -> Result<WriterStats> {
        self.handle.writer_stats().await
    }

    // =========================================================================
    // Geocoder Storage
    // =========================================================================

    pub async fn put_geocoder_data(&self, kind: &str, shard: u32, data: impl Into<Vec<u8>>) -> Result<()> {
        self.handle
            .put_geocoder_data(kind.to_string(), shard, data.into())
            .await
    }

    pub async fn get_geocoder_data(&self, kind: &str, shard: u32) -> Result<Option<Vec<u8>>> {
        self.handle.get_geocoder_data(kind.to_string(), shard).await
    }

    /// One page of geocoder documents plus the pointer to the next page.
    pub async fn get_indexable_docs(&self, pointer: DocPointer) -> Result<(Vec<Value>, DocPointer)> {
        self.handle.get_indexable_docs(pointer).await
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Flushes pending rows and stops the actor. Every later call on any
    /// clone fails with [`Error::NotOpen`].
    pub async fn close(&self) -> Result<()> {
        self.handle.close().await
    }
}

// =============================================================================
// Directory Listing
// =============================================================================

fn tileset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([\w-]+)\.mbtiles$").expect("tileset pattern is valid"))
}

/// Maps tileset id to store URI for each `*.mbtiles` file in `dir`.
pub async fn list(dir: impl AsRef<Path>) -> Result<BTreeMap<String, String>> {
    let dir = tokio::fs::canonicalize(dir.as_ref()).await?;
    let mut entries = tokio::fs::read_dir(&dir).await?;
    let mut found = BTreeMap::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(caps) = tileset_pattern().captures(name) {
            let uri = StoreUri::from_path(dir.join(name));
            found.insert(caps[1].to_string(), uri.to_string());
        }
    }

    debug!(dir = %dir.display(), count = found.len(), "listed tilesets");
    Ok(found)
}

/// URI of the tileset `id` in `dir`, or [`Error::KeyNotFound`].
pub async fn find_id(dir: impl AsRef<Path>, id: &str) -> Result<String> {
    list(dir)
        .await?
        .remove(id)
        .ok_or_else(|| Error::KeyNotFound(id.to_string()))
}

// =============================================================================
// Store Registry
// =============================================================================

/// Shares one [`MBTiles`] per resolved file path.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: Mutex<HashMap<PathBuf, MBTiles>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the open handle for the URI's file, opening it if needed.
    ///
    /// The options of the first open win; a closed handle is replaced.
    pub async fn open(&self, uri: &str) -> Result<MBTiles> {
        let mut uri = StoreUri::parse(uri)?;
        uri.path = resolve_path(&uri.path).await;

        let mut stores = self.stores.lock().await;
        if let Some(existing) = stores.get(&uri.path) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
        }

        let path = uri.path.clone();
        let store = MBTiles::open_uri(uri).await?;
        stores.insert(path, store.clone());
        Ok(store)
    }

    /// Forgets the handle for `path` and returns it, if any.
    pub async fn remove(&self, path: impl AsRef<Path>) -> Option<MBTiles> {
        let path = resolve_path(path.as_ref()).await;
        self.stores.lock().await.remove(&path)
    }

    pub async fn len(&self) -> usize {
        self.stores.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.stores.lock().await.is_empty()
    }
}

/// Canonicalizes the parent directory so that relative and absolute spellings
/// of one file agree, whether or not the file exists yet.
async fn resolve_path(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match tokio::fs::canonicalize(parent).await {
        Ok(dir) => dir.join(name),
        Err(_) => path.to_path_buf(),
    }
}

// =============================================================================
// Tests
// =============================================================================
