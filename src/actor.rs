//! # Store Actor
//!
//! One dedicated OS thread owns everything mutable about an open store: the
//! SQLite connection, the pending-write buffer, the write-session counter, and
//! the resolved-info cache. Async callers talk to it through a bounded channel;
//! every request carries a oneshot responder.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ ┌──────────┐ ┌──────────┐
//! │ MBTiles  │ │ MBTiles  │ │  Coord   │      (clones of one handle)
//! │ (clone)  │ │ (clone)  │ │  Stream  │
//! └────┬─────┘ └────┬─────┘ └────┬─────┘
//!      │            │            │
//!      └────────────┼────────────┘
//!                   │  mpsc (bounded), StoreRequest + oneshot
//!                   ▼
//!        ┌─────────────────────┐
//!        │   StoreActor thread │
//!        │                     │
//!        │  Database           │
//!        │  TileWriter         │
//!        │  info / format /    │
//!        │  file stat caches   │
//!        └──────────┬──────────┘
//!                   ▼
//!              ┌─────────┐
//!              │ SQLite  │
//!              └─────────┘
//! ```
//!
//! Requests are served strictly in arrival order. A commit requested while
//! another is running simply queues behind it, so commits are single-flight
//! without any locking.
//!
//! ## Shutdown
//!
//! `Close` flushes pending rows and ends the loop; the connection is dropped
//! with the actor. Requests sent afterwards fail with [`Error::NotOpen`], as do
//! requests that were still queued when the loop ended (their responders are
//! dropped).
//!
//! ## Rust Pattern: Blocking Receive
//!
//! The actor thread has no runtime of its own. `blocking_recv` parks the OS
//! thread until a request arrives, and oneshot senders work from sync code.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::codec::{FileStat, TileHeaders};
use crate::config::StoreConfig;
use crate::coord::TileCoord;
use crate::error::{Error, Result};
use crate::geocoder;
use crate::info::{self, TileInfo};
use crate::reader::{self, CoordPage, CoordSource};
use crate::schema::Database;
use crate::types::{DocPointer, PartialRow, PutOptions, Table, UtfGrid, WriterStats};
use crate::writer::TileWriter;

// =============================================================================
// Configuration
// =============================================================================

/// Maximum number of queued requests per store.
const REQUEST_CHANNEL_BOUND: usize = 1024;

/// Responder half carried by every request.
type Reply<T> = oneshot::Sender<Result<T>>;

// =============================================================================
// Requests
// =============================================================================

/// Everything the actor can be asked to do.
pub enum StoreRequest {
    GetTile {
        coord: TileCoord,
        reply: Reply<(Vec<u8>, TileHeaders)>,
    },
    GetGrid {
        coord: TileCoord,
        reply: Reply<(UtfGrid, TileHeaders)>,
    },
    GetInfo {
        reply: Reply<TileInfo>,
    },
    Metadata {
        key: String,
        reply: Reply<String>,
    },
    PutInfo {
        info: Map<String, Value>,
        reply: Reply<()>,
    },
    StartWriting {
        reply: Reply<()>,
    },
    StopWriting {
        reply: Reply<()>,
    },
    PutTile {
        coord: TileCoord,
        data: Vec<u8>,
        opts: PutOptions,
        reply: Reply<()>,
    },
    PutGrid {
        coord: TileCoord,
        grid: UtfGrid,
        opts: PutOptions,
        reply: Reply<()>,
    },
    Write {
        table: Table,
        key: String,
        row: PartialRow,
        reply: Reply<()>,
    },
    Commit {
        reply: Reply<()>,
    },
    WriterStats {
        reply: Reply<WriterStats>,
    },
    IntegrityCheck {
        reply: Reply<()>,
    },
    CoordinateSource {
        reply: Reply<CoordSource>,
    },
    ReadCoordinates {
        source: CoordSource,
        limit: usize,
        offset: usize,
        reply: Reply<Option<CoordPage>>,
    },
    PutGeocoderData {
        kind: String,
        shard: u32,
        data: Vec<u8>,
        reply: Reply<()>,
    },
    GetGeocoderData {
        kind: String,
        shard: u32,
        reply: Reply<Option<Vec<u8>>>,
    },
    GetIndexableDocs {
        pointer: DocPointer,
        reply: Reply<(Vec<Value>, DocPointer)>,
    },
    Close {
        reply: Reply<()>,
    },
}

// =============================================================================
// Actor
// =============================================================================

/// State owned by the actor thread.
struct StoreActor {
    db: Database,
    writer: TileWriter,
    /// Resolved info, cleared by `put_info`.
    info: Option<TileInfo>,
    /// Whether the store declares `format = pbf`, cleared by `put_info`.
    vector: Option<bool>,
    /// File size and mtime for response headers, cleared after writes.
    stat: Option<FileStat>,
    /// Shared with every handle; set before `Close` is answered.
    closed: Arc<AtomicBool>,
}

impl StoreActor {
    fn new(db: Database, config: StoreConfig, closed: Arc<AtomicBool>) -> Self {
        Self {
            db,
            writer: TileWriter::new(config.batch_size),
            info: None,
            vector: None,
            stat: None,
            closed,
        }
    }

    fn stat(&mut self) -> Result<FileStat> {
        if let Some(stat) = self.stat {
            return Ok(stat);
        }
        let stat = FileStat::read(self.db.path())?;
        self.stat = Some(stat);
        Ok(stat)
    }

    fn info(&mut self) -> Result<TileInfo> {
        if let Some(info) = &self.info {
            return Ok(info.clone());
        }
        let info = info::resolve_info(&self.db)?;
        self.info = Some(info.clone());
        Ok(info)
    }

    fn is_vector(&mut self) -> Result<bool> {
        if let Some(vector) = self.vector {
            return Ok(vector);
        }
        let vector = info::read_format(&self.db)?.as_deref() == Some("pbf");
        self.vector = Some(vector);
        Ok(vector)
    }

    /// Runs a mutating operation and drops the cached file stat. Info and
    /// format caches go too once a commit has written `metadata` rows.
    fn mutate<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        self.stat = None;
        if self.writer.take_metadata_changed() {
            self.info = None;
            self.vector = None;
        }
        result
    }

    fn put_info(&mut self, data: &Map<String, Value>) -> Result<()> {
        self.writer.require_writable()?;
        info::write_info(&self.db, data)?;
        self.info = None;
        self.vector = None;
        Ok(())
    }

    fn put_tile(&mut self, coord: TileCoord, data: &[u8], opts: &PutOptions) -> Result<()> {
        let deflate = self.is_vector()?;
        self.writer.put_tile(&self.db, coord, data, opts, deflate)
    }

    fn indexable_docs(&mut self, pointer: DocPointer) -> Result<(Vec<Value>, DocPointer)> {
        let maxzoom = if pointer.nogrids {
            None
        } else {
            self.info()?.maxzoom
        };
        geocoder::get_indexable_docs(&self.db, pointer, maxzoom)
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if !self.writer.state().is_writable() {
            return Ok(());
        }
        let result = self.writer.commit(&self.db);
        if let Err(e) = &result {
            warn!(path = %self.db.path().display(), error = %e, "flush on close failed");
        }
        result
    }

    /// Serves one request. Returns `false` once the store should shut down.
    fn handle(&mut self, request: StoreRequest) -> bool {
        match request {
            StoreRequest::GetTile { coord, reply } => {
                let result = self
                    .stat()
                    .and_then(|stat| reader::read_tile(&self.db, coord, &stat));
                let _ = reply.send(result);
            }
            StoreRequest::GetGrid { coord, reply } => {
                let result = self
                    .stat()
                    .and_then(|stat| reader::read_grid(&self.db, coord, &stat));
                let _ = reply.send(result);
            }
            StoreRequest::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            StoreRequest::Metadata { key, reply } => {
                let _ = reply.send(info::read_metadata(&self.db, &key));
            }
            StoreRequest::PutInfo { info, reply } => {
                let _ = reply.send(self.mutate(|s| s.put_info(&info)));
            }
            StoreRequest::StartWriting { reply } => {
                let _ = reply.send(self.mutate(|s| s.writer.start_writing(&s.db)));
            }
            StoreRequest::StopWriting { reply } => {
                let _ = reply.send(self.mutate(|s| s.writer.stop_writing(&s.db)));
            }
            StoreRequest::PutTile {
                coord,
                data,
                opts,
                reply,
            } => {
                let _ = reply.send(self.mutate(|s| s.put_tile(coord, &data, &opts)));
            }
            StoreRequest::PutGrid {
                coord,
                grid,
                opts,
                reply,
            } => {
                let _ = reply.send(self.mutate(|s| s.writer.put_grid(&s.db, coord, &grid, &opts)));
            }
            StoreRequest::Write {
                table,
                key,
                row,
                reply,
            } => {
                let _ = reply.send(self.mutate(|s| s.writer.write(&s.db, table, key, row)));
            }
            StoreRequest::Commit { reply } => {
                let _ = reply.send(self.mutate(|s| s.writer.commit(&s.db)));
            }
            StoreRequest::WriterStats { reply } => {
                let _ = reply.send(Ok(self.writer.stats()));
            }
            StoreRequest::IntegrityCheck { reply } => {
                let _ = reply.send(self.db.integrity_check());
            }
            StoreRequest::CoordinateSource { reply } => {
                let _ = reply.send(reader::coordinate_source(&self.db));
            }
            StoreRequest::ReadCoordinates {
                source,
                limit,
                offset,
                reply,
            } => {
                let _ = reply.send(reader::read_coordinates(&self.db, source, limit, offset));
            }
            StoreRequest::PutGeocoderData {
                kind,
                shard,
                data,
                reply,
            } => {
                let result = self.mutate(|s| {
                    geocoder::put_geocoder_data(&mut s.writer, &s.db, &kind, shard, &data)
                });
                let _ = reply.send(result);
            }
            StoreRequest::GetGeocoderData { kind, shard, reply } => {
                let _ = reply.send(geocoder::get_geocoder_data(&self.db, &kind, shard));
            }
            StoreRequest::GetIndexableDocs { pointer, reply } => {
                let _ = reply.send(self.indexable_docs(pointer));
            }
            StoreRequest::Close { reply } => {
                let _ = reply.send(self.close());
                return false;
            }
        }
        true
    }
}

/// The actor's main loop. Ends on `Close` or when every handle is dropped.
fn run_store_actor(mut actor: StoreActor, mut rx: mpsc::Receiver<StoreRequest>) {
    while let Some(request) = rx.blocking_recv() {
        if !actor.handle(request) {
            break;
        }
    }

    // Handles dropped without `close`: pending rows are still flushed.
    if actor.writer.state().is_writable() && actor.writer.stats().pending_ops > 0 {
        let _ = actor.close();
    }
    info!(path = %actor.db.path().display(), "store closed");
}

/// Opens the store file and spawns its actor thread.
///
/// Writable modes create the MBTiles schema first if it is absent.
pub fn spawn_store_actor(path: PathBuf, config: StoreConfig) -> Result<StoreHandle> {
    let db = Database::open(&path, config.mode)?;
    if config.mode.is_writable() {
        db.ensure_schema()?;
    }
    let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_BOUND);
    let closed = Arc::new(AtomicBool::new(false));
    let actor = StoreActor::new(db, config, closed.clone());

    std::thread::Builder::new()
        .name("mbtiles-store".to_string())
        .spawn(move || run_store_actor(actor, rx))?;

    debug!(path = %path.display(), batch = config.batch_size, "store actor spawned");
    Ok(StoreHandle { tx, closed })
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable sender side of a store actor.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreRequest>,
    closed: Arc<AtomicBool>,
}

impl StoreHandle {
    /// Sends a request and waits for its reply. A stopped actor is `NotOpen`.
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> StoreRequest) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| Error::NotOpen)?;
        response.await.map_err(|_| Error::NotOpen)?
    }

    pub async fn get_tile(&self, coord: TileCoord) -> Result<(Vec<u8>, TileHeaders)> {
        self.request(|reply| StoreRequest::GetTile { coord, reply }).await
    }

    pub async fn get_grid(&self, coord: TileCoord) -> Result<(UtfGrid, TileHeaders)> {
        self.request(|reply| StoreRequest::GetGrid { coord, reply }).await
    }

    pub async fn get_info(&self) -> Result<TileInfo> {
        self.request(|reply| StoreRequest::GetInfo { reply }).await
    }

    pub async fn metadata(&self, key: String) -> Result<String> {
        self.request(|reply| StoreRequest::Metadata { key, reply }).await
    }

    pub async fn put_info(&self, info: Map<String, Value>) -> Result<()> {
        self.request(|reply| StoreRequest::PutInfo { info, reply }).await
    }

    pub async fn start_writing(&self) -> Result<()> {
        self.request(|reply| StoreRequest::StartWriting { reply }).await
    }

    pub async fn stop_writing(&self) -> Result<()> {
        self.request(|reply| StoreRequest::StopWriting { reply }).await
    }

    pub async fn put_tile(&self, coord: TileCoord, data: Vec<u8>, opts: PutOptions) -> Result<()> {
        self.request(|reply| StoreRequest::PutTile {
            coord,
            data,
            opts,
            reply,
        })
        .await
    }

    pub async fn put_grid(&self, coord: TileCoord, grid: UtfGrid, opts: PutOptions) -> Result<()> {
        self.request(|reply| StoreRequest::PutGrid {
            coord,
            grid,
            opts,
            reply,
        })
        .await
    }

    pub async fn write(&self, table: Table, key: String, row: PartialRow) -> Result<()> {
        self.request(|reply| StoreRequest::Write {
            table,
            key,
            row,
            reply,
        })
        .await
    }

    pub async fn commit(&self) -> Result<()> {
        self.request(|reply| StoreRequest::Commit { reply }).await
    }

    pub async fn writer_stats(&self) -> Result<WriterStats> {
        self.request(|reply| StoreRequest::WriterStats { reply }).await
    }

    pub async fn integrity_check(&self) -> Result<()> {
        self.request(|reply| StoreRequest::IntegrityCheck { reply }).await
    }

    pub async fn coordinate_source(&self) -> Result<CoordSource> {
        self.request(|reply| StoreRequest::CoordinateSource { reply }).await
    }

    pub async fn read_coordinates(
        &self,
        source: CoordSource,
        limit: usize,
        offset: usize,
    ) -> Result<Option<CoordPage>> {
        self.request(|reply| StoreRequest::ReadCoordinates {
            source,
            limit,
            offset,
            reply,
        })
        .await
    }

    pub async fn put_geocoder_data(&self, kind: String, shard: u32, data: Vec<u8>) -> Result<()> {
        self.request(|reply| StoreRequest::PutGeocoderData {
            kind,
            shard,
            data,
            reply,
        })
        .await
    }

    pub async fn get_geocoder_data(&self, kind: String, shard: u32) -> Result<Option<Vec<u8>>> {
        self.request(|reply| StoreRequest::GetGeocoderData { kind, shard, reply })
            .await
    }

    pub async fn get_indexable_docs(&self, pointer: DocPointer) -> Result<(Vec<Value>, DocPointer)> {
        self.request(|reply| StoreRequest::GetIndexableDocs { pointer, reply })
            .await
    }

    pub async fn close(&self) -> Result<()> {
        self.request(|reply| StoreRequest::Close { reply }).await
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

// =============================================================================
// Tests
// =============================================================================
