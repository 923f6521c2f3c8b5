//! # Write-Back Cache and Commit Engine
//!
//! Mutations are not written to SQLite as they arrive. They are merged into an
//! in-memory buffer of partial rows and flushed in one transaction once enough
//! operations have accumulated (or on `commit`/`stop_writing`/`close`).
//!
//! ## Why Batch?
//!
//! SQLite's write cost is dominated by the per-transaction journal sync. A
//! tileset import issues hundreds of thousands of small writes; batching them
//! amortizes the sync:
//!
//! ```text
//! Without batching:                   With batching (batch = 100):
//! ┌────────────────────────────┐     ┌────────────────────────────┐
//! │ put_tile → BEGIN → COMMIT  │     │ put_tile ┐                 │
//! │ put_tile → BEGIN → COMMIT  │     │ put_tile ├─ buffered       │
//! │ put_grid → BEGIN → COMMIT  │     │ put_grid ┘                 │
//! │ ...                        │     │ BEGIN IMMEDIATE            │
//! │ 100 transactions           │     │   INSERT OR REPLACE ...    │
//! └────────────────────────────┘     │ COMMIT (1 transaction)     │
//!                                    └────────────────────────────┘
//! ```
//!
//! ## Coalescing
//!
//! Pending rows are keyed by `(table, row_key)`. A second write to the same key
//! merges into the first, column by column:
//!
//! ```text
//! put_tile(1/0/0)  → map["1/0/1"] = { tile_id }
//! put_grid(1/0/0)  → map["1/0/1"] = { tile_id, grid_id }
//! ```
//!
//! ## The Three-Way `map` Upsert
//!
//! A `map` row may be staged with only `tile_id`, only `grid_id`, or both. One
//! statement shape covers all three: each content column is either bound from
//! the staged value or preserved with a sub-select of the existing row.
//!
//! ```sql
//! REPLACE INTO map (zoom_level, tile_column, tile_row, tile_id, grid_id)
//! VALUES (:z, :x, :y,
//!         :tile_id,                                   -- staged
//!         (SELECT grid_id FROM map WHERE ...))        -- preserved
//! ```
//!
//! ## Invariants
//!
//! - A failed commit rolls back completely; the drained batch is discarded
//! - Commits are single-flight (the owning actor is sequential)
//! - Content rows are keyed by content id, so identical payloads never duplicate

use std::collections::BTreeMap;
use std::num::NonZeroU32;

use rusqlite::types::Value;
use rusqlite::ToSql;
use tracing::{debug, error, info};

use crate::codec;
use crate::coord::TileCoord;
use crate::error::{Error, Result};
use crate::schema::{Database, Synchronous};
use crate::types::{Column, PartialRow, PutOptions, Table, UtfGrid, WriterStats};

// =============================================================================
// Store State
// =============================================================================

/// Write-session state of an open store.
///
/// A closed store has no state at all: its actor has exited and every request
/// fails with `Error::NotOpen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// No write session is active. Reads only.
    ReadOnly,
    /// At least one write session is active. Sessions nest; the count says how
    /// many `stop_writing` calls remain.
    Writable(NonZeroU32),
}

impl StoreState {
    pub fn is_writable(self) -> bool {
        matches!(self, StoreState::Writable(_))
    }

    /// Number of open write sessions.
    pub fn sessions(self) -> u32 {
        match self {
            StoreState::ReadOnly => 0,
            StoreState::Writable(n) => n.get(),
        }
    }
}

// =============================================================================
// Pending Writes
// =============================================================================

/// The buffer of staged partial rows.
#[derive(Debug, Default)]
struct PendingWrites {
    rows: BTreeMap<Table, BTreeMap<String, PartialRow>>,
    /// Public write operations since the last commit.
    ops: usize,
}

impl PendingWrites {
    /// Merges `row` into the pending row for `(table, key)`.
    fn merge(&mut self, table: Table, key: String, row: PartialRow) {
        self.rows
            .entry(table)
            .or_default()
            .entry(key)
            .or_default()
            .extend(row);
    }

    fn row_count(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.rows.values().all(BTreeMap::is_empty)
    }
}

// =============================================================================
// Tile Writer
// =============================================================================

/// Owns the write-session state and the pending buffer for one store.
///
/// All methods take the [`Database`] they operate on; the writer itself holds no
/// connection. Owned by the store actor, so no locking is needed.
#[derive(Debug)]
pub struct TileWriter {
    state: StoreState,
    pending: PendingWrites,
    batch_size: usize,
    commits: u64,
    /// Set when a commit wrote `metadata` rows; cleared by
    /// [`TileWriter::take_metadata_changed`].
    metadata_changed: bool,
}

impl TileWriter {
    /// Creates a writer that commits automatically every `batch_size` operations.
    pub fn new(batch_size: usize) -> Self {
        Self {
            state: StoreState::ReadOnly,
            pending: PendingWrites::default(),
            batch_size: batch_size.max(1),
            commits: 0,
            metadata_changed: false,
        }
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            pending_ops: self.pending.ops,
            commits: self.commits,
        }
    }

    /// True once per commit that wrote `metadata` rows since the last call.
    pub fn take_metadata_changed(&mut self) -> bool {
        std::mem::take(&mut self.metadata_changed)
    }

    /// Fails with `NotWritable` outside a write session.
    pub fn require_writable(&self) -> Result<()> {
        if self.state.is_writable() {
            Ok(())
        } else {
            Err(Error::NotWritable)
        }
    }

    // =========================================================================
    // Write Sessions
    // =========================================================================

    /// Opens a (possibly nested) write session.
    ///
    /// The first session creates the schema if needed and turns off
    /// `PRAGMA synchronous` for the duration of the import.
    pub fn start_writing(&mut self, db: &Database) -> Result<()> {
        if !db.mode().is_writable() {
            return Err(Error::ReadOnly);
        }

        self.state = match self.state {
            StoreState::ReadOnly => {
                db.ensure_schema()?;
                db.set_synchronous(Synchronous::Off)?;
                info!(path = %db.path().display(), "write session started");
                StoreState::Writable(NonZeroU32::MIN)
            }
            StoreState::Writable(n) => StoreState::Writable(n.saturating_add(1)),
        };
        Ok(())
    }

    /// Flushes pending writes and closes one write session.
    ///
    /// Closing the last session restores `PRAGMA synchronous = NORMAL`. If the
    /// flush fails the session stays open and the error is returned.
    pub fn stop_writing(&mut self, db: &Database) -> Result<()> {
        let StoreState::Writable(n) = self.state else {
            return Err(Error::NotWritable);
        };

        self.commit(db)?;

        self.state = match NonZeroU32::new(n.get() - 1) {
            Some(rest) => StoreState::Writable(rest),
            None => {
                db.set_synchronous(Synchronous::Normal)?;
                info!(path = %db.path().display(), "write session finished");
                StoreState::ReadOnly
            }
        };
        Ok(())
    }

    // =========================================================================
    // Staging
    // =========================================================================

    /// Merges a partial row into the buffer without counting an operation.
    ///
    /// Callers that stage several rows for one logical write (`put_tile`,
    /// `put_grid`) call [`TileWriter::finish_op`] once afterwards.
    pub fn stage(&mut self, table: Table, key: impl Into<String>, row: PartialRow) {
        self.pending.merge(table, key.into(), row);
    }

    /// Counts one public operation and commits if the threshold is reached.
    ///
    /// The commit's result is this call's result.
    pub fn finish_op(&mut self, db: &Database) -> Result<()> {
        self.pending.ops += 1;
        if self.pending.ops >= self.batch_size {
            self.commit(db)
        } else {
            Ok(())
        }
    }

    /// Stages an arbitrary partial row for `table`.
    ///
    /// Columns must belong to the table; `map` rows must carry their position.
    pub fn write(
        &mut self,
        db: &Database,
        table: Table,
        row_key: impl Into<String>,
        row: PartialRow,
    ) -> Result<()> {
        self.require_writable()?;

        if let Some(bad) = row.keys().find(|c| !table.has_column(**c)) {
            return Err(Error::Sqlite(rusqlite::Error::InvalidColumnName(format!(
                "{table}.{bad}"
            ))));
        }
        if table == Table::Map {
            for position in [Column::ZoomLevel, Column::TileColumn, Column::TileRow] {
                if !row.contains_key(&position) {
                    return Err(Error::Sqlite(rusqlite::Error::InvalidColumnName(
                        format!("map.{position}"),
                    )));
                }
            }
        }

        self.stage(table, row_key, row);
        self.finish_op(db)
    }

    /// Stages a tile: its `images` row and the `tile_id` of its `map` row.
    ///
    /// With `deflate` set (vector stores) an uncompressed payload is
    /// zlib-compressed before storage. The content id always hashes the bytes
    /// as given.
    pub fn put_tile(
        &mut self,
        db: &Database,
        coord: TileCoord,
        data: &[u8],
        opts: &PutOptions,
        deflate: bool,
    ) -> Result<()> {
        self.require_writable()?;
        let position = coord.to_storage_row()?;

        let tile_id = opts.key.clone().unwrap_or_else(|| codec::tile_id(data));
        let stored = if deflate && codec::Compression::detect(data).is_none() {
            codec::deflate(data)?
        } else {
            data.to_vec()
        };

        self.stage(
            Table::Images,
            tile_id.clone(),
            PartialRow::from([
                (Column::TileId, Value::Text(tile_id.clone())),
                (Column::TileData, Value::Blob(stored)),
            ]),
        );
        self.stage(Table::Map, map_key(position), map_row(position, Column::TileId, tile_id));
        self.finish_op(db)
    }

    /// Stages a UTFGrid: the compressed grid, its key index, its feature data,
    /// and the `grid_id` of its `map` row.
    pub fn put_grid(
        &mut self,
        db: &Database,
        coord: TileCoord,
        grid: &UtfGrid,
        opts: &PutOptions,
    ) -> Result<()> {
        self.require_writable()?;
        let position = coord.to_storage_row()?;

        let grid_id = match &opts.key {
            Some(key) => key.clone(),
            None => codec::grid_id(grid)?,
        };
        let blob = codec::compress_grid(grid)?;

        self.stage(
            Table::GridUtfgrid,
            grid_id.clone(),
            PartialRow::from([
                (Column::GridId, Value::Text(grid_id.clone())),
                (Column::GridUtfgrid, Value::Blob(blob)),
            ]),
        );

        for key in &grid.keys {
            self.stage(
                Table::GridKey,
                format!("{grid_id}/{key}"),
                PartialRow::from([
                    (Column::GridId, Value::Text(grid_id.clone())),
                    (Column::KeyName, Value::Text(key.clone())),
                ]),
            );
        }

        for (key, feature) in &grid.data {
            self.stage(
                Table::Keymap,
                key.clone(),
                PartialRow::from([
                    (Column::KeyName, Value::Text(key.clone())),
                    (Column::KeyJson, Value::Text(serde_json::to_string(feature)?)),
                ]),
            );
        }

        self.stage(Table::Map, map_key(position), map_row(position, Column::GridId, grid_id));
        self.finish_op(db)
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Writes every pending row in one transaction.
    ///
    /// The buffer is drained before writing: on failure the transaction is
    /// rolled back, the batch is discarded, and the error is returned.
    pub fn commit(&mut self, db: &Database) -> Result<()> {
        let batch = std::mem::take(&mut self.pending);
        if batch.is_empty() {
            return Ok(());
        }

        self.commits += 1;
        let rows = batch.row_count();

        match execute_commit(db, &batch) {
            Ok(()) => {
                self.metadata_changed |= batch.rows.contains_key(&Table::Metadata);
                debug!(
                    ops = batch.ops,
                    rows,
                    tables = ?batch
                        .rows
                        .iter()
                        .map(|(t, r)| (t.name(), r.len()))
                        .collect::<Vec<_>>(),
                    "committed pending writes"
                );
                Ok(())
            }
            Err(e) => {
                error!(ops = batch.ops, rows, error = %e, "commit rolled back");
                Err(e)
            }
        }
    }
}

/// Write-back cache key of a `map` row, from its storage triple.
fn map_key((z, x, y): (u8, u32, u32)) -> String {
    format!("{z}/{x}/{y}")
}

/// A `map` partial row carrying one content column.
fn map_row((z, x, y): (u8, u32, u32), column: Column, id: String) -> PartialRow {
    PartialRow::from([
        (Column::ZoomLevel, Value::Integer(i64::from(z))),
        (Column::TileColumn, Value::Integer(i64::from(x))),
        (Column::TileRow, Value::Integer(i64::from(y))),
        (column, Value::Text(id)),
    ])
}

/// Runs the batch inside `BEGIN IMMEDIATE … COMMIT`.
///
/// Uses raw SQL for the transaction so the connection can stay behind `&self`.
fn execute_commit(db: &Database, batch: &PendingWrites) -> Result<()> {
    let conn = db.conn();
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = Table::ALL.iter().try_for_each(|table| {
        let Some(rows) = batch.rows.get(table) else {
            return Ok(());
        };
        rows.values().try_for_each(|row| match table {
            Table::Map => upsert_map_row(db, row),
            other => replace_row(db, *other, row),
        })
    });

    let result = result.and_then(|()| conn.execute_batch("COMMIT").map_err(Error::from));
    if result.is_err() {
        let _ = conn.execute_batch("ROLLBACK");
    }
    result
}

/// `INSERT OR REPLACE` of one row into a content table.
fn replace_row(db: &Database, table: Table, row: &PartialRow) -> Result<()> {
    let columns: Vec<&str> = row.keys().map(|c| c.as_str()).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        table.name(),
        columns.join(", "),
        placeholders.join(", ")
    );

    let mut stmt = db.conn().prepare_cached(&sql)?;
    stmt.execute(rusqlite::params_from_iter(row.values()))?;
    Ok(())
}

/// The three-way `map` upsert: staged content ids are bound, missing ones are
/// carried over from the existing row.
fn upsert_map_row(db: &Database, row: &PartialRow) -> Result<()> {
    let value_expr = |column: Column| {
        if row.contains_key(&column) {
            format!(":{}", column.as_str())
        } else {
            format!(
                "(SELECT {c} FROM map WHERE zoom_level = :zoom_level \
                 AND tile_column = :tile_column AND tile_row = :tile_row)",
                c = column.as_str()
            )
        }
    };
    let sql = format!(
        "REPLACE INTO map (zoom_level, tile_column, tile_row, tile_id, grid_id) \
         VALUES (:zoom_level, :tile_column, :tile_row, {}, {})",
        value_expr(Column::TileId),
        value_expr(Column::GridId)
    );

    let names: Vec<String> = row.keys().map(|c| format!(":{}", c.as_str())).collect();
    let params: Vec<(&str, &dyn ToSql)> = names
        .iter()
        .zip(row.values())
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect();

    let mut stmt = db.conn().prepare_cached(&sql)?;
    stmt.execute(params.as_slice())?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn writable_db() -> (Database, TileWriter) {
        let db = Database::open_in_memory().unwrap();
        let mut writer = TileWriter::new(100);
        writer.start_writing(&db).unwrap();
        (db, writer)
    }

    fn map_ids(db: &Database, z: u8, x: u32, y_tms: u32) -> (Option<String>, Option<String>) {
        db.conn()
            .query_row(
                "SELECT tile_id, grid_id FROM map \
                 WHERE zoom_level = ? AND tile_column = ? AND tile_row = ?",
                rusqlite::params![z, x, y_tms],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap()
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    fn grid(keys: &[&str]) -> UtfGrid {
        UtfGrid {
            grid: vec!["!".to_string()],
            keys: keys.iter().map(|k| k.to_string()).collect(),
            data: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_write_requires_session() {
        let db = Database::open_in_memory().unwrap();
        let mut writer = TileWriter::new(10);

        let err = writer
            .put_tile(&db, TileCoord::new(0, 0, 0), b"x", &PutOptions::default(), false)
            .unwrap_err();
        assert!(matches!(err, Error::NotWritable));
        assert!(matches!(writer.stop_writing(&db), Err(Error::NotWritable)));
    }

    #[test]
    fn test_nested_sessions() {
        let (db, mut writer) = writable_db();
        writer.start_writing(&db).unwrap();
        assert_eq!(writer.state().sessions(), 2);
        assert_eq!(db.synchronous().unwrap(), 0);

        // Inner stop keeps durability off.
        writer.stop_writing(&db).unwrap();
        assert!(writer.state().is_writable());
        assert_eq!(db.synchronous().unwrap(), 0);

        writer.stop_writing(&db).unwrap();
        assert_eq!(writer.state(), StoreState::ReadOnly);
        assert_eq!(db.synchronous().unwrap(), 1);

        assert!(matches!(writer.stop_writing(&db), Err(Error::NotWritable)));
        assert_eq!(db.synchronous().unwrap(), 1);
    }

    #[test]
    fn test_tile_then_grid_keeps_both() {
        let (db, mut writer) = writable_db();
        let coord = TileCoord::new(1, 0, 0);

        writer
            .put_tile(&db, coord, b"tile", &PutOptions::default(), false)
            .unwrap();
        writer.commit(&db).unwrap();
        writer
            .put_grid(&db, coord, &grid(&["a"]), &PutOptions::default())
            .unwrap();
        writer.commit(&db).unwrap();

        let (tile_id, grid_id) = map_ids(&db, 1, 0, 1);
        assert_eq!(tile_id.as_deref(), Some(codec::tile_id(b"tile").as_str()));
        assert_eq!(grid_id, Some(codec::grid_id(&grid(&["a"])).unwrap()));
    }

    #[test]
    fn test_coalesced_tile_and_grid_in_one_batch() {
        let (db, mut writer) = writable_db();
        let coord = TileCoord::new(2, 1, 1);

        writer
            .put_grid(&db, coord, &grid(&["a"]), &PutOptions::with_key("g1"))
            .unwrap();
        writer
            .put_tile(&db, coord, b"t", &PutOptions::with_key("t1"), false)
            .unwrap();
        assert_eq!(writer.stats().pending_ops, 2);
        writer.commit(&db).unwrap();

        let (tile_id, grid_id) = map_ids(&db, 2, 1, 2);
        assert_eq!(tile_id.as_deref(), Some("t1"));
        assert_eq!(grid_id.as_deref(), Some("g1"));
    }

    #[test]
    fn test_identical_tiles_share_one_image() {
        let (db, mut writer) = writable_db();
        for x in 0..4 {
            writer
                .put_tile(&db, TileCoord::new(2, x, 0), b"ocean", &PutOptions::default(), false)
                .unwrap();
        }
        writer.commit(&db).unwrap();
        writer
            .put_tile(&db, TileCoord::new(2, 0, 1), b"ocean", &PutOptions::default(), false)
            .unwrap();
        writer.commit(&db).unwrap();

        assert_eq!(count(&db, "images"), 1);
        assert_eq!(count(&db, "map"), 5);
    }

    #[test]
    fn test_threshold_commits_inline() {
        let db = Database::open_in_memory().unwrap();
        let mut writer = TileWriter::new(3);
        writer.start_writing(&db).unwrap();

        for x in 0..7 {
            writer
                .put_tile(&db, TileCoord::new(3, x, 0), &[x as u8], &PutOptions::default(), false)
                .unwrap();
        }

        assert_eq!(writer.stats().commits, 2);
        assert_eq!(writer.stats().pending_ops, 1);
        assert_eq!(count(&db, "map"), 6);
    }

    #[test]
    fn test_put_grid_stages_keys_and_data() {
        let (db, mut writer) = writable_db();
        let mut g = grid(&["", "a", "b"]);
        g.data.insert("a".into(), serde_json::json!({ "name": "A" }));

        writer
            .put_grid(&db, TileCoord::new(0, 0, 0), &g, &PutOptions::default())
            .unwrap();
        writer.commit(&db).unwrap();

        assert_eq!(count(&db, "grid_key"), 3);
        let json: String = db
            .conn()
            .query_row("SELECT key_json FROM keymap WHERE key_name = 'a'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(json, r#"{"name":"A"}"#);
    }

    #[test]
    fn test_pbf_tiles_are_deflated() {
        let (db, mut writer) = writable_db();
        let raw = [0x1a, 0x02, 0x08, 0x01];
        writer
            .put_tile(&db, TileCoord::new(0, 0, 0), &raw, &PutOptions::default(), true)
            .unwrap();
        writer.commit(&db).unwrap();

        let (id, data): (String, Vec<u8>) = db
            .conn()
            .query_row("SELECT tile_id, tile_data FROM images", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(id, codec::tile_id(&raw));
        assert_eq!(codec::inflate(&data).unwrap(), raw);
    }

    #[test]
    fn test_generic_write_validates_columns() {
        let (db, mut writer) = writable_db();
        let bad = PartialRow::from([(Column::TileId, Value::Text("x".into()))]);
        assert!(writer.write(&db, Table::Metadata, "x", bad).is_err());

        let no_position = PartialRow::from([(Column::TileId, Value::Text("x".into()))]);
        assert!(writer.write(&db, Table::Map, "0/0/0", no_position).is_err());

        let ok = PartialRow::from([
            (Column::Name, Value::Text("name".into())),
            (Column::Value, Value::Text("world".into())),
        ]);
        writer.write(&db, Table::Metadata, "name", ok).unwrap();
        writer.commit(&db).unwrap();
        assert_eq!(count(&db, "metadata"), 1);
    }

    #[test]
    fn test_failed_commit_discards_batch() {
        let (db, mut writer) = writable_db();
        writer
            .put_tile(&db, TileCoord::new(0, 0, 0), b"t", &PutOptions::default(), false)
            .unwrap();
        db.conn().execute_batch("DROP VIEW tiles; DROP TABLE images").unwrap();

        assert!(writer.commit(&db).is_err());
        assert_eq!(writer.stats().pending_ops, 0);
        assert_eq!(writer.stats().commits, 1);
        assert_eq!(count(&db, "map"), 0);

        // Nothing left to write.
        writer.commit(&db).unwrap();
        assert_eq!(writer.stats().commits, 1);
    }

    #[test]
    fn test_out_of_range_coordinate_rejected() {
        let (db, mut writer) = writable_db();
        let err = writer
            .put_tile(&db, TileCoord::new(1, 2, 0), b"t", &PutOptions::default(), false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCoordinate { .. }));
        assert_eq!(writer.stats().pending_ops, 0);
    }

    #[derive(Debug, Clone, Copy)]
    enum Shape {
        TileOnly,
        GridOnly,
        Both,
    }

    fn shape() -> impl Strategy<Value = Shape> {
        prop_oneof![Just(Shape::TileOnly), Just(Shape::GridOnly), Just(Shape::Both)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever order and batching the writes arrive in, each content column
        /// ends up holding the last id staged for it.
        #[test]
        fn prop_map_upsert_preserves_other_column(
            steps in proptest::collection::vec((shape(), 0u8..4, any::<bool>()), 1..12)
        ) {
            let (db, mut writer) = writable_db();
            let coord = TileCoord::new(1, 1, 0);
            let mut expected: (Option<String>, Option<String>) = (None, None);

            for (i, (shape, tag, commit_after)) in steps.into_iter().enumerate() {
                let tile_key = format!("t{i}-{tag}");
                let grid_key = format!("g{i}-{tag}");
                if matches!(shape, Shape::TileOnly | Shape::Both) {
                    writer.put_tile(&db, coord, b"t", &PutOptions::with_key(&tile_key), false).unwrap();
                    expected.0 = Some(tile_key);
                }
                if matches!(shape, Shape::GridOnly | Shape::Both) {
                    writer.put_grid(&db, coord, &grid(&["a"]), &PutOptions::with_key(&grid_key)).unwrap();
                    expected.1 = Some(grid_key);
                }
                if commit_after {
                    writer.commit(&db).unwrap();
                }
            }
            writer.commit(&db).unwrap();

            prop_assert_eq!(map_ids(&db, 1, 1, 1), expected);
        }
    }
}
