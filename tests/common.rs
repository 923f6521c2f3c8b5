#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use mbtiles_store::{MBTiles, UtfGrid};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
pub const JPEG_SIGNATURE: [u8; 3] = [0xff, 0xd8, 0xff];

/// PNG-signed bytes, unique per `n`.
pub fn png(n: u32) -> Vec<u8> {
    let mut data = PNG_SIGNATURE.to_vec();
    data.extend_from_slice(&n.to_be_bytes());
    data
}

pub fn jpeg(n: u32) -> Vec<u8> {
    let mut data = JPEG_SIGNATURE.to_vec();
    data.extend_from_slice(&n.to_be_bytes());
    data
}

/// One-row grid with a single feature key `a`.
pub fn grid_with_feature(name: &str) -> UtfGrid {
    let mut grid = UtfGrid {
        grid: vec![" !!".to_string(), " !!".to_string()],
        keys: vec!["".to_string(), "a".to_string()],
        data: serde_json::Map::new(),
    };
    grid.data
        .insert("a".to_string(), serde_json::json!({ "name": name }));
    grid
}

pub fn temp_path(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Opens a fresh store in a temp dir with the given query string.
pub async fn temp_store(name: &str, query: &str) -> (tempfile::TempDir, MBTiles) {
    let (dir, path) = temp_path(name);
    let uri = if query.is_empty() {
        format!("mbtiles://{}", path.display())
    } else {
        format!("mbtiles://{}?{}", path.display(), query)
    };
    let store = MBTiles::open(&uri).await.expect("open store");
    (dir, store)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

pub fn open_read_write(path: &Path) -> Connection {
    Connection::open(path).expect("open read-write connection")
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}

/// `(tile_id, grid_id)` of the map row at a TMS position.
pub fn map_ids(conn: &Connection, z: u8, x: u32, tms_row: u32) -> (Option<String>, Option<String>) {
    conn.query_row(
        "SELECT tile_id, grid_id FROM map WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
        rusqlite::params![z, x, tms_row],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .expect("read map row")
}
