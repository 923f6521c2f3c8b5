//! # Geocoder Storage
//!
//! Storage hooks used by a geocoder that indexes the features of a tileset:
//!
//! - **Index shards**: opaque blobs keyed by `(type, shard)` in `geocoder_data`,
//!   zlib-compressed and written through the write-back cache.
//! - **Indexable documents**: one JSON document per feature in `keymap`, with
//!   the tiles it appears in and a representative point.
//!
//! ## Document Shape
//!
//! ```text
//! {
//!   ...feature attributes from keymap.key_json...,
//!   "_id":     "<key name>",
//!   "_text":   search | name | key,
//!   "_zxy":    ["4/3/5", ...],        // XYZ, tiles whose grid carries the key
//!   "_center": [lon, lat]             // 3 decimals
//! }
//! ```
//!
//! `_center` is the centroid of the key's cells in the UTFGrid of its first tile.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};
use tracing::debug;

use crate::codec;
use crate::coord::{pixel_to_lon_lat, TileCoord, TILE_SIZE};
use crate::error::Result;
use crate::schema::Database;
use crate::types::{Column, DocPointer, PartialRow, Table, UtfGrid};
use crate::writer::TileWriter;

/// Pixels covered by one UTFGrid cell.
pub const GRID_CELL_PX: f64 = 4.0;

// =============================================================================
// Index Shards
// =============================================================================

/// Stages a compressed index shard.
pub fn put_geocoder_data(
    writer: &mut TileWriter,
    db: &Database,
    kind: &str,
    shard: u32,
    data: &[u8],
) -> Result<()> {
    writer.require_writable()?;

    let row = PartialRow::from([
        (Column::Type, SqlValue::Text(kind.to_string())),
        (Column::Shard, SqlValue::Integer(i64::from(shard))),
        (Column::Data, SqlValue::Blob(codec::deflate(data)?)),
    ]);
    writer.stage(Table::GeocoderData, format!("{kind}.{shard}"), row);
    writer.finish_op(db)
}

/// Reads and inflates an index shard. `None` when the table or row is absent.
pub fn get_geocoder_data(db: &Database, kind: &str, shard: u32) -> Result<Option<Vec<u8>>> {
    if !db.table_exists("geocoder_data")? {
        return Ok(None);
    }

    let blob: Option<Option<Vec<u8>>> = db
        .conn()
        .prepare_cached("SELECT data FROM geocoder_data WHERE type = ?1 AND shard = ?2")?
        .query_row(params![kind, shard], |row| row.get(0))
        .optional()?;

    match blob.flatten() {
        Some(blob) => Ok(Some(codec::inflate(&blob)?)),
        None => Ok(None),
    }
}

// =============================================================================
// Indexable Documents
// =============================================================================

/// Returns one page of indexable documents and the pointer to the next page.
///
/// `maxzoom` is the tileset's resolved maximum zoom; grids are read at that
/// level. Without it, or without the grid tables, the pointer switches to
/// `nogrids` and documents come straight from `keymap`.
pub fn get_indexable_docs(
    db: &Database,
    pointer: DocPointer,
    maxzoom: Option<u8>,
) -> Result<(Vec<Value>, DocPointer)> {
    let mut pointer = pointer;

    let gridded = match maxzoom {
        Some(z) if !pointer.nogrids && has_grid_tables(db)? => Some(z),
        _ => None,
    };

    let docs = match gridded {
        Some(z) => docs_from_grids(db, z, &pointer)?,
        None => {
            pointer.nogrids = true;
            docs_from_keymap(db, &pointer)?
        }
    };

    debug!(
        count = docs.len(),
        offset = pointer.offset,
        nogrids = pointer.nogrids,
        "read indexable docs"
    );

    pointer.offset += pointer.limit;
    Ok((docs, pointer))
}

fn has_grid_tables(db: &Database) -> Result<bool> {
    for table in ["keymap", "grid_key", "map", "grids"] {
        if !db.table_exists(table)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn docs_from_grids(db: &Database, zoom: u8, pointer: &DocPointer) -> Result<Vec<Value>> {
    let mut stmt = db.conn().prepare_cached(
        "SELECT k.key_name, k.key_json, \
                GROUP_CONCAT(m.zoom_level || '/' || m.tile_column || '/' || m.tile_row, ',') \
         FROM keymap k \
         JOIN grid_key g ON k.key_name = g.key_name \
         JOIN map m ON g.grid_id = m.grid_id \
         WHERE m.zoom_level = ?1 \
         GROUP BY k.key_name \
         LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(
            params![zoom, pointer.limit as i64, pointer.offset as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut docs = Vec::with_capacity(rows.len());
    for (key, json, zxy) in rows {
        let mut doc = base_doc(&key, json.as_deref());

        let tiles: Vec<TileCoord> = zxy
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.parse::<TileCoord>().ok())
            .filter_map(|c| TileCoord::from_storage_row(c.z.into(), c.x.into(), c.y.into()))
            .collect();

        if let Some(first) = tiles.first() {
            if let Some(grid) = load_grid(db, *first)? {
                if let Some(center) = grid_centroid(&grid, &key, *first) {
                    doc.insert("_center".into(), Value::from(center.to_vec()));
                }
            }
        }
        doc.insert(
            "_zxy".into(),
            Value::from(tiles.iter().map(ToString::to_string).collect::<Vec<_>>()),
        );
        docs.push(Value::Object(doc));
    }
    Ok(docs)
}

fn docs_from_keymap(db: &Database, pointer: &DocPointer) -> Result<Vec<Value>> {
    if !db.table_exists("keymap")? {
        return Ok(Vec::new());
    }

    let mut stmt = db
        .conn()
        .prepare_cached("SELECT key_name, key_json FROM keymap LIMIT ?1 OFFSET ?2")?;
    let rows = stmt
        .query_map(
            params![pointer.limit as i64, pointer.offset as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(key, json)| {
            let mut doc = base_doc(&key, json.as_deref());
            if let (Some(lon), Some(lat)) = (number(doc.get("lon")), number(doc.get("lat"))) {
                doc.insert("_center".into(), Value::from(vec![round3(lon), round3(lat)]));
            }
            Value::Object(doc)
        })
        .collect())
}

/// Feature attributes plus `_id` and `_text`.
fn base_doc(key: &str, json: Option<&str>) -> Map<String, Value> {
    let mut doc = match json.and_then(|j| serde_json::from_str::<Value>(j).ok()) {
        Some(Value::Object(attrs)) => attrs,
        _ => Map::new(),
    };

    let text = ["search", "name"]
        .iter()
        .find_map(|field| match doc.get(*field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| key.to_string());

    doc.insert("_id".into(), Value::from(key));
    doc.insert("_text".into(), Value::from(text));
    doc
}

fn load_grid(db: &Database, coord: TileCoord) -> Result<Option<UtfGrid>> {
    let Ok((z, x, y)) = coord.to_storage_row() else {
        return Ok(None);
    };
    let blob: Option<Option<Vec<u8>>> = db
        .conn()
        .prepare_cached(
            "SELECT grid FROM grids \
             WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
        )?
        .query_row(params![z, x, y], |row| row.get(0))
        .optional()?;

    // An unreadable grid only costs the document its center.
    Ok(blob
        .flatten()
        .and_then(|b| codec::decompress_grid(&b).ok()))
}

// =============================================================================
// UTFGrid Centroid
// =============================================================================

/// Character that encodes key index `idx` in a UTFGrid row.
///
/// Indices start at code point 32 and skip `"` (34) and `\` (92) so grid rows
/// stay valid JSON strings without escaping.
pub fn grid_char(idx: usize) -> Option<char> {
    let mut code = u32::try_from(idx).ok()?.checked_add(32)?;
    if code >= 34 {
        code += 1;
    }
    if code >= 92 {
        code += 1;
    }
    char::from_u32(code)
}

/// `[lon, lat]` of the mean position of `key`'s cells in `grid`, rounded to
/// 3 decimals. `None` when the key is not drawn in the grid.
pub fn grid_centroid(grid: &UtfGrid, key: &str, tile: TileCoord) -> Option<[f64; 2]> {
    let idx = grid.keys.iter().position(|k| k == key)?;
    let target = grid_char(idx)?;

    let (mut sum_x, mut sum_y, mut cells) = (0.0, 0.0, 0u64);
    for (row, line) in grid.grid.iter().enumerate() {
        for (col, ch) in line.chars().enumerate() {
            if ch == target {
                sum_x += col as f64;
                sum_y += row as f64;
                cells += 1;
            }
        }
    }
    if cells == 0 {
        return None;
    }

    let px = f64::from(tile.x) * TILE_SIZE + (sum_x / cells as f64 + 0.5) * GRID_CELL_PX;
    let py = f64::from(tile.y) * TILE_SIZE + (sum_y / cells as f64 + 0.5) * GRID_CELL_PX;
    let (lon, lat) = pixel_to_lon_lat(tile.z, px, py);
    Some([round3(lon), round3(lat)])
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PutOptions;
    use serde_json::json;

    fn writable() -> (Database, TileWriter) {
        let db = Database::open_in_memory().unwrap();
        let mut writer = TileWriter::new(100);
        writer.start_writing(&db).unwrap();
        (db, writer)
    }

    /// A 64x64 grid with `a` filling the left half and `b` the bottom-right
    /// quadrant.
    fn half_grid() -> UtfGrid {
        let a = grid_char(1).unwrap();
        let b = grid_char(2).unwrap();
        let rows = (0..64)
            .map(|row| {
                (0..64)
                    .map(|col| match (col < 32, row < 32) {
                        (true, _) => a,
                        (false, false) => b,
                        (false, true) => ' ',
                    })
                    .collect()
            })
            .collect();
        let mut grid = UtfGrid {
            grid: rows,
            keys: vec!["".into(), "a".into(), "b".into()],
            data: Map::new(),
        };
        grid.data.insert("a".into(), json!({ "name": "Alpha", "search": "Alpha, A" }));
        grid.data.insert("b".into(), json!({ "name": "Beta" }));
        grid
    }

    #[test]
    fn test_grid_char_skips_escapes() {
        assert_eq!(grid_char(0), Some(' '));
        assert_eq!(grid_char(1), Some('!'));
        assert_eq!(grid_char(2), Some('#'));
        assert_eq!(grid_char(57), Some('Z'));
        assert_eq!(grid_char(58), Some('['));
        assert_eq!(grid_char(59), Some(']'));
    }

    #[test]
    fn test_grid_centroid() {
        let grid = half_grid();
        let [lon, lat] = grid_centroid(&grid, "a", TileCoord::new(0, 0, 0)).unwrap();
        assert_eq!(lon, -90.0);
        assert_eq!(lat, 0.0);

        let [lon, lat] = grid_centroid(&grid, "b", TileCoord::new(0, 0, 0)).unwrap();
        assert_eq!(lon, 90.0);
        assert!(lat < 0.0);

        assert_eq!(grid_centroid(&grid, "missing", TileCoord::new(0, 0, 0)), None);
    }

    #[test]
    fn test_geocoder_data_roundtrip() {
        let (db, mut writer) = writable();
        put_geocoder_data(&mut writer, &db, "term", 0, b"asdf").unwrap();
        writer.commit(&db).unwrap();

        assert_eq!(get_geocoder_data(&db, "term", 0).unwrap().as_deref(), Some(&b"asdf"[..]));
        assert_eq!(get_geocoder_data(&db, "term", 1).unwrap(), None);

        let empty = Database::open_in_memory().unwrap();
        assert_eq!(get_geocoder_data(&empty, "term", 0).unwrap(), None);
    }

    #[test]
    fn test_geocoder_data_requires_session() {
        let db = Database::open_in_memory().unwrap();
        let mut writer = TileWriter::new(100);
        assert!(put_geocoder_data(&mut writer, &db, "term", 0, b"x").is_err());
    }

    #[test]
    fn test_indexable_docs_from_grids() {
        let (db, mut writer) = writable();
        writer
            .put_grid(&db, TileCoord::new(0, 0, 0), &half_grid(), &PutOptions::default())
            .unwrap();
        writer.commit(&db).unwrap();

        let pointer = DocPointer { limit: 10, offset: 0, nogrids: false };
        let (docs, next) = get_indexable_docs(&db, pointer, Some(0)).unwrap();
        assert_eq!(next.offset, 10);
        assert!(!next.nogrids);
        assert_eq!(docs.len(), 2);

        let alpha = docs.iter().find(|d| d["_id"] == "a").unwrap();
        assert_eq!(alpha["_text"], "Alpha, A");
        assert_eq!(alpha["_zxy"], json!(["0/0/0"]));
        assert_eq!(alpha["_center"], json!([-90.0, 0.0]));
        assert_eq!(alpha["name"], "Alpha");

        let beta = docs.iter().find(|d| d["_id"] == "b").unwrap();
        assert_eq!(beta["_text"], "Beta");

        let (more, _) = get_indexable_docs(&db, next, Some(0)).unwrap();
        assert!(more.is_empty());
    }

    #[test]
    fn test_indexable_docs_without_grids() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute_batch(
                r#"CREATE TABLE keymap (key_name TEXT, key_json TEXT);
                   INSERT INTO keymap VALUES ('ca', '{"name":"Canada","lon":-110.4246,"lat":56.83546}');
                   INSERT INTO keymap VALUES ('x', NULL);"#,
            )
            .unwrap();

        let (docs, next) = get_indexable_docs(&db, DocPointer::default(), Some(4)).unwrap();
        assert!(next.nogrids);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["_center"], json!([-110.425, 56.835]));
        assert_eq!(docs[0]["_text"], "Canada");
        assert_eq!(docs[1]["_text"], "x");
        assert!(docs[1].get("_center").is_none());
    }
}
