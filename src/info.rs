//! # Metadata Resolver
//!
//! `get_info` combines what the `metadata` table says with what can be derived
//! from the tiles themselves. Tools that write MBTiles are inconsistent about
//! which keys they record, so each derived field is computed only when the
//! stored value is absent or unusable:
//!
//! ```text
//! metadata rows ──► coerce ──► merge `json` blob (flat keys win)
//!                                   │
//!          minzoom/maxzoom missing? ├──► probe zoom levels 0..=29
//!          bounds missing?          ├──► extrema at minzoom, projected
//!          center missing?          └──► bounds midpoint, middle zoom
//! ```
//!
//! Values that fail coercion (e.g. `bounds = "a,b"`) are dropped with a warning
//! and then derived like any other missing value.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::coord::{tile_bbox, TileCoord, MAX_ZOOM};
use crate::error::{Error, Result};
use crate::schema::Database;

/// Zoom levels probed when the metadata omits `minzoom` or `maxzoom`.
const PROBE_ZOOMS: std::ops::Range<u8> = 0..30;

/// Keys that are always computed, never taken from the table.
const COMPUTED_KEYS: [&str; 4] = ["id", "basename", "filesize", "scheme"];

// =============================================================================
// TileInfo
// =============================================================================

/// Resolved tileset description (TileJSON-like).
///
/// Serializes flat: typed fields first, then every other metadata key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileInfo {
    /// File stem, e.g. `world` for `world.mbtiles`.
    pub id: String,
    pub basename: String,
    /// Size of the file in bytes when the info was resolved.
    pub filesize: u64,
    /// Always `xyz`: the API flips rows, whatever the file records.
    pub scheme: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,
    /// `[west, south, east, north]` in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[f64; 4]>,
    /// `[lon, lat, zoom]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<[f64; 3]>,
    /// Every other metadata key.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TileInfo {
    /// Looks up an untyped metadata key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

// =============================================================================
// Reading
// =============================================================================

/// Resolves the full tileset description.
pub fn resolve_info(db: &Database) -> Result<TileInfo> {
    let path = db.path();
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut raw = read_metadata_rows(db)?;
    for key in COMPUTED_KEYS {
        raw.remove(key);
    }

    let mut minzoom = raw.remove("minzoom").and_then(|v| coerce_zoom("minzoom", v));
    let mut maxzoom = raw.remove("maxzoom").and_then(|v| coerce_zoom("maxzoom", v));
    let mut bounds = raw
        .remove("bounds")
        .and_then(|v| coerce_floats::<4>("bounds", v));
    let mut center = raw
        .remove("center")
        .and_then(|v| coerce_floats::<3>("center", v));

    let has_tiles = db.table_exists("tiles")?;

    if has_tiles && (minzoom.is_none() || maxzoom.is_none()) {
        let zooms = probe_zooms(db)?;
        if minzoom.is_none() {
            minzoom = zooms.first().copied();
        }
        if maxzoom.is_none() {
            maxzoom = zooms.last().copied();
        }
    }

    if has_tiles && bounds.is_none() {
        if let Some(z) = minzoom {
            bounds = derive_bounds(db, z)?;
        }
    }

    if center.is_none() {
        if let (Some(b), Some(min), Some(max)) = (bounds, minzoom, maxzoom) {
            center = Some(derive_center(b, min, max));
        }
    }

    Ok(TileInfo {
        id,
        basename,
        filesize: db.file_size()?,
        scheme: "xyz".to_string(),
        minzoom,
        maxzoom,
        bounds,
        center,
        extra: raw,
    })
}

/// Reads a single metadata value as text.
pub fn read_metadata(db: &Database, key: &str) -> Result<String> {
    if !db.table_exists("metadata")? {
        return Err(Error::KeyNotFound(key.to_string()));
    }
    let value: Option<SqlValue> = db
        .conn()
        .prepare_cached("SELECT value FROM metadata WHERE name = ?1")?
        .query_row([key], |row| row.get(0))
        .optional()?;

    match value.and_then(sql_to_json) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Ok(other.to_string()),
        None => Err(Error::KeyNotFound(key.to_string())),
    }
}

/// The `format` metadata value, if any.
pub fn read_format(db: &Database) -> Result<Option<String>> {
    match read_metadata(db, "format") {
        Ok(format) => Ok(Some(format)),
        Err(Error::KeyNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// All metadata rows, with the `json` blob merged underneath.
fn read_metadata_rows(db: &Database) -> Result<Map<String, Value>> {
    let mut raw = Map::new();
    if !db.table_exists("metadata")? {
        return Ok(raw);
    }

    let mut stmt = db.conn().prepare_cached("SELECT name, value FROM metadata")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, SqlValue>(1)?))
    })?;
    for row in rows {
        let (name, value) = row?;
        if let Some(value) = sql_to_json(value) {
            raw.insert(name, value);
        }
    }

    if let Some(blob) = raw.remove("json") {
        let parsed = match &blob {
            Value::String(s) => serde_json::from_str::<Value>(s).ok(),
            _ => None,
        };
        match parsed {
            Some(Value::Object(nested)) => {
                for (key, value) in nested {
                    raw.entry(key).or_insert(value);
                }
            }
            _ => warn!(value = %blob, "ignoring unparsable metadata json"),
        }
    }

    Ok(raw)
}

fn sql_to_json(value: SqlValue) -> Option<Value> {
    match value {
        SqlValue::Null => Some(Value::Null),
        SqlValue::Integer(i) => Some(Value::from(i)),
        SqlValue::Real(f) => Some(Value::from(f)),
        SqlValue::Text(s) => Some(Value::String(s)),
        SqlValue::Blob(_) => None,
    }
}

// =============================================================================
// Coercion
// =============================================================================

fn coerce_zoom(key: &str, value: Value) -> Option<u8> {
    let zoom = match &value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match zoom {
        Some(z) if z <= u64::from(MAX_ZOOM) => Some(z as u8),
        _ => {
            warn!(key, value = %value, "dropping unparsable zoom");
            None
        }
    }
}

fn coerce_floats<const N: usize>(key: &str, value: Value) -> Option<[f64; N]> {
    let parts: Option<Vec<f64>> = match &value {
        Value::String(s) => s.split(',').map(|p| p.trim().parse::<f64>().ok()).collect(),
        Value::Array(items) => items.iter().map(Value::as_f64).collect(),
        _ => None,
    };
    let floats = parts
        .filter(|p| p.iter().all(|f| f.is_finite()))
        .and_then(|p| <[f64; N]>::try_from(p).ok());
    if floats.is_none() {
        warn!(key, value = %value, "dropping unparsable metadata");
    }
    floats
}

// =============================================================================
// Derived Fields
// =============================================================================

/// Zoom levels that have at least one tile, ascending.
fn probe_zooms(db: &Database) -> Result<Vec<u8>> {
    let mut stmt = db
        .conn()
        .prepare_cached("SELECT zoom_level FROM tiles WHERE zoom_level = ?1 LIMIT 1")?;
    let mut found = Vec::new();
    for z in PROBE_ZOOMS {
        if stmt.exists(params![z])? {
            found.push(z);
        }
    }
    Ok(found)
}

/// Bounds of the tiles at `zoom`, clamped to the valid lon/lat range.
fn derive_bounds(db: &Database, zoom: u8) -> Result<Option<[f64; 4]>> {
    let extrema: (Option<i64>, Option<i64>, Option<i64>, Option<i64>) = db
        .conn()
        .prepare_cached(
            "SELECT MAX(tile_column), MIN(tile_column), MAX(tile_row), MIN(tile_row) \
             FROM tiles WHERE zoom_level = ?1",
        )?
        .query_row(params![zoom], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;

    let (Some(maxx), Some(minx), Some(maxy), Some(miny)) = extrema else {
        return Ok(None);
    };

    // Rows are TMS: the highest row is the northernmost. Indices may lie
    // outside `0..2^z` in stores from other tools, so project them as floats
    // and clamp the result.
    let last = TileCoord::tiles_per_axis(zoom) as f64 - 1.0;
    let ur = tile_bbox(zoom, maxx as f64, last - maxy as f64);
    let ll = tile_bbox(zoom, minx as f64, last - miny as f64);
    Ok(Some([
        ll[0].max(-180.0),
        ll[1].max(-90.0),
        ur[2].min(180.0),
        ur[3].min(90.0),
    ]))
}

/// Midpoint of `bounds` at the middle of the zoom range.
fn derive_center(bounds: [f64; 4], minzoom: u8, maxzoom: u8) -> [f64; 3] {
    let range = i32::from(maxzoom) - i32::from(minzoom);
    let zoom = if range <= 1 {
        maxzoom
    } else {
        minzoom + (range / 2) as u8
    };
    [
        (bounds[2] - bounds[0]) / 2.0 + bounds[0],
        (bounds[3] - bounds[1]) / 2.0 + bounds[1],
        f64::from(zoom),
    ]
}

// =============================================================================
// Writing
// =============================================================================

/// Writes tileset metadata in its own transaction.
///
/// Scalars become text rows; objects, arrays, and nulls are collected into the
/// `json` row, except `bounds` and `center` which are stored comma-joined.
/// `scheme` is always recorded as `tms`.
pub fn write_info(db: &Database, info: &Map<String, Value>) -> Result<()> {
    let mut rows: Vec<(String, String)> = Vec::with_capacity(info.len() + 2);
    let mut nested = Map::new();

    for (key, value) in info {
        match value {
            Value::Array(items) if key == "bounds" || key == "center" => {
                let joined: Vec<String> = items.iter().map(scalar_text).collect();
                rows.push((key.clone(), joined.join(",")));
            }
            Value::Object(_) | Value::Array(_) | Value::Null => {
                nested.insert(key.clone(), value.clone());
            }
            scalar => rows.push((key.clone(), scalar_text(scalar))),
        }
    }
    if !nested.is_empty() {
        rows.push(("json".to_string(), serde_json::to_string(&nested)?));
    }
    rows.push(("scheme".to_string(), "tms".to_string()));

    let conn = db.conn();
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = rows.iter().try_for_each(|(name, value)| {
        conn.prepare_cached("REPLACE INTO metadata (name, value) VALUES (?1, ?2)")?
            .execute(params![name, value])
            .map(|_| ())
    });
    let result = result.and_then(|()| conn.execute_batch("COMMIT"));
    if result.is_err() {
        let _ = conn.execute_batch("ROLLBACK");
    }
    Ok(result?)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
