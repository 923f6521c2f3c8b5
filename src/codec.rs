//! # Tile and Grid Encoding
//!
//! Content addressing, compression, and type sniffing for everything stored in
//! the `images`, `grid_utfgrid`, and `geocoder_data` tables.
//!
//! ## Content Ids
//!
//! ```text
//! tile_id = md5_hex(raw tile bytes)
//! grid_id = md5_hex({"grid":[...],"keys":[...]})
//! ```
//!
//! Identical content always maps to the same id, so `INSERT OR REPLACE` on the
//! content tables never duplicates a blob. Grid ids hash the canonical JSON
//! (field order `grid`, `keys`; `data` excluded) so two grids that differ only in
//! their feature payloads share one row.
//!
//! ## Stored Format
//!
//! Grids and geocoder shards are always zlib-compressed. Tiles are stored as
//! given, except vector tiles in a `pbf` store, which are deflated on the way in
//! and inflated on the way out.

use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use md5::{Digest, Md5};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::UtfGrid;

// =============================================================================
// Content Ids
// =============================================================================

/// MD5 hex digest of `bytes`.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Content id of a tile: the MD5 of its raw bytes.
pub fn tile_id(bytes: &[u8]) -> String {
    md5_hex(bytes)
}

/// Borrowed view of a grid serialized in hashing order.
#[derive(Serialize)]
struct CanonicalGrid<'a> {
    grid: &'a [String],
    keys: &'a [String],
}

/// Canonical JSON of a grid, `{"grid":[...],"keys":[...]}`.
pub fn canonical_grid_json(grid: &UtfGrid) -> Result<Vec<u8>> {
    let canonical = CanonicalGrid {
        grid: &grid.grid,
        keys: &grid.keys,
    };
    Ok(serde_json::to_vec(&canonical)?)
}

/// Content id of a grid: the MD5 of its canonical JSON.
pub fn grid_id(grid: &UtfGrid) -> Result<String> {
    Ok(md5_hex(&canonical_grid_json(grid)?))
}

// =============================================================================
// Compression
// =============================================================================

/// Compression wrapper recognized on stored blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// RFC 1950 zlib stream.
    Zlib,
    /// RFC 1952 gzip member.
    Gzip,
}

impl Compression {
    /// Detects a zlib or gzip header.
    ///
    /// A zlib header is `0x78` followed by a byte that makes the pair a multiple
    /// of 31 (`78 01`, `78 5E`, `78 9C`, `78 DA` in practice).
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x1f, 0x8b, ..] => Some(Compression::Gzip),
            [0x78, flg, ..] if (0x7800u16 | u16::from(*flg)) % 31 == 0 => {
                Some(Compression::Zlib)
            }
            _ => None,
        }
    }
}

/// zlib-compresses `bytes` at the default level.
pub fn deflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Decompresses a zlib stream.
pub fn inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Decompresses a zlib or gzip blob, whichever header it carries.
///
/// Blobs without a recognized header are returned unchanged.
pub fn inflate_any(bytes: &[u8]) -> Result<Vec<u8>> {
    match Compression::detect(bytes) {
        Some(Compression::Zlib) => inflate(bytes),
        Some(Compression::Gzip) => {
            let mut out = Vec::new();
            GzDecoder::new(bytes).read_to_end(&mut out)?;
            Ok(out)
        }
        None => Ok(bytes.to_vec()),
    }
}

/// Canonical grid JSON, zlib-compressed, ready for `grid_utfgrid.grid_utfgrid`.
pub fn compress_grid(grid: &UtfGrid) -> Result<Vec<u8>> {
    deflate(&canonical_grid_json(grid)?)
}

/// Inflates and parses a stored grid.
///
/// Any failure is [`Error::InvalidGrid`]; the caller has already established the
/// row exists.
pub fn decompress_grid(blob: &[u8]) -> Result<UtfGrid> {
    let json = inflate(blob).map_err(|e| Error::InvalidGrid(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| Error::InvalidGrid(e.to_string()))
}

// =============================================================================
// Tile Format Sniffing
// =============================================================================

/// Tile payload types recognized by signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    /// Mapbox vector tile (protobuf).
    Pbf,
}

impl TileFormat {
    /// Identifies `bytes` by magic number.
    ///
    /// Compressed payloads are assumed to be protobuf, as are payloads starting
    /// with `0x1A` (field 3, length-delimited: a vector tile layer). Empty or
    /// unrecognized payloads are [`Error::InvalidTile`].
    pub fn detect(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, ..] => Ok(TileFormat::Png),
            [0xff, 0xd8, 0xff, ..] => Ok(TileFormat::Jpeg),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Ok(TileFormat::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
                Ok(TileFormat::Webp)
            }
            [0x1a, ..] => Ok(TileFormat::Pbf),
            _ if Compression::detect(bytes).is_some() => Ok(TileFormat::Pbf),
            _ => Err(Error::InvalidTile),
        }
    }

    /// MIME type for the `Content-Type` header.
    pub fn content_type(self) -> &'static str {
        match self {
            TileFormat::Png => "image/png",
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Gif => "image/gif",
            TileFormat::Webp => "image/webp",
            TileFormat::Pbf => "application/x-protobuf",
        }
    }
}

// =============================================================================
// Response Headers
// =============================================================================

/// Size and modification time of the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: SystemTime,
}

impl FileStat {
    /// Reads the stat of `path`.
    pub fn read(path: &std::path::Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            size: meta.len(),
            mtime: meta.modified()?,
        })
    }

    /// Modification time in milliseconds since the Unix epoch.
    pub fn mtime_ms(&self) -> u128 {
        self.mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }
}

/// HTTP header values for a tile or grid response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileHeaders {
    pub content_type: &'static str,
    /// Always `None`: compressed tiles are inflated before being returned.
    pub content_encoding: Option<&'static str>,
    /// RFC 7231 IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
    pub last_modified: String,
    /// `"{size}-{mtime_ms}"` including the quotes.
    pub etag: String,
}

impl TileHeaders {
    /// Headers for a payload of `content_type` served from a file with `stat`.
    pub fn new(content_type: &'static str, stat: &FileStat) -> Self {
        let modified: DateTime<Utc> = stat.mtime.into();
        Self {
            content_type,
            content_encoding: None,
            last_modified: modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            etag: format!("\"{}-{}\"", stat.size, stat.mtime_ms()),
        }
    }

    /// Headers for a tile of `format`.
    pub fn for_tile(format: TileFormat, stat: &FileStat) -> Self {
        Self::new(format.content_type(), stat)
    }

    /// Headers for a UTFGrid response.
    pub fn for_grid(stat: &FileStat) -> Self {
        Self::new("application/json", stat)
    }
}

// =============================================================================
// Tests
// =============================================================================
