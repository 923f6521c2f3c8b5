//! # Tile Coordinates
//!
//! The public API addresses tiles in **XYZ** order (row 0 at the top); MBTiles
//! stores rows in **TMS** order (row 0 at the bottom). The two are related by
//!
//! ```text
//! y_tms = (2^z - 1) - y_xyz
//! ```
//!
//! which is its own inverse for a fixed zoom. Every read and write applies
//! [`TileCoord::to_storage_row`] before touching SQLite, and the coordinate
//! stream applies [`TileCoord::from_storage_row`] to every row it emits.
//!
//! Both directions are checked. Stores written by other tools can hold rows
//! outside the pyramid (negative columns, rows past `2^z - 1`); those map to
//! `None` instead of wrapping.
//!
//! The module also carries the spherical Mercator helpers used by the metadata
//! resolver (bounds from tile extrema) and the geocoder (pixel centroids).

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

/// Highest zoom level accepted for reads and writes.
///
/// At z=30 a row index still fits in a `u32` (2^30 tiles per axis).
pub const MAX_ZOOM: u8 = 30;

/// Side length of a tile in pixels, used for pixel/geographic conversions.
pub const TILE_SIZE: f64 = 256.0;

// =============================================================================
// TileCoord
// =============================================================================

/// A tile position in public XYZ order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Zoom level.
    pub z: u8,
    /// Column, 0 at the antimeridian.
    pub x: u32,
    /// Row, 0 at the top (north).
    pub y: u32,
}

impl TileCoord {
    /// Creates a coordinate without range checks.
    pub const fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Creates a coordinate, rejecting positions outside the pyramid at `z`.
    pub fn checked(z: u8, x: u32, y: u32) -> Result<Self> {
        let coord = Self { z, x, y };
        if coord.is_valid() {
            Ok(coord)
        } else {
            Err(Error::InvalidCoordinate { z, x, y })
        }
    }

    /// Number of tiles along one axis at zoom `z`.
    pub fn tiles_per_axis(z: u8) -> u64 {
        1u64 << z
    }

    /// True when `z <= MAX_ZOOM` and both indices are below `2^z`.
    pub fn is_valid(&self) -> bool {
        if self.z > MAX_ZOOM {
            return false;
        }
        let n = Self::tiles_per_axis(self.z);
        u64::from(self.x) < n && u64::from(self.y) < n
    }

    /// Converts to the on-disk `(zoom_level, tile_column, tile_row)` triple.
    ///
    /// Positions outside the pyramid are [`Error::InvalidCoordinate`].
    pub fn to_storage_row(&self) -> Result<(u8, u32, u32)> {
        match flip_y(self.z, self.y) {
            Some(row) if self.is_valid() => Ok((self.z, self.x, row)),
            _ => Err(Error::InvalidCoordinate {
                z: self.z,
                x: self.x,
                y: self.y,
            }),
        }
    }

    /// Converts a raw on-disk row back to public XYZ order.
    ///
    /// Takes the integers as SQLite returns them; `None` when the row does not
    /// name a position inside the pyramid.
    pub fn from_storage_row(z: i64, column: i64, row: i64) -> Option<Self> {
        let z = u8::try_from(z).ok().filter(|z| *z <= MAX_ZOOM)?;
        let x = u32::try_from(column).ok()?;
        let y = flip_y(z, u32::try_from(row).ok()?)?;
        let coord = Self { z, x, y };
        coord.is_valid().then_some(coord)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl FromStr for TileCoord {
    type Err = Error;

    /// Parses `z/x/y`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidUri(format!("not a z/x/y coordinate: {s:?}"));
        let mut parts = s.trim().split('/');
        let z = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let x = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let y = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { z, x, y })
    }
}

/// Flips a row index between XYZ and TMS at zoom `z`.
///
/// `None` unless `z <= MAX_ZOOM` and `y < 2^z`. Applying it twice returns `y`.
#[inline]
pub fn flip_y(z: u8, y: u32) -> Option<u32> {
    if z > MAX_ZOOM {
        return None;
    }
    TileCoord::tiles_per_axis(z)
        .checked_sub(u64::from(y) + 1)
        .map(|row| row as u32)
}

// =============================================================================
// Spherical Mercator
// =============================================================================

/// Longitude of the west edge of column `x` at zoom `z`.
#[inline]
pub fn tile_x_to_lon(x: f64, z: u8) -> f64 {
    x / TileCoord::tiles_per_axis(z) as f64 * 360.0 - 180.0
}

/// Latitude of the north edge of XYZ row `y` at zoom `z` (inverse Mercator).
#[inline]
pub fn tile_y_to_lat(y: f64, z: u8) -> f64 {
    let n = TileCoord::tiles_per_axis(z) as f64;
    let lat_rad = (PI * (1.0 - 2.0 * y / n)).sinh().atan();
    lat_rad * 180.0 / PI
}

/// Geographic bounding box `[west, south, east, north]` of an XYZ tile.
///
/// Indices are floats so that positions outside the pyramid still project;
/// callers clamp the result when they need a valid box.
pub fn tile_bbox(z: u8, x: f64, y: f64) -> [f64; 4] {
    [
        tile_x_to_lon(x, z),
        tile_y_to_lat(y + 1.0, z),
        tile_x_to_lon(x + 1.0, z),
        tile_y_to_lat(y, z),
    ]
}

/// Converts a global pixel position at zoom `z` to `(lon, lat)`.
pub fn pixel_to_lon_lat(z: u8, px: f64, py: f64) -> (f64, f64) {
    (tile_x_to_lon(px / TILE_SIZE, z), tile_y_to_lat(py / TILE_SIZE, z))
}

// =============================================================================
// Tests
// =============================================================================
