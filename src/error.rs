//! # Error Handling for the Tile Store
//!
//! A single error enum ([`Error`]) covers every failure mode of the store. Each
//! public operation either succeeds or returns exactly one of these variants;
//! there is no silent partial success.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Lifecycle | `NotOpen`, `NotWritable`, `ReadOnly` | Fix the calling sequence |
//! | Absent | `TileNotFound`, `GridNotFound`, `KeyNotFound` | Serve a 404 / fallback |
//! | Invalid content | `InvalidTile`, `InvalidGrid`, `InvalidCoordinate` | Report bad data |
//! | Storage | `Corrupted`, `Sqlite`, `Io` | Log and investigate |
//! | Input | `InvalidUri`, `Json` | Fix the caller's input |
//!
//! "Absent" and "invalid" are deliberately separate: a tile that does not exist
//! is never reported as invalid, and a tile whose bytes fail type sniffing is
//! never reported as missing.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in tile store operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lifecycle Errors
    // =========================================================================

    /// The store has been closed (or its actor thread has exited).
    ///
    /// Every request on a handle whose store was closed fails with this error.
    #[error("MBTiles not yet loaded or already closed")]
    NotOpen,

    /// A mutation was attempted outside a write session.
    ///
    /// # Recovery
    ///
    /// Call `start_writing()` first and pair it with `stop_writing()`.
    #[error("MBTiles not in write mode")]
    NotWritable,

    /// A write session was requested on a store opened with `mode=ro`.
    #[error("MBTiles opened read-only")]
    ReadOnly,

    // =========================================================================
    // Absent Content (not failures of the store itself)
    // =========================================================================

    /// No tile is stored at the requested position.
    #[error("Tile does not exist")]
    TileNotFound,

    /// No grid is stored at the requested position.
    #[error("Grid does not exist")]
    GridNotFound,

    /// A metadata key looked up by name is not present.
    #[error("Key does not exist: {0}")]
    KeyNotFound(String),

    // =========================================================================
    // Invalid Content
    // =========================================================================

    /// Tile bytes are present but empty or of an unrecognized type.
    #[error("Tile is invalid")]
    InvalidTile,

    /// Grid payload is present but failed to inflate or parse.
    #[error("Grid is invalid: {0}")]
    InvalidGrid(String),

    /// A write addressed a position outside the tile pyramid.
    #[error("invalid tile coordinate {z}/{x}/{y}")]
    InvalidCoordinate {
        /// Zoom level
        z: u8,
        /// Column (XYZ)
        x: u32,
        /// Row (XYZ)
        y: u32,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================

    /// `PRAGMA quick_check` did not report `ok`.
    ///
    /// Reported per call; the store stays open and other operations may still
    /// succeed.
    #[error("Corrupted database: {0}")]
    Corrupted(String),

    /// SQLite operation failed (opaque passthrough).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem operation failed (opaque passthrough).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Input Errors
    // =========================================================================

    /// The store URI or one of its query parameters could not be parsed.
    #[error("invalid MBTiles uri: {0}")]
    InvalidUri(String),

    /// JSON (de)serialization of metadata or grid data failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for the "absent is a normal outcome" variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::TileNotFound | Error::GridNotFound | Error::KeyNotFound(_)
        )
    }

    /// True when content exists but failed decoding or type sniffing.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::InvalidTile | Error::InvalidGrid(_))
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::TileNotFound.to_string(), "Tile does not exist");
        assert_eq!(Error::GridNotFound.to_string(), "Grid does not exist");
        assert_eq!(Error::NotWritable.to_string(), "MBTiles not in write mode");
        assert_eq!(
            Error::InvalidCoordinate { z: 1, x: 0, y: 2 }.to_string(),
            "invalid tile coordinate 1/0/2"
        );
        assert_eq!(
            Error::KeyNotFound("legend".to_string()).to_string(),
            "Key does not exist: legend"
        );
    }

    #[test]
    fn test_not_found_and_invalid_are_disjoint() {
        let all = [
            Error::TileNotFound,
            Error::GridNotFound,
            Error::KeyNotFound("x".into()),
            Error::InvalidTile,
            Error::InvalidGrid("bad".into()),
        ];
        for err in &all {
            assert!(err.is_not_found() != err.is_invalid(), "{err}");
        }
    }

    /// rusqlite errors convert through `?`.
    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();

        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }
}
