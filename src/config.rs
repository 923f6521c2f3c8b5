//! # Store URIs and Open Options
//!
//! A store is addressed by a URI of the form
//!
//! ```text
//! mbtiles:///abs/path/world.mbtiles?mode=rw&batch=50
//! mbtiles://relative/world.mbtiles
//! /abs/path/world.mbtiles?mode=ro
//! ```
//!
//! The path is percent-decoded, so `my%20tiles.mbtiles` opens `my tiles.mbtiles`.
//! Recognized query parameters:
//!
//! | Parameter | Values | Default |
//! |-----------|--------|---------|
//! | `mode` | `ro`, `rw`, `rwc` | `rwc` |
//! | `batch` | integer ≥ 1 | `100` |
//!
//! Unknown parameters are ignored.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use rusqlite::OpenFlags;

use crate::error::{Error, Result};

/// URI scheme prefix for MBTiles stores.
pub const SCHEME: &str = "mbtiles://";

/// Bytes escaped when a path is written back into a URI. `/` stays literal.
const PATH_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Pending operations that trigger an automatic commit.
pub const DEFAULT_BATCH_SIZE: usize = 100;

// =============================================================================
// Open Mode
// =============================================================================

/// How the underlying SQLite file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Read-only. Write sessions are refused with `Error::ReadOnly`.
    ReadOnly,
    /// Read-write; the file must already exist.
    ReadWrite,
    /// Read-write, creating the file if missing.
    #[default]
    ReadWriteCreate,
}

impl OpenMode {
    /// SQLite flags for this mode.
    ///
    /// The connection is owned by a single thread, so SQLite's own mutex is
    /// skipped.
    pub fn open_flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadWriteCreate => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::ReadOnly => "ro",
            OpenMode::ReadWrite => "rw",
            OpenMode::ReadWriteCreate => "rwc",
        }
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ro" => Ok(OpenMode::ReadOnly),
            "rw" => Ok(OpenMode::ReadWrite),
            "rwc" => Ok(OpenMode::ReadWriteCreate),
            other => Err(Error::InvalidUri(format!("unknown mode {other:?}"))),
        }
    }
}

// =============================================================================
// Store Config
// =============================================================================

/// Options carried in the query string of a store URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub mode: OpenMode,
    /// Pending operations that trigger an automatic commit. Always ≥ 1.
    pub batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: OpenMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl StoreConfig {
    /// Applies one `key=value` query parameter.
    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "mode" => self.mode = value.parse()?,
            "batch" => {
                self.batch_size = value
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n >= 1)
                    .ok_or_else(|| Error::InvalidUri(format!("invalid batch {value:?}")))?;
            }
            _ => {}
        }
        Ok(())
    }
}

// =============================================================================
// Store URI
// =============================================================================

/// A parsed store URI: the file path plus its open options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUri {
    pub path: PathBuf,
    pub config: StoreConfig,
}

impl StoreUri {
    /// Parses an `mbtiles://` URI or a bare path with an optional query.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix(SCHEME).unwrap_or(uri);
        let (raw_path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let path = decode(raw_path)?;
        if path.is_empty() {
            return Err(Error::InvalidUri(format!("missing path in {uri:?}")));
        }

        let mut config = StoreConfig::default();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            config.apply(&decode(key)?, &decode(value)?)?;
        }

        Ok(Self {
            path: PathBuf::from(path),
            config,
        })
    }

    /// URI for a store at `path` with default options.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: StoreConfig::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FromStr for StoreUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for StoreUri {
    /// Formats as `mbtiles://<percent-encoded path>`; options are not included.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.to_string_lossy();
        write!(f, "{SCHEME}{}", utf8_percent_encode(&path, PATH_ENCODE))
    }
}

fn decode(s: &str) -> Result<String> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|e| Error::InvalidUri(e.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
