//! # Coordinate Stream
//!
//! Enumerates every tile position in a store as text chunks of `z/x/y\n` lines,
//! fetching one page per poll so a slow consumer holds back the reads.
//!
//! ## State Machine
//!
//! ```text
//!   Probe ──► Probing ──► Idle ◄──────────────┐
//!                │         │                  │ chunk emitted
//!                │ error   ▼                  │
//!                │      Fetching ─────────────┘
//!                │         │
//!                │         │ empty page / missing table / limit reached
//!                ▼         ▼
//!              Ended ◄─────┘
//! ```
//!
//! The source table is probed once, on the first poll: `map` when it carries an
//! index, `tiles` otherwise. Pages are read with `LIMIT/OFFSET` through the store
//! actor. A store without the table yields an empty stream, not an error.
//!
//! Rows outside the tile pyramid are dropped by the reader. The offset advances
//! by rows scanned, so a page made only of such rows emits nothing and the
//! stream moves on to the next one. The limit counts rows scanned as well.
//!
//! The stream cannot be rewound; open a new one to start over.
//!
//! ## Rust Pattern: Hand-Written Stream
//!
//! Each pending actor request is held as a `BoxFuture` inside the state enum.
//! Boxed futures are `Unpin`, so the stream is too, and `poll_next` can work
//! on `&mut Self` directly.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;

use crate::actor::StoreHandle;
use crate::coord::TileCoord;
use crate::error::Result;
use crate::reader::{CoordPage, CoordSource};
use crate::types::CoordStreamOptions;

enum StreamState {
    /// Nothing requested yet.
    Probe,
    /// Waiting for the source table probe.
    Probing(BoxFuture<'static, Result<CoordSource>>),
    /// Ready to fetch the next page.
    Idle,
    /// Waiting for a page.
    Fetching(BoxFuture<'static, Result<Option<CoordPage>>>),
    /// Exhausted or failed.
    Ended,
}

/// Stream of `z/x/y\n` chunks, one per page of tile positions.
pub struct CoordinateStream {
    handle: StoreHandle,
    source: Option<CoordSource>,
    batch: usize,
    limit: Option<usize>,
    /// Rows scanned so far.
    offset: usize,
    /// Positions emitted so far.
    emitted: usize,
    state: StreamState,
}

impl CoordinateStream {
    pub(crate) fn new(handle: StoreHandle, options: CoordStreamOptions) -> Self {
        Self {
            handle,
            source: None,
            batch: options.batch.max(1),
            limit: options.limit,
            offset: 0,
            emitted: 0,
            state: StreamState::Probe,
        }
    }

    /// Table being enumerated, once probed.
    pub fn table(&self) -> Option<&'static str> {
        self.source.map(CoordSource::table_name)
    }

    /// Rows per page.
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Positions emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Size of the next page, or `None` once the limit is reached.
    fn next_page_size(&self) -> Option<usize> {
        let remaining = match self.limit {
            Some(limit) => limit.saturating_sub(self.offset),
            None => self.batch,
        };
        match remaining.min(self.batch) {
            0 => None,
            n => Some(n),
        }
    }
}

fn format_chunk(coords: &[TileCoord]) -> String {
    let mut chunk = String::with_capacity(coords.len() * 12);
    for coord in coords {
        chunk.push_str(&coord.to_string());
        chunk.push('\n');
    }
    chunk
}

impl Stream for CoordinateStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                StreamState::Probe => {
                    let handle = this.handle.clone();
                    this.state =
                        StreamState::Probing(Box::pin(async move { handle.coordinate_source().await }));
                }

                StreamState::Probing(probe) => match probe.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(source)) => {
                        this.source = Some(source);
                        this.state = StreamState::Idle;
                    }
                    Poll::Ready(Err(e)) => {
                        this.state = StreamState::Ended;
                        return Poll::Ready(Some(Err(e)));
                    }
                },

                StreamState::Idle => {
                    let (Some(source), Some(size)) = (this.source, this.next_page_size()) else {
                        this.state = StreamState::Ended;
                        continue;
                    };
                    let handle = this.handle.clone();
                    let offset = this.offset;
                    this.state = StreamState::Fetching(Box::pin(async move {
                        handle.read_coordinates(source, size, offset).await
                    }));
                }

                StreamState::Fetching(page) => match page.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(Some(page))) if page.rows > 0 => {
                        this.offset += page.rows;
                        this.state = StreamState::Idle;
                        if !page.coords.is_empty() {
                            this.emitted += page.coords.len();
                            return Poll::Ready(Some(Ok(format_chunk(&page.coords))));
                        }
                    }
                    Poll::Ready(Ok(_)) => {
                        this.state = StreamState::Ended;
                    }
                    Poll::Ready(Err(e)) => {
                        this.state = StreamState::Ended;
                        return Poll::Ready(Some(Err(e)));
                    }
                },

                StreamState::Ended => return Poll::Ready(None),
            }
        }
    }
}
