//! Coordinate Stream Tests
//!
//! - Empty stores end cleanly with no items
//! - Chunks hold one page each, in XYZ order
//! - A row limit still emits the final partial page
//! - Rows outside the tile pyramid are skipped, and the store stays usable

mod common;

use std::collections::BTreeSet;

use futures::StreamExt;
use mbtiles_store::{CoordStreamOptions, MBTiles, PutOptions, TileCoord};

async fn collect_chunks(store: &MBTiles, options: CoordStreamOptions) -> Vec<String> {
    let mut stream = store.coordinate_stream(options);
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.unwrap());
    }
    chunks
}

async fn store_with_tiles(name: &str, count: u32) -> (tempfile::TempDir, MBTiles, BTreeSet<TileCoord>) {
    let (dir, store) = common::temp_store(name, "").await;
    let mut coords = BTreeSet::new();

    store.start_writing().await.unwrap();
    for n in 0..count {
        let coord = TileCoord::new(5, n % 32, n / 32);
        store
            .put_tile(coord.z, coord.x, coord.y, common::png(n), PutOptions::default())
            .await
            .unwrap();
        coords.insert(coord);
    }
    store.stop_writing().await.unwrap();
    (dir, store, coords)
}

#[tokio::test]
async fn empty_store_stream_ends_without_items() {
    let (_dir, store) = common::temp_store("empty.mbtiles", "").await;
    assert!(collect_chunks(&store, CoordStreamOptions::default()).await.is_empty());

    // An empty write session changes nothing.
    store.start_writing().await.unwrap();
    store.stop_writing().await.unwrap();
    assert!(collect_chunks(&store, CoordStreamOptions::default()).await.is_empty());
}

#[tokio::test]
async fn read_only_store_without_tables_streams_nothing() {
    let (_dir, path) = common::temp_path("bare.mbtiles");
    common::open_read_write(&path)
        .execute_batch("CREATE TABLE unrelated (id INTEGER);")
        .unwrap();

    let store = MBTiles::open(&format!("mbtiles://{}?mode=ro", path.display()))
        .await
        .unwrap();
    let mut stream = store.coordinate_stream(CoordStreamOptions::default());
    assert!(stream.next().await.is_none());
    assert_eq!(stream.table(), Some("tiles"));
}

#[tokio::test]
async fn stream_pages_cover_every_position() {
    let (_dir, store, coords) = store_with_tiles("pages.mbtiles", 45).await;

    let options = CoordStreamOptions { batch: 20, limit: None };
    let chunks = collect_chunks(&store, options).await;
    let sizes: Vec<usize> = chunks.iter().map(|c| c.lines().count()).collect();
    assert_eq!(sizes, vec![20, 20, 5]);

    let streamed: BTreeSet<TileCoord> = chunks
        .iter()
        .flat_map(|c| c.lines())
        .map(|line| line.parse().unwrap())
        .collect();
    assert_eq!(streamed, coords);
    assert!(chunks.iter().all(|c| c.ends_with('\n')));
}

#[tokio::test]
async fn stream_limit_keeps_final_partial_page() {
    let (_dir, store, _) = store_with_tiles("limit.mbtiles", 45).await;

    let options = CoordStreamOptions { batch: 20, limit: Some(30) };
    let sizes: Vec<usize> = collect_chunks(&store, options)
        .await
        .iter()
        .map(|c| c.lines().count())
        .collect();
    assert_eq!(sizes, vec![20, 10]);
}

#[tokio::test]
async fn stream_reports_its_table() {
    let (_dir, store, _) = store_with_tiles("table.mbtiles", 3).await;

    let mut stream = store.coordinate_stream(CoordStreamOptions::default());
    assert_eq!(stream.table(), None);
    assert_eq!(stream.batch(), 1000);

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.lines().count(), 3);
    assert_eq!(stream.table(), Some("map"));
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn stream_on_closed_store_errors_once() {
    let (_dir, store, _) = store_with_tiles("closed.mbtiles", 3).await;
    store.close().await.unwrap();

    let mut stream = store.coordinate_stream(CoordStreamOptions::default());
    assert!(stream.next().await.unwrap().is_err());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn rows_outside_the_pyramid_are_skipped() {
    let (_dir, store, coords) = store_with_tiles("foreign.mbtiles", 3).await;

    // Rows a foreign tool could leave behind: past 2^z - 1, negative, beyond z30.
    common::open_read_write(store.path())
        .execute_batch(
            "INSERT INTO map (zoom_level, tile_column, tile_row) VALUES (1, 0, 5);
             INSERT INTO map (zoom_level, tile_column, tile_row) VALUES (1, -1, 0);
             INSERT INTO map (zoom_level, tile_column, tile_row) VALUES (2, 0, -3);
             INSERT INTO map (zoom_level, tile_column, tile_row) VALUES (40, 0, 0);",
        )
        .unwrap();

    let mut stream = store.coordinate_stream(CoordStreamOptions { batch: 2, limit: None });
    let mut streamed = BTreeSet::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        assert!(!chunk.is_empty());
        for line in chunk.lines() {
            streamed.insert(line.parse::<TileCoord>().unwrap());
        }
    }
    assert_eq!(streamed, coords);
    assert_eq!(stream.emitted(), 3);

    // The actor survived the foreign rows.
    assert_eq!(store.get_tile(5, 0, 0).await.unwrap().0, common::png(0));
}
