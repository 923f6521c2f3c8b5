//! Directory Listing and Registry Tests

mod common;

use mbtiles_store::{find_id, list, Error, MBTiles, PutOptions, StoreRegistry};

#[tokio::test]
async fn list_finds_mbtiles_files_only() {
    let dir = tempfile::TempDir::new().unwrap();
    for name in ["world.mbtiles", "roads-2.mbtiles", "notes.txt", "bad name.mbtiles"] {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }
    std::fs::write(dir.path().join("world.mbtiles-journal"), b"").unwrap();

    let found = list(dir.path()).await.unwrap();
    assert_eq!(found.keys().collect::<Vec<_>>(), vec!["roads-2", "world"]);
    assert!(found["world"].starts_with("mbtiles://"));
    assert!(found["world"].ends_with("world.mbtiles"));

    let uri = find_id(dir.path(), "roads-2").await.unwrap();
    assert_eq!(uri, found["roads-2"]);
    assert!(matches!(
        find_id(dir.path(), "missing").await,
        Err(Error::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn listed_uri_opens_the_store() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let store = MBTiles::open(&dir.path().join("tiles.mbtiles").display().to_string())
            .await
            .unwrap();
        store.start_writing().await.unwrap();
        store
            .put_tile(0, 0, 0, common::png(1), PutOptions::default())
            .await
            .unwrap();
        store.close().await.unwrap();
    }

    let uri = find_id(dir.path(), "tiles").await.unwrap();
    let store = MBTiles::open(&uri).await.unwrap();
    assert_eq!(store.get_tile(0, 0, 0).await.unwrap().0, common::png(1));
}

#[tokio::test]
async fn listed_uri_survives_reserved_characters() {
    let root = tempfile::TempDir::new().unwrap();
    let dir = root.path().join("50% off?");
    std::fs::create_dir(&dir).unwrap();
    {
        let store = MBTiles::open_uri(mbtiles_store::StoreUri::from_path(dir.join("sale.mbtiles")))
            .await
            .unwrap();
        store.start_writing().await.unwrap();
        store
            .put_tile(0, 0, 0, common::png(7), PutOptions::default())
            .await
            .unwrap();
        store.close().await.unwrap();
    }

    let uri = find_id(&dir, "sale").await.unwrap();
    assert!(uri.contains("50%25%20off%3F"), "{uri}");

    let store = MBTiles::open(&uri).await.unwrap();
    assert_eq!(store.path(), std::fs::canonicalize(&dir).unwrap().join("sale.mbtiles"));
    assert_eq!(store.get_tile(0, 0, 0).await.unwrap().0, common::png(7));
}

#[tokio::test]
async fn registry_shares_one_handle_per_path() {
    let dir = tempfile::TempDir::new().unwrap();
    let registry = StoreRegistry::new();

    let direct = format!("mbtiles://{}", dir.path().join("shared.mbtiles").display());
    let dotted = format!(
        "mbtiles://{}?batch=1",
        dir.path().join(".").join("shared.mbtiles").display()
    );

    let a = registry.open(&direct).await.unwrap();
    let b = registry.open(&dotted).await.unwrap();
    assert_eq!(registry.len().await, 1);

    // One session counter: a session opened through `a` is visible through `b`.
    a.start_writing().await.unwrap();
    b.put_tile(0, 0, 0, common::png(1), PutOptions::default())
        .await
        .unwrap();
    // First open's batch size (100) still applies.
    assert_eq!(b.writer_stats().await.unwrap().pending_ops, 1);
    a.stop_writing().await.unwrap();

    // A closed handle is replaced on the next open.
    a.close().await.unwrap();
    let c = registry.open(&direct).await.unwrap();
    assert!(!c.is_closed());
    assert_eq!(c.get_tile(0, 0, 0).await.unwrap().0, common::png(1));

    assert!(registry.remove(dir.path().join("shared.mbtiles")).await.is_some());
    assert!(registry.is_empty().await);
}
