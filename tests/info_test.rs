//! Metadata Resolution Tests
//!
//! - Empty stores report only filesystem-derived fields
//! - Explicit zoom and bounds derive the center
//! - Tiles alone derive zoom range, bounds, and center
//! - `put_info` invalidates the cached result

mod common;

use mbtiles_store::{Error, PutOptions};
use serde_json::{json, Map, Value};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
async fn empty_store_reports_only_file_fields() {
    let (_dir, store) = common::temp_store("empty.mbtiles", "").await;

    let info = store.get_info().await.unwrap();
    assert_eq!(info.id, "empty");
    assert_eq!(info.basename, "empty.mbtiles");
    assert_eq!(info.minzoom, None);
    assert_eq!(info.maxzoom, None);
    assert_eq!(info.bounds, None);
    assert_eq!(info.center, None);

    let serialized = serde_json::to_value(&info).unwrap();
    for key in ["minzoom", "maxzoom", "bounds", "center"] {
        assert!(serialized.get(key).is_none(), "unexpected {key}");
    }
    assert!(serialized.get("filesize").is_some());
}

#[tokio::test]
async fn explicit_zoom_and_bounds_give_center() {
    let (_dir, store) = common::temp_store("center.mbtiles", "").await;

    store.start_writing().await.unwrap();
    store
        .put_info(object(json!({
            "minzoom": 2,
            "maxzoom": 2,
            "bounds": [-10.0, -10.0, 10.0, 10.0],
        })))
        .await
        .unwrap();
    store.stop_writing().await.unwrap();

    let info = store.get_info().await.unwrap();
    assert_eq!(info.center, Some([0.0, 0.0, 2.0]));
    assert_eq!(info.scheme, "xyz");
    assert_eq!(store.metadata("scheme").await.unwrap(), "tms");
}

#[tokio::test]
async fn tiles_alone_derive_zoom_bounds_center() {
    let (_dir, store) = common::temp_store("derived.mbtiles", "").await;

    store.start_writing().await.unwrap();
    for z in 1..=3u8 {
        let side = 1u32 << z;
        store
            .put_tile(z, 0, 0, common::png(u32::from(z)), PutOptions::default())
            .await
            .unwrap();
        store
            .put_tile(z, side - 1, side - 1, common::png(100 + u32::from(z)), PutOptions::default())
            .await
            .unwrap();
    }
    store.stop_writing().await.unwrap();

    let info = store.get_info().await.unwrap();
    assert_eq!(info.minzoom, Some(1));
    assert_eq!(info.maxzoom, Some(3));

    let [w, s, e, n] = info.bounds.unwrap();
    assert_eq!((w, e), (-180.0, 180.0));
    assert!((n - 85.0511).abs() < 1e-3, "north {n}");
    assert!((s + 85.0511).abs() < 1e-3, "south {s}");

    let [lon, lat, zoom] = info.center.unwrap();
    assert!(lon.abs() < 1e-9 && lat.abs() < 1e-9);
    assert_eq!(zoom, 2.0);
}

#[tokio::test]
async fn put_info_invalidates_cache_and_nests_objects() {
    let (_dir, store) = common::temp_store("nested.mbtiles", "").await;
    assert_eq!(store.get_info().await.unwrap().get("name"), None);

    store.start_writing().await.unwrap();
    store
        .put_info(object(json!({
            "name": "World",
            "vector_layers": [{ "id": "water" }],
        })))
        .await
        .unwrap();
    store.stop_writing().await.unwrap();

    let info = store.get_info().await.unwrap();
    assert_eq!(info.get("name"), Some(&json!("World")));
    assert_eq!(info.get("vector_layers"), Some(&json!([{ "id": "water" }])));

    assert_eq!(store.metadata("name").await.unwrap(), "World");
    assert!(store.metadata("json").await.unwrap().contains("water"));
    assert!(matches!(
        store.metadata("nope").await,
        Err(Error::KeyNotFound(key)) if key == "nope"
    ));
}
