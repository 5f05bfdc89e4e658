//! Integration tests for the `amphora-db` storage layer.
//!
//! These tests require live `PostgreSQL` and Redis services configured
//! through the usual `CLAY_STORAGE_*` variables (defaults: `PostgreSQL` on
//! `localhost:5432`, Redis on `redis://localhost:6379`). Run with:
//!
//! ```bash
//! docker run -d -p 5432:5432 -e POSTGRES_PASSWORD=example postgres:16
//! docker run -d -p 6379:6379 redis:7
//! cargo test -p amphora-db -- --ignored
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use std::time::{SystemTime, UNIX_EPOCH};

use amphora_db::{
    BatchOp, Bootstrap, CacheBackend, PgStorage, ReadOptions, StorageConfig, StoreError,
    StreamItem, setup,
};
use futures::TryStreamExt;
use serde_json::{Value, json};
use sqlx::Row;

/// Redis URL used when the environment does not name one.
const REDIS_URL: &str = "redis://localhost:6379";

// =============================================================================
// Helpers
// =============================================================================

/// A site prefix no other test run has used.
fn unique_site() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    format!("it-{nanos}.com")
}

/// Environment configuration with a throwaway registry holding `button`.
fn config(cache: bool) -> (StorageConfig, tempfile::TempDir) {
    let registry = tempfile::tempdir().expect("Failed to create registry dir");
    std::fs::create_dir(registry.path().join("button")).expect("Failed to create component");

    let mut config = StorageConfig::from_env().expect("Invalid CLAY_STORAGE_* configuration");
    config.components_dir = registry.path().to_path_buf();
    config.layouts_dir = registry.path().join("layouts");
    config.cache.enabled = cache;
    if cache && config.cache.url.is_none() && config.cache.cluster_hosts.is_none() {
        config.cache.url = Some(REDIS_URL.to_owned());
    }
    (config, registry)
}

async fn connect(cache: bool) -> (PgStorage, tempfile::TempDir) {
    let (config, registry) = config(cache);
    let Bootstrap { storage, servers } = setup(&config)
        .await
        .expect("Failed to set up storage -- are the services running?");
    assert_eq!(servers.cache.is_some(), cache);
    (storage, registry)
}

// =============================================================================
// Durable store
// =============================================================================

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn put_get_del_round_trip() {
    let (storage, _registry) = connect(false).await;
    let key = format!("{}/_pages/home", unique_site());

    let value = json!({"main": ["a", "b"], "title": "Home"});
    let stored = storage.put(&key, value.clone()).await.unwrap();
    assert_eq!(stored, value);
    assert_eq!(storage.get(&key).await.unwrap(), value);

    storage.del(&key).await.unwrap();
    let err = storage.get(&key).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn upsert_overwrites_existing_record() {
    let (storage, _registry) = connect(false).await;
    let key = format!("{}/_users/u1", unique_site());

    storage.put(&key, json!({"name": "first"})).await.unwrap();
    storage.put(&key, json!({"name": "second"})).await.unwrap();
    assert_eq!(storage.get(&key).await.unwrap(), json!({"name": "second"}));

    let rows = storage
        .raw("SELECT count(*) AS n FROM users WHERE id = $1", &json!([key]))
        .await
        .unwrap();
    assert_eq!(rows[0].get::<i64, _>("n"), 1);
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn namespaced_component_uses_registry_table() {
    let (storage, _registry) = connect(false).await;
    let key = format!("{}/_components/button/instances/a", unique_site());

    storage.put(&key, json!({"label": "Go"})).await.unwrap();
    assert_eq!(storage.get(&key).await.unwrap(), json!({"label": "Go"}));

    let rows = storage
        .raw(
            "SELECT data FROM components.button WHERE id = $1",
            &json!([key]),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn list_is_stored_in_an_envelope() {
    let (storage, _registry) = connect(false).await;
    let key = format!("{}/_lists/authors", unique_site());

    storage.put(&key, json!([{"name": "A"}])).await.unwrap();
    assert_eq!(storage.get(&key).await.unwrap(), json!([{"name": "A"}]));

    let rows = storage
        .raw("SELECT data FROM lists WHERE id = $1", &json!([key]))
        .await
        .unwrap();
    let raw: Value = rows[0].get("data");
    assert_eq!(raw, json!({"_value": [{"name": "A"}]}));
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn uri_records_decoded_url() {
    let (storage, _registry) = connect(false).await;
    // "site.com/a"
    let key = format!("{}/_uris/c2l0ZS5jb20vYQ==", unique_site());

    storage.put(&key, json!("site.com/_pages/a")).await.unwrap();
    assert_eq!(storage.get(&key).await.unwrap(), json!("site.com/_pages/a"));

    let rows = storage
        .raw("SELECT url FROM uris WHERE id = $1", &json!([key]))
        .await
        .unwrap();
    assert_eq!(rows[0].get::<Option<String>, _>("url").as_deref(), Some("site.com/a"));
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn batch_writes_every_member() {
    let (storage, _registry) = connect(false).await;
    let site = unique_site();
    let ops = vec![
        BatchOp::new(format!("{site}/_pages/a"), json!({"n": 1})),
        BatchOp::new(format!("{site}/_pages/b"), json!({"n": 2})),
    ];

    let stored = storage.batch(&ops).await.unwrap();
    assert_eq!(stored.len(), 2);
    for op in &ops {
        assert_eq!(storage.get(&op.key).await.unwrap(), op.value);
    }
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn meta_and_patch() {
    let (storage, _registry) = connect(false).await;
    let key = format!("{}/_pages/a", unique_site());

    let err = storage.patch(&key, json!({"x": 1})).await.unwrap_err();
    assert!(err.is_not_found());

    storage.put(&key, json!({"a": 1})).await.unwrap();
    let merged = storage.patch(&key, json!({"b": 2})).await.unwrap();
    assert_eq!(merged, json!({"a": 1, "b": 2}));

    assert_eq!(storage.get_meta(&key).await.unwrap(), Value::Null);
    storage.put_meta(&key, json!({"title": "A"})).await.unwrap();
    let meta = storage.patch_meta(&key, json!({"published": true})).await.unwrap();
    assert_eq!(meta, json!({"title": "A", "published": true}));
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn read_stream_attaches_refs() {
    let (storage, _registry) = connect(false).await;
    let site = unique_site();
    let prefix = format!("{site}/_pages");
    storage.put(&format!("{prefix}/a"), json!({"n": 1})).await.unwrap();
    storage.put(&format!("{prefix}/b"), json!({"n": 2})).await.unwrap();

    let items: Vec<StreamItem> = storage
        .create_read_stream(&ReadOptions::new(prefix.clone()))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(
        items,
        vec![
            StreamItem::Record(json!({"n": 1, "_ref": format!("{prefix}/a")})),
            StreamItem::Record(json!({"n": 2, "_ref": format!("{prefix}/b")})),
        ]
    );

    let keys: Vec<StreamItem> = storage
        .create_read_stream(&ReadOptions::new(prefix.clone()).with_values(false))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert!(matches!(&keys[0], StreamItem::Key(k) if k.ends_with("/a")));
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn raw_rejects_scalar_arguments() {
    let (storage, _registry) = connect(false).await;
    let result = storage.raw("SELECT 1", &json!("not an array")).await;
    assert!(matches!(result, Err(StoreError::Validation(_))));
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn raw_sql_runs_without_arguments() {
    let (storage, _registry) = connect(false).await;
    let rows = storage.raw_sql("SELECT 41 + 1 AS n").await.unwrap();
    assert_eq!(rows[0].get::<i32, _>("n"), 42);
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn unroutable_key_is_rejected() {
    let (storage, _registry) = connect(false).await;
    let result = storage.put("site.com/_nontable/a", json!({})).await;
    assert!(matches!(result, Err(StoreError::Routing(_))));
}

// =============================================================================
// Provisioning
// =============================================================================

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn missing_database_is_created() {
    let (mut config, _registry) = config(false);
    let admin_database = config.postgres.database.clone();
    let database = format!("amphora_{}", unique_site().replace(['-', '.'], "_"));
    config.postgres.database.clone_from(&database);

    let Bootstrap { storage, .. } = setup(&config).await.unwrap();
    let rows = storage
        .raw(
            "SELECT 1 FROM pg_database WHERE datname = $1",
            &json!([database]),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    storage.durable().pool().close().await;

    config.postgres.database = admin_database;
    let Bootstrap { storage, .. } = setup(&config).await.unwrap();
    storage
        .raw_sql(&format!("DROP DATABASE \"{database}\""))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn reprovisioning_adds_timestamp_columns_to_existing_tables() {
    let (mut config, _registry) = config(false);
    let key = format!("{}/_users/a", unique_site());

    config.timestamps = false;
    let Bootstrap { storage, .. } = setup(&config).await.unwrap();
    storage.put(&key, json!({"n": 1})).await.unwrap();
    storage.durable().pool().close().await;

    config.timestamps = true;
    let Bootstrap { storage, .. } = setup(&config).await.unwrap();
    storage.put(&key, json!({"n": 2})).await.unwrap();
    assert_eq!(storage.get(&key).await.unwrap(), json!({"n": 2}));

    let rows = storage
        .raw(
            "SELECT updated_at IS NOT NULL AS stamped FROM users WHERE id = $1",
            &json!([key]),
        )
        .await
        .unwrap();
    assert!(rows[0].get::<bool, _>("stamped"));
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis instances"]
async fn published_writes_reach_the_cache() {
    let (storage, _registry) = connect(true).await;
    let site = unique_site();
    let published = format!("{site}/_pages/a@published");
    let draft = format!("{site}/_pages/a");

    storage.put(&published, json!({"n": 1})).await.unwrap();
    storage.put(&draft, json!({"n": 0})).await.unwrap();

    assert_eq!(storage.cache().get(&published).await.unwrap(), r#"{"n":1}"#);
    assert!(storage.cache().get(&draft).await.unwrap_err().is_not_found());
    assert_eq!(storage.get(&published).await.unwrap(), json!({"n": 1}));

    storage.del(&published).await.unwrap();
    assert!(storage.cache().get(&published).await.unwrap_err().is_not_found());
    assert!(storage.get(&published).await.unwrap_err().is_not_found());
}

#[tokio::test]
#[ignore = "requires live PostgreSQL and Redis instances"]
async fn uri_cache_entry_is_the_bare_target() {
    let (storage, _registry) = connect(true).await;
    let key = format!("{}/_uris/c2l0ZS5jb20vYQ", unique_site());

    storage.put(&key, json!("site.com/_pages/a")).await.unwrap();
    assert_eq!(storage.cache().get(&key).await.unwrap(), "site.com/_pages/a");
    assert_eq!(storage.get(&key).await.unwrap(), json!("site.com/_pages/a"));

    storage.del(&key).await.unwrap();
}
