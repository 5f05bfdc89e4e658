//! In-memory backends.
//!
//! [`MemoryStore`] and [`MemoryCache`] follow the routing, envelope, meta,
//! merge and eligibility rules of the `PostgreSQL` and Redis adapters
//! without any I/O. Tables spring into existence on first write.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use amphora_routing::key::uri_target;
use amphora_routing::{EntityKind, Route, Router};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::backend::{
    BatchOp, CacheBackend, DurableBackend, ReadOptions, RecordStream, StreamItem,
};
use crate::error::StoreError;
use crate::sql;

/// A stored row.
#[derive(Debug, Clone, Default, PartialEq)]
struct Record {
    data: Option<Value>,
    meta: Option<Value>,
    url: Option<String>,
}

type Tables = BTreeMap<String, BTreeMap<String, Record>>;

/// Durable backend held in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    router: Arc<Router>,
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            tables: Arc::default(),
        }
    }

    /// The derived `url` stored for a uri key.
    pub async fn url(&self, key: &str) -> Result<Option<String>, StoreError> {
        let route = self.router.route(key)?;
        let tables = self.tables.read().await;
        Ok(tables
            .get(&sql::table_ref(&route))
            .and_then(|rows| rows.get(key))
            .and_then(|record| record.url.clone()))
    }

    /// Number of rows across all tables.
    pub async fn len(&self) -> usize {
        self.tables.read().await.values().map(BTreeMap::len).sum()
    }

    /// Whether no rows are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn meta_route(&self, key: &str) -> Result<Route, StoreError> {
        let route = self.router.route(key)?;
        if self.router.policy(route.kind).meta {
            Ok(route)
        } else {
            Err(StoreError::Validation(format!(
                "column \"meta\" does not exist in {}",
                sql::table_ref(&route)
            )))
        }
    }
}

/// `jsonb || jsonb`.
///
/// Objects merge shallowly with the right side winning. Anything else is
/// array concatenation, non-arrays counting as one-element arrays.
fn concat(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Object(mut left), Value::Object(right)) => {
            left.extend(right);
            Value::Object(left)
        }
        (left, right) => {
            let mut items = into_items(left);
            items.extend(into_items(right));
            Value::Array(items)
        }
    }
}

fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

#[async_trait]
impl DurableBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        let route = self.router.route(key)?;
        let tables = self.tables.read().await;
        let record = tables
            .get(&sql::table_ref(&route))
            .and_then(|rows| rows.get(key))
            .ok_or_else(|| StoreError::not_found(key))?;
        let stored = record.data.clone().unwrap_or(Value::Null);
        Ok(self.router.decode(route.kind, stored))
    }

    async fn put(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        let route = self.router.route(key)?;
        let stored = self.router.encode(route.kind, value);
        let mut tables = self.tables.write().await;
        let record = tables
            .entry(sql::table_ref(&route))
            .or_default()
            .entry(key.to_owned())
            .or_default();
        record.data = Some(stored.clone());
        if route.kind == EntityKind::Uri {
            record.url = uri_target(key);
        }
        Ok(stored)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let route = self.router.route(key)?;
        let mut tables = self.tables.write().await;
        if let Some(rows) = tables.get_mut(&sql::table_ref(&route)) {
            rows.remove(key);
        }
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Value, StoreError> {
        let route = self.meta_route(key)?;
        let tables = self.tables.read().await;
        let record = tables
            .get(&sql::table_ref(&route))
            .and_then(|rows| rows.get(key))
            .ok_or_else(|| StoreError::not_found(key))?;
        Ok(record.meta.clone().unwrap_or(Value::Null))
    }

    async fn put_meta(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        let route = self.meta_route(key)?;
        let mut tables = self.tables.write().await;
        tables
            .entry(sql::table_ref(&route))
            .or_default()
            .entry(key.to_owned())
            .or_default()
            .meta = Some(value.clone());
        Ok(value)
    }

    async fn patch(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        let route = self.router.route(key)?;
        let mut tables = self.tables.write().await;
        let record = tables
            .get_mut(&sql::table_ref(&route))
            .and_then(|rows| rows.get_mut(key))
            .ok_or_else(|| StoreError::not_found(key))?;
        let current = record.data.take().unwrap_or_else(|| Value::Object(Map::new()));
        let merged = concat(current, value);
        record.data = Some(merged.clone());
        Ok(merged)
    }

    async fn patch_meta(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        let route = self.meta_route(key)?;
        let mut tables = self.tables.write().await;
        let record = tables
            .get_mut(&sql::table_ref(&route))
            .and_then(|rows| rows.get_mut(key))
            .ok_or_else(|| StoreError::not_found(key))?;
        let current = record.meta.take().unwrap_or_else(|| Value::Object(Map::new()));
        let merged = concat(current, value);
        record.meta = Some(merged.clone());
        Ok(merged)
    }

    fn create_read_stream(&self, options: &ReadOptions) -> Result<RecordStream, StoreError> {
        options.validate()?;
        let table = sql::table_ref(&self.router.route(&options.prefix)?);
        let tables = Arc::clone(&self.tables);
        let options = options.clone();

        let rows = stream::once(async move {
            let tables = tables.read().await;
            let items: Vec<Result<StreamItem, StoreError>> = tables
                .get(&table)
                .map(|rows| {
                    rows.range(options.prefix.clone()..)
                        .take_while(|(id, _)| id.starts_with(&options.prefix))
                        .map(|(id, record)| {
                            let data = record.data.clone().unwrap_or(Value::Null);
                            Ok(options.shape(id.clone(), data))
                        })
                        .collect()
                })
                .unwrap_or_default();
            stream::iter(items)
        })
        .flatten();

        Ok(rows.boxed())
    }
}

/// Cache backend held in memory.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    router: Arc<Router>,
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryCache {
    /// An empty cache.
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            entries: Arc::default(),
        }
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Write raw text, bypassing eligibility.
    pub async fn insert_raw(&self, key: impl Into<String>, text: impl Into<String>) {
        self.entries.write().await.insert(key.into(), text.into());
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        if self.router.is_cacheable(key) {
            let text = self.router.cache_text(key, value);
            self.entries.write().await.insert(key.to_owned(), text);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        if self.router.is_cacheable(key) {
            self.entries.write().await.remove(key);
        }
        Ok(())
    }

    async fn batch(&self, ops: &[BatchOp]) -> Result<(), StoreError> {
        let fields: Vec<_> = ops
            .iter()
            .filter(|op| self.router.is_cacheable(&op.key))
            .map(|op| (op.key.clone(), self.router.cache_text(&op.key, &op.value)))
            .collect();
        if !fields.is_empty() {
            self.entries.write().await.extend(fields);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures::TryStreamExt;
    use serde_json::json;

    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(Router::default()))
    }

    #[tokio::test]
    async fn put_then_get_round_trips_through_the_envelope() {
        let store = store();
        let stored = store
            .put("site.com/_lists/authors", json!([{"name": "A"}]))
            .await
            .unwrap();
        assert_eq!(stored, json!({"_value": [{"name": "A"}]}));
        assert_eq!(
            store.get("site.com/_lists/authors").await.unwrap(),
            json!([{"name": "A"}])
        );
    }

    #[tokio::test]
    async fn uri_put_records_the_decoded_url() {
        let store = store();
        let key = "site.com/_uris/c2l0ZS5jb20vYQ==";
        store.put(key, json!("site.com/_pages/a")).await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), json!("site.com/_pages/a"));
        assert_eq!(store.url(key).await.unwrap().as_deref(), Some("site.com/a"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store();
        store.put("site.com/_pages/a", json!({})).await.unwrap();
        store.del("site.com/_pages/a").await.unwrap();
        store.del("site.com/_pages/a").await.unwrap();
        assert!(store.get("site.com/_pages/a").await.unwrap_err().is_not_found());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unroutable_keys_fail() {
        let store = store();
        assert!(matches!(
            store.put("site.com/_nontable", json!(1)).await,
            Err(StoreError::Routing(_))
        ));
        assert!(matches!(
            store.get("site.com/_components").await,
            Err(StoreError::Routing(_))
        ));
    }

    #[tokio::test]
    async fn meta_is_only_available_for_meta_kinds() {
        let store = store();
        let page = "site.com/_pages/a";
        store.put(page, json!({"main": []})).await.unwrap();
        assert_eq!(store.get_meta(page).await.unwrap(), Value::Null);
        store.put_meta(page, json!({"title": "A"})).await.unwrap();
        assert_eq!(store.get_meta(page).await.unwrap(), json!({"title": "A"}));

        assert!(matches!(
            store.put_meta("site.com/_users/a", json!({})).await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn patch_merges_shallowly_and_requires_a_row() {
        let store = store();
        let page = "site.com/_pages/a";
        assert!(store.patch(page, json!({"a": 1})).await.unwrap_err().is_not_found());

        store
            .put(page, json!({"a": 1, "nested": {"x": 1}}))
            .await
            .unwrap();
        let merged = store
            .patch(page, json!({"b": 2, "nested": {"y": 2}}))
            .await
            .unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 2, "nested": {"y": 2}}));

        store.put_meta(page, json!({"title": "A"})).await.unwrap();
        let meta = store.patch_meta(page, json!({"published": true})).await.unwrap();
        assert_eq!(meta, json!({"title": "A", "published": true}));
    }

    #[test]
    fn concat_follows_jsonb_rules() {
        assert_eq!(concat(json!({"a": 1}), json!({"a": 2})), json!({"a": 2}));
        assert_eq!(concat(json!([1]), json!([2, 3])), json!([1, 2, 3]));
        assert_eq!(concat(json!([1]), json!(2)), json!([1, 2]));
        assert_eq!(concat(json!("a"), json!({"b": 1})), json!(["a", {"b": 1}]));
    }

    #[tokio::test]
    async fn read_stream_scans_only_the_prefix() {
        let store = store();
        store.put("site.com/_pages/a", json!({"n": 1})).await.unwrap();
        store.put("site.com/_pages/b", json!({"n": 2})).await.unwrap();
        store.put("other.com/_pages/c", json!({"n": 3})).await.unwrap();

        let items: Vec<_> = store
            .create_read_stream(&ReadOptions::new("site.com/_pages"))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            items,
            vec![
                StreamItem::Record(json!({"n": 1, "_ref": "site.com/_pages/a"})),
                StreamItem::Record(json!({"n": 2, "_ref": "site.com/_pages/b"})),
            ]
        );

        let keys: Vec<_> = store
            .create_read_stream(&ReadOptions::new("site.com/_pages").with_values(false))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            keys,
            vec![
                StreamItem::Key("site.com/_pages/a".to_owned()),
                StreamItem::Key("site.com/_pages/b".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn cache_filters_ineligible_keys() {
        let cache = MemoryCache::new(Arc::new(Router::default()));
        cache
            .put("site.com/_components/c/instances/a", &json!({}))
            .await
            .unwrap();
        cache
            .put("site.com/_components/c/instances/a@published", &json!({"x": 1}))
            .await
            .unwrap();
        cache
            .batch(&[
                BatchOp::new("site.com/_lists/l", json!([])),
                BatchOp::new("site.com/_uris/u", json!("site.com/_pages/a")),
            ])
            .await
            .unwrap();

        assert_eq!(cache.len().await, 2);
        assert_eq!(
            cache.get("site.com/_uris/u").await.unwrap(),
            "site.com/_pages/a"
        );
        assert!(cache
            .get("site.com/_components/c/instances/a")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
