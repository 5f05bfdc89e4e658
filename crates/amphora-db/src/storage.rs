//! Cache-aside orchestration.
//!
//! [`Storage`] composes a [`DurableBackend`] with a [`CacheBackend`]:
//!
//! | Operation | Order | Cache failure |
//! |-----------|-------|---------------|
//! | `get` | cache, then durable on miss | logged, falls through |
//! | `put` / `batch` | durable, then cache when enabled | propagated |
//! | `del` | cache (always), then durable | propagated |
//! | `patch` | durable merge, then cache invalidation | propagated |
//! | meta operations, streams | durable only | n/a |
//!
//! A durable hit after a cache miss is not written back to the cache.
//! Uri values must be string targets, so the cached bare string reads back
//! as the value that was written.

use std::sync::Arc;

use amphora_routing::{EntityKind, Router, envelope};
use serde_json::Value;
use sqlx::postgres::PgRow;

use crate::backend::{BatchOp, CacheBackend, DurableBackend, ReadOptions, RecordStream};
use crate::durable::PostgresStore;
use crate::error::StoreError;

/// The public key-value contract.
#[derive(Clone)]
pub struct Storage<D, C> {
    router: Arc<Router>,
    durable: D,
    cache: C,
    cache_enabled: bool,
}

impl<D, C> Storage<D, C> {
    /// Compose a storage handle; write-through is off until enabled.
    pub const fn new(router: Arc<Router>, durable: D, cache: C) -> Self {
        Self {
            router,
            durable,
            cache,
            cache_enabled: false,
        }
    }

    /// Set the global write-through flag.
    #[must_use]
    pub const fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Whether writes go through to the cache by default.
    pub const fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// The router shared by both backends.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The durable backend.
    pub const fn durable(&self) -> &D {
        &self.durable
    }

    /// The cache backend.
    pub const fn cache(&self) -> &C {
        &self.cache
    }

    fn check_value(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        if self.router.classify(key) == Some(EntityKind::Uri) && !value.is_string() {
            return Err(StoreError::Validation(format!(
                "uri {key} must point at a string target, got {value}"
            )));
        }
        Ok(())
    }
}

impl<D: DurableBackend, C: CacheBackend> Storage<D, C> {
    /// Read `key`, preferring the cache.
    ///
    /// # Errors
    ///
    /// Returns the durable store's error when the cache cannot answer,
    /// typically [`StoreError::NotFound`].
    pub async fn get(&self, key: &str) -> Result<Value, StoreError> {
        match self.cache.get(key).await {
            Ok(text) => match self.router.parse_cached(key, text) {
                Ok(value) => {
                    tracing::debug!(key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "Unreadable cache entry, using durable store");
                }
            },
            Err(e) if e.is_not_found() => tracing::debug!(key, "Cache miss"),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, using durable store");
            }
        }
        self.durable.get(key).await
    }

    /// Write `value` at `key`, returning the stored form.
    ///
    /// # Errors
    ///
    /// Returns the first failing backend's error.
    pub async fn put(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        self.put_with_cache(key, value, false).await
    }

    /// Like [`Storage::put`], writing through to the cache when
    /// `force_cache` or the global flag is set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for a uri value that is not a
    /// string, otherwise the first failing backend's error.
    pub async fn put_with_cache(
        &self,
        key: &str,
        value: Value,
        force_cache: bool,
    ) -> Result<Value, StoreError> {
        self.check_value(key, &value)?;
        if !self.writes_through(force_cache) {
            return self.durable.put(key, value).await;
        }
        let stored = self.durable.put(key, value.clone()).await?;
        self.cache.put(key, &value).await?;
        Ok(stored)
    }

    /// Write a pre-serialized payload, kept as a string when it is not JSON.
    ///
    /// Uri payloads are always kept as the target string.
    ///
    /// # Errors
    ///
    /// See [`Storage::put`].
    pub async fn put_serialized(&self, key: &str, text: &str) -> Result<Value, StoreError> {
        let value = if self.router.classify(key) == Some(EntityKind::Uri) {
            Value::String(text.to_owned())
        } else {
            envelope::parse_or_not(text)
        };
        self.put(key, value).await
    }

    /// Remove `key` from the cache, then from the durable store.
    ///
    /// # Errors
    ///
    /// Returns the first failing backend's error.
    pub async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.cache.del(key).await?;
        self.durable.del(key).await
    }

    /// Write every operation, failing if any fails.
    ///
    /// # Errors
    ///
    /// Returns the first failing operation's error.
    pub async fn batch(&self, ops: &[BatchOp]) -> Result<Vec<Value>, StoreError> {
        self.batch_with_cache(ops, false).await
    }

    /// Like [`Storage::batch`] with a per-call cache override.
    ///
    /// # Errors
    ///
    /// Returns the first failing operation's error.
    pub async fn batch_with_cache(
        &self,
        ops: &[BatchOp],
        force_cache: bool,
    ) -> Result<Vec<Value>, StoreError> {
        for op in ops {
            self.check_value(&op.key, &op.value)?;
        }
        let stored = self.durable.batch(ops).await?;
        if self.writes_through(force_cache) {
            self.cache.batch(ops).await?;
        }
        tracing::debug!(count = ops.len(), "Batch written");
        Ok(stored)
    }

    /// Read the meta column of `key`.
    ///
    /// # Errors
    ///
    /// Returns the durable store's error.
    pub async fn get_meta(&self, key: &str) -> Result<Value, StoreError> {
        self.durable.get_meta(key).await
    }

    /// Write the meta column of `key`.
    ///
    /// # Errors
    ///
    /// Returns the durable store's error.
    pub async fn put_meta(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        self.durable.put_meta(key, value).await
    }

    /// Merge `value` into the data of `key`, then drop its cache entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    pub async fn patch(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        let merged = self.durable.patch(key, value).await?;
        self.cache.del(key).await?;
        Ok(merged)
    }

    /// Merge `value` into the meta of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    pub async fn patch_meta(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        self.durable.patch_meta(key, value).await
    }

    /// Scan keys starting with `options.prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] or [`StoreError::Routing`] before
    /// any row is read.
    pub fn create_read_stream(&self, options: &ReadOptions) -> Result<RecordStream, StoreError> {
        self.durable.create_read_stream(options)
    }

    const fn writes_through(&self, force_cache: bool) -> bool {
        self.cache_enabled || force_cache
    }
}

impl<C: CacheBackend> Storage<PostgresStore, C> {
    /// Run arbitrary SQL against the durable store.
    ///
    /// # Errors
    ///
    /// See [`PostgresStore::raw`].
    pub async fn raw(&self, statement: &str, args: &Value) -> Result<Vec<PgRow>, StoreError> {
        self.durable.raw(statement, args).await
    }

    /// Run arbitrary SQL without arguments.
    ///
    /// # Errors
    ///
    /// See [`PostgresStore::raw_sql`].
    pub async fn raw_sql(&self, statement: &str) -> Result<Vec<PgRow>, StoreError> {
        self.durable.raw_sql(statement).await
    }
}
