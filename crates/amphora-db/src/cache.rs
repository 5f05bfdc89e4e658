//! Redis write-through cache adapter.
//!
//! Every entry lives in a single hash: the field is the full key and the
//! value is the stringified data. Only cache-eligible keys are written.
//!
//! # Layout
//!
//! | Hash | Field | Value |
//! |------|-------|-------|
//! | `<CLAY_STORAGE_REDIS_HASH>` | full key | JSON text, or the bare target for uris |
//!
//! An adapter built with [`RedisCache::disabled`] has no client: writes and
//! deletes succeed without effect and reads report [`StoreError::NotFound`].

use std::sync::Arc;

use amphora_routing::Router;
use async_trait::async_trait;
use fred::prelude::*;
use serde_json::Value;

use crate::backend::{BatchOp, CacheBackend};
use crate::config::CacheEndpoint;
use crate::error::StoreError;

const STORE_NAME: &str = "Redis";

/// Handle to the cache hash.
#[derive(Clone)]
pub struct RedisCache {
    client: Option<Client>,
    hash: String,
    router: Arc<Router>,
}

impl RedisCache {
    /// An adapter with no client.
    pub fn disabled(hash: impl Into<String>, router: Arc<Router>) -> Self {
        Self {
            client: None,
            hash: hash.into(),
            router,
        }
    }

    /// Connect to a single node or a cluster.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the URL cannot be parsed or
    /// the connection fails.
    pub async fn connect(
        endpoint: &CacheEndpoint,
        hash: impl Into<String>,
        router: Arc<Router>,
    ) -> Result<Self, StoreError> {
        let connection_error = |reason: String| StoreError::Connection {
            store: STORE_NAME,
            reason,
        };

        let config = match endpoint {
            CacheEndpoint::Single(url) => Config::from_url(url)
                .map_err(|e| connection_error(format!("invalid Redis URL: {e}")))?,
            CacheEndpoint::Cluster(hosts) => Config {
                server: ServerConfig::new_clustered(hosts.clone()),
                ..Config::default()
            },
        };

        let client = Builder::from_config(config)
            .build()
            .map_err(|e| connection_error(e.to_string()))?;
        client
            .init()
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        let hash = hash.into();
        tracing::info!(server = %endpoint.describe(), hash = %hash, "Connected to Redis");
        Ok(Self {
            client: Some(client),
            hash,
            router,
        })
    }

    /// Whether a client is attached.
    pub const fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Name of the hash holding the entries.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Return a reference to the underlying [`Client`], if any.
    pub const fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    /// The client, when `key` should be written.
    fn writer(&self, key: &str) -> Option<&Client> {
        self.client
            .as_ref()
            .filter(|_| self.router.is_cacheable(key))
    }

    /// Close the connection, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if the quit command fails.
    pub async fn close(&self) -> Result<(), StoreError> {
        if let Some(client) = &self.client {
            client.quit().await?;
            tracing::info!("Redis connection closed");
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| StoreError::not_found(key))?;
        let value: Option<String> = client.hget(self.hash.as_str(), key).await?;
        value.ok_or_else(|| StoreError::not_found(key))
    }

    async fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let Some(client) = self.writer(key) else {
            return Ok(());
        };
        let text = self.router.cache_text(key, value);
        let _: i64 = client.hset(self.hash.as_str(), (key, text)).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let Some(client) = self.writer(key) else {
            return Ok(());
        };
        let _: i64 = client.hdel(self.hash.as_str(), key).await?;
        Ok(())
    }

    async fn batch(&self, ops: &[BatchOp]) -> Result<(), StoreError> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        let fields: Vec<(&str, String)> = ops
            .iter()
            .filter(|op| self.router.is_cacheable(&op.key))
            .map(|op| (op.key.as_str(), self.router.cache_text(&op.key, &op.value)))
            .collect();
        if fields.is_empty() {
            return Ok(());
        }

        let count = fields.len();
        let _: i64 = client.hset(self.hash.as_str(), fields).await?;
        tracing::debug!(count, "Cached batch");
        Ok(())
    }
}
