//! Composition root.
//!
//! [`setup`] connects `PostgreSQL` (creating the database if it is
//! missing), provisions schemas and tables, connects the cache when
//! write-through is enabled, and returns the assembled [`Storage`].

use std::sync::Arc;

use amphora_routing::Router;

use crate::cache::RedisCache;
use crate::config::StorageConfig;
use crate::durable::PostgresStore;
use crate::error::StoreError;
use crate::postgres::PostgresPool;
use crate::provision::{self, Registry};
use crate::storage::Storage;

/// Storage over `PostgreSQL` and Redis.
pub type PgStorage = Storage<PostgresStore, RedisCache>;

/// Where the stores were reached, for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Servers {
    /// `host:port/database` of `PostgreSQL`.
    pub postgres: String,
    /// Cache endpoint, when connected.
    pub cache: Option<String>,
}

/// Everything [`setup`] produced.
pub struct Bootstrap {
    /// The ready-to-use storage handle.
    pub storage: PgStorage,
    /// Where the stores were reached.
    pub servers: Servers,
}

/// Connect, provision and assemble the storage layer.
///
/// # Errors
///
/// Returns [`StoreError::Connection`] if a store cannot be reached,
/// [`StoreError::Config`] if the cache is enabled without an endpoint, or
/// [`StoreError::Postgres`] if provisioning fails.
pub async fn setup(config: &StorageConfig) -> Result<Bootstrap, StoreError> {
    let router = Arc::new(Router::new(config.kinds.clone()));

    let pool = PostgresPool::connect(&config.postgres).await?;
    let registry = Registry::discover(config).await;
    let statements = provision::plan(&router, &registry, config.timestamps);
    provision::provision(pool.pool(), &statements).await?;

    let (cache, cache_server) = if config.cache.enabled {
        let endpoint = config.cache.endpoint()?;
        let cache =
            RedisCache::connect(&endpoint, config.cache.hash.as_str(), Arc::clone(&router)).await?;
        (cache, Some(endpoint.describe()))
    } else {
        tracing::info!("Cache disabled");
        (
            RedisCache::disabled(config.cache.hash.as_str(), Arc::clone(&router)),
            None,
        )
    };

    let servers = Servers {
        postgres: config.postgres.describe(),
        cache: cache_server,
    };
    let durable = PostgresStore::new(pool, Arc::clone(&router));
    let storage = Storage::new(router, durable, cache).with_cache_enabled(config.cache.enabled);

    Ok(Bootstrap { storage, servers })
}
