//! Storage layer for Amphora (`PostgreSQL` + Redis).
//!
//! `PostgreSQL` is the authoritative store: one schema per namespaced kind,
//! one table per flat kind or per concrete component/layout name. Redis is
//! a write-through accelerator holding published entities, uris and users
//! in a single hash.
//!
//! # Architecture (cache-aside)
//!
//! ```text
//! Caller
//!     |
//!     +-- Storage (cache-aside policy)
//!         |-- CacheBackend    RedisCache | MemoryCache
//!         +-- DurableBackend  PostgresStore | MemoryStore
//!                 |
//!                 +-- Router (amphora-routing): key -> schema.table, envelope
//! ```
//!
//! # Modules
//!
//! - [`backend`] -- Backend traits, batch and stream types
//! - [`cache`] -- Redis cache adapter
//! - [`config`] -- Environment configuration
//! - [`durable`] -- `PostgreSQL` durable store adapter
//! - [`memory`] -- In-memory backends
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`provision`] -- Schema, table and trigger provisioning
//! - [`setup`] -- Composition root
//! - [`sql`] -- Statement text
//! - [`storage`] -- Cache-aside orchestrator
//! - [`error`] -- Shared error types

pub mod backend;
pub mod cache;
pub mod config;
pub mod durable;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod provision;
pub mod setup;
pub mod sql;
pub mod storage;

// Re-export primary types for convenience.
pub use backend::{BatchOp, CacheBackend, DurableBackend, ReadOptions, RecordStream, StreamItem};
pub use cache::RedisCache;
pub use config::{CacheConfig, CacheEndpoint, ConfigError, StorageConfig};
pub use durable::PostgresStore;
pub use error::StoreError;
pub use memory::{MemoryCache, MemoryStore};
pub use postgres::{PostgresConfig, PostgresPool};
pub use provision::Registry;
pub use setup::{Bootstrap, PgStorage, Servers, setup};
pub use storage::Storage;
