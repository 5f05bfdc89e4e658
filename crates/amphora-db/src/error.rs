//! Error types for the storage layer.
//!
//! All errors are propagated via [`StoreError`] which wraps the underlying
//! [`sqlx`] and [`fred`] errors alongside the storage-level failures
//! (missing keys, unroutable keys, bad arguments).

use amphora_routing::RoutingError;

use crate::config::ConfigError;

/// Errors that can occur in the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key is absent from the consulted store.
    #[error("Key not found in database: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The key could not be mapped to a schema and table.
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Initial connection to a backing store failed.
    #[error("Could not connect to {store}: {reason}")]
    Connection {
        /// Which store (`PostgreSQL` or `Redis`).
        store: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// Call arguments were rejected before any I/O.
    #[error("Invalid arguments: {0}")]
    Validation(String),

    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration was missing or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Build a [`StoreError::NotFound`] for `key`.
    pub fn not_found(key: &str) -> Self {
        Self::NotFound {
            key: key.to_owned(),
        }
    }

    /// Whether this error reports a missing key.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The missing key, for [`StoreError::NotFound`].
    pub fn missing_key(&self) -> Option<&str> {
        match self {
            Self::NotFound { key } => Some(key),
            _ => None,
        }
    }
}
