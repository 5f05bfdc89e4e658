//! Backend seams of the cache-aside layer.
//!
//! [`DurableBackend`] is the authoritative store, [`CacheBackend`] the
//! best-effort accelerator. [`Storage`](crate::Storage) is generic over
//! both so production (`PostgreSQL` + Redis) and in-memory backends share
//! one orchestration policy.

use async_trait::async_trait;
use futures::future::try_join_all;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Field added to streamed records holding their key.
pub const REF_FIELD: &str = "_ref";

/// One `put` inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOp {
    /// Target key.
    pub key: String,
    /// Value to store.
    pub value: Value,
}

impl BatchOp {
    /// Create a batch operation.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Options of a prefix scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Key prefix; also routes the scan to its table.
    pub prefix: String,
    /// Emit keys.
    pub keys: bool,
    /// Emit values.
    pub values: bool,
}

impl ReadOptions {
    /// Scan `prefix`, emitting keys and values.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            keys: true,
            values: true,
        }
    }

    /// Toggle key output.
    #[must_use]
    pub const fn with_keys(mut self, keys: bool) -> Self {
        self.keys = keys;
        self
    }

    /// Toggle value output.
    #[must_use]
    pub const fn with_values(mut self, values: bool) -> Self {
        self.values = values;
        self
    }

    /// Reject scans that would emit nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when neither keys nor values are
    /// requested.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.keys || self.values {
            Ok(())
        } else {
            Err(StoreError::Validation(
                "read stream must request keys, values, or both".to_owned(),
            ))
        }
    }

    /// Shape one scanned row.
    ///
    /// With both keys and values the key is attached to the value as
    /// `_ref`; with keys only the bare key is emitted.
    pub fn shape(&self, id: String, data: Value) -> StreamItem {
        match (self.keys, self.values) {
            (true, false) => StreamItem::Key(id),
            (false, _) => StreamItem::Record(data),
            (true, true) => StreamItem::Record(attach_ref(data, id)),
        }
    }
}

/// One element of a read stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamItem {
    /// A bare key (keys-only scans).
    Key(String),
    /// A record, carrying `_ref` when keys were requested too.
    Record(Value),
}

impl StreamItem {
    /// Convert to a JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Self::Key(key) => Value::String(key),
            Self::Record(value) => value,
        }
    }
}

/// Lazily evaluated, finite sequence of scanned rows.
pub type RecordStream = BoxStream<'static, Result<StreamItem, StoreError>>;

fn attach_ref(data: Value, id: String) -> Value {
    match data {
        Value::Object(mut map) => {
            map.insert(REF_FIELD.to_owned(), Value::String(id));
            Value::Object(map)
        }
        // Non-object rows cannot carry a field.
        other => other,
    }
}

/// The authoritative store.
#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Read the value at `key`.
    async fn get(&self, key: &str) -> Result<Value, StoreError>;

    /// Upsert `value` at `key`, returning the stored (enveloped) form.
    async fn put(&self, key: &str, value: Value) -> Result<Value, StoreError>;

    /// Delete `key`; absent keys are not an error.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Apply `put` to every operation concurrently, failing fast.
    async fn batch(&self, ops: &[BatchOp]) -> Result<Vec<Value>, StoreError> {
        try_join_all(ops.iter().map(|op| self.put(&op.key, op.value.clone()))).await
    }

    /// Read the meta column of `key`.
    async fn get_meta(&self, key: &str) -> Result<Value, StoreError>;

    /// Upsert the meta column of `key`.
    async fn put_meta(&self, key: &str, value: Value) -> Result<Value, StoreError>;

    /// Shallow-merge `value` into the data of an existing `key`.
    async fn patch(&self, key: &str, value: Value) -> Result<Value, StoreError>;

    /// Shallow-merge `value` into the meta of an existing `key`.
    async fn patch_meta(&self, key: &str, value: Value) -> Result<Value, StoreError>;

    /// Start a prefix scan. Rows are produced when the stream is polled.
    fn create_read_stream(&self, options: &ReadOptions) -> Result<RecordStream, StoreError>;
}

/// The shared, write-through cache.
///
/// Implementations decide eligibility themselves: writes and deletes of
/// ineligible keys succeed without touching the cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read the cached text of `key`, or [`StoreError::NotFound`].
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Cache `value` at `key` if eligible.
    async fn put(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Remove `key` if eligible.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Cache every eligible operation in a single write.
    async fn batch(&self, ops: &[BatchOp]) -> Result<(), StoreError>;
}
