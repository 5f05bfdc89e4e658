//! The durable store adapter over `PostgreSQL`.
//!
//! Every operation routes its key first; an unroutable key fails with
//! [`StoreError::Routing`] before any query is built. Values travel as
//! bound `jsonb` parameters.

use std::sync::Arc;

use amphora_routing::key::uri_target;
use amphora_routing::{EntityKind, Router};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt, stream};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Postgres, Row};

use crate::backend::{DurableBackend, ReadOptions, RecordStream, StreamItem};
use crate::error::StoreError;
use crate::postgres::PostgresPool;
use crate::sql::{self, DATA, META};

/// Rows buffered between the scan task and the stream consumer.
const STREAM_BUFFER: usize = 64;

/// Durable store backed by a [`PostgresPool`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PostgresPool,
    router: Arc<Router>,
}

impl PostgresStore {
    /// Create a store over an established pool.
    pub const fn new(pool: PostgresPool, router: Arc<Router>) -> Self {
        Self { pool, router }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    /// The router used to locate tables.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Run arbitrary SQL with positional arguments.
    ///
    /// Arguments bind by JSON type: `null`, booleans, integers, floats and
    /// strings as their SQL counterparts, arrays and objects as `jsonb`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when `args` is not an array, or
    /// [`StoreError::Postgres`] if the statement fails.
    pub async fn raw(&self, statement: &str, args: &Value) -> Result<Vec<PgRow>, StoreError> {
        let Value::Array(args) = args else {
            return Err(StoreError::Validation(format!(
                "raw arguments must be an array, got {args}"
            )));
        };

        let query = args.iter().fold(sqlx::query(statement), bind_json);
        Ok(query.fetch_all(self.pool.pool()).await?)
    }

    /// Run arbitrary SQL without arguments.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the statement fails.
    pub async fn raw_sql(&self, statement: &str) -> Result<Vec<PgRow>, StoreError> {
        Ok(sqlx::query(statement).fetch_all(self.pool.pool()).await?)
    }

    async fn select(&self, key: &str, column: &str) -> Result<(EntityKind, Value), StoreError> {
        let route = self.router.route(key)?;
        let row: Option<Option<Value>> = sqlx::query_scalar(&sql::select(&route, column))
            .bind(key)
            .fetch_optional(self.pool.pool())
            .await?;
        let value = row.ok_or_else(|| StoreError::not_found(key))?;
        Ok((route.kind, value.unwrap_or(Value::Null)))
    }

    async fn upsert(&self, key: &str, column: &str, value: &Value) -> Result<Value, StoreError> {
        let route = self.router.route(key)?;
        let with_url = column == DATA && route.kind == EntityKind::Uri;
        let statement = sql::upsert(&route, column, with_url);

        let mut query = sqlx::query_scalar(&statement).bind(key).bind(Json(value));
        if with_url {
            query = query.bind(uri_target(key));
        }
        let stored: Option<Value> = query.fetch_one(self.pool.pool()).await?;

        tracing::debug!(key, column, table = %sql::table_ref(&route), "Upserted");
        Ok(stored.unwrap_or(Value::Null))
    }

    async fn merge(&self, key: &str, column: &str, value: &Value) -> Result<Value, StoreError> {
        let route = self.router.route(key)?;
        let merged: Option<Option<Value>> = sqlx::query_scalar(&sql::merge(&route, column))
            .bind(key)
            .bind(Json(value))
            .fetch_optional(self.pool.pool())
            .await?;
        merged
            .map(|value| value.unwrap_or(Value::Null))
            .ok_or_else(|| StoreError::not_found(key))
    }
}

#[async_trait]
impl DurableBackend for PostgresStore {
    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        let (kind, stored) = self.select(key, DATA).await?;
        Ok(self.router.decode(kind, stored))
    }

    async fn put(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        let kind = self.router.route(key)?.kind;
        let stored = self.router.encode(kind, value);
        self.upsert(key, DATA, &stored).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let route = self.router.route(key)?;
        let result = sqlx::query(&sql::delete(&route))
            .bind(key)
            .execute(self.pool.pool())
            .await?;
        tracing::debug!(key, rows = result.rows_affected(), "Deleted");
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Value, StoreError> {
        self.select(key, META).await.map(|(_, meta)| meta)
    }

    async fn put_meta(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        self.upsert(key, META, &value).await
    }

    async fn patch(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        self.merge(key, DATA, &value).await
    }

    async fn patch_meta(&self, key: &str, value: Value) -> Result<Value, StoreError> {
        self.merge(key, META, &value).await
    }

    fn create_read_stream(&self, options: &ReadOptions) -> Result<RecordStream, StoreError> {
        options.validate()?;
        let route = self.router.route(&options.prefix)?;
        let statement = sql::scan(&route, options.keys, options.values);
        let pattern = sql::like_prefix(&options.prefix);
        let pool = self.pool.pool().clone();
        let options = options.clone();

        // The scan starts on first poll and feeds rows through a bounded
        // channel so a slow consumer applies backpressure to the cursor.
        let rows = stream::once(async move {
            let (mut tx, rx) = mpsc::channel(STREAM_BUFFER);
            tokio::spawn(async move {
                let mut rows = sqlx::query(&statement).bind(pattern).fetch(&pool);
                while let Some(row) = rows.next().await {
                    let item = row
                        .map_err(StoreError::from)
                        .and_then(|row| shape_row(&row, &options));
                    let failed = item.is_err();
                    if tx.send(item).await.is_err() || failed {
                        break;
                    }
                }
            });
            rx
        })
        .flatten();

        Ok(rows.boxed())
    }
}

fn shape_row(row: &PgRow, options: &ReadOptions) -> Result<StreamItem, StoreError> {
    let id: String = if options.keys {
        row.try_get("id")?
    } else {
        String::new()
    };
    let data: Value = if options.values {
        row.try_get::<Option<Value>, _>(DATA)?
            .unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    Ok(options.shape(id, data))
}

fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    arg: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match arg {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => query.bind(int),
            None => query.bind(number.as_f64()),
        },
        Value::String(text) => query.bind(text.as_str()),
        Value::Array(_) | Value::Object(_) => query.bind(Json(arg)),
    }
}
