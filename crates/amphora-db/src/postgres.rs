//! `PostgreSQL` connection pool and configuration.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! to avoid requiring a live database at build time.
//!
//! When the first connection fails because the target database does not
//! exist (SQLSTATE `3D000`), the pool connects once to the administrative
//! `postgres` database, issues `CREATE DATABASE`, and retries. A second
//! failure is fatal, as is any other first failure.

use std::fmt;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};

use crate::error::StoreError;
use crate::sql::quote_ident;

/// Default minimum number of connections in the pool.
const DEFAULT_MIN_CONNECTIONS: u32 = 2;

/// Default maximum number of connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout in seconds.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Database used to create the target database when it is missing.
const ADMIN_DATABASE: &str = "postgres";

const STORE_NAME: &str = "PostgreSQL";

/// SQLSTATE reported when connecting to a database that does not exist.
const INVALID_CATALOG_NAME: &str = "3D000";

/// Configuration for the `PostgreSQL` connection pool.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login role.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Target database name.
    pub database: String,
    /// Minimum number of pooled connections.
    pub min_connections: u32,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5432,
            user: "postgres".to_owned(),
            password: "example".to_owned(),
            database: "clay".to_owned(),
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl PostgresConfig {
    /// Set the pool bounds.
    #[must_use]
    pub const fn with_pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// `host:port/database`, without credentials, for logs.
    pub fn describe(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    fn connect_options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(database)
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(self.min_connections.min(self.max_connections))
            .max_connections(self.max_connections)
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout)
    }
}

/// Connection pool handle to `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Connect to `PostgreSQL`, creating the target database if it does
    /// not exist.
    ///
    /// Only a missing database triggers creation; any other failure is
    /// returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the database cannot be reached
    /// or created.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        match Self::open(config).await {
            Ok(pool) => Ok(pool),
            Err(first) if !is_missing_database(&first) => Err(StoreError::Connection {
                store: STORE_NAME,
                reason: first.to_string(),
            }),
            Err(first) => {
                tracing::warn!(
                    database = %config.database,
                    error = %first,
                    "Database missing, attempting to create it"
                );
                create_database(config).await?;
                Self::open(config).await.map_err(|e| StoreError::Connection {
                    store: STORE_NAME,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn open(config: &PostgresConfig) -> Result<Self, sqlx::Error> {
        let pool = config
            .pool_options()
            .connect_with(config.connect_options(&config.database))
            .await?;

        tracing::info!(
            server = %config.describe(),
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return a reference to the underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

/// Whether `err` reports that the target database does not exist.
fn is_missing_database(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == INVALID_CATALOG_NAME)
}

/// Create the configured database through the administrative database.
async fn create_database(config: &PostgresConfig) -> Result<(), StoreError> {
    let connection_error = |e: sqlx::Error| StoreError::Connection {
        store: STORE_NAME,
        reason: e.to_string(),
    };

    let admin = config
        .pool_options()
        .min_connections(0)
        .max_connections(1)
        .connect_with(config.connect_options(ADMIN_DATABASE))
        .await
        .map_err(connection_error)?;

    let statement = format!("CREATE DATABASE {}", quote_ident(&config.database));
    let result = admin.execute(statement.as_str()).await;
    admin.close().await;
    result.map_err(connection_error)?;

    tracing::info!(database = %config.database, "Created database");
    Ok(())
}
