//! Configuration for the storage layer, loaded from the environment.
//!
//! Every setting has a default so a bare environment connects to a local
//! `PostgreSQL` with caching disabled. The cache endpoint is the only
//! setting without a default: enabling the cache requires either a
//! single-node URL or a cluster host list.

use std::path::PathBuf;

use amphora_routing::{KindTable, UnknownKind};

use crate::postgres::PostgresConfig;

/// Default Redis port for cluster hosts given without one.
const DEFAULT_REDIS_PORT: u16 = 6379;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but its value cannot be used.
    #[error("invalid {name}: {reason}")]
    Invalid {
        /// The environment variable name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The recognized kind list names an unknown kind.
    #[error("invalid CLAY_STORAGE_DATA_STRUCTURES: {0}")]
    Kinds(#[from] UnknownKind),

    /// The cache is needed but neither a URL nor cluster hosts are set.
    #[error("no Redis URL or cluster hosts configured")]
    NoCacheEndpoint,
}

/// Where the cache lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEndpoint {
    /// A single node, addressed by a `redis://` URL.
    Single(String),
    /// A cluster, addressed by its seed nodes.
    Cluster(Vec<(String, u16)>),
}

impl CacheEndpoint {
    /// Pick the endpoint strategy: single node first, then cluster.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoCacheEndpoint`] when neither is configured,
    /// or [`ConfigError::Invalid`] when a cluster port does not parse.
    pub fn resolve(url: Option<&str>, cluster_hosts: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) {
            return Ok(Self::Single(url.to_owned()));
        }

        let hosts = cluster_hosts
            .map(parse_cluster_hosts)
            .transpose()?
            .unwrap_or_default();
        if hosts.is_empty() {
            return Err(ConfigError::NoCacheEndpoint);
        }
        Ok(Self::Cluster(hosts))
    }

    /// Human-readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Single(url) => url.clone(),
            Self::Cluster(hosts) => hosts
                .iter()
                .map(|(host, port)| format!("{host}:{port}"))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Parse `host[:port]` entries separated by commas.
fn parse_cluster_hosts(list: &str) -> Result<Vec<(String, u16)>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.rsplit_once(':') {
            Some((host, port)) => port
                .parse::<u16>()
                .map(|port| (host.to_owned(), port))
                .map_err(|e| ConfigError::Invalid {
                    name: "CLAY_STORAGE_REDIS_CLUSTER_HOSTS".to_owned(),
                    reason: format!("bad port in {entry}: {e}"),
                }),
            None => Ok((entry.to_owned(), DEFAULT_REDIS_PORT)),
        })
        .collect()
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Global write-through flag.
    pub enabled: bool,
    /// Name of the hash holding every cache entry.
    pub hash: String,
    /// Single-node URL.
    pub url: Option<String>,
    /// Comma-separated cluster seed nodes.
    pub cluster_hosts: Option<String>,
}

impl CacheConfig {
    /// Resolve the configured endpoint.
    ///
    /// # Errors
    ///
    /// See [`CacheEndpoint::resolve`].
    pub fn endpoint(&self) -> Result<CacheEndpoint, ConfigError> {
        CacheEndpoint::resolve(self.url.as_deref(), self.cluster_hosts.as_deref())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hash: "clay".to_owned(),
            url: None,
            cluster_hosts: None,
        }
    }
}

/// Complete storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// `PostgreSQL` connection and pool settings.
    pub postgres: PostgresConfig,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Recognized kinds, in routing order.
    pub kinds: KindTable,
    /// Whether provisioning adds `created_at`/`updated_at` columns.
    pub timestamps: bool,
    /// Directory whose sub-directories name the components.
    pub components_dir: PathBuf,
    /// Directory whose sub-directories name the layouts.
    pub layouts_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            postgres: PostgresConfig::default(),
            cache: CacheConfig::default(),
            kinds: KindTable::default(),
            timestamps: true,
            components_dir: PathBuf::from("components"),
            layouts_dir: PathBuf::from("layouts"),
        }
    }
}

impl StorageConfig {
    /// Load configuration from `CLAY_STORAGE_*` environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CLAY_STORAGE_POSTGRES_USER` | `postgres` |
    /// | `CLAY_STORAGE_POSTGRES_PASSWORD` | `example` |
    /// | `CLAY_STORAGE_POSTGRES_HOST` | `localhost` |
    /// | `CLAY_STORAGE_POSTGRES_PORT` | `5432` |
    /// | `CLAY_STORAGE_POSTGRES_DB` | `clay` |
    /// | `CLAY_STORAGE_CONNECTION_POOL_MIN` | `2` |
    /// | `CLAY_STORAGE_CONNECTION_POOL_MAX` | `10` |
    /// | `CLAY_STORAGE_CACHE_ENABLED` | `false` |
    /// | `CLAY_STORAGE_REDIS_HASH` | `clay` |
    /// | `CLAY_STORAGE_REDIS_URL` / `CLAY_STORAGE_REDIS_HOST` | unset |
    /// | `CLAY_STORAGE_REDIS_CLUSTER_HOSTS` | unset |
    /// | `CLAY_STORAGE_DATA_STRUCTURES` | all six kinds |
    /// | `CLAY_STORAGE_NAMESPACED_LISTS` | `false` |
    /// | `CLAY_STORAGE_WRAP_URIS` | `true` |
    /// | `CLAY_STORAGE_TIMESTAMPS` | `true` |
    /// | `CLAY_STORAGE_COMPONENTS_DIR` | `components` |
    /// | `CLAY_STORAGE_LAYOUTS_DIR` | `layouts` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = Self::default();

        let mut postgres = defaults.postgres;
        if let Some(user) = env.string("CLAY_STORAGE_POSTGRES_USER") {
            postgres.user = user;
        }
        if let Some(password) = env.string("CLAY_STORAGE_POSTGRES_PASSWORD") {
            postgres.password = password;
        }
        if let Some(host) = env.string("CLAY_STORAGE_POSTGRES_HOST") {
            postgres.host = host;
        }
        if let Some(database) = env.string("CLAY_STORAGE_POSTGRES_DB") {
            postgres.database = database;
        }
        postgres.port = env.parsed("CLAY_STORAGE_POSTGRES_PORT", postgres.port)?;
        postgres.min_connections =
            env.parsed("CLAY_STORAGE_CONNECTION_POOL_MIN", postgres.min_connections)?;
        postgres.max_connections =
            env.parsed("CLAY_STORAGE_CONNECTION_POOL_MAX", postgres.max_connections)?;

        let cache = CacheConfig {
            enabled: env.flag("CLAY_STORAGE_CACHE_ENABLED", defaults.cache.enabled)?,
            hash: env
                .string("CLAY_STORAGE_REDIS_HASH")
                .unwrap_or(defaults.cache.hash),
            url: env
                .string("CLAY_STORAGE_REDIS_URL")
                .or_else(|| env.string("CLAY_STORAGE_REDIS_HOST")),
            cluster_hosts: env.string("CLAY_STORAGE_REDIS_CLUSTER_HOSTS"),
        };

        let kinds = env
            .string("CLAY_STORAGE_DATA_STRUCTURES")
            .map(|list| KindTable::parse_list(&list))
            .transpose()?
            .unwrap_or(defaults.kinds)
            .with_namespaced_lists(env.flag("CLAY_STORAGE_NAMESPACED_LISTS", false)?)
            .with_wrapped_uris(env.flag("CLAY_STORAGE_WRAP_URIS", true)?);

        Ok(Self {
            postgres,
            cache,
            kinds,
            timestamps: env.flag("CLAY_STORAGE_TIMESTAMPS", defaults.timestamps)?,
            components_dir: env
                .string("CLAY_STORAGE_COMPONENTS_DIR")
                .map_or(defaults.components_dir, PathBuf::from),
            layouts_dir: env
                .string("CLAY_STORAGE_LAYOUTS_DIR")
                .map_or(defaults.layouts_dir, PathBuf::from),
        })
    }
}

/// Typed access over a variable lookup; empty values count as unset.
struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|value| !value.trim().is_empty())
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(name).map_or(Ok(default), |raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name: name.to_owned(),
                reason: e.to_string(),
            })
        })
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.string(name) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                name: name.to_owned(),
                reason: format!("expected a boolean, got {other:?}"),
            }),
        }
    }
}
