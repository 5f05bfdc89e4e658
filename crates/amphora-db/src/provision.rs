//! Schema and table provisioning.
//!
//! Provisioning is idempotent: schemas, tables and optional columns use
//! `IF NOT EXISTS`, the timestamp function is replaced, triggers are dropped
//! and recreated. Tables created by an older layout gain the columns their
//! kind now needs before any trigger touches them.
//!
//! ```text
//! namespaced kind  -> CREATE SCHEMA "<kind>"
//!                     CREATE TABLE "<kind>"."<name>" for each registry name
//! flat kind        -> CREATE TABLE "<kind>"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use amphora_routing::{EntityKind, Router, StorageClass};
use sqlx::PgPool;

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::sql::{qualified, quote_ident};

/// Function keeping `updated_at` current.
const TIMESTAMP_FUNCTION: &str = "CREATE OR REPLACE FUNCTION on_update_timestamp() \
     RETURNS trigger AS $$ \
     BEGIN NEW.updated_at = now(); RETURN NEW; END; \
     $$ LANGUAGE plpgsql";

/// Concrete names of namespaced kinds (component names, layout names).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    names: BTreeMap<EntityKind, Vec<String>>,
}

impl Registry {
    /// Register `names` under `kind`.
    #[must_use]
    pub fn with_names<I, S>(mut self, kind: EntityKind, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names
            .entry(kind)
            .or_default()
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Names registered for `kind`.
    pub fn names(&self, kind: EntityKind) -> &[String] {
        self.names.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Read component and layout names from the configured directories.
    pub async fn discover(config: &StorageConfig) -> Self {
        Self::default()
            .with_names(
                EntityKind::Component,
                discover_names(&config.components_dir).await,
            )
            .with_names(EntityKind::Layout, discover_names(&config.layouts_dir).await)
    }
}

/// Sorted names of the visible sub-directories of `dir`.
///
/// An unreadable directory yields no names.
pub async fn discover_names(dir: &Path) -> Vec<String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Registry directory unreadable");
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_dir = entry
                    .file_type()
                    .await
                    .is_ok_and(|file_type| file_type.is_dir());
                let name = entry.file_name().to_string_lossy().into_owned();
                if is_dir && !name.starts_with('.') {
                    names.push(name);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Registry scan interrupted");
                break;
            }
        }
    }
    names.sort();
    names
}

/// Shape of one provisioned table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Owning schema, for namespaced kinds.
    pub schema: Option<String>,
    /// Table name.
    pub table: String,
    /// Whether the table has a `meta` column.
    pub meta: bool,
    /// Whether the table has a `url` column.
    pub url: bool,
}

impl TableSpec {
    /// `CREATE TABLE IF NOT EXISTS` for this table.
    pub fn create(&self, timestamps: bool) -> String {
        let mut columns = vec!["id TEXT PRIMARY KEY NOT NULL", "data JSONB"];
        if self.meta {
            columns.push("meta JSONB");
        }
        if self.url {
            columns.push("url TEXT");
        }
        if timestamps {
            columns.push("created_at TIMESTAMPTZ NOT NULL DEFAULT now()");
            columns.push("updated_at TIMESTAMPTZ NOT NULL DEFAULT now()");
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified(),
            columns.join(", ")
        )
    }

    /// `ALTER TABLE .. ADD COLUMN IF NOT EXISTS` for every optional column,
    /// so a table that predates a policy change gains it.
    pub fn upgrade(&self, timestamps: bool) -> Vec<String> {
        let mut columns = Vec::new();
        if self.meta {
            columns.push("meta JSONB");
        }
        if self.url {
            columns.push("url TEXT");
        }
        if timestamps {
            columns.push("created_at TIMESTAMPTZ NOT NULL DEFAULT now()");
            columns.push("updated_at TIMESTAMPTZ NOT NULL DEFAULT now()");
        }
        let table = self.qualified();
        columns
            .into_iter()
            .map(|column| format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column}"))
            .collect()
    }

    /// Statements (re)installing the `updated_at` trigger.
    pub fn trigger(&self) -> [String; 2] {
        let name = quote_ident(&self.trigger_name());
        let table = self.qualified();
        [
            format!("DROP TRIGGER IF EXISTS {name} ON {table}"),
            format!(
                "CREATE TRIGGER {name} BEFORE UPDATE ON {table} \
                 FOR EACH ROW EXECUTE PROCEDURE on_update_timestamp()"
            ),
        ]
    }

    /// Trigger name: the qualified table name with `-` replaced by `_`.
    pub fn trigger_name(&self) -> String {
        let base = match &self.schema {
            Some(schema) => format!("{schema}_{}", self.table),
            None => self.table.clone(),
        };
        format!("{}_updated_at", base.replace('-', "_"))
    }

    fn qualified(&self) -> String {
        qualified(self.schema.as_deref(), &self.table)
    }
}

/// Tables required by the router's kinds and the registry.
pub fn tables(router: &Router, registry: &Registry) -> Vec<TableSpec> {
    router
        .kinds()
        .iter()
        .flat_map(|(kind, policy)| {
            let url = kind == EntityKind::Uri;
            match policy.storage {
                StorageClass::Flat => vec![TableSpec {
                    schema: None,
                    table: kind.name().to_owned(),
                    meta: policy.meta,
                    url,
                }],
                StorageClass::Namespaced => registry
                    .names(kind)
                    .iter()
                    .map(|name| TableSpec {
                        schema: Some(kind.name().to_owned()),
                        table: name.clone(),
                        meta: policy.meta,
                        url,
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Every statement needed to provision the database, in execution order.
pub fn plan(router: &Router, registry: &Registry, timestamps: bool) -> Vec<String> {
    let mut statements = Vec::new();
    if timestamps {
        statements.push(TIMESTAMP_FUNCTION.to_owned());
    }

    statements.extend(
        router
            .kinds()
            .iter()
            .filter(|(_, policy)| policy.storage == StorageClass::Namespaced)
            .map(|(kind, _)| format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(kind.name()))),
    );

    for table in tables(router, registry) {
        statements.push(table.create(timestamps));
        statements.extend(table.upgrade(timestamps));
        if timestamps {
            statements.extend(table.trigger());
        }
    }
    statements
}

/// Execute a provisioning plan, one statement at a time.
///
/// # Errors
///
/// Returns [`StoreError::Postgres`] on the first failing statement.
pub async fn provision(pool: &PgPool, statements: &[String]) -> Result<(), StoreError> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(statements = statements.len(), "Provisioned schemas and tables");
    Ok(())
}
