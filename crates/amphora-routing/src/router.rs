//! Mapping keys to storage destinations.
//!
//! Routing is first-match over the configured [`KindTable`]: the first kind
//! whose marker (`/_<kind>`) occurs anywhere in the key decides the
//! destination. Namespaced kinds route to `<kind>.<name>` where the name is
//! the segment after the marker; flat kinds route to a table named after
//! the kind.

use serde_json::Value;

use crate::envelope::{self, Envelope};
use crate::error::RoutingError;
use crate::key;
use crate::kind::{EntityKind, KindPolicy, KindTable, StorageClass};

/// Storage destination of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// The kind the key was classified as.
    pub kind: EntityKind,
    /// Schema for namespaced kinds, `None` for flat kinds.
    pub schema: Option<String>,
    /// Table within the schema (or the default search path).
    pub table: String,
}

/// Classifies keys against an ordered [`KindTable`].
#[derive(Debug, Clone, Default)]
pub struct Router {
    kinds: KindTable,
}

impl Router {
    /// Create a router over the given kind table.
    pub const fn new(kinds: KindTable) -> Self {
        Self { kinds }
    }

    /// The kind table this router matches against.
    pub const fn kinds(&self) -> &KindTable {
        &self.kinds
    }

    /// The first configured kind whose marker occurs in `key`.
    pub fn classify(&self, key: &str) -> Option<EntityKind> {
        self.kinds
            .iter()
            .map(|(kind, _)| kind)
            .find(|kind| key.contains(kind.marker()))
    }

    /// Resolve the (schema, table) destination of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Unrecognized`] when no kind matches and
    /// [`RoutingError::MissingName`] when a namespaced kind has no name
    /// segment.
    pub fn route(&self, key: &str) -> Result<Route, RoutingError> {
        let kind = self.classify(key).ok_or_else(|| RoutingError::Unrecognized {
            key: key.to_owned(),
        })?;

        match self.kinds.policy(kind).storage {
            StorageClass::Flat => Ok(Route {
                kind,
                schema: None,
                table: kind.name().to_owned(),
            }),
            StorageClass::Namespaced => {
                let name = key::sub_entity_name(key, kind).ok_or_else(|| {
                    RoutingError::MissingName {
                        key: key.to_owned(),
                        kind,
                    }
                })?;
                Ok(Route {
                    kind,
                    schema: Some(kind.name().to_owned()),
                    table: name.to_owned(),
                })
            }
        }
    }

    /// Policy of `kind` in this router's table.
    pub fn policy(&self, kind: EntityKind) -> KindPolicy {
        self.kinds.policy(kind)
    }

    /// Envelope applied to values of `kind`.
    pub fn envelope(&self, kind: EntityKind) -> Envelope {
        Envelope::from_policy(self.policy(kind).envelope)
    }

    /// Shape a caller's value for the durable store.
    pub fn encode(&self, kind: EntityKind, value: Value) -> Value {
        self.envelope(kind).wrap(value)
    }

    /// Recover a caller's value from the durable store.
    ///
    /// Uri rows may hold a boxed pointer even when uris are configured
    /// without an envelope, so an embedded `_value` always wins for them.
    pub fn decode(&self, kind: EntityKind, stored: Value) -> Value {
        match kind {
            EntityKind::Uri => envelope::open(stored),
            _ => self.envelope(kind).unwrap(stored),
        }
    }

    /// Whether `key` may be written to the shared cache.
    ///
    /// Published entities, uris and users are cacheable. Unpublished
    /// instances, lists and unrecognized keys never are.
    pub fn is_cacheable(&self, key: &str) -> bool {
        match self.classify(key) {
            Some(EntityKind::Uri | EntityKind::User) => true,
            Some(EntityKind::List) | None => false,
            Some(EntityKind::Component | EntityKind::Layout | EntityKind::Page) => {
                key::is_published(key)
            }
        }
    }

    /// Serialize a value the way the cache stores it.
    ///
    /// Uri targets are kept as bare strings; everything else is JSON text.
    pub fn cache_text(&self, key: &str, value: &Value) -> String {
        match (self.classify(key), value) {
            (Some(EntityKind::Uri), Value::String(target)) => target.clone(),
            _ => value.to_string(),
        }
    }

    /// Parse a cached string back into a value.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when a non-uri entry is not valid JSON.
    pub fn parse_cached(&self, key: &str, text: String) -> Result<Value, serde_json::Error> {
        match self.classify(key) {
            Some(EntityKind::Uri) => Ok(Value::String(text)),
            _ => serde_json::from_str(&text),
        }
    }
}
