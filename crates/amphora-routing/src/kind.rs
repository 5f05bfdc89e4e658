//! Entity kinds and the per-kind storage policy table.
//!
//! The [`KindTable`] is ordered: routing scans it front to back and the
//! first kind whose marker occurs in a key wins. The default order is the
//! canonical `components, layouts, pages, uris, lists, users`.
//!
//! | Kind | Storage | Envelope | Meta |
//! |------|---------|----------|------|
//! | `components` | namespaced | no | no |
//! | `layouts` | namespaced | no | yes |
//! | `pages` | flat | no | yes |
//! | `uris` | flat | yes | no |
//! | `lists` | flat | yes | no |
//! | `users` | flat | no | no |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnknownKind;

/// The classification of a key, derived from its marker segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A component instance, stored in the `components` schema.
    Component,
    /// A layout instance, stored in the `layouts` schema.
    Layout,
    /// A page.
    Page,
    /// A uri pointing at another key.
    Uri,
    /// A list of arbitrary items.
    List,
    /// A user record.
    User,
}

impl EntityKind {
    /// Every kind in canonical routing order.
    pub const ALL: [Self; 6] = [
        Self::Component,
        Self::Layout,
        Self::Page,
        Self::Uri,
        Self::List,
        Self::User,
    ];

    /// The plural name used in keys, schemas and flat table names.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Component => "components",
            Self::Layout => "layouts",
            Self::Page => "pages",
            Self::Uri => "uris",
            Self::List => "lists",
            Self::User => "users",
        }
    }

    /// The marker segment that identifies this kind inside a key.
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Component => "/_components",
            Self::Layout => "/_layouts",
            Self::Page => "/_pages",
            Self::Uri => "/_uris",
            Self::List => "/_lists",
            Self::User => "/_users",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == trimmed)
            .ok_or_else(|| UnknownKind(trimmed.to_owned()))
    }
}

/// How records of a kind are laid out in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    /// The kind owns a schema; the name after the marker selects the table.
    Namespaced,
    /// The kind maps to a single table named after the kind.
    Flat,
}

/// Storage policy for one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    /// Schema-per-kind or single table.
    pub storage: StorageClass,
    /// Whether values are boxed as `{"_value": ...}` before storage.
    pub envelope: bool,
    /// Whether the kind's tables carry a `meta` column.
    pub meta: bool,
}

impl KindPolicy {
    /// The canonical policy for `kind`.
    pub const fn default_for(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Component => Self::namespaced(false),
            EntityKind::Layout => Self::namespaced(true),
            EntityKind::Page => Self::flat(false, true),
            EntityKind::Uri | EntityKind::List => Self::flat(true, false),
            EntityKind::User => Self::flat(false, false),
        }
    }

    const fn namespaced(meta: bool) -> Self {
        Self {
            storage: StorageClass::Namespaced,
            envelope: false,
            meta,
        }
    }

    const fn flat(envelope: bool, meta: bool) -> Self {
        Self {
            storage: StorageClass::Flat,
            envelope,
            meta,
        }
    }
}

/// Ordered list of recognized kinds with their policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindTable {
    entries: Vec<(EntityKind, KindPolicy)>,
}

impl KindTable {
    /// Build a table from an ordered list of kinds using canonical policies.
    ///
    /// Repeated kinds keep their first position.
    pub fn new(order: impl IntoIterator<Item = EntityKind>) -> Self {
        let mut entries: Vec<(EntityKind, KindPolicy)> = Vec::new();
        for kind in order {
            if !entries.iter().any(|(existing, _)| *existing == kind) {
                entries.push((kind, KindPolicy::default_for(kind)));
            }
        }
        Self { entries }
    }

    /// Parse a comma-separated list of kind names, e.g. `"components,pages"`.
    pub fn parse_list(list: &str) -> Result<Self, UnknownKind> {
        let kinds = list
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .map(EntityKind::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(kinds))
    }

    /// Replace the policy of `kind`, if it is part of the table.
    #[must_use]
    pub fn with_policy(mut self, kind: EntityKind, policy: KindPolicy) -> Self {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == kind) {
            entry.1 = policy;
        }
        self
    }

    /// Give lists their own schema, keyed by the list name.
    #[must_use]
    pub fn with_namespaced_lists(self, namespaced: bool) -> Self {
        let mut policy = self.policy(EntityKind::List);
        policy.storage = if namespaced {
            StorageClass::Namespaced
        } else {
            StorageClass::Flat
        };
        self.with_policy(EntityKind::List, policy)
    }

    /// Toggle the envelope for uri values.
    #[must_use]
    pub fn with_wrapped_uris(self, wrapped: bool) -> Self {
        let mut policy = self.policy(EntityKind::Uri);
        policy.envelope = wrapped;
        self.with_policy(EntityKind::Uri, policy)
    }

    /// Iterate kinds and policies in routing order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, KindPolicy)> + '_ {
        self.entries.iter().copied()
    }

    /// Whether `kind` is recognized by this table.
    pub fn contains(&self, kind: EntityKind) -> bool {
        self.entries.iter().any(|(k, _)| *k == kind)
    }

    /// The policy for `kind`, falling back to the canonical one.
    pub fn policy(&self, kind: EntityKind) -> KindPolicy {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or_else(|| KindPolicy::default_for(kind), |(_, policy)| *policy)
    }

    /// Number of recognized kinds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no kinds are recognized.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for KindTable {
    fn default() -> Self {
        Self::new(EntityKind::ALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_canonical_order() {
        let table = KindTable::default();
        let names: Vec<&str> = table.iter().map(|(kind, _)| kind.name()).collect();
        assert_eq!(
            names,
            ["components", "layouts", "pages", "uris", "lists", "users"]
        );
    }

    #[test]
    fn canonical_policies() {
        let table = KindTable::default();
        assert_eq!(
            table.policy(EntityKind::Component).storage,
            StorageClass::Namespaced
        );
        assert!(table.policy(EntityKind::Layout).meta);
        assert!(table.policy(EntityKind::Page).meta);
        assert!(table.policy(EntityKind::List).envelope);
        assert!(table.policy(EntityKind::Uri).envelope);
        assert!(!table.policy(EntityKind::User).envelope);
        assert_eq!(table.policy(EntityKind::List).storage, StorageClass::Flat);
    }

    #[test]
    fn parse_list_keeps_order_and_drops_duplicates() {
        let table = KindTable::parse_list("pages, components,pages,,users").unwrap_or_default();
        let kinds: Vec<EntityKind> = table.iter().map(|(kind, _)| kind).collect();
        assert_eq!(
            kinds,
            [EntityKind::Page, EntityKind::Component, EntityKind::User]
        );
    }

    #[test]
    fn parse_list_rejects_unknown_names() {
        let err = KindTable::parse_list("components,widgets");
        assert_eq!(err, Err(UnknownKind("widgets".to_owned())));
    }

    #[test]
    fn policy_toggles() {
        let table = KindTable::default()
            .with_namespaced_lists(true)
            .with_wrapped_uris(false);
        assert_eq!(
            table.policy(EntityKind::List).storage,
            StorageClass::Namespaced
        );
        assert!(!table.policy(EntityKind::Uri).envelope);
    }

    #[test]
    fn kind_round_trips_through_its_name() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.name().parse::<EntityKind>(), Ok(kind));
            assert!(kind.marker().ends_with(kind.name()));
        }
    }
}
