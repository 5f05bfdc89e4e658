//! Error types for key routing.

use crate::kind::EntityKind;

/// A key could not be mapped to a storage destination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// No configured entity kind marker occurs in the key.
    #[error("key does not match any recognized entity kind: {key}")]
    Unrecognized {
        /// The offending key.
        key: String,
    },

    /// The key names a namespaced kind but no sub-entity name follows the marker.
    #[error("key has no {kind} name after its marker: {key}")]
    MissingName {
        /// The offending key.
        key: String,
        /// The namespaced kind whose name segment is missing.
        kind: EntityKind,
    },
}

/// A configured entity kind name is not one of the recognized kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity kind: {0}")]
pub struct UnknownKind(pub String);
