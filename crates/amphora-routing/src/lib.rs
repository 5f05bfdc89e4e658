//! Key routing for Amphora storage.
//!
//! Every storage operation starts from an opaque key such as
//! `site.com/_components/button/instances/1@published`. This crate turns
//! that key into everything the storage adapters need to know, without
//! performing any I/O:
//!
//! ```text
//! key --> Router::route() --> Route { kind, schema, table }
//!     --> Router::encode() / decode() (envelope per kind)
//!     --> Router::is_cacheable() (cache eligibility)
//! ```
//!
//! # Modules
//!
//! - [`kind`] -- Entity kinds and the ordered per-kind policy table
//! - [`router`] -- Key to (schema, table) routing and classification
//! - [`envelope`] -- `{"_value": ...}` wrapping for scalar-valued kinds
//! - [`key`] -- Small key predicates and segment extraction
//! - [`error`] -- Routing and kind-parsing errors

pub mod envelope;
pub mod error;
pub mod key;
pub mod kind;
pub mod router;

pub use envelope::{ENVELOPE_FIELD, Envelope};
pub use error::{RoutingError, UnknownKind};
pub use kind::{EntityKind, KindPolicy, KindTable, StorageClass};
pub use router::{Route, Router};
