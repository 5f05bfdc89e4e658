//! Small predicates and segment extraction over raw keys.
//!
//! Keys look like `site.com/_components/button/instances/1@published`:
//! a site prefix, a kind marker, an optional sub-entity name, and an
//! optional instance path with a trailing `@version`.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::kind::EntityKind;

/// Version suffix carried by published entities.
pub const PUBLISHED_SUFFIX: &str = "@published";

/// Standard alphabet, padding optional.
const URI_SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Whether the key addresses the published version of an entity.
pub fn is_published(key: &str) -> bool {
    key.ends_with(PUBLISHED_SUFFIX)
}

/// Extract the sub-entity name following `kind`'s marker.
///
/// The name runs from the character after `/_<kind>/` up to the next `/`,
/// `@` or `.`. Returns `None` when the marker is absent or the name is
/// empty.
pub fn sub_entity_name(key: &str, kind: EntityKind) -> Option<&str> {
    let (_, rest) = key.split_once(kind.marker())?;
    let rest = rest.strip_prefix('/')?;
    rest.split(['/', '@', '.'])
        .next()
        .filter(|name| !name.is_empty())
}

/// Decode the url a uri key points at.
///
/// Uri keys carry the url base64-encoded after `/_uris/`. Returns `None`
/// for keys without that segment or whose segment is not valid base64
/// text.
pub fn uri_target(key: &str) -> Option<String> {
    let (_, encoded) = key.split_once("/_uris/")?;
    if encoded.is_empty() {
        return None;
    }
    let bytes = URI_SEGMENT.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}
