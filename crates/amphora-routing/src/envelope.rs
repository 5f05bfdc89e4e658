//! The `{"_value": ...}` envelope.
//!
//! The durable store keeps values in a schemaless JSON column. Lists and
//! uris hold arrays or bare strings there, which are easy to confuse with
//! an accidentally double-encoded document, so kinds with an envelope
//! policy are always boxed on write and unboxed on read.

use serde_json::{Map, Value};

/// Field name of the envelope payload.
pub const ENVELOPE_FIELD: &str = "_value";

/// Wrapping behavior for one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// Values are stored as given.
    Plain,
    /// Values are stored as `{"_value": value}`.
    Boxed,
}

impl Envelope {
    /// Envelope for a kind whose policy does (`true`) or does not wrap.
    pub const fn from_policy(wraps: bool) -> Self {
        if wraps { Self::Boxed } else { Self::Plain }
    }

    /// Shape `value` for storage.
    pub fn wrap(self, value: Value) -> Value {
        match self {
            Self::Plain => value,
            Self::Boxed => {
                let mut map = Map::with_capacity(1);
                map.insert(ENVELOPE_FIELD.to_owned(), value);
                Value::Object(map)
            }
        }
    }

    /// Recover the caller's value from its stored form.
    ///
    /// A boxed kind whose stored value is not an envelope (rows written
    /// before the policy applied) is returned unchanged.
    pub fn unwrap(self, stored: Value) -> Value {
        match self {
            Self::Plain => stored,
            Self::Boxed => open(stored),
        }
    }

    /// Shape a pre-serialized payload as literal JSON text.
    ///
    /// The payload becomes the string member of the envelope, so quotes and
    /// control characters in `text` are escaped by the serializer.
    pub fn wrap_text(self, text: &str) -> String {
        match self {
            Self::Plain => text.to_owned(),
            Self::Boxed => self.wrap(Value::String(text.to_owned())).to_string(),
        }
    }

    /// Inverse of [`Envelope::wrap_text`].
    ///
    /// # Errors
    ///
    /// Returns the JSON error when a boxed `stored` is not valid JSON.
    pub fn unwrap_text(self, stored: &str) -> Result<String, serde_json::Error> {
        match self {
            Self::Plain => Ok(stored.to_owned()),
            Self::Boxed => {
                let parsed: Value = serde_json::from_str(stored)?;
                Ok(match parsed {
                    Value::Object(mut map) => match map.remove(ENVELOPE_FIELD) {
                        Some(Value::String(inner)) => inner,
                        Some(other) => other.to_string(),
                        None => stored.to_owned(),
                    },
                    _ => stored.to_owned(),
                })
            }
        }
    }
}

/// Take the payload out of an envelope, or return a non-envelope unchanged.
pub fn open(stored: Value) -> Value {
    match stored {
        Value::Object(mut map) => match map.remove(ENVELOPE_FIELD) {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        other => other,
    }
}

/// Parse `text` as JSON, keeping it as a JSON string when it does not parse.
pub fn parse_or_not(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}
