//! Cross-cutting key/value pairs that travel with a trace.
//!
//! Baggage is propagated verbatim from parent to descendant and across
//! process boundaries, unlike span tags which stay local to one span.

use std::fmt;

/// Upper bound on entries a single baggage can hold.
pub const MAX_BAGGAGE_ENTRIES: usize = 64;

/// Error returned when a baggage entry cannot be accepted.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BaggageError {
    /// Keys must be non-empty ASCII without separators or whitespace.
    #[error("invalid baggage key: {0:?}")]
    InvalidKey(String),

    /// Values must not contain control characters.
    #[error("invalid baggage value: {0:?}")]
    InvalidValue(String),

    /// The baggage already holds [`MAX_BAGGAGE_ENTRIES`] entries.
    #[error("baggage is full ({MAX_BAGGAGE_ENTRIES} entries)")]
    Full,
}

/// An ordered `String → String` mapping propagated with the trace.
///
/// Insertion order is preserved. Updating an existing key keeps its
/// original position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Baggage {
    entries: Vec<(String, String)>,
}

impl Baggage {
    /// An empty baggage.
    pub fn new() -> Self {
        Baggage::default()
    }

    /// The value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or update an entry, validating key and value.
    ///
    /// Returns the previous value when the key was already present.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>, BaggageError> {
        let key = key.into();
        let value = value.into();
        if !is_valid_key(&key) {
            return Err(BaggageError::InvalidKey(key));
        }
        if value.chars().any(char::is_control) {
            return Err(BaggageError::InvalidValue(value));
        }
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Ok(Some(std::mem::replace(&mut entry.1, value)));
        }
        if self.entries.len() >= MAX_BAGGAGE_ENTRIES {
            return Err(BaggageError::Full);
        }
        self.entries.push((key, value));
        Ok(None)
    }

    /// Remove an entry, returning its value when present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Baggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

// Header-token characters, so keys can double as header name suffixes.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '*'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_preserves_order_and_updates_in_place() {
        let mut baggage = Baggage::new();
        baggage.insert("user", "alice").unwrap();
        baggage.insert("region", "eu-west").unwrap();
        assert_eq!(baggage.insert("user", "bob").unwrap(), Some("alice".into()));

        let keys: Vec<_> = baggage.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["user", "region"]);
        assert_eq!(baggage.get("user"), Some("bob"));
    }

    #[test]
    fn rejects_invalid_entries() {
        let mut baggage = Baggage::new();
        assert_eq!(
            baggage.insert("", "v"),
            Err(BaggageError::InvalidKey(String::new()))
        );
        assert!(matches!(
            baggage.insert("bad key", "v"),
            Err(BaggageError::InvalidKey(_))
        ));
        assert!(matches!(
            baggage.insert("k", "line\nbreak"),
            Err(BaggageError::InvalidValue(_))
        ));
        assert!(baggage.is_empty());
    }

    #[test]
    fn full_baggage_rejects_new_keys_but_not_updates() {
        let mut baggage = Baggage::new();
        for i in 0..MAX_BAGGAGE_ENTRIES {
            baggage.insert(format!("k{i}"), "v").unwrap();
        }
        assert_eq!(baggage.insert("overflow", "v"), Err(BaggageError::Full));
        assert!(baggage.insert("k0", "updated").is_ok());
        assert_eq!(baggage.get("k0"), Some("updated"));
    }
}
