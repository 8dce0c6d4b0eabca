//! Key event type.

use std::time::Instant;

/// A named key press and the instant it was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Key name, e.g. `"5"`, `"escape"`, `"space"`
    pub key: String,
    /// Capture time
    pub at: Instant,
}

impl KeyEvent {
    /// A press of `key` captured now.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            at: Instant::now(),
        }
    }

    pub fn at(key: impl Into<String>, at: Instant) -> Self {
        Self {
            key: key.into(),
            at,
        }
    }

    /// Whether this press matches one of `keys`.
    pub fn matches<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        keys.iter().any(|k| k.as_ref() == self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_key_list() {
        let event = KeyEvent::new("5");
        assert!(event.matches(&["5", "t"]));
        assert!(!event.matches(&["escape"]));
        assert!(!event.matches::<&str>(&[]));
    }
}
