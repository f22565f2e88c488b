use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier for stored entities (users, connections, accounts,
/// transactions).
///
/// Provider-derived ids go through [`Id::from_external`] so the same
/// aggregator identifier always lands on the same local id, which is what
/// makes repeated syncs reconcile instead of duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// Namespace for hashing external identifiers into deterministic ids.
    const NAMESPACE: Uuid = Uuid::from_u128(0x2f1c_4b6e_9d0a_4c83_b5e7_1a2d_3f4b_5c6d);

    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Deterministic, filesystem-safe id derived from a provider identifier
    /// (UUIDv5). Provider ids can contain arbitrary characters; the hash
    /// never does.
    pub fn from_external(value: &str) -> Self {
        Self(Uuid::new_v5(&Self::NAMESPACE, value.as_bytes()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the value is usable as a single path segment, which file-backed
    /// storage relies on.
    pub fn is_path_safe(value: &str) -> bool {
        if value.is_empty() || value == "." || value == ".." {
            return false;
        }
        !value.chars().any(|c| c == '/' || c == '\\' || c == '\0')
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_external_is_deterministic() {
        assert_eq!(
            Id::from_external("truelayer-acct-123"),
            Id::from_external("truelayer-acct-123")
        );
        assert_ne!(
            Id::from_external("truelayer-acct-123"),
            Id::from_external("truelayer-acct-456")
        );
    }

    #[test]
    fn from_external_is_path_safe() {
        let id = Id::from_external("weird/provider\\id");
        assert!(Id::is_path_safe(id.as_str()));
    }

    #[test]
    fn path_safety_rejects_traversal_segments() {
        assert!(!Id::is_path_safe(".."));
        assert!(!Id::is_path_safe("."));
        assert!(!Id::is_path_safe(""));
        assert!(!Id::is_path_safe("a/b"));
        assert!(Id::is_path_safe("acct-1"));
    }
}
