//! RouteKey - cheap-to-clone routing identifier
//!
//! Sink names and targeted route ids are created once from configuration and
//! then compared against every record, so they share one `Arc<str>`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Routing identifier with O(1) clone.
///
/// ```
/// use contracts::RouteKey;
///
/// let key: RouteKey = "stalker3".into();
/// assert!(key.matches(Some("stalker3")));
/// assert!(!key.matches(None));
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(Arc<str>);

impl RouteKey {
    /// Create a new key
    #[inline]
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    /// Underlying string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a record id equals this key
    #[inline]
    pub fn matches(&self, record_id: Option<&str>) -> bool {
        record_id == Some(self.as_str())
    }
}

impl Deref for RouteKey {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for RouteKey {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RouteKey {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for RouteKey {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteKey({:?})", self.0)
    }
}

impl PartialEq<str> for RouteKey {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for RouteKey {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl Serialize for RouteKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RouteKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_clone_shares_storage() {
        let a: RouteKey = "wifi".into();
        let b = a.clone();
        assert_eq!(a.as_str().as_ptr(), b.as_str().as_ptr());
    }

    #[test]
    fn test_matches() {
        let key = RouteKey::new("a");
        assert!(key.matches(Some("a")));
        assert!(!key.matches(Some("b")));
        assert!(!key.matches(None));
    }

    #[test]
    fn test_set_lookup_by_str() {
        let keys: HashSet<RouteKey> = ["a".into(), "b".into()].into_iter().collect();
        assert!(keys.contains("a"));
        assert!(!keys.contains("c"));
    }
}
