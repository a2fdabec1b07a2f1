use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{borrow::Borrow, fmt, ops::Deref, sync::Arc};

/// An immutable name used for node type tags and property names.
/// Clones share one allocation; equality and hashing are by content, and it borrows as `str`
/// so property maps can be queried with plain string slices.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Arc<str>);

impl Identifier {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for names usable as tags or property names (non-empty, no whitespace).
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.chars().any(char::is_whitespace)
    }
}

impl Deref for Identifier {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Identifier {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&String> for Identifier {
    fn from(name: &String) -> Self {
        Self::new(name)
    }
}

impl From<&Identifier> for Identifier {
    fn from(name: &Identifier) -> Self {
        name.clone()
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Identifier::from)
    }
}

#[cfg(test)]
mod tests {
    use super::Identifier;
    use crate::statics::ids;
    use std::collections::HashMap;

    #[test]
    fn identifiers_from_different_sources_are_equal() {
        let local = Identifier::new("TREE");
        let from_string = Identifier::from(String::from("TREE"));
        assert_eq!(local, from_string);
        assert_eq!(local, ids::TREE);
    }

    #[test]
    fn lookup_by_str_works_through_borrow() {
        let mut map = HashMap::new();
        map.insert(Identifier::new(ids::START), 1);
        assert_eq!(map.get(ids::START), Some(&1));
    }

    #[test]
    fn validity_rejects_empty_and_whitespace() {
        assert!(Identifier::new("name").is_valid());
        assert!(!Identifier::new("").is_valid());
        assert!(!Identifier::new("two words").is_valid());
    }
}
