use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace/name identity of an object. Equality is by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Split a `namespace/name` key. Only the shape is checked; the parts
    /// are whatever names the object was stored under.
    pub fn from_key(key: &str) -> anyhow::Result<Self> {
        match key.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => anyhow::bail!("unexpected key format: {:?}", key),
        }
    }

    /// The `namespace/name` key of this object.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference to the object an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectReference {
    pub fn service(name: &NamespacedName) -> Self {
        Self {
            kind: "Service".to_string(),
            namespace: name.namespace.clone(),
            name: name.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trip() {
        let nn = NamespacedName::from_key("ns/svc").unwrap();
        assert_eq!(nn, NamespacedName::new("ns", "svc"));
        assert_eq!(nn.key(), "ns/svc");
        assert_eq!(nn.to_string(), "ns/svc");
    }

    #[test]
    fn malformed_keys() {
        assert!(NamespacedName::from_key("no-slash").is_err());
        assert!(NamespacedName::from_key("/svc").is_err());
        assert!(NamespacedName::from_key("ns/").is_err());
        assert!(NamespacedName::from_key("ns/a/b").is_err());
    }

    #[test]
    fn key_parts_are_not_validated() {
        // Stored names are trusted as-is, even ones that would fail creation rules
        let nn = NamespacedName::from_key("Team_A/My.Svc").unwrap();
        assert_eq!(nn, NamespacedName::new("Team_A", "My.Svc"));
        let long = "a".repeat(100);
        assert_eq!(NamespacedName::from_key(&format!("ns/{}", long)).unwrap().name, long);
    }
}
