//! SSH host entry model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directives every entry exposes after parsing, with their default values.
pub const BASIC_DIRECTIVES: &[(&str, &str)] = &[
    ("HostName", ""),
    ("User", ""),
    ("Port", "22"),
    ("IdentityFile", ""),
];

/// Ordered mapping from canonical directive name to value.
///
/// Iteration follows insertion order. Setting an existing key replaces the
/// value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Directives(Vec<(String, String)>);

impl Directives {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fills in any missing basic directive with its default.
    pub fn ensure_basic(&mut self) {
        for (key, default) in BASIC_DIRECTIVES {
            if !self.contains_key(key) {
                self.set(*key, *default);
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Directives {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut directives = Directives::new();
        for (k, v) in iter {
            directives.set(k, v);
        }
        directives
    }
}

/// One `Host` block of an SSH config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    /// Process-local identity, never written to disk.
    #[serde(skip, default = "Uuid::new_v4")]
    pub id: Uuid,
    pub host: String,
    pub directives: Directives,
}

impl HostEntry {
    pub fn new(host: impl Into<String>, directives: Directives) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            directives,
        }
    }

    pub fn host_name(&self) -> Option<&str> {
        self.directives.get("HostName")
    }

    pub fn user(&self) -> Option<&str> {
        self.directives.get("User")
    }

    pub fn port(&self) -> Option<&str> {
        self.directives.get("Port")
    }

    pub fn identity_file(&self) -> Option<&str> {
        self.directives.get("IdentityFile")
    }

    /// Same host and directives, ignoring identity.
    pub fn same_content(&self, other: &HostEntry) -> bool {
        self.host == other.host && self.directives == other.directives
    }
}
