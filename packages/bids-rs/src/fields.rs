use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Value of a single named attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Null,
    Text(String),
    Path(PathBuf),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    /// String form of the value, `None` for null or non UTF-8 paths
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Null => None,
            AttrValue::Text(s) => Some(s.as_str()),
            AttrValue::Path(p) => p.to_str(),
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            AttrValue::Null => None,
            AttrValue::Text(s) => Some(Path::new(s)),
            AttrValue::Path(p) => Some(p.as_path()),
        }
    }

    /// Convert a JSON scalar. Empty strings, arrays and objects are not
    /// attribute values and become null.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) if s.is_empty() => AttrValue::Null,
            serde_json::Value::String(s) => AttrValue::Text(s.clone()),
            serde_json::Value::Number(n) => AttrValue::Text(n.to_string()),
            serde_json::Value::Bool(b) => AttrValue::Text(b.to_string()),
            _ => AttrValue::Null,
        }
    }

    pub fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::String(s) if s.is_empty() => AttrValue::Null,
            serde_yaml::Value::String(s) => AttrValue::Text(s.clone()),
            serde_yaml::Value::Number(n) => AttrValue::Text(n.to_string()),
            serde_yaml::Value::Bool(b) => AttrValue::Text(b.to_string()),
            _ => AttrValue::Null,
        }
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self.as_str() {
            Some(s) => serde_yaml::Value::String(s.to_string()),
            None => serde_yaml::Value::Null,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => Ok(()),
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<PathBuf> for AttrValue {
    fn from(value: PathBuf) -> Self {
        AttrValue::Path(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AttrValue::Null)
    }
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttrValue::Null => serializer.serialize_none(),
            AttrValue::Text(s) => serializer.serialize_str(s),
            AttrValue::Path(p) => serializer.serialize_str(&p.to_string_lossy()),
        }
    }
}

/// Insertion-ordered attribute map.
///
/// Re-inserting an existing key replaces its value in place, so the key keeps
/// its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(String, AttrValue)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Non-null string value of `key`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttrValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Option<AttrValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        let index = self.entries.iter().position(|(name, _)| name == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Copy every entry of `other` over this map; `other` wins on collision.
    pub fn overlay(&mut self, other: &Fields) {
        for (key, value) in other.iter() {
            self.insert(key, value.clone());
        }
    }

    pub fn to_yaml_mapping(&self) -> serde_yaml::Mapping {
        self.iter()
            .map(|(key, value)| (serde_yaml::Value::String(key.to_string()), value.to_yaml()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<AttrValue>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (key, value) in iter {
            fields.insert(key, value);
        }
        fields
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
