use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::OicError;
use crate::value::{AttributeKind, AttributeValue};

/// Insertion-ordered string-keyed attribute store.
///
/// A key explicitly set to null is present (`has_attribute` is true) and
/// counted by `size`; `is_null` is also true for keys that were never set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    entries: Vec<(String, AttributeValue)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    /// Stores `value` under `key`, replacing any prior value and its type.
    ///
    /// A replaced key keeps its original insertion position. Returns the
    /// previous value, if any.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(idx) => Some(std::mem::replace(&mut self.entries[idx].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Returns a typed copy of the value under `key`.
    pub fn get<T: AttributeKind>(&self, key: &str) -> Result<T, OicError> {
        let value = self
            .value(key)
            .ok_or_else(|| OicError::NoSuchAttribute(key.to_string()))?;
        T::from_value(value).ok_or_else(|| OicError::TypeMismatch {
            key: key.to_string(),
            expected: T::LABEL,
            found: value.type_label(),
        })
    }

    /// Borrowed access to the raw value under `key`.
    pub fn value(&self, key: &str) -> Option<&AttributeValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Removes `key` and its value (including an explicit null).
    pub fn remove(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// True when `key` holds an explicit null or is absent.
    pub fn is_null(&self, key: &str) -> bool {
        self.value(key).map_or(true, AttributeValue::is_null)
    }

    pub fn set_null(&mut self, key: impl Into<String>) {
        self.set(key, AttributeValue::Null);
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Display rendering of the value under `key`; empty when absent.
    pub fn value_to_string(&self, key: &str) -> String {
        self.value(key).map(ToString::to_string).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Serialize for AttributeMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributeMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AttributeMapVisitor;

        impl<'de> Visitor<'de> for AttributeMapVisitor {
            type Value = AttributeMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of attribute names to values")
            }

            fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut out = AttributeMap::new();
                while let Some((key, value)) = access.next_entry::<String, AttributeValue>()? {
                    if out.has_attribute(&key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate attribute '{key}'"
                        )));
                    }
                    out.entries.push((key, value));
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(AttributeMapVisitor)
    }
}
