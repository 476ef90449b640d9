//! Attribute values and insertion-ordered attribute maps.
//!
//! Decoded device attributes are either scalars (bool, integer, float, text,
//! null) or nested structures (lists and maps). Maps keep insertion order so
//! that anything derived from them (JSON payloads, per-key topics) comes out
//! in a deterministic sequence.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// A single attribute value reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Absent / unknown value
    Null,
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number (may be non-finite, which has no JSON form)
    Float(f64),
    /// Text value
    Text(String),
    /// Ordered list of values
    List(Vec<AttrValue>),
    /// Nested attribute map
    Map(AttrMap),
}

impl AttrValue {
    /// Whether this value is a scalar (not a list or map).
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, AttrValue::List(_) | AttrValue::Map(_))
    }

    /// Convert to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::NonFiniteFloat`] if this value (or anything nested
    /// in it) is a NaN or infinite float.
    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        Ok(match self {
            AttrValue::Null => serde_json::Value::Null,
            AttrValue::Bool(b) => serde_json::Value::Bool(*b),
            AttrValue::Int(i) => serde_json::Value::from(*i),
            AttrValue::Float(f) => float_to_json(*f)?,
            AttrValue::Text(s) => serde_json::Value::String(s.clone()),
            AttrValue::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(AttrValue::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            AttrValue::Map(map) => serde_json::Value::Object(map.to_json()?),
        })
    }

    /// Build an attribute value from JSON.
    ///
    /// Integers that fit in `i64` stay integers, every other number becomes a float.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttrValue::Null,
            serde_json::Value::Bool(b) => AttrValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AttrValue::Int(i),
                None => AttrValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => AttrValue::Text(s),
            serde_json::Value::Array(items) => {
                AttrValue::List(items.into_iter().map(AttrValue::from_json).collect())
            }
            serde_json::Value::Object(obj) => AttrValue::Map(
                obj.into_iter()
                    .map(|(k, v)| (k, AttrValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Largest magnitude below which every whole `f64` is an exact integer (2^53).
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Whole floats are written without a fractional part (`20`, not `20.0`),
/// matching how JavaScript prints numbers.
fn float_to_json(f: f64) -> Result<serde_json::Value, ValueError> {
    if !f.is_finite() {
        return Err(ValueError::NonFiniteFloat(f));
    }

    #[allow(clippy::float_cmp)]
    let whole = f.fract() == 0.0;
    if whole && f.abs() < MAX_EXACT_INT {
        #[allow(clippy::cast_possible_truncation)]
        let int = f as i64;
        return Ok(serde_json::Value::from(int));
    }

    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .ok_or(ValueError::NonFiniteFloat(f))
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<u16> for AttrValue {
    fn from(value: u16) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<u8> for AttrValue {
    fn from(value: u8) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
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

impl From<Vec<AttrValue>> for AttrValue {
    fn from(value: Vec<AttrValue>) -> Self {
        AttrValue::List(value)
    }
}

impl From<AttrMap> for AttrValue {
    fn from(value: AttrMap) -> Self {
        AttrValue::Map(value)
    }
}

/// Attribute map that preserves insertion order.
///
/// Re-inserting an existing key replaces its value in place; new keys are
/// appended at the end.
#[derive(Debug, Clone, Default)]
pub struct AttrMap {
    entries: Vec<(String, AttrValue)>,
    /// Key to position in `entries`
    index: HashMap<String, usize>,
}

impl PartialEq for AttrMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl AttrMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Option<AttrValue> {
        let key = key.into();
        let value = value.into();
        if let Some(&pos) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[pos].1, value));
        }

        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    /// Whether the map holds `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Remove a key, keeping the relative order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        let pos = self.index.remove(key)?;
        let (_, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(value)
    }

    /// Apply every entry of `other` on top of this map, key by key.
    pub fn merge_from(&mut self, other: &AttrMap) {
        for (key, value) in other {
            self.insert(key.clone(), value.clone());
        }
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.entries.iter().map(entry_ref)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to an ordered JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if any value has no JSON representation.
    pub fn to_json(&self) -> Result<serde_json::Map<String, serde_json::Value>, ValueError> {
        let mut obj = serde_json::Map::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            let json = value.to_json().map_err(|e| e.at(key))?;
            obj.insert(key.clone(), json);
        }
        Ok(obj)
    }
}

impl<K, V> FromIterator<(K, V)> for AttrMap
where
    K: Into<String>,
    V: Into<AttrValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = AttrMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<'a> IntoIterator for &'a AttrMap {
    type Item = (&'a String, &'a AttrValue);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, AttrValue)>,
        fn(&'a (String, AttrValue)) -> (&'a String, &'a AttrValue),
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter().map(entry_ref as fn(&'a (String, AttrValue)) -> _)
    }
}

fn entry_ref(entry: &(String, AttrValue)) -> (&String, &AttrValue) {
    (&entry.0, &entry.1)
}

impl Serialize for AttrMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttrMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AttrMapVisitor;

        impl<'de> Visitor<'de> for AttrMapVisitor {
            type Value = AttrMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of attribute values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<AttrMap, A::Error> {
                let mut map = AttrMap::new();
                while let Some((key, value)) = access.next_entry::<String, AttrValue>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(AttrMapVisitor)
    }
}

/// Errors converting attribute values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// NaN and infinities cannot be represented in JSON
    #[error("non-finite float {0} cannot be encoded")]
    NonFiniteFloat(f64),
    /// Conversion failed for a nested key
    #[error("attribute '{key}': {source}")]
    Nested {
        /// Key whose value failed
        key: String,
        /// Underlying failure
        #[source]
        source: Box<ValueError>,
    },
}

impl ValueError {
    fn at(self, key: &str) -> Self {
        ValueError::Nested {
            key: key.to_string(),
            source: Box::new(self),
        }
    }
}
