//! Typed attribute values for operation property bags
//!
//! Operations only ever hold scalars (bool, integer, float, string, date) and
//! nested maps/lists of the same. Nothing else can be stored, so every trace
//! is serializable and cannot contain cycles back into frames or traces.
//! Untyped JSON input is checked at insertion via [`AttrValue::try_from_json`].

use crate::error::{Result, TrazoError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// A single storable value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(SystemTime),
    Map(OperationMap),
    List(OperationList),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(f) => Some(*f),
            AttrValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&OperationMap> {
        match self {
            AttrValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&OperationList> {
        match self {
            AttrValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Convert untyped JSON, rejecting `null` anywhere in the structure
    ///
    /// `key` names the property being written and is only used for the error.
    pub fn try_from_json(key: &str, value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::Null => Err(TrazoError::InvalidAttribute {
                key: key.to_string(),
                reason: "null is not a storable value".to_string(),
            }),
            Value::Bool(b) => Ok(AttrValue::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(AttrValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(AttrValue::Float(f))
                } else {
                    Err(TrazoError::InvalidAttribute {
                        key: key.to_string(),
                        reason: format!("number {} is not representable", n),
                    })
                }
            }
            Value::String(s) => Ok(AttrValue::Str(s)),
            Value::Array(items) => {
                let mut list = OperationList::new();
                for item in items {
                    list.push(AttrValue::try_from_json(key, item)?);
                }
                Ok(AttrValue::List(list))
            }
            Value::Object(fields) => {
                let mut map = OperationMap::new();
                for (k, v) in fields {
                    let nested_key = format!("{}.{}", key, k);
                    let value = AttrValue::try_from_json(&nested_key, v)?;
                    map.put(k, value);
                }
                Ok(AttrValue::Map(map))
            }
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v as i64)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(v as i64)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(AttrValue::Int)
            .unwrap_or(AttrValue::Float(v as f64))
    }
}

impl From<usize> for AttrValue {
    fn from(v: usize) -> Self {
        AttrValue::from(v as u64)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<SystemTime> for AttrValue {
    fn from(v: SystemTime) -> Self {
        AttrValue::Date(v)
    }
}

impl From<OperationMap> for AttrValue {
    fn from(v: OperationMap) -> Self {
        AttrValue::Map(v)
    }
}

impl From<OperationList> for AttrValue {
    fn from(v: OperationList) -> Self {
        AttrValue::List(v)
    }
}

/// String-keyed bag of attribute values (sorted by key)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OperationMap {
    entries: BTreeMap<String, AttrValue>,
}

impl OperationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the one it replaced
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Option<AttrValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Store untyped JSON after validating it
    pub fn try_put_json(&mut self, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
        let key = key.into();
        let value = AttrValue::try_from_json(&key, value)?;
        self.entries.insert(key, value);
        Ok(())
    }

    /// Get or create a nested map under `key`
    ///
    /// An existing non-map value under `key` is replaced.
    pub fn put_map(&mut self, key: impl Into<String>) -> &mut OperationMap {
        let slot = self
            .entries
            .entry(key.into())
            .or_insert_with(|| AttrValue::Map(OperationMap::new()));
        if !matches!(slot, AttrValue::Map(_)) {
            *slot = AttrValue::Map(OperationMap::new());
        }
        match slot {
            AttrValue::Map(map) => map,
            _ => unreachable!("slot was just set to a map"),
        }
    }

    /// Get or create a nested list under `key`
    pub fn put_list(&mut self, key: impl Into<String>) -> &mut OperationList {
        let slot = self
            .entries
            .entry(key.into())
            .or_insert_with(|| AttrValue::List(OperationList::new()));
        if !matches!(slot, AttrValue::List(_)) {
            *slot = AttrValue::List(OperationList::new());
        }
        match slot {
            AttrValue::List(list) => list,
            _ => unreachable!("slot was just set to a list"),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(AttrValue::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttrValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(AttrValue::as_int)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.entries.iter()
    }
}

/// Ordered list of attribute values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OperationList {
    items: Vec<AttrValue>,
}

impl OperationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<AttrValue>) {
        self.items.push(value.into());
    }

    /// Append a nested map and return it for filling
    pub fn push_map(&mut self) -> &mut OperationMap {
        self.items.push(AttrValue::Map(OperationMap::new()));
        match self.items.last_mut() {
            Some(AttrValue::Map(map)) => map,
            _ => unreachable!("a map was just pushed"),
        }
    }

    pub fn get(&self, index: usize) -> Option<&AttrValue> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttrValue> {
        self.items.iter()
    }
}

impl FromIterator<AttrValue> for OperationList {
    fn from_iter<I: IntoIterator<Item = AttrValue>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}
