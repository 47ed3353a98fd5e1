//! Hints: the per-trace key/value sideband
//!
//! Hints are loosely typed flags and values instrumentation attaches to the
//! trace in progress (application name, sensitivity, discard requests, ...).
//! They are cleared when the root frame exits; only serializable hints are
//! copied into the finished [`crate::trace::Trace`].

use crate::attributes::AttrValue;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Fixed hint vocabulary
pub mod keys {
    pub const APPLICATION_NAME: &str = "application-name";
    pub const TRACE_ID: &str = "trace-id";
    pub const TRACE_TYPE: &str = "trace-type";
    pub const ABORTED: &str = "aborted";
    pub const SENSITIVE: &str = "sensitive";
    pub const DISCARD: &str = "discard";
    pub const COLLECT_ONLY_ENDPOINTS: &str = "collect-only-endpoints";
    pub const OPERATION_COLLECTION_LEVEL: &str = "operation-collection-level";
    pub const HAS_EXCEPTION: &str = "has-exception";
    pub const STATIC_PATH: &str = "static-path";
    pub const OBSCURED_VALUE_REGISTRY: &str = "obscured-value-registry";
    pub const HTTP_REQUEST_PAYLOAD: &str = "http-request-payload";
    pub const HTTP_RESPONSE_PAYLOAD: &str = "http-response-payload";
    pub const EXCEEDED_MAX_TIME: &str = "exceeded-max-time";
}

/// A hint is either a storable value or an opaque shared object
#[derive(Clone)]
pub enum HintValue {
    Attr(AttrValue),
    Object(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for HintValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HintValue::Attr(value) => f.debug_tuple("Attr").field(value).finish(),
            HintValue::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// Hint map scoped to one trace
#[derive(Debug, Clone, Default)]
pub struct Hints {
    entries: HashMap<String, HintValue>,
}

impl Hints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.entries.insert(key.into(), HintValue::Attr(value.into()));
    }

    pub fn set_object<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), HintValue::Object(Arc::new(value)));
    }

    pub fn insert(&mut self, key: impl Into<String>, value: HintValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn get_raw(&self, key: &str) -> Option<&HintValue> {
        self.entries.get(key)
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        match self.entries.get(key) {
            Some(HintValue::Attr(value)) => Some(value),
            _ => None,
        }
    }

    /// Typed access to an object hint
    pub fn get_object<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.entries.get(key) {
            Some(HintValue::Object(obj)) => obj.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// `true` only for a boolean hint set to `true`
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(AttrValue::as_bool).unwrap_or(false)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttrValue::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<HintValue> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every hint whose key is not in `allow_list`
    pub fn retain_only(&mut self, allow_list: &[String]) {
        self.entries.retain(|key, _| allow_list.iter().any(|k| k == key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializable hints only, sorted by key
    pub fn to_attr_map(&self) -> BTreeMap<String, AttrValue> {
        self.entries
            .iter()
            .filter_map(|(k, v)| match v {
                HintValue::Attr(value) => Some((k.clone(), value.clone())),
                HintValue::Object(_) => None,
            })
            .collect()
    }
}
