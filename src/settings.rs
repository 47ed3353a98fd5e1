//! Settings registry: named runtime switches with change notification
//!
//! Collection strategies keep their on/off state here. Writes notify every
//! registered [`SettingsListener`] after the write lock is released, so a
//! listener may read (or even write) settings from its callback. A failing or
//! panicking listener is logged and the remaining listeners still run.

use crate::attributes::AttrValue;
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives `(setting name, new value)` on every change
pub trait SettingsListener: Send + Sync {
    fn on_setting_changed(&self, name: &str, value: &AttrValue) -> Result<()>;
}

impl<F> SettingsListener for F
where
    F: Fn(&str, &AttrValue) -> Result<()> + Send + Sync,
{
    fn on_setting_changed(&self, name: &str, value: &AttrValue) -> Result<()> {
        self(name, value)
    }
}

/// Handle returned by [`SettingsRegistry::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Process-wide settings store, shared by `Arc`
#[derive(Default)]
pub struct SettingsRegistry {
    values: RwLock<HashMap<String, AttrValue>>,
    explicit: RwLock<HashSet<String>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn SettingsListener>)>>,
    next_listener_id: AtomicU64,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<AttrValue> {
        self.values.read().get(name).cloned()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.values.read().get(name).and_then(AttrValue::as_bool)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.values.read().get(name).and_then(AttrValue::as_int)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.read().contains_key(name)
    }

    /// `true` once `name` has been written through [`set`](Self::set)
    ///
    /// Values inserted by [`register_default`](Self::register_default) are not
    /// explicit until someone sets them, even to the same value.
    pub fn is_explicit(&self, name: &str) -> bool {
        self.explicit.read().contains(name)
    }

    /// Write a value; listeners run only if the stored value changed
    ///
    /// The name is marked explicit either way.
    pub fn set(&self, name: &str, value: impl Into<AttrValue>) {
        let value = value.into();
        let changed = {
            let mut values = self.values.write();
            self.explicit.write().insert(name.to_string());
            match values.get(name) {
                Some(existing) if *existing == value => false,
                _ => {
                    values.insert(name.to_string(), value.clone());
                    true
                }
            }
        };

        if changed {
            tracing::debug!(setting = name, value = ?value, "setting changed");
            self.notify(name, &value);
        }
    }

    /// Insert `default` if `name` is unknown; returns the current value
    ///
    /// This is how strategies lazily self-register a toggle the first time a
    /// target is observed.
    pub fn register_default(&self, name: &str, default: impl Into<AttrValue>) -> AttrValue {
        if let Some(existing) = self.values.read().get(name) {
            return existing.clone();
        }

        let default = default.into();
        {
            let mut values = self.values.write();
            if let Some(existing) = values.get(name) {
                return existing.clone();
            }
            values.insert(name.to_string(), default.clone());
        }

        self.notify(name, &default);
        default
    }

    pub fn add_listener(&self, listener: Arc<dyn SettingsListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Every `(name, value)` whose name starts with `prefix`, sorted by name
    pub fn with_prefix(&self, prefix: &str) -> Vec<(String, AttrValue)> {
        let mut entries: Vec<(String, AttrValue)> = self
            .values
            .read()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Snapshot of all setting names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn notify(&self, name: &str, value: &AttrValue) {
        let listeners: Vec<Arc<dyn SettingsListener>> =
            self.listeners.read().iter().map(|(_, l)| l.clone()).collect();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_setting_changed(name, value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(setting = name, error = %e, "settings listener failed");
                }
                Err(_) => {
                    tracing::error!(setting = name, "settings listener panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for SettingsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsRegistry")
            .field("values", &*self.values.read())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrazoError;
    use parking_lot::Mutex;

    #[test]
    fn test_get_set() {
        let settings = SettingsRegistry::new();
        assert!(settings.get("a.b").is_none());
        settings.set("a.b", true);
        assert_eq!(settings.get_bool("a.b"), Some(true));
        settings.set("ratio", 25i64);
        assert_eq!(settings.get_int("ratio"), Some(25));
        assert_eq!(settings.names(), vec!["a.b".to_string(), "ratio".to_string()]);
        assert_eq!(settings.with_prefix("a.").len(), 1);
    }

    #[test]
    fn test_listener_sees_changes_only() {
        let settings = SettingsRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        settings.add_listener(Arc::new(move |name: &str, value: &AttrValue| -> Result<()> {
            sink.lock().push((name.to_string(), value.clone()));
            Ok(())
        }));

        settings.set("x", true);
        settings.set("x", true);
        settings.set("x", false);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], ("x".to_string(), AttrValue::Bool(false)));
    }

    #[test]
    fn test_register_default_is_insert_if_absent() {
        let settings = SettingsRegistry::new();
        assert_eq!(settings.register_default("p", true), AttrValue::Bool(true));
        settings.set("p", false);
        assert_eq!(settings.register_default("p", true), AttrValue::Bool(false));
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let settings = SettingsRegistry::new();
        let hits = Arc::new(Mutex::new(0));

        settings.add_listener(Arc::new(|_: &str, _: &AttrValue| -> Result<()> {
            Err(TrazoError::listener("broken", "always fails"))
        }));
        settings.add_listener(Arc::new(|_: &str, _: &AttrValue| -> Result<()> {
            panic!("listener bug")
        }));
        let counter = hits.clone();
        settings.add_listener(Arc::new(move |_: &str, _: &AttrValue| -> Result<()> {
            *counter.lock() += 1;
            Ok(())
        }));

        settings.set("k", 1i64);
        settings.set("k", 2i64);
        assert_eq!(*hits.lock(), 2);
    }

    #[test]
    fn test_set_marks_explicit_even_when_unchanged() {
        let settings = SettingsRegistry::new();
        settings.register_default("p", true);
        assert!(!settings.is_explicit("p"));

        let calls = Arc::new(Mutex::new(0));
        let seen = calls.clone();
        settings.add_listener(Arc::new(move |_: &str, _: &AttrValue| -> Result<()> {
            *seen.lock() += 1;
            Ok(())
        }));

        settings.set("p", true);
        assert!(settings.is_explicit("p"));
        assert_eq!(*calls.lock(), 0);
        assert!(!settings.is_explicit("q"));
    }

    #[test]
    fn test_remove_listener() {
        let settings = SettingsRegistry::new();
        let id = settings.add_listener(Arc::new(|_: &str, _: &AttrValue| -> Result<()> { Ok(()) }));
        assert_eq!(settings.listener_count(), 1);
        assert!(settings.remove_listener(id));
        assert!(!settings.remove_listener(id));
        assert_eq!(settings.listener_count(), 0);
    }
}
