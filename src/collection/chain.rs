//! Ordered strategy chain with a settings-driven active snapshot

use super::{CollectionStrategy, ProbeDescriptor};
use crate::attributes::AttrValue;
use crate::error::Result;
use crate::settings::{ListenerId, SettingsListener, SettingsRegistry};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

type Snapshot = Arc<Vec<Arc<dyn CollectionStrategy>>>;

/// Registered strategies plus the currently active subset
///
/// `collect` only clones snapshot `Arc`s under read locks; recomputation
/// happens under `registered` on registration and on relevant setting changes.
/// Every registered strategy observes each probe, only active ones judge it.
pub struct StrategyChain {
    settings: Arc<SettingsRegistry>,
    registered: Mutex<Vec<Arc<dyn CollectionStrategy>>>,
    observers: RwLock<Snapshot>,
    active: RwLock<Snapshot>,
    listener: Mutex<Option<ListenerId>>,
}

impl StrategyChain {
    /// Create a chain and subscribe it to `settings`
    pub fn new(settings: Arc<SettingsRegistry>) -> Arc<Self> {
        let chain = Arc::new(Self {
            settings: settings.clone(),
            registered: Mutex::new(Vec::new()),
            observers: RwLock::new(Arc::new(Vec::new())),
            active: RwLock::new(Arc::new(Vec::new())),
            listener: Mutex::new(None),
        });

        let id = settings.add_listener(Arc::new(ChainRefresher {
            chain: Arc::downgrade(&chain),
        }));
        *chain.listener.lock() = Some(id);
        chain
    }

    /// Add a strategy; equal priorities keep registration order
    pub fn register(&self, strategy: Arc<dyn CollectionStrategy>) {
        let mut registered = self.registered.lock();
        tracing::debug!(strategy = %strategy.name(), priority = strategy.priority(), "registering collection strategy");
        registered.push(strategy);
        registered.sort_by_key(|s| s.priority());
        *self.observers.write() = Arc::new(registered.clone());
        self.rebuild(&registered);
    }

    /// Recompute the active snapshot from current settings
    pub fn refresh(&self) {
        let registered = self.registered.lock();
        self.rebuild(&registered);
    }

    /// Run the active strategies in priority order; `false` on the first rejection
    ///
    /// A strategy that panics is logged and skipped for this probe only.
    pub fn collect(&self, probe: &ProbeDescriptor) -> bool {
        let observers = self.observers.read().clone();
        for strategy in observers.iter() {
            if catch_unwind(AssertUnwindSafe(|| strategy.observe(probe))).is_err() {
                tracing::error!(strategy = %strategy.name(), "collection strategy panicked while observing");
            }
        }

        let active = self.active.read().clone();

        for strategy in active.iter() {
            match catch_unwind(AssertUnwindSafe(|| strategy.collect(probe))) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::trace!(
                        strategy = %strategy.name(),
                        class = %probe.class_name,
                        method = %probe.method_name,
                        "probe rejected"
                    );
                    return false;
                }
                Err(_) => {
                    tracing::error!(strategy = %strategy.name(), "collection strategy panicked; skipping");
                }
            }
        }
        true
    }

    /// Names of the active strategies, in evaluation order
    pub fn active_names(&self) -> Vec<String> {
        self.active.read().iter().map(|s| s.name().to_string()).collect()
    }

    pub fn registered_count(&self) -> usize {
        self.registered.lock().len()
    }

    fn on_setting_changed(&self, name: &str) {
        let registered = self.registered.lock();
        if registered
            .iter()
            .any(|s| name.starts_with(s.activation_setting()))
        {
            self.rebuild(&registered);
        }
    }

    fn rebuild(&self, registered: &[Arc<dyn CollectionStrategy>]) {
        let active: Vec<Arc<dyn CollectionStrategy>> = registered
            .iter()
            .filter(|s| s.is_active(&self.settings))
            .cloned()
            .collect();
        tracing::debug!(active = active.len(), registered = registered.len(), "strategy chain rebuilt");
        *self.active.write() = Arc::new(active);
    }
}

impl Drop for StrategyChain {
    fn drop(&mut self) {
        if let Some(id) = self.listener.lock().take() {
            self.settings.remove_listener(id);
        }
    }
}

impl std::fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyChain")
            .field("registered", &self.registered_count())
            .field("active", &self.active_names())
            .finish()
    }
}

/// Settings subscription holding the chain weakly
struct ChainRefresher {
    chain: Weak<StrategyChain>,
}

impl SettingsListener for ChainRefresher {
    fn on_setting_changed(&self, name: &str, _value: &AttrValue) -> Result<()> {
        if let Some(chain) = self.chain.upgrade() {
            chain.on_setting_changed(name);
        }
        Ok(())
    }
}
