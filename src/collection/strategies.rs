//! Bundled collection strategies
//!
//! Each strategy owns a slice of the `collection.*` settings namespace.
//! Targets seen for the first time (plugins, aspects, call sites) register
//! themselves as enabled from [`CollectionStrategy::observe`], so every switch
//! an operator may want to flip shows up in [`SettingsRegistry::names`] once
//! the probe has fired, even while nothing is disabled.

use super::{names, CollectionStrategy, ProbeDescriptor, RatioTracker, StrategyName};
use crate::attributes::{AttrValue, OperationList};
use crate::settings::SettingsRegistry;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn any_disabled(settings: &SettingsRegistry, prefix: &str) -> bool {
    settings
        .with_prefix(prefix)
        .iter()
        .any(|(_, value)| value.as_bool() == Some(false))
}

/// Kill switch: `collection.agent.disabled = true` rejects every probe
#[derive(Debug)]
pub struct DisableAgentStrategy {
    name: StrategyName,
    settings: Arc<SettingsRegistry>,
}

impl DisableAgentStrategy {
    pub fn new(settings: Arc<SettingsRegistry>) -> Self {
        settings.register_default(names::AGENT_DISABLED, false);
        Self {
            name: StrategyName::new("collection", "agent"),
            settings,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.settings.get_bool(names::AGENT_DISABLED).unwrap_or(false)
    }
}

impl CollectionStrategy for DisableAgentStrategy {
    fn name(&self) -> &StrategyName {
        &self.name
    }

    fn priority(&self) -> i32 {
        i32::MIN
    }

    fn activation_setting(&self) -> &str {
        names::AGENT_DISABLED
    }

    fn is_active(&self, settings: &SettingsRegistry) -> bool {
        settings.get_bool(names::AGENT_DISABLED).unwrap_or(false)
    }

    fn collect(&self, _probe: &ProbeDescriptor) -> bool {
        false
    }
}

/// Per call-site switches under `collection.instrumentation.<class>.<method>`
///
/// A setting on any dotted prefix of the class name applies to everything
/// beneath it; the most specific explicit setting wins. Call sites that
/// registered themselves (value `true` written on first sight) do not count as
/// explicit until someone writes them through [`SettingsRegistry::set`].
#[derive(Debug)]
pub struct PrefixExcludeStrategy {
    name: StrategyName,
    settings: Arc<SettingsRegistry>,
    discovered: RwLock<HashSet<String>>,
}

impl PrefixExcludeStrategy {
    pub fn new(settings: Arc<SettingsRegistry>) -> Self {
        Self {
            name: StrategyName::new("collection", "instrumentation"),
            settings,
            discovered: RwLock::new(HashSet::new()),
        }
    }

    /// Call sites that self-registered and were not set since, sorted
    pub fn discovered(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .discovered
            .read()
            .iter()
            .filter(|key| !self.settings.is_explicit(key))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn explicit(&self, key: &str) -> Option<bool> {
        let enabled = self.settings.get_bool(key)?;
        if enabled && !self.settings.is_explicit(key) {
            return None;
        }
        Some(enabled)
    }
}

impl CollectionStrategy for PrefixExcludeStrategy {
    fn name(&self) -> &StrategyName {
        &self.name
    }

    fn priority(&self) -> i32 {
        20
    }

    fn activation_setting(&self) -> &str {
        names::INSTRUMENTATION_PREFIX
    }

    fn is_active(&self, settings: &SettingsRegistry) -> bool {
        any_disabled(settings, names::INSTRUMENTATION_PREFIX)
    }

    fn observe(&self, probe: &ProbeDescriptor) {
        let full = names::instrumentation(&probe.class_name, &probe.method_name);
        if !self.settings.contains(&full) {
            self.discovered.write().insert(full.clone());
            self.settings.register_default(&full, true);
        }
    }

    fn collect(&self, probe: &ProbeDescriptor) -> bool {
        let full = names::instrumentation(&probe.class_name, &probe.method_name);
        if let Some(enabled) = self.explicit(&full) {
            return enabled;
        }

        let mut class = probe.class_name.as_str();
        loop {
            let key = format!("{}{}", names::INSTRUMENTATION_PREFIX, class);
            if let Some(enabled) = self.explicit(&key) {
                return enabled;
            }
            match class.rfind('.') {
                Some(index) => class = &class[..index],
                None => break,
            }
        }
        true
    }
}

/// Per-plugin switch under `collection.plugins.<name>.enabled`
#[derive(Debug)]
pub struct DisablePluginStrategy {
    name: StrategyName,
    settings: Arc<SettingsRegistry>,
}

impl DisablePluginStrategy {
    pub fn new(settings: Arc<SettingsRegistry>) -> Self {
        Self {
            name: StrategyName::new("collection", "plugin"),
            settings,
        }
    }
}

impl CollectionStrategy for DisablePluginStrategy {
    fn name(&self) -> &StrategyName {
        &self.name
    }

    fn priority(&self) -> i32 {
        0
    }

    fn activation_setting(&self) -> &str {
        names::PLUGINS_PREFIX
    }

    fn is_active(&self, settings: &SettingsRegistry) -> bool {
        any_disabled(settings, names::PLUGINS_PREFIX)
    }

    fn observe(&self, probe: &ProbeDescriptor) {
        if let Some(plugin) = &probe.plugin {
            self.settings.register_default(&names::plugin_enabled(plugin), true);
        }
    }

    fn collect(&self, probe: &ProbeDescriptor) -> bool {
        match &probe.plugin {
            Some(plugin) => self
                .settings
                .get_bool(&names::plugin_enabled(plugin))
                .unwrap_or(true),
            None => true,
        }
    }
}

/// Receives the current set of applications that must not be traced
pub trait IgnoredApplicationsListener: Send + Sync {
    fn on_ignored_applications(&self, applications: &[String]);
}

/// Rejects probes running on behalf of an ignored application
///
/// The set is pushed in through [`IgnoredApplicationsListener`] and mirrored
/// into the `collection.ignored-applications` setting so the chain notices.
#[derive(Debug)]
pub struct IgnoredContextStrategy {
    name: StrategyName,
    settings: Arc<SettingsRegistry>,
    ignored: RwLock<HashSet<String>>,
}

impl IgnoredContextStrategy {
    pub fn new(settings: Arc<SettingsRegistry>) -> Self {
        Self {
            name: StrategyName::new("collection", "ignored-context"),
            settings,
            ignored: RwLock::new(HashSet::new()),
        }
    }

    pub fn is_ignored(&self, application: &str) -> bool {
        self.ignored.read().contains(application)
    }

    pub fn ignored_count(&self) -> usize {
        self.ignored.read().len()
    }
}

impl IgnoredApplicationsListener for IgnoredContextStrategy {
    fn on_ignored_applications(&self, applications: &[String]) {
        let mut sorted: Vec<String> = applications.to_vec();
        sorted.sort();
        sorted.dedup();

        *self.ignored.write() = sorted.iter().cloned().collect();
        tracing::debug!(count = sorted.len(), "ignored applications updated");

        let list: OperationList = sorted.into_iter().map(AttrValue::Str).collect();
        self.settings.set(names::IGNORED_APPLICATIONS, list);
    }
}

impl CollectionStrategy for IgnoredContextStrategy {
    fn name(&self) -> &StrategyName {
        &self.name
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn activation_setting(&self) -> &str {
        names::IGNORED_APPLICATIONS
    }

    fn is_active(&self, _settings: &SettingsRegistry) -> bool {
        !self.ignored.read().is_empty()
    }

    fn collect(&self, probe: &ProbeDescriptor) -> bool {
        match &probe.application {
            Some(application) => !self.is_ignored(application),
            None => true,
        }
    }
}

/// Per-aspect switch under `collection.aspects.<aspect>.enabled`
///
/// Aspects that keep failing are switched off automatically once
/// `failure_threshold` failures have been recorded; the reason is kept against
/// the owning plugin.
#[derive(Debug)]
pub struct AspectManagementStrategy {
    name: StrategyName,
    settings: Arc<SettingsRegistry>,
    failure_threshold: u32,
    failures: Mutex<HashMap<String, u32>>,
    plugin_failures: Mutex<HashMap<String, Vec<String>>>,
}

impl AspectManagementStrategy {
    pub fn new(settings: Arc<SettingsRegistry>, failure_threshold: u32) -> Self {
        Self {
            name: StrategyName::new("collection", "aspect"),
            settings,
            failure_threshold: failure_threshold.max(1),
            failures: Mutex::new(HashMap::new()),
            plugin_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Switch `aspect` off and record `reason` against `plugin`
    pub fn disable_aspect(&self, aspect: &str, plugin: &str, reason: &str) {
        tracing::warn!(aspect, plugin, reason, "disabling aspect");
        self.plugin_failures
            .lock()
            .entry(plugin.to_string())
            .or_default()
            .push(format!("{}: {}", aspect, reason));
        self.settings.set(&names::aspect_enabled(aspect), false);
    }

    /// Re-enable `aspect` and forget its failure count
    pub fn enable_aspect(&self, aspect: &str) {
        self.failures.lock().remove(aspect);
        self.settings.set(&names::aspect_enabled(aspect), true);
    }

    /// Count one failure; returns `true` if this failure disabled the aspect
    pub fn record_failure(&self, aspect: &str, plugin: &str, reason: &str) -> bool {
        let count = {
            let mut failures = self.failures.lock();
            let count = failures.entry(aspect.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let enabled = self
            .settings
            .get_bool(&names::aspect_enabled(aspect))
            .unwrap_or(true);
        if enabled && count >= self.failure_threshold {
            self.disable_aspect(aspect, plugin, reason);
            return true;
        }
        false
    }

    pub fn failure_count(&self, aspect: &str) -> u32 {
        self.failures.lock().get(aspect).copied().unwrap_or(0)
    }

    /// Disable reasons recorded against `plugin`, oldest first
    pub fn plugin_failures(&self, plugin: &str) -> Vec<String> {
        self.plugin_failures
            .lock()
            .get(plugin)
            .cloned()
            .unwrap_or_default()
    }
}

impl CollectionStrategy for AspectManagementStrategy {
    fn name(&self) -> &StrategyName {
        &self.name
    }

    fn priority(&self) -> i32 {
        10
    }

    fn activation_setting(&self) -> &str {
        names::ASPECTS_PREFIX
    }

    fn is_active(&self, settings: &SettingsRegistry) -> bool {
        any_disabled(settings, names::ASPECTS_PREFIX)
    }

    fn observe(&self, probe: &ProbeDescriptor) {
        if let Some(aspect) = &probe.aspect {
            self.settings.register_default(&names::aspect_enabled(aspect), true);
        }
    }

    fn collect(&self, probe: &ProbeDescriptor) -> bool {
        match &probe.aspect {
            Some(aspect) => self
                .settings
                .get_bool(&names::aspect_enabled(aspect))
                .unwrap_or(true),
            None => true,
        }
    }
}

/// Endpoint-only collection for a percentage of traces
///
/// The per-root decision lives in [`EndpointOnlyStrategy::decide_for_root`];
/// once a trace is downgraded only probes marked as endpoints pass.
#[derive(Debug)]
pub struct EndpointOnlyStrategy {
    name: StrategyName,
    settings: Arc<SettingsRegistry>,
    tracker: RatioTracker,
}

impl EndpointOnlyStrategy {
    pub fn new(settings: Arc<SettingsRegistry>, initial_ratio: u8) -> Self {
        let ratio = settings
            .register_default(names::ENDPOINT_ONLY_RATIO, initial_ratio.min(100) as i64)
            .as_int()
            .unwrap_or(0);
        Self {
            name: StrategyName::new("collection", "endpoint-only"),
            settings,
            tracker: RatioTracker::new(ratio.clamp(0, 100) as u8),
        }
    }

    /// Decide whether the trace starting now is downgraded
    pub fn decide_for_root(&self) -> bool {
        self.tracker.store_ratio(self.current_ratio());
        self.tracker.should_downgrade()
    }

    pub fn tracker(&self) -> &RatioTracker {
        &self.tracker
    }

    fn current_ratio(&self) -> u8 {
        self.settings
            .get_int(names::ENDPOINT_ONLY_RATIO)
            .unwrap_or(0)
            .clamp(0, 100) as u8
    }
}

impl CollectionStrategy for EndpointOnlyStrategy {
    fn name(&self) -> &StrategyName {
        &self.name
    }

    fn priority(&self) -> i32 {
        -50
    }

    fn activation_setting(&self) -> &str {
        names::ENDPOINT_ONLY_RATIO
    }

    fn is_active(&self, settings: &SettingsRegistry) -> bool {
        settings.get_int(names::ENDPOINT_ONLY_RATIO).unwrap_or(0) > 0
    }

    fn collect(&self, probe: &ProbeDescriptor) -> bool {
        !probe.endpoint_only || probe.is_endpoint
    }
}
