//! Collection strategies: which probes get recorded
//!
//! Instrumentation asks the [`StrategyChain`] before opening a frame. The chain
//! evaluates every *active* strategy in priority order (lowest first) and stops
//! at the first one that says no. Which strategies are active is driven by the
//! [`crate::settings::SettingsRegistry`]: flipping a setting recomputes the
//! active snapshot, so the common case (nothing disabled) evaluates an empty
//! chain.
//!
//! # Chain
//!
//! ```text
//! probe ──► DisableAgent ──► IgnoredContext ──► EndpointOnly ──► DisablePlugin ──► Aspect ──► PrefixExclude ──► collect
//!   (i32::MIN)          (-100)           (-50)              (0)             (10)        (20)
//!              any `false` short-circuits the rest
//! ```
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use trazo::collection::{names, DisableAgentStrategy, ProbeDescriptor, StrategyChain};
//! use trazo::settings::SettingsRegistry;
//!
//! let settings = Arc::new(SettingsRegistry::new());
//! let chain = StrategyChain::new(settings.clone());
//! chain.register(Arc::new(DisableAgentStrategy::new(settings.clone())));
//!
//! let probe = ProbeDescriptor::new("shop.Orders", "find");
//! assert!(chain.collect(&probe));
//!
//! settings.set(names::AGENT_DISABLED, true);
//! assert!(!chain.collect(&probe));
//! ```

pub mod chain;
pub mod ratio;
pub mod strategies;

pub use chain::StrategyChain;
pub use ratio::RatioTracker;
pub use strategies::{
    AspectManagementStrategy, DisableAgentStrategy, DisablePluginStrategy, EndpointOnlyStrategy,
    IgnoredApplicationsListener, IgnoredContextStrategy, PrefixExcludeStrategy,
};

use crate::settings::SettingsRegistry;
use std::fmt;

/// Setting names owned by the bundled strategies
pub mod names {
    pub const AGENT_DISABLED: &str = "collection.agent.disabled";
    pub const INSTRUMENTATION_PREFIX: &str = "collection.instrumentation.";
    pub const PLUGINS_PREFIX: &str = "collection.plugins.";
    pub const ASPECTS_PREFIX: &str = "collection.aspects.";
    pub const IGNORED_APPLICATIONS: &str = "collection.ignored-applications";
    pub const ENDPOINT_ONLY_RATIO: &str = "collection.endpoint-only.ratio";

    pub fn instrumentation(class_name: &str, method_name: &str) -> String {
        format!("{}{}.{}", INSTRUMENTATION_PREFIX, class_name, method_name)
    }

    pub fn plugin_enabled(plugin: &str) -> String {
        format!("{}{}.enabled", PLUGINS_PREFIX, plugin)
    }

    pub fn aspect_enabled(aspect: &str) -> String {
        format!("{}{}.enabled", ASPECTS_PREFIX, aspect)
    }
}

/// `group.kind[.target]` identity of a strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrategyName {
    pub group: String,
    pub kind: String,
    pub target: Option<String>,
}

impl StrategyName {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.kind)?;
        if let Some(target) = &self.target {
            write!(f, ".{}", target)?;
        }
        Ok(())
    }
}

/// What a probe is about to record
///
/// `endpoint_only` and `application` are normally filled in by
/// [`crate::context::ExecutionContext::should_collect`] from the trace's hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeDescriptor {
    pub class_name: String,
    pub method_name: String,
    pub plugin: Option<String>,
    pub aspect: Option<String>,
    pub application: Option<String>,
    /// The current trace was downgraded to endpoint-only collection
    pub endpoint_only: bool,
    /// The probe records an endpoint operation
    pub is_endpoint: bool,
}

impl ProbeDescriptor {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            ..Self::default()
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_aspect(mut self, aspect: impl Into<String>) -> Self {
        self.aspect = Some(aspect.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn endpoint(mut self) -> Self {
        self.is_endpoint = true;
        self
    }
}

/// A predicate deciding whether a probe is recorded
///
/// Strategies are only evaluated while [`CollectionStrategy::is_active`]
/// holds. Activity is recomputed whenever a setting whose name starts with
/// [`CollectionStrategy::activation_setting`] changes.
pub trait CollectionStrategy: Send + Sync {
    fn name(&self) -> &StrategyName;

    /// Lower runs first
    fn priority(&self) -> i32;

    /// Setting name (or dotted prefix) that can change this strategy's activity
    fn activation_setting(&self) -> &str;

    fn is_active(&self, settings: &SettingsRegistry) -> bool;

    /// Called for every probe whether or not the strategy is active
    ///
    /// Strategies use this to register the switches for targets they have not
    /// seen yet. It must not decide anything.
    fn observe(&self, _probe: &ProbeDescriptor) {}

    /// `false` rejects the probe and stops the chain
    fn collect(&self, probe: &ProbeDescriptor) -> bool;
}
