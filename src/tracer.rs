//! Tracer service: the single object wiring every component together
//!
//! A [`Tracer`] is built once at startup with [`TracerBuilder`] and shared by
//! `Arc`. It owns the settings registry, the strategy chain, the endpoint
//! analyzers, the dispatcher and the context registry, and hands out
//! [`ExecutionContext`]s to instrumentation.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use trazo::endpoint::TypedEndPointAnalyzer;
//! use trazo::sinks::CollectingSink;
//! use trazo::tracer::TracerBuilder;
//!
//! let sink = Arc::new(CollectingSink::new());
//! let tracer = TracerBuilder::new()
//!     .server_name("checkout-01")
//!     .analyzer(Arc::new(TypedEndPointAnalyzer::new(&["http"], 10)))
//!     .listener(sink.clone())
//!     .build()
//!     .unwrap();
//!
//! let ctx = tracer.new_context();
//! ctx.enter(trazo::operation::Operation::new(
//!     trazo::operation::OperationType::of("http"),
//!     "GET /",
//! ));
//! ctx.exit();
//! assert_eq!(sink.len(), 1);
//! ```

use crate::assembly::{ApplicationResolver, HintApplicationResolver, TraceAssembler};
use crate::builder::BuilderLimits;
use crate::collection::{
    AspectManagementStrategy, CollectionStrategy, DisableAgentStrategy, DisablePluginStrategy,
    EndpointOnlyStrategy, IgnoredContextStrategy, PrefixExcludeStrategy, StrategyChain,
};
use crate::config::TracerConfig;
use crate::context::{ContextRegistry, ContextServices, ExecutionContext};
use crate::dispatch::{Dispatcher, TraceListener};
use crate::endpoint::{EndPointAnalyzer, EndPointAnalyzerRegistry};
use crate::error::Result;
use crate::settings::SettingsRegistry;
use crate::watchdog::{SweepReport, Watchdog, WatchdogHandle};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Startup-time registration of analyzers, strategies, sinks and resolver
pub struct TracerBuilder {
    config: TracerConfig,
    settings: Option<Arc<SettingsRegistry>>,
    analyzers: Vec<Arc<dyn EndPointAnalyzer>>,
    strategies: Vec<Arc<dyn CollectionStrategy>>,
    listeners: Vec<Arc<dyn TraceListener>>,
    resolver: Option<Arc<dyn ApplicationResolver>>,
    start_watchdog: bool,
}

impl Default for TracerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TracerBuilder {
    pub fn new() -> Self {
        Self {
            config: TracerConfig::default(),
            settings: None,
            analyzers: Vec::new(),
            strategies: Vec::new(),
            listeners: Vec::new(),
            resolver: None,
            start_watchdog: false,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: TracerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    pub fn max_frames(mut self, max_frames: usize) -> Self {
        self.config.max_frames = max_frames;
        self
    }

    pub fn endpoint_only_ratio(mut self, ratio: u8) -> Self {
        self.config.endpoint_only_ratio = ratio;
        self
    }

    pub fn debug_unknown_applications(mut self, enabled: bool) -> Self {
        self.config.debug_unknown_applications = enabled;
        self
    }

    /// Share an existing settings registry (e.g. one fed by a config service)
    pub fn settings(mut self, settings: Arc<SettingsRegistry>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn EndPointAnalyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    /// Add a strategy after the bundled ones
    pub fn strategy(mut self, strategy: Arc<dyn CollectionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn TraceListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ApplicationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Start the background watchdog thread as part of `build`
    pub fn with_watchdog(mut self, enabled: bool) -> Self {
        self.start_watchdog = enabled;
        self
    }

    pub fn build(self) -> Result<Tracer> {
        self.config.validate()?;
        let config = self.config;
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(SettingsRegistry::new()));

        let chain = StrategyChain::new(settings.clone());
        let agent = Arc::new(DisableAgentStrategy::new(settings.clone()));
        let ignored = Arc::new(IgnoredContextStrategy::new(settings.clone()));
        let endpoint_only = Arc::new(EndpointOnlyStrategy::new(
            settings.clone(),
            config.endpoint_only_ratio,
        ));
        let plugins = Arc::new(DisablePluginStrategy::new(settings.clone()));
        let aspects = Arc::new(AspectManagementStrategy::new(
            settings.clone(),
            config.aspect_failure_threshold,
        ));
        let prefix_exclude = Arc::new(PrefixExcludeStrategy::new(settings.clone()));

        chain.register(agent);
        chain.register(ignored.clone());
        chain.register(endpoint_only.clone());
        chain.register(plugins);
        chain.register(aspects.clone());
        chain.register(prefix_exclude.clone());
        for strategy in self.strategies {
            chain.register(strategy);
        }

        let mut endpoints = EndPointAnalyzerRegistry::new();
        for analyzer in self.analyzers {
            endpoints.register(analyzer);
        }
        let endpoints = Arc::new(endpoints);

        let dispatcher = Arc::new(Dispatcher::new(config.dispatch_buffer_capacity));
        for listener in self.listeners {
            dispatcher.register(listener);
        }

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(HintApplicationResolver));
        let assembler = Arc::new(TraceAssembler::new(
            config.server_name.clone(),
            config.debug_unknown_applications,
            resolver,
            ignored.clone(),
            dispatcher.clone(),
        ));

        let contexts = Arc::new(ContextRegistry::new());
        let services = ContextServices {
            limits: BuilderLimits::from(&config),
            endpoints,
            chain,
            endpoint_only,
            assembler,
            contexts,
        };

        let tracer = Tracer {
            config,
            settings,
            services,
            ignored,
            aspects,
            prefix_exclude,
            dispatcher,
            next_context_id: AtomicU64::new(1),
            watchdog: Mutex::new(None),
        };

        if self.start_watchdog {
            tracer.start_watchdog()?;
        }
        tracing::debug!(server = %tracer.config.server_name, "tracer built");
        Ok(tracer)
    }
}

/// Process-wide tracing service
pub struct Tracer {
    config: TracerConfig,
    settings: Arc<SettingsRegistry>,
    services: ContextServices,
    ignored: Arc<IgnoredContextStrategy>,
    aspects: Arc<AspectManagementStrategy>,
    prefix_exclude: Arc<PrefixExcludeStrategy>,
    dispatcher: Arc<Dispatcher>,
    next_context_id: AtomicU64,
    watchdog: Mutex<Option<WatchdogHandle>>,
}

impl Tracer {
    /// New execution context, registered for watchdog sweeps until dropped
    pub fn new_context(&self) -> ExecutionContext {
        let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
        ExecutionContext::new(id, self.services.clone())
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<SettingsRegistry> {
        &self.settings
    }

    pub fn chain(&self) -> &Arc<StrategyChain> {
        &self.services.chain
    }

    pub fn endpoints(&self) -> &Arc<EndPointAnalyzerRegistry> {
        &self.services.endpoints
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn contexts(&self) -> &Arc<ContextRegistry> {
        &self.services.contexts
    }

    pub fn ignored_applications(&self) -> &Arc<IgnoredContextStrategy> {
        &self.ignored
    }

    pub fn aspects(&self) -> &Arc<AspectManagementStrategy> {
        &self.aspects
    }

    pub fn prefix_exclude(&self) -> &Arc<PrefixExcludeStrategy> {
        &self.prefix_exclude
    }

    pub fn endpoint_only(&self) -> &Arc<EndpointOnlyStrategy> {
        &self.services.endpoint_only
    }

    /// Watchdog over this tracer's contexts (not started)
    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(
            self.services.contexts.clone(),
            self.services.assembler.clone(),
            self.config.max_trace_duration(),
            self.config.watchdog_interval(),
        )
    }

    /// One synchronous watchdog sweep
    pub fn sweep_once(&self) -> SweepReport {
        self.watchdog().sweep_once()
    }

    /// Start the background watchdog; a no-op if it is already running
    pub fn start_watchdog(&self) -> Result<()> {
        let mut slot = self.watchdog.lock();
        if slot.is_none() {
            *slot = Some(self.watchdog().start()?);
            tracing::debug!(interval = ?self.config.watchdog_interval(), "watchdog started");
        }
        Ok(())
    }

    pub fn stop_watchdog(&self) {
        if let Some(handle) = self.watchdog.lock().take() {
            handle.stop();
        }
    }

    pub fn is_watchdog_running(&self) -> bool {
        self.watchdog.lock().is_some()
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("config", &self.config)
            .field("contexts", &self.services.contexts.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
