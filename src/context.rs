//! Execution contexts: the instrumentation-facing handle to one frame builder
//!
//! An [`ExecutionContext`] is handed to whatever code runs one logical unit of
//! work (a request, a job). It owns an `Arc<Mutex<FrameBuilder>>`: the owning
//! thread locks it uncontended on every call, and the watchdog reaches it
//! through the [`ContextRegistry`] with `try_lock` only. Dropping the context
//! unregisters it.
//!
//! # Example
//! ```
//! use trazo::operation::{Operation, OperationType};
//! use trazo::tracer::TracerBuilder;
//!
//! let tracer = TracerBuilder::new().build().unwrap();
//! let ctx = tracer.new_context();
//!
//! ctx.enter(Operation::new(OperationType::of("http"), "GET /orders"));
//! ctx.enter(Operation::new(OperationType::of("sql"), "SELECT * FROM orders"));
//! ctx.exit();
//! let root = ctx.exit().unwrap();
//! assert!(root.is_root);
//! assert_eq!(tracer.dispatcher().buffered().len(), 1);
//! ```

use crate::assembly::TraceAssembler;
use crate::attributes::AttrValue;
use crate::builder::{BuilderLimits, FrameBuilder};
use crate::collection::{EndpointOnlyStrategy, ProbeDescriptor, StrategyChain};
use crate::endpoint::EndPointAnalyzerRegistry;
use crate::frame::{Frame, FrameId, FrameInfo};
use crate::hints::keys;
use crate::operation::Operation;
use fnv::FnvHashMap;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Which context a trace came from (used in logs and diagnostics)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextIdentity {
    pub context_id: u64,
    pub thread_name: Option<String>,
    pub thread_id: String,
}

impl ContextIdentity {
    /// Identity of context `context_id` created on the calling thread
    pub fn current(context_id: u64) -> Self {
        let thread = std::thread::current();
        Self {
            context_id,
            thread_name: thread.name().map(str::to_string),
            thread_id: format!("{:?}", thread.id()),
        }
    }
}

impl fmt::Display for ContextIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread_name {
            Some(name) => write!(f, "ctx-{}@{}", self.context_id, name),
            None => write!(f, "ctx-{}@{}", self.context_id, self.thread_id),
        }
    }
}

pub type SharedBuilder = Arc<Mutex<FrameBuilder>>;

/// Live builders, keyed by context id
#[derive(Debug, Default)]
pub struct ContextRegistry {
    builders: RwLock<FnvHashMap<u64, SharedBuilder>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, context_id: u64, builder: SharedBuilder) {
        self.builders.write().insert(context_id, builder);
    }

    pub fn unregister(&self, context_id: u64) -> bool {
        self.builders.write().remove(&context_id).is_some()
    }

    /// Snapshot for sweeping without holding the registry lock
    pub fn snapshot(&self) -> Vec<(u64, SharedBuilder)> {
        self.builders
            .read()
            .iter()
            .map(|(id, builder)| (*id, builder.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.builders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.read().is_empty()
    }
}

/// Everything a context needs from its tracer
#[derive(Clone)]
pub(crate) struct ContextServices {
    pub(crate) limits: BuilderLimits,
    pub(crate) endpoints: Arc<EndPointAnalyzerRegistry>,
    pub(crate) chain: Arc<StrategyChain>,
    pub(crate) endpoint_only: Arc<EndpointOnlyStrategy>,
    pub(crate) assembler: Arc<TraceAssembler>,
    pub(crate) contexts: Arc<ContextRegistry>,
}

/// Instrumentation handle for one logical execution
pub struct ExecutionContext {
    id: u64,
    builder: SharedBuilder,
    services: ContextServices,
}

impl ExecutionContext {
    pub(crate) fn new(id: u64, services: ContextServices) -> Self {
        let builder = Arc::new(Mutex::new(FrameBuilder::new(
            services.limits.clone(),
            services.endpoints.clone(),
            ContextIdentity::current(id),
        )));
        services.contexts.register(id, builder.clone());
        Self {
            id,
            builder,
            services,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Open a frame; a new root also decides endpoint-only downgrade
    pub fn enter(&self, operation: Operation) -> FrameId {
        let mut builder = self.builder.lock();
        let id = builder.enter(operation);
        if builder.is_root_current() && self.services.endpoint_only.decide_for_root() {
            tracing::debug!(context = self.id, "trace downgraded to endpoint-only collection");
            builder.set_hint(keys::COLLECT_ONLY_ENDPOINTS, true);
            builder.set_hint(keys::OPERATION_COLLECTION_LEVEL, "low");
        }
        id
    }

    /// Close the current frame; closing the root assembles and dispatches the trace
    pub fn exit(&self) -> Option<FrameInfo> {
        let exited = self.builder.lock().exit()?;
        if let Some(completed) = exited.completed {
            self.services.assembler.assemble(completed);
        }
        Some(exited.info)
    }

    pub fn discard(&self, frame_id: FrameId) -> bool {
        self.builder.lock().discard(frame_id)
    }

    /// Current operation, locked for the guard's lifetime
    ///
    /// # Deadlocks
    ///
    /// The guard holds the builder lock, which is not reentrant. Calling any
    /// other method of this context while the guard is alive deadlocks the
    /// calling thread. Drop the guard first, or use
    /// [`with_operation`](Self::with_operation).
    pub fn peek(&self) -> Option<MappedMutexGuard<'_, Operation>> {
        MutexGuard::try_map(self.builder.lock(), |b| b.top_operation_mut()).ok()
    }

    /// Run `f` on the current operation and release the lock before returning
    ///
    /// `f` must not call back into this context.
    pub fn with_operation<R>(&self, f: impl FnOnce(&mut Operation) -> R) -> Option<R> {
        self.builder.lock().top_operation_mut().map(f)
    }

    /// Current frame, locked for the guard's lifetime
    ///
    /// # Deadlocks
    ///
    /// Same as [`peek`](Self::peek): drop the guard before touching the
    /// context again.
    pub fn peek_frame(&self) -> Option<MappedMutexGuard<'_, Frame>> {
        MutexGuard::try_map(self.builder.lock(), |b| b.top_frame_mut()).ok()
    }

    pub fn set_hint(&self, key: &str, value: impl Into<AttrValue>) {
        self.builder.lock().set_hint(key, value);
    }

    pub fn set_hint_object<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.builder.lock().set_hint_object(key, value);
    }

    /// Set a hint only while the root is the current frame
    pub fn set_hint_if_root(&self, key: &str, value: impl Into<AttrValue>) -> bool {
        self.builder.lock().set_hint_if_root(key, value)
    }

    pub fn hint(&self, key: &str) -> Option<AttrValue> {
        self.builder.lock().hints().get(key).cloned()
    }

    /// Typed access to an object hint
    pub fn hint_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.builder.lock().hints().get_object::<T>(key)
    }

    /// Drop the in-flight trace without dispatching it
    pub fn dump(&self) -> bool {
        self.builder.lock().dump()
    }

    /// Ask the strategy chain whether `probe` should be recorded
    ///
    /// Fills in `endpoint_only` and (if unset) `application` from this
    /// context's hints before evaluating.
    pub fn should_collect(&self, probe: &mut ProbeDescriptor) -> bool {
        {
            let builder = self.builder.lock();
            let hints = builder.hints();
            probe.endpoint_only = hints.flag(keys::COLLECT_ONLY_ENDPOINTS);
            if probe.application.is_none() {
                probe.application = hints.get_str(keys::APPLICATION_NAME).map(str::to_string);
            }
        }
        self.services.chain.collect(probe)
    }

    pub fn depth(&self) -> usize {
        self.builder.lock().depth()
    }

    pub fn is_building(&self) -> bool {
        self.builder.lock().is_building()
    }

    pub fn frame_count(&self) -> usize {
        self.builder.lock().frame_count()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.services.contexts.unregister(self.id);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{names, IgnoredApplicationsListener};
    use crate::operation::OperationType;
    use crate::sinks::CollectingSink;
    use crate::tracer::TracerBuilder;

    fn op(op_type: &str, label: &str) -> Operation {
        Operation::new(OperationType::of(op_type), label)
    }

    #[test]
    fn test_context_registers_and_unregisters() {
        let tracer = TracerBuilder::new().build().unwrap();
        let a = tracer.new_context();
        let b = tracer.new_context();
        assert_ne!(a.id(), b.id());
        assert_eq!(tracer.contexts().len(), 2);
        drop(a);
        assert_eq!(tracer.contexts().len(), 1);
    }

    #[test]
    fn test_peek_mutates_current_operation() {
        let tracer = TracerBuilder::new().build().unwrap();
        let sink = Arc::new(CollectingSink::new());
        tracer.dispatcher().register(sink.clone());
        let ctx = tracer.new_context();

        assert!(ctx.peek().is_none());
        ctx.enter(op("http", "GET /"));
        ctx.peek().unwrap().put("status", 200i64);
        assert_eq!(ctx.peek_frame().unwrap().id(), FrameId::new(1));
        ctx.exit();

        let traces = sink.traces();
        assert_eq!(traces[0].root().operation().props().get_int("status"), Some(200));
    }

    #[test]
    fn test_with_operation_releases_lock() {
        let tracer = TracerBuilder::new().build().unwrap();
        let sink = Arc::new(CollectingSink::new());
        tracer.dispatcher().register(sink.clone());
        let ctx = tracer.new_context();

        assert!(ctx.with_operation(|op| op.label().len()).is_none());
        ctx.enter(op("http", "GET /"));
        let label = ctx
            .with_operation(|op| {
                op.put("status", 404i64);
                op.label().to_string()
            })
            .unwrap();

        // the lock is free again: the context stays usable
        ctx.set_hint(keys::APPLICATION_NAME, "shop");
        ctx.enter(op("sql", "SELECT 1"));
        ctx.exit();
        ctx.exit();

        assert_eq!(label, "GET /");
        let traces = sink.traces();
        assert_eq!(traces[0].root().operation().props().get_int("status"), Some(404));
        assert_eq!(traces[0].frame_count(), 2);
    }

    #[test]
    fn test_hints_round_trip() {
        let tracer = TracerBuilder::new().build().unwrap();
        let ctx = tracer.new_context();
        ctx.enter(op("http", "GET /"));
        ctx.set_hint(keys::APPLICATION_NAME, "shop");
        ctx.set_hint_object(keys::OBSCURED_VALUE_REGISTRY, vec!["card".to_string()]);

        assert_eq!(ctx.hint(keys::APPLICATION_NAME), Some(AttrValue::from("shop")));
        let obscured = ctx.hint_as::<Vec<String>>(keys::OBSCURED_VALUE_REGISTRY).unwrap();
        assert_eq!(obscured.len(), 1);
        assert!(ctx.dump());
        assert!(ctx.hint(keys::APPLICATION_NAME).is_none());
    }

    #[test]
    fn test_endpoint_only_downgrade() {
        let tracer = TracerBuilder::new().endpoint_only_ratio(100).build().unwrap();
        let ctx = tracer.new_context();
        ctx.enter(op("http", "GET /"));

        assert_eq!(ctx.hint(keys::COLLECT_ONLY_ENDPOINTS), Some(AttrValue::Bool(true)));
        assert_eq!(ctx.hint(keys::OPERATION_COLLECTION_LEVEL), Some(AttrValue::from("low")));

        let mut plain = ProbeDescriptor::new("shop.Dao", "load");
        assert!(!ctx.should_collect(&mut plain));
        assert!(plain.endpoint_only);
        let mut endpoint = ProbeDescriptor::new("shop.Api", "get").endpoint();
        assert!(ctx.should_collect(&mut endpoint));

        tracer.settings().set(names::ENDPOINT_ONLY_RATIO, 0i64);
        ctx.exit();
        ctx.enter(op("http", "GET /again"));
        assert!(ctx.hint(keys::COLLECT_ONLY_ENDPOINTS).is_none());
    }

    #[test]
    fn test_should_collect_uses_application_hint() {
        let tracer = TracerBuilder::new().build().unwrap();
        tracer
            .ignored_applications()
            .on_ignored_applications(&["admin".to_string()]);
        let ctx = tracer.new_context();
        ctx.enter(op("http", "GET /admin"));
        ctx.set_hint(keys::APPLICATION_NAME, "admin");

        let mut probe = ProbeDescriptor::new("admin.Console", "render");
        assert!(!ctx.should_collect(&mut probe));
        assert_eq!(probe.application.as_deref(), Some("admin"));
    }
}
