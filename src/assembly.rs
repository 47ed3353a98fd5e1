//! Trace assembly: turning a closed root frame into a dispatched [`Trace`]
//!
//! Runs on the thread that exited the root (or on the watchdog thread after a
//! forced unwind), outside the builder lock.
//!
//! 1. Resolve the application name ([`ApplicationResolver`]); attach a
//!    diagnostic frame if it stays unknown and diagnostics are enabled.
//! 2. Drop the trace if the application is ignored, if the watchdog cut it
//!    short, or if it was marked `discard` and no frame recorded an exception.
//! 3. Run any pending finalizers, snapshot the serializable hints and hand the
//!    [`Trace`] to the [`Dispatcher`].

use crate::attributes::OperationList;
use crate::builder::CompletedTrace;
use crate::collection::IgnoredContextStrategy;
use crate::context::ContextIdentity;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::frame::{Frame, FrameId};
use crate::hints::{keys, Hints};
use crate::operation::{Operation, OperationType};
use crate::trace::{Trace, TraceId};
use std::sync::Arc;

/// Name used when no resolver could name the application
pub const UNKNOWN_APPLICATION: &str = "unknown";

/// Operation type of the diagnostic frame attached to unknown-application traces
pub const UNKNOWN_APPLICATION_TYPE: &str = "unknown-application";

const MAX_BACKTRACE_FRAMES: usize = 64;

/// Names the application a trace belongs to
pub trait ApplicationResolver: Send + Sync {
    fn resolve(&self, hints: &Hints, context: &ContextIdentity) -> Option<String>;
}

/// Reads the `application-name` hint
#[derive(Debug, Clone, Default)]
pub struct HintApplicationResolver;

impl ApplicationResolver for HintApplicationResolver {
    fn resolve(&self, hints: &Hints, _context: &ContextIdentity) -> Option<String> {
        hints
            .get_str(keys::APPLICATION_NAME)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

/// Why a completed trace was not dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpReason {
    IgnoredApplication,
    ExceededMaxTime,
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyOutcome {
    Dispatched(DispatchOutcome),
    Dumped(DumpReason),
}

/// Builds traces from completed roots and routes them to the dispatcher
pub struct TraceAssembler {
    server_name: String,
    debug_unknown_applications: bool,
    resolver: Arc<dyn ApplicationResolver>,
    ignored: Arc<IgnoredContextStrategy>,
    dispatcher: Arc<Dispatcher>,
}

impl TraceAssembler {
    pub fn new(
        server_name: impl Into<String>,
        debug_unknown_applications: bool,
        resolver: Arc<dyn ApplicationResolver>,
        ignored: Arc<IgnoredContextStrategy>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            debug_unknown_applications,
            resolver,
            ignored,
            dispatcher,
        }
    }

    pub fn assemble(&self, completed: CompletedTrace) -> AssemblyOutcome {
        let CompletedTrace {
            mut root,
            mut hints,
            endpoint,
            start_time,
            context,
        } = completed;

        let application = self
            .resolver
            .resolve(&hints, &context)
            .unwrap_or_else(|| UNKNOWN_APPLICATION.to_string());
        if application == UNKNOWN_APPLICATION && self.debug_unknown_applications {
            attach_unknown_application_frame(&mut root, &context);
        }

        if let Some(reason) = self.dump_reason(&application, &hints, &root) {
            tracing::debug!(
                context = %context,
                application = %application,
                reason = ?reason,
                frames = root.frame_count(),
                "trace dumped"
            );
            return AssemblyOutcome::Dumped(reason);
        }

        root.walk_mut(&mut |frame| frame.operation_mut().finalize());
        if root.contains_exception() {
            hints.set(keys::HAS_EXCEPTION, true);
        }

        let id = hints
            .get_str(keys::TRACE_ID)
            .map(TraceId::from_hint)
            .unwrap_or_else(TraceId::generate);
        let trace_type = hints
            .get_str(keys::TRACE_TYPE)
            .map(str::to_string)
            .unwrap_or_else(|| root.operation().op_type().name().to_string());
        let minimal = hints.flag(keys::COLLECT_ONLY_ENDPOINTS)
            || hints.get_str(keys::OPERATION_COLLECTION_LEVEL) == Some("low");

        let trace = Trace {
            id,
            application_name: application,
            server_name: self.server_name.clone(),
            trace_type,
            start_time,
            sensitive: hints.flag(keys::SENSITIVE),
            minimal,
            hints: hints.to_attr_map(),
            endpoint,
            root,
        };

        tracing::debug!(
            trace_id = %trace.id(),
            application = trace.application_name(),
            frames = trace.frame_count(),
            "trace assembled"
        );
        AssemblyOutcome::Dispatched(self.dispatcher.dispatch_trace(trace))
    }

    /// Exceeded traces are dropped even if they recorded an exception
    fn dump_reason(&self, application: &str, hints: &Hints, root: &Frame) -> Option<DumpReason> {
        if self.ignored.is_ignored(application) {
            return Some(DumpReason::IgnoredApplication);
        }
        if hints.flag(keys::EXCEEDED_MAX_TIME) {
            return Some(DumpReason::ExceededMaxTime);
        }
        if hints.flag(keys::DISCARD) && !root.contains_exception() {
            return Some(DumpReason::Discarded);
        }
        None
    }
}

impl std::fmt::Debug for TraceAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceAssembler")
            .field("server_name", &self.server_name)
            .field("debug_unknown_applications", &self.debug_unknown_applications)
            .finish()
    }
}

/// Add a closed child describing where the unnamed trace came from
fn attach_unknown_application_frame(root: &mut Frame, context: &ContextIdentity) {
    let mut max_id = root.id();
    root.walk(&mut |frame, _| max_id = max_id.max(frame.id()));
    let id = FrameId::new(max_id.as_u32() + 1);

    let mut operation = Operation::new(
        OperationType::of(UNKNOWN_APPLICATION_TYPE),
        "Unknown application",
    );
    operation.put("context.id", context.context_id);
    operation.put("thread.id", context.thread_id.clone());
    if let Some(name) = &context.thread_name {
        operation.put("thread.name", name.clone());
    }
    operation.put("backtrace", capture_backtrace());

    let end = root.range().end_nanos;
    let mut frame = Frame::open(id, Some(root.id()), operation, end);
    frame.close(end);
    root.push_child(frame);
}

fn capture_backtrace() -> OperationList {
    let backtrace = backtrace::Backtrace::new();
    let mut lines = OperationList::new();
    for frame in backtrace.frames() {
        for symbol in frame.symbols() {
            if lines.len() >= MAX_BACKTRACE_FRAMES {
                return lines;
            }
            let name = symbol
                .name()
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("{:?}", frame.ip()));
            let line = match (symbol.filename(), symbol.lineno()) {
                (Some(file), Some(lineno)) => format!("{} ({}:{})", name, file.display(), lineno),
                _ => name,
            };
            lines.push(line);
        }
    }
    lines
}
