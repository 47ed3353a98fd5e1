//! Frame builder: the per-context stack machine behind enter/exit
//!
//! One builder exists per execution context. It is either idle (no open
//! frames) or building a trace (root frame open). Frames are pushed on
//! `enter` and popped on `exit`; a popped frame is closed and attached to the
//! new top, or, when it was the root, handed back as a [`CompletedTrace`].
//!
//! ```text
//!          enter (root)               exit (root)
//!   Idle ───────────────► Building ───────────────► Idle + CompletedTrace
//!    ▲                      │  ▲
//!    │       enter/exit     └──┘
//!    │
//!    └── dump() / abort reset on next enter
//! ```
//!
//! # Runaway protection
//!
//! Once more than `max_frames` frames were entered for one trace the builder
//! marks itself aborted (hint `aborted`). The next `enter` drops the whole
//! trace, keeps only the preserved hints and starts over with a fresh root.
//! Nothing is ever returned as an error: the traced code must not notice.

use crate::attributes::AttrValue;
use crate::clock;
use crate::config::TracerConfig;
use crate::context::ContextIdentity;
use crate::endpoint::{EndPointAnalysis, EndPointAnalyzerRegistry};
use crate::frame::{Frame, FrameId, FrameInfo};
use crate::hints::{keys, HintValue, Hints};
use crate::operation::{props, Operation, OperationType};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Limits copied from [`TracerConfig`] at context creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderLimits {
    pub max_frames: usize,
    pub preserved_hints: Vec<String>,
}

impl From<&TracerConfig> for BuilderLimits {
    fn from(config: &TracerConfig) -> Self {
        Self {
            max_frames: config.max_frames,
            preserved_hints: config.preserved_hints.clone(),
        }
    }
}

impl Default for BuilderLimits {
    fn default() -> Self {
        BuilderLimits::from(&TracerConfig::default())
    }
}

/// A closed root frame with everything gathered while it was open
#[derive(Debug)]
pub struct CompletedTrace {
    pub root: Frame,
    pub hints: Hints,
    pub endpoint: Option<EndPointAnalysis>,
    pub start_time: SystemTime,
    pub context: ContextIdentity,
}

/// Result of a successful `exit`
#[derive(Debug)]
pub struct Exited {
    pub info: FrameInfo,
    /// Present when the exited frame was the root
    pub completed: Option<CompletedTrace>,
}

/// Stack-based trace builder for one execution context
#[derive(Debug)]
pub struct FrameBuilder {
    limits: BuilderLimits,
    endpoints: Arc<EndPointAnalyzerRegistry>,
    identity: ContextIdentity,
    stack: Vec<Frame>,
    hints: Hints,
    endpoint: Option<EndPointAnalysis>,
    start_time: Option<SystemTime>,
    next_id: u32,
    frame_count: usize,
    depth: usize,
}

impl FrameBuilder {
    pub fn new(
        limits: BuilderLimits,
        endpoints: Arc<EndPointAnalyzerRegistry>,
        identity: ContextIdentity,
    ) -> Self {
        Self {
            limits,
            endpoints,
            identity,
            stack: Vec::new(),
            hints: Hints::new(),
            endpoint: None,
            start_time: None,
            next_id: 0,
            frame_count: 0,
            depth: 0,
        }
    }

    /// Open a frame for `operation` and return its id
    pub fn enter(&mut self, operation: Operation) -> FrameId {
        if self.hints.flag(keys::ABORTED) {
            tracing::warn!(
                context = %self.identity,
                frames = self.frame_count,
                "trace aborted after exceeding max_frames; resetting"
            );
            self.reset_preserving_hints();
        }

        let now = clock::now_nanos();
        if self.stack.is_empty() {
            self.start_time = Some(SystemTime::now());
        }

        self.next_id += 1;
        let id = FrameId::new(self.next_id);
        let parent = self.stack.last().map(Frame::id);
        let mut frame = Frame::open(id, parent, operation, now);

        self.frame_count += 1;
        self.depth += 1;
        self.analyze_endpoint(&mut frame);
        self.stack.push(frame);

        if self.frame_count > self.limits.max_frames && !self.hints.flag(keys::ABORTED) {
            tracing::warn!(
                context = %self.identity,
                max_frames = self.limits.max_frames,
                "frame limit exceeded; trace will be dropped on next enter"
            );
            self.hints.set(keys::ABORTED, true);
        }
        id
    }

    /// Close the top frame
    ///
    /// Returns `None` (and logs) if no frame is open.
    pub fn exit(&mut self) -> Option<Exited> {
        let Some(mut frame) = self.stack.pop() else {
            tracing::warn!(context = %self.identity, "exit called with no open frame");
            return None;
        };

        frame.operation_mut().finalize();
        frame.close(clock::now_nanos());
        self.depth = self.depth.saturating_sub(1);
        let info = frame.info();

        match self.stack.last_mut() {
            Some(parent) => {
                parent.push_child(frame);
                Some(Exited {
                    info,
                    completed: None,
                })
            }
            None => Some(Exited {
                info,
                completed: Some(self.complete(frame)),
            }),
        }
    }

    /// Drop a closed frame from the tree
    ///
    /// The root cannot be removed while open; discarding it sets the
    /// `discard` hint instead. Frames whose subtree recorded an exception, and
    /// frames that are still open, are kept and `false` is returned.
    pub fn discard(&mut self, frame_id: FrameId) -> bool {
        let Some(root) = self.stack.first() else {
            return false;
        };
        if root.id() == frame_id {
            self.hints.set(keys::DISCARD, true);
            return true;
        }
        if self.stack.iter().any(|f| f.id() == frame_id) {
            tracing::debug!(frame = %frame_id, "refusing to discard an open frame");
            return false;
        }

        let Some(target) = self.stack.iter().find_map(|f| f.find(frame_id)) else {
            return false;
        };
        if target.contains_exception() {
            tracing::debug!(frame = %frame_id, "frame recorded an exception; not discarded");
            return false;
        }
        let Some(parent_id) = target.parent() else {
            return false;
        };

        let removed = self
            .stack
            .iter_mut()
            .find_map(|f| f.find_mut(parent_id))
            .and_then(|parent| parent.remove_child(frame_id));
        match removed {
            Some(removed) => {
                self.frame_count = self.frame_count.saturating_sub(removed.frame_count());
                true
            }
            None => false,
        }
    }

    /// Top-of-stack operation
    pub fn top_operation_mut(&mut self) -> Option<&mut Operation> {
        self.stack.last_mut().map(Frame::operation_mut)
    }

    /// Top-of-stack frame
    pub fn top_frame(&self) -> Option<&Frame> {
        self.stack.last()
    }

    pub fn top_frame_mut(&mut self) -> Option<&mut Frame> {
        self.stack.last_mut()
    }

    pub fn set_hint(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.hints.set(key, value);
    }

    pub fn set_hint_object<T: std::any::Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.hints.set_object(key, value);
    }

    /// Set a hint only while the root frame is the current frame
    pub fn set_hint_if_root(&mut self, key: &str, value: impl Into<AttrValue>) -> bool {
        if self.stack.len() != 1 {
            return false;
        }
        self.hints.set(key, value);
        true
    }

    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    pub fn hint(&self, key: &str) -> Option<&HintValue> {
        self.hints.get_raw(key)
    }

    /// Drop the in-flight trace without producing anything
    pub fn dump(&mut self) -> bool {
        let had_trace = !self.stack.is_empty();
        if had_trace {
            tracing::debug!(context = %self.identity, frames = self.frame_count, "dumping in-flight trace");
        }
        self.stack.clear();
        self.hints.clear();
        self.reset_counters();
        had_trace
    }

    /// Unwind a context whose top frame has been open longer than `max_age`
    ///
    /// Marks the trace as exceeded and discarded, then exits every open frame.
    /// Returns the completed trace (for assembly to drop) or `None` if the
    /// context is idle or still within its deadline.
    pub fn force_unwind(&mut self, max_age: Duration, now_nanos: u64) -> Option<CompletedTrace> {
        let top = self.stack.last_mut()?;
        let age = now_nanos.saturating_sub(top.range().start_nanos);
        if u128::from(age) < max_age.as_nanos() {
            return None;
        }

        tracing::warn!(
            context = %self.identity,
            frame = %top.id(),
            age_ms = age / 1_000_000,
            "frame exceeded max trace duration; unwinding"
        );
        top.operation_mut().put(props::EXCEEDED_MAX_TIME, true);
        self.hints.set(keys::EXCEEDED_MAX_TIME, true);
        self.hints.set(keys::DISCARD, true);

        while let Some(exited) = self.exit() {
            if exited.completed.is_some() {
                return exited.completed;
            }
        }
        None
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_building(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn is_root_current(&self) -> bool {
        self.stack.len() == 1
    }

    /// Frames entered for the current trace (including closed ones)
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_aborted(&self) -> bool {
        self.hints.flag(keys::ABORTED)
    }

    /// Best endpoint found so far
    pub fn endpoint(&self) -> Option<&EndPointAnalysis> {
        self.endpoint.as_ref()
    }

    pub fn identity(&self) -> &ContextIdentity {
        &self.identity
    }

    /// Offer a new frame to the analyzers; moves the `endpoint-source` marker
    /// when it wins
    fn analyze_endpoint(&mut self, frame: &mut Frame) {
        let ancestors: Vec<OperationType> = self
            .stack
            .iter()
            .map(|f| f.operation().op_type().clone())
            .collect();

        let Some(candidate) =
            self.endpoints
                .locate_endpoint(frame.operation(), frame.id(), self.depth, &ancestors)
        else {
            return;
        };
        if !candidate.beats(self.endpoint.as_ref()) {
            return;
        }

        if let Some(previous) = self.endpoint.take() {
            if let Some(old) = self
                .stack
                .iter_mut()
                .find_map(|f| f.find_mut(previous.source_frame))
            {
                old.operation_mut().set_endpoint_source(false);
            }
        }
        tracing::trace!(endpoint = %candidate.endpoint_name, score = candidate.score, "endpoint candidate accepted");
        frame.operation_mut().set_endpoint_source(true);
        self.endpoint = Some(candidate);
    }

    fn complete(&mut self, root: Frame) -> CompletedTrace {
        let completed = CompletedTrace {
            root,
            hints: std::mem::take(&mut self.hints),
            endpoint: self.endpoint.take(),
            start_time: self.start_time.take().unwrap_or_else(SystemTime::now),
            context: self.identity.clone(),
        };
        self.reset_counters();
        completed
    }

    fn reset_preserving_hints(&mut self) {
        self.stack.clear();
        self.hints.retain_only(&self.limits.preserved_hints);
        self.reset_counters();
    }

    fn reset_counters(&mut self) {
        self.endpoint = None;
        self.start_time = None;
        self.next_id = 0;
        self.frame_count = 0;
        self.depth = 0;
    }
}
