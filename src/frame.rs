//! Frame tree: timed nodes describing one instrumented operation each
//!
//! Frames are built by [`crate::builder::FrameBuilder`] and owned by their
//! parent once closed. Parent links are ids rather than pointers: a closed
//! frame is only reachable through the tree, never mutated from outside it.
//!
//! # Invariants
//!
//! ```text
//! root (id 1)          [start ............................ end]
//! ├─ child (id 2)         [start ....... end]
//! │  └─ grandchild (3)       [start . end]
//! └─ child (id 4)                             [start .. end]
//! ```
//!
//! - every non-root frame has exactly one parent, entered before and exited after it
//! - `child.range ⊆ parent.range`
//! - ids are unique and strictly increasing in entry order

use crate::operation::Operation;
use serde::Serialize;
use std::fmt;

/// Small integer id, monotonic per execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FrameId(u32);

impl FrameId {
    pub fn new(raw: u32) -> Self {
        FrameId(raw)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Start/end in nanoseconds on the [`crate::clock`] timeline
///
/// `end_nanos` equals `start_nanos` until the frame is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start_nanos: u64,
    pub end_nanos: u64,
}

impl TimeRange {
    pub fn starting_at(start_nanos: u64) -> Self {
        Self {
            start_nanos,
            end_nanos: start_nanos,
        }
    }

    pub fn new(start_nanos: u64, end_nanos: u64) -> Self {
        Self {
            start_nanos,
            end_nanos: end_nanos.max(start_nanos),
        }
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_nanos.saturating_sub(self.start_nanos)
    }

    /// `other` lies entirely within `self`
    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start_nanos <= other.start_nanos && other.end_nanos <= self.end_nanos
    }
}

/// Lightweight summary of a frame, returned by `exit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub id: FrameId,
    pub parent: Option<FrameId>,
    pub is_root: bool,
    pub op_type: String,
    pub label: String,
    pub range: TimeRange,
}

/// One node of the execution tree
#[derive(Debug, Serialize)]
pub struct Frame {
    id: FrameId,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<FrameId>,
    is_root: bool,
    range: TimeRange,
    operation: Operation,
    children: Vec<Frame>,
}

impl Frame {
    pub(crate) fn open(id: FrameId, parent: Option<FrameId>, operation: Operation, start_nanos: u64) -> Self {
        Self {
            id,
            parent,
            is_root: parent.is_none(),
            range: TimeRange::starting_at(start_nanos),
            operation,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn operation_mut(&mut self) -> &mut Operation {
        &mut self.operation
    }

    pub fn children(&self) -> &[Frame] {
        &self.children
    }

    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            id: self.id,
            parent: self.parent,
            is_root: self.is_root,
            op_type: self.operation.op_type().name().to_string(),
            label: self.operation.label().to_string(),
            range: self.range,
        }
    }

    pub(crate) fn close(&mut self, end_nanos: u64) {
        self.range = TimeRange::new(self.range.start_nanos, end_nanos);
    }

    pub(crate) fn push_child(&mut self, child: Frame) {
        self.children.push(child);
    }

    /// Detach the direct child with `id`
    pub(crate) fn remove_child(&mut self, id: FrameId) -> Option<Frame> {
        let index = self.children.iter().position(|c| c.id == id)?;
        Some(self.children.remove(index))
    }

    /// Depth-first search of this subtree (including `self`)
    pub fn find(&self, id: FrameId) -> Option<&Frame> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub(crate) fn find_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Visit every frame depth-first with its depth below `self` (self = 0)
    pub fn walk<F: FnMut(&Frame, usize)>(&self, visitor: &mut F) {
        self.walk_at(0, visitor);
    }

    fn walk_at<F: FnMut(&Frame, usize)>(&self, depth: usize, visitor: &mut F) {
        visitor(self, depth);
        for child in &self.children {
            child.walk_at(depth + 1, visitor);
        }
    }

    pub(crate) fn walk_mut<F: FnMut(&mut Frame)>(&mut self, visitor: &mut F) {
        visitor(self);
        for child in &mut self.children {
            child.walk_mut(visitor);
        }
    }

    pub fn frame_count(&self) -> usize {
        1 + self.children.iter().map(Frame::frame_count).sum::<usize>()
    }

    /// Any frame in this subtree recorded an exception
    pub fn contains_exception(&self) -> bool {
        self.operation.has_exception() || self.children.iter().any(Frame::contains_exception)
    }

    /// Check the tree invariants for this subtree
    ///
    /// Returns `false` if any child escapes its parent's range, links to the
    /// wrong parent, or has an id not greater than its parent's.
    pub fn is_well_formed(&self) -> bool {
        self.children.iter().all(|child| {
            child.parent == Some(self.id)
                && !child.is_root
                && child.id > self.id
                && self.range.contains(&child.range)
                && child.is_well_formed()
        })
    }
}
