//! Analyzer trait and the bundled analyzers

use super::EndPointAnalysis;
use crate::frame::FrameId;
use crate::operation::{Operation, OperationType};

/// Scores operations of the types it declares
///
/// `depth` is the frame's depth in the trace (root = 1). Panics raised here
/// propagate to the instrumentation call site.
pub trait EndPointAnalyzer: Send + Sync {
    fn operation_types(&self) -> &[OperationType];

    fn score(&self, operation: &Operation, depth: usize) -> i32;

    fn locate_endpoint(
        &self,
        operation: &Operation,
        frame: FrameId,
        depth: usize,
    ) -> Option<EndPointAnalysis>;
}

/// Label-based analyzer: endpoint name is the operation label
///
/// The score starts at `base_score` and loses `depth_penalty` per level below
/// the root, so the outermost matching operation is preferred.
#[derive(Debug, Clone)]
pub struct TypedEndPointAnalyzer {
    types: Vec<OperationType>,
    base_score: i32,
    depth_penalty: i32,
}

impl TypedEndPointAnalyzer {
    pub fn new(types: &[&str], base_score: i32) -> Self {
        Self {
            types: types.iter().map(|t| OperationType::of(t)).collect(),
            base_score,
            depth_penalty: 0,
        }
    }

    pub fn with_depth_penalty(mut self, penalty: i32) -> Self {
        self.depth_penalty = penalty;
        self
    }
}

impl EndPointAnalyzer for TypedEndPointAnalyzer {
    fn operation_types(&self) -> &[OperationType] {
        &self.types
    }

    fn score(&self, _operation: &Operation, depth: usize) -> i32 {
        let levels = i32::try_from(depth.saturating_sub(1)).unwrap_or(i32::MAX);
        self.base_score
            .saturating_sub(self.depth_penalty.saturating_mul(levels))
    }

    fn locate_endpoint(
        &self,
        operation: &Operation,
        frame: FrameId,
        depth: usize,
    ) -> Option<EndPointAnalysis> {
        if !self.types.contains(operation.op_type()) {
            return None;
        }
        let label = operation.label().to_string();
        Some(EndPointAnalysis {
            endpoint_name: label.clone(),
            resource_label: format!("{}:{}", operation.op_type(), label),
            example: label,
            score: self.score(operation, depth),
            source_type: operation.op_type().clone(),
            source_frame: frame,
        })
    }
}

/// Fallback endpoint for the root when nothing better matched
#[derive(Debug, Clone, Default)]
pub struct DefaultEndPointAnalyzer;

impl DefaultEndPointAnalyzer {
    pub const SCORE: i32 = i32::MIN;
}

impl EndPointAnalyzer for DefaultEndPointAnalyzer {
    fn operation_types(&self) -> &[OperationType] {
        &[]
    }

    fn score(&self, _operation: &Operation, _depth: usize) -> i32 {
        Self::SCORE
    }

    fn locate_endpoint(
        &self,
        operation: &Operation,
        frame: FrameId,
        depth: usize,
    ) -> Option<EndPointAnalysis> {
        let label = operation.label().to_string();
        Some(EndPointAnalysis {
            endpoint_name: label.clone(),
            resource_label: label.clone(),
            example: format!("{} {}", operation.op_type(), label),
            score: self.score(operation, depth),
            source_type: operation.op_type().clone(),
            source_frame: frame,
        })
    }
}
