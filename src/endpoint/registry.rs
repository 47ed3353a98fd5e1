//! Registry dispatching frames to analyzers by operation type

use super::{DefaultEndPointAnalyzer, EndPointAnalysis, EndPointAnalyzer};
use crate::frame::FrameId;
use crate::operation::{Operation, OperationType};
use fnv::FnvHashMap;
use std::sync::Arc;

/// Analyzers indexed by the operation types they declare
///
/// Built once at startup through [`crate::tracer::TracerBuilder`]; read-only
/// afterwards and shared by every execution context.
#[derive(Default)]
pub struct EndPointAnalyzerRegistry {
    analyzers: Vec<Arc<dyn EndPointAnalyzer>>,
    by_type: FnvHashMap<OperationType, Vec<usize>>,
    fallback: DefaultEndPointAnalyzer,
}

impl EndPointAnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, analyzer: Arc<dyn EndPointAnalyzer>) {
        let index = self.analyzers.len();
        for op_type in analyzer.operation_types() {
            self.by_type.entry(op_type.clone()).or_default().push(index);
        }
        self.analyzers.push(analyzer);
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Best candidate for the frame being entered
    ///
    /// `ancestors` are the operation types of the open frames above this one;
    /// an empty slice means the frame is the root. Analyzers are skipped when
    /// an ancestor already has the same type. Equal scores keep the analyzer
    /// registered first. The root falls back to [`DefaultEndPointAnalyzer`].
    pub fn locate_endpoint(
        &self,
        operation: &Operation,
        frame: FrameId,
        depth: usize,
        ancestors: &[OperationType],
    ) -> Option<EndPointAnalysis> {
        let op_type = operation.op_type();
        let mut best: Option<EndPointAnalysis> = None;

        if !ancestors.contains(op_type) {
            if let Some(indices) = self.by_type.get(op_type) {
                for &index in indices {
                    let candidate = self.analyzers[index].locate_endpoint(operation, frame, depth);
                    if let Some(candidate) = candidate {
                        if candidate.beats(best.as_ref()) {
                            best = Some(candidate);
                        }
                    }
                }
            }
        }

        if best.is_none() && ancestors.is_empty() {
            best = self.fallback.locate_endpoint(operation, frame, depth);
        }
        best
    }
}

impl std::fmt::Debug for EndPointAnalyzerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.by_type.keys().map(OperationType::name).collect();
        types.sort_unstable();
        f.debug_struct("EndPointAnalyzerRegistry")
            .field("analyzers", &self.analyzers.len())
            .field("types", &types)
            .finish()
    }
}
