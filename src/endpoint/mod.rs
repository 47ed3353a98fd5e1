//! Endpoint analysis: naming a trace after its most representative operation
//!
//! Each frame entered is offered to the analyzers registered for its
//! operation type. Analyzers score their candidate; the trace keeps the highest
//! score seen so far and only a strictly higher score replaces it. The root
//! always gets a fallback endpoint from [`DefaultEndPointAnalyzer`].

pub mod analyzer;
pub mod registry;

pub use analyzer::{DefaultEndPointAnalyzer, EndPointAnalyzer, TypedEndPointAnalyzer};
pub use registry::EndPointAnalyzerRegistry;

use crate::frame::FrameId;
use crate::operation::OperationType;
use serde::Serialize;

/// The endpoint chosen for a trace and where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndPointAnalysis {
    pub endpoint_name: String,
    pub resource_label: String,
    pub example: String,
    pub score: i32,
    pub source_type: OperationType,
    pub source_frame: FrameId,
}

impl EndPointAnalysis {
    /// `true` if `self` should replace `current`
    pub fn beats(&self, current: Option<&EndPointAnalysis>) -> bool {
        match current {
            None => true,
            Some(current) => self.score > current.score,
        }
    }
}
