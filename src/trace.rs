//! Finished traces: the immutable snapshot handed to sinks

use crate::attributes::AttrValue;
use crate::endpoint::EndPointAnalysis;
use crate::frame::Frame;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// 128-bit trace identifier, lower-case hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Fresh random id (16 bytes)
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        TraceId(hex::encode(bytes))
    }

    /// Use an id supplied by instrumentation (e.g. a propagated header)
    pub fn from_hint(value: &str) -> Self {
        TraceId(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One complete execution: the closed frame tree plus its metadata
#[derive(Debug, Serialize)]
pub struct Trace {
    pub(crate) id: TraceId,
    pub(crate) application_name: String,
    pub(crate) server_name: String,
    pub(crate) trace_type: String,
    pub(crate) start_time: SystemTime,
    pub(crate) root: Frame,
    pub(crate) hints: BTreeMap<String, AttrValue>,
    pub(crate) sensitive: bool,
    pub(crate) minimal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) endpoint: Option<EndPointAnalysis>,
}

impl Trace {
    pub fn id(&self) -> &TraceId {
        &self.id
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn trace_type(&self) -> &str {
        &self.trace_type
    }

    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    pub fn root(&self) -> &Frame {
        &self.root
    }

    pub fn hints(&self) -> &BTreeMap<String, AttrValue> {
        &self.hints
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    /// Collected at reduced detail (endpoint-only or low collection level)
    pub fn is_minimal(&self) -> bool {
        self.minimal
    }

    pub fn endpoint(&self) -> Option<&EndPointAnalysis> {
        self.endpoint.as_ref()
    }

    pub fn frame_count(&self) -> usize {
        self.root.frame_count()
    }

    /// Root frame duration in nanoseconds
    pub fn duration_nanos(&self) -> u64 {
        self.root.range().duration_nanos()
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
