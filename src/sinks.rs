//! Bundled trace sinks
//!
//! - [`CollectingSink`] keeps traces in memory (tests, embedding)
//! - [`JsonLinesSink`] writes one JSON document per trace
//! - [`TextSink`] writes an indented frame tree for humans

use crate::dispatch::TraceListener;
use crate::error::Result;
use crate::frame::Frame;
use crate::trace::Trace;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Accepts every trace and keeps it
#[derive(Debug, Default)]
pub struct CollectingSink {
    traces: Mutex<Vec<Arc<Trace>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<Arc<Trace>> {
        self.traces.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.traces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.lock().is_empty()
    }

    pub fn clear(&self) {
        self.traces.lock().clear();
    }
}

impl TraceListener for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    fn on_trace(&self, trace: &Arc<Trace>) -> Result<bool> {
        self.traces.lock().push(trace.clone());
        Ok(true)
    }
}

/// One JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> TraceListener for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "json-lines"
    }

    fn on_trace(&self, trace: &Arc<Trace>) -> Result<bool> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, trace.as_ref())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(true)
    }
}

/// Indented tree, one line per frame
pub struct TextSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl TextSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> TraceListener for TextSink<W> {
    fn name(&self) -> &str {
        "text"
    }

    fn on_trace(&self, trace: &Arc<Trace>) -> Result<bool> {
        let rendered = render_text(trace);
        let mut writer = self.writer.lock();
        writer.write_all(rendered.as_bytes())?;
        writer.flush()?;
        Ok(true)
    }
}

/// Human-readable rendering of a trace
pub fn render_text(trace: &Trace) -> String {
    let mut out = format!(
        "trace {} app={} type={} frames={}",
        trace.id(),
        trace.application_name(),
        trace.trace_type(),
        trace.frame_count()
    );
    if let Some(endpoint) = trace.endpoint() {
        out.push_str(&format!(" endpoint=\"{}\"", endpoint.endpoint_name));
    }
    out.push('\n');

    trace.root().walk(&mut |frame: &Frame, depth| {
        let op = frame.operation();
        let mut markers = String::new();
        if op.has_exception() {
            markers.push_str(" [exception]");
        }
        if op.is_endpoint_source() {
            markers.push_str(" [endpoint]");
        }
        out.push_str(&format!(
            "{}{} {} {} ({}us){}\n",
            "  ".repeat(depth + 1),
            frame.id(),
            op.op_type(),
            op.label(),
            frame.range().duration_nanos() / 1_000,
            markers
        ));
    });
    out
}
