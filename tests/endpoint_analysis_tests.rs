//! Integration tests for endpoint analysis during trace capture
//!
//! # Test Coverage
//!
//! - Highest score wins regardless of nesting order
//! - Ties keep the earlier candidate
//! - Analyzers skip operations nested under the same type
//! - Root fallback endpoint when no analyzer matches
//! - `endpoint-source` marker follows the winner

use std::sync::Arc;
use trazo::endpoint::{
    DefaultEndPointAnalyzer, EndPointAnalysis, EndPointAnalyzer, TypedEndPointAnalyzer,
};
use trazo::frame::{Frame, FrameId};
use trazo::operation::{Operation, OperationType};
use trazo::sinks::CollectingSink;
use trazo::trace::Trace;
use trazo::tracer::{Tracer, TracerBuilder};

fn op(op_type: &str, label: &str) -> Operation {
    Operation::new(OperationType::of(op_type), label)
}

fn tracer_with(analyzers: Vec<Arc<dyn EndPointAnalyzer>>) -> (Tracer, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let mut builder = TracerBuilder::new().listener(sink.clone());
    for analyzer in analyzers {
        builder = builder.analyzer(analyzer);
    }
    (builder.build().unwrap(), sink)
}

fn scored() -> Vec<Arc<dyn EndPointAnalyzer>> {
    vec![
        Arc::new(TypedEndPointAnalyzer::new(&["servlet"], 10)),
        Arc::new(TypedEndPointAnalyzer::new(&["controller"], 20)),
    ]
}

fn endpoint_sources(trace: &Trace) -> Vec<FrameId> {
    let mut sources = Vec::new();
    trace.root().walk(&mut |frame: &Frame, _| {
        if frame.operation().is_endpoint_source() {
            sources.push(frame.id());
        }
    });
    sources
}

#[test]
fn test_higher_score_wins_when_nested_deeper() {
    let (tracer, sink) = tracer_with(scored());
    let ctx = tracer.new_context();

    ctx.enter(op("servlet", "/orders"));
    ctx.enter(op("controller", "OrderController.list"));
    ctx.exit();
    ctx.exit();

    let trace = &sink.traces()[0];
    let endpoint = trace.endpoint().unwrap();
    assert_eq!(endpoint.endpoint_name, "OrderController.list");
    assert_eq!(endpoint.score, 20);
    assert_eq!(endpoint.source_frame, FrameId::new(2));
    assert_eq!(endpoint_sources(trace), vec![FrameId::new(2)]);
}

#[test]
fn test_higher_score_wins_when_outermost() {
    let (tracer, sink) = tracer_with(scored());
    let ctx = tracer.new_context();

    ctx.enter(op("controller", "OrderController.list"));
    ctx.enter(op("servlet", "/orders"));
    ctx.exit();
    ctx.exit();

    let trace = &sink.traces()[0];
    assert_eq!(trace.endpoint().unwrap().score, 20);
    assert_eq!(endpoint_sources(trace), vec![FrameId::new(1)]);
}

#[test]
fn test_marker_moves_off_closed_frame() {
    let (tracer, sink) = tracer_with(scored());
    let ctx = tracer.new_context();

    ctx.enter(op("http", "GET /orders"));
    ctx.enter(op("servlet", "/orders"));
    ctx.exit();
    ctx.enter(op("controller", "OrderController.list"));
    ctx.exit();
    ctx.exit();

    let trace = &sink.traces()[0];
    assert_eq!(endpoint_sources(trace), vec![FrameId::new(3)]);
}

#[test]
fn test_equal_scores_keep_first() {
    let (tracer, sink) = tracer_with(vec![Arc::new(TypedEndPointAnalyzer::new(
        &["servlet", "controller"],
        10,
    ))]);
    let ctx = tracer.new_context();

    ctx.enter(op("servlet", "/first"));
    ctx.enter(op("controller", "second"));
    ctx.exit();
    ctx.exit();

    assert_eq!(sink.traces()[0].endpoint().unwrap().endpoint_name, "/first");
}

#[test]
fn test_nested_same_type_ignored() {
    let (tracer, sink) = tracer_with(vec![Arc::new(
        TypedEndPointAnalyzer::new(&["servlet"], 10).with_depth_penalty(-5),
    )]);
    let ctx = tracer.new_context();

    // A negative penalty would let the inner servlet win if it were analyzed
    ctx.enter(op("servlet", "/outer"));
    ctx.enter(op("servlet", "/inner"));
    ctx.exit();
    ctx.exit();

    let endpoint = sink.traces()[0].endpoint().cloned().unwrap();
    assert_eq!(endpoint.endpoint_name, "/outer");
    assert_eq!(endpoint.score, 10);
}

#[test]
fn test_depth_penalty_prefers_outer_match() {
    let (tracer, sink) = tracer_with(vec![Arc::new(
        TypedEndPointAnalyzer::new(&["rpc", "job"], 50).with_depth_penalty(10),
    )]);
    let ctx = tracer.new_context();

    ctx.enter(op("http", "GET /"));
    ctx.enter(op("rpc", "Inventory.reserve"));
    ctx.enter(op("job", "reindex"));
    ctx.exit();
    ctx.exit();
    ctx.exit();

    let endpoint = sink.traces()[0].endpoint().cloned().unwrap();
    assert_eq!(endpoint.endpoint_name, "Inventory.reserve");
    assert_eq!(endpoint.score, 40);
    assert_eq!(endpoint.resource_label, "rpc:Inventory.reserve");
}

#[test]
fn test_root_fallback_endpoint() {
    let (tracer, sink) = tracer_with(scored());
    let ctx = tracer.new_context();

    ctx.enter(op("queue", "orders.created"));
    ctx.enter(op("sql", "INSERT"));
    ctx.exit();
    ctx.exit();

    let trace = &sink.traces()[0];
    let endpoint: &EndPointAnalysis = trace.endpoint().unwrap();
    assert_eq!(endpoint.endpoint_name, "orders.created");
    assert_eq!(endpoint.example, "queue orders.created");
    assert_eq!(endpoint.score, DefaultEndPointAnalyzer::SCORE);
    assert_eq!(endpoint.source_type, OperationType::of("queue"));

    assert_eq!(tracer.endpoints().len(), 2);
}

#[test]
fn test_any_match_beats_fallback() {
    let (tracer, sink) = tracer_with(scored());
    let ctx = tracer.new_context();

    ctx.enter(op("queue", "orders.created"));
    ctx.enter(op("servlet", "/callback"));
    ctx.exit();
    ctx.exit();

    let trace = &sink.traces()[0];
    assert_eq!(trace.endpoint().unwrap().endpoint_name, "/callback");
    assert_eq!(endpoint_sources(trace), vec![FrameId::new(2)]);
}

#[test]
fn test_endpoint_serialized_with_trace() {
    let (tracer, sink) = tracer_with(scored());
    let ctx = tracer.new_context();
    ctx.enter(op("controller", "OrderController.list"));
    ctx.exit();

    let json: serde_json::Value =
        serde_json::from_str(&sink.traces()[0].to_json().unwrap()).unwrap();
    assert_eq!(json["endpoint"]["endpoint_name"], "OrderController.list");
    assert_eq!(json["endpoint"]["score"], 20);
}
