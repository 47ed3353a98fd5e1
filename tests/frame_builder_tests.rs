//! Integration tests for the frame builder through `ExecutionContext`
//!
//! # Test Coverage
//!
//! - Nesting and time-range containment
//! - Balanced enter/exit sequences and stray exits
//! - Runaway protection (max_frames abort and reset)
//! - Discard rules (closed frames only, never frames with exceptions)
//! - Hints, dump and the endpoint-source marker

use std::sync::Arc;
use trazo::attributes::AttrValue;
use trazo::hints::keys;
use trazo::operation::{Operation, OperationType};
use trazo::sinks::CollectingSink;
use trazo::tracer::{Tracer, TracerBuilder};

fn op(op_type: &str, label: &str) -> Operation {
    Operation::new(OperationType::of(op_type), label)
}

fn tracer() -> (Tracer, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let tracer = TracerBuilder::new()
        .server_name("test-server")
        .listener(sink.clone())
        .build()
        .unwrap();
    (tracer, sink)
}

#[test]
fn test_child_nested_in_parent() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    ctx.enter(op("http", "A"));
    ctx.enter(op("sql", "B"));
    let b = ctx.exit().unwrap();
    let a = ctx.exit().unwrap();

    assert!(!b.is_root);
    assert!(a.is_root);
    assert_eq!(b.parent, Some(a.id));
    assert!(a.range.contains(&b.range));

    let trace = &sink.traces()[0];
    assert_eq!(trace.server_name(), "test-server");
    assert_eq!(trace.trace_type(), "http");
    assert_eq!(trace.root().children().len(), 1);
    assert_eq!(trace.root().children()[0].operation().label(), "B");
    assert!(trace.root().is_well_formed());
}

#[test]
fn test_balanced_sequence_returns_to_idle() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    for i in 0..10 {
        ctx.enter(op("service", &format!("step{i}")));
    }
    assert_eq!(ctx.depth(), 10);
    for _ in 0..10 {
        assert!(ctx.exit().is_some());
    }

    assert_eq!(ctx.depth(), 0);
    assert!(!ctx.is_building());
    assert!(ctx.exit().is_none());
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.traces()[0].frame_count(), 10);
}

#[test]
fn test_frame_ids_restart_per_trace() {
    let (tracer, _sink) = tracer();
    let ctx = tracer.new_context();

    let first = ctx.enter(op("http", "first"));
    ctx.enter(op("sql", "q"));
    ctx.exit();
    ctx.exit();
    let second = ctx.enter(op("http", "second"));
    ctx.exit();

    assert_eq!(first.as_u32(), 1);
    assert_eq!(second.as_u32(), 1);
}

#[test]
fn test_runaway_trace_aborts_and_resets() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    ctx.enter(op("http", "GET /loop"));
    ctx.set_hint(keys::APPLICATION_NAME, "shop");
    ctx.set_hint(keys::TRACE_TYPE, "web");
    for _ in 0..1000 {
        ctx.enter(op("service", "recurse"));
    }

    assert_eq!(ctx.frame_count(), 1001);
    assert_eq!(ctx.hint(keys::ABORTED), Some(AttrValue::Bool(true)));

    ctx.enter(op("http", "GET /fresh"));
    assert_eq!(ctx.depth(), 1);
    assert_eq!(ctx.frame_count(), 1);
    assert!(ctx.hint(keys::ABORTED).is_none());
    assert!(ctx.hint(keys::TRACE_TYPE).is_none());
    assert_eq!(ctx.hint(keys::APPLICATION_NAME), Some(AttrValue::from("shop")));

    ctx.exit();
    let traces = sink.traces();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].root().operation().label(), "GET /fresh");
    assert_eq!(traces[0].application_name(), "shop");
}

#[test]
fn test_exactly_max_frames_is_not_aborted() {
    let sink = Arc::new(CollectingSink::new());
    let tracer = TracerBuilder::new()
        .max_frames(5)
        .listener(sink.clone())
        .build()
        .unwrap();
    let ctx = tracer.new_context();

    for _ in 0..5 {
        ctx.enter(op("service", "s"));
    }
    assert!(ctx.hint(keys::ABORTED).is_none());
    ctx.enter(op("service", "s"));
    assert_eq!(ctx.hint(keys::ABORTED), Some(AttrValue::Bool(true)));
}

#[test]
fn test_discard_removes_closed_child() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    ctx.enter(op("http", "A"));
    let b = ctx.enter(op("cache", "B"));
    assert!(!ctx.discard(b));
    ctx.exit();
    assert!(ctx.discard(b));
    assert!(!ctx.discard(b));
    ctx.exit();

    let trace = &sink.traces()[0];
    assert_eq!(trace.frame_count(), 1);
    assert!(trace.root().children().is_empty());
}

#[test]
fn test_exception_frame_cannot_be_discarded() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    ctx.enter(op("http", "A"));
    let b = ctx.enter(op("service", "B"));
    ctx.enter(op("sql", "C"));
    ctx.peek().unwrap().set_exception("deadlock");
    ctx.exit();
    ctx.exit();

    assert!(!ctx.discard(b));
    ctx.exit();

    let trace = &sink.traces()[0];
    assert_eq!(trace.frame_count(), 3);
    assert_eq!(trace.hints().get(keys::HAS_EXCEPTION), Some(&AttrValue::Bool(true)));
}

#[test]
fn test_discarding_root_drops_trace() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    let root = ctx.enter(op("http", "GET /health"));
    assert!(ctx.discard(root));
    ctx.exit();

    assert!(sink.is_empty());
    assert!(tracer.dispatcher().buffered().is_empty());
}

#[test]
fn test_discarded_root_with_exception_still_dispatched() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    let root = ctx.enter(op("http", "GET /health"));
    ctx.discard(root);
    ctx.peek().unwrap().set_exception("boom");
    ctx.exit();

    assert_eq!(sink.len(), 1);
}

#[test]
fn test_dump_drops_in_flight_trace() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    ctx.enter(op("http", "GET /"));
    ctx.enter(op("sql", "q"));
    assert!(ctx.dump());
    assert!(!ctx.is_building());
    assert!(ctx.exit().is_none());
    assert!(!ctx.dump());
    assert!(sink.is_empty());
}

#[test]
fn test_set_hint_if_root_only_at_root() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    assert!(!ctx.set_hint_if_root(keys::TRACE_TYPE, "idle"));
    ctx.enter(op("http", "GET /"));
    assert!(ctx.set_hint_if_root(keys::TRACE_TYPE, "web"));
    ctx.enter(op("sql", "q"));
    assert!(!ctx.set_hint_if_root(keys::TRACE_TYPE, "batch"));
    ctx.exit();
    ctx.exit();

    assert_eq!(sink.traces()[0].trace_type(), "web");
}

#[test]
fn test_trace_id_hint_used() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    ctx.enter(op("http", "GET /"));
    ctx.set_hint(keys::TRACE_ID, "abc123");
    ctx.set_hint(keys::SENSITIVE, true);
    ctx.exit();

    let trace = &sink.traces()[0];
    assert_eq!(trace.id().as_str(), "abc123");
    assert!(trace.is_sensitive());
    assert!(!trace.is_minimal());
}

#[test]
fn test_generated_trace_ids_are_unique_hex() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();
    for _ in 0..2 {
        ctx.enter(op("http", "GET /"));
        ctx.exit();
    }

    let traces = sink.traces();
    let a = traces[0].id().as_str();
    let b = traces[1].id().as_str();
    assert_eq!(a.len(), 32);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a, b);
}

#[test]
fn test_finalizer_runs_once_on_exit() {
    let (tracer, sink) = tracer();
    let ctx = tracer.new_context();

    let mut root = op("http", "GET /");
    root.add_finalizer(|op, _rich| {
        let runs = op.props().get_int("runs").unwrap_or(0);
        op.put("runs", runs + 1);
    });
    ctx.enter(root);
    assert_eq!(ctx.peek().unwrap().pending_finalizers(), 1);
    ctx.exit();

    let trace = &sink.traces()[0];
    assert_eq!(trace.root().operation().props().get_int("runs"), Some(1));
}

#[test]
fn test_contexts_are_independent() {
    let (tracer, sink) = tracer();
    let a = tracer.new_context();
    let b = tracer.new_context();

    a.enter(op("http", "A"));
    b.enter(op("http", "B"));
    b.enter(op("sql", "B.q"));
    assert_eq!(a.depth(), 1);
    assert_eq!(b.depth(), 2);

    a.exit();
    assert_eq!(sink.len(), 1);
    b.exit();
    b.exit();
    assert_eq!(sink.len(), 2);
}

#[test]
fn test_contexts_on_threads() {
    let (tracer, sink) = tracer();
    let tracer = Arc::new(tracer);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let tracer = tracer.clone();
            std::thread::spawn(move || {
                let ctx = tracer.new_context();
                for j in 0..25 {
                    ctx.enter(op("http", &format!("GET /{i}/{j}")));
                    ctx.enter(op("sql", "q"));
                    ctx.exit();
                    ctx.exit();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(sink.len(), 100);
    assert!(tracer.contexts().is_empty());
}
