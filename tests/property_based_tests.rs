//! Property-based tests for trace capture
//!
//! Core properties tested:
//! 1. Any balanced enter/exit script yields exactly one well-formed trace
//! 2. Frame ids are unique and every id appears once
//! 3. Stray exits never panic and never produce traces
//! 4. Discarding closed frames keeps the tree well-formed
//! 5. Endpoint choice is independent of analyzer registration order

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use trazo::endpoint::{EndPointAnalyzer, TypedEndPointAnalyzer};
use trazo::frame::Frame;
use trazo::operation::{Operation, OperationType};
use trazo::sinks::CollectingSink;
use trazo::tracer::{Tracer, TracerBuilder};

const TYPES: [&str; 4] = ["http", "service", "sql", "cache"];

fn tracer() -> (Tracer, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let tracer = TracerBuilder::new().listener(sink.clone()).build().unwrap();
    (tracer, sink)
}

/// Enter/exit script: `true` opens a frame, `false` closes one
fn script() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 1..200)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_balanced_script_yields_well_formed_trace(steps in script()) {
        let (tracer, sink) = tracer();
        let ctx = tracer.new_context();
        ctx.enter(Operation::new(OperationType::of("http"), "root"));

        let mut entered = 1usize;
        for (i, step) in steps.iter().enumerate() {
            if *step {
                let op_type = TYPES[i % TYPES.len()];
                ctx.enter(Operation::new(OperationType::of(op_type), format!("op{i}")));
                entered += 1;
            } else if ctx.depth() > 1 {
                ctx.exit();
            }
        }
        while ctx.depth() > 0 {
            ctx.exit();
        }

        prop_assert_eq!(sink.len(), 1);
        let trace = &sink.traces()[0];
        prop_assert!(trace.root().is_well_formed());
        prop_assert_eq!(trace.frame_count(), entered);

        let mut ids = HashSet::new();
        trace.root().walk(&mut |frame: &Frame, _| {
            ids.insert(frame.id().as_u32());
        });
        prop_assert_eq!(ids.len(), entered);
        prop_assert_eq!(ids.iter().copied().max(), Some(entered as u32));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_stray_exits_are_harmless(extra in 1usize..20) {
        let (tracer, sink) = tracer();
        let ctx = tracer.new_context();
        ctx.enter(Operation::new(OperationType::of("http"), "root"));
        ctx.exit();

        for _ in 0..extra {
            prop_assert!(ctx.exit().is_none());
        }
        prop_assert_eq!(sink.len(), 1);
        prop_assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn prop_discarding_leaves_keeps_tree_valid(
        leaves in 1usize..30,
        discard_mask in prop::collection::vec(any::<bool>(), 30),
    ) {
        let (tracer, sink) = tracer();
        let ctx = tracer.new_context();
        ctx.enter(Operation::new(OperationType::of("http"), "root"));

        let mut kept = 1usize;
        for i in 0..leaves {
            let id = ctx.enter(Operation::new(OperationType::of("cache"), format!("get{i}")));
            ctx.exit();
            if discard_mask[i] {
                prop_assert!(ctx.discard(id));
            } else {
                kept += 1;
            }
        }
        ctx.exit();

        let trace = &sink.traces()[0];
        prop_assert!(trace.root().is_well_formed());
        prop_assert_eq!(trace.frame_count(), kept);
    }

    #[test]
    fn prop_endpoint_independent_of_registration_order(
        scores in prop::collection::vec(-1000i32..1000, 4),
        reversed in any::<bool>(),
    ) {
        let mut analyzers: Vec<Arc<dyn EndPointAnalyzer>> = TYPES
            .iter()
            .zip(&scores)
            .map(|(t, s)| Arc::new(TypedEndPointAnalyzer::new(&[*t], *s)) as Arc<dyn EndPointAnalyzer>)
            .collect();
        if reversed {
            analyzers.reverse();
        }

        let sink = Arc::new(CollectingSink::new());
        let mut builder = TracerBuilder::new().listener(sink.clone());
        for analyzer in analyzers {
            builder = builder.analyzer(analyzer);
        }
        let tracer = builder.build().unwrap();
        let ctx = tracer.new_context();
        for t in TYPES {
            ctx.enter(Operation::new(OperationType::of(t), t));
        }
        for _ in TYPES {
            ctx.exit();
        }

        let best = scores.iter().copied().max().unwrap();
        let endpoint = sink.traces()[0].endpoint().cloned().unwrap();
        prop_assert_eq!(endpoint.score, best);
    }
}
