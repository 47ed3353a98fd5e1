//! Synthetic workload driving a [`Tracer`] the way instrumentation would
//!
//! Each simulated request gets its own [`ExecutionContext`], asks the strategy
//! chain before every probe, opens an `http` root, then a tree of `service`
//! frames with `sql` and `cache` leaves:
//!
//! ```text
//! http GET /orders/0
//! ├── service OrderService.step0
//! │   ├── sql SELECT orders        (every Nth leaf fails)
//! │   └── cache orders:0:2:1       (discarded when it did not fail)
//! └── service OrderService.step1
//!     └── ...
//! ```

use crate::collection::ProbeDescriptor;
use crate::context::ExecutionContext;
use crate::hints::keys;
use crate::operation::{Operation, OperationType, SourceCodeLocation};
use crate::tracer::Tracer;

/// Shape of the simulated traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub traces: usize,
    pub depth: usize,
    pub fanout: usize,
    pub application: Option<String>,
    /// Fail every Nth leaf; 0 never fails
    pub fail_every: usize,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            traces: 3,
            depth: 2,
            fanout: 2,
            application: None,
            fail_every: 0,
        }
    }
}

/// What the workload did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    pub roots: usize,
    pub frames_entered: usize,
    pub probes_skipped: usize,
    pub failures: usize,
    pub discarded: usize,
}

impl WorkloadReport {
    /// Fraction of probes the strategy chain turned away
    pub fn skip_rate(&self) -> f64 {
        let asked = self.frames_entered + self.probes_skipped;
        if asked == 0 {
            0.0
        } else {
            self.probes_skipped as f64 / asked as f64
        }
    }
}

impl Workload {
    pub fn run(&self, tracer: &Tracer) -> WorkloadReport {
        let mut report = WorkloadReport::default();
        let mut leaves = 0usize;

        for request in 0..self.traces {
            let ctx = tracer.new_context();
            let mut probe = ProbeDescriptor::new("demo.OrderController", "handle").endpoint();
            if let Some(app) = &self.application {
                probe = probe.with_application(app.clone());
            }
            if !ctx.should_collect(&mut probe) {
                report.probes_skipped += 1;
                continue;
            }

            let root = Operation::new(OperationType::of("http"), format!("GET /orders/{request}"))
                .with_source(SourceCodeLocation::new("demo.OrderController", "handle", 42));
            ctx.enter(root);
            report.roots += 1;
            report.frames_entered += 1;
            if let Some(app) = &self.application {
                ctx.set_hint(keys::APPLICATION_NAME, app.as_str());
            }
            ctx.with_operation(|op| {
                op.put("http.method", "GET");
                op.put("http.status", 200i64);
            });

            self.descend(&ctx, request, 1, &mut leaves, &mut report);
            ctx.exit();
        }

        tracing::debug!(?report, "workload finished");
        report
    }

    fn descend(
        &self,
        ctx: &ExecutionContext,
        request: usize,
        level: usize,
        leaves: &mut usize,
        report: &mut WorkloadReport,
    ) {
        if level > self.depth {
            return;
        }
        let leaf_level = level == self.depth;

        for child in 0..self.fanout {
            let (mut probe, operation) = if !leaf_level {
                (
                    ProbeDescriptor::new("demo.OrderService", format!("step{child}")),
                    Operation::new(
                        OperationType::of("service"),
                        format!("OrderService.step{child}"),
                    ),
                )
            } else if child % 2 == 0 {
                (
                    ProbeDescriptor::new("demo.OrderDao", "query").with_plugin("sql"),
                    sql_operation(request, child),
                )
            } else {
                (
                    ProbeDescriptor::new("demo.OrderCache", "get").with_plugin("cache"),
                    Operation::new(
                        OperationType::of("cache"),
                        format!("orders:{request}:{level}:{child}"),
                    ),
                )
            };

            if !ctx.should_collect(&mut probe) {
                report.probes_skipped += 1;
                continue;
            }

            let frame = ctx.enter(operation);
            report.frames_entered += 1;

            if !leaf_level {
                self.descend(ctx, request, level + 1, leaves, report);
                ctx.exit();
                continue;
            }

            *leaves += 1;
            let failed = self.fail_every > 0 && *leaves % self.fail_every == 0;
            if failed {
                ctx.with_operation(|op| op.set_exception("simulated failure"));
                report.failures += 1;
            }
            ctx.exit();

            if child % 2 == 1 && ctx.discard(frame) {
                report.discarded += 1;
            }
        }
    }
}

fn sql_operation(request: usize, child: usize) -> Operation {
    let mut op = Operation::new(OperationType::of("sql"), "SELECT orders");
    op.put("db.rows", (request * 10 + child) as i64);
    op.add_finalizer(|op, _rich| {
        let rows = op.props().get_int("db.rows").unwrap_or(0);
        op.put("db.empty", rows == 0);
    });
    op
}
