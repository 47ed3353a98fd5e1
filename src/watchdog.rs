//! Runaway watchdog: unwinds contexts whose current frame never returns
//!
//! A background thread wakes every `watchdog_interval` and sweeps the
//! [`ContextRegistry`]. Each builder is probed with `try_lock`; a builder that
//! is busy (its owner is inside enter/exit right now) is obviously not stuck
//! and is skipped until the next sweep. If the top frame has been open longer
//! than `max_trace_duration`, the trace is marked `exceeded-max-time` and
//! `discard`, unwound to idle and handed to assembly, which drops it.
//!
//! ```text
//! ┌──────────────────────────── watchdog thread ────────────────────────────┐
//! │ loop {                                                                  │
//! │   stop.recv_timeout(interval)  ── stop signal / disconnect ──► exit     │
//! │   for builder in registry.snapshot():                                   │
//! │     try_lock ── busy ──► skip                                           │
//! │     top frame older than max? ──► force_unwind ──► assemble (dumped)    │
//! │ }                                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::assembly::TraceAssembler;
use crate::clock;
use crate::context::ContextRegistry;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub visited: usize,
    pub busy: usize,
    pub unwound: usize,
}

/// Sweeps registered contexts for frames open too long
#[derive(Debug, Clone)]
pub struct Watchdog {
    contexts: Arc<ContextRegistry>,
    assembler: Arc<TraceAssembler>,
    max_age: Duration,
    interval: Duration,
}

impl Watchdog {
    pub fn new(
        contexts: Arc<ContextRegistry>,
        assembler: Arc<TraceAssembler>,
        max_age: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            contexts,
            assembler,
            max_age,
            interval,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Inspect every registered context once
    pub fn sweep_once(&self) -> SweepReport {
        self.sweep_at(clock::now_nanos())
    }

    /// Sweep as if the clock read `now_nanos`
    pub fn sweep_at(&self, now_nanos: u64) -> SweepReport {
        let mut report = SweepReport::default();

        for (context_id, builder) in self.contexts.snapshot() {
            report.visited += 1;
            let completed = match builder.try_lock() {
                Some(mut builder) => builder.force_unwind(self.max_age, now_nanos),
                None => {
                    report.busy += 1;
                    continue;
                }
            };

            if let Some(completed) = completed {
                report.unwound += 1;
                tracing::warn!(context = context_id, "watchdog unwound a runaway trace");
                self.assembler.assemble(completed);
            }
        }

        if report.unwound > 0 || report.busy > 0 {
            tracing::debug!(
                visited = report.visited,
                busy = report.busy,
                unwound = report.unwound,
                "watchdog sweep"
            );
        }
        report
    }

    /// Run sweeps on a dedicated thread until the handle is stopped or dropped
    pub fn start(self) -> std::io::Result<WatchdogHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let sweeps = Arc::new(AtomicU64::new(0));
        let sweeps_clone = sweeps.clone();
        let interval = self.interval;

        let thread = thread::Builder::new()
            .name("trazo-watchdog".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        self.sweep_once();
                        sweeps_clone.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(WatchdogHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
            sweeps,
        })
    }
}

/// Owns the watchdog thread; stopping joins it
#[derive(Debug)]
pub struct WatchdogHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    sweeps: Arc<AtomicU64>,
}

impl WatchdogHandle {
    /// Sweeps completed so far
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::HintApplicationResolver;
    use crate::builder::{BuilderLimits, FrameBuilder};
    use crate::collection::IgnoredContextStrategy;
    use crate::context::ContextIdentity;
    use crate::dispatch::Dispatcher;
    use crate::endpoint::EndPointAnalyzerRegistry;
    use crate::operation::{Operation, OperationType};
    use crate::settings::SettingsRegistry;
    use parking_lot::Mutex;

    fn watchdog(max_age: Duration) -> (Watchdog, Arc<ContextRegistry>, Arc<Dispatcher>) {
        let contexts = Arc::new(ContextRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(10));
        let assembler = Arc::new(TraceAssembler::new(
            "localhost",
            false,
            Arc::new(HintApplicationResolver),
            Arc::new(IgnoredContextStrategy::new(Arc::new(SettingsRegistry::new()))),
            dispatcher.clone(),
        ));
        let watchdog = Watchdog::new(contexts.clone(), assembler, max_age, Duration::from_millis(10));
        (watchdog, contexts, dispatcher)
    }

    fn stuck_builder(id: u64) -> Arc<Mutex<FrameBuilder>> {
        let mut builder = FrameBuilder::new(
            BuilderLimits::default(),
            Arc::new(EndPointAnalyzerRegistry::new()),
            ContextIdentity::current(id),
        );
        builder.enter(Operation::new(OperationType::of("http"), "GET /slow"));
        builder.enter(Operation::new(OperationType::of("socket"), "read"));
        Arc::new(Mutex::new(builder))
    }

    #[test]
    fn test_sweep_unwinds_old_frames() {
        let (watchdog, contexts, dispatcher) = watchdog(Duration::from_secs(60));
        let builder = stuck_builder(1);
        contexts.register(1, builder.clone());

        let report = watchdog.sweep_at(clock::now_nanos());
        assert_eq!(report, SweepReport { visited: 1, busy: 0, unwound: 0 });
        assert!(builder.lock().is_building());

        let later = clock::now_nanos() + Duration::from_secs(61).as_nanos() as u64;
        let report = watchdog.sweep_at(later);
        assert_eq!(report.unwound, 1);
        assert!(!builder.lock().is_building());
        assert!(dispatcher.buffered().is_empty());
    }

    #[test]
    fn test_busy_builders_skipped() {
        let (watchdog, contexts, _dispatcher) = watchdog(Duration::from_secs(60));
        let builder = stuck_builder(1);
        contexts.register(1, builder.clone());

        let guard = builder.lock();
        let later = clock::now_nanos() + Duration::from_secs(120).as_nanos() as u64;
        let report = watchdog.sweep_at(later);
        assert_eq!(report.busy, 1);
        assert_eq!(report.unwound, 0);
        drop(guard);

        assert_eq!(watchdog.sweep_at(later).unwound, 1);
    }

    #[test]
    fn test_background_thread_stops() {
        let (watchdog, contexts, _dispatcher) = watchdog(Duration::from_millis(1));
        let builder = stuck_builder(1);
        contexts.register(1, builder.clone());

        let handle = watchdog.start().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while builder.lock().is_building() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!builder.lock().is_building());
        assert!(handle.sweeps() >= 1);
        handle.stop();
    }
}
