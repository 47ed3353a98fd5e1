//! Trace dispatch with a bounded replay buffer
//!
//! Finished traces are offered to the registered [`TraceListener`]s in
//! registration order; the first one that accepts wins. Traces nobody accepts
//! (including everything produced before the first sink is registered) wait in
//! a bounded FIFO and are replayed when a listener registers.
//!
//! # Design
//!
//! ```text
//! root exit ─► dispatch_trace ─┬─► listener 1 ─ Ok(true) ─► done
//!                              ├─► listener 2 ─ Ok(false) / Err / panic ─► next
//!                              └─► nobody accepted ─► buffer (cap 50, oldest evicted)
//!
//! register(listener) ─► replay buffer to every listener ─► buffer cleared
//! ```
//!
//! The buffer mutex is held across delivery so a replay never interleaves with
//! a concurrent dispatch. Listeners must not call back into the dispatcher.

use crate::error::Result;
use crate::trace::Trace;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives finished traces
pub trait TraceListener: Send + Sync {
    /// Used in log messages
    fn name(&self) -> &str {
        "trace-listener"
    }

    /// `Ok(true)` takes ownership of delivery; anything else lets the next
    /// listener try
    fn on_trace(&self, trace: &Arc<Trace>) -> Result<bool>;
}

/// Handle returned by [`Dispatcher::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// What happened to one dispatched trace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Buffered,
    /// Buffered, and the oldest buffered trace was dropped to make room
    BufferedWithEviction,
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub delivered: u64,
    pub buffered: u64,
    pub evicted: u64,
    pub replayed: u64,
    pub current_size: usize,
    pub capacity: usize,
}

impl DispatchStats {
    /// Share of dispatched traces lost to eviction (0.0 to 1.0)
    pub fn eviction_rate(&self) -> f64 {
        if self.dispatched == 0 {
            0.0
        } else {
            self.evicted as f64 / self.dispatched as f64
        }
    }
}

type Registered = (ListenerHandle, Arc<dyn TraceListener>);

/// Routes traces to listeners, buffering what nobody accepts
pub struct Dispatcher {
    listeners: RwLock<Vec<Registered>>,
    buffer: Mutex<VecDeque<Arc<Trace>>>,
    capacity: usize,
    next_handle: AtomicU64,
    total_dispatched: AtomicU64,
    total_delivered: AtomicU64,
    total_buffered: AtomicU64,
    total_evicted: AtomicU64,
    total_replayed: AtomicU64,
}

impl Dispatcher {
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Dispatch buffer capacity must be > 0");
        Self {
            listeners: RwLock::new(Vec::new()),
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_handle: AtomicU64::new(0),
            total_dispatched: AtomicU64::new(0),
            total_delivered: AtomicU64::new(0),
            total_buffered: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
            total_replayed: AtomicU64::new(0),
        }
    }

    /// Offer `trace` to listeners, buffering it if nobody accepts
    pub fn dispatch_trace(&self, trace: Trace) -> DispatchOutcome {
        self.dispatch_shared(Arc::new(trace))
    }

    pub fn dispatch_shared(&self, trace: Arc<Trace>) -> DispatchOutcome {
        self.total_dispatched.fetch_add(1, Ordering::Relaxed);
        let mut buffer = self.buffer.lock();

        if self.deliver_first(&trace) {
            self.total_delivered.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Delivered;
        }

        self.total_buffered.fetch_add(1, Ordering::Relaxed);
        buffer.push_back(trace);
        if buffer.len() > self.capacity {
            if let Some(evicted) = buffer.pop_front() {
                self.total_evicted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(trace_id = %evicted.id(), capacity = self.capacity, "dispatch buffer full; oldest trace dropped");
            }
            return DispatchOutcome::BufferedWithEviction;
        }
        DispatchOutcome::Buffered
    }

    /// Add a listener and replay every buffered trace to all listeners
    pub fn register(&self, listener: Arc<dyn TraceListener>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(listener = listener.name(), "registering trace listener");
        self.listeners.write().push((handle, listener));

        let mut buffer = self.buffer.lock();
        if !buffer.is_empty() {
            let listeners = self.listeners();
            let pending: Vec<Arc<Trace>> = buffer.drain(..).collect();
            tracing::debug!(traces = pending.len(), listeners = listeners.len(), "replaying buffered traces");
            for trace in &pending {
                for listener in &listeners {
                    Self::offer(listener.as_ref(), trace);
                }
            }
            self.total_replayed
                .fetch_add(pending.len() as u64, Ordering::Relaxed);
        }
        handle
    }

    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != handle);
        listeners.len() != before
    }

    /// Registered listeners in delivery order
    pub fn listeners(&self) -> Vec<Arc<dyn TraceListener>> {
        self.listeners.read().iter().map(|(_, l)| l.clone()).collect()
    }

    /// Traces waiting for a listener, oldest first
    pub fn buffered(&self) -> Vec<Arc<Trace>> {
        self.buffer.lock().iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.total_dispatched.load(Ordering::Relaxed),
            delivered: self.total_delivered.load(Ordering::Relaxed),
            buffered: self.total_buffered.load(Ordering::Relaxed),
            evicted: self.total_evicted.load(Ordering::Relaxed),
            replayed: self.total_replayed.load(Ordering::Relaxed),
            current_size: self.buffer.lock().len(),
            capacity: self.capacity,
        }
    }

    fn deliver_first(&self, trace: &Arc<Trace>) -> bool {
        let listeners = self.listeners();
        listeners
            .iter()
            .any(|listener| Self::offer(listener.as_ref(), trace))
    }

    /// Failures and panics count as "not accepted"
    fn offer(listener: &dyn TraceListener, trace: &Arc<Trace>) -> bool {
        match catch_unwind(AssertUnwindSafe(|| listener.on_trace(trace))) {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                tracing::warn!(listener = listener.name(), trace_id = %trace.id(), error = %e, "trace listener failed");
                false
            }
            Err(_) => {
                tracing::error!(listener = listener.name(), trace_id = %trace.id(), "trace listener panicked");
                false
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listeners.read().len())
            .field("stats", &self.stats())
            .finish()
    }
}
