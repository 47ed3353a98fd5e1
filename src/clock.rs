//! Monotonic nanosecond clock shared by every frame
//!
//! Frame ranges are measured against a process-wide anchor `Instant`, so
//! values from different execution contexts are comparable and never go
//! backwards. Wall-clock time is only recorded once per trace (its start).

use std::sync::OnceLock;
use std::time::Instant;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the first call in this process
pub fn now_nanos() -> u64 {
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as u64
}
