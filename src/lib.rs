//! Trazo - in-process execution tracing with span capture
//!
//! This library captures the execution of a host application as a tree of
//! frames, decides per call site whether to collect at all, picks the most
//! meaningful endpoint for each trace, and hands finished traces to sinks.
//! A background watchdog unwinds executions that never return.

pub mod assembly;
pub mod attributes;
pub mod builder;
pub mod cli;
pub mod clock;
pub mod collection;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod hints;
pub mod operation;
pub mod settings;
pub mod simulate;
pub mod sinks;
pub mod trace;
pub mod tracer;
pub mod watchdog;

pub use error::{Result, TrazoError};
