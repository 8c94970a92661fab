//! Test infrastructure for the translation engine
//!
//! Provides:
//! - Recording writers that log every invocation into a shared trace
//! - Configurable failure and rejection of individual steps
//! - Fixed readers backed by in-memory node values
//! - Counting dump executors for cache behavior tests
//! - Path and diff helpers

pub mod fixtures;
mod readers;
mod recording;

pub use fixtures::*;
pub use readers::{CountingDumpExecutor, FailingReader, FixedListReader, FixedReader};
pub use recording::{Invocation, Op, RecordingWriter, Trace};
