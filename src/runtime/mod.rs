//! Reference-counted heap runtime.
//!
//! # No-Cycle Invariant
//! Blocks are reclaimed by reference counting alone; there is no tracing
//! collector behind it. A cycle of owning fields is never freed.
//!
//! The invariant is:
//! - Heap values form DAGs, not cyclic graphs.
//! - Mutation through a [`value::Ref`] must not install a value that reaches
//!   back to the cell.
//! - A count that overflows becomes sticky and the block is leaked rather
//!   than freed early.
//!
//! # Threads
//! Each thread works in its own [`context::Context`]. A block crosses to
//! another thread only as a [`heap::SharedBlock`], which marks it and its
//! reachable graph thread-shared so their counts are updated atomically.

pub mod config;
pub mod context;
pub mod error;
pub mod heap;
pub mod value;

pub use config::{ConfigError, RuntimeConfig};
pub use context::{Context, YIELD_CONT_MAX, YieldRequest, Yielding, with_context};
pub use error::{FatalError, fatal_error, unsupported_external, warning_message};
