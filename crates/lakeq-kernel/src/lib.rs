#![forbid(unsafe_code)]
//! lakeq-kernel: from optimized DAG to running program.
//!
//! - `builder`: lowers a `dag::Seq` into a graph of pullers, one
//!   constructor per operator, with named output leaves.
//! - `registry`: shares one scheduler between every reference to the same
//!   pool and commit in a built graph.
//! - `runtime`: drives analyze → optimize → parallelize → build → run.

pub mod builder;
pub mod registry;
pub mod runtime;

pub use builder::{Builder, Program};
pub use runtime::{DeleteReport, RunReport, Runtime};
