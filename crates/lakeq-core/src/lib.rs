#![forbid(unsafe_code)]
//! lakeq-core: shared kernel for the lakeq query compiler.
//!
//! This crate contains only *pure* types, small helpers, and interfaces
//! (traits) that other crates implement. There is **no I/O** here.
//!
//! Crates that use this:
//! - lakeq-compiler: lowers `ast` into `dag` and rewrites it.
//! - lakeq-operators: implements `Puller` for every execution primitive.
//! - lakeq-io: implements `DataAdaptor` for an in-memory lake.
//! - lakeq-kernel: builds pullers from an optimized `dag::Seq`.

pub mod ast;
pub mod batch;
pub mod config;
pub mod dag;
pub mod error;
pub mod eval;
pub mod expr;
pub mod fmt;
pub mod functions;
pub mod hash;
pub mod lake;
pub mod prelude;
pub mod sortkey;
pub mod value;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
