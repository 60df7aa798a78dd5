#![forbid(unsafe_code)]
//! lakeq-operators: the execution primitives of a built query.
//!
//! Every primitive implements [`lakeq_core::batch::Puller`]: a downstream
//! operator asks for the next batch and the primitive pulls from its
//! upstreams as needed. Nothing runs until the last operator of a chain is
//! pulled. Multi-input combines and merges may drain their upstreams from
//! worker threads; every blocking point there also watches the shared
//! [`lakeq_core::batch::Context`] for cancellation.

pub mod aggregate;
pub mod combine;
pub mod fanout;
pub mod filter;
pub mod join;
pub mod limit;
pub mod load;
pub mod over;
pub mod project;
pub mod puller;
pub mod registry;
pub mod scan;
pub mod sort;

pub use puller::{drain, Parent, Values};
