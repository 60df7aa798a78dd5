#![forbid(unsafe_code)]
//! lakeq-io: the storage side of the data adaptor.
//!
//! - `lake`: an in-memory lake of pools, branches, commits, and immutable
//!   data objects, implementing `lakeq_core::lake::DataAdaptor`.
//! - `fixture`: JSON descriptions of a lake, used by the CLI and tests.
//! - `readers`: JSON-lines reader producing batches of values.
//!
//! HTTP sources are not implemented and report so through the adaptor.

pub mod error;
pub mod fixture;
pub mod lake;
pub mod readers;

pub use fixture::LakeFixture;
pub use lake::MemoryLake;
