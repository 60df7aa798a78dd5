#![forbid(unsafe_code)]
//! lakeq-compiler: surface AST → optimized DAG.
//!
//! - `semantic`: resolves names against scopes and the data adaptor,
//!   classifies ambiguous operators, and lowers SQL into pipe operators.
//! - `optimizer`: rewrites the DAG (filter lifting and merging, projection
//!   merging, parallel lifting, source-path pushdown, join strategy,
//!   demand) and implements the scan parallelization and deletion rewrites.
//! - `dsl`: loads query documents written directly as AST in YAML or JSON.

pub mod dsl {
    pub mod yaml;
}
pub mod optimizer;
pub mod semantic;

pub use optimizer::Optimizer;
pub use semantic::analyze;
