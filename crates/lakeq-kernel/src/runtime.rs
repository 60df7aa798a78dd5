//! Runtime: analyze → optimize → parallelize → build → run.
//!
//! The compile stages are synchronous and only call the data adaptor.
//! Building must finish before anything runs; running pulls each output
//! leaf to the end and reports what came out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use lakeq_core::ast;
use lakeq_core::batch::Context;
use lakeq_core::config::CompilerConfig;
use lakeq_core::dag::{Op, Seq};
use lakeq_core::error::{Error, Result};
use lakeq_core::hash::hash_serde;
use lakeq_core::lake::{CommitId, DataAdaptor, Head, ObjectId, PoolId};
use lakeq_core::value::Value;

use lakeq_compiler::Optimizer;
use lakeq_operators::{drain, Parent};

use crate::builder::{Builder, Program, MAIN};

/// Outcome of running a query.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// BLAKE3 of the DAG that ran.
    pub plan_hash: String,
    pub started_ms: u64,
    pub finished_ms: u64,
    /// Row count per output.
    pub rows: BTreeMap<String, usize>,
    #[serde(skip)]
    pub outputs: BTreeMap<String, Vec<Value>>,
}

impl RunReport {
    /// Rows of one output; empty if the query has no such output.
    pub fn output(&self, name: &str) -> &[Value] {
        self.outputs.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Outcome of a deletion.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub pool: PoolId,
    pub branch: String,
    /// `None` when no row matched and nothing was committed.
    pub commit: Option<CommitId>,
    pub objects: Vec<ObjectId>,
    pub kept: usize,
}

pub struct Runtime {
    adaptor: Arc<dyn DataAdaptor>,
    config: CompilerConfig,
    head: Option<Head>,
}

impl Runtime {
    pub fn new(adaptor: Arc<dyn DataAdaptor>, config: CompilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            adaptor,
            config,
            head: None,
        })
    }

    /// Default pool and branch for `HEAD` references.
    pub fn with_head(mut self, head: Head) -> Self {
        self.head = Some(head);
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn analyze(&self, query: &ast::Seq) -> Result<Seq> {
        lakeq_compiler::analyze(query, self.adaptor.as_ref(), self.head.as_ref())
    }

    pub fn optimize(&self, seq: Seq) -> Result<Seq> {
        if !self.config.optimize {
            return Ok(seq);
        }
        Optimizer::new(self.adaptor.as_ref(), &self.config).optimize(seq)
    }

    /// Replicate the head scan `parallelism` ways when configured.
    pub fn parallelize(&self, mut seq: Seq) -> Result<Seq> {
        let n = self.config.parallelism;
        if n <= 1 || !self.config.optimize {
            return Ok(seq);
        }
        let rewritten = Optimizer::new(self.adaptor.as_ref(), &self.config).parallelize(&mut seq, n)?;
        tracing::debug!(replicas = n, rewritten, "parallelize");
        Ok(seq)
    }

    /// The full compile pipeline.
    pub fn compile(&self, query: &ast::Seq) -> Result<Seq> {
        let seq = self.analyze(query)?;
        let seq = self.optimize(seq)?;
        self.parallelize(seq)
    }

    /// Build a compiled DAG. `readers` feed the query's default scan.
    pub fn build(&self, seq: &Seq, readers: Vec<Parent>) -> Result<Program> {
        let mut builder = Builder::new(self.adaptor.clone(), self.config.clone(), Context::new())
            .with_readers(readers);
        builder.build(seq)
    }

    /// Compile, build, and run a query to the end.
    pub fn run(&self, query: &ast::Seq, readers: Vec<Parent>) -> Result<RunReport> {
        let started_ms = now_millis();
        let seq = self.compile(query)?;
        let plan_hash = hash_serde(&seq)?.to_hex();
        let mut program = self.build(&seq, readers)?;
        let outputs = program.run()?;
        let rows = outputs.iter().map(|(k, v)| (k.clone(), v.len())).collect();
        tracing::debug!(plan = %plan_hash, "query finished");
        Ok(RunReport {
            plan_hash,
            started_ms,
            finished_ms: now_millis(),
            rows,
            outputs,
        })
    }

    /// Lower a `delete where` query into its lister/deleter form.
    pub fn compile_delete(&self, query: &ast::Seq) -> Result<Seq> {
        let seq = self.analyze(query)?;
        Optimizer::new(self.adaptor.as_ref(), &self.config)
            .optimize_deleter(seq, self.config.parallelism)
    }

    /// Run a `delete where` query and commit the result: every object with
    /// a matching row is replaced by its surviving rows.
    pub fn delete(&self, query: &ast::Seq) -> Result<DeleteReport> {
        let analyzed = self.analyze(query)?;
        let (pool, pool_name) = match analyzed.first() {
            Some(Op::DeleteScan {
                pool, pool_name, ..
            }) => (*pool, pool_name.clone()),
            _ => return Err(Error::InvalidDeleteWhere),
        };
        let branch = self.delete_branch(query);
        let seq = Optimizer::new(self.adaptor.as_ref(), &self.config)
            .optimize_deleter(analyzed, self.config.parallelism)?;
        let mut program = self.build(&seq, Vec::new())?;
        let mut main = program
            .take(MAIN)
            .ok_or_else(|| Error::internal("deletion program has no main output"))?;
        let keep = drain(main.as_mut())?;
        let objects = program.deletes();
        let kept = keep.len();
        let commit = if objects.is_empty() {
            None
        } else {
            Some(
                self.adaptor
                    .delete(pool, &branch, &objects, keep)
                    .map_err(|e| e.with_context(format!("delete from {pool_name}@{branch}")))?,
            )
        };
        tracing::debug!(
            pool = %pool_name,
            branch = %branch,
            objects = objects.len(),
            kept,
            "delete finished"
        );
        Ok(DeleteReport {
            pool,
            branch,
            commit,
            objects,
            kept,
        })
    }

    /// Branch a deletion commits to; the analyzer reads from the same one.
    fn delete_branch(&self, query: &ast::Seq) -> String {
        match query.first() {
            Some(ast::Op::Delete {
                branch: Some(b), ..
            }) => b.clone(),
            _ => "main".to_string(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
