//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use lakeq_compiler::dsl::yaml::parse_ast_yaml;
use lakeq_core::ast;
use lakeq_core::prelude::{CompilerConfig, DataAdaptor, Op, Seq, Value};
use lakeq_io::{LakeFixture, MemoryLake};
use lakeq_kernel::Runtime;

/// `logs` is keyed on `ts` ascending and holds ts 1..=9 in three objects;
/// `users` and `orders` are unordered.
pub const LAKE: &str = r#"{ "pools": [
  { "name": "logs", "key": "ts", "order": "asc", "branches": ["dev"],
    "objects": [
      [ {"ts": 1, "msg": "a"}, {"ts": 2, "msg": "b"}, {"ts": 3, "msg": "c"} ],
      [ {"ts": 4, "msg": "d"}, {"ts": 5, "msg": "e"}, {"ts": 6, "msg": "f"} ],
      [ {"ts": 7, "msg": "g"}, {"ts": 8, "msg": "h"}, {"ts": 9, "msg": "i"} ]
    ] },
  { "name": "users",
    "objects": [ [ {"id": 1, "name": "ann"}, {"id": 2, "name": "bob"} ] ] },
  { "name": "orders",
    "objects": [ [ {"id": 1, "amt": 10}, {"id": 1, "amt": 20}, {"id": 3, "amt": 5} ] ] }
] }"#;

pub fn lake() -> Arc<MemoryLake> {
    let fx = LakeFixture::parse(LAKE).expect("fixture parses");
    Arc::new(fx.build(2).expect("fixture builds"))
}

pub fn config(parallelism: usize) -> CompilerConfig {
    CompilerConfig {
        parallelism,
        batch_size: 2,
        ..CompilerConfig::default()
    }
}

pub fn runtime(lake: &Arc<MemoryLake>, parallelism: usize) -> Runtime {
    let adaptor: Arc<dyn DataAdaptor> = lake.clone();
    Runtime::new(adaptor, config(parallelism)).expect("valid config")
}

pub fn query(yaml: &str) -> ast::Seq {
    parse_ast_yaml(yaml).expect("query parses")
}

pub fn kinds(seq: &Seq) -> Vec<&'static str> {
    seq.iter().map(Op::kind).collect()
}

pub fn ints(vals: &[i64]) -> Vec<Value> {
    vals.iter().copied().map(Value::Int).collect()
}

/// Values of `field` in each row, in row order.
pub fn column(rows: &[Value], field: &str) -> Vec<Value> {
    rows.iter()
        .map(|r| r.field(field).cloned().unwrap_or(Value::Missing))
        .collect()
}

pub fn sorted(mut rows: Vec<Value>) -> Vec<Value> {
    rows.sort_by(|a, b| a.total_cmp(b));
    rows
}

/// `from <pool>` followed by the given operators, as YAML.
pub fn from_pool(pool: &str, rest: &str) -> String {
    format!(
        "- kind: From\n  trunks:\n    - source: {{ kind: Pool, name: {{ kind: Text, name: {pool} }} }}\n{rest}"
    )
}

/// `where ts <op> <n>` as a YAML operator.
pub fn where_ts(op: &str, n: i64) -> String {
    format!(
        "- kind: Where\n  expr: {{ kind: Binary, op: \"{op}\", lhs: {{ kind: Id, name: ts }}, rhs: {{ kind: Primitive, type: int64, text: \"{n}\" }} }}\n"
    )
}

pub const COUNT: &str = "- kind: OpExpr\n  expr: { kind: Call, name: count }\n";
