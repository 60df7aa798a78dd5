//! Queries run end to end against the in-memory lake.

mod test_lake;

use std::io::Write;
use std::sync::Arc;

use lakeq_compiler::dsl::yaml::parse_ast_file;
use lakeq_core::config::CompilerConfig;
use lakeq_core::dag::Op;
use lakeq_core::lake::DataAdaptor;
use lakeq_core::value::Value;
use lakeq_kernel::Runtime;
use lakeq_operators::{Parent, Values};
use test_lake::*;

fn reader(rows: Vec<Value>) -> Vec<Parent> {
    vec![Box::new(Values::new(rows, 2))]
}

#[test]
fn filtered_count_over_a_pool() {
    let lake = lake();
    let doc = from_pool("logs", &format!("{}{}", where_ts(">", 5), COUNT));
    let report = runtime(&lake, 1).run(&query(&doc), Vec::new()).unwrap();
    assert_eq!(
        report.output("main"),
        &[Value::record([("count", Value::Int(4))])]
    );
    assert_eq!(report.rows["main"], 1);
    assert_eq!(report.plan_hash.len(), 64);
}

#[test]
fn sorted_head_of_a_pool() {
    let lake = lake();
    let rest = r#"- kind: Sort
  exprs: [ { expr: { kind: Id, name: ts }, order: desc } ]
- kind: Head
  count: { kind: Primitive, type: int64, text: "2" }
"#;
    let report = runtime(&lake, 1)
        .run(&query(&from_pool("logs", rest)), Vec::new())
        .unwrap();
    assert_eq!(column(report.output("main"), "ts"), ints(&[9, 8]));
}

#[test]
fn scan_of_a_named_branch() {
    let lake = lake();
    let doc = r#"
- kind: From
  trunks:
    - source: { kind: Pool, name: { kind: Text, name: logs }, commit: dev }
"#;
    let report = runtime(&lake, 1).run(&query(doc), Vec::new()).unwrap();
    assert_eq!(column(report.output("main"), "ts"), ints(&[1, 2, 3, 4, 5, 6, 7, 8, 9]));
}

#[test]
fn hash_join_matches_on_the_key() {
    let lake = lake();
    let doc = from_pool(
        "users",
        r#"- kind: Join
  right:
    - kind: From
      trunks:
        - source: { kind: Pool, name: { kind: Text, name: orders } }
  cond: { kind: Using, fields: [ { kind: Id, name: id } ] }
"#,
    );
    let report = runtime(&lake, 1).run(&query(&doc), Vec::new()).unwrap();
    let rows = report.output("main");
    assert_eq!(rows.len(), 2);
    let names: Vec<Value> = rows
        .iter()
        .map(|r| r.deref_path(&["left".to_string(), "name".to_string()]))
        .collect();
    assert_eq!(names, vec![Value::Str("ann".into()), Value::Str("ann".into())]);
    let amounts: Vec<Value> = rows
        .iter()
        .map(|r| r.deref_path(&["right".to_string(), "amt".to_string()]))
        .collect();
    assert_eq!(sorted(amounts), ints(&[10, 20]));
}

#[test]
fn hash_join_agrees_with_the_nested_loop_join() {
    let lake = lake();
    let doc = query(&from_pool(
        "users",
        r#"- kind: Join
  right:
    - kind: From
      trunks:
        - source: { kind: Pool, name: { kind: Text, name: orders } }
  cond: { kind: Using, fields: [ { kind: Id, name: id } ] }
"#,
    ));
    let optimized = runtime(&lake, 1);
    assert!(optimized
        .compile(&doc)
        .unwrap()
        .iter()
        .any(|op| matches!(op, Op::HashJoin { .. })));

    let adaptor: Arc<dyn DataAdaptor> = lake.clone();
    let literal = Runtime::new(
        adaptor,
        CompilerConfig {
            optimize: false,
            ..config(1)
        },
    )
    .unwrap();
    assert!(literal
        .compile(&doc)
        .unwrap()
        .iter()
        .any(|op| matches!(op, Op::Join { .. })));

    let hashed = optimized.run(&doc, Vec::new()).unwrap();
    let nested = literal.run(&doc, Vec::new()).unwrap();
    assert_eq!(hashed.output("main").len(), 2);
    assert_eq!(
        sorted(hashed.output("main").to_vec()),
        sorted(nested.output("main").to_vec())
    );
}

#[test]
fn named_outputs_are_reported_separately() {
    let lake = lake();
    let doc = from_pool(
        "logs",
        r#"- kind: Fork
  paths:
    - - kind: Head
        count: { kind: Primitive, type: int64, text: "1" }
      - kind: Output
        name: first
    - - kind: Tail
        count: { kind: Primitive, type: int64, text: "1" }
"#,
    );
    let report = runtime(&lake, 1).run(&query(&doc), Vec::new()).unwrap();
    assert_eq!(column(report.output("first"), "ts"), ints(&[1]));
    assert_eq!(column(report.output("main"), "ts"), ints(&[9]));
}

#[test]
fn lateral_over_unnests_and_runs_its_body() {
    let lake = lake();
    let rows = vec![
        Value::record([("xs", Value::Array(ints(&[1, 2, 3])))]),
        Value::record([("xs", Value::Array(ints(&[4])))]),
    ];
    let doc = "- kind: Over\n  exprs: [ { kind: Id, name: xs } ]\n";
    let report = runtime(&lake, 1).run(&query(doc), reader(rows.clone())).unwrap();
    assert_eq!(report.output("main"), ints(&[1, 2, 3, 4]).as_slice());

    let doc = format!(
        "- kind: Over\n  exprs: [ {{ kind: Id, name: xs }} ]\n  body:\n{}",
        COUNT
            .lines()
            .map(|l| format!("    {l}\n"))
            .collect::<String>()
    );
    let report = runtime(&lake, 1).run(&query(&doc), reader(rows)).unwrap();
    assert_eq!(column(report.output("main"), "count"), ints(&[3, 1]));
}

#[test]
fn load_appends_to_the_pool() {
    let lake = lake();
    let doc = "- kind: Load\n  pool: users\n  message: more users\n";
    let rows = vec![Value::record([
        ("id", Value::Int(3)),
        ("name", Value::Str("cy".into())),
    ])];
    let report = runtime(&lake, 1).run(&query(doc), reader(rows)).unwrap();
    let out = report.output("main");
    assert_eq!(out.len(), 1);
    assert!(matches!(&out[0], Value::Str(_)));

    let pool = lake.lookup_pool("users").unwrap().unwrap();
    assert_eq!(lake.rows(pool, "main").unwrap().len(), 3);
}

#[test]
fn metadata_listings() {
    let lake = lake();
    let doc = "- kind: From\n  trunks:\n    - source: { kind: LakeMeta, meta: pools }\n";
    let report = runtime(&lake, 1).run(&query(doc), Vec::new()).unwrap();
    let mut names = column(report.output("main"), "name");
    names.sort_by(|a, b| a.total_cmp(b));
    assert_eq!(
        names,
        vec![
            Value::Str("logs".into()),
            Value::Str("orders".into()),
            Value::Str("users".into())
        ]
    );

    let doc = r#"
- kind: From
  trunks:
    - source: { kind: Pool, name: { kind: Text, name: logs }, meta: objects }
"#;
    let report = runtime(&lake, 1).run(&query(doc), Vec::new()).unwrap();
    assert_eq!(column(report.output("main"), "min"), ints(&[1, 4, 7]));
}

#[test]
fn delete_where_rewrites_only_matching_objects() {
    for parallelism in [1, 3] {
        let lake = lake();
        let doc = r#"
- kind: Delete
  pool: logs
  expr: { kind: Binary, op: "==", lhs: { kind: Id, name: ts }, rhs: { kind: Primitive, type: int64, text: "5" } }
"#;
        let report = runtime(&lake, parallelism).delete(&query(doc)).unwrap();
        assert_eq!(report.objects.len(), 1);
        assert_eq!(report.kept, 2);
        assert_eq!(report.branch, "main");
        assert!(report.commit.is_some());

        let pool = lake.lookup_pool("logs").unwrap().unwrap();
        let left = sorted(column(&lake.rows(pool, "main").unwrap(), "ts"));
        assert_eq!(left, ints(&[1, 2, 3, 4, 6, 7, 8, 9]));
        // Other branches keep their rows.
        assert_eq!(lake.rows(pool, "dev").unwrap().len(), 9);
    }
}

#[test]
fn delete_with_no_match_commits_nothing() {
    let lake = lake();
    let doc = r#"
- kind: Delete
  pool: logs
  expr: { kind: Binary, op: ">", lhs: { kind: Id, name: ts }, rhs: { kind: Primitive, type: int64, text: "100" } }
"#;
    let pool = lake.lookup_pool("logs").unwrap().unwrap();
    let before = lake.resolve_commit(pool, "main").unwrap();
    let report = runtime(&lake, 1).delete(&query(doc)).unwrap();
    assert!(report.commit.is_none());
    assert!(report.objects.is_empty());
    assert_eq!(lake.resolve_commit(pool, "main").unwrap(), before);
}

#[test]
fn file_scan_applies_the_pushed_filter() {
    let lake = lake();
    let mut data = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
    for ts in 1..=4 {
        writeln!(data, "{{\"ts\": {ts}}}").unwrap();
    }
    data.flush().unwrap();
    let path = data.path().display().to_string();
    let doc = format!(
        "- kind: From\n  trunks:\n    - source: {{ kind: File, path: \"{path}\", format: jsonl }}\n{}",
        where_ts(">=", 3)
    );
    let report = runtime(&lake, 1).run(&query(&doc), Vec::new()).unwrap();
    assert_eq!(column(report.output("main"), "ts"), ints(&[3, 4]));
}

#[test]
fn http_sources_are_unimplemented() {
    let lake = lake();
    let doc = "- kind: From\n  trunks:\n    - source: { kind: Http, url: \"http://example.invalid/x\" }\n";
    let err = runtime(&lake, 1).run(&query(doc), Vec::new()).unwrap_err();
    assert!(err.to_string().contains("not implemented"), "{err}");
}

#[test]
fn query_documents_load_from_json_files() {
    let lake = lake();
    let mut doc = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        doc,
        r#"{{"ops": [
            {{"kind": "From", "trunks": [{{"source": {{"kind": "Pool", "name": {{"kind": "Text", "name": "users"}}}}}}]}},
            {{"kind": "Cut", "args": [{{"rhs": {{"kind": "Id", "name": "name"}}}}]}}
        ]}}"#
    )
    .unwrap();
    doc.flush().unwrap();
    let seq = parse_ast_file(doc.path()).unwrap();
    let report = runtime(&lake, 1).run(&seq, Vec::new()).unwrap();
    assert_eq!(
        report.output("main"),
        &[
            Value::record([("name", Value::Str("ann".into()))]),
            Value::record([("name", Value::Str("bob".into()))]),
        ]
    );
}
