//! Semantic analysis and optimizer behavior observed through the runtime.

mod test_lake;

use lakeq_core::dag::{JoinStyle, Op};
use lakeq_core::error::Error;
use lakeq_core::expr::Expr;
use lakeq_core::lake::Head;
use lakeq_core::value::Value;
use lakeq_operators::{Parent, Values};
use test_lake::*;

#[test]
fn bare_expressions_are_classified() {
    let lake = lake();
    let rt = runtime(&lake, 1);

    let seq = rt.analyze(&query(COUNT)).unwrap();
    assert_eq!(kinds(&seq), vec!["defaultscan", "summarize"]);
    let Op::Summarize { keys, aggs, .. } = &seq[1] else {
        panic!("expected summarize");
    };
    assert!(keys.is_empty());
    assert_eq!(aggs[0].lhs, Expr::field("count"));

    let gt = "- kind: OpExpr\n  expr: { kind: Binary, op: \">\", lhs: { kind: Id, name: a }, rhs: { kind: Primitive, type: int64, text: \"1\" } }\n";
    let seq = rt.analyze(&query(gt)).unwrap();
    assert!(matches!(seq[1], Op::Filter { .. }));

    let add = "- kind: OpExpr\n  expr: { kind: Binary, op: \"+\", lhs: { kind: Id, name: a }, rhs: { kind: Primitive, type: int64, text: \"1\" } }\n";
    let seq = rt.analyze(&query(add)).unwrap();
    assert!(matches!(seq[1], Op::Yield { .. }));
}

#[test]
fn assignment_lists_must_not_mix_aggregations() {
    let lake = lake();
    let rt = runtime(&lake, 1);
    let mixed = r#"
- kind: OpAssignment
  assignments:
    - { lhs: { kind: Id, name: n }, rhs: { kind: Call, name: count } }
    - { lhs: { kind: Id, name: b }, rhs: { kind: Id, name: a } }
"#;
    let err = rt.analyze(&query(mixed)).unwrap_err();
    assert!(matches!(err, Error::Semantic(ref m) if m.contains("mix of aggregations")));
}

#[test]
fn rename_across_parents_is_rejected() {
    let lake = lake();
    let rt = runtime(&lake, 1);
    let doc = r#"
- kind: Rename
  args:
    - lhs: { kind: Binary, op: ".", lhs: { kind: Id, name: a }, rhs: { kind: Id, name: x } }
      rhs: { kind: Binary, op: ".", lhs: { kind: Id, name: b }, rhs: { kind: Id, name: x } }
"#;
    let err = rt.analyze(&query(doc)).unwrap_err();
    match err {
        Error::Semantic(msg) => assert!(msg.contains("cannot rename b.x to a.x"), "{msg}"),
        other => panic!("unexpected error: {other}"),
    }

    let doc = r#"
- kind: Rename
  args:
    - lhs: { kind: Id, name: a }
      rhs: { kind: Binary, op: ".", lhs: { kind: Id, name: b }, rhs: { kind: Id, name: x } }
"#;
    let err = rt.analyze(&query(doc)).unwrap_err();
    assert!(matches!(err, Error::Semantic(ref m) if m.contains("same depth")));
}

#[test]
fn unknown_pool_is_not_found() {
    let lake = lake();
    let rt = runtime(&lake, 1);
    let err = rt.analyze(&query(&from_pool("nope", ""))).unwrap_err();
    assert!(matches!(err, Error::NotFound(ref n) if n == "nope"));
    assert!(!err.suggestions().is_empty());
}

#[test]
fn leading_filter_is_pushed_into_the_pool_scan() {
    let lake = lake();
    let rt = runtime(&lake, 1);
    let doc = from_pool("logs", &format!("{}{}", where_ts(">", 5), COUNT));
    let seq = rt.compile(&query(&doc)).unwrap();
    // Counting does not care about pool order, so no slicer.
    assert_eq!(kinds(&seq), vec!["lister", "seqscan", "summarize"]);
    let Op::Lister { key_pruner, .. } = &seq[0] else {
        panic!("expected lister");
    };
    assert!(key_pruner.is_some());
    let Op::SeqScan { filter, .. } = &seq[1] else {
        panic!("expected seqscan");
    };
    assert!(filter.is_some());

    let seq = rt.compile(&query(&from_pool("logs", &where_ts("<", 3)))).unwrap();
    assert_eq!(kinds(&seq), vec!["lister", "slicer", "seqscan"]);
}

#[test]
fn equality_join_becomes_hash_join() {
    let lake = lake();
    let rt = runtime(&lake, 1);
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
    let analyzed = rt.analyze(&query(&doc)).unwrap();
    assert!(analyzed.iter().any(|op| matches!(op, Op::Join { .. })));

    let seq = rt.optimize(analyzed).unwrap();
    let join = seq
        .iter()
        .find(|op| matches!(op, Op::HashJoin { .. }))
        .expect("hash join");
    let Op::HashJoin {
        style,
        left_key,
        right_key,
        ..
    } = join
    else {
        unreachable!();
    };
    assert_eq!(*style, JoinStyle::Inner);
    assert_eq!(*left_key, Expr::field("id"));
    assert_eq!(*right_key, Expr::field("id"));
    assert!(!seq.iter().any(|op| matches!(op, Op::Join { .. })));
}

#[test]
fn optimizing_twice_changes_nothing() {
    let lake = lake();
    let rt = runtime(&lake, 1);
    let doc = r#"
- kind: Where
  expr: { kind: Binary, op: ">", lhs: { kind: Id, name: a }, rhs: { kind: Primitive, type: int64, text: "1" } }
- kind: Pass
- kind: Put
  args: [ { lhs: { kind: Id, name: b }, rhs: { kind: Id, name: a } } ]
- kind: Pass
- kind: Head
  count: { kind: Primitive, type: int64, text: "3" }
"#;
    let once = rt.compile(&query(doc)).unwrap();
    assert!(!once.iter().any(|op| matches!(op, Op::Pass)));
    let twice = rt.optimize(once.clone()).unwrap();
    assert_eq!(twice, once);
}

#[test]
fn deletion_rewrite_requires_the_delete_shape() {
    let lake = lake();
    let rt = runtime(&lake, 1);
    let err = rt
        .compile_delete(&query(&from_pool("logs", &where_ts(">", 1))))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDeleteWhere));
    let err = rt.delete(&query(&from_pool("logs", ""))).unwrap_err();
    assert!(matches!(err, Error::InvalidDeleteWhere));
}

#[test]
fn deletion_rewrite_lists_into_deleters() {
    let lake = lake();
    let doc = r#"
- kind: Delete
  pool: logs
  expr: { kind: Binary, op: "==", lhs: { kind: Id, name: ts }, rhs: { kind: Primitive, type: int64, text: "5" } }
"#;
    let seq = runtime(&lake, 1).compile_delete(&query(doc)).unwrap();
    assert_eq!(kinds(&seq), vec!["lister", "deleter", "output"]);
    assert!(matches!(&seq[0], Op::Lister { key_pruner: Some(_), .. }));

    let seq = runtime(&lake, 3).compile_delete(&query(doc)).unwrap();
    assert_eq!(kinds(&seq), vec!["scatter", "combine", "output"]);
    let Op::Scatter { paths } = &seq[0] else {
        panic!("expected scatter");
    };
    assert_eq!(paths.len(), 3);
    for p in paths {
        assert_eq!(kinds(p), vec!["lister", "deleter"]);
    }
}

#[test]
fn rename_within_a_record() {
    let lake = lake();
    let doc = r#"
- kind: Rename
  args:
    - lhs: { kind: Binary, op: ".", lhs: { kind: Id, name: a }, rhs: { kind: Id, name: b } }
      rhs: { kind: Binary, op: ".", lhs: { kind: Id, name: a }, rhs: { kind: Id, name: c } }
"#;
    let rt = runtime(&lake, 1);
    let seq = rt.analyze(&query(doc)).unwrap();
    let Op::Rename { args } = &seq[1] else {
        panic!("expected rename");
    };
    assert_eq!(args[0].lhs.as_path(), Some(&["a".to_string(), "b".to_string()][..]));

    let row = Value::record([(
        "a",
        Value::record([("c", Value::Int(1)), ("d", Value::Int(2))]),
    )]);
    let reader: Parent = Box::new(Values::new(vec![row], 2));
    let report = rt.run(&query(doc), vec![reader]).unwrap();
    let out = &report.output("main")[0];
    let at = |p: &[&str]| out.deref_path(&p.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    assert_eq!(at(&["a", "b"]), Value::Int(1));
    assert_eq!(at(&["a", "d"]), Value::Int(2));
    assert_eq!(at(&["a", "c"]), Value::Missing);
}

#[test]
fn head_scan_needs_a_current_pool() {
    let lake = lake();
    let doc = "- kind: From\n  trunks:\n    - source: { kind: Pool, name: { kind: Head } }\n";
    let err = runtime(&lake, 1).analyze(&query(doc)).unwrap_err();
    assert!(matches!(err, Error::Semantic(ref m) if m == "cannot scan from unknown HEAD"));

    let rt = runtime(&lake, 1).with_head(Head::new("users", "main"));
    let report = rt.run(&query(doc), Vec::new()).unwrap();
    assert_eq!(report.rows["main"], 2);
}

fn pattern_scan(kind: &str, pattern: &str) -> String {
    format!(
        "- kind: From\n  trunks:\n    - source: {{ kind: Pool, name: {{ kind: {kind}, pattern: \"{pattern}\" }} }}\n"
    )
}

fn scanned_pools(seq: &[Op]) -> Vec<String> {
    let mut names = Vec::new();
    for op in seq {
        match op {
            Op::PoolScan { pool_name, .. } => names.push(pool_name.clone()),
            Op::Fork { paths } => paths.iter().for_each(|p| names.extend(scanned_pools(p))),
            _ => {}
        }
    }
    names.sort();
    names
}

#[test]
fn pool_patterns_expand_to_every_match() {
    let lake = lake();
    let rt = runtime(&lake, 1);

    let seq = rt.analyze(&query(&pattern_scan("Glob", "*ers"))).unwrap();
    assert_eq!(kinds(&seq), vec!["fork"]);
    assert_eq!(scanned_pools(&seq), vec!["orders", "users"]);
    let report = rt.run(&query(&pattern_scan("Glob", "*ers")), Vec::new()).unwrap();
    assert_eq!(report.rows["main"], 5);

    let seq = rt.analyze(&query(&pattern_scan("Regexp", "^u"))).unwrap();
    assert_eq!(kinds(&seq), vec!["poolscan"]);
    assert_eq!(scanned_pools(&seq), vec!["users"]);

    for (kind, pattern) in [("Glob", "zz*"), ("Regexp", "^zz")] {
        let err = rt.analyze(&query(&pattern_scan(kind, pattern))).unwrap_err();
        assert!(
            matches!(err, Error::NotFound(ref m) if m.contains(pattern)),
            "{err}"
        );
    }
}
