//! Scan parallelization: plan shape, result equivalence, and scheduler
//! sharing between replicas.

mod test_lake;

use std::sync::Arc;

use lakeq_core::prelude::{CompilerConfig, Context, DataAdaptor, Expr, Op, Order, Seq};
use lakeq_kernel::Builder;
use test_lake::*;

#[test]
fn filtered_scan_is_scattered_and_merged_in_key_order() {
    let lake = lake();
    let doc = from_pool("logs", &where_ts(">", 2));
    let seq = runtime(&lake, 3).compile(&query(&doc)).unwrap();
    assert_eq!(kinds(&seq), vec!["scatter", "merge"]);
    let Op::Scatter { paths } = &seq[0] else {
        panic!("expected scatter");
    };
    assert_eq!(paths.len(), 3);
    for p in paths {
        assert_eq!(kinds(p), vec!["lister", "slicer", "seqscan"]);
    }
    assert_eq!(
        seq[1],
        Op::Merge {
            expr: Expr::field("ts"),
            order: Order::Asc
        }
    );
}

#[test]
fn unordered_consumers_get_a_combine() {
    let lake = lake();
    let doc = from_pool("logs", &format!("{}{}", where_ts(">", 2), COUNT));
    let seq = runtime(&lake, 2).compile(&query(&doc)).unwrap();
    assert_eq!(kinds(&seq), vec!["scatter", "combine", "summarize"]);
}

fn put(lhs: &str, rhs: &str) -> String {
    format!("- kind: Put\n  args: [ {{ lhs: {{ kind: Id, name: {lhs} }}, rhs: {rhs} }} ]\n")
}

#[test]
fn merge_key_must_survive_the_replicated_ops() {
    let lake = lake();
    let ts_merge = Op::Merge {
        expr: Expr::field("ts"),
        order: Order::Asc,
    };

    // Copying the key keeps the order, so the put runs in every replica.
    let doc = from_pool("logs", &format!("{}{}", where_ts(">", 2), put("n", "{ kind: Id, name: ts }")));
    let seq = runtime(&lake, 3).compile(&query(&doc)).unwrap();
    assert_eq!(kinds(&seq), vec!["scatter", "merge"]);
    let Op::Scatter { paths } = &seq[0] else {
        panic!("expected scatter");
    };
    assert_eq!(kinds(&paths[0]), vec!["lister", "slicer", "seqscan", "put"]);
    assert_eq!(seq[1], ts_merge);

    // Overwriting the key would leave the merge nothing to order on, so
    // the put stays after it.
    let zero = "{ kind: Primitive, type: int64, text: \"0\" }";
    let doc = from_pool("logs", &format!("{}{}", where_ts(">", 2), put("ts", zero)));
    let seq = runtime(&lake, 3).compile(&query(&doc)).unwrap();
    assert_eq!(kinds(&seq), vec!["scatter", "merge", "put"]);
    let Op::Scatter { paths } = &seq[0] else {
        panic!("expected scatter");
    };
    assert_eq!(kinds(&paths[0]), vec!["lister", "slicer", "seqscan"]);
    assert_eq!(seq[1], ts_merge);
}

#[test]
fn bare_scan_is_left_alone() {
    let lake = lake();
    let seq = runtime(&lake, 4).compile(&query(&from_pool("logs", ""))).unwrap();
    assert_eq!(kinds(&seq), vec!["lister", "slicer", "seqscan"]);
}

#[test]
fn parallel_runs_match_serial_runs() {
    let lake = lake();
    let queries = [
        from_pool("logs", &where_ts(">", 2)),
        from_pool("logs", &format!("{}{}", where_ts(">=", 4), COUNT)),
        from_pool(
            "logs",
            &format!(
                "{}- kind: Put\n  args: [ {{ lhs: {{ kind: Id, name: n }}, rhs: {{ kind: Id, name: ts }} }} ]\n",
                where_ts("<", 8)
            ),
        ),
    ];
    for doc in &queries {
        let q = query(doc);
        let serial = runtime(&lake, 1).run(&q, Vec::new()).unwrap();
        for n in [2, 3, 5] {
            let parallel = runtime(&lake, n).run(&q, Vec::new()).unwrap();
            assert_eq!(
                sorted(parallel.output("main").to_vec()),
                sorted(serial.output("main").to_vec()),
                "parallelism {n} for {doc}"
            );
        }
    }
}

#[test]
fn merged_parallel_scan_keeps_pool_order() {
    let lake = lake();
    let doc = from_pool("logs", &where_ts(">", 0));
    let report = runtime(&lake, 3).run(&query(&doc), Vec::new()).unwrap();
    assert_eq!(
        column(report.output("main"), "ts"),
        ints(&[1, 2, 3, 4, 5, 6, 7, 8, 9])
    );
}

fn build(lake: &Arc<lakeq_io::MemoryLake>, seq: &Seq) -> (Builder, lakeq_kernel::Program) {
    let adaptor: Arc<dyn DataAdaptor> = lake.clone();
    let config = CompilerConfig {
        parallel_workers: false,
        ..config(1)
    };
    let mut builder = Builder::new(adaptor, config, Context::new());
    let program = builder.build(seq).unwrap();
    (builder, program)
}

#[test]
fn scatter_replicas_share_one_scheduler() {
    let lake = lake();
    let seq = runtime(&lake, 3)
        .compile(&query(&from_pool("logs", &where_ts(">", 2))))
        .unwrap();
    let (builder, mut program) = build(&lake, &seq);
    let schedulers = builder.schedulers();
    assert_eq!(schedulers.len(), 1);
    // The registry, three listers, and this handle.
    assert_eq!(Arc::strong_count(&schedulers[0]), 5);

    let rows = program.run().unwrap().remove("main").unwrap();
    assert_eq!(column(&rows, "ts"), ints(&[3, 4, 5, 6, 7, 8, 9]));
}

#[test]
fn independent_scans_share_a_scheduler_and_each_read_everything() {
    let lake = lake();
    let doc = r#"
- kind: From
  trunks:
    - source: { kind: Pool, name: { kind: Text, name: logs } }
    - source: { kind: Pool, name: { kind: Text, name: logs } }
"#;
    let seq = runtime(&lake, 1).compile(&query(doc)).unwrap();
    assert_eq!(kinds(&seq), vec!["fork"]);
    let (builder, mut program) = build(&lake, &seq);
    let schedulers = builder.schedulers();
    assert_eq!(schedulers.len(), 1);
    assert_eq!(Arc::strong_count(&schedulers[0]), 4);

    let rows = program.run().unwrap().remove("main").unwrap();
    let ts = sorted(column(&rows, "ts"));
    let expected: Vec<i64> = (1..=9).flat_map(|t| [t, t]).collect();
    assert_eq!(ts, ints(&expected));
}

#[test]
fn distinct_commits_get_distinct_schedulers() {
    let lake = lake();
    let doc = r#"
- kind: From
  trunks:
    - source: { kind: Pool, name: { kind: Text, name: logs } }
    - source: { kind: Pool, name: { kind: Text, name: logs }, commit: dev }
"#;
    let seq = runtime(&lake, 1).compile(&query(doc)).unwrap();
    let (builder, _program) = build(&lake, &seq);
    // Branches created from main point at the same commit.
    assert_eq!(builder.schedulers().len(), 1);

    let pool = lake.lookup_pool("logs").unwrap().unwrap();
    let rows = vec![lakeq_core::value::Value::record([(
        "ts",
        lakeq_core::value::Value::Int(10),
    )])];
    lake.append(pool, "dev", rows, None).unwrap();
    let seq = runtime(&lake, 1).compile(&query(doc)).unwrap();
    let (builder, _program) = build(&lake, &seq);
    assert_eq!(builder.schedulers().len(), 2);
}
