//! Structural cleanup passes.

use lakeq_core::dag::{walk_seqs_mut, Op, Seq};

/// Splice the body of every declaration scope into its parent sequence.
/// Names were resolved during analysis, so a scope is only a block.
pub(crate) fn flatten_scopes(seq: &mut Seq) {
    let _ = walk_seqs_mut::<()>(seq, &mut |s| {
        if !s.iter().any(|op| matches!(op, Op::Scope { .. })) {
            return Ok(());
        }
        let ops = std::mem::take(&mut s.0);
        for op in ops {
            match op {
                Op::Scope { body } => s.extend(body),
                other => s.push(other),
            }
        }
        Ok(())
    });
}

/// Drop pass-through operators. A sequence that would become empty keeps a
/// single pass so every structural position still holds a sequence.
pub(crate) fn remove_passes(seq: &mut Seq) {
    let _ = walk_seqs_mut::<()>(seq, &mut |s| {
        s.retain(|op| !matches!(op, Op::Pass));
        if s.is_empty() {
            s.push(Op::Pass);
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::expr::Expr;

    #[test]
    fn passes_removed_but_paths_never_empty() {
        let mut seq = Seq::new(vec![
            Op::Pass,
            Op::Fork {
                paths: vec![Seq::pass(), Seq::new(vec![Op::Pass, Op::Fuse, Op::Pass])],
            },
            Op::Combine,
        ]);
        remove_passes(&mut seq);
        let expected = Seq::new(vec![
            Op::Fork {
                paths: vec![Seq::pass(), Seq::new(vec![Op::Fuse])],
            },
            Op::Combine,
        ]);
        assert_eq!(seq, expected);

        let again = seq.clone();
        remove_passes(&mut seq);
        assert_eq!(seq, again);
    }

    #[test]
    fn scopes_are_spliced_in_place() {
        let mut seq = Seq::new(vec![
            Op::Scope {
                body: Seq::new(vec![
                    Op::Filter {
                        expr: Expr::field("a"),
                    },
                    Op::Scope {
                        body: Seq::new(vec![Op::Fuse]),
                    },
                ]),
            },
            Op::Combine,
        ]);
        flatten_scopes(&mut seq);
        assert_eq!(
            seq,
            Seq::new(vec![
                Op::Filter {
                    expr: Expr::field("a"),
                },
                Op::Fuse,
                Op::Combine,
            ])
        );
    }
}
