//! Join strategy selection.
//!
//! A join whose condition contains an equality between an expression over
//! the left input and one over the right input becomes a hash join on
//! those two expressions. So does a cross join fed by a two-way fork and
//! followed by a filter holding such an equality; the equality is then
//! removed from the filter.

use lakeq_core::dag::{walk_seqs_mut, JoinStyle, Op, Seq};
use lakeq_core::expr::{BinOp, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

struct Aliases<'a> {
    left: Option<&'a str>,
    right: &'a str,
}

impl Aliases<'_> {
    fn side_of(&self, path: &[String]) -> Option<Side> {
        let head = path.first()?;
        if head == self.right {
            return Some(Side::Right);
        }
        match self.left {
            Some(left) if head == left => Some(Side::Left),
            Some(_) => None,
            // Without a left alias the left record is spread at top level.
            None => Some(Side::Left),
        }
    }

    /// The side every field reference of `e` belongs to, if there is
    /// exactly one and `e` references at least one field.
    fn side_of_expr(&self, e: &Expr) -> Option<Side> {
        let mut paths = Vec::new();
        if !e.input_paths(&mut paths) || paths.is_empty() {
            return None;
        }
        let first = self.side_of(&paths[0])?;
        paths[1..]
            .iter()
            .all(|p| self.side_of(p) == Some(first))
            .then_some(first)
    }

    /// Rewrite `e` to evaluate against its own side's input row.
    fn strip(&self, e: Expr, side: Side) -> Expr {
        let strip_alias = match side {
            Side::Right => true,
            Side::Left => self.left.is_some(),
        };
        if !strip_alias {
            return e;
        }
        e.map_paths(&mut |path| Expr::this(path[1..].to_vec()))
    }

    /// Split `cond` into (left key, right key) for the first cross-side
    /// equality conjunct, plus the remaining conjuncts.
    fn equi_keys(&self, cond: Expr) -> Option<(Expr, Expr, Vec<Expr>)> {
        let mut conjuncts = cond.split_conjunction();
        let pos = conjuncts.iter().position(|c| self.equality_sides(c).is_some())?;
        let eq = conjuncts.remove(pos);
        let sides = self.equality_sides(&eq)?;
        let Expr::Binary { lhs, rhs, .. } = eq else {
            return None;
        };
        let (left, right) = match sides {
            (Side::Left, Side::Right) => (*lhs, *rhs),
            _ => (*rhs, *lhs),
        };
        Some((
            self.strip(left, Side::Left),
            self.strip(right, Side::Right),
            conjuncts,
        ))
    }

    fn equality_sides(&self, e: &Expr) -> Option<(Side, Side)> {
        let Expr::Binary {
            op: BinOp::Eq,
            lhs,
            rhs,
        } = e
        else {
            return None;
        };
        let l = self.side_of_expr(lhs)?;
        let r = self.side_of_expr(rhs)?;
        (l != r).then_some((l, r))
    }
}

pub(crate) fn rewrite_joins(seq: &mut Seq) {
    let _ = walk_seqs_mut::<()>(seq, &mut |s| {
        let mut i = 0;
        while i < s.len() {
            if !rewrite_equi_join(s, i) {
                rewrite_cross_join(s, i);
            }
            i += 1;
        }
        Ok(())
    });
}

/// `join on l.a == r.b [and rest]` becomes a hash join; a residual
/// condition is only allowed for inner joins, where it becomes a filter.
fn rewrite_equi_join(s: &mut Seq, i: usize) -> bool {
    let Op::Join {
        style,
        left_alias,
        right_alias,
        cond: Some(cond),
    } = &s[i]
    else {
        return false;
    };
    if *style == JoinStyle::Cross {
        return false;
    }
    let aliases = Aliases {
        left: left_alias.as_deref(),
        right: right_alias,
    };
    let Some((left_key, right_key, rest)) = aliases.equi_keys(cond.clone()) else {
        return false;
    };
    if !rest.is_empty() && *style != JoinStyle::Inner {
        return false;
    }
    let hash = Op::HashJoin {
        style: *style,
        left_alias: left_alias.clone(),
        right_alias: right_alias.clone(),
        left_key,
        right_key,
        left_sorted: false,
        right_sorted: false,
    };
    tracing::debug!(style = style.as_str(), residual = rest.len(), "rewrote join as hash join");
    s[i] = hash;
    if let Some(expr) = Expr::conjoin(rest) {
        s.insert(i + 1, Op::Filter { expr });
    }
    true
}

/// `fork (l; r) | join cross | where l.a == r.b and rest` becomes
/// `fork (l; r) | hash join | where rest`.
fn rewrite_cross_join(s: &mut Seq, i: usize) -> bool {
    if i == 0 || i + 1 >= s.len() {
        return false;
    }
    let (Op::Fork { paths }, Op::Join {
        style: JoinStyle::Cross,
        left_alias,
        right_alias,
        cond: None,
    }, Op::Filter { expr }) = (&s[i - 1], &s[i], &s[i + 1])
    else {
        return false;
    };
    if paths.len() != 2 {
        return false;
    }
    let aliases = Aliases {
        left: left_alias.as_deref(),
        right: right_alias,
    };
    let Some((left_key, right_key, rest)) = aliases.equi_keys(expr.clone()) else {
        return false;
    };
    let hash = Op::HashJoin {
        style: JoinStyle::Inner,
        left_alias: left_alias.clone(),
        right_alias: right_alias.clone(),
        left_key,
        right_key,
        left_sorted: false,
        right_sorted: false,
    };
    tracing::debug!(residual = rest.len(), "rewrote cross join and filter as hash join");
    s[i] = hash;
    match Expr::conjoin(rest) {
        Some(expr) => s[i + 1] = Op::Filter { expr },
        None => {
            s.remove(i + 1);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::value::Value;

    fn eq(l: &[&str], r: &[&str]) -> Expr {
        Expr::binary(BinOp::Eq, Expr::path(l), Expr::path(r))
    }

    fn fork() -> Op {
        Op::Fork {
            paths: vec![Seq::pass(), Seq::pass()],
        }
    }

    #[test]
    fn equality_condition_becomes_hash_join_keys() {
        let mut seq = Seq::new(vec![
            fork(),
            Op::Join {
                style: JoinStyle::Left,
                left_alias: Some("l".into()),
                right_alias: "r".into(),
                cond: Some(eq(&["r", "id"], &["l", "user", "id"])),
            },
        ]);
        rewrite_joins(&mut seq);
        assert_eq!(
            seq[1],
            Op::HashJoin {
                style: JoinStyle::Left,
                left_alias: Some("l".into()),
                right_alias: "r".into(),
                left_key: Expr::path(&["user", "id"]),
                right_key: Expr::path(&["id"]),
                left_sorted: false,
                right_sorted: false,
            }
        );
    }

    #[test]
    fn residual_only_allowed_for_inner_joins() {
        let residual = Expr::binary(
            BinOp::Gt,
            Expr::path(&["r", "n"]),
            Expr::lit(Value::Int(1)),
        );
        let cond = Expr::and(eq(&["l", "a"], &["r", "b"]), residual.clone());
        let join = |style| Op::Join {
            style,
            left_alias: Some("l".into()),
            right_alias: "r".into(),
            cond: Some(cond.clone()),
        };

        let mut outer = Seq::new(vec![fork(), join(JoinStyle::Anti)]);
        rewrite_joins(&mut outer);
        assert!(matches!(outer[1], Op::Join { .. }));

        let mut inner = Seq::new(vec![fork(), join(JoinStyle::Inner)]);
        rewrite_joins(&mut inner);
        assert!(matches!(inner[1], Op::HashJoin { .. }));
        assert_eq!(inner[2], Op::Filter { expr: residual });
    }

    #[test]
    fn cross_join_with_equality_filter() {
        let mut seq = Seq::new(vec![
            fork(),
            Op::Join {
                style: JoinStyle::Cross,
                left_alias: Some("a".into()),
                right_alias: "b".into(),
                cond: None,
            },
            Op::Filter {
                expr: eq(&["a", "k"], &["b", "k"]),
            },
            Op::Fuse,
        ]);
        rewrite_joins(&mut seq);
        assert_eq!(seq.len(), 3);
        assert!(matches!(
            &seq[1],
            Op::HashJoin { style: JoinStyle::Inner, left_key, right_key, .. }
                if *left_key == Expr::field("k") && *right_key == Expr::field("k")
        ));
        assert_eq!(seq[2], Op::Fuse);
    }

    #[test]
    fn spread_left_side_keeps_its_paths() {
        let mut seq = Seq::new(vec![
            fork(),
            Op::Join {
                style: JoinStyle::Inner,
                left_alias: None,
                right_alias: "c".into(),
                cond: Some(eq(&["a", "id"], &["c", "id"])),
            },
        ]);
        rewrite_joins(&mut seq);
        let Op::HashJoin {
            left_key,
            right_key,
            ..
        } = &seq[1]
        else {
            panic!("expected hash join, got {:?}", seq[1]);
        };
        assert_eq!(*left_key, Expr::path(&["a", "id"]));
        assert_eq!(*right_key, Expr::field("id"));
    }
}
