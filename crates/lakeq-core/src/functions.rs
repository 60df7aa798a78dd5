//! Built-in function names and scalar implementations.
//!
//! Aggregate state machines live with the summarize operator; this module
//! only knows their names so the analyzer can classify calls.

use chrono::Utc;

use crate::value::Value;

/// Aggregate functions usable in `summarize` and as bare operators.
pub const AGG_FUNCS: &[&str] = &[
    "count", "sum", "avg", "min", "max", "collect", "any", "first", "last",
];

/// Scalar functions and their arity range.
const SCALAR_FUNCS: &[(&str, usize, usize)] = &[
    ("now", 0, 0),
    ("len", 1, 1),
    ("lower", 1, 1),
    ("upper", 1, 1),
    ("bucket", 2, 2),
    ("abs", 1, 1),
    ("has", 1, usize::MAX),
    ("missing", 1, 1),
    ("is_error", 1, 1),
    ("starts_with", 2, 2),
    ("ends_with", 2, 2),
    ("typeof", 1, 1),
    ("coalesce", 1, usize::MAX),
];

/// Scalar functions that always return a boolean.
const BOOLEAN_FUNCS: &[&str] = &["has", "missing", "is_error", "starts_with", "ends_with"];

pub fn is_agg(name: &str) -> bool {
    AGG_FUNCS.contains(&name)
}

pub fn is_scalar(name: &str) -> bool {
    SCALAR_FUNCS.iter().any(|(n, _, _)| *n == name)
}

pub fn is_boolean(name: &str) -> bool {
    BOOLEAN_FUNCS.contains(&name)
}

/// Check the argument count of a scalar call; `Err` carries the message.
pub fn check_arity(name: &str, nargs: usize) -> Result<(), String> {
    let Some((_, lo, hi)) = SCALAR_FUNCS.iter().find(|(n, _, _)| *n == name) else {
        return Err(format!("function {name}: not found"));
    };
    if nargs < *lo || nargs > *hi {
        return Err(format!(
            "function {name}: wrong number of arguments ({nargs})"
        ));
    }
    Ok(())
}

/// Functions whose result order follows their first argument's order.
/// Used by sort-key propagation (`bucket(ts, 1h)` keeps `ts` order).
pub fn preserves_order(name: &str) -> bool {
    name == "bucket"
}

/// Invoke a scalar function. `None` means the name is unknown.
pub fn call_scalar(name: &str, args: &[Value]) -> Option<Value> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Missing);
    let v = match name {
        "now" => Value::Time(Utc::now().timestamp_nanos_opt().unwrap_or(0)),
        "len" => match arg(0) {
            Value::Str(s) => Value::Int(s.chars().count() as i64),
            Value::Bytes(b) => Value::Int(b.len() as i64),
            Value::Array(a) => Value::Int(a.len() as i64),
            Value::Record(r) => Value::Int(r.len() as i64),
            v if v.is_null() => Value::Int(0),
            v => Value::error(format!("len: bad type {}", v.type_name())),
        },
        "lower" => map_str(arg(0), |s| s.to_lowercase()),
        "upper" => map_str(arg(0), |s| s.to_uppercase()),
        "bucket" => bucket(&arg(0), &arg(1)),
        "abs" => match arg(0) {
            Value::Int(i) => Value::Int(i.wrapping_abs()),
            Value::Float(f) => Value::Float(f.abs()),
            Value::Duration(d) => Value::Duration(d.wrapping_abs()),
            v if v.is_null() => Value::Null,
            v => Value::error(format!("abs: bad type {}", v.type_name())),
        },
        "has" => Value::Bool(args.iter().all(|a| !a.is_missing())),
        "missing" => Value::Bool(arg(0).is_missing()),
        "is_error" => Value::Bool(arg(0).is_error()),
        "starts_with" => match (arg(0), arg(1)) {
            (Value::Str(s), Value::Str(p)) => Value::Bool(s.starts_with(&p)),
            _ => Value::Bool(false),
        },
        "ends_with" => match (arg(0), arg(1)) {
            (Value::Str(s), Value::Str(p)) => Value::Bool(s.ends_with(&p)),
            _ => Value::Bool(false),
        },
        "typeof" => Value::Str(arg(0).type_name().to_string()),
        "coalesce" => args
            .iter()
            .find(|a| !a.is_null() && !a.is_error())
            .cloned()
            .unwrap_or(Value::Null),
        _ => return None,
    };
    Some(v)
}

fn map_str(v: Value, f: impl Fn(&str) -> String) -> Value {
    match v {
        Value::Str(s) => Value::Str(f(&s)),
        v if v.is_null() => Value::Null,
        v => Value::error(format!("expected string, got {}", v.type_name())),
    }
}

/// Truncate a time (or number) down to a multiple of a bin width.
fn bucket(v: &Value, width: &Value) -> Value {
    match (v, width) {
        (Value::Time(t), Value::Duration(d)) if *d > 0 => Value::Time(t.div_euclid(*d) * d),
        (Value::Int(i), Value::Int(w)) if *w > 0 => Value::Int(i.div_euclid(*w) * w),
        (Value::Float(x), Value::Float(w)) if *w > 0.0 => Value::Float((x / w).floor() * w),
        (v, _) if v.is_null() => Value::Null,
        _ => Value::error("bucket: bad arguments"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_truncates_times() {
        let hour = 3_600 * 1_000_000_000;
        let v = call_scalar("bucket", &[Value::Time(hour + 5), Value::Duration(hour)]);
        assert_eq!(v, Some(Value::Time(hour)));
        assert_eq!(call_scalar("nope", &[]), None);
    }

    #[test]
    fn arity_is_checked() {
        assert!(check_arity("len", 1).is_ok());
        assert!(check_arity("len", 2).is_err());
        assert!(check_arity("frobnicate", 0).is_err());
    }
}
