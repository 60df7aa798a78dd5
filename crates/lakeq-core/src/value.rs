//! Runtime values flowing through a query.
//!
//! Values are self-describing: records carry their field names in order,
//! and two sentinels exist besides `Null`: `Missing` (a field or variable
//! that does not exist, also used as the "not a constant" marker by the
//! constant evaluator) and `Error` (a data error produced by an expression).

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Nanoseconds since the Unix epoch.
    Time(i64),
    /// Nanoseconds.
    Duration(i64),
    Array(Vec<Value>),
    Record(Vec<(String, Value)>),
    Error(String),
}

impl Value {
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Value::Error(msg.into())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Missing)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Missing => "missing",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int64",
            Value::Float(_) => "float64",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Time(_) => "time",
            Value::Duration(_) => "duration",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Error(_) => "error",
        }
    }

    /// Look up a top-level field of a record.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Walk a field path; anything absent along the way yields `Missing`.
    pub fn deref_path(&self, path: &[String]) -> Value {
        let mut cur = self;
        for name in path {
            match cur.field(name) {
                Some(v) => cur = v,
                None => return Value::Missing,
            }
        }
        cur.clone()
    }

    /// Assign `val` at `path`, creating intermediate records as needed.
    /// An empty path replaces the value itself.
    pub fn set_path(&mut self, path: &[String], val: Value) {
        let Some((first, rest)) = path.split_first() else {
            *self = val;
            return;
        };
        if !matches!(self, Value::Record(_)) {
            *self = Value::Record(Vec::new());
        }
        if let Value::Record(fields) = self {
            match fields.iter_mut().find(|(k, _)| k == first) {
                Some((_, child)) => child.set_path(rest, val),
                None => {
                    let mut child = Value::Missing;
                    child.set_path(rest, val);
                    fields.push((first.clone(), child));
                }
            }
        }
    }

    /// Remove the field at `path`. Returns true if something was removed.
    pub fn remove_path(&mut self, path: &[String]) -> bool {
        let Some((first, rest)) = path.split_first() else {
            return false;
        };
        let Value::Record(fields) = self else {
            return false;
        };
        if rest.is_empty() {
            let before = fields.len();
            fields.retain(|(k, _)| k != first);
            return fields.len() != before;
        }
        match fields.iter_mut().find(|(k, _)| k == first) {
            Some((_, child)) => child.remove_path(rest),
            None => false,
        }
    }

    /// Total order used by sort, merge, and grouping. `Missing` compares as
    /// `Null`, and nulls sort before everything else.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (a, b) if a.is_null() && b.is_null() => Ordering::Equal,
            (a, _) if a.is_null() => Ordering::Less,
            (_, b) if b.is_null() => Ordering::Greater,
            (Bool(x), Bool(y)) => x.cmp(y),
            (Int(x), Int(y)) => x.cmp(y),
            (Float(x), Float(y)) => x.total_cmp(y),
            // Handle cross-type numeric comparisons
            (Int(x), Float(y)) => (*x as f64).total_cmp(y),
            (Float(x), Int(y)) => x.total_cmp(&(*y as f64)),
            (Str(x), Str(y)) => x.cmp(y),
            (Bytes(x), Bytes(y)) => x.cmp(y),
            (Time(x), Time(y)) => x.cmp(y),
            (Duration(x), Duration(y)) => x.cmp(y),
            (Error(x), Error(y)) => x.cmp(y),
            (Array(x), Array(y)) => {
                for (a, b) in x.iter().zip(y.iter()) {
                    let ord = a.total_cmp(b);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            (Record(x), Record(y)) => {
                for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            // Mixed types: compare by type order
            (a, b) => type_order(a).cmp(&type_order(b)),
        }
    }

    /// Equality with numeric coercion (1 == 1.0), used by `==` and join keys.
    pub fn loose_eq(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return self.is_null() && other.is_null();
        }
        self.total_cmp(other) == Ordering::Equal
    }

    /// Convert a JSON document into a value. Objects keep key order as
    /// produced by serde_json.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => match parse_time(s) {
                Some(ts) => Value::Time(ts),
                None => Value::Str(s.clone()),
            },
            serde_json::Value::Array(elems) => {
                Value::Array(elems.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => Value::Record(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null | Value::Missing => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Str(s) => J::String(s.clone()),
            Value::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            Value::Time(_) | Value::Duration(_) => J::String(self.to_string()),
            Value::Array(elems) => J::Array(elems.iter().map(Value::to_json).collect()),
            Value::Record(fields) => J::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Error(msg) => serde_json::json!({ "error": msg }),
        }
    }
}

/// Get type order for values (for mixed-type comparisons).
fn type_order(v: &Value) -> u8 {
    use Value::*;
    match v {
        Null | Missing => 0,
        Bool(_) => 1,
        Int(_) | Float(_) => 2,
        Time(_) => 3,
        Duration(_) => 4,
        Str(_) => 5,
        Bytes(_) => 6,
        Array(_) => 7,
        Record(_) => 8,
        Error(_) => 9,
    }
}

/// Wrapper giving `Value` a total `Ord` so it can key ordered maps
/// (group-by tables, switch routes).
#[derive(Debug, Clone)]
pub struct OrdValue(pub Value);

impl PartialEq for OrdValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrdValue {}

impl PartialOrd for OrdValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Parse an RFC 3339 timestamp into nanoseconds since the epoch.
pub fn parse_time(text: &str) -> Option<i64> {
    let dt = DateTime::parse_from_rfc3339(text).ok()?;
    dt.with_timezone(&Utc).timestamp_nanos_opt()
}

/// Parse a duration literal such as `3h`, `15m`, `1d`, `250ms`, or a
/// concatenation like `1h30m`.
pub fn parse_duration(text: &str) -> Option<i64> {
    let (neg, mut rest) = match text.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, text),
    };
    if rest.is_empty() {
        return None;
    }
    let mut total: i64 = 0;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let n: i64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1,
            "us" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            "d" => 86_400 * NANOS_PER_SEC,
            "w" => 7 * 86_400 * NANOS_PER_SEC,
            _ => return None,
        };
        total = total.checked_add(n.checked_mul(scale)?)?;
        rest = &rest[unit_len..];
    }
    Some(if neg { -total } else { total })
}

fn format_duration(f: &mut fmt::Formatter<'_>, nanos: i64) -> fmt::Result {
    if nanos == 0 {
        return write!(f, "0s");
    }
    if nanos < 0 {
        write!(f, "-")?;
    }
    let mut n = nanos.unsigned_abs();
    let units: [(&str, u64); 7] = [
        ("d", 86_400 * NANOS_PER_SEC as u64),
        ("h", 3_600 * NANOS_PER_SEC as u64),
        ("m", 60 * NANOS_PER_SEC as u64),
        ("s", NANOS_PER_SEC as u64),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ];
    for (unit, scale) in units {
        if n >= scale {
            write!(f, "{}{}", n / scale, unit)?;
            n %= scale;
        }
    }
    Ok(())
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Missing => write!(f, "error(\"missing\")"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Time(ns) => {
                let dt = DateTime::<Utc>::from_timestamp(
                    ns.div_euclid(NANOS_PER_SEC),
                    ns.rem_euclid(NANOS_PER_SEC) as u32,
                );
                match dt {
                    Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                    None => write!(f, "error(\"bad time\")"),
                }
            }
            Value::Duration(ns) => format_duration(f, *ns),
            Value::Array(elems) => {
                write!(f, "[")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if is_plain_identifier(k) {
                        write!(f, "{k}:{v}")?;
                    } else {
                        write!(f, "{k:?}:{v}")?;
                    }
                }
                write!(f, "}}")
            }
            Value::Error(msg) => write!(f, "error({msg:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn nulls_sort_first_and_missing_is_null() {
        assert_eq!(Value::Missing.total_cmp(&Value::Null), Ordering::Equal);
        assert_eq!(Value::Null.total_cmp(&Value::Int(-5)), Ordering::Less);
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(1.5)), Ordering::Greater);
    }

    #[test]
    fn set_and_remove_nested_paths() {
        let mut v = Value::record([("a", Value::Int(1))]);
        v.set_path(&path(&["b", "c"]), Value::Int(2));
        assert_eq!(v.deref_path(&path(&["b", "c"])), Value::Int(2));
        assert!(v.remove_path(&path(&["b", "c"])));
        assert_eq!(v.deref_path(&path(&["b", "c"])), Value::Missing);
        assert!(!v.remove_path(&path(&["zzz"])));
    }

    #[test]
    fn durations_parse_and_render() {
        assert_eq!(parse_duration("3h"), Some(3 * 3_600 * NANOS_PER_SEC));
        assert_eq!(parse_duration("1h30m"), Some(5_400 * NANOS_PER_SEC));
        assert_eq!(parse_duration("h"), None);
        assert_eq!(Value::Duration(5_400 * NANOS_PER_SEC).to_string(), "1h30m");
    }

    #[test]
    fn time_round_trips_through_display() {
        let ts = parse_time("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(Value::Time(ts).to_string(), "2024-01-01T00:00:00Z");
    }
}
