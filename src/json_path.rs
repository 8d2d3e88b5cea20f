// Dotted-path lookups over vendor responses ("data.fl", "lps.0.sp", "Data.Flight.0.cabins").
// Missing paths are normal: string lookups degrade to "" instead of failing.

use serde_json::Value;

/// Walks `path` segment by segment. Digit segments index arrays and are
/// plain keys on objects.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String rendering of the value at `path`: strings verbatim, numbers and
/// bools in their JSON form, everything else (or nothing) as "".
pub fn lookup_string(data: &Value, path: &str) -> String {
    match lookup(data, path) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Truthiness: `true`, the string "true", or a non-zero number.
pub fn lookup_bool(data: &Value, path: &str) -> bool {
    match lookup(data, path) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

pub fn lookup_f64(data: &Value, path: &str) -> Option<f64> {
    match lookup(data, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn lookup_array<'a>(data: &'a Value, path: &str) -> &'a [Value] {
    match lookup(data, path) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}
