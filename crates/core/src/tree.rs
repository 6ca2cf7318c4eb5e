//! Structural comparisons over semi-structured document trees.
//!
//! Mappings compare without regard to key order, lists are order-sensitive,
//! scalars must match exactly. An integer never equals a float, even when
//! both hold the same value.

use serde_json::{Map, Number, Value as Json};

/// Deep structural equality.
pub fn semantic_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Null, Json::Null) => true,
        (Json::Bool(x), Json::Bool(y)) => x == y,
        (Json::Number(x), Json::Number(y)) => number_eq(x, y),
        (Json::String(x), Json::String(y)) => x == y,
        (Json::Array(xs), Json::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(x, y)| semantic_eq(x, y))
        }
        (Json::Object(xm), Json::Object(ym)) => map_eq(xm, ym),
        _ => false,
    }
}

fn map_eq(a: &Map<String, Json>, b: &Map<String, Json>) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(k, av)| b.get(k).map(|bv| semantic_eq(av, bv)).unwrap_or(false))
}

fn number_eq(a: &Number, b: &Number) -> bool {
    if a.is_f64() || b.is_f64() {
        return a.is_f64() && b.is_f64() && a.as_f64() == b.as_f64();
    }
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a.as_u64() == b.as_u64(),
        _ => false,
    }
}

/// Keys present in `actual` but absent from `desired`, minus `ignored`.
pub fn extra_keys<'a>(desired: &Map<String, Json>, actual: &'a Map<String, Json>, ignored: &[&str]) -> Vec<&'a str> {
    actual
        .keys()
        .filter(|k| !desired.contains_key(k.as_str()) && !ignored.contains(&k.as_str()))
        .map(|k| k.as_str())
        .collect()
}

/// Every entry of `subset` is present in `superset` with an equal value.
pub fn is_submap(subset: &Map<String, Json>, superset: &Map<String, Json>) -> bool {
    subset.iter().all(|(k, v)| superset.get(k).map(|sv| semantic_eq(v, sv)).unwrap_or(false))
}

/// Count nodes, stopping once `max` is reached.
pub fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}
