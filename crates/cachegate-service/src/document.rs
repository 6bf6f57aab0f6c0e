//! Helpers for addressing and comparing JSON payloads.
//!
//! Field paths are dotted (`a.b.0.c`). A numeric segment indexes into an
//! array; any other segment names an object member.

use cachegate_core::{CoreError, CoreResult};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Most null slots a single write may insert to reach an array index.
pub const MAX_ARRAY_PADDING: usize = 1024;

/// Split a dotted path, rejecting empty paths and empty segments.
pub fn split_path(path: &str) -> CoreResult<Vec<&str>> {
    if path.is_empty() {
        return Err(CoreError::invalid_argument("field path must not be empty"));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::invalid_argument(format!(
            "field path `{}` contains an empty segment",
            path
        )));
    }
    Ok(segments)
}

fn array_index(segment: &str) -> Option<usize> {
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        segment.parse().ok()
    } else {
        None
    }
}

/// Value at an exact path, without traversing into array elements.
pub fn get_path<'a>(doc: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(array_index(segment)?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Every value reachable through `segments`, fanning out over arrays whose
/// elements are documents. This is the lookup used by query conditions.
pub fn lookup_all<'a>(doc: &'a Value, segments: &[&str]) -> Vec<&'a Value> {
    let Some((head, rest)) = segments.split_first() else {
        return vec![doc];
    };

    match doc {
        Value::Object(map) => match map.get(*head) {
            Some(next) => lookup_all(next, rest),
            None => Vec::new(),
        },
        Value::Array(items) => {
            if let Some(item) = array_index(head).and_then(|i| items.get(i)) {
                return lookup_all(item, rest);
            }
            items
                .iter()
                .filter(|item| item.is_object())
                .flat_map(|item| lookup_all(item, segments))
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Write `value` at `segments`, creating intermediate objects as needed.
pub fn set_path(doc: &mut Value, segments: &[&str], value: Value) -> CoreResult<()> {
    let Some((last, parents)) = segments.split_last() else {
        *doc = value;
        return Ok(());
    };

    let mut current = doc;
    for segment in parents {
        current = child_mut(current, segment)?;
    }

    match current {
        Value::Object(map) => {
            map.insert((*last).to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            *slot_mut(items, last)? = value;
            Ok(())
        }
        other => Err(not_traversable(last, type_name(other))),
    }
}

fn child_mut<'a>(current: &'a mut Value, segment: &str) -> CoreResult<&'a mut Value> {
    match current {
        Value::Object(map) => Ok(map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let slot = slot_mut(items, segment)?;
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
            Ok(slot)
        }
        other => Err(not_traversable(segment, type_name(other))),
    }
}

/// The array slot named by `segment`, padding with nulls when it lies past
/// the end. Padding is bounded by [`MAX_ARRAY_PADDING`].
fn slot_mut<'a>(items: &'a mut Vec<Value>, segment: &str) -> CoreResult<&'a mut Value> {
    let index = array_index(segment).ok_or_else(|| not_traversable(segment, "array"))?;
    if index >= items.len() {
        let gap = index - items.len();
        if gap > MAX_ARRAY_PADDING {
            return Err(CoreError::invalid_argument(format!(
                "array index {} is too far past the end of a {}-element array",
                segment,
                items.len()
            )));
        }
        items.resize(items.len() + gap + 1, Value::Null);
    }
    Ok(&mut items[index])
}

fn not_traversable(segment: &str, kind: &str) -> CoreError {
    CoreError::invalid_argument(format!("cannot create field `{}` in a {}", segment, kind))
}

/// Remove and return the value at `segments`, if any.
pub fn remove_path(doc: &mut Value, segments: &[&str]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = doc;
    for segment in parents {
        current = match current {
            Value::Object(map) => map.get_mut(*segment)?,
            Value::Array(items) => items.get_mut(array_index(segment)?)?,
            _ => return None,
        };
    }
    match current {
        Value::Object(map) => map.remove(*last),
        // array slots are nulled rather than shifted
        Value::Array(items) => items
            .get_mut(array_index(last)?)
            .map(|slot| std::mem::replace(slot, Value::Null)),
        _ => None,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Whether two values belong to the same comparison class.
pub fn same_class(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

/// Total order over JSON values: null < numbers < strings < objects <
/// arrays < booleans. Numbers compare by value regardless of representation.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a.cmp(&b);
    }
    let a = x.as_f64().unwrap_or(f64::NAN);
    let b = y.as_f64().unwrap_or(f64::NAN);
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

/// Arithmetic over JSON numbers. Integer operands stay integral unless the
/// result overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Subtract,
    Multiply,
}

pub fn arith(op: Arith, a: &Value, b: &Value) -> Option<Value> {
    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        return None;
    };

    if let (Some(i), Some(j)) = (x.as_i64(), y.as_i64()) {
        let exact = match op {
            Arith::Add => i.checked_add(j),
            Arith::Subtract => i.checked_sub(j),
            Arith::Multiply => i.checked_mul(j),
        };
        if let Some(v) = exact {
            return Some(Value::from(v));
        }
    }

    let (i, j) = (x.as_f64()?, y.as_f64()?);
    let result = match op {
        Arith::Add => i + j,
        Arith::Subtract => i - j,
        Arith::Multiply => i * j,
    };
    Some(float(result))
}

/// A finite float as a JSON number; non-finite results become null.
pub fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
