//! Update-operator documents applied to a cached payload.
//!
//! Field paths in every operator group are resolved relative to the payload
//! root, so `{"$set": {"x": 2}}` rewrites the payload's own `x` member.

use crate::document::{
    arith, compare, get_path, remove_path, set_path, split_path, type_name, values_equal, Arith,
};
use crate::filter::{Condition, Filter};
use cachegate_core::{CoreError, CoreResult};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Apply `patch` to a copy of `payload`.
///
/// The input is left untouched when any operator fails.
pub fn apply_patch(payload: &Value, patch: &Value) -> CoreResult<Value> {
    let groups = validate_patch(patch)?;
    let mut doc = payload.clone();

    for (operator, fields) in groups {
        for (path, operand) in fields {
            let segments = split_path(path)?;
            apply_operator(&mut doc, operator, &segments, operand).map_err(|e| match e {
                CoreError::InvalidArgument(msg) => {
                    CoreError::invalid_argument(format!("{} on `{}`: {}", operator, path, msg))
                }
                other => other,
            })?;
        }
    }

    Ok(doc)
}

/// Check the shape of a patch document without applying it.
pub fn validate_patch(patch: &Value) -> CoreResult<Vec<(&str, &Map<String, Value>)>> {
    let map = match patch {
        Value::Object(map) if !map.is_empty() => map,
        Value::Object(_) => {
            return Err(CoreError::invalid_argument(
                "update document must not be empty",
            ))
        }
        other => {
            return Err(CoreError::invalid_argument(format!(
                "update document must be an object, got {}",
                type_name(other)
            )))
        }
    };

    map.iter()
        .map(|(operator, group)| {
            if !OPERATORS.contains(&operator.as_str()) {
                return Err(CoreError::invalid_argument(format!(
                    "unsupported update operator `{}`",
                    operator
                )));
            }
            let fields = group.as_object().ok_or_else(|| {
                CoreError::invalid_argument(format!("{} expects an object of fields", operator))
            })?;
            Ok((operator.as_str(), fields))
        })
        .collect()
}

const OPERATORS: &[&str] = &[
    "$set",
    "$unset",
    "$inc",
    "$mul",
    "$min",
    "$max",
    "$rename",
    "$push",
    "$addToSet",
    "$pop",
    "$pull",
    "$currentDate",
];

fn apply_operator(
    doc: &mut Value,
    operator: &str,
    segments: &[&str],
    operand: &Value,
) -> CoreResult<()> {
    match operator {
        "$set" => set_path(doc, segments, operand.clone()),
        "$unset" => {
            remove_path(doc, segments);
            Ok(())
        }
        "$inc" => numeric_update(doc, segments, operand, Arith::Add, operand.clone()),
        "$mul" => {
            let zero = if operand.is_i64() { Value::from(0) } else { Value::from(0.0) };
            numeric_update(doc, segments, operand, Arith::Multiply, zero)
        }
        "$min" => bound_update(doc, segments, operand, Ordering::Less),
        "$max" => bound_update(doc, segments, operand, Ordering::Greater),
        "$rename" => {
            let target = operand
                .as_str()
                .ok_or_else(|| CoreError::invalid_argument("target must be a string"))?;
            let target_segments = split_path(target)?;
            if target_segments == segments {
                return Err(CoreError::invalid_argument("source and target are the same"));
            }
            if get_path(doc, segments).is_some() {
                let mut scratch = doc.clone();
                if let Some(value) = remove_path(&mut scratch, segments) {
                    set_path(&mut scratch, &target_segments, value)?;
                }
                *doc = scratch;
            }
            Ok(())
        }
        "$push" => {
            let items = each_items(operand);
            array_update(doc, segments, |array| {
                array.extend(items);
                Ok(())
            })
        }
        "$addToSet" => {
            let items = each_items(operand);
            array_update(doc, segments, |array| {
                for item in items {
                    if !array.iter().any(|v| values_equal(v, &item)) {
                        array.push(item);
                    }
                }
                Ok(())
            })
        }
        "$pop" => {
            let from_front = match operand.as_i64() {
                Some(1) => false,
                Some(-1) => true,
                _ => return Err(CoreError::invalid_argument("expects 1 or -1")),
            };
            if get_path(doc, segments).is_none() {
                return Ok(());
            }
            array_update(doc, segments, |array| {
                if from_front {
                    if !array.is_empty() {
                        array.remove(0);
                    }
                } else {
                    array.pop();
                }
                Ok(())
            })
        }
        "$pull" => {
            if get_path(doc, segments).is_none() {
                return Ok(());
            }
            let matcher = PullMatcher::parse(operand)?;
            array_update(doc, segments, |array| {
                array.retain(|item| !matcher.matches(item));
                Ok(())
            })
        }
        "$currentDate" => {
            let value = match operand {
                Value::Bool(true) => current_date(),
                Value::Object(spec) => match spec.get("$type").and_then(Value::as_str) {
                    Some("date") => current_date(),
                    Some("timestamp") => Value::from(Utc::now().timestamp_millis()),
                    _ => {
                        return Err(CoreError::invalid_argument(
                            "$type must be \"date\" or \"timestamp\"",
                        ))
                    }
                },
                _ => {
                    return Err(CoreError::invalid_argument(
                        "expects true or {\"$type\": ...}",
                    ))
                }
            };
            set_path(doc, segments, value)
        }
        other => Err(CoreError::invalid_argument(format!(
            "unsupported update operator `{}`",
            other
        ))),
    }
}

fn current_date() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn numeric_update(
    doc: &mut Value,
    segments: &[&str],
    operand: &Value,
    op: Arith,
    when_missing: Value,
) -> CoreResult<()> {
    if !operand.is_number() {
        return Err(CoreError::invalid_argument(format!(
            "operand must be a number, got {}",
            type_name(operand)
        )));
    }
    let next = match get_path(doc, segments) {
        None => when_missing,
        Some(current) => arith(op, current, operand).ok_or_else(|| {
            CoreError::invalid_argument(format!(
                "cannot apply arithmetic to a {}",
                type_name(current)
            ))
        })?,
    };
    set_path(doc, segments, next)
}

fn bound_update(
    doc: &mut Value,
    segments: &[&str],
    operand: &Value,
    replace_when: Ordering,
) -> CoreResult<()> {
    let replace = match get_path(doc, segments) {
        None => true,
        Some(current) => compare(operand, current) == replace_when,
    };
    if replace {
        set_path(doc, segments, operand.clone())?;
    }
    Ok(())
}

/// `{"$each": [...]}` expands to its items; anything else is one item.
fn each_items(operand: &Value) -> Vec<Value> {
    match operand {
        Value::Object(map) if map.len() == 1 => match map.get("$each") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![operand.clone()],
        },
        _ => vec![operand.clone()],
    }
}

fn array_update(
    doc: &mut Value,
    segments: &[&str],
    edit: impl FnOnce(&mut Vec<Value>) -> CoreResult<()>,
) -> CoreResult<()> {
    let mut array = match get_path(doc, segments) {
        None => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            return Err(CoreError::invalid_argument(format!(
                "expected an array, found a {}",
                type_name(other)
            )))
        }
    };
    edit(&mut array)?;
    set_path(doc, segments, Value::Array(array))
}

/// Element matcher for `$pull`.
enum PullMatcher {
    /// `{"$gte": 6}`: a condition on the element itself.
    Conditions(Vec<Condition>),
    /// `{"score": 8}`: a filter over document elements.
    Document(Filter),
    /// Anything else: plain equality.
    Equals(Value),
}

impl PullMatcher {
    fn parse(operand: &Value) -> CoreResult<Self> {
        match operand {
            Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
                Ok(PullMatcher::Conditions(Condition::parse_operand(operand)?))
            }
            Value::Object(map) if !map.is_empty() => Ok(PullMatcher::Document(Filter::parse(operand)?)),
            other => Ok(PullMatcher::Equals(other.clone())),
        }
    }

    fn matches(&self, item: &Value) -> bool {
        match self {
            PullMatcher::Conditions(conditions) => {
                conditions.iter().all(|c| c.matches_value(item))
            }
            PullMatcher::Document(filter) => item.is_object() && filter.matches(item),
            PullMatcher::Equals(expected) => values_equal(item, expected),
        }
    }
}
