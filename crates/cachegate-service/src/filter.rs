//! Query filters used by `$match` and `$pull`.
//!
//! A filter document is parsed into a [`Filter`] tree once and then evaluated
//! against each document. Supported forms:
//! - logical: `$and`, `$or`, `$nor` (arrays of filters)
//! - field conditions: `{ "path": value }` (implicit equality) or
//!   `{ "path": { "$op": operand, ... } }`
//! - operators: `$eq $ne $gt $gte $lt $lte $in $nin $exists $size $not`

use crate::document::{compare, lookup_all, same_class, split_path, values_equal};
use cachegate_core::{CoreError, CoreResult};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Maximum nesting allowed while parsing filter expressions.
const MAX_FILTER_DEPTH: usize = 32;

/// Upper bound on the number of clauses in one logical operator.
const MAX_BOOLEAN_CLAUSES: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field { path: String, conditions: Vec<Condition> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Size(usize),
    Not(Vec<Condition>),
}

impl Filter {
    /// Parse a filter document.
    pub fn parse(node: &Value) -> CoreResult<Self> {
        parse_document(node, 0)
    }

    /// Evaluate against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Filter::Nor(clauses) => !clauses.iter().any(|c| c.matches(doc)),
            Filter::Field { path, conditions } => {
                // paths were validated at parse time
                let segments: Vec<&str> = path.split('.').collect();
                let found = lookup_all(doc, &segments);
                conditions.iter().all(|c| c.matches_values(&found))
            }
        }
    }
}

impl Condition {
    /// Parse the value side of a field condition.
    pub fn parse_operand(value: &Value) -> CoreResult<Vec<Condition>> {
        parse_operand(value, 0)
    }

    /// Evaluate against a single value.
    pub fn matches_value(&self, value: &Value) -> bool {
        self.matches_values(&[value])
    }

    fn matches_values(&self, found: &[&Value]) -> bool {
        match self {
            Condition::Eq(expected) => equals_any(found, expected),
            Condition::Ne(expected) => !equals_any(found, expected),
            Condition::Gt(bound) => compares_any(found, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => compares_any(found, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => compares_any(found, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => compares_any(found, bound, |o| o != Ordering::Greater),
            Condition::In(options) => options.iter().any(|o| equals_any(found, o)),
            Condition::Nin(options) => !options.iter().any(|o| equals_any(found, o)),
            Condition::Exists(wanted) => found.is_empty() != *wanted,
            Condition::Size(len) => found
                .iter()
                .any(|v| v.as_array().is_some_and(|items| items.len() == *len)),
            Condition::Not(inner) => !inner.iter().all(|c| c.matches_values(found)),
        }
    }
}

/// Candidates plus, for array candidates, their elements.
fn expand<'a>(found: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::with_capacity(found.len());
    for value in found {
        out.push(*value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn equals_any(found: &[&Value], expected: &Value) -> bool {
    if found.is_empty() {
        return expected.is_null();
    }
    expand(found).iter().any(|v| values_equal(v, expected))
}

fn compares_any(found: &[&Value], bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    expand(found)
        .iter()
        .any(|v| same_class(v, bound) && accept(compare(v, bound)))
}

fn check_depth(depth: usize) -> CoreResult<()> {
    if depth > MAX_FILTER_DEPTH {
        return Err(CoreError::invalid_argument(format!(
            "filter nesting exceeds maximum depth of {}",
            MAX_FILTER_DEPTH
        )));
    }
    Ok(())
}

fn parse_document(node: &Value, depth: usize) -> CoreResult<Filter> {
    check_depth(depth)?;
    let obj = node.as_object().ok_or_else(|| {
        CoreError::invalid_argument(format!("expected object filter, got {}", node))
    })?;

    let mut clauses = Vec::with_capacity(obj.len());
    for (key, value) in obj {
        let clause = match key.as_str() {
            "$and" => Filter::And(parse_clauses(key, value, depth)?),
            "$or" => Filter::Or(parse_clauses(key, value, depth)?),
            "$nor" => Filter::Nor(parse_clauses(key, value, depth)?),
            op if op.starts_with('$') => {
                return Err(CoreError::invalid_argument(format!(
                    "unsupported top-level filter operator `{}`",
                    op
                )))
            }
            path => {
                split_path(path)?;
                Filter::Field {
                    path: path.to_string(),
                    conditions: parse_operand(value, depth + 1)?,
                }
            }
        };
        clauses.push(clause);
    }

    Ok(if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Filter::And(clauses)
    })
}

fn parse_clauses(name: &str, value: &Value, depth: usize) -> CoreResult<Vec<Filter>> {
    let array = value.as_array().ok_or_else(|| {
        CoreError::invalid_argument(format!("{} expects an array, found {}", name, value))
    })?;
    if array.is_empty() {
        return Err(CoreError::invalid_argument(format!(
            "{} requires at least one clause",
            name
        )));
    }
    if array.len() > MAX_BOOLEAN_CLAUSES {
        return Err(CoreError::invalid_argument(format!(
            "{} exceeds maximum of {} clauses",
            name, MAX_BOOLEAN_CLAUSES
        )));
    }
    array
        .iter()
        .map(|item| parse_document(item, depth + 1))
        .collect()
}

/// An object whose keys are all operators is a condition set; anything else
/// is an implicit equality.
fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn parse_operand(value: &Value, depth: usize) -> CoreResult<Vec<Condition>> {
    check_depth(depth)?;
    let map = match value {
        Value::Object(map) if is_operator_object(map) => map,
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            return Err(CoreError::invalid_argument(
                "cannot mix operators and plain fields in one condition",
            ))
        }
        other => return Ok(vec![Condition::Eq(other.clone())]),
    };

    map.iter()
        .map(|(op, operand)| {
            Ok(match op.as_str() {
                "$eq" => Condition::Eq(operand.clone()),
                "$ne" => Condition::Ne(operand.clone()),
                "$gt" => Condition::Gt(operand.clone()),
                "$gte" => Condition::Gte(operand.clone()),
                "$lt" => Condition::Lt(operand.clone()),
                "$lte" => Condition::Lte(operand.clone()),
                "$in" => Condition::In(operand_list(op, operand)?),
                "$nin" => Condition::Nin(operand_list(op, operand)?),
                "$exists" => Condition::Exists(truthy(operand)),
                "$size" => Condition::Size(
                    operand
                        .as_u64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| {
                            CoreError::invalid_argument("$size expects a non-negative integer")
                        })?,
                ),
                "$not" => match operand {
                    Value::Object(inner) if is_operator_object(inner) => {
                        Condition::Not(parse_operand(operand, depth + 1)?)
                    }
                    _ => {
                        return Err(CoreError::invalid_argument(
                            "$not expects an operator document",
                        ))
                    }
                },
                other => {
                    return Err(CoreError::invalid_argument(format!(
                        "unsupported query operator `{}`",
                        other
                    )))
                }
            })
        })
        .collect()
}

fn operand_list(op: &str, operand: &Value) -> CoreResult<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| CoreError::invalid_argument(format!("{} expects an array", op)))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}
