//! Read-only aggregation pipelines evaluated over one cached payload.
//!
//! The payload is the pipeline's only input document. Stages that would
//! write results elsewhere (`$out`, `$merge`) are rejected at parse time, so
//! a pipeline can never have side effects.

use crate::document::{
    arith, compare, float, get_path, lookup_all, remove_path, set_path, split_path, type_name,
    values_equal, Arith,
};
use crate::filter::Filter;
use cachegate_core::{CoreError, CoreResult};
use serde_json::{Map, Value};
use std::cmp::Ordering;

const REDIRECTING_STAGES: &[&str] = &["$out", "$merge"];

/// A parsed, validated pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Match(Filter),
    Project(Projection),
    AddFields(Vec<(String, Expr)>),
    Unset(Vec<String>),
    ReplaceRoot(Expr),
    Unwind { path: String, preserve_empty: bool },
    Sort(Vec<(String, bool)>),
    Skip(usize),
    Limit(usize),
    Count(String),
    Group { id: Expr, fields: Vec<(String, Accumulator, Expr)> },
}

#[derive(Debug, Clone, PartialEq)]
enum Projection {
    Include {
        paths: Vec<String>,
        computed: Vec<(String, Expr)>,
        exclude_id: bool,
    },
    Exclude(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulator {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
}

impl Pipeline {
    /// Parse and validate a pipeline given as a JSON array of stages.
    pub fn parse(value: &Value) -> CoreResult<Self> {
        let raw = value.as_array().ok_or_else(|| {
            CoreError::invalid_argument(format!(
                "aggregation must be an array of stages, got {}",
                type_name(value)
            ))
        })?;

        if let Some(last) = raw.last().and_then(stage_name) {
            if REDIRECTING_STAGES.contains(&last) {
                return Err(CoreError::invalid_argument(format!(
                    "aggregation must not redirect output ({} stage)",
                    last
                )));
            }
        }

        let stages = raw
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                parse_stage(stage).map_err(|e| match e {
                    CoreError::InvalidArgument(msg) => {
                        CoreError::invalid_argument(format!("stage {}: {}", i, msg))
                    }
                    other => other,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(Self { stages })
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the pipeline with `root` as its single input document.
    pub fn run(&self, root: Value) -> CoreResult<Vec<Value>> {
        if self.stages.is_empty() {
            return Ok(vec![root]);
        }
        if !root.is_object() {
            return Err(CoreError::invalid_argument(format!(
                "aggregation requires an object payload, found a {}",
                type_name(&root)
            )));
        }

        let mut docs = vec![root];
        for stage in &self.stages {
            docs = stage.apply(docs)?;
        }
        Ok(docs)
    }
}

fn stage_name(stage: &Value) -> Option<&str> {
    match stage.as_object() {
        Some(map) if map.len() == 1 => map.keys().next().map(String::as_str),
        _ => None,
    }
}

fn parse_stage(stage: &Value) -> CoreResult<Stage> {
    let name = stage_name(stage).ok_or_else(|| {
        CoreError::invalid_argument("each stage must be an object with exactly one key")
    })?;
    let spec = &stage[name];

    match name {
        "$match" => Ok(Stage::Match(Filter::parse(spec)?)),
        "$project" => Ok(Stage::Project(parse_projection(spec)?)),
        "$addFields" | "$set" => {
            let map = expect_object(name, spec)?;
            let fields = map
                .iter()
                .map(|(path, expr)| {
                    split_path(path)?;
                    Ok((path.clone(), Expr::parse(expr)?))
                })
                .collect::<CoreResult<Vec<_>>>()?;
            Ok(Stage::AddFields(fields))
        }
        "$unset" => {
            let paths = match spec {
                Value::String(path) => vec![path.clone()],
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_owned)
                            .ok_or_else(|| CoreError::invalid_argument("$unset expects field names"))
                    })
                    .collect::<CoreResult<Vec<_>>>()?,
                _ => return Err(CoreError::invalid_argument("$unset expects field names")),
            };
            for path in &paths {
                split_path(path)?;
            }
            Ok(Stage::Unset(paths))
        }
        "$replaceRoot" => {
            let map = expect_object(name, spec)?;
            let new_root = map
                .get("newRoot")
                .ok_or_else(|| CoreError::invalid_argument("$replaceRoot requires newRoot"))?;
            Ok(Stage::ReplaceRoot(Expr::parse(new_root)?))
        }
        "$replaceWith" => Ok(Stage::ReplaceRoot(Expr::parse(spec)?)),
        "$unwind" => {
            let (path, preserve_empty) = match spec {
                Value::String(path) => (path.as_str(), false),
                Value::Object(map) => (
                    map.get("path").and_then(Value::as_str).ok_or_else(|| {
                        CoreError::invalid_argument("$unwind requires a path")
                    })?,
                    map.get("preserveNullAndEmptyArrays")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                ),
                _ => return Err(CoreError::invalid_argument("$unwind requires a path")),
            };
            let path = field_reference(path)?;
            Ok(Stage::Unwind {
                path,
                preserve_empty,
            })
        }
        "$sort" => {
            let map = expect_object(name, spec)?;
            if map.is_empty() {
                return Err(CoreError::invalid_argument("$sort requires at least one key"));
            }
            let keys = map
                .iter()
                .map(|(path, dir)| {
                    split_path(path)?;
                    match dir.as_i64() {
                        Some(1) => Ok((path.clone(), true)),
                        Some(-1) => Ok((path.clone(), false)),
                        _ => Err(CoreError::invalid_argument("$sort direction must be 1 or -1")),
                    }
                })
                .collect::<CoreResult<Vec<_>>>()?;
            Ok(Stage::Sort(keys))
        }
        "$skip" => Ok(Stage::Skip(non_negative(name, spec)?)),
        "$limit" => match non_negative(name, spec)? {
            0 => Err(CoreError::invalid_argument("$limit must be positive")),
            n => Ok(Stage::Limit(n)),
        },
        "$count" => {
            let field = spec
                .as_str()
                .filter(|f| !f.is_empty() && !f.starts_with('$') && !f.contains('.'))
                .ok_or_else(|| {
                    CoreError::invalid_argument("$count expects a plain non-empty field name")
                })?;
            Ok(Stage::Count(field.to_string()))
        }
        "$group" => parse_group(spec),
        other => Err(CoreError::invalid_argument(format!(
            "unsupported aggregation stage `{}`",
            other
        ))),
    }
}

fn expect_object<'a>(name: &str, spec: &'a Value) -> CoreResult<&'a Map<String, Value>> {
    spec.as_object()
        .ok_or_else(|| CoreError::invalid_argument(format!("{} expects an object", name)))
}

fn non_negative(name: &str, spec: &Value) -> CoreResult<usize> {
    spec.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CoreError::invalid_argument(format!("{} expects a non-negative integer", name)))
}

/// `"$a.b"` to `"a.b"`.
fn field_reference(value: &str) -> CoreResult<String> {
    let path = value.strip_prefix('$').ok_or_else(|| {
        CoreError::invalid_argument(format!("field reference `{}` must start with $", value))
    })?;
    split_path(path)?;
    Ok(path.to_string())
}

fn parse_projection(spec: &Value) -> CoreResult<Projection> {
    let map = expect_object("$project", spec)?;
    if map.is_empty() {
        return Err(CoreError::invalid_argument("$project requires at least one field"));
    }

    let mut included = Vec::new();
    let mut excluded = Vec::new();
    let mut computed = Vec::new();
    let mut exclude_id = false;

    for (path, value) in map {
        split_path(path)?;
        match value {
            Value::Bool(flag) => flag_field(path, *flag, &mut included, &mut excluded, &mut exclude_id),
            Value::Number(n) => {
                let flag = n.as_f64().is_some_and(|f| f != 0.0);
                flag_field(path, flag, &mut included, &mut excluded, &mut exclude_id)
            }
            other => computed.push((path.clone(), Expr::parse(other)?)),
        }
    }

    if !excluded.is_empty() {
        if !included.is_empty() || !computed.is_empty() {
            return Err(CoreError::invalid_argument(
                "$project cannot mix inclusion and exclusion",
            ));
        }
        if exclude_id {
            excluded.push("_id".to_string());
        }
        return Ok(Projection::Exclude(excluded));
    }

    if included.is_empty() && computed.is_empty() {
        // only `_id: 0`
        return Ok(Projection::Exclude(vec!["_id".to_string()]));
    }

    Ok(Projection::Include {
        paths: included,
        computed,
        exclude_id,
    })
}

fn flag_field(
    path: &str,
    include: bool,
    included: &mut Vec<String>,
    excluded: &mut Vec<String>,
    exclude_id: &mut bool,
) {
    if path == "_id" {
        *exclude_id = !include;
    } else if include {
        included.push(path.to_string());
    } else {
        excluded.push(path.to_string());
    }
}

fn parse_group(spec: &Value) -> CoreResult<Stage> {
    let map = expect_object("$group", spec)?;
    let id = map
        .get("_id")
        .ok_or_else(|| CoreError::invalid_argument("$group requires an _id"))?;
    let id = Expr::parse(id)?;

    let mut fields = Vec::new();
    for (name, value) in map.iter().filter(|(k, _)| k.as_str() != "_id") {
        if name.contains('.') {
            return Err(CoreError::invalid_argument(format!(
                "$group field `{}` must not contain a dot",
                name
            )));
        }
        let (op, arg) = match value.as_object() {
            Some(obj) if obj.len() == 1 => obj.iter().next().map(|(k, v)| (k.as_str(), v)),
            _ => None,
        }
        .ok_or_else(|| {
            CoreError::invalid_argument(format!("$group field `{}` needs one accumulator", name))
        })?;

        let accumulator = match op {
            "$sum" => Accumulator::Sum,
            "$avg" => Accumulator::Avg,
            "$min" => Accumulator::Min,
            "$max" => Accumulator::Max,
            "$first" => Accumulator::First,
            "$last" => Accumulator::Last,
            "$push" => Accumulator::Push,
            "$addToSet" => Accumulator::AddToSet,
            other => {
                return Err(CoreError::invalid_argument(format!(
                    "unsupported accumulator `{}`",
                    other
                )))
            }
        };
        fields.push((name.clone(), accumulator, Expr::parse(arg)?));
    }

    Ok(Stage::Group { id, fields })
}

impl Stage {
    fn apply(&self, docs: Vec<Value>) -> CoreResult<Vec<Value>> {
        match self {
            Stage::Match(filter) => Ok(docs.into_iter().filter(|d| filter.matches(d)).collect()),
            Stage::Project(projection) => docs.iter().map(|d| projection.apply(d)).collect(),
            Stage::AddFields(fields) => docs
                .into_iter()
                .map(|mut doc| {
                    let values = fields
                        .iter()
                        .map(|(_, expr)| expr.eval(&doc))
                        .collect::<CoreResult<Vec<_>>>()?;
                    for ((path, _), value) in fields.iter().zip(values) {
                        let segments = split_path(path)?;
                        match value {
                            Some(value) => set_path(&mut doc, &segments, value)?,
                            None => {
                                remove_path(&mut doc, &segments);
                            }
                        }
                    }
                    Ok(doc)
                })
                .collect(),
            Stage::Unset(paths) => docs
                .into_iter()
                .map(|mut doc| {
                    for path in paths {
                        remove_path(&mut doc, &split_path(path)?);
                    }
                    Ok(doc)
                })
                .collect(),
            Stage::ReplaceRoot(expr) => docs
                .iter()
                .map(|doc| match expr.eval(doc)? {
                    Some(root @ Value::Object(_)) => Ok(root),
                    other => Err(CoreError::invalid_argument(format!(
                        "replacement root must be an object, found {}",
                        other.as_ref().map_or("missing", type_name)
                    ))),
                })
                .collect(),
            Stage::Unwind {
                path,
                preserve_empty,
            } => {
                let segments = split_path(path)?;
                let mut out = Vec::new();
                for doc in docs {
                    match get_path(&doc, &segments).cloned() {
                        Some(Value::Array(items)) if !items.is_empty() => {
                            for item in items {
                                let mut copy = doc.clone();
                                set_path(&mut copy, &segments, item)?;
                                out.push(copy);
                            }
                        }
                        None | Some(Value::Null) | Some(Value::Array(_)) => {
                            if *preserve_empty {
                                out.push(doc);
                            }
                        }
                        Some(_) => out.push(doc),
                    }
                }
                Ok(out)
            }
            Stage::Sort(keys) => {
                let mut docs = docs;
                let keys = keys
                    .iter()
                    .map(|(path, asc)| Ok((split_path(path)?, *asc)))
                    .collect::<CoreResult<Vec<_>>>()?;
                docs.sort_by(|a, b| {
                    for (segments, asc) in &keys {
                        let left = get_path(a, segments).unwrap_or(&Value::Null);
                        let right = get_path(b, segments).unwrap_or(&Value::Null);
                        let ord = compare(left, right);
                        let ord = if *asc { ord } else { ord.reverse() };
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    Ordering::Equal
                });
                Ok(docs)
            }
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            Stage::Count(field) => {
                if docs.is_empty() {
                    return Ok(Vec::new());
                }
                let mut out = Map::new();
                out.insert(field.clone(), Value::from(docs.len() as u64));
                Ok(vec![Value::Object(out)])
            }
            Stage::Group { id, fields } => group(docs, id, fields),
        }
    }
}

impl Projection {
    fn apply(&self, doc: &Value) -> CoreResult<Value> {
        match self {
            Projection::Exclude(paths) => {
                let mut out = doc.clone();
                for path in paths {
                    remove_path(&mut out, &split_path(path)?);
                }
                Ok(out)
            }
            Projection::Include {
                paths,
                computed,
                exclude_id,
            } => {
                let mut out = Value::Object(Map::new());
                if !exclude_id {
                    if let Some(id) = doc.get("_id") {
                        set_path(&mut out, &["_id"], id.clone())?;
                    }
                }
                for path in paths {
                    let segments = split_path(path)?;
                    if let Some(value) = get_path(doc, &segments) {
                        set_path(&mut out, &segments, value.clone())?;
                    }
                }
                for (path, expr) in computed {
                    if let Some(value) = expr.eval(doc)? {
                        set_path(&mut out, &split_path(path)?, value)?;
                    }
                }
                Ok(out)
            }
        }
    }
}

struct GroupState {
    key: Value,
    values: Vec<Option<Value>>,
    counts: Vec<u64>,
}

fn group(
    docs: Vec<Value>,
    id: &Expr,
    fields: &[(String, Accumulator, Expr)],
) -> CoreResult<Vec<Value>> {
    let mut groups: Vec<GroupState> = Vec::new();

    for doc in &docs {
        let key = id.eval(doc)?.unwrap_or(Value::Null);
        let index = match groups.iter().position(|g| values_equal(&g.key, &key)) {
            Some(index) => index,
            None => {
                groups.push(GroupState {
                    key,
                    values: vec![None; fields.len()],
                    counts: vec![0; fields.len()],
                });
                groups.len() - 1
            }
        };
        let state = &mut groups[index];

        for (slot, (_, accumulator, expr)) in fields.iter().enumerate() {
            let value = expr.eval(doc)?;
            accumulate(
                *accumulator,
                &mut state.values[slot],
                &mut state.counts[slot],
                value,
            );
        }
    }

    Ok(groups
        .into_iter()
        .map(|state| {
            let mut out = Map::new();
            out.insert("_id".to_string(), state.key);
            for (slot, (name, accumulator, _)) in fields.iter().enumerate() {
                let value = finish(*accumulator, state.values[slot].clone(), state.counts[slot]);
                out.insert(name.clone(), value);
            }
            Value::Object(out)
        })
        .collect())
}

fn accumulate(acc: Accumulator, state: &mut Option<Value>, count: &mut u64, value: Option<Value>) {
    match acc {
        Accumulator::Sum | Accumulator::Avg => {
            if let Some(v) = value.filter(Value::is_number) {
                *count += 1;
                *state = Some(match state.take() {
                    None => v,
                    Some(sum) => arith(Arith::Add, &sum, &v).unwrap_or(Value::Null),
                });
            }
        }
        Accumulator::Min | Accumulator::Max => {
            if let Some(v) = value.filter(|v| !v.is_null()) {
                let wanted = if acc == Accumulator::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let replace = state.as_ref().map_or(true, |cur| compare(&v, cur) == wanted);
                if replace {
                    *state = Some(v);
                }
            }
        }
        Accumulator::First => {
            if *count == 0 {
                *state = Some(value.unwrap_or(Value::Null));
                *count = 1;
            }
        }
        Accumulator::Last => *state = Some(value.unwrap_or(Value::Null)),
        Accumulator::Push | Accumulator::AddToSet => {
            let list = state.get_or_insert_with(|| Value::Array(Vec::new()));
            if let (Value::Array(items), Some(v)) = (list, value) {
                if acc == Accumulator::Push || !items.iter().any(|i| values_equal(i, &v)) {
                    items.push(v);
                }
            }
        }
    }
}

fn finish(acc: Accumulator, state: Option<Value>, count: u64) -> Value {
    match acc {
        Accumulator::Sum => state.unwrap_or(Value::from(0)),
        Accumulator::Avg => match state.as_ref().and_then(Value::as_f64) {
            Some(sum) if count > 0 => float(sum / count as f64),
            _ => Value::Null,
        },
        Accumulator::Push | Accumulator::AddToSet => {
            state.unwrap_or_else(|| Value::Array(Vec::new()))
        }
        _ => state.unwrap_or(Value::Null),
    }
}

/// Aggregation expression.
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Root,
    Path(String),
    Literal(Value),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Op(Operator, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Concat,
    Add,
    Subtract,
    Multiply,
    Divide,
    Size,
    IfNull,
}

impl Expr {
    fn parse(value: &Value) -> CoreResult<Self> {
        match value {
            Value::String(s) if s == "$$ROOT" || s == "$$CURRENT" => Ok(Expr::Root),
            Value::String(s) if s.starts_with("$$") => Err(CoreError::invalid_argument(format!(
                "unsupported variable `{}`",
                s
            ))),
            Value::String(s) if s.starts_with('$') => Ok(Expr::Path(field_reference(s)?)),
            Value::Array(items) => Ok(Expr::Array(
                items.iter().map(Expr::parse).collect::<CoreResult<Vec<_>>>()?,
            )),
            Value::Object(map) if map.len() == 1 && map.keys().all(|k| k.starts_with('$')) => {
                let (name, args) = map
                    .iter()
                    .next()
                    .ok_or_else(|| CoreError::internal("empty operator object"))?;
                if name == "$literal" {
                    return Ok(Expr::Literal(args.clone()));
                }
                let op = match name.as_str() {
                    "$concat" => Operator::Concat,
                    "$add" => Operator::Add,
                    "$subtract" => Operator::Subtract,
                    "$multiply" => Operator::Multiply,
                    "$divide" => Operator::Divide,
                    "$size" => Operator::Size,
                    "$ifNull" => Operator::IfNull,
                    other => {
                        return Err(CoreError::invalid_argument(format!(
                            "unsupported expression operator `{}`",
                            other
                        )))
                    }
                };
                let args = match args {
                    Value::Array(items) => {
                        items.iter().map(Expr::parse).collect::<CoreResult<Vec<_>>>()?
                    }
                    single => vec![Expr::parse(single)?],
                };
                check_arity(op, args.len())?;
                Ok(Expr::Op(op, args))
            }
            Value::Object(map) => {
                if map.keys().any(|k| k.starts_with('$')) {
                    return Err(CoreError::invalid_argument(
                        "expression object mixes operators and fields",
                    ));
                }
                Ok(Expr::Object(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), Expr::parse(v)?)))
                        .collect::<CoreResult<Vec<_>>>()?,
                ))
            }
            other => Ok(Expr::Literal(other.clone())),
        }
    }

    /// `None` means the referenced field is missing.
    fn eval(&self, doc: &Value) -> CoreResult<Option<Value>> {
        match self {
            Expr::Root => Ok(Some(doc.clone())),
            Expr::Path(path) => {
                let segments = split_path(path)?;
                if let Some(value) = get_path(doc, &segments) {
                    return Ok(Some(value.clone()));
                }
                let found = lookup_all(doc, &segments);
                Ok(if found.is_empty() {
                    None
                } else {
                    Some(Value::Array(found.into_iter().cloned().collect()))
                })
            }
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Object(fields) => {
                let mut out = Map::new();
                for (name, expr) in fields {
                    if let Some(value) = expr.eval(doc)? {
                        out.insert(name.clone(), value);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            Expr::Array(items) => Ok(Some(Value::Array(
                items
                    .iter()
                    .map(|e| Ok(e.eval(doc)?.unwrap_or(Value::Null)))
                    .collect::<CoreResult<Vec<_>>>()?,
            ))),
            Expr::Op(op, args) => {
                let values = args
                    .iter()
                    .map(|e| e.eval(doc))
                    .collect::<CoreResult<Vec<_>>>()?;
                eval_operator(*op, values).map(Some)
            }
        }
    }
}

fn check_arity(op: Operator, count: usize) -> CoreResult<()> {
    let ok = match op {
        Operator::Subtract | Operator::Divide => count == 2,
        Operator::Size => count == 1,
        Operator::IfNull => count >= 2,
        Operator::Concat | Operator::Add | Operator::Multiply => true,
    };
    if ok {
        Ok(())
    } else {
        Err(CoreError::invalid_argument(format!(
            "{:?} received {} arguments",
            op, count
        )))
    }
}

fn eval_operator(op: Operator, values: Vec<Option<Value>>) -> CoreResult<Value> {
    if op == Operator::IfNull {
        return Ok(values
            .into_iter()
            .flatten()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null));
    }

    // null or missing inputs make the whole expression null
    let mut present = Vec::with_capacity(values.len());
    for value in values {
        match value {
            None | Some(Value::Null) => return Ok(Value::Null),
            Some(v) => present.push(v),
        }
    }

    match op {
        Operator::Concat => {
            let mut out = String::new();
            for value in &present {
                let s = value.as_str().ok_or_else(|| {
                    CoreError::invalid_argument(format!(
                        "$concat only supports strings, got {}",
                        type_name(value)
                    ))
                })?;
                out.push_str(s);
            }
            Ok(Value::String(out))
        }
        Operator::Add | Operator::Multiply => {
            let (arith_op, identity) = if op == Operator::Add {
                (Arith::Add, Value::from(0))
            } else {
                (Arith::Multiply, Value::from(1))
            };
            present.iter().try_fold(identity, |acc, v| {
                arith(arith_op, &acc, v).ok_or_else(|| non_numeric(op, v))
            })
        }
        Operator::Subtract => arith(Arith::Subtract, &present[0], &present[1])
            .ok_or_else(|| non_numeric(op, &present[1])),
        Operator::Divide => {
            let (Some(a), Some(b)) = (present[0].as_f64(), present[1].as_f64()) else {
                return Err(non_numeric(op, &present[1]));
            };
            if b == 0.0 {
                return Err(CoreError::invalid_argument("$divide by zero"));
            }
            Ok(float(a / b))
        }
        Operator::Size => present[0]
            .as_array()
            .map(|items| Value::from(items.len() as u64))
            .ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "$size requires an array, got {}",
                    type_name(&present[0])
                ))
            }),
        Operator::IfNull => Ok(Value::Null),
    }
}

fn non_numeric(op: Operator, value: &Value) -> CoreError {
    CoreError::invalid_argument(format!(
        "{:?} only supports numbers, got {}",
        op,
        type_name(value)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(pipeline: Value, doc: Value) -> Vec<Value> {
        Pipeline::parse(&pipeline).unwrap().run(doc).unwrap()
    }

    fn order() -> Value {
        json!({
            "customer": "ada",
            "items": [
                {"sku": "pen", "qty": 2, "price": 1.5},
                {"sku": "ink", "qty": 1, "price": 7},
                {"sku": "pad", "qty": 4, "price": 3}
            ]
        })
    }

    #[test]
    fn test_terminal_redirect_is_rejected() {
        for stage in ["$out", "$merge"] {
            let mut last = Map::new();
            last.insert(stage.to_string(), json!("other"));
            let err =
                Pipeline::parse(&json!([{"$match": {}}, Value::Object(last)])).unwrap_err();
            assert!(matches!(err, CoreError::InvalidArgument(msg) if msg.contains("redirect")));
        }
        assert!(Pipeline::parse(&json!([{"$out": "x"}, {"$match": {}}])).is_err());
    }

    #[test]
    fn test_malformed_pipelines() {
        assert!(Pipeline::parse(&json!({"$match": {}})).is_err());
        assert!(Pipeline::parse(&json!([{"$match": {}, "$limit": 1}])).is_err());
        assert!(Pipeline::parse(&json!([{"$lookup": {}}])).is_err());
        assert!(Pipeline::parse(&json!([{"$limit": 0}])).is_err());
        assert!(Pipeline::parse(&json!([{"$project": {"a": 1, "b": 0}}])).is_err());
    }

    #[test]
    fn test_empty_pipeline_returns_payload() {
        assert_eq!(run(json!([]), json!(5)), vec![json!(5)]);
    }

    #[test]
    fn test_match_filters_the_payload() {
        assert_eq!(run(json!([{"$match": {"customer": "ada"}}]), order()).len(), 1);
        assert!(run(json!([{"$match": {"customer": "bob"}}]), order()).is_empty());
    }

    #[test]
    fn test_unwind_sort_limit_project() {
        let out = run(
            json!([
                {"$unwind": "$items"},
                {"$sort": {"items.qty": -1}},
                {"$limit": 2},
                {"$project": {"_id": 0, "sku": "$items.sku", "total": {"$multiply": ["$items.qty", "$items.price"]}}}
            ]),
            order(),
        );
        assert_eq!(
            out,
            vec![json!({"sku": "pad", "total": 12}), json!({"sku": "pen", "total": 3.0})]
        );
    }

    #[test]
    fn test_group_accumulators() {
        let out = run(
            json!([
                {"$unwind": "$items"},
                {"$group": {
                    "_id": "$customer",
                    "qty": {"$sum": "$items.qty"},
                    "lines": {"$sum": 1},
                    "avg": {"$avg": "$items.qty"},
                    "max": {"$max": "$items.price"},
                    "first": {"$first": "$items.sku"},
                    "skus": {"$push": "$items.sku"}
                }}
            ]),
            order(),
        );
        assert_eq!(
            out,
            vec![json!({
                "_id": "ada",
                "qty": 7,
                "lines": 3,
                "avg": 7.0 / 3.0,
                "max": 7,
                "first": "pen",
                "skus": ["pen", "ink", "pad"]
            })]
        );
    }

    #[test]
    fn test_count_and_skip() {
        let out = run(json!([{"$unwind": "$items"}, {"$skip": 1}, {"$count": "n"}]), order());
        assert_eq!(out, vec![json!({"n": 2})]);
        assert!(run(json!([{"$match": {"x": 1}}, {"$count": "n"}]), order()).is_empty());
    }

    #[test]
    fn test_add_fields_unset_and_replace_root() {
        let out = run(
            json!([
                {"$addFields": {"n": {"$size": "$items"}, "label": {"$concat": ["$customer", "!"]}}},
                {"$unset": ["items"]}
            ]),
            order(),
        );
        assert_eq!(out, vec![json!({"customer": "ada", "n": 3, "label": "ada!"})]);

        let out = run(
            json!([{"$replaceRoot": {"newRoot": {"who": "$customer", "lit": {"$literal": "$x"}}}}]),
            order(),
        );
        assert_eq!(out, vec![json!({"who": "ada", "lit": "$x"})]);
        assert!(Pipeline::parse(&json!([{"$replaceWith": "$customer"}]))
            .unwrap()
            .run(order())
            .is_err());
    }

    #[test]
    fn test_exclusion_projection_and_if_null() {
        let out = run(
            json!([{"$project": {"items": 0}}, {"$set": {"note": {"$ifNull": ["$missing", "none"]}}}]),
            order(),
        );
        assert_eq!(out, vec![json!({"customer": "ada", "note": "none"})]);
    }

    #[test]
    fn test_arithmetic_expressions() {
        let out = run(
            json!([{"$project": {
                "diff": {"$subtract": [10, 4]},
                "ratio": {"$divide": [9, 2]},
                "sum": {"$add": [1, 2, 3]},
                "nothing": {"$add": [1, "$missing"]}
            }}]),
            json!({}),
        );
        assert_eq!(out, vec![json!({"diff": 6, "ratio": 4.5, "sum": 6, "nothing": null})]);

        let divide = Pipeline::parse(&json!([{"$set": {"x": {"$divide": [1, 0]}}}])).unwrap();
        assert!(divide.run(json!({})).is_err());
    }

    #[test]
    fn test_add_fields_with_distant_array_index_fails() {
        let pipeline =
            Pipeline::parse(&json!([{"$addFields": {"items.4000000000": 1}}])).unwrap();
        assert!(matches!(
            pipeline.run(order()),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_non_object_payload_with_stages_fails() {
        let pipeline = Pipeline::parse(&json!([{"$match": {}}])).unwrap();
        assert!(pipeline.run(json!([1, 2])).is_err());
    }
}
