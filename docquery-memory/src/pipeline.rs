//! Aggregation pipeline stages over in-memory documents.
//!
//! Supports the stages the query compiler emits: `$match`, `$unwind`, `$group`,
//! `$sort`, `$skip`, `$limit` and `$project`.

use std::cmp::Ordering;

use bson::{Bson, Document};
use tracing::trace;

use docquery_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    path::AttributePath,
};

use crate::evaluator::{compare, matches};

fn invalid(stage: &str, message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::InvalidOperand {
        operator: stage.to_string(),
        message: message.into(),
    }
}

fn as_count(stage: &str, value: &Bson) -> DocumentStoreResult<usize> {
    let count = match value {
        Bson::Int32(value) => i64::from(*value),
        Bson::Int64(value) => *value,
        Bson::Double(value) if value.fract() == 0.0 => *value as i64,
        other => return Err(invalid(stage, format!("expected a non-negative integer, got {other}"))),
    };
    usize::try_from(count).map_err(|_| invalid(stage, format!("expected a non-negative integer, got {count}")))
}

/// Runs `pipeline` over `documents`.
pub(crate) fn run(mut documents: Vec<Document>, pipeline: &[Document]) -> DocumentStoreResult<Vec<Document>> {
    for stage in pipeline {
        let Some((name, spec)) = stage.iter().next() else {
            return Err(invalid("pipeline", "empty stage"));
        };
        trace!(stage = name.as_str(), input = documents.len(), "running pipeline stage");

        documents = match (name.as_str(), spec) {
            ("$match", Bson::Document(filter)) => {
                let mut kept = Vec::with_capacity(documents.len());
                for document in documents {
                    if matches(&document, filter)? {
                        kept.push(document);
                    }
                }
                kept
            }
            ("$unwind", spec) => unwind(documents, spec)?,
            ("$group", Bson::Document(spec)) => group(&documents, spec)?,
            ("$sort", Bson::Document(spec)) => {
                sort(&mut documents, spec);
                documents
            }
            ("$skip", value) => documents.into_iter().skip(as_count(name, value)?).collect(),
            ("$limit", value) => documents.into_iter().take(as_count(name, value)?).collect(),
            ("$project", Bson::Document(spec)) => documents
                .iter()
                .map(|document| project(document, spec))
                .collect::<DocumentStoreResult<_>>()?,
            (name, _) => {
                return Err(DocumentStoreError::UnsupportedOperation(format!("pipeline stage {name:?}")));
            }
        };
    }

    Ok(documents)
}

/// Sorts documents by a `{field: 1 | -1}` specification. `$natural` keys are skipped.
pub(crate) fn sort(documents: &mut [Document], spec: &Document) {
    let keys: Vec<(AttributePath, bool)> = spec
        .iter()
        .filter(|(field, _)| !field.starts_with('$'))
        .map(|(field, direction)| {
            let descending = matches!(direction, Bson::Int32(d) if *d < 0)
                || matches!(direction, Bson::Int64(d) if *d < 0)
                || matches!(direction, Bson::Double(d) if *d < 0.0);
            (AttributePath::parse(field), descending)
        })
        .collect();

    if keys.is_empty() {
        return;
    }

    documents.sort_by(|left, right| {
        for (path, descending) in &keys {
            let left = path.get(left).unwrap_or(&Bson::Null);
            let right = path.get(right).unwrap_or(&Bson::Null);
            let ordering = compare(left, right);
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(flag) => *flag != 0,
        Bson::Int64(flag) => *flag != 0,
        Bson::Double(flag) => *flag != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

fn slice(value: &Bson, spec: &Bson) -> Bson {
    let Bson::Array(items) = value else {
        return value.clone();
    };
    let len = items.len() as i64;
    let (start, take) = match spec {
        Bson::Array(bounds) => match bounds.as_slice() {
            [skip, limit] => {
                let skip = skip.as_i64().or_else(|| skip.as_i32().map(i64::from)).unwrap_or(0);
                let limit = limit.as_i64().or_else(|| limit.as_i32().map(i64::from)).unwrap_or(0);
                let start = if skip < 0 { len.saturating_add(skip).max(0) } else { skip.min(len) };
                (start, limit.max(0))
            }
            _ => (0, len),
        },
        count => {
            let count = count.as_i64().or_else(|| count.as_i32().map(i64::from)).unwrap_or(len);
            if count < 0 {
                (len.saturating_add(count).max(0), count.saturating_neg())
            } else {
                (0, count)
            }
        }
    };

    Bson::Array(
        items
            .iter()
            .skip(usize::try_from(start).unwrap_or(0))
            .take(usize::try_from(take).unwrap_or(0))
            .cloned()
            .collect(),
    )
}

/// Applies a projection: inclusion of truthy fields, exclusion of falsy ones, and
/// `$slice` on array fields.
pub(crate) fn project(document: &Document, spec: &Document) -> DocumentStoreResult<Document> {
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    let mut slices = Vec::new();

    for (field, value) in spec {
        match value {
            Bson::Document(operator) if operator.contains_key("$slice") => {
                slices.push((AttributePath::parse(field), operator.get("$slice").cloned().unwrap_or(Bson::Null)));
            }
            value if field == "_id" && !is_truthy(value) => excluded.push(AttributePath::parse(field)),
            _ if field == "_id" => included.push(AttributePath::parse(field)),
            value if is_truthy(value) => included.push(AttributePath::parse(field)),
            _ => excluded.push(AttributePath::parse(field)),
        }
    }

    let inclusive = included.iter().any(|path| path.as_str() != "_id");
    let mut projected = if inclusive {
        let mut projected = Document::new();
        let keep_id = !excluded.iter().any(|path| path.as_str() == "_id");
        if keep_id && let Some(id) = document.get("_id") {
            projected.insert("_id", id.clone());
        }
        for path in included.iter().chain(slices.iter().map(|(path, _)| path)) {
            if let Some(value) = path.get(document) {
                path.set(&mut projected, value.clone())?;
            }
        }
        projected
    } else {
        let mut projected = document.clone();
        for path in &excluded {
            path.unset(&mut projected);
        }
        projected
    };

    for (path, spec) in &slices {
        if let Some(value) = path.get(&projected).map(|value| slice(value, spec)) {
            path.set(&mut projected, value)?;
        }
    }

    Ok(projected)
}

fn unwind(documents: Vec<Document>, spec: &Bson) -> DocumentStoreResult<Vec<Document>> {
    let field = match spec {
        Bson::String(field) => field.as_str(),
        Bson::Document(options) => options
            .get_str("path")
            .map_err(|_| invalid("$unwind", "missing path"))?,
        other => return Err(invalid("$unwind", format!("expected a field path, got {other}"))),
    };
    let path = AttributePath::parse(field.strip_prefix('$').unwrap_or(field));

    let mut unwound = Vec::with_capacity(documents.len());
    for document in documents {
        match path.get(&document).cloned() {
            Some(Bson::Array(items)) => {
                for item in items {
                    let mut copy = document.clone();
                    path.set(&mut copy, item)?;
                    unwound.push(copy);
                }
            }
            None | Some(Bson::Null) => {}
            Some(_) => unwound.push(document),
        }
    }

    Ok(unwound)
}

/// Evaluates a `$field` reference, a document of expressions or a literal.
fn evaluate(document: &Document, expression: &Bson) -> Bson {
    match expression {
        Bson::String(reference) if reference.starts_with('$') => AttributePath::parse(&reference[1..])
            .resolve(document)
            .unwrap_or(Bson::Null),
        Bson::Document(fields) => Bson::Document(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), evaluate(document, value)))
                .collect(),
        ),
        literal => literal.clone(),
    }
}

#[derive(Debug)]
enum Accumulator {
    Sum { integer: i64, float: f64, is_float: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    Last(Bson),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
}

impl Accumulator {
    fn new(operator: &str) -> DocumentStoreResult<Self> {
        Ok(match operator {
            "$sum" => Accumulator::Sum { integer: 0, float: 0.0, is_float: false },
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            other => {
                return Err(DocumentStoreError::UnsupportedOperation(format!("accumulator {other:?}")));
            }
        })
    }

    fn add(&mut self, value: Bson) {
        match self {
            Accumulator::Sum { integer, float, is_float } => match value {
                Bson::Int32(value) => *integer = integer.saturating_add(i64::from(value)),
                Bson::Int64(value) => *integer = integer.saturating_add(value),
                Bson::Double(value) => {
                    *float += value;
                    *is_float = true;
                }
                _ => {}
            },
            Accumulator::Avg { total, count } => {
                let number = match value {
                    Bson::Int32(value) => f64::from(value),
                    Bson::Int64(value) => value as f64,
                    Bson::Double(value) => value,
                    _ => return,
                };
                *total += number;
                *count += 1;
            }
            Accumulator::Min(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().is_none_or(|current| compare(&value, current) == Ordering::Less)
                {
                    *current = Some(value);
                }
            }
            Accumulator::Max(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().is_none_or(|current| compare(&value, current) == Ordering::Greater)
                {
                    *current = Some(value);
                }
            }
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            Accumulator::Last(current) => *current = value,
            Accumulator::Push(values) => values.push(value),
            Accumulator::AddToSet(values) => {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum { integer, float, is_float } => {
                if is_float {
                    Bson::Double(float + integer as f64)
                } else if let Ok(small) = i32::try_from(integer) {
                    Bson::Int32(small)
                } else {
                    Bson::Int64(integer)
                }
            }
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Bson::Null
                } else {
                    Bson::Double(total / count as f64)
                }
            }
            Accumulator::Min(value) | Accumulator::Max(value) | Accumulator::First(value) => {
                value.unwrap_or(Bson::Null)
            }
            Accumulator::Last(value) => value,
            Accumulator::Push(values) | Accumulator::AddToSet(values) => Bson::Array(values),
        }
    }
}

fn group(documents: &[Document], spec: &Document) -> DocumentStoreResult<Vec<Document>> {
    let key = spec.get("_id").ok_or_else(|| invalid("$group", "missing _id"))?;
    let fields: Vec<(&String, &str, &Bson)> = spec
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .map(|(field, accumulator)| match accumulator {
            Bson::Document(accumulator) if accumulator.len() == 1 => accumulator
                .iter()
                .next()
                .map(|(operator, expression)| (field, operator.as_str(), expression))
                .ok_or_else(|| invalid("$group", format!("invalid accumulator for {field}"))),
            _ => Err(invalid("$group", format!("invalid accumulator for {field}"))),
        })
        .collect::<DocumentStoreResult<_>>()?;

    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();

    for document in documents {
        let group_key = evaluate(document, key);
        let index = match groups.iter().position(|(existing, _)| *existing == group_key) {
            Some(index) => index,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(_, operator, _)| Accumulator::new(operator))
                    .collect::<DocumentStoreResult<_>>()?;
                groups.push((group_key, accumulators));
                groups.len() - 1
            }
        };

        for ((_, _, expression), accumulator) in fields.iter().zip(groups[index].1.iter_mut()) {
            accumulator.add(evaluate(document, expression));
        }
    }

    Ok(groups
        .into_iter()
        .map(|(group_key, accumulators)| {
            let mut row = Document::new();
            row.insert("_id", group_key);
            for ((field, _, _), accumulator) in fields.iter().zip(accumulators) {
                row.insert(field.as_str(), accumulator.finish());
            }
            row
        })
        .collect())
}
