//! Applies native update documents to stored documents.

use bson::{Bson, Document, oid::ObjectId};

use docquery_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    path::AttributePath,
};

use crate::evaluator::element_matches;

fn rejected(message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::Backend(message.into())
}

fn operand_fields<'u>(operator: &str, operand: &'u Bson) -> DocumentStoreResult<&'u Document> {
    match operand {
        Bson::Document(fields) => Ok(fields),
        other => Err(rejected(format!("{operator} expects a document, got {other}"))),
    }
}

/// The values to append for `$push`/`$addToSet`, unwrapping `$each`.
fn appended(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Document(modifier) if modifier.contains_key("$each") => match modifier.get("$each") {
            Some(Bson::Array(values)) => values.clone(),
            Some(value) => vec![value.clone()],
            None => Vec::new(),
        },
        value => vec![value.clone()],
    }
}

fn increment(current: &Bson, amount: &Bson, field: &str) -> DocumentStoreResult<Bson> {
    let invalid = || {
        rejected(format!(
            "Cannot apply $inc to a value of non-numeric type. {{_id: ...}} has the field '{field}' of non-numeric type {}",
            type_name(current)
        ))
    };

    Ok(match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).saturating_add(*b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.saturating_add(i64::from(*b))),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.saturating_add(*b)),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(f64::from(*a) + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => return Err(invalid()),
    })
}

fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null => "null",
        Bson::String(_) => "string",
        Bson::Boolean(_) => "bool",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        _ => "other",
    }
}

fn array_at<'d>(document: &'d mut Document, path: &AttributePath, operator: &str) -> DocumentStoreResult<&'d mut Vec<Bson>> {
    if path.get(document).is_none() {
        path.set(document, Bson::Array(Vec::new()))?;
    }

    match get_mut(document, path) {
        Some(Bson::Array(items)) => Ok(items),
        Some(other) => Err(rejected(format!(
            "The field '{path}' must be an array but is of type {} in {operator}",
            type_name(other)
        ))),
        None => Err(rejected(format!("cannot address '{path}' in {operator}"))),
    }
}

fn get_mut<'d>(document: &'d mut Document, path: &AttributePath) -> Option<&'d mut Bson> {
    let mut segments = path.as_str().split('.');
    let mut current = document.get_mut(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(child) => child.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Applies `update` to `document` and returns whether it changed.
pub(crate) fn apply(document: &mut Document, update: &Document) -> DocumentStoreResult<bool> {
    let before = document.clone();

    for (operator, operand) in update {
        let fields = operand_fields(operator, operand)?;

        for (field, value) in fields {
            let path = AttributePath::parse(field);
            if path.as_str() == "_id" && operator != "$setOnInsert" && document.get("_id") != Some(value) {
                return Err(rejected("Performing an update on the path '_id' would modify the immutable field '_id'"));
            }

            match operator.as_str() {
                "$set" => {
                    path.set(document, value.clone())?;
                }
                "$unset" => {
                    path.unset(document);
                }
                "$inc" => {
                    let next = match path.get(document) {
                        None => value.clone(),
                        Some(current) => increment(current, value, field)?,
                    };
                    path.set(document, next)?;
                }
                "$push" => array_at(document, &path, operator)?.extend(appended(value)),
                "$addToSet" => {
                    let items = array_at(document, &path, operator)?;
                    for value in appended(value) {
                        if !items.contains(&value) {
                            items.push(value);
                        }
                    }
                }
                "$pull" => {
                    if let Some(Bson::Array(items)) = get_mut(document, &path) {
                        let mut kept = Vec::with_capacity(items.len());
                        for item in items.drain(..) {
                            if !element_matches(&item, value)? {
                                kept.push(item);
                            }
                        }
                        *items = kept;
                    }
                }
                other => {
                    return Err(DocumentStoreError::UnsupportedOperation(format!("update operator {other:?}")));
                }
            }
        }
    }

    Ok(*document != before)
}

/// The document an upsert starts from: the equality fields of `filter`.
pub(crate) fn upsert_base(filter: &Document) -> DocumentStoreResult<Document> {
    let mut base = Document::new();
    collect_equalities(filter, &mut base)?;
    Ok(base)
}

fn collect_equalities(filter: &Document, base: &mut Document) -> DocumentStoreResult<()> {
    for (key, condition) in filter {
        if key == "$and" {
            if let Bson::Array(branches) = condition {
                for branch in branches {
                    if let Bson::Document(branch) = branch {
                        collect_equalities(branch, base)?;
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }

        let value = match condition {
            Bson::Document(operators) if operators.keys().next().is_some_and(|k| k.starts_with('$')) => {
                match operators.get("$eq") {
                    Some(value) => value.clone(),
                    None => continue,
                }
            }
            Bson::RegularExpression(_) => continue,
            value => value.clone(),
        };
        AttributePath::parse(key).set(base, value)?;
    }

    Ok(())
}

/// Places an `_id` first in `document`, generating one when absent.
pub(crate) fn with_id(document: Document) -> (Bson, Document) {
    let id = document
        .get("_id")
        .cloned()
        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
    let mut stored = Document::new();
    stored.insert("_id", id.clone());
    for (key, value) in document {
        if key != "_id" {
            stored.insert(key, value);
        }
    }
    (id, stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_unset_and_inc() {
        let mut document = doc! { "_id": 1, "name": "knife", "amount": 3, "meta": { "a": 1 } };
        let changed = apply(
            &mut document,
            &doc! { "$set": { "meta.b": 2 }, "$unset": { "name": "" }, "$inc": { "amount": 2, "sold": 1 } },
        )
        .unwrap();

        assert!(changed);
        assert_eq!(document, doc! { "_id": 1, "amount": 5, "meta": { "a": 1, "b": 2 }, "sold": 1 });
    }

    #[test]
    fn inc_on_null_is_rejected() {
        let mut document = doc! { "_id": 1, "amount": null };
        assert!(matches!(
            apply(&mut document, &doc! { "$inc": { "amount": 1 } }),
            Err(DocumentStoreError::Backend(_))
        ));
    }

    #[test]
    fn push_add_to_set_and_pull() {
        let mut document = doc! { "_id": 1, "tags": ["a"], "items": [{ "n": 1 }, { "n": 2 }] };
        apply(&mut document, &doc! { "$push": { "tags": { "$each": ["b", "a"] } } }).unwrap();
        assert_eq!(document.get_array("tags").unwrap().len(), 3);

        let changed = apply(&mut document, &doc! { "$addToSet": { "tags": "b" } }).unwrap();
        assert!(!changed);

        apply(
            &mut document,
            &doc! { "$pull": { "tags": { "$in": ["a"] }, "items": { "n": 2 } } },
        )
        .unwrap();
        assert_eq!(document, doc! { "_id": 1, "tags": ["b"], "items": [{ "n": 1 }] });
    }

    #[test]
    fn upsert_base_takes_equalities() {
        let base = upsert_base(&doc! {
            "$and": [{ "name": "knife" }, { "$or": [{ "sold": { "$exists": false } }] }],
            "type": { "$eq": "sharp" },
            "amount": { "$gt": 3 },
        })
        .unwrap();

        assert_eq!(base, doc! { "name": "knife", "type": "sharp" });
    }

    #[test]
    fn generated_ids_come_first() {
        let (id, stored) = with_id(doc! { "name": "knife" });
        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
    }
}
