//! Filter evaluation for in-memory document matching.
//!
//! This module evaluates native filter documents against BSON documents with the
//! semantics of the document store: dotted paths traverse arrays, a condition on an
//! array field matches when any element satisfies it, and `null` matches missing
//! fields.

use std::cmp::Ordering;

use bson::{Bson, Document, datetime::DateTime, spec::ElementType};
use regex::{Regex, RegexBuilder};

use docquery_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    path::AttributePath,
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to `f64`. Values of different types order by type
/// bracket: null, numbers, strings, documents, arrays, binary, object ids, booleans,
/// dates, then everything else.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// String value
    String(&'a str),
    /// Map/Object of comparable values, in field order
    Map(Vec<(&'a str, Comparable<'a>)>),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    Binary(&'a [u8]),
    ObjectId([u8; 12]),
    /// Boolean value
    Bool(bool),
    /// DateTime value
    DateTime(DateTime),
    /// Anything without a natural order
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(value.bytes()),
            Bson::Binary(value) => Comparable::Binary(&value.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => {
                Comparable::Map(doc.iter().map(|(k, v)| (k.as_str(), Comparable::from(v))).collect())
            }
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::Binary(_) => 6,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Other(_) => 10,
        }
    }

    /// Total order used for sorting and for `$min`/`$max`.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Number(a), Comparable::Number(b)) => a.total_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Map(a), Comparable::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ordering = va.rank().cmp(&vb.rank()).then_with(|| ka.cmp(kb)).then_with(|| va.total_cmp(vb));
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Comparable::Array(a), Comparable::Array(b)) => {
                for (va, vb) in a.iter().zip(b.iter()) {
                    let ordering = va.total_cmp(vb);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Comparable::Binary(a), Comparable::Binary(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.cmp(b),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.cmp(b),
            (Comparable::Other(a), Comparable::Other(b)) if a == b => Ordering::Equal,
            (Comparable::Other(a), Comparable::Other(b)) => (a.element_type() as u8)
                .cmp(&(b.element_type() as u8))
                .then_with(|| a.to_string().cmp(&b.to_string())),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            (Comparable::Other(_), _) | (_, Comparable::Other(_)) => false,
            _ => self.rank() == other.rank() && self.total_cmp(other) == Ordering::Equal,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    /// Values only compare within the same type bracket.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Other(_), _) | (_, Comparable::Other(_)) => None,
            _ if self.rank() == other.rank() => Some(self.total_cmp(other)),
            _ => None,
        }
    }
}

/// Compares two values under the total order.
pub(crate) fn compare(left: &Bson, right: &Bson) -> Ordering {
    Comparable::from(left).total_cmp(&Comparable::from(right))
}

fn equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// The candidates themselves plus the elements of array candidates.
fn expand<'d>(candidates: &[&'d Bson]) -> Vec<&'d Bson> {
    let mut expanded = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        expanded.push(*candidate);
        if let Bson::Array(items) = candidate {
            expanded.extend(items.iter());
        }
    }
    expanded
}

fn is_operator_document(document: &Document) -> bool {
    document.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn unsupported(operator: &str) -> DocumentStoreError {
    DocumentStoreError::UnsupportedOperation(format!("filter operator {operator:?}"))
}

fn expect_array<'c>(operator: &str, value: &'c Bson) -> DocumentStoreResult<&'c Vec<Bson>> {
    match value {
        Bson::Array(items) => Ok(items),
        other => Err(DocumentStoreError::InvalidOperand {
            operator: operator.to_string(),
            message: format!("expected an array, got {other}"),
        }),
    }
}

/// Returns whether `document` satisfies `filter`.
pub(crate) fn matches(document: &Document, filter: &Document) -> DocumentStoreResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for branch in expect_array(key, condition)? {
                    if !matches_branch(document, branch)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for branch in expect_array(key, condition)? {
                    if matches_branch(document, branch)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for branch in expect_array(key, condition)? {
                    if matches_branch(document, branch)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            "$comment" => true,
            operator if operator.starts_with('$') => return Err(unsupported(operator)),
            path => condition_matches(&AttributePath::parse(path).values(document), condition)?,
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

fn matches_branch(document: &Document, branch: &Bson) -> DocumentStoreResult<bool> {
    match branch {
        Bson::Document(filter) => matches(document, filter),
        other => Err(DocumentStoreError::InvalidOperand {
            operator: "$and/$or/$nor".to_string(),
            message: format!("expected a filter document, got {other}"),
        }),
    }
}

/// Whether a single array element satisfies a `$elemMatch` or `$pull` condition.
pub(crate) fn element_matches(element: &Bson, condition: &Bson) -> DocumentStoreResult<bool> {
    match condition {
        Bson::Document(filter) if is_operator_document(filter) => condition_matches(&[element], condition),
        Bson::Document(filter) => match element {
            Bson::Document(element) => matches(element, filter),
            _ => Ok(false),
        },
        Bson::RegularExpression(_) => condition_matches(&[element], condition),
        other => Ok(equal(element, other)),
    }
}

fn condition_matches(candidates: &[&Bson], condition: &Bson) -> DocumentStoreResult<bool> {
    match condition {
        Bson::Document(operators) if is_operator_document(operators) => {
            for (operator, operand) in operators {
                if !operator_matches(candidates, operator, operand, operators)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Bson::RegularExpression(regex) => {
            let regex = compile_regex(regex.pattern.as_str(), regex.options.as_str())?;
            Ok(regex_matches(candidates, &regex))
        }
        value => Ok(equality_matches(candidates, value)),
    }
}

fn equality_matches(candidates: &[&Bson], value: &Bson) -> bool {
    if matches!(value, Bson::Null) && candidates.is_empty() {
        return true;
    }
    expand(candidates).iter().any(|candidate| equal(candidate, value))
}

fn ordering_matches(candidates: &[&Bson], value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let value = Comparable::from(value);
    expand(candidates)
        .iter()
        .any(|candidate| Comparable::from(*candidate).partial_cmp(&value).is_some_and(&accept))
}

fn regex_matches(candidates: &[&Bson], regex: &Regex) -> bool {
    expand(candidates)
        .iter()
        .any(|candidate| matches!(candidate, Bson::String(text) if regex.is_match(text)))
}

fn compile_regex(pattern: &str, options: &str) -> DocumentStoreResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| DocumentStoreError::Backend(format!("invalid regular expression {pattern:?}: {err}")))
}

fn type_matches(value: &Bson, alias: &Bson) -> bool {
    let element_type = value.element_type();
    match alias {
        Bson::String(alias) => match alias.as_str() {
            "number" => matches!(
                element_type,
                ElementType::Double | ElementType::Int32 | ElementType::Int64 | ElementType::Decimal128
            ),
            "double" => element_type == ElementType::Double,
            "string" => element_type == ElementType::String,
            "object" => element_type == ElementType::EmbeddedDocument,
            "array" => element_type == ElementType::Array,
            "binData" => element_type == ElementType::Binary,
            "objectId" => element_type == ElementType::ObjectId,
            "bool" => element_type == ElementType::Boolean,
            "date" => element_type == ElementType::DateTime,
            "null" => element_type == ElementType::Null,
            "regex" => element_type == ElementType::RegularExpression,
            "int" => element_type == ElementType::Int32,
            "long" => element_type == ElementType::Int64,
            "decimal" => element_type == ElementType::Decimal128,
            _ => false,
        },
        Bson::Int32(code) => i64::from(element_type as u8) == i64::from(*code),
        Bson::Int64(code) => i64::from(element_type as u8) == *code,
        _ => false,
    }
}

fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        Bson::Double(value) if value.is_finite() => Some(value.trunc() as i64),
        _ => None,
    }
}

fn operator_matches(
    candidates: &[&Bson],
    operator: &str,
    operand: &Bson,
    siblings: &Document,
) -> DocumentStoreResult<bool> {
    match operator {
        "$eq" => Ok(equality_matches(candidates, operand)),
        "$ne" => Ok(!equality_matches(candidates, operand)),
        "$gt" => Ok(ordering_matches(candidates, operand, |o| o == Ordering::Greater)),
        "$gte" => Ok(ordering_matches(candidates, operand, |o| o != Ordering::Less)),
        "$lt" => Ok(ordering_matches(candidates, operand, |o| o == Ordering::Less)),
        "$lte" => Ok(ordering_matches(candidates, operand, |o| o != Ordering::Greater)),
        "$in" => {
            for value in expect_array(operator, operand)? {
                let found = match value {
                    Bson::RegularExpression(_) => condition_matches(candidates, value)?,
                    value => equality_matches(candidates, value),
                };
                if found {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "$nin" => Ok(!operator_matches(candidates, "$in", operand, siblings)?),
        "$exists" => {
            let wanted = match operand {
                Bson::Boolean(wanted) => *wanted,
                other => as_integer(other).is_some_and(|flag| flag != 0),
            };
            Ok(!candidates.is_empty() == wanted)
        }
        "$type" => Ok(expand(candidates).iter().any(|candidate| type_matches(candidate, operand))),
        "$mod" => {
            let (divisor, remainder) = match expect_array(operator, operand)?.as_slice() {
                [divisor, remainder] => (as_integer(divisor), as_integer(remainder)),
                _ => (None, None),
            };
            let (Some(divisor), Some(remainder)) = (divisor, remainder) else {
                return Err(DocumentStoreError::InvalidOperand {
                    operator: operator.to_string(),
                    message: "expected [divisor, remainder]".to_string(),
                });
            };
            if divisor == 0 {
                return Err(DocumentStoreError::Backend("divisor cannot be 0".to_string()));
            }
            Ok(expand(candidates)
                .iter()
                .filter_map(|candidate| as_integer(candidate))
                .any(|value| value % divisor == remainder))
        }
        "$all" => {
            let values = expect_array(operator, operand)?;
            if values.is_empty() {
                return Ok(false);
            }
            Ok(values.iter().all(|value| equality_matches(candidates, value)))
        }
        "$size" => {
            let size = as_integer(operand);
            Ok(candidates.iter().any(|candidate| {
                matches!(candidate, Bson::Array(items) if Some(items.len() as i64) == size)
            }))
        }
        "$elemMatch" => {
            for candidate in candidates {
                if let Bson::Array(items) = candidate {
                    for item in items {
                        if element_matches(item, operand)? {
                            return Ok(true);
                        }
                    }
                }
            }
            Ok(false)
        }
        "$regex" => {
            let pattern = match operand {
                Bson::String(pattern) => pattern.as_str(),
                Bson::RegularExpression(regex) => regex.pattern.as_str(),
                other => {
                    return Err(DocumentStoreError::InvalidOperand {
                        operator: operator.to_string(),
                        message: format!("expected a pattern, got {other}"),
                    });
                }
            };
            let options = siblings.get_str("$options").unwrap_or_default();
            Ok(regex_matches(candidates, &compile_regex(pattern, options)?))
        }
        "$options" => Ok(true),
        "$not" => Ok(!condition_matches(candidates, operand)?),
        other => Err(unsupported(other)),
    }
}
