//! Dotted attribute paths into nested documents.
//!
//! An [`AttributePath`] is parsed once into typed [`Segment`]s and can then be
//! evaluated against any number of documents. A `*` segment stands for "every
//! element of the array at this position" and is only meaningful on the read side.

use std::{convert::Infallible, fmt, str::FromStr};
use bson::{Bson, Document};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// How many `null`s a positional write may pad an array with, matching the server.
const MAX_ARRAY_PADDING: usize = 1_500_000;

/// A single step of an [`AttributePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A named field, or an array index when the name is numeric.
    Field(String),
    /// Every element of an array.
    Wildcard,
}

impl Segment {
    fn name(&self) -> &str {
        match self {
            Segment::Field(name) => name,
            Segment::Wildcard => "*",
        }
    }

    fn index(&self) -> Option<usize> {
        match self {
            Segment::Field(name) => name.parse().ok(),
            Segment::Wildcard => None,
        }
    }
}

/// A parsed dotted path such as `address.country` or `amount.*.hidden`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath {
    raw: String,
    segments: Vec<Segment>,
}

impl AttributePath {
    /// Parses a dotted path. Parsing never fails; `*` segments become [`Segment::Wildcard`].
    pub fn parse(path: &str) -> Self {
        Self {
            raw: path.to_string(),
            segments: path
                .split('.')
                .map(|segment| match segment {
                    "*" => Segment::Wildcard,
                    name => Segment::Field(name.to_string()),
                })
                .collect(),
        }
    }

    fn from_segments(segments: &[Segment]) -> Self {
        Self {
            raw: segments
                .iter()
                .map(Segment::name)
                .collect::<Vec<_>>()
                .join("."),
            segments: segments.to_vec(),
        }
    }

    /// The path as it was written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the path addresses a top-level field.
    pub fn is_top_level(&self) -> bool {
        matches!(self.segments.as_slice(), [Segment::Field(_)])
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments.contains(&Segment::Wildcard)
    }

    /// Splits the path around its first wildcard: `amount.*.hidden` gives `(amount, hidden)`.
    pub fn split_wildcard(&self) -> Option<(AttributePath, AttributePath)> {
        let position = self
            .segments
            .iter()
            .position(|segment| *segment == Segment::Wildcard)?;

        Some((
            Self::from_segments(&self.segments[..position]),
            Self::from_segments(&self.segments[position + 1..]),
        ))
    }

    /// The dotted path the store understands, with wildcard segments removed.
    pub fn storage_path(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Field(name) => Some(name.as_str()),
                Segment::Wildcard => None,
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Resolves the path against `root`.
    ///
    /// A wildcard applied to an array evaluates the rest of the path against every
    /// element and returns the found results as an array. A wildcard applied to
    /// anything else resolves to `None`.
    pub fn resolve(&self, root: &Document) -> Option<Bson> {
        if let [Segment::Field(name)] = self.segments.as_slice() {
            return root.get(name).cloned();
        }

        let (head, rest) = self.segments.split_first()?;

        match head {
            Segment::Field(name) => resolve_value(root.get(name)?, rest),
            Segment::Wildcard => None,
        }
    }

    /// Borrows the value at this path. Wildcard paths never match.
    pub fn get<'a>(&self, root: &'a Document) -> Option<&'a Bson> {
        let (head, rest) = self.segments.split_first()?;
        let Segment::Field(name) = head else {
            return None;
        };
        let mut current = root.get(name)?;

        for segment in rest {
            current = match (segment, current) {
                (Segment::Field(name), Bson::Document(document)) => document.get(name)?,
                (Segment::Field(_), Bson::Array(items)) => items.get(segment.index()?)?,
                _ => return None,
            };
        }

        Some(current)
    }

    /// Writes `value` at this path, creating missing intermediate documents, and
    /// returns the root for chaining.
    pub fn set<'d>(&self, root: &'d mut Document, value: Bson) -> DocumentStoreResult<&'d mut Document> {
        if self.has_wildcard() {
            return Err(DocumentStoreError::unsupported(format!(
                "writing through wildcard path `{}`",
                self.raw
            )));
        }

        set_in_document(root, &self.segments, value)?;

        Ok(root)
    }

    /// Removes the value at this path, returning it if it was present.
    pub fn unset(&self, root: &mut Document) -> Option<Bson> {
        unset_in_document(root, &self.segments)
    }

    /// Every value reachable at this path, descending through arrays of documents the
    /// way store-side filters do.
    pub fn values<'a>(&self, root: &'a Document) -> Vec<&'a Bson> {
        let mut found = Vec::new();
        collect_in_document(root, &self.segments, &mut found);
        found
    }
}

fn resolve_value(value: &Bson, segments: &[Segment]) -> Option<Bson> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match (head, value) {
        (Segment::Wildcard, Bson::Array(items)) => Some(Bson::Array(
            items
                .iter()
                .filter_map(|item| resolve_value(item, rest))
                .collect(),
        )),
        (Segment::Field(name), Bson::Document(document)) => resolve_value(document.get(name)?, rest),
        (Segment::Field(_), Bson::Array(items)) => resolve_value(items.get(head.index()?)?, rest),
        _ => None,
    }
}

fn set_in_document(document: &mut Document, segments: &[Segment], value: Bson) -> DocumentStoreResult<()> {
    let [head, rest @ ..] = segments else {
        return Ok(());
    };

    if rest.is_empty() {
        document.insert(head.name(), value);
        return Ok(());
    }

    match document.get_mut(head.name()) {
        Some(Bson::Document(child)) => set_in_document(child, rest, value),
        Some(Bson::Array(items)) => set_in_array(items, rest, value),
        _ => {
            let mut child = Document::new();
            set_in_document(&mut child, rest, value)?;
            document.insert(head.name(), child);
            Ok(())
        }
    }
}

fn set_in_array(items: &mut Vec<Bson>, segments: &[Segment], value: Bson) -> DocumentStoreResult<()> {
    let [head, rest @ ..] = segments else {
        return Ok(());
    };
    let index = head.index().ok_or_else(|| {
        DocumentStoreError::invalid_operand(
            "set",
            format!("cannot address field `{}` inside an array", head.name()),
        )
    })?;

    if items.len() <= index {
        if index - items.len() >= MAX_ARRAY_PADDING {
            return Err(DocumentStoreError::invalid_operand(
                "set",
                format!("index {index} would pad the array past {MAX_ARRAY_PADDING} elements"),
            ));
        }
        items.resize(index + 1, Bson::Null);
    }

    let slot = &mut items[index];

    if rest.is_empty() {
        *slot = value;
        return Ok(());
    }

    match slot {
        Bson::Document(child) => set_in_document(child, rest, value),
        Bson::Array(nested) => set_in_array(nested, rest, value),
        other => {
            let mut child = Document::new();
            set_in_document(&mut child, rest, value)?;
            *other = Bson::Document(child);
            Ok(())
        }
    }
}

fn unset_in_document(document: &mut Document, segments: &[Segment]) -> Option<Bson> {
    let (head, rest) = segments.split_first()?;

    if rest.is_empty() {
        return document.remove(head.name());
    }

    match document.get_mut(head.name())? {
        Bson::Document(child) => unset_in_document(child, rest),
        Bson::Array(items) => unset_in_array(items, rest),
        _ => None,
    }
}

fn unset_in_array(items: &mut [Bson], segments: &[Segment]) -> Option<Bson> {
    let (head, rest) = segments.split_first()?;
    let slot = items.get_mut(head.index()?)?;

    // array slots are nulled rather than removed
    if rest.is_empty() {
        return Some(std::mem::replace(slot, Bson::Null));
    }

    match slot {
        Bson::Document(child) => unset_in_document(child, rest),
        Bson::Array(nested) => unset_in_array(nested, rest),
        _ => None,
    }
}

fn collect_in_document<'a>(document: &'a Document, segments: &[Segment], found: &mut Vec<&'a Bson>) {
    let Some(head) = segments.first() else {
        return;
    };

    if let Some(value) = document.get(head.name()) {
        collect_in_value(value, &segments[1..], found);
    }
}

fn collect_in_value<'a>(value: &'a Bson, segments: &[Segment], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        found.push(value);
        return;
    };

    match (head, value) {
        (Segment::Wildcard, Bson::Array(items)) => {
            for item in items {
                collect_in_value(item, rest, found);
            }
        }
        (Segment::Field(_), Bson::Document(document)) => collect_in_document(document, segments, found),
        (Segment::Field(_), Bson::Array(items)) => {
            if let Some(item) = head.index().and_then(|index| items.get(index)) {
                collect_in_value(item, rest, found);
            }

            for item in items {
                if let Bson::Document(document) = item {
                    collect_in_document(document, segments, found);
                }
            }
        }
        _ => {}
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for AttributePath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AttributePath::parse(s))
    }
}

impl From<&str> for AttributePath {
    fn from(path: &str) -> Self {
        AttributePath::parse(path)
    }
}

impl From<String> for AttributePath {
    fn from(path: String) -> Self {
        AttributePath::parse(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn sample() -> Document {
        doc! {
            "name": "spoon",
            "amount": [
                { "hidden": 1, "label": "a" },
                { "label": "b" },
                { "hidden": 5 },
            ],
            "author": { "first_name": "John", "address": { "country": "NL" } },
        }
    }

    #[test]
    fn resolves_top_level_and_nested_fields() {
        let document = sample();

        assert_eq!(AttributePath::parse("name").resolve(&document), Some(Bson::from("spoon")));
        assert_eq!(
            AttributePath::parse("author.address.country").resolve(&document),
            Some(Bson::from("NL"))
        );
        assert_eq!(AttributePath::parse("author.missing").resolve(&document), None);
    }

    #[test]
    fn wildcard_collects_found_results_from_each_element() {
        let document = sample();

        assert_eq!(
            AttributePath::parse("amount.*.hidden").resolve(&document),
            Some(Bson::Array(vec![Bson::Int32(1), Bson::Int32(5)]))
        );
    }

    #[test]
    fn wildcard_against_mapping_is_not_found() {
        let document = sample();

        assert_eq!(AttributePath::parse("author.*.first_name").resolve(&document), None);
        assert_eq!(AttributePath::parse("author.*").get(&document), None);
    }

    #[test]
    fn numeric_segments_index_arrays() {
        let document = sample();

        assert_eq!(AttributePath::parse("amount.2.hidden").get(&document), Some(&Bson::Int32(5)));
        assert_eq!(AttributePath::parse("amount.9.hidden").get(&document), None);
    }

    #[test]
    fn set_creates_missing_intermediates_and_returns_root() {
        let mut document = doc! { "name": "fork" };

        let root = AttributePath::parse("entry.date.day")
            .set(&mut document, Bson::Int32(3))
            .unwrap();
        AttributePath::parse("entry.note")
            .set(root, Bson::from("n"))
            .unwrap();

        assert_eq!(document, doc! { "name": "fork", "entry": { "date": { "day": 3 }, "note": "n" } });
    }

    #[test]
    fn set_replaces_scalar_intermediates() {
        let mut document = doc! { "address": "unknown" };

        AttributePath::parse("address.country")
            .set(&mut document, Bson::from("France"))
            .unwrap();

        assert_eq!(document, doc! { "address": { "country": "France" } });
    }

    #[test]
    fn set_pads_arrays_within_bounds() {
        let mut document = doc! { "tags": ["a"] };

        AttributePath::parse("tags.2").set(&mut document, Bson::from("c")).unwrap();
        assert_eq!(document, doc! { "tags": ["a", null, "c"] });

        let max = usize::MAX.to_string();
        for index in ["1000000000000", max.as_str()] {
            let err = AttributePath::parse(&format!("tags.{index}"))
                .set(&mut document, Bson::Int32(1))
                .unwrap_err();
            assert!(matches!(err, DocumentStoreError::InvalidOperand { .. }));
        }
        assert_eq!(document, doc! { "tags": ["a", null, "c"] });
    }

    #[test]
    fn set_rejects_wildcards() {
        let mut document = sample();

        let err = AttributePath::parse("amount.*.hidden")
            .set(&mut document, Bson::Int32(0))
            .unwrap_err();

        assert!(matches!(err, DocumentStoreError::UnsupportedOperation(_)));
    }

    #[test]
    fn unset_removes_nested_fields() {
        let mut document = sample();

        assert_eq!(
            AttributePath::parse("author.first_name").unset(&mut document),
            Some(Bson::from("John"))
        );
        assert_eq!(AttributePath::parse("author.first_name").get(&document), None);
        assert_eq!(AttributePath::parse("nothing.here").unset(&mut document), None);
    }

    #[test]
    fn values_fan_out_through_arrays_of_documents() {
        let document = sample();

        let labels = AttributePath::parse("amount.label").values(&document);

        assert_eq!(labels, vec![&Bson::from("a"), &Bson::from("b")]);
    }

    #[test]
    fn split_wildcard_and_storage_path() {
        let path = AttributePath::parse("amount.*.hidden");
        let (prefix, suffix) = path.split_wildcard().unwrap();

        assert_eq!(prefix.as_str(), "amount");
        assert_eq!(suffix.as_str(), "hidden");
        assert_eq!(path.storage_path(), "amount.hidden");
        assert!(AttributePath::parse("amount").split_wildcard().is_none());
    }
}
