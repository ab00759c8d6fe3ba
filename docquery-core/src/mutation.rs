//! Update descriptions and the compilation of writes.
//!
//! An [`Update`] collects field operations into the native sections `$set`, `$unset`,
//! `$inc`, `$push`, `$pull` and `$addToSet`. [`Query::to_update_mql`] and
//! [`Query::to_delete_mql`] combine it with the query's filter.

use bson::{Bson, Document, doc};

use crate::{
    cast::CastRegistry,
    command::{Command, DeleteOptions, UpdateOptions},
    error::{DocumentStoreError, DocumentStoreResult},
    query::Query,
};

/// A set of field modifications.
///
/// # Example
///
/// ```ignore
/// let update = Update::new()
///     .set("name", "spoon")
///     .increment("amount", 5)
///     .push("tags", "kitchen", true);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Document,
    unset: Document,
    inc: Document,
    push: Document,
    pull: Document,
    add_to_set: Document,
    /// First repeated operation that could not be merged into its section.
    conflict: Option<String>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an update from a raw document. A document of plain fields is treated
    /// as `$set`; a document of update operators is merged section by section.
    pub fn from_document(data: Document) -> DocumentStoreResult<Self> {
        let operators = data.keys().filter(|key| key.starts_with('$')).count();
        if operators == 0 {
            return Ok(Self::new().set_many(data));
        }
        if operators != data.len() {
            return Err(DocumentStoreError::invalid_operand(
                "update",
                "update operators cannot be mixed with plain fields",
            ));
        }

        let mut update = Self::new();
        for (operator, section) in data {
            let Bson::Document(section) = section else {
                return Err(DocumentStoreError::invalid_operand(
                    operator,
                    "expected a document of fields",
                ));
            };
            let target = match operator.as_str() {
                "$set" => &mut update.set,
                "$unset" => &mut update.unset,
                "$inc" => &mut update.inc,
                "$push" => &mut update.push,
                "$pull" => &mut update.pull,
                "$addToSet" => &mut update.add_to_set,
                _ => return Err(DocumentStoreError::unsupported(format!("update operator {operator:?}"))),
            };
            target.extend(section);
        }

        Ok(update)
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn set_many(mut self, data: Document) -> Self {
        self.set.extend(data);
        self
    }

    /// Removes `field` from matched documents.
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.insert(field.into(), "");
        self
    }

    /// Adds `amount` to `field`. Repeated increments of one field are summed.
    pub fn increment(mut self, field: impl Into<String>, amount: impl Into<Bson>) -> Self {
        let field = field.into();
        let amount = match self.inc.remove(&field) {
            Some(previous) => match add(&previous, &amount.into()) {
                Some(total) => total,
                None => {
                    self.note_conflict(format!("increments of {field} cannot be summed"));
                    previous
                }
            },
            None => amount.into(),
        };
        self.inc.insert(field, amount);
        self
    }

    pub fn decrement(self, field: impl Into<String>, amount: impl Into<Bson>) -> Self {
        self.increment(field, negate(amount.into()))
    }

    /// Appends `value` to the array `field`. With `unique`, the value is only added
    /// when not already present.
    pub fn push(mut self, field: impl Into<String>, value: impl Into<Bson>, unique: bool) -> Self {
        let section = if unique { &mut self.add_to_set } else { &mut self.push };
        let field = field.into();
        let value = match section.remove(&field) {
            Some(previous) => {
                let mut values = each(previous);
                values.extend(each(value.into()));
                Bson::Document(doc! { "$each": values })
            }
            None => value.into(),
        };
        section.insert(field, value);
        self
    }

    /// Appends every value of `values` to the array `field`.
    pub fn push_each<V: Into<Bson>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
        unique: bool,
    ) -> Self {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.push(field, doc! { "$each": values }, unique)
    }

    /// Removes every occurrence of `value` from the array `field`. A document value
    /// removes the elements matching it as a filter.
    ///
    /// Repeated value pulls of one field are merged into a single `$in`; a filter
    /// cannot be merged with anything else and is rejected at compilation.
    pub fn pull(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        let field = field.into();
        let value = value.into();
        let value = match self.pull.remove(&field) {
            Some(previous) => match (pulled_values(&previous), pulled_values(&value)) {
                (Some(mut values), Some(more)) => {
                    values.extend(more);
                    Bson::Document(doc! { "$in": values })
                }
                _ => {
                    self.note_conflict(format!("pull conditions on {field} cannot be combined"));
                    previous
                }
            },
            None => value,
        };
        self.pull.insert(field, value);
        self
    }

    pub fn pull_each<V: Into<Bson>>(self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.pull(field, doc! { "$in": values })
    }

    /// Pushes several fields at once. Array values are appended element-wise.
    pub fn push_fields(self, fields: Document, unique: bool) -> Self {
        fields.into_iter().fold(self, |update, (field, value)| match value {
            Bson::Array(values) => update.push_each(field, values, unique),
            value => update.push(field, value, unique),
        })
    }

    /// Pulls several fields at once. Array values remove each of their elements.
    pub fn pull_fields(self, fields: Document) -> Self {
        fields.into_iter().fold(self, |update, (field, value)| match value {
            Bson::Array(values) => update.pull_each(field, values),
            value => update.pull(field, value),
        })
    }

    fn note_conflict(&mut self, message: String) {
        self.conflict.get_or_insert(message);
    }

    pub fn is_empty(&self) -> bool {
        self.sections().all(|(_, section)| section.is_empty())
    }

    fn sections(&self) -> impl Iterator<Item = (&'static str, &Document)> {
        [
            ("$set", &self.set),
            ("$unset", &self.unset),
            ("$inc", &self.inc),
            ("$push", &self.push),
            ("$pull", &self.pull),
            ("$addToSet", &self.add_to_set),
        ]
        .into_iter()
    }

    /// Renders the non-empty sections.
    pub fn to_document(&self) -> Document {
        self.sections()
            .filter(|(_, section)| !section.is_empty())
            .map(|(operator, section)| (operator.to_string(), Bson::Document(section.clone())))
            .collect()
    }

    fn validate(&self) -> DocumentStoreResult<()> {
        if let Some(conflict) = &self.conflict {
            return Err(DocumentStoreError::invalid_operand("update", conflict.clone()));
        }
        if self.is_empty() {
            return Err(DocumentStoreError::invalid_operand("update", "no changes to apply"));
        }
        for (field, amount) in &self.inc {
            if !matches!(amount, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) {
                return Err(DocumentStoreError::invalid_operand(
                    "increment",
                    format!("{field} must be incremented by a number, got {amount}"),
                ));
            }
        }
        Ok(())
    }

    fn cast(&self, casts: &CastRegistry) -> DocumentStoreResult<Self> {
        let mut update = self.clone();
        update.set = self
            .set
            .iter()
            .map(|(field, value)| -> DocumentStoreResult<(String, Bson)> {
                Ok((field.clone(), casts.to_storage(field, value.clone())?))
            })
            .collect::<DocumentStoreResult<Document>>()?;
        Ok(update)
    }
}

fn negate(amount: Bson) -> Bson {
    match amount {
        Bson::Int32(value) => value.checked_neg().map_or(Bson::Int64(-i64::from(value)), Bson::Int32),
        Bson::Int64(value) => Bson::Int64(value.saturating_neg()),
        Bson::Double(value) => Bson::Double(-value),
        other => other,
    }
}

/// Sums two increment amounts, widening `Int32` on overflow. `None` when either
/// side is not a plain number.
fn add(left: &Bson, right: &Bson) -> Option<Bson> {
    let total = match (left, right) {
        (Bson::Int32(left), Bson::Int32(right)) => left
            .checked_add(*right)
            .map_or(Bson::Int64(i64::from(*left) + i64::from(*right)), Bson::Int32),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            Bson::Int64(integer(left)?.saturating_add(integer(right)?))
        }
        (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_), Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => {
            Bson::Double(float(left)? + float(right)?)
        }
        _ => return None,
    };
    Some(total)
}

fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        _ => None,
    }
}

fn float(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(value) => Some(*value),
        other => integer(other).map(|value| value as f64),
    }
}

/// The values a `$push`/`$addToSet` entry appends.
fn each(value: Bson) -> Vec<Bson> {
    match value {
        Bson::Document(mut modifier) if modifier.len() == 1 && modifier.contains_key("$each") => {
            match modifier.remove("$each") {
                Some(Bson::Array(values)) => values,
                Some(other) => vec![other],
                None => Vec::new(),
            }
        }
        value => vec![value],
    }
}

/// The values a `$pull` entry removes, or `None` when it is a filter.
fn pulled_values(value: &Bson) -> Option<Vec<Bson>> {
    match value {
        Bson::Document(condition) => match condition.get("$in") {
            Some(Bson::Array(values)) if condition.len() == 1 => Some(values.clone()),
            _ => None,
        },
        value => Some(vec![value.clone()]),
    }
}

/// Conjoins filter parts, skipping empty ones.
fn conjoin(parts: Vec<Document>) -> Document {
    let mut parts: Vec<Document> = parts.into_iter().filter(|part| !part.is_empty()).collect();
    match parts.len() {
        0 => Document::new(),
        1 => parts.pop().unwrap_or_default(),
        _ => doc! { "$and": parts },
    }
}

impl Query {
    fn key_filter(&self, id: Option<Bson>) -> DocumentStoreResult<Option<Document>> {
        let Some(id) = id else { return Ok(None) };
        let key = self.casts().map_or("_id", CastRegistry::key_name);
        let id = match self.casts() {
            Some(casts) => casts.to_query_value(key, id)?,
            None => id,
        };
        Ok(Some(doc! { key: id }))
    }

    /// Compiles an update of the documents this query matches.
    ///
    /// `id` narrows the update to one primary key on top of the query's filter.
    /// Every incremented field is guarded so that documents holding an explicit
    /// `null` in it are left untouched. A query limited to one document, or an
    /// explicit `id`, updates a single document.
    pub fn to_update_mql(&self, update: &Update, options: UpdateOptions, id: Option<Bson>) -> DocumentStoreResult<Command> {
        self.ensure_supported()?;
        update.validate()?;

        let update = match self.casts() {
            Some(casts) => update.cast(casts)?,
            None => update.clone(),
        };

        let single = self.limit == Some(1) || id.is_some();
        let mut parts = vec![self.compile_filter()?];
        parts.extend(self.key_filter(id)?);
        parts.extend(update.inc.keys().map(|field| {
            doc! { "$or": [{ field.as_str(): { "$exists": false } }, { field.as_str(): { "$ne": null } }] }
        }));

        Ok(Command::Update {
            filter: conjoin(parts),
            update: update.to_document(),
            options: UpdateOptions { upsert: options.upsert, multi: options.multi && !single },
        })
    }

    /// Compiles a deletion of the documents this query matches.
    pub fn to_delete_mql(&self, id: Option<Bson>) -> DocumentStoreResult<Command> {
        self.ensure_supported()?;

        let single = self.limit == Some(1) || id.is_some();
        let mut parts = vec![self.compile_filter()?];
        parts.extend(self.key_filter(id)?);

        Ok(Command::Delete {
            filter: conjoin(parts),
            options: DeleteOptions { multi: !single },
        })
    }
}

/// Compiles an insert, applying the casts to every document and dropping null `_id`s.
pub fn to_insert_mql(documents: Vec<Document>, casts: Option<&CastRegistry>) -> DocumentStoreResult<Command> {
    let documents = documents
        .into_iter()
        .map(|document| -> DocumentStoreResult<Document> {
            let mut document = match casts {
                Some(casts) => casts.document_to_storage(document)?,
                None => document,
            };
            if matches!(document.get("_id"), Some(Bson::Null)) {
                document.remove("_id");
            }
            Ok(document)
        })
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    Ok(Command::Insert { documents })
}
