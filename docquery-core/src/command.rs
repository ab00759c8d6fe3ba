//! Native commands produced by the compiler and executed by backends.
//!
//! A [`Command`] is plain data: the filter or pipeline plus the options the driver
//! needs. [`Command::to_document`] renders it with the native option names (`sort`,
//! `skip`, `limit`, `projection`, `hint`, `maxTimeMS`, `comment`, `upsert`, `multi`)
//! for logging and inspection.

use std::fmt;

use bson::{Bson, Document, doc};

/// Options of a `find` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub projection: Option<Document>,
    pub hint: Option<Bson>,
    pub max_time_ms: Option<u64>,
    pub comment: Option<Bson>,
}

impl FindOptions {
    pub fn to_document(&self) -> Document {
        let mut options = Document::new();
        if let Some(sort) = &self.sort {
            options.insert("sort", sort.clone());
        }
        if let Some(skip) = self.skip {
            options.insert("skip", to_i64(skip));
        }
        if let Some(limit) = self.limit {
            options.insert("limit", limit);
        }
        if let Some(projection) = &self.projection {
            options.insert("projection", projection.clone());
        }
        insert_common(&mut options, &self.hint, self.max_time_ms, &self.comment);
        options
    }
}

/// Options of an `aggregate` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub hint: Option<Bson>,
    pub max_time_ms: Option<u64>,
    pub comment: Option<Bson>,
}

impl AggregateOptions {
    pub fn to_document(&self) -> Document {
        let mut options = Document::new();
        insert_common(&mut options, &self.hint, self.max_time_ms, &self.comment);
        options
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn insert_common(options: &mut Document, hint: &Option<Bson>, max_time_ms: Option<u64>, comment: &Option<Bson>) {
    if let Some(hint) = hint {
        options.insert("hint", hint.clone());
    }
    if let Some(max_time_ms) = max_time_ms {
        options.insert("maxTimeMS", to_i64(max_time_ms));
    }
    if let Some(comment) = comment {
        options.insert("comment", comment.clone());
    }
}

/// Options of an `update` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document built from the filter's equality fields when nothing matches.
    pub upsert: bool,
    /// Update every match instead of the first one.
    pub multi: bool,
}

impl UpdateOptions {
    /// Options for an upsert of every match.
    pub fn upsert() -> Self {
        Self { upsert: true, ..Self::default() }
    }

    /// Options for an update of the first match only.
    pub fn single() -> Self {
        Self { multi: false, ..Self::default() }
    }

    pub fn to_document(&self) -> Document {
        let mut options = Document::new();
        if self.upsert {
            options.insert("upsert", true);
        }
        if self.multi {
            options.insert("multi", true);
        }
        options
    }
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self { upsert: false, multi: true }
    }
}

/// Options of a `delete` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete every match instead of the first one.
    pub multi: bool,
}

impl DeleteOptions {
    pub fn single() -> Self {
        Self { multi: false }
    }

    pub fn to_document(&self) -> Document {
        doc! { "multi": self.multi }
    }
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self { multi: true }
    }
}

/// A compiled, backend-neutral command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Find {
        filter: Document,
        options: FindOptions,
    },
    Aggregate {
        pipeline: Vec<Document>,
        options: AggregateOptions,
    },
    Update {
        filter: Document,
        update: Document,
        options: UpdateOptions,
    },
    Delete {
        filter: Document,
        options: DeleteOptions,
    },
    Insert {
        documents: Vec<Document>,
    },
}

impl Command {
    /// The command kind: `find`, `aggregate`, `update`, `delete` or `insert`.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Find { .. } => "find",
            Command::Aggregate { .. } => "aggregate",
            Command::Update { .. } => "update",
            Command::Delete { .. } => "delete",
            Command::Insert { .. } => "insert",
        }
    }

    /// The filter of a find, update or delete command.
    pub fn filter(&self) -> Option<&Document> {
        match self {
            Command::Find { filter, .. } | Command::Update { filter, .. } | Command::Delete { filter, .. } => {
                Some(filter)
            }
            Command::Aggregate { .. } | Command::Insert { .. } => None,
        }
    }

    pub fn pipeline(&self) -> Option<&[Document]> {
        match self {
            Command::Aggregate { pipeline, .. } => Some(pipeline),
            _ => None,
        }
    }

    /// Renders the command with native key names.
    pub fn to_document(&self) -> Document {
        match self {
            Command::Find { filter, options } => doc! {
                "find": { "filter": filter.clone(), "options": options.to_document() }
            },
            Command::Aggregate { pipeline, options } => doc! {
                "aggregate": { "pipeline": pipeline.clone(), "options": options.to_document() }
            },
            Command::Update { filter, update, options } => doc! {
                "update": {
                    "filter": filter.clone(),
                    "update": update.clone(),
                    "options": options.to_document(),
                }
            },
            Command::Delete { filter, options } => doc! {
                "delete": { "filter": filter.clone(), "options": options.to_document() }
            },
            Command::Insert { documents } => doc! {
                "insert": { "documents": documents.clone() }
            },
        }
    }

    /// Renders the command as relaxed extended JSON.
    pub fn to_json(&self) -> serde_json::Value {
        Bson::Document(self.to_document()).into_relaxed_extjson()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_options_use_native_names() {
        let options = FindOptions {
            sort: Some(doc! { "name": 1 }),
            skip: Some(5),
            limit: Some(10),
            projection: Some(doc! { "name": true }),
            hint: Some(Bson::Document(doc! { "$natural": -1 })),
            max_time_ms: Some(1500),
            comment: Some("listing".into()),
        };

        assert_eq!(
            options.to_document(),
            doc! {
                "sort": { "name": 1 },
                "skip": 5_i64,
                "limit": 10_i64,
                "projection": { "name": true },
                "hint": { "$natural": -1 },
                "maxTimeMS": 1500_i64,
                "comment": "listing",
            }
        );
        assert_eq!(FindOptions::default().to_document(), doc! {});
    }

    #[test]
    fn commands_render_under_their_name() {
        let command = Command::Update {
            filter: doc! { "name": "knife" },
            update: doc! { "$inc": { "amount": 1 } },
            options: UpdateOptions::upsert(),
        };

        assert_eq!(command.name(), "update");
        assert_eq!(
            command.to_document(),
            doc! { "update": {
                "filter": { "name": "knife" },
                "update": { "$inc": { "amount": 1 } },
                "options": { "upsert": true, "multi": true },
            } }
        );
        assert_eq!(command.to_json()["update"]["options"]["upsert"], serde_json::json!(true));
    }
}
