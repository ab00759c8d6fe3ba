//! Mapping of raw result rows into application values.

use bson::{Bson, Document};

use crate::{
    cast::CastRegistry,
    error::DocumentStoreResult,
    model::{Model, ModelExt},
    path::AttributePath,
};

/// Applies the read side of the casts to result rows and extracts values from them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultMapper<'a> {
    casts: Option<&'a CastRegistry>,
}

impl<'a> ResultMapper<'a> {
    pub fn new(casts: Option<&'a CastRegistry>) -> Self {
        Self { casts }
    }

    /// Converts one stored row to application encoding.
    pub fn row(&self, row: Document) -> DocumentStoreResult<Document> {
        match self.casts {
            Some(casts) => casts.document_from_storage(row),
            None => Ok(row),
        }
    }

    pub fn rows(&self, rows: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        rows.into_iter().map(|row| self.row(row)).collect()
    }

    /// Materializes a model from a stored row.
    pub fn model<M: Model>(&self, row: Document) -> DocumentStoreResult<M> {
        M::from_row(self.row(row)?)
    }

    pub fn models<M: Model>(&self, rows: Vec<Document>) -> DocumentStoreResult<Vec<M>> {
        rows.into_iter().map(|row| self.model(row)).collect()
    }

    /// Flattens a grouped row: the composite `_id` is dropped and the `$last` columns
    /// stay. A grouped `_id` is lifted back out of the composite key.
    pub fn ungroup(row: Document) -> Document {
        let mut row = row;
        let Some(Bson::Document(key)) = row.get("_id") else {
            return row;
        };

        match key.get("_id").cloned() {
            Some(id) => {
                row.remove("_id");
                let mut flat = Document::new();
                flat.insert("_id", id);
                for (field, value) in row {
                    flat.insert(field, value);
                }
                flat
            }
            None => {
                row.remove("_id");
                row
            }
        }
    }

    /// Reads the `aggregate` value of a scalar aggregate result. No rows means no
    /// value.
    pub fn aggregate(rows: &[Document]) -> Bson {
        rows.first()
            .and_then(|row| row.get("aggregate"))
            .cloned()
            .unwrap_or(Bson::Null)
    }

    /// Reads a count result. No rows counts as zero.
    pub fn count(rows: &[Document]) -> u64 {
        match Self::aggregate(rows) {
            Bson::Int32(count) => u64::try_from(count).unwrap_or(0),
            Bson::Int64(count) => u64::try_from(count).unwrap_or(0),
            Bson::Double(count) if count > 0.0 => count as u64,
            _ => 0,
        }
    }

    /// Resolves `path` in every row; rows where it is missing yield `Null`.
    pub fn pluck(rows: &[Document], path: &str) -> Vec<Bson> {
        let path = AttributePath::parse(path);
        rows.iter()
            .map(|row| path.resolve(row).unwrap_or(Bson::Null))
            .collect()
    }

    /// Resolves `path` keyed by the stringified value of `key`. Later rows win on
    /// duplicate keys.
    pub fn pluck_keyed(rows: &[Document], path: &str, key: &str) -> Document {
        let path = AttributePath::parse(path);
        let key = AttributePath::parse(key);

        let mut plucked = Document::new();
        for row in rows {
            let name = key.resolve(row).map_or_else(String::new, |value| key_string(&value));
            plucked.insert(name, path.resolve(row).unwrap_or(Bson::Null));
        }
        plucked
    }

    /// The value at `path` in the first row.
    pub fn value(rows: &[Document], path: &str) -> Option<Bson> {
        let path = AttributePath::parse(path);
        rows.first().and_then(|row| path.resolve(row))
    }
}

fn key_string(value: &Bson) -> String {
    match value {
        Bson::String(value) => value.clone(),
        Bson::ObjectId(id) => id.to_hex(),
        Bson::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cast::CastKind;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn rows_read_through_the_casts() {
        let casts = CastRegistry::new("Item").with_cast("_id", CastKind::PrimaryKey);
        let id = ObjectId::new();

        let row = ResultMapper::new(Some(&casts)).row(doc! { "_id": id, "name": "knife" }).unwrap();
        assert_eq!(row, doc! { "_id": id.to_hex(), "name": "knife" });
    }

    #[test]
    fn aggregates_default_when_nothing_matched() {
        assert_eq!(ResultMapper::aggregate(&[]), Bson::Null);
        assert_eq!(ResultMapper::count(&[]), 0);
        assert_eq!(ResultMapper::count(&[doc! { "_id": null, "aggregate": 6 }]), 6);
    }

    #[test]
    fn pluck_keyed_last_row_wins() {
        let rows = [
            doc! { "_id": 1, "name": "fork" },
            doc! { "_id": 2, "name": "spoon" },
            doc! { "_id": 1, "name": "knife" },
        ];

        assert_eq!(
            ResultMapper::pluck_keyed(&rows, "name", "_id"),
            doc! { "1": "knife", "2": "spoon" }
        );
        assert_eq!(
            ResultMapper::pluck(&rows, "name"),
            vec![Bson::from("fork"), Bson::from("spoon"), Bson::from("knife")]
        );
    }

    #[test]
    fn ungroup_lifts_a_grouped_key() {
        let row = doc! { "_id": { "_id": 7, "email": "a@b.c" }, "email": "a@b.c" };
        assert_eq!(ResultMapper::ungroup(row), doc! { "_id": 7, "email": "a@b.c" });

        let row = doc! { "_id": { "type": "sharp" }, "type": "sharp" };
        assert_eq!(ResultMapper::ungroup(row), doc! { "type": "sharp" });

        assert_eq!(ResultMapper::ungroup(doc! { "_id": null, "n": 1 }), doc! { "_id": null, "n": 1 });
    }

    #[test]
    fn value_resolves_nested_paths() {
        let rows = [doc! { "author": { "first_name": "John" } }];
        assert_eq!(ResultMapper::value(&rows, "author.first_name"), Some(Bson::from("John")));
        assert_eq!(ResultMapper::value(&rows, "author.last_name"), None);
    }
}
