//! In-memory storage implementation for document stores.
//!
//! This module provides a simple but complete in-memory backend that stores
//! documents per collection in insertion order behind an async-safe read-write lock,
//! and executes native filters, pipelines and update documents against them.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use tracing::{debug, trace, warn};

use docquery_core::{
    backend::{StoreBackend, StoreBackendBuilder, UpdateOutcome},
    command::{AggregateOptions, DeleteOptions, FindOptions, UpdateOptions},
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::{
    evaluator::{compare, matches},
    pipeline, update,
};

type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional
/// document store that operates entirely in memory using async-aware read-write locks.
/// Documents keep their insertion order, which is the natural order reported by a
/// `{"$natural": 1}` hint.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing). Index hints other than
/// `$natural` are accepted and ignored.
///
/// # Example
///
/// ```ignore
/// use docquery_memory::InMemoryStore;
/// use docquery::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store.insert("users", vec![doc! { "name": "Alice", "age": 30 }]).await?;
///
/// let docs = store.find("users", doc! { "age": { "$gt": 18 } }, Default::default()).await?;
/// assert_eq!(docs.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// The main storage map: collection_name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use docquery_memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::builder().build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

/// Whether a hint asks for reverse natural order. Index hints have nothing to
/// select here and are ignored.
fn natural_reversed(collection: &str, hint: Option<&Bson>) -> bool {
    let natural = match hint {
        None => return false,
        Some(Bson::Document(hint)) => hint.get("$natural"),
        Some(_) => None,
    };
    match natural {
        Some(Bson::Int32(direction)) => *direction < 0,
        Some(Bson::Int64(direction)) => *direction < 0,
        Some(Bson::Double(direction)) => *direction < 0.0,
        _ => {
            warn!(collection, hint = ?hint, "ignoring index hint");
            false
        }
    }
}

fn filtered(documents: &[Document], filter: &Document) -> DocumentStoreResult<Vec<Document>> {
    let mut found = Vec::new();
    for document in documents {
        if matches(document, filter)? {
            found.push(document.clone());
        }
    }
    Ok(found)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        trace!(collection, %filter, "find");

        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut found = filtered(documents, &filter)?;
        drop(store);

        if natural_reversed(collection, options.hint.as_ref()) {
            found.reverse();
        }
        if let Some(sort) = &options.sort {
            pipeline::sort(&mut found, sort);
        }

        let skip = usize::try_from(options.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = match options.limit {
            Some(limit) if limit != 0 => usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX),
            _ => usize::MAX,
        };

        found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| match &options.projection {
                Some(projection) => pipeline::project(&document, projection),
                None => Ok(document),
            })
            .collect()
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        trace!(collection, stages = pipeline.len(), "aggregate");

        let mut documents = self
            .store
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default();

        if natural_reversed(collection, options.hint.as_ref()) {
            documents.reverse();
        }

        pipeline::run(documents, &pipeline)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        let mut targets = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            if matches(document, &filter)? {
                targets.push(index);
                if !options.multi {
                    break;
                }
            }
        }

        let mut outcome = UpdateOutcome {
            matched: targets.len() as u64,
            ..UpdateOutcome::default()
        };

        // nothing is written unless every target applies cleanly
        let mut staged = Vec::with_capacity(targets.len());
        for index in targets {
            let mut document = documents[index].clone();
            if update::apply(&mut document, &update)? {
                staged.push((index, document));
            }
        }
        outcome.modified = staged.len() as u64;
        for (index, document) in staged {
            documents[index] = document;
        }

        if outcome.matched == 0 && options.upsert {
            let mut document = update::upsert_base(&filter)?;
            update::apply(&mut document, &update)?;
            let (id, document) = update::with_id(document);
            if documents.iter().any(|existing| existing.get("_id") == Some(&id)) {
                return Err(duplicate_key(collection, &id));
            }
            documents.push(document);
            outcome.upserted_id = Some(id);
        }

        debug!(
            collection,
            matched = outcome.matched,
            modified = outcome.modified,
            upserted = outcome.upserted_id.is_some(),
            "updated documents"
        );

        Ok(outcome)
    }

    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        options: DeleteOptions,
    ) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let mut removed = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            if matches(document, &filter)? {
                removed.push(index);
                if !options.multi {
                    break;
                }
            }
        }

        for index in removed.iter().rev() {
            documents.remove(*index);
        }

        debug!(collection, deleted = removed.len(), "deleted documents");

        Ok(removed.len() as u64)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let stored = store.entry(collection.to_string()).or_default();

        let mut prepared: Vec<(Bson, Document)> = Vec::with_capacity(documents.len());
        for document in documents {
            let (id, document) = update::with_id(document);
            let taken = stored.iter().any(|existing| existing.get("_id").is_some_and(|key| compare(key, &id).is_eq()))
                || prepared.iter().any(|(key, _)| compare(key, &id).is_eq());
            if taken {
                return Err(duplicate_key(collection, &id));
            }
            prepared.push((id, document));
        }

        debug!(collection, inserted = prepared.len(), "inserted documents");

        Ok(prepared
            .into_iter()
            .map(|(id, document)| {
                stored.push(document);
                id
            })
            .collect())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.store.write().await.remove(name);

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names: Vec<String> = self.store.read().await.keys().cloned().collect();
        names.sort();

        Ok(names)
    }
}

fn duplicate_key(collection: &str, id: &Bson) -> DocumentStoreError {
    DocumentStoreError::Backend(format!(
        "E11000 duplicate key error collection: {collection} index: _id_ dup key: {{ _id: {id} }}"
    ))
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docquery_memory::InMemoryStore;
/// use docquery::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::builder().build().await.unwrap();
        store
            .insert(
                "items",
                vec![
                    doc! { "_id": 1, "name": "knife", "amount": 34 },
                    doc! { "_id": 2, "name": "fork", "amount": 20 },
                    doc! { "_id": 3, "name": "spoon", "amount": 3 },
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn find_applies_options() {
        let store = seeded().await;
        let rows = store
            .find(
                "items",
                doc! { "amount": { "$gt": 5 } },
                FindOptions {
                    sort: Some(doc! { "amount": 1 }),
                    projection: Some(doc! { "name": true }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(rows, vec![doc! { "_id": 2, "name": "fork" }, doc! { "_id": 1, "name": "knife" }]);
    }

    #[tokio::test]
    async fn natural_hint_reverses_insertion_order() {
        let store = seeded().await;
        let rows = store
            .find(
                "items",
                doc! {},
                FindOptions {
                    hint: Some(Bson::Document(doc! { "$natural": -1 })),
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(rows[0].get_str("name").unwrap(), "spoon");
    }

    #[tokio::test]
    async fn missing_collections_read_as_empty() {
        let store = InMemoryStore::new();
        assert!(store.find("nothing", doc! {}, FindOptions::default()).await.unwrap().is_empty());
        assert_eq!(store.delete("nothing", doc! {}, DeleteOptions::default()).await.unwrap(), 0);
        store.drop_collection("nothing").await.unwrap();
    }

    #[tokio::test]
    async fn update_counts_matched_and_modified() {
        let store = seeded().await;
        let outcome = store
            .update(
                "items",
                doc! { "amount": { "$lt": 30 } },
                doc! { "$set": { "name": "fork" } },
                UpdateOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.modified, 1);
    }

    #[tokio::test]
    async fn upsert_inserts_from_filter_equalities() {
        let store = seeded().await;
        let outcome = store
            .update(
                "items",
                doc! { "name": "plate" },
                doc! { "$set": { "amount": 1 } },
                UpdateOptions::upsert(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome.upserted_id, Some(Bson::ObjectId(_))));
        let rows = store.find("items", doc! { "name": "plate" }, FindOptions::default()).await.unwrap();
        assert_eq!(rows[0].get_i32("amount").unwrap(), 1);
    }

    #[tokio::test]
    async fn single_delete_removes_first_match() {
        let store = seeded().await;
        let deleted = store
            .delete("items", doc! { "amount": { "$gt": 1 } }, DeleteOptions { multi: false })
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.find("items", doc! {}, FindOptions::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = seeded().await;
        let result = store.insert("items", vec![doc! { "_id": 1, "name": "again" }]).await;

        assert!(matches!(result, Err(DocumentStoreError::Backend(message)) if message.contains("E11000")));
        assert_eq!(store.list_collections().await.unwrap(), vec!["items".to_string()]);
    }

    #[tokio::test]
    async fn unordered_ids_are_told_apart() {
        let store = InMemoryStore::new();
        let first = bson::Timestamp { time: 1, increment: 1 };
        let second = bson::Timestamp { time: 1, increment: 2 };

        store
            .insert("events", vec![doc! { "_id": first }, doc! { "_id": second }])
            .await
            .unwrap();
        let result = store.insert("events", vec![doc! { "_id": second }]).await;

        assert!(matches!(result, Err(DocumentStoreError::Backend(_))));
        assert_eq!(store.find("events", doc! { "_id": first }, Default::default()).await.unwrap().len(), 1);
    }
}
