//! Storage backend abstraction for the query layer.
//!
//! A backend executes the native commands produced by the compiler: `find`,
//! `aggregate`, `update`, `delete` and `insert`, plus collection administration.
//! It receives already translated filters and pipelines and never sees a
//! [`Query`](crate::query::Query).
//!
//! [`StoreBackendBuilder`] covers backends that connect before first use.
//!
//! # Examples
//!
//! ```ignore
//! use docquery::{backend::{StoreBackend, StoreBackendBuilder}, memory::InMemoryStore};
//! use bson::doc;
//!
//! let backend = InMemoryStore::builder().build().await?;
//! let ids = backend.insert("items", vec![doc! { "name": "knife" }]).await?;
//! let rows = backend.find("items", doc! { "name": "knife" }, Default::default()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;
use tracing::debug;

use crate::{
    command::{AggregateOptions, Command, DeleteOptions, FindOptions, UpdateOptions},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// The result of an update command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
    /// The key of the document inserted by an upsert.
    pub upserted_id: Option<Bson>,
}

/// The result of executing any [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Documents(Vec<Document>),
    Updated(UpdateOutcome),
    Deleted(u64),
    Inserted(Vec<Bson>),
}

impl CommandOutcome {
    fn kind(&self) -> &'static str {
        match self {
            CommandOutcome::Documents(_) => "documents",
            CommandOutcome::Updated(_) => "update outcome",
            CommandOutcome::Deleted(_) => "delete count",
            CommandOutcome::Inserted(_) => "inserted ids",
        }
    }

    fn mismatch(&self, expected: &str) -> DocumentStoreError {
        DocumentStoreError::Backend(format!("expected {expected}, got {}", self.kind()))
    }

    pub fn into_documents(self) -> DocumentStoreResult<Vec<Document>> {
        match self {
            CommandOutcome::Documents(documents) => Ok(documents),
            other => Err(other.mismatch("documents")),
        }
    }

    pub fn into_update(self) -> DocumentStoreResult<UpdateOutcome> {
        match self {
            CommandOutcome::Updated(outcome) => Ok(outcome),
            other => Err(other.mismatch("update outcome")),
        }
    }

    pub fn into_deleted(self) -> DocumentStoreResult<u64> {
        match self {
            CommandOutcome::Deleted(count) => Ok(count),
            other => Err(other.mismatch("delete count")),
        }
    }

    pub fn into_inserted(self) -> DocumentStoreResult<Vec<Bson>> {
        match self {
            CommandOutcome::Inserted(ids) => Ok(ids),
            other => Err(other.mismatch("inserted ids")),
        }
    }
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model is implementation-specific.
///
/// # Error Handling
///
/// Driver and engine failures are reported as
/// [`DocumentStoreError::Backend`] with the underlying message.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns the documents of `collection` matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to read. A missing collection is empty.
    /// * `filter` - A native filter document
    /// * `options` - Sort, skip, limit, projection, hint, time limit and comment
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Runs an aggregation pipeline over `collection`.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Applies `update` to the documents matching `filter`.
    ///
    /// With `options.upsert` and no match, a document is built from the equality
    /// fields of the filter, updated and inserted.
    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Deletes the documents matching `filter` and returns how many were removed.
    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        options: DeleteOptions,
    ) -> DocumentStoreResult<u64>;

    /// Inserts documents, generating an `_id` for those without one. Returns the
    /// keys in insertion order.
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>>;

    /// Drops a collection and all its documents. Dropping a missing collection is a no-op.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists the names of all collections.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Executes a compiled command.
    async fn execute(&self, collection: &str, command: Command) -> DocumentStoreResult<CommandOutcome> {
        debug!(collection, command = command.name(), "executing command");

        match command {
            Command::Find { filter, options } => {
                Ok(CommandOutcome::Documents(self.find(collection, filter, options).await?))
            }
            Command::Aggregate { pipeline, options } => {
                Ok(CommandOutcome::Documents(self.aggregate(collection, pipeline, options).await?))
            }
            Command::Update { filter, update, options } => {
                Ok(CommandOutcome::Updated(self.update(collection, filter, update, options).await?))
            }
            Command::Delete { filter, options } => {
                Ok(CommandOutcome::Deleted(self.delete(collection, filter, options).await?))
            }
            Command::Insert { documents } => {
                Ok(CommandOutcome::Inserted(self.insert(collection, documents).await?))
            }
        }
    }

    /// Shuts down the backend and releases its resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        (**self).find(collection, filter, options).await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        (**self).aggregate(collection, pipeline, options).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        (**self).update(collection, filter, update, options).await
    }

    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        options: DeleteOptions,
    ) -> DocumentStoreResult<u64> {
        (**self).delete(collection, filter, options).await
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        (**self).insert(collection, documents).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (**self).drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (**self).list_collections().await
    }
}

/// Factory for backends that need asynchronous setup such as connecting.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_unwrap_only_their_own_kind() {
        assert_eq!(CommandOutcome::Deleted(2).into_deleted().unwrap(), 2);
        assert!(matches!(
            CommandOutcome::Deleted(2).into_documents(),
            Err(DocumentStoreError::Backend(_))
        ));
    }
}
