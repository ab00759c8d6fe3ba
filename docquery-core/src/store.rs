//! Entry point tying a backend to collection views.
//!
//! ```ignore
//! use docquery::{memory::InMemoryStore, store::DocumentStore};
//!
//! let store = DocumentStore::connect(InMemoryStore::builder()).await?;
//! let users = store.model::<User>();
//! let items = store.collection("items");
//! ```

use crate::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::{Collection, ModelCollection},
    error::DocumentStoreResult,
    model::Model,
};

/// Owns a backend and hands out [`Collection`] and [`ModelCollection`] views
/// borrowing it.
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend> DocumentStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Builds the backend and wraps it.
    pub async fn connect<T>(builder: T) -> DocumentStoreResult<Self>
    where
        T: StoreBackendBuilder<Backend = B>,
    {
        Ok(Self::new(builder.build().await?))
    }

    /// The backend, for executing compiled commands directly.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The collection named by `M::collection_name()`, with `M`'s casts applied
    /// to operands and rows.
    pub fn model<'a, M: Model>(&'a self) -> ModelCollection<'a, B, M> {
        ModelCollection::new(&self.backend)
    }

    /// An uncast view of the named collection. Collections come into existence
    /// on first insert.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, B> {
        Collection::new(name.to_string(), &self.backend)
    }

    /// Removes the collection and all of its documents. Dropping a missing
    /// collection succeeds.
    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.backend.drop_collection(name).await
    }

    /// Names of the existing collections.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.backend.list_collections().await
    }

    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }
}
