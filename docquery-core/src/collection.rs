//! Collection types for running queries against a backend.
//!
//! # Collection Types
//!
//! - [`Collection`] - Untyped collection returning BSON documents
//! - [`ModelCollection`] - Collection of a [`Model`], applying its casts on the way in
//!   and materializing models on the way out
//!
//! # Example
//!
//! ```ignore
//! # async fn example(store: &docquery::store::DocumentStore<impl docquery::backend::StoreBackend>) -> docquery::error::DocumentStoreResult<()> {
//! let items = store.collection("items");
//! items.insert(vec![doc! { "name": "knife", "amount": 34 }]).await?;
//!
//! let query = items.query().where_eq("name", "knife").build();
//! let total = items.sum(&query, "amount").await?;
//! # Ok(()) }
//! ```

use bson::{Bson, Document};
use std::{marker::PhantomData, sync::Arc};

use crate::{
    backend::{StoreBackend, UpdateOutcome},
    cast::CastRegistry,
    command::UpdateOptions,
    error::{DocumentStoreError, DocumentStoreResult},
    mapper::ResultMapper,
    model::{Model, ModelExt},
    mutation::{Update, to_insert_mql},
    page::{Page, PaginationParams},
    query::{AggregateFunction, Query, QueryBuilder},
};

/// A named collection with a reference to a storage backend.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the backend reference
/// * `B` - The storage backend type
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
    casts: Option<Arc<CastRegistry>>,
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    /// Creates a new collection reference (internal use).
    pub(crate) fn new(name: String, backend: &'a B) -> Self {
        Self { name, backend, casts: None }
    }

    /// Binds a cast registry. Queries executed through this collection without casts
    /// of their own use it.
    pub fn with_casts(mut self, casts: Arc<CastRegistry>) -> Self {
        self.casts = Some(casts);
        self
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn casts(&self) -> Option<&CastRegistry> {
        self.casts.as_deref()
    }

    /// Starts a query bound to this collection's casts.
    pub fn query(&self) -> QueryBuilder {
        match &self.casts {
            Some(casts) => QueryBuilder::new().with_casts(Arc::clone(casts)),
            None => QueryBuilder::new(),
        }
    }

    fn key_name(&self) -> &str {
        self.casts().map_or("_id", CastRegistry::key_name)
    }

    fn bind(&self, query: &Query) -> Query {
        let mut query = query.clone();
        if query.casts.is_none() {
            query.casts = self.casts.clone();
        }
        query
    }

    fn by_key(&self, id: Bson) -> Query {
        self.query().where_eq(self.key_name(), id).limit(1).build()
    }

    async fn rows(&self, query: &Query) -> DocumentStoreResult<Vec<Document>> {
        let query = self.bind(query);
        let grouped = query.is_distinct() || !query.groups().is_empty();

        let rows = self
            .backend
            .execute(&self.name, query.to_mql()?)
            .await?
            .into_documents()?;
        let rows = if grouped {
            rows.into_iter().map(ResultMapper::ungroup).collect()
        } else {
            rows
        };

        ResultMapper::new(query.casts()).rows(rows)
    }

    /// Executes `query` and returns the matching documents in application encoding.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`] if the query does not compile or the backend fails.
    pub async fn get(&self, query: &Query) -> DocumentStoreResult<Vec<Document>> {
        self.rows(query).await
    }

    /// Returns the first document matching `query`.
    pub async fn first(&self, query: &Query) -> DocumentStoreResult<Option<Document>> {
        let query = query.clone().into_builder().limit(1).build();
        Ok(self.rows(&query).await?.into_iter().next())
    }

    /// Looks a document up by primary key.
    pub async fn find(&self, id: impl Into<Bson>) -> DocumentStoreResult<Option<Document>> {
        Ok(self.rows(&self.by_key(id.into())).await?.into_iter().next())
    }

    /// Looks a document up by primary key, failing with
    /// [`DocumentStoreError::DocumentNotFound`] when it does not exist.
    pub async fn find_or_fail(&self, id: impl Into<Bson>) -> DocumentStoreResult<Document> {
        let id = id.into();
        match self.find(id.clone()).await? {
            Some(document) => Ok(document),
            None => Err(DocumentStoreError::DocumentNotFound {
                collection: self.name.clone(),
                id: match id {
                    Bson::String(id) => id,
                    other => other.to_string(),
                },
            }),
        }
    }

    /// The value at `path` in the first matching document.
    pub async fn value(&self, query: &Query, path: &str) -> DocumentStoreResult<Option<Bson>> {
        let first = self.first(query).await?;
        Ok(first.and_then(|row| ResultMapper::value(&[row], path)))
    }

    /// The value at `path` in every matching document.
    pub async fn pluck(&self, query: &Query, path: &str) -> DocumentStoreResult<Vec<Bson>> {
        Ok(ResultMapper::pluck(&self.rows(query).await?, path))
    }

    /// The value at `path` keyed by the stringified value at `key`. Later documents
    /// win on duplicate keys.
    pub async fn pluck_keyed(&self, query: &Query, path: &str, key: &str) -> DocumentStoreResult<Document> {
        Ok(ResultMapper::pluck_keyed(&self.rows(query).await?, path, key))
    }

    /// The distinct values of `field` among the matching documents.
    pub async fn distinct(&self, query: &Query, field: &str) -> DocumentStoreResult<Vec<Bson>> {
        let query = query.clone().into_builder().distinct_on(field).build();
        Ok(ResultMapper::pluck(&self.rows(&query).await?, field))
    }

    /// Computes an aggregate over the matching documents. Returns `Null` when
    /// nothing matched.
    pub async fn aggregate(
        &self,
        query: &Query,
        function: AggregateFunction,
        field: Option<&str>,
    ) -> DocumentStoreResult<Bson> {
        let command = self.bind(query).to_aggregate_mql(function, field)?;
        let rows = self.backend.execute(&self.name, command).await?.into_documents()?;

        Ok(match function {
            AggregateFunction::Count => Bson::Int64(i64::try_from(ResultMapper::count(&rows)).unwrap_or(i64::MAX)),
            _ => ResultMapper::aggregate(&rows),
        })
    }

    pub async fn count(&self, query: &Query) -> DocumentStoreResult<u64> {
        let command = self.bind(query).to_aggregate_mql(AggregateFunction::Count, None)?;
        let rows = self.backend.execute(&self.name, command).await?.into_documents()?;
        Ok(ResultMapper::count(&rows))
    }

    /// Sums the values at `path`, which may contain a `*` segment.
    pub async fn sum(&self, query: &Query, path: &str) -> DocumentStoreResult<Bson> {
        self.aggregate(query, AggregateFunction::Sum, Some(path)).await
    }

    pub async fn avg(&self, query: &Query, path: &str) -> DocumentStoreResult<Bson> {
        self.aggregate(query, AggregateFunction::Avg, Some(path)).await
    }

    pub async fn min(&self, query: &Query, path: &str) -> DocumentStoreResult<Bson> {
        self.aggregate(query, AggregateFunction::Min, Some(path)).await
    }

    pub async fn max(&self, query: &Query, path: &str) -> DocumentStoreResult<Bson> {
        self.aggregate(query, AggregateFunction::Max, Some(path)).await
    }

    pub async fn exists(&self, query: &Query) -> DocumentStoreResult<bool> {
        Ok(self.count(query).await? > 0)
    }

    /// Returns one page of the matching documents along with the total count. A page
    /// size of zero reads as one.
    pub async fn paginate(&self, query: &Query, params: &PaginationParams) -> DocumentStoreResult<Page<Document>> {
        let params = &PaginationParams::new(params.page, params.per_page.max(1));
        let count = usize::try_from(self.count(query).await?).unwrap_or(usize::MAX);
        let page = i64::try_from(params.page).unwrap_or(i64::MAX);
        let per_page = i64::try_from(params.per_page).unwrap_or(i64::MAX);

        let query = query.clone().into_builder().for_page(page, per_page).build();
        Ok(Page::for_params(self.rows(&query).await?, count, params))
    }

    /// Inserts documents and returns their keys.
    pub async fn insert(&self, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let command = to_insert_mql(documents, self.casts())?;
        let ids = self.backend.execute(&self.name, command).await?.into_inserted()?;

        match self.casts() {
            Some(casts) => ids
                .into_iter()
                .map(|id| casts.from_storage(casts.key_name(), id))
                .collect(),
            None => Ok(ids),
        }
    }

    /// Inserts one document and returns its key.
    pub async fn insert_get_id(&self, document: Document) -> DocumentStoreResult<Bson> {
        let ids = self.insert(vec![document]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| DocumentStoreError::Backend("insert returned no key".to_string()))
    }

    /// Applies an [`Update`] to the matching documents.
    pub async fn apply(&self, query: &Query, update: &Update, options: UpdateOptions) -> DocumentStoreResult<UpdateOutcome> {
        let command = self.bind(query).to_update_mql(update, options, None)?;
        self.backend.execute(&self.name, command).await?.into_update()
    }

    /// Applies an update to the document with primary key `id`.
    pub async fn apply_to(&self, id: impl Into<Bson>, update: &Update, options: UpdateOptions) -> DocumentStoreResult<UpdateOutcome> {
        let command = self.bind(&Query::new()).to_update_mql(update, options, Some(id.into()))?;
        self.backend.execute(&self.name, command).await?.into_update()
    }

    /// Sets `values` on the matching documents and returns how many changed.
    /// `values` may also be a document of update operators.
    pub async fn update(&self, query: &Query, values: Document) -> DocumentStoreResult<u64> {
        let update = Update::from_document(values)?;
        Ok(self.apply(query, &update, UpdateOptions::default()).await?.modified)
    }

    /// Sets `values` on the matching documents, inserting one when nothing matches.
    pub async fn upsert(&self, query: &Query, values: Document) -> DocumentStoreResult<UpdateOutcome> {
        let update = Update::from_document(values)?;
        self.apply(query, &update, UpdateOptions::upsert()).await
    }

    /// Increments `field`. Documents holding an explicit `null` in it are skipped;
    /// documents missing it start from zero.
    pub async fn increment(&self, query: &Query, field: &str, amount: impl Into<Bson>) -> DocumentStoreResult<u64> {
        let update = Update::new().increment(field, amount);
        Ok(self.apply(query, &update, UpdateOptions::default()).await?.modified)
    }

    pub async fn decrement(&self, query: &Query, field: &str, amount: impl Into<Bson>) -> DocumentStoreResult<u64> {
        let update = Update::new().decrement(field, amount);
        Ok(self.apply(query, &update, UpdateOptions::default()).await?.modified)
    }

    /// Appends `value` to the array `field`; with `unique` only when absent.
    pub async fn push(&self, query: &Query, field: &str, value: impl Into<Bson>, unique: bool) -> DocumentStoreResult<u64> {
        let update = Update::new().push(field, value, unique);
        Ok(self.apply(query, &update, UpdateOptions::default()).await?.modified)
    }

    /// Removes `value` from the array `field`.
    pub async fn pull(&self, query: &Query, field: &str, value: impl Into<Bson>) -> DocumentStoreResult<u64> {
        let update = Update::new().pull(field, value);
        Ok(self.apply(query, &update, UpdateOptions::default()).await?.modified)
    }

    /// Removes fields from the matching documents.
    pub async fn unset<F: Into<String>>(&self, query: &Query, fields: impl IntoIterator<Item = F>) -> DocumentStoreResult<u64> {
        let update = fields.into_iter().fold(Update::new(), |update, field| update.unset(field));
        Ok(self.apply(query, &update, UpdateOptions::default()).await?.modified)
    }

    /// Deletes the matching documents and returns how many were removed.
    pub async fn delete(&self, query: &Query) -> DocumentStoreResult<u64> {
        let command = self.bind(query).to_delete_mql(None)?;
        self.backend.execute(&self.name, command).await?.into_deleted()
    }

    /// Deletes the document with primary key `id`.
    pub async fn delete_id(&self, id: impl Into<Bson>) -> DocumentStoreResult<u64> {
        let command = self.bind(&Query::new()).to_delete_mql(Some(id.into()))?;
        self.backend.execute(&self.name, command).await?.into_deleted()
    }

    /// Deletes every document of the collection.
    pub async fn truncate(&self) -> DocumentStoreResult<u64> {
        self.delete(&Query::new()).await
    }
}

/// A collection of [`Model`] values.
///
/// Writes serialize the model and apply its casts; reads reverse the casts and
/// deserialize.
#[derive(Debug)]
pub struct ModelCollection<'a, B: StoreBackend, M: Model> {
    inner: Collection<'a, B>,
    _marker: PhantomData<M>,
}

impl<'a, B: StoreBackend, M: Model> ModelCollection<'a, B, M> {
    pub(crate) fn new(backend: &'a B) -> Self {
        let inner = Collection::new(M::collection_name().to_string(), backend)
            .with_casts(Arc::new(M::cast_registry()));
        Self { inner, _marker: PhantomData }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The untyped view of this collection, for aggregates and raw writes.
    pub fn untyped(&self) -> &Collection<'a, B> {
        &self.inner
    }

    /// Starts a query bound to the model's casts.
    pub fn query(&self) -> QueryBuilder {
        self.inner.query()
    }

    fn models(&self, rows: Vec<Document>) -> DocumentStoreResult<Vec<M>> {
        rows.into_iter().map(M::from_row).collect()
    }

    pub async fn get(&self, query: &Query) -> DocumentStoreResult<Vec<M>> {
        self.models(self.inner.get(query).await?)
    }

    pub async fn first(&self, query: &Query) -> DocumentStoreResult<Option<M>> {
        self.inner.first(query).await?.map(M::from_row).transpose()
    }

    pub async fn find(&self, id: impl Into<Bson>) -> DocumentStoreResult<Option<M>> {
        self.inner.find(id).await?.map(M::from_row).transpose()
    }

    pub async fn find_or_fail(&self, id: impl Into<Bson>) -> DocumentStoreResult<M> {
        M::from_row(self.inner.find_or_fail(id).await?)
    }

    pub async fn count(&self, query: &Query) -> DocumentStoreResult<u64> {
        self.inner.count(query).await
    }

    pub async fn paginate(&self, query: &Query, params: &PaginationParams) -> DocumentStoreResult<Page<M>> {
        self.inner
            .paginate(query, params)
            .await?
            .try_map(|rows| self.models(rows))
    }

    /// Inserts models and returns their keys.
    pub async fn insert(&self, models: &[M]) -> DocumentStoreResult<Vec<Bson>> {
        let rows = models.iter().map(M::to_row).collect::<DocumentStoreResult<Vec<_>>>()?;
        self.inner.insert(rows).await
    }

    pub async fn insert_get_id(&self, model: &M) -> DocumentStoreResult<Bson> {
        self.inner.insert_get_id(model.to_row()?).await
    }

    /// Stores a model: inserted when its key is unset, otherwise its fields are
    /// written to the document with that key, creating it if needed. Returns the key.
    pub async fn save(&self, model: &M) -> DocumentStoreResult<Bson> {
        let mut row = model.to_row()?;
        match row.remove(M::key_name()) {
            Some(Bson::Null) | None => self.inner.insert_get_id(row).await,
            Some(id) => {
                let update = Update::new().set_many(row);
                self.inner.apply_to(id.clone(), &update, UpdateOptions::upsert()).await?;
                Ok(id)
            }
        }
    }

    pub async fn update(&self, query: &Query, values: Document) -> DocumentStoreResult<u64> {
        self.inner.update(query, values).await
    }

    pub async fn delete(&self, query: &Query) -> DocumentStoreResult<u64> {
        self.inner.delete(query).await
    }

    /// Deletes the document holding this model's key.
    pub async fn delete_model(&self, model: &M) -> DocumentStoreResult<u64> {
        let row = model.to_row()?;
        match row.get(M::key_name()) {
            Some(Bson::Null) | None => Ok(0),
            Some(id) => self.inner.delete_id(id.clone()).await,
        }
    }
}
