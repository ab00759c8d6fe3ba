use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    options::{AggregateOptions as DriverAggregateOptions, ClientOptions, FindOptions as DriverFindOptions, Hint},
};
use tracing::{debug, trace};

use docquery_core::{
    backend::{StoreBackend, StoreBackendBuilder, UpdateOutcome},
    command::{AggregateOptions, DeleteOptions, FindOptions, UpdateOptions},
    error::{DocumentStoreError, DocumentStoreResult},
};

fn backend_error(err: mongodb::error::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(err.to_string())
}

/// Converts a compiled hint into the driver's: documents name index keys, strings
/// name an index.
fn driver_hint(hint: Option<Bson>) -> DocumentStoreResult<Option<Hint>> {
    match hint {
        None => Ok(None),
        Some(Bson::Document(keys)) => Ok(Some(Hint::Keys(keys))),
        Some(Bson::String(name)) => Ok(Some(Hint::Name(name))),
        Some(other) => Err(DocumentStoreError::InvalidOperand {
            operator: "hint".to_string(),
            message: format!("expected an index name or key document, got {other}"),
        }),
    }
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    default_max_time: Option<Duration>,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self {
            client,
            database,
            default_max_time: None,
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(collection_name)
    }

    fn max_time(&self, max_time_ms: Option<u64>) -> Option<Duration> {
        max_time_ms.map(Duration::from_millis).or(self.default_max_time)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        trace!(collection, %filter, "find");

        let mut driver_options = DriverFindOptions::default();
        driver_options.sort = options.sort;
        driver_options.skip = options.skip;
        driver_options.limit = options.limit;
        driver_options.projection = options.projection;
        driver_options.hint = driver_hint(options.hint)?;
        driver_options.max_time = self.max_time(options.max_time_ms);
        driver_options.comment = options.comment;

        self.get_collection(collection)
            .find(filter)
            .with_options(driver_options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        trace!(collection, stages = pipeline.len(), "aggregate");

        let mut driver_options = DriverAggregateOptions::default();
        driver_options.hint = driver_hint(options.hint)?;
        driver_options.max_time = self.max_time(options.max_time_ms);
        driver_options.comment = options.comment;

        self.get_collection(collection)
            .aggregate(pipeline)
            .with_options(driver_options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let target = self.get_collection(collection);
        let result = if options.multi {
            target.update_many(filter, update).upsert(options.upsert).await
        } else {
            target.update_one(filter, update).upsert(options.upsert).await
        }
        .map_err(backend_error)?;

        debug!(
            collection,
            matched = result.matched_count,
            modified = result.modified_count,
            "updated documents"
        );

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        options: DeleteOptions,
    ) -> DocumentStoreResult<u64> {
        let target = self.get_collection(collection);
        let result = if options.multi {
            target.delete_many(filter).await
        } else {
            target.delete_one(filter).await
        }
        .map_err(backend_error)?;

        debug!(collection, deleted = result.deleted_count, "deleted documents");

        Ok(result.deleted_count)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(vec![]);
        }

        let count = documents.len();
        let mut inserted = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(backend_error)?
            .inserted_ids;

        debug!(collection, inserted = count, "inserted documents");

        (0..count)
            .map(|index| {
                inserted
                    .remove(&index)
                    .ok_or_else(|| DocumentStoreError::Backend(format!("no id reported for document {index}")))
            })
            .collect()
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name).drop().await.map_err(backend_error)?;

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(backend_error)?;
        names.sort();

        Ok(names)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Builder for [`MongoDbStore`].
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use docquery_mongodb::MongoDbStore;
///
/// let store = MongoDbStore::builder("mongodb://localhost:27017", "shop")
///     .app_name("inventory")
///     .default_max_time(Duration::from_secs(5))
///     .build()
///     .await?;
/// ```
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    app_name: Option<String>,
    default_max_time: Option<Duration>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
            default_max_time: None,
        }
    }

    /// Name reported to the server in its logs and profiler.
    pub fn app_name(mut self, app_name: &str) -> Self {
        self.app_name = Some(app_name.to_string());
        self
    }

    /// Time limit applied to reads whose query sets none.
    pub fn default_max_time(mut self, max_time: Duration) -> Self {
        self.default_max_time = Some(max_time);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;
        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }

        let client = Client::with_options(options).map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        Ok(MongoDbStore {
            client,
            database: self.database,
            default_max_time: self.default_max_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn hints_map_to_driver_hints() {
        assert!(matches!(driver_hint(None), Ok(None)));
        assert!(matches!(
            driver_hint(Some(Bson::Document(doc! { "$natural": -1 }))),
            Ok(Some(Hint::Keys(keys))) if keys == doc! { "$natural": -1 }
        ));
        assert!(matches!(
            driver_hint(Some(Bson::String("name_1".into()))),
            Ok(Some(Hint::Name(name))) if name == "name_1"
        ));
        assert!(matches!(
            driver_hint(Some(Bson::Int32(1))),
            Err(DocumentStoreError::InvalidOperand { .. })
        ));
    }
}
