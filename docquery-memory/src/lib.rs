//! In-memory document storage backend for docquery.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It executes the same native filters, aggregation pipelines and update documents the
//! query compiler sends to a real document store, which makes it suited to development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Native filters** - Comparison, membership, logical, array, regex and type operators
//! - **Aggregation** - `$match`, `$unwind`, `$group`, `$sort`, `$skip`, `$limit`, `$project`
//! - **Updates** - `$set`, `$unset`, `$inc`, `$push`, `$addToSet`, `$pull` and upserts
//!
//! # Quick Start
//!
//! ```ignore
//! use docquery::{store::DocumentStore, query::Query, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!     let items = store.collection("items");
//!
//!     items.insert(vec![doc! { "name": "knife", "amount": 34 }]).await?;
//!     let total = items.sum(&Query::new(), "amount").await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docquery_memory;

mod evaluator;
mod pipeline;
pub mod store;
mod update;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
