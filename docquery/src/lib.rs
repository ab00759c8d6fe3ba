//! Main docquery crate providing a unified interface for querying document stores.
//!
//! This crate is the primary entry point for users of the docquery framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! convenient access to the storage backends.
//!
//! # Features
//!
//! - **Fluent query building** - `where`, `or_where`, nesting, ordering, paging and grouping
//! - **Native compilation** - Queries compile to filter documents, pipelines and update documents
//! - **Attribute casts** - ObjectId, integer, date, binary UUID and enum casts applied on every path
//! - **Typed models** - Serde models with a collection, a primary key and casts
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docquery::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Item {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<String>,
//!     pub name: String,
//!     pub amount: i32,
//! }
//!
//! impl Model for Item {
//!     fn collection_name() -> &'static str { "items" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let items = store.model::<Item>();
//!
//!     items.insert(&[Item { id: None, name: "knife".into(), amount: 34 }]).await?;
//!
//!     let sharp = items
//!         .get(&items.query().where_op("amount", ">", 10).order_by_desc("amount").build())
//!         .await?;
//!
//!     println!("{sharp:?}");
//!     store.shutdown().await
//! }
//! ```
//!
//! # Inspecting compiled commands
//!
//! A built [`query::Query`] compiles to a backend-neutral [`command::Command`]
//! without touching a store:
//!
//! ```ignore
//! use docquery::prelude::*;
//!
//! let command = Query::builder()
//!     .where_eq("type", "sharp")
//!     .or_where_between("amount", [3, 20])
//!     .build()
//!     .to_mql()?;
//!
//! println!("{}", command.to_json());
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docquery_core::{
    backend, cast, collection, command, compiler, error, mapper, model, mutation, page, path, query, store,
    translate,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docquery_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docquery_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
