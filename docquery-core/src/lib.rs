//! A fluent query compiler and attribute cast layer for document stores.
//!
//! This crate is the core of the docquery project and provides:
//!
//! - **Attribute paths** ([`path`]) - Dotted paths with `*` wildcards over nested documents
//! - **Casts** ([`cast`]) - Conversion between application and storage encodings
//! - **Models** ([`model`]) - Typed records with a collection, a key and casts
//! - **Query building** ([`query`]) - The fluent builder and its clause tree
//! - **Compilation** ([`translate`], [`compiler`], [`mutation`]) - Native filters,
//!   pipelines and update documents
//! - **Commands** ([`command`]) - Backend-neutral compiled commands
//! - **Store backend abstraction** ([`backend`]) - Traits for executing commands
//! - **Collections interface** ([`collection`]) - Running queries and mapping results
//! - **Document store** ([`store`]) - Main entry point bound to a backend
//! - **Error handling** ([`error`]) - Error types and result types
//! - **Pagination** ([`page`]) - Page results and parameters
//!
//! # Example
//!
//! ```ignore
//! use docquery::query::Query;
//!
//! let command = Query::builder()
//!     .where_eq("name", "John Doe")
//!     .or_where_op("age", ">", 30)
//!     .limit(10)
//!     .build()
//!     .to_mql()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docquery_core;

pub mod backend;
pub mod cast;
pub mod collection;
pub mod command;
pub mod compiler;
pub mod error;
pub mod mapper;
pub mod model;
pub mod mutation;
pub mod page;
pub mod path;
pub mod query;
pub mod store;
pub mod translate;
