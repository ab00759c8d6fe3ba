//! Convenient re-exports of commonly used types from docquery.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docquery::prelude::*;
//! ```
//!
//! This provides access to:
//! - Models and casts
//! - Store backends and builders
//! - Query construction and compiled commands
//! - Collection interfaces and pagination
//! - Error types

pub use docquery_core::{
    backend::{CommandOutcome, StoreBackend, StoreBackendBuilder, UpdateOutcome},
    cast::{AttributeCast, BackedEnum, CastKind, CastRegistry, EnumCast, KeyType},
    collection::{Collection, ModelCollection},
    command::{Command, DeleteOptions, UpdateOptions},
    error::{DocumentStoreError, DocumentStoreResult},
    mapper::ResultMapper,
    model::{Model, ModelExt},
    mutation::Update,
    page::{Page, PaginationParams},
    path::AttributePath,
    query::{AggregateFunction, Bounds, Clause, Operator, Query, QueryBuilder, SortDirection},
    store::DocumentStore,
};
