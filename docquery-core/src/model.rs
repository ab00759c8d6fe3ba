//! The model definition consumed by the query layer.
//!
//! A [`Model`] names its collection, declares its primary key and the casts of its
//! attributes. Rows read from the store are materialized into the model through serde
//! after the casts have been applied.

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Deserialize, Serialize};

use crate::{
    cast::{CastKind, CastRegistry, KeyType, short_type_name},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// A typed record stored in one collection.
///
/// # Example
///
/// ```ignore
/// use docquery::prelude::*;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub id: Option<String>,
///     pub name: String,
///     pub birthday: Option<bson::DateTime>,
/// }
///
/// impl Model for User {
///     fn collection_name() -> &'static str {
///         "users"
///     }
///
///     fn casts(registry: CastRegistry) -> CastRegistry {
///         registry.with_cast("birthday", CastKind::Date)
///     }
/// }
/// ```
pub trait Model: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// Returns the name of the collection this model is stored in.
    fn collection_name() -> &'static str;

    /// The primary key attribute.
    fn key_name() -> &'static str {
        "_id"
    }

    fn key_type() -> KeyType {
        KeyType::String
    }

    /// Hook for attaching attribute casts on top of the key cast.
    fn casts(registry: CastRegistry) -> CastRegistry {
        registry
    }

    /// The complete registry for this model: the key declaration, the default key
    /// cast and whatever [`Model::casts`] adds or replaces.
    fn cast_registry() -> CastRegistry {
        let registry = CastRegistry::new(short_type_name::<Self>())
            .with_key(Self::key_name(), Self::key_type());
        let key_cast = match Self::key_type() {
            KeyType::Int => CastKind::Integer,
            KeyType::String | KeyType::ObjectId => CastKind::PrimaryKey,
        };

        Self::casts(registry.with_cast(Self::key_name(), key_cast))
    }
}

/// Row conversions, implemented for every [`Model`].
pub trait ModelExt: Model {
    /// Serializes the model into a document (application encoding).
    fn to_row(&self) -> DocumentStoreResult<Document>;

    /// Materializes a model from a document (application encoding).
    fn from_row(row: Document) -> DocumentStoreResult<Self>;
}

impl<M: Model> ModelExt for M {
    fn to_row(&self) -> DocumentStoreResult<Document> {
        match serialize_to_bson(self)? {
            Bson::Document(row) => Ok(row),
            other => Err(DocumentStoreError::Serialization(format!(
                "{} serialized to {:?}, expected a document",
                short_type_name::<M>(),
                other.element_type()
            ))),
        }
    }

    fn from_row(row: Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(row))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        #[serde(rename = "_id")]
        id: i64,
        hits: i32,
    }

    impl Model for Counter {
        fn collection_name() -> &'static str {
            "counters"
        }

        fn key_type() -> KeyType {
            KeyType::Int
        }
    }

    #[test]
    fn registry_carries_key_declaration_and_default_key_cast() {
        let registry = Counter::cast_registry();

        assert_eq!(registry.model(), "Counter");
        assert_eq!(registry.key_type(), KeyType::Int);
        assert!(matches!(registry.directive("_id").map(|d| d.kind()), Some(CastKind::Integer)));
    }

    #[test]
    fn rows_round_trip_through_serde() {
        let counter = Counter { id: 7, hits: 3 };
        let row = counter.to_row().unwrap();

        assert_eq!(row, doc! { "_id": 7_i64, "hits": 3 });
        assert_eq!(Counter::from_row(row).unwrap(), counter);
    }
}
