//! Error types and result types for query compilation, casting and execution.
//!
//! Casting and operand errors are produced while a query is compiled, before any
//! command reaches a backend. Use [`DocumentStoreResult<T>`] as the return type
//! for fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the query layer and its backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentStoreError {
    /// A value cannot be converted to the storage representation required by a field's cast.
    #[error("Invalid cast for {field}: {message}")]
    InvalidCast {
        /// The attribute the cast is attached to, qualified with its model.
        field: String,
        /// What was offered and what was expected.
        message: String,
    },
    /// A string does not parse as a canonical identifier.
    #[error("Invalid identifier provided for {field}: {value:?}")]
    InvalidIdentifier {
        /// The attribute the identifier was offered for.
        field: String,
        /// The offending input.
        value: String,
    },
    /// A stored scalar has no matching enum member.
    #[error("Unknown value {value} for enum {field}")]
    UnknownEnumValue {
        /// The enum type name or attribute.
        field: String,
        /// The stored scalar, rendered for display.
        value: String,
    },
    /// An operator received a structurally invalid operand.
    #[error("Invalid operand for {operator}: {message}")]
    InvalidOperand {
        /// The operator (or builder call) that rejected the operand.
        operator: String,
        /// Why the operand was rejected.
        message: String,
    },
    /// A query or clause shape with no translation to the document store.
    #[error("{0} is not supported by the document store")]
    UnsupportedOperation(String),
    /// A find-or-fail lookup matched nothing.
    #[error("Document {id} not found in collection {collection}")]
    DocumentNotFound {
        /// The collection that was searched.
        collection: String,
        /// The identifier that was looked up.
        id: String,
    },
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error raised by the underlying storage backend, passed through as-is.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    pub(crate) fn invalid_operand(operator: impl Into<String>, message: impl Into<String>) -> Self {
        DocumentStoreError::InvalidOperand {
            operator: operator.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(name: impl Into<String>) -> Self {
        DocumentStoreError::UnsupportedOperation(name.into())
    }
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
