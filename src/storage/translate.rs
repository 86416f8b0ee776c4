//! Backend error translation
//!
//! The one place where `rusqlite::Error` and `VectorIndexError` are
//! turned into the crate's error taxonomy. Only an error category leaves
//! this module; the raw backend message goes to the debug log.

use rusqlite::ErrorCode;

use super::vector::VectorIndexError;
use crate::{Error, ValidationError};

/// Translate a relational backend error raised during `operation`
pub(crate) fn sql_error(err: rusqlite::Error, operation: &'static str) -> Error {
    tracing::debug!("relational backend error during {}: {}", operation, err);

    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            ValidationError::ConstraintViolation { operation }.into()
        }
        rusqlite::Error::SqliteFailure(e, _) => Error::Connection {
            operation,
            reason: format!("{:?}", e.code),
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => Error::Connection {
            operation,
            reason: "stored record could not be decoded".into(),
        },
        rusqlite::Error::ToSqlConversionFailure(_) => Error::Connection {
            operation,
            reason: "record could not be encoded".into(),
        },
        _ => Error::Connection {
            operation,
            reason: "relational backend failure".into(),
        },
    }
}

/// Translate a vector backend error raised during `operation` on `id`
pub(crate) fn vector_error(err: VectorIndexError, operation: &'static str, id: &str) -> Error {
    tracing::debug!("vector backend error during {} ({}): {}", operation, id, err);

    match err {
        VectorIndexError::DimensionMismatch { expected, actual } => {
            ValidationError::DimensionMismatch { expected, actual }.into()
        }
        VectorIndexError::NonFinite => ValidationError::NonFiniteVector.into(),
        VectorIndexError::AlreadyExists(_) => Error::VectorStore {
            operation,
            id: id.to_string(),
            reason: "record already exists".into(),
        },
        VectorIndexError::Missing(_) => Error::VectorStore {
            operation,
            id: id.to_string(),
            reason: "record does not exist".into(),
        },
        VectorIndexError::Backend(e) => Error::VectorStore {
            operation,
            id: id.to_string(),
            reason: match e.sqlite_error_code() {
                Some(code) => format!("{:?}", code),
                None => "vector backend failure".into(),
            },
        },
        VectorIndexError::Metadata(_) => Error::VectorStore {
            operation,
            id: id.to_string(),
            reason: "metadata could not be encoded".into(),
        },
        VectorIndexError::Unavailable(_) => Error::VectorStore {
            operation,
            id: id.to_string(),
            reason: "vector index unavailable".into(),
        },
    }
}

/// Shorthand for translating relational results
pub(crate) trait SqlResultExt<T> {
    fn or_store_err(self, operation: &'static str) -> crate::Result<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn or_store_err(self, operation: &'static str) -> crate::Result<T> {
        self.map_err(|e| sql_error(e, operation))
    }
}

/// Shorthand for translating vector results
pub(crate) trait VectorResultExt<T> {
    fn or_vector_err(self, operation: &'static str, id: &str) -> crate::Result<T>;
}

impl<T> VectorResultExt<T> for Result<T, VectorIndexError> {
    fn or_vector_err(self, operation: &'static str, id: &str) -> crate::Result<T> {
        self.map_err(|e| vector_error(e, operation, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_constraint_violation_becomes_validation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id TEXT PRIMARY KEY)", []).unwrap();
        conn.execute("INSERT INTO t VALUES ('a')", []).unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();

        let translated = sql_error(err, "insert");
        assert!(matches!(
            translated,
            Error::Validation(ValidationError::ConstraintViolation { operation: "insert" })
        ));
    }

    #[test]
    fn test_backend_message_not_leaked() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM secret_table_name", []).unwrap_err();
        let translated = sql_error(err, "query");
        let text = translated.to_string();
        assert!(text.contains("query"));
        assert!(!text.contains("secret_table_name"));
    }

    #[test]
    fn test_vector_dimension_error_becomes_validation() {
        let err = VectorIndexError::DimensionMismatch { expected: 4, actual: 2 };
        assert!(matches!(
            vector_error(err, "add", "e1"),
            Error::Validation(ValidationError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_vector_missing_carries_id() {
        let err = vector_error(VectorIndexError::Missing("e1".into()), "update", "e1");
        match err {
            Error::VectorStore { operation, id, .. } => {
                assert_eq!(operation, "update");
                assert_eq!(id, "e1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
