//! # Newsgraph - News Knowledge Graph Substrate
//!
//! Persistence and reasoning layer for entities, relations and events
//! extracted from news text.
//!
//! Newsgraph provides:
//! - A hybrid store keeping a SQLite relational backend and a vector
//!   similarity index consistent under one transaction discipline
//! - Hybrid (vector + full-text) search with weighted score fusion
//! - Context-aware entity resolution with an optional LLM tie-breaker
//! - Bounded breadth-first neighborhood traversal for graph display

pub mod entity;
pub mod relation;
pub mod news;
pub mod search;
pub mod storage;
pub mod query;
pub mod resolution;
pub mod deadline;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use entity::Entity;
pub use relation::Relation;
pub use news::NewsEvent;
pub use search::{ContentType, SearchPayload, SearchResult, SearchRequest, SearchFilters};
pub use storage::{HybridStore, Transaction};
pub use query::NeighborEngine;
pub use resolution::EntityResolver;

/// Result type alias for Newsgraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of record an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Entity,
    Relation,
    NewsEvent,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordKind::Entity => "Entity",
            RecordKind::Relation => "Relation",
            RecordKind::NewsEvent => "NewsEvent",
        };
        f.write_str(s)
    }
}

/// Error types for Newsgraph operations.
///
/// Backend-native failures are translated into these variants at the
/// storage boundary (see `storage::translate`); callers never see raw
/// SQLite messages or connection details.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Connection error during {operation}: {reason}")]
    Connection { operation: &'static str, reason: String },

    #[error("Vector store error during {operation} ({id}): {reason}")]
    VectorStore {
        operation: &'static str,
        id: String,
        reason: String,
    },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Deadline exceeded during {operation}")]
    Timeout { operation: &'static str },
}

impl Error {
    pub(crate) fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        Error::NotFound { kind, id: id.into() }
    }

    /// True for `NotFound` errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Input validation failures
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange { field: &'static str, value: f32 },

    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: &'static str },

    #[error("Vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector contains non-finite components")]
    NonFiniteVector,

    #[error("{field} references missing entity {id}")]
    DanglingReference { field: &'static str, id: String },

    #[error("Unknown sort key: {0} (expected id, name, type, created_at or updated_at)")]
    UnknownSortKey(String),

    #[error("Unknown content type: {0}")]
    UnknownContentType(String),

    #[error("At least one search channel must be enabled")]
    NoSearchChannel,

    #[error("Invalid disambiguation pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Constraint violated during {operation}")]
    ConstraintViolation { operation: &'static str },

    #[error("Entity {0} cannot be merged into itself")]
    SelfMerge(String),
}

/// Check that a score lies in [0, 1]
pub(crate) fn check_unit_range(field: &'static str, value: f32) -> std::result::Result<(), ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::ConfidenceOutOfRange { field, value })
    }
}

/// Check that a text field is non-empty after trimming
pub(crate) fn check_non_empty(field: &'static str, value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField { field })
    } else {
        Ok(())
    }
}
