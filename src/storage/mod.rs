//! Storage Layer - SQLite system of record plus a vector index
//!
//! The relational database holds three tables:
//! - entities(id, name, canonical_name, type, properties, confidence_score, source, aliases, embedding_ref)
//! - relations(id, subject_id, predicate, object_id, confidence_score, description)
//! - news_events(id, title, content, source, publish_time, content_hash)
//!
//! A second database holds embedding vectors keyed by the id of the owning
//! entity or news event. `HybridStore` keeps the two consistent.

pub mod schema;
pub mod convert;
pub mod sqlite;
pub mod vector;
pub mod hybrid;
pub mod transaction;
pub(crate) mod translate;

pub use sqlite::{SqliteStore, DbStats};
pub use vector::{SqliteVectorIndex, VectorFilter, VectorHit, VectorIndex, VectorIndexError, VectorRecord};
pub use hybrid::{BackendStatus, HealthReport, HybridStore, spawn_reconciler};
pub use transaction::{MergeDecision, Transaction};
