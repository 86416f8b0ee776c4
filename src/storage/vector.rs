//! Vector index - embedding similarity search keyed by record id
//!
//! Vectors live in their own SQLite database as little-endian f32 BLOBs
//! and are ranked by brute-force cosine similarity. The collection
//! dimension is fixed when the database is first created and checked on
//! every write.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};

use super::schema;
use crate::search::ContentType;

/// Backend-native vector index failures
#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    #[error("vector has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector contains non-finite components")]
    NonFinite,

    #[error("vector {0} already exists")]
    AlreadyExists(String),

    #[error("vector {0} does not exist")]
    Missing(String),

    #[error("vector backend failure: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("metadata encoding failed: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("vector index unavailable: {0}")]
    Unavailable(String),
}

pub type VectorResult<T> = std::result::Result<T, VectorIndexError>;

/// A stored vector with its owner id and metadata
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Shared with the owning entity / news event
    pub id: String,
    pub content_type: ContentType,
    pub vector: Vec<f32>,
    pub metadata: Map<String, Value>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, content_type: ContentType, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            content_type,
            vector,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// A ranked vector search hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub content_type: ContentType,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

/// Pre-ranking restrictions on vector search
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    /// Content types to consider; empty means all
    pub content_types: Vec<ContentType>,
    /// Exact metadata matches, all required
    pub metadata_equals: Vec<(String, Value)>,
}

impl VectorFilter {
    pub fn content_types(types: &[ContentType]) -> Self {
        Self {
            content_types: types.to_vec(),
            metadata_equals: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata_equals.push((key.into(), value.into()));
        self
    }

    fn accepts(&self, content_type: ContentType, metadata: &Map<String, Value>) -> bool {
        (self.content_types.is_empty() || self.content_types.contains(&content_type))
            && self
                .metadata_equals
                .iter()
                .all(|(k, v)| metadata.get(k) == Some(v))
    }
}

/// Embedding-similarity index over id-addressed records.
///
/// Writes are validated against the collection's fixed dimension.
/// Concurrent reads are safe; writers for one id are serialized by the
/// hybrid store's transaction routing.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Fixed dimension of the collection
    fn dimension(&self) -> usize;

    /// Insert a new record; fails if the id exists
    async fn add(&self, record: VectorRecord) -> VectorResult<()>;

    /// Replace vector and metadata of an existing record
    async fn update(&self, record: VectorRecord) -> VectorResult<()>;

    /// Remove a record; returns whether one was removed
    async fn delete(&self, id: &str) -> VectorResult<bool>;

    async fn get(&self, id: &str) -> VectorResult<Option<VectorRecord>>;

    /// Top-k records by cosine similarity, best first
    async fn search(&self, query: &[f32], top_k: usize, filter: &VectorFilter) -> VectorResult<Vec<VectorHit>>;

    /// All record ids (for orphan reconciliation)
    async fn ids(&self) -> VectorResult<Vec<String>>;

    async fn count(&self) -> VectorResult<usize>;

    /// Liveness probe
    async fn health(&self) -> VectorResult<()>;
}

/// Validate a vector against a collection dimension
pub fn check_vector(expected: usize, vector: &[f32]) -> VectorResult<()> {
    if vector.len() != expected {
        return Err(VectorIndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(VectorIndexError::NonFinite);
    }
    Ok(())
}

/// Cosine similarity; 0.0 for mismatched, empty or zero-norm inputs
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_content_type(raw: &str) -> rusqlite::Result<ContentType> {
    raw.parse().map_err(|e: crate::Error| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// SQLite-backed vector index
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl SqliteVectorIndex {
    /// Open (or create) a vector database with the given collection dimension
    pub fn open(path: &Path, dimension: usize) -> VectorResult<Self> {
        Self::with_connection(Connection::open(path)?, dimension)
    }

    /// Open an in-memory vector database (for testing)
    pub fn open_in_memory(dimension: usize) -> VectorResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, dimension)
    }

    fn with_connection(conn: Connection, dimension: usize) -> VectorResult<Self> {
        for stmt in schema::vector_schema_statements() {
            conn.execute(stmt, [])?;
        }

        let stored: Option<String> = conn
            .query_row("SELECT value FROM collection WHERE key = 'dimension'", [], |row| row.get(0))
            .optional()?;

        match stored.and_then(|s| s.parse::<usize>().ok()) {
            Some(existing) if existing != dimension => {
                return Err(VectorIndexError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                });
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO collection (key, value) VALUES ('dimension', ?1)",
                    [dimension.to_string()],
                )?;
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    fn lock(&self) -> VectorResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VectorIndexError::Unavailable("connection lock poisoned".into()))
    }

    fn exists(conn: &Connection, id: &str) -> VectorResult<bool> {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM vectors WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn add(&self, record: VectorRecord) -> VectorResult<()> {
        check_vector(self.dimension, &record.vector)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        let conn = self.lock()?;
        if Self::exists(&conn, &record.id)? {
            return Err(VectorIndexError::AlreadyExists(record.id));
        }
        conn.execute(
            "INSERT INTO vectors (id, content_type, dimension, vector, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.content_type.as_str(),
                record.dimension() as i64,
                encode_vector(&record.vector),
                metadata,
            ],
        )?;
        Ok(())
    }

    async fn update(&self, record: VectorRecord) -> VectorResult<()> {
        check_vector(self.dimension, &record.vector)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE vectors SET content_type = ?2, dimension = ?3, vector = ?4, metadata = ?5 WHERE id = ?1",
            params![
                record.id,
                record.content_type.as_str(),
                record.dimension() as i64,
                encode_vector(&record.vector),
                metadata,
            ],
        )?;
        if changed == 0 {
            return Err(VectorIndexError::Missing(record.id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> VectorResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM vectors WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    async fn get(&self, id: &str) -> VectorResult<Option<VectorRecord>> {
        let conn = self.lock()?;
        let row: Option<(String, String, Vec<u8>, String)> = conn
            .query_row(
                "SELECT id, content_type, vector, metadata FROM vectors WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        match row {
            Some((id, content_type, blob, metadata)) => Ok(Some(VectorRecord {
                id,
                content_type: parse_content_type(&content_type)?,
                vector: decode_vector(&blob),
                metadata: serde_json::from_str(&metadata)?,
            })),
            None => Ok(None),
        }
    }

    async fn search(&self, query: &[f32], top_k: usize, filter: &VectorFilter) -> VectorResult<Vec<VectorHit>> {
        check_vector(self.dimension, query)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, content_type, vector, metadata FROM vectors")?;
        let candidates = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let content_type: String = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let metadata: String = row.get(3)?;
            Ok((id, content_type, blob, metadata))
        })?;

        let mut scored = Vec::new();
        for candidate in candidates {
            let (id, content_type, blob, metadata) = candidate?;
            let content_type = parse_content_type(&content_type)?;
            let metadata: Map<String, Value> = serde_json::from_str(&metadata)?;
            if !filter.accepts(content_type, &metadata) {
                continue;
            }
            let score = cosine_similarity(query, &decode_vector(&blob));
            scored.push(VectorHit { id, content_type, score, metadata });
        }

        // Sort by score descending, id ascending for determinism
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn ids(&self) -> VectorResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM vectors ORDER BY id")?;
        let ids = stmt.query_map([], |row| row.get(0))?.collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    async fn count(&self) -> VectorResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn health(&self) -> VectorResult<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM collection", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord::new(id, ContentType::Entity, vector)
    }

    #[tokio::test]
    async fn test_vector_crud() {
        let index = SqliteVectorIndex::open_in_memory(4).unwrap();

        index.add(record("a", vec![0.1, 0.2, 0.3, 0.4])).await.unwrap();
        let retrieved = index.get("a").await.unwrap().unwrap();
        assert_eq!(retrieved.vector.len(), 4);
        assert!((retrieved.vector[0] - 0.1).abs() < 0.001);

        index.update(record("a", vec![1.0, 0.0, 0.0, 0.0])).await.unwrap();
        assert_eq!(index.get("a").await.unwrap().unwrap().vector[0], 1.0);

        assert!(index.delete("a").await.unwrap());
        assert!(!index.delete("a").await.unwrap());
        assert!(index.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dimension_checked_on_every_write() {
        let index = SqliteVectorIndex::open_in_memory(3).unwrap();
        let err = index.add(record("a", vec![1.0, 2.0])).await.unwrap_err();
        assert!(matches!(err, VectorIndexError::DimensionMismatch { expected: 3, actual: 2 }));

        index.add(record("a", vec![1.0, 2.0, 3.0])).await.unwrap();
        let err = index.update(record("a", vec![1.0])).await.unwrap_err();
        assert!(matches!(err, VectorIndexError::DimensionMismatch { .. }));

        let err = index.add(record("b", vec![f32::NAN, 0.0, 0.0])).await.unwrap_err();
        assert!(matches!(err, VectorIndexError::NonFinite));
    }

    #[tokio::test]
    async fn test_duplicate_add_and_missing_update() {
        let index = SqliteVectorIndex::open_in_memory(2).unwrap();
        index.add(record("a", vec![1.0, 0.0])).await.unwrap();
        assert!(matches!(
            index.add(record("a", vec![0.0, 1.0])).await,
            Err(VectorIndexError::AlreadyExists(_))
        ));
        assert!(matches!(
            index.update(record("zzz", vec![0.0, 1.0])).await,
            Err(VectorIndexError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let index = SqliteVectorIndex::open_in_memory(2).unwrap();
        index.add(record("near", vec![1.0, 0.1])).await.unwrap();
        index.add(record("far", vec![0.0, 1.0])).await.unwrap();
        index
            .add(VectorRecord::new("news", ContentType::NewsEvent, vec![1.0, 0.0]))
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2, &VectorFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "news");
        assert_eq!(hits[1].id, "near");

        let only_entities = VectorFilter::content_types(&[ContentType::Entity]);
        let hits = index.search(&[1.0, 0.0], 5, &only_entities).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
    }

    #[tokio::test]
    async fn test_metadata_filter() {
        let index = SqliteVectorIndex::open_in_memory(2).unwrap();
        let mut meta = Map::new();
        meta.insert("type".into(), Value::from("公司"));
        index.add(record("a", vec![1.0, 0.0]).with_metadata(meta)).await.unwrap();
        index.add(record("b", vec![1.0, 0.0])).await.unwrap();

        let filter = VectorFilter::default().with_metadata("type", "公司");
        let hits = index.search(&[1.0, 0.0], 5, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn test_collection_dimension_is_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        drop(SqliteVectorIndex::open(&path, 8).unwrap());
        assert!(SqliteVectorIndex::open(&path, 8).is_ok());
        assert!(matches!(
            SqliteVectorIndex::open(&path, 16),
            Err(VectorIndexError::DimensionMismatch { expected: 8, actual: 16 })
        ));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
