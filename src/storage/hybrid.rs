//! Hybrid store - one logical store over SQLite and the vector index
//!
//! Every mutation goes through a [`Transaction`]. The single-shot methods
//! here open a transaction, run one operation and commit (or roll back on
//! failure). Reads lock the relational connection per call, so a task that
//! holds an open transaction must read through the transaction instead.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::convert::snippet;
use super::sqlite::{DbStats, SqliteStore};
use super::transaction::{MergeDecision, Transaction};
use super::translate::{SqlResultExt, VectorResultExt, sql_error, vector_error};
use super::vector::{SqliteVectorIndex, VectorFilter, VectorIndex, check_vector};
use crate::config::{NewsgraphConfig, SearchConfig};
use crate::deadline::with_deadline;
use crate::entity::Entity;
use crate::news::NewsEvent;
use crate::query::embedding::Embedder;
use crate::relation::Relation;
use crate::search::{ContentType, ListOptions, SearchPayload, SearchRequest, SearchResult};
use crate::{Error, RecordKind, Result, ValidationError};

/// Characters of context on each side of a news snippet match
const SNIPPET_RADIUS: usize = 40;

/// Relational store, vector index and optional embedder behind one API
pub struct HybridStore {
    relational: Mutex<SqliteStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn Embedder>>,
    search: SearchConfig,
    closed: AtomicBool,
}

impl HybridStore {
    /// Assemble a store from its backends. The embedder, when present,
    /// must produce vectors of the collection's dimension.
    pub fn new(
        relational: SqliteStore,
        vectors: Arc<dyn VectorIndex>,
        embedder: Option<Arc<dyn Embedder>>,
        search: SearchConfig,
    ) -> Result<Self> {
        if let Some(embedder) = &embedder {
            if embedder.dimension() != vectors.dimension() {
                return Err(ValidationError::DimensionMismatch {
                    expected: vectors.dimension(),
                    actual: embedder.dimension(),
                }
                .into());
            }
        }

        Ok(Self {
            relational: Mutex::new(relational),
            vectors,
            embedder,
            search,
            closed: AtomicBool::new(false),
        })
    }

    /// Open file-backed relational and vector databases
    pub fn open(
        db_path: &Path,
        vector_path: &Path,
        dimension: usize,
        embedder: Option<Arc<dyn Embedder>>,
        search: SearchConfig,
    ) -> Result<Self> {
        let relational = SqliteStore::open(db_path).map_err(|e| sql_error(e, "open"))?;
        let vectors = SqliteVectorIndex::open(vector_path, dimension)
            .map_err(|e| vector_error(e, "open", &vector_path.display().to_string()))?;
        tracing::debug!(
            "opened hybrid store: {} + {}",
            db_path.display(),
            vector_path.display()
        );
        Self::new(relational, Arc::new(vectors), embedder, search)
    }

    /// Open the databases named by a config, relative to `base`
    pub fn open_with_config(config: &NewsgraphConfig, base: &Path, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        Self::open(
            &config.database_path(base),
            &config.vector_database_path(base),
            config.vector.dimension,
            embedder,
            config.search.clone(),
        )
    }

    /// In-memory store (for testing)
    pub fn open_in_memory(dimension: usize, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        let relational = SqliteStore::open_in_memory().map_err(|e| sql_error(e, "open"))?;
        let vectors = SqliteVectorIndex::open_in_memory(dimension)
            .map_err(|e| vector_error(e, "open", ":memory:"))?;
        Self::new(relational, Arc::new(vectors), embedder, SearchConfig::default())
    }

    /// Refuse new work; open transactions finish normally
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        tracing::info!("hybrid store shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.is_closed() {
            Err(Error::Connection {
                operation,
                reason: "store is shut down".into(),
            })
        } else {
            Ok(())
        }
    }

    pub fn vectors(&self) -> &dyn VectorIndex {
        self.vectors.as_ref()
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.search
    }

    /// Start a transaction; waits for any transaction already running
    pub async fn begin(&self) -> Result<Transaction<'_>> {
        self.ensure_open("begin")?;
        let conn = self.relational.lock().await;
        Transaction::start(self, conn)
    }

    /// The vector to store for a record: the explicit one if given,
    /// otherwise an embedding of `text` when an embedder is configured
    pub(crate) async fn vector_for(&self, id: &str, text: String, explicit: Option<Vec<f32>>) -> Result<Option<Vec<f32>>> {
        let vector = match (explicit, &self.embedder) {
            (Some(vector), _) => vector,
            (None, Some(embedder)) => embedder.embed_query(&text).await?,
            (None, None) => return Ok(None),
        };
        check_vector(self.vectors.dimension(), &vector).or_vector_err("embed", id)?;
        Ok(Some(vector))
    }

    pub(crate) async fn has_vector(&self, id: &str) -> Result<bool> {
        Ok(self.vectors.get(id).await.or_vector_err("get", id)?.is_some())
    }

    // ========== Single-shot writes ==========

    pub async fn create_entity(&self, entity: Entity, vector: Option<Vec<f32>>) -> Result<Entity> {
        let mut tx = self.begin().await?;
        let result = tx.create_entity(entity, vector).await;
        finish(tx, result).await
    }

    pub async fn update_entity(&self, entity: Entity, vector: Option<Vec<f32>>) -> Result<Entity> {
        let mut tx = self.begin().await?;
        let result = tx.update_entity(entity, vector).await;
        finish(tx, result).await
    }

    pub async fn delete_entity(&self, id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = tx.delete_entity(id).await;
        finish(tx, result).await
    }

    pub async fn create_relation(&self, relation: Relation) -> Result<Relation> {
        let mut tx = self.begin().await?;
        let result = tx.create_relation(relation).await;
        finish(tx, result).await
    }

    pub async fn update_relation(&self, relation: Relation) -> Result<Relation> {
        let mut tx = self.begin().await?;
        let result = tx.update_relation(relation).await;
        finish(tx, result).await
    }

    pub async fn delete_relation(&self, id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = tx.delete_relation(id).await;
        finish(tx, result).await
    }

    pub async fn create_news(&self, event: NewsEvent, vector: Option<Vec<f32>>) -> Result<NewsEvent> {
        let mut tx = self.begin().await?;
        let result = tx.create_news(event, vector).await;
        finish(tx, result).await
    }

    pub async fn update_news(&self, event: NewsEvent, vector: Option<Vec<f32>>) -> Result<NewsEvent> {
        let mut tx = self.begin().await?;
        let result = tx.update_news(event, vector).await;
        finish(tx, result).await
    }

    pub async fn delete_news(&self, id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = tx.delete_news(id).await;
        finish(tx, result).await
    }

    /// Fold `merge_id` into `keep_id` in one transaction
    pub async fn merge_entities(&self, keep_id: &str, merge_id: &str, decision: &MergeDecision) -> Result<Entity> {
        let mut tx = self.begin().await?;
        let result = tx.merge_entities(keep_id, merge_id, decision).await;
        finish(tx, result).await
    }

    // ========== Reads ==========

    pub async fn get_entity(&self, id: &str) -> Result<Entity> {
        self.ensure_open("get_entity")?;
        let conn = self.relational.lock().await;
        conn.get_entity(id)
            .or_store_err("get_entity")?
            .ok_or_else(|| Error::not_found(RecordKind::Entity, id))
    }

    /// Entities for the given ids, in request order; unknown ids are skipped
    pub async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>> {
        self.ensure_open("get_entities")?;
        let conn = self.relational.lock().await;
        conn.get_entities(ids).or_store_err("get_entities")
    }

    /// Entities whose name or canonical name equals `name`
    pub async fn find_entities_by_name(&self, name: &str) -> Result<Vec<Entity>> {
        self.ensure_open("find_entities_by_name")?;
        let conn = self.relational.lock().await;
        conn.find_entities_by_name(name).or_store_err("find_entities_by_name")
    }

    /// Relations touching an entity, in id order. An unknown entity has
    /// no relations.
    pub async fn get_entity_relations(&self, entity_id: &str, predicate: Option<&str>) -> Result<Vec<Relation>> {
        self.ensure_open("get_entity_relations")?;
        let conn = self.relational.lock().await;
        conn.get_relations_for_entity(entity_id, predicate)
            .or_store_err("get_entity_relations")
    }

    pub async fn get_relation(&self, id: &str) -> Result<Relation> {
        self.ensure_open("get_relation")?;
        let conn = self.relational.lock().await;
        conn.get_relation(id)
            .or_store_err("get_relation")?
            .ok_or_else(|| Error::not_found(RecordKind::Relation, id))
    }

    pub async fn get_news(&self, id: &str) -> Result<NewsEvent> {
        self.ensure_open("get_news")?;
        let conn = self.relational.lock().await;
        conn.get_news(id)
            .or_store_err("get_news")?
            .ok_or_else(|| Error::not_found(RecordKind::NewsEvent, id))
    }

    pub async fn list_entities(&self, opts: &ListOptions) -> Result<Vec<Entity>> {
        self.ensure_open("list_entities")?;
        let conn = self.relational.lock().await;
        conn.list_entities(opts).or_store_err("list_entities")
    }

    pub async fn list_relations(&self, opts: &ListOptions) -> Result<Vec<Relation>> {
        self.ensure_open("list_relations")?;
        let conn = self.relational.lock().await;
        conn.list_relations(opts).or_store_err("list_relations")
    }

    pub async fn list_news_events(&self, opts: &ListOptions) -> Result<Vec<NewsEvent>> {
        self.ensure_open("list_news_events")?;
        let conn = self.relational.lock().await;
        conn.list_news(opts).or_store_err("list_news_events")
    }

    /// Record counts across both backends
    pub async fn stats(&self) -> Result<DbStats> {
        self.ensure_open("stats")?;
        let mut stats = {
            let conn = self.relational.lock().await;
            conn.stats().or_store_err("stats")?
        };
        stats.vectors = self.vectors.count().await.or_vector_err("stats", "-")?;
        Ok(stats)
    }

    // ========== Search ==========

    /// Hybrid search: vector similarity and full-text match, fused by the
    /// configured channel weights. A failing channel is dropped with a
    /// warning as long as the other one answers.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        with_deadline(request.deadline, "search", self.run_search(request)).await
    }

    async fn run_search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        if !request.use_vector && !request.use_fulltext {
            return Err(ValidationError::NoSearchChannel.into());
        }
        self.ensure_open("search")?;

        let query = request.query.trim();
        if request.top_k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let (vector_outcome, text_outcome) = tokio::join!(
            async {
                if request.use_vector {
                    Some(self.vector_channel(query, request).await)
                } else {
                    None
                }
            },
            async {
                if request.use_fulltext {
                    Some(self.text_channel(query, request).await)
                } else {
                    None
                }
            }
        );

        let mut last_error = None;
        let mut vector_hits = None;
        let mut text_hits = None;
        match vector_outcome {
            Some(Ok(hits)) => vector_hits = Some(hits),
            Some(Err(e)) => last_error = Some(e),
            None => {}
        }
        match text_outcome {
            Some(Ok(hits)) => text_hits = Some(hits),
            Some(Err(e)) => {
                if let Some(previous) = last_error.replace(e) {
                    tracing::warn!("vector search channel failed: {}", previous);
                }
            }
            None => {}
        }

        if vector_hits.is_none() && text_hits.is_none() {
            if let Some(e) = last_error {
                return Err(e);
            }
        } else if let Some(e) = &last_error {
            tracing::warn!("search channel failed, returning partial results: {}", e);
        }

        let mut fused: HashMap<(ContentType, String), Fused> = HashMap::new();
        for hit in vector_hits.unwrap_or_default() {
            let key = (hit.payload.content_type(), hit.payload.id().to_string());
            fused
                .entry(key)
                .or_insert_with(|| Fused::new(hit.payload))
                .vector = Some(hit.score);
        }
        for hit in text_hits.unwrap_or_default() {
            let key = (hit.payload.content_type(), hit.payload.id().to_string());
            let entry = fused.entry(key).or_insert_with(|| Fused::new(hit.payload));
            entry.text = Some(hit.score);
            if entry.snippet.is_none() {
                entry.snippet = hit.snippet;
            }
        }

        let mut results: Vec<SearchResult> = fused
            .into_values()
            .map(|f| f.into_result(&self.search))
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.payload.updated_at().cmp(&a.payload.updated_at()))
                .then_with(|| a.id().cmp(b.id()))
        });
        results.truncate(request.top_k);
        Ok(results)
    }

    async fn vector_channel(&self, query: &str, request: &SearchRequest) -> Result<Vec<ChannelHit>> {
        let embedder = self.embedder.as_ref().ok_or_else(|| Error::VectorStore {
            operation: "search",
            id: "-".into(),
            reason: "no embedder configured".into(),
        })?;

        let types: Vec<ContentType> = [ContentType::Entity, ContentType::NewsEvent]
            .into_iter()
            .filter(|t| request.filters.allows(*t))
            .collect();
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = embedder.embed_query(query).await?;
        let mut filter = VectorFilter::content_types(&types);
        if let Some(source) = &request.filters.source {
            filter = filter.with_metadata("source", source.clone());
        }
        if let Some(entity_type) = &request.filters.entity_type {
            filter = filter.with_metadata("type", entity_type.clone());
        }

        let hits = self
            .vectors
            .search(&embedding, request.top_k.saturating_mul(2), &filter)
            .await
            .or_vector_err("search", "-")?;

        let conn = self.relational.lock().await;
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.score <= 0.0 {
                continue;
            }
            let payload = match hit.content_type {
                ContentType::Entity => conn
                    .get_entity(&hit.id)
                    .or_store_err("search")?
                    .map(SearchPayload::Entity),
                ContentType::NewsEvent => conn
                    .get_news(&hit.id)
                    .or_store_err("search")?
                    .map(SearchPayload::NewsEvent),
                ContentType::Relation => conn
                    .get_relation(&hit.id)
                    .or_store_err("search")?
                    .map(SearchPayload::Relation),
            };
            match payload {
                Some(payload) if request.filters.matches(&payload) => out.push(ChannelHit {
                    payload,
                    score: hit.score,
                    snippet: None,
                }),
                Some(_) => {}
                None => tracing::debug!("skipping orphan vector record {}", hit.id),
            }
        }
        Ok(out)
    }

    async fn text_channel(&self, query: &str, request: &SearchRequest) -> Result<Vec<ChannelHit>> {
        let filters = &request.filters;
        let limit = request.top_k.saturating_mul(2);
        let conn = self.relational.lock().await;
        let mut out = Vec::new();

        if filters.allows(ContentType::Entity) {
            let entities = conn
                .search_entities_text(query, filters.entity_type.as_deref(), filters.source.as_deref(), limit)
                .or_store_err("search")?;
            for entity in entities {
                let score = text_score(entity.all_names(), query);
                out.push(ChannelHit {
                    payload: SearchPayload::Entity(entity),
                    score,
                    snippet: None,
                });
            }
        }

        if filters.allows(ContentType::Relation) && filters.entity_type.is_none() && filters.source.is_none() {
            for relation in conn.search_relations_text(query, limit).or_store_err("search")? {
                let score = text_score(std::iter::once(relation.predicate.as_str()), query);
                out.push(ChannelHit {
                    payload: SearchPayload::Relation(relation),
                    score,
                    snippet: None,
                });
            }
        }

        if filters.allows(ContentType::NewsEvent) && filters.entity_type.is_none() {
            let events = conn
                .search_news_text(query, filters.source.as_deref(), limit)
                .or_store_err("search")?;
            for event in events {
                let score = text_score(std::iter::once(event.title.as_str()), query);
                let snippet = snippet(&event.content, query, SNIPPET_RADIUS);
                out.push(ChannelHit {
                    payload: SearchPayload::NewsEvent(event),
                    score,
                    snippet,
                });
            }
        }

        out.retain(|hit| filters.matches(&hit.payload));
        Ok(out)
    }

    // ========== Maintenance ==========

    /// Probe both backends
    pub async fn health_check(&self) -> HealthReport {
        if self.is_closed() {
            return HealthReport {
                relational: BackendStatus::down("store is shut down"),
                vector: BackendStatus::down("store is shut down"),
            };
        }

        let started = Instant::now();
        let relational = match self.relational.try_lock() {
            Ok(conn) => match conn.ping() {
                Ok(()) => BackendStatus::up("ok"),
                Err(e) => BackendStatus::down(sql_error(e, "health_check").to_string()),
            },
            // Held by a running transaction, so the connection is unavailable
            Err(_) => BackendStatus::down("transaction in progress"),
        }
        .timed(started);

        let started = Instant::now();
        let vector = match self.vectors.health().await {
            Ok(()) => BackendStatus::up("ok"),
            Err(e) => BackendStatus::down(vector_error(e, "health_check", "-").to_string()),
        }
        .timed(started);

        HealthReport { relational, vector }
    }

    /// Delete vector records whose owning entity or news event no longer
    /// exists. Returns the number removed.
    pub async fn reconcile_orphans(&self) -> Result<usize> {
        self.ensure_open("reconcile")?;
        // Holding the relational lock keeps transactions from committing mid-sweep
        let conn = self.relational.lock().await;
        let ids = self.vectors.ids().await.or_vector_err("reconcile", "-")?;

        let mut removed = 0;
        for id in ids {
            let owned = conn.entity_exists(&id).or_store_err("reconcile")?
                || conn.news_exists(&id).or_store_err("reconcile")?;
            if owned {
                continue;
            }
            if self.vectors.delete(&id).await.or_vector_err("reconcile", &id)? {
                tracing::debug!("removed orphan vector record {}", id);
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("reconciliation removed {} orphan vector records", removed);
        }
        Ok(removed)
    }
}

/// Run `reconcile_orphans` every `every` until the store shuts down
pub fn spawn_reconciler(store: Arc<HybridStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if store.is_closed() {
                break;
            }
            if let Err(e) = store.reconcile_orphans().await {
                tracing::warn!("orphan reconciliation failed: {}", e);
            }
        }
    })
}

/// Commit on success, roll back on failure
async fn finish<T>(mut tx: Transaction<'_>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!("rollback failed: {}", rollback);
            }
            Err(e)
        }
    }
}

/// Full-text relevance over a record's name-like fields: 1.0 for an exact
/// match, 0.8 when one contains the query, 0.5 when only other text matched
fn text_score<'a>(fields: impl Iterator<Item = &'a str>, query: &str) -> f32 {
    let query = query.to_lowercase();
    let mut best = 0.5f32;
    for field in fields {
        let field = field.to_lowercase();
        if field == query {
            return 1.0;
        }
        if field.contains(&query) {
            best = 0.8;
        }
    }
    best
}

struct ChannelHit {
    payload: SearchPayload,
    score: f32,
    snippet: Option<String>,
}

struct Fused {
    payload: SearchPayload,
    vector: Option<f32>,
    text: Option<f32>,
    snippet: Option<String>,
}

impl Fused {
    fn new(payload: SearchPayload) -> Self {
        Self {
            payload,
            vector: None,
            text: None,
            snippet: None,
        }
    }

    fn into_result(self, weights: &SearchConfig) -> SearchResult {
        let score = self.vector.unwrap_or(0.0) * weights.vector_weight + self.text.unwrap_or(0.0) * weights.text_weight;
        SearchResult {
            payload: self.payload,
            score,
            snippet: self.snippet,
        }
    }
}

/// Status of one backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub healthy: bool,
    pub detail: String,
    pub latency_ms: u64,
}

impl BackendStatus {
    fn up(detail: impl Into<String>) -> Self {
        Self {
            healthy: true,
            detail: detail.into(),
            latency_ms: 0,
        }
    }

    fn down(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
            latency_ms: 0,
        }
    }

    fn timed(mut self, started: Instant) -> Self {
        self.latency_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// Result of a health probe
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub relational: BackendStatus,
    pub vector: BackendStatus,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.relational.healthy && self.vector.healthy
    }
}
