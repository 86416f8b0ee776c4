//! Hybrid transactions
//!
//! A `Transaction` owns the relational connection until it commits or
//! rolls back. Vector writes are buffered per id and flushed in two
//! phases around the relational COMMIT:
//!
//! - creations are issued *before* COMMIT, so a failed commit leaves at
//!   worst an orphan vector record;
//! - updates and deletes are issued *after* a successful COMMIT, so a
//!   relational failure never strands a stale vector record.
//!
//! Rollback (explicit, or implicit when an active transaction is dropped)
//! discards every buffered vector write.

use chrono::Utc;
use tokio::sync::MutexGuard;

use super::convert::{entity_vector_metadata, news_vector_metadata};
use super::hybrid::HybridStore;
use super::sqlite::SqliteStore;
use super::translate::{SqlResultExt, sql_error, vector_error};
use super::vector::{VectorIndexError, VectorRecord};
use crate::entity::Entity;
use crate::news::NewsEvent;
use crate::relation::Relation;
use crate::search::ContentType;
use crate::{Error, RecordKind, Result, ValidationError, check_unit_range};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxState::Active => "active",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// Vector write deferred until after the relational commit
#[derive(Debug)]
enum DeferredOp {
    Update(VectorRecord),
    Delete(String),
}

impl DeferredOp {
    fn id(&self) -> &str {
        match self {
            DeferredOp::Update(record) => &record.id,
            DeferredOp::Delete(id) => id,
        }
    }
}

/// Inputs of a resolution-driven merge
#[derive(Debug, Clone)]
pub struct MergeDecision {
    /// Match confidence of the resolution decision, in [0, 1]
    pub match_confidence: f32,
    /// Canonical name to adopt for the kept entity
    pub suggested_name: Option<String>,
}

impl MergeDecision {
    pub fn new(match_confidence: f32) -> Self {
        Self {
            match_confidence,
            suggested_name: None,
        }
    }

    pub fn with_suggested_name(mut self, name: impl Into<String>) -> Self {
        self.suggested_name = Some(name.into());
        self
    }
}

/// An open hybrid transaction
pub struct Transaction<'a> {
    store: &'a HybridStore,
    conn: MutexGuard<'a, SqliteStore>,
    pending_creates: Vec<VectorRecord>,
    pending_after: Vec<DeferredOp>,
    state: TxState,
}

impl<'a> Transaction<'a> {
    pub(crate) fn start(store: &'a HybridStore, mut conn: MutexGuard<'a, SqliteStore>) -> Result<Self> {
        if conn.in_transaction() {
            return Err(Error::Transaction(
                "relational connection is already inside a transaction".into(),
            ));
        }
        conn.begin_transaction().or_store_err("begin")?;
        Ok(Self {
            store,
            conn,
            pending_creates: Vec::new(),
            pending_after: Vec::new(),
            state: TxState::Active,
        })
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        if self.state == TxState::Active {
            Ok(())
        } else {
            Err(Error::Transaction(format!(
                "{} called on a {} transaction",
                operation, self.state
            )))
        }
    }

    /// Number of vector writes waiting for commit
    pub fn pending_vector_ops(&self) -> usize {
        self.pending_creates.len() + self.pending_after.len()
    }

    // ========== Vector write buffering (one pending op per id) ==========

    fn queue_create(&mut self, record: VectorRecord) {
        // Delete-then-create of one id becomes a post-commit update
        if let Some(pos) = self.pending_after.iter().position(|op| op.id() == record.id) {
            self.pending_after.remove(pos);
            self.pending_after.push(DeferredOp::Update(record));
            return;
        }
        self.pending_creates.retain(|r| r.id != record.id);
        self.pending_creates.push(record);
    }

    fn queue_update(&mut self, record: VectorRecord) {
        if let Some(pending) = self.pending_creates.iter_mut().find(|r| r.id == record.id) {
            *pending = record;
            return;
        }
        self.pending_after.retain(|op| op.id() != record.id);
        self.pending_after.push(DeferredOp::Update(record));
    }

    fn queue_delete(&mut self, id: &str) {
        let before = self.pending_creates.len();
        self.pending_creates.retain(|r| r.id != id);
        if self.pending_creates.len() != before {
            // Never flushed, nothing to delete
            return;
        }
        self.pending_after.retain(|op| op.id() != id);
        self.pending_after.push(DeferredOp::Delete(id.to_string()));
    }

    // ========== Entity Operations ==========

    /// Insert a new entity; `vector` overrides the configured embedder
    pub async fn create_entity(&mut self, mut entity: Entity, vector: Option<Vec<f32>>) -> Result<Entity> {
        self.ensure_active("create_entity")?;
        entity.validate()?;

        let now = Utc::now();
        entity.created_at = now;
        entity.updated_at = now;
        entity.embedding_ref = None;

        let vector = self
            .store
            .vector_for(&entity.id, entity.embedding_text(), vector)
            .await?;
        if vector.is_some() {
            entity.embedding_ref = Some(entity.id.clone());
        }

        self.conn.insert_entity(&entity).or_store_err("create_entity")?;

        if let Some(vector) = vector {
            let record = VectorRecord::new(&entity.id, ContentType::Entity, vector)
                .with_metadata(entity_vector_metadata(&entity));
            self.queue_create(record);
        }

        tracing::debug!("created entity {} ({})", entity.id, entity.canonical_name);
        Ok(entity)
    }

    pub async fn get_entity(&self, id: &str) -> Result<Entity> {
        self.ensure_active("get_entity")?;
        self.load_entity(id)
    }

    fn load_entity(&self, id: &str) -> Result<Entity> {
        self.conn
            .get_entity(id)
            .or_store_err("get_entity")?
            .ok_or_else(|| Error::not_found(RecordKind::Entity, id))
    }

    /// Replace an entity's fields. `created_at` and `embedding_ref` are
    /// store-managed; the entity is re-embedded when its text changes.
    pub async fn update_entity(&mut self, mut entity: Entity, vector: Option<Vec<f32>>) -> Result<Entity> {
        self.ensure_active("update_entity")?;
        entity.validate()?;

        let existing = self.load_entity(&entity.id)?;
        entity.created_at = existing.created_at;
        entity.updated_at = Utc::now();
        entity.embedding_ref = existing.embedding_ref.clone();

        let vector = match vector {
            Some(v) => self.store.vector_for(&entity.id, String::new(), Some(v)).await?,
            None if existing.embedding_text() != entity.embedding_text() => {
                self.store
                    .vector_for(&entity.id, entity.embedding_text(), None)
                    .await?
            }
            None => None,
        };

        if let Some(vector) = vector {
            let record = VectorRecord::new(&entity.id, ContentType::Entity, vector)
                .with_metadata(entity_vector_metadata(&entity));
            if existing.embedding_ref.is_some() {
                self.queue_update(record);
            } else {
                entity.embedding_ref = Some(entity.id.clone());
                self.queue_create(record);
            }
        }

        self.conn.update_entity(&entity).or_store_err("update_entity")?;
        Ok(entity)
    }

    /// Delete an entity together with every relation touching it; the
    /// vector record goes after commit
    pub async fn delete_entity(&mut self, id: &str) -> Result<()> {
        self.ensure_active("delete_entity")?;
        let existing = self.load_entity(id)?;

        let cascaded = self
            .conn
            .delete_relations_for_entity(id)
            .or_store_err("delete_entity")?;
        self.conn.delete_entity(id).or_store_err("delete_entity")?;

        if existing.embedding_ref.is_some() {
            self.queue_delete(id);
        }

        tracing::debug!("deleted entity {} and {} dependent relations", id, cascaded);
        Ok(())
    }

    /// Relations touching an entity in either direction, in id order
    pub async fn get_entity_relations(&self, entity_id: &str, predicate: Option<&str>) -> Result<Vec<Relation>> {
        self.ensure_active("get_entity_relations")?;
        self.conn
            .get_relations_for_entity(entity_id, predicate)
            .or_store_err("get_entity_relations")
    }

    /// Fold `merge_id` into `keep_id`.
    ///
    /// Relations are re-pointed, names become aliases and the kept
    /// confidence is `max(keep, merged * match_confidence)`.
    pub async fn merge_entities(&mut self, keep_id: &str, merge_id: &str, decision: &MergeDecision) -> Result<Entity> {
        self.ensure_active("merge_entities")?;
        if keep_id == merge_id {
            return Err(ValidationError::SelfMerge(keep_id.to_string()).into());
        }
        check_unit_range("match_confidence", decision.match_confidence)?;

        let mut keep = self.load_entity(keep_id)?;
        let merged = self.load_entity(merge_id)?;
        let original = keep.clone();

        let repointed = self
            .conn
            .repoint_relations(merge_id, keep_id)
            .or_store_err("merge_entities")?;

        for name in merged.all_names() {
            keep.aliases.insert(name.to_string());
        }
        if let Some(name) = decision.suggested_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            if name != keep.canonical_name {
                keep.aliases.insert(keep.canonical_name.clone());
                keep.canonical_name = name.to_string();
            }
        }
        keep.aliases.remove(&keep.canonical_name);

        keep.confidence_score = keep
            .confidence_score
            .max(merged.confidence_score * decision.match_confidence);
        for (key, value) in merged.properties {
            keep.properties.entry(key).or_insert(value);
        }
        keep.updated_at = Utc::now();

        let vector = if original.embedding_text() != keep.embedding_text() {
            self.store.vector_for(keep_id, keep.embedding_text(), None).await?
        } else {
            None
        };
        if let Some(vector) = vector {
            let record = VectorRecord::new(keep_id, ContentType::Entity, vector)
                .with_metadata(entity_vector_metadata(&keep));
            if keep.embedding_ref.is_some() {
                self.queue_update(record);
            } else {
                keep.embedding_ref = Some(keep_id.to_string());
                self.queue_create(record);
            }
        }

        self.conn.update_entity(&keep).or_store_err("merge_entities")?;
        self.conn.delete_entity(merge_id).or_store_err("merge_entities")?;
        if merged.embedding_ref.is_some() {
            self.queue_delete(merge_id);
        }

        tracing::info!(
            "merged entity {} into {} ({} relations re-pointed)",
            merge_id,
            keep_id,
            repointed
        );
        Ok(keep)
    }

    // ========== Relation Operations ==========

    fn check_endpoints(&self, relation: &Relation) -> Result<()> {
        for (field, id) in [("subject_id", &relation.subject_id), ("object_id", &relation.object_id)] {
            if !self.conn.entity_exists(id).or_store_err("check_relation")? {
                return Err(ValidationError::DanglingReference {
                    field,
                    id: id.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub async fn create_relation(&mut self, mut relation: Relation) -> Result<Relation> {
        self.ensure_active("create_relation")?;
        relation.validate()?;
        self.check_endpoints(&relation)?;
        relation.created_at = Utc::now();

        self.conn.insert_relation(&relation).or_store_err("create_relation")?;
        Ok(relation)
    }

    pub async fn get_relation(&self, id: &str) -> Result<Relation> {
        self.ensure_active("get_relation")?;
        self.load_relation(id)
    }

    fn load_relation(&self, id: &str) -> Result<Relation> {
        self.conn
            .get_relation(id)
            .or_store_err("get_relation")?
            .ok_or_else(|| Error::not_found(RecordKind::Relation, id))
    }

    pub async fn update_relation(&mut self, mut relation: Relation) -> Result<Relation> {
        self.ensure_active("update_relation")?;
        relation.validate()?;
        let existing = self.load_relation(&relation.id)?;
        self.check_endpoints(&relation)?;
        relation.created_at = existing.created_at;

        self.conn.update_relation(&relation).or_store_err("update_relation")?;
        Ok(relation)
    }

    pub async fn delete_relation(&mut self, id: &str) -> Result<()> {
        self.ensure_active("delete_relation")?;
        let removed = self.conn.delete_relation(id).or_store_err("delete_relation")?;
        if removed == 0 {
            return Err(Error::not_found(RecordKind::Relation, id));
        }
        Ok(())
    }

    // ========== News Event Operations ==========

    pub async fn create_news(&mut self, mut event: NewsEvent, vector: Option<Vec<f32>>) -> Result<NewsEvent> {
        self.ensure_active("create_news")?;
        event.validate()?;
        event.created_at = Utc::now();

        let vector = self
            .store
            .vector_for(&event.id, event.embedding_text(), vector)
            .await?;

        self.conn.insert_news(&event).or_store_err("create_news")?;

        if let Some(vector) = vector {
            let record = VectorRecord::new(&event.id, ContentType::NewsEvent, vector)
                .with_metadata(news_vector_metadata(&event));
            self.queue_create(record);
        }
        Ok(event)
    }

    pub async fn get_news(&self, id: &str) -> Result<NewsEvent> {
        self.ensure_active("get_news")?;
        self.load_news(id)
    }

    fn load_news(&self, id: &str) -> Result<NewsEvent> {
        self.conn
            .get_news(id)
            .or_store_err("get_news")?
            .ok_or_else(|| Error::not_found(RecordKind::NewsEvent, id))
    }

    pub async fn update_news(&mut self, mut event: NewsEvent, vector: Option<Vec<f32>>) -> Result<NewsEvent> {
        self.ensure_active("update_news")?;
        event.validate()?;
        let existing = self.load_news(&event.id)?;
        event.created_at = existing.created_at;

        let vector = match vector {
            Some(v) => self.store.vector_for(&event.id, String::new(), Some(v)).await?,
            None if existing.embedding_text() != event.embedding_text() => {
                self.store
                    .vector_for(&event.id, event.embedding_text(), None)
                    .await?
            }
            None => None,
        };

        self.conn.update_news(&event).or_store_err("update_news")?;

        if let Some(vector) = vector {
            let record = VectorRecord::new(&event.id, ContentType::NewsEvent, vector)
                .with_metadata(news_vector_metadata(&event));
            let has_vector = self.pending_creates.iter().any(|r| r.id == event.id)
                || self.store.has_vector(&event.id).await?;
            if has_vector {
                self.queue_update(record);
            } else {
                self.queue_create(record);
            }
        }
        Ok(event)
    }

    pub async fn delete_news(&mut self, id: &str) -> Result<()> {
        self.ensure_active("delete_news")?;
        let removed = self.conn.delete_news(id).or_store_err("delete_news")?;
        if removed == 0 {
            return Err(Error::not_found(RecordKind::NewsEvent, id));
        }
        self.queue_delete(id);
        Ok(())
    }

    // ========== Commit / Rollback ==========

    /// Flush vector creations, commit the relational side, then flush
    /// vector updates and deletes.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_active("commit")?;

        let creates = std::mem::take(&mut self.pending_creates);
        let mut flushed: Vec<String> = Vec::with_capacity(creates.len());
        for record in creates {
            let id = record.id.clone();
            if let Err(e) = self.store.vectors().add(record).await {
                for done in &flushed {
                    if let Err(cleanup) = self.store.vectors().delete(done).await {
                        tracing::warn!("could not remove vector {} after failed commit: {}", done, cleanup);
                    }
                }
                self.abort();
                return Err(vector_error(e, "commit", &id));
            }
            flushed.push(id);
        }

        if let Err(e) = self.conn.commit() {
            if !flushed.is_empty() {
                tracing::warn!(
                    "relational commit failed; {} vector records left for reconciliation",
                    flushed.len()
                );
            }
            self.abort();
            return Err(sql_error(e, "commit"));
        }
        self.state = TxState::Committed;

        let mut first_error = None;
        // An op leaves the queue only once it has completed, so a cancelled
        // flush leaves the unapplied ones behind for Drop to report
        while let Some(op) = self.pending_after.first() {
            let id = op.id().to_string();
            let result = match op {
                DeferredOp::Update(record) => match self.store.vectors().update(record.clone()).await {
                    // Record vanished underneath us; write it fresh
                    Err(VectorIndexError::Missing(_)) => self.store.vectors().add(record.clone()).await,
                    other => other,
                },
                DeferredOp::Delete(id) => self.store.vectors().delete(id).await.map(|_| ()),
            }
            .map_err(|e| vector_error(e, "commit", &id));
            self.pending_after.remove(0);

            if let Err(e) = result {
                tracing::warn!("post-commit vector write failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Discard relational writes and every buffered vector write
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_active("rollback")?;
        self.pending_creates.clear();
        self.pending_after.clear();
        self.state = TxState::RolledBack;
        self.conn.rollback().or_store_err("rollback")
    }

    fn abort(&mut self) {
        self.pending_creates.clear();
        self.pending_after.clear();
        self.state = TxState::RolledBack;
        if self.conn.in_transaction() {
            if let Err(e) = self.conn.rollback() {
                tracing::warn!("rollback after failed commit also failed: {}", e);
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            tracing::warn!(
                "transaction dropped while active; rolling back ({} buffered vector writes discarded)",
                self.pending_vector_ops()
            );
            self.abort();
        } else if self.state == TxState::Committed && !self.pending_after.is_empty() {
            let ids: Vec<&str> = self.pending_after.iter().map(DeferredOp::id).collect();
            tracing::warn!(
                "transaction dropped during post-commit flush; {} vector writes not applied, stale until rewritten: {}",
                ids.len(),
                ids.join(", ")
            );
        }
    }
}
