//! SQLite relational store adapter
//!
//! Typed CRUD over entities, relations and news events. Methods return
//! backend-native `rusqlite::Result`s; the hybrid store translates them
//! into the crate's error taxonomy.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::convert::{
    self, ENTITY_COLUMNS, NEWS_COLUMNS, RELATION_COLUMNS, encode_aliases, encode_properties,
};
use super::schema;
use crate::entity::Entity;
use crate::news::NewsEvent;
use crate::relation::Relation;
use crate::search::{ListOptions, SortKey};

/// SQLite-backed storage for entities, relations and news events
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    /// Cheap liveness probe
    pub fn ping(&self) -> rusqlite::Result<()> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    // ========== Entity Operations ==========

    pub fn insert_entity(&self, entity: &Entity) -> rusqlite::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO entities (id, name, canonical_name, type, properties, confidence_score,
                                  source, aliases, embedding_ref, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                entity.id,
                entity.name,
                entity.canonical_name,
                entity.entity_type,
                encode_properties(entity)?,
                entity.confidence_score,
                entity.source,
                encode_aliases(entity)?,
                entity.embedding_ref,
                entity.created_at,
                entity.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get an entity by id
    pub fn get_entity(&self, id: &str) -> rusqlite::Result<Option<Entity>> {
        self.conn
            .query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
                [id],
                convert::entity_from_row,
            )
            .optional()
    }

    pub fn entity_exists(&self, id: &str) -> rusqlite::Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM entities WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Fetch entities by id list; unknown ids are skipped, input order kept
    pub fn get_entities(&self, ids: &[String]) -> rusqlite::Result<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE id IN ({placeholders})"
        ))?;
        let mut found: std::collections::HashMap<String, Entity> = stmt
            .query_map(params_from_iter(ids.iter()), convert::entity_from_row)?
            .map(|r| r.map(|e| (e.id.clone(), e)))
            .collect::<rusqlite::Result<_>>()?;

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// Find entities whose name or canonical name equals `name`
    pub fn find_entities_by_name(&self, name: &str) -> rusqlite::Result<Vec<Entity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE name = ?1 OR canonical_name = ?1 ORDER BY id"
        ))?;
        stmt.query_map([name], convert::entity_from_row)?.collect()
    }

    /// Free-text match over names and aliases, exact name matches first
    pub fn search_entities_text(
        &self,
        query: &str,
        entity_type: Option<&str>,
        source: Option<&str>,
        limit: usize,
    ) -> rusqlite::Result<Vec<Entity>> {
        let pattern = like_pattern(query);
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {ENTITY_COLUMNS} FROM entities
            WHERE (name LIKE ?1 ESCAPE '\' OR canonical_name LIKE ?1 ESCAPE '\'
                   OR aliases LIKE ?1 ESCAPE '\')
              AND (?2 IS NULL OR type = ?2)
              AND (?3 IS NULL OR source = ?3)
            ORDER BY CASE
                WHEN lower(name) = lower(?5) OR lower(canonical_name) = lower(?5)
                     OR EXISTS (SELECT 1 FROM json_each(entities.aliases) WHERE lower(json_each.value) = lower(?5))
                THEN 0
                ELSE 1
            END, updated_at DESC, id
            LIMIT ?4
            "#
        ))?;
        stmt.query_map(
            params![pattern, entity_type, source, limit as i64, query],
            convert::entity_from_row,
        )?
        .collect()
    }

    /// Replace all mutable fields of an entity; returns rows touched
    pub fn update_entity(&self, entity: &Entity) -> rusqlite::Result<usize> {
        self.conn.execute(
            r#"
            UPDATE entities SET name = ?2, canonical_name = ?3, type = ?4, properties = ?5,
                confidence_score = ?6, source = ?7, aliases = ?8, embedding_ref = ?9, updated_at = ?10
            WHERE id = ?1
            "#,
            params![
                entity.id,
                entity.name,
                entity.canonical_name,
                entity.entity_type,
                encode_properties(entity)?,
                entity.confidence_score,
                entity.source,
                encode_aliases(entity)?,
                entity.embedding_ref,
                entity.updated_at,
            ],
        )
    }

    pub fn delete_entity(&self, id: &str) -> rusqlite::Result<usize> {
        self.conn.execute("DELETE FROM entities WHERE id = ?1", [id])
    }

    pub fn list_entities(&self, opts: &ListOptions) -> rusqlite::Result<Vec<Entity>> {
        let column = match opts.sort {
            SortKey::Id => "id",
            SortKey::Name => "name",
            SortKey::Type => "type",
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities ORDER BY {column} {}, id LIMIT ?1 OFFSET ?2",
            direction(opts)
        ))?;
        stmt.query_map(params![opts.take as i64, opts.skip as i64], convert::entity_from_row)?
            .collect()
    }

    pub fn count_entities(&self) -> rusqlite::Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========== Relation Operations ==========

    pub fn insert_relation(&self, relation: &Relation) -> rusqlite::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO relations (id, subject_id, predicate, object_id, confidence_score, description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                relation.id,
                relation.subject_id,
                relation.predicate,
                relation.object_id,
                relation.confidence_score,
                relation.description,
                relation.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_relation(&self, id: &str) -> rusqlite::Result<Option<Relation>> {
        self.conn
            .query_row(
                &format!("SELECT {RELATION_COLUMNS} FROM relations WHERE id = ?1"),
                [id],
                convert::relation_from_row,
            )
            .optional()
    }

    pub fn update_relation(&self, relation: &Relation) -> rusqlite::Result<usize> {
        self.conn.execute(
            r#"
            UPDATE relations SET subject_id = ?2, predicate = ?3, object_id = ?4,
                confidence_score = ?5, description = ?6
            WHERE id = ?1
            "#,
            params![
                relation.id,
                relation.subject_id,
                relation.predicate,
                relation.object_id,
                relation.confidence_score,
                relation.description,
            ],
        )
    }

    pub fn delete_relation(&self, id: &str) -> rusqlite::Result<usize> {
        self.conn.execute("DELETE FROM relations WHERE id = ?1", [id])
    }

    /// Relations touching an entity in either direction, in id order
    pub fn get_relations_for_entity(&self, entity_id: &str, predicate: Option<&str>) -> rusqlite::Result<Vec<Relation>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {RELATION_COLUMNS} FROM relations
            WHERE (subject_id = ?1 OR object_id = ?1)
              AND (?2 IS NULL OR predicate = ?2)
            ORDER BY id
            "#
        ))?;
        stmt.query_map(params![entity_id, predicate], convert::relation_from_row)?
            .collect()
    }

    /// Remove every relation touching an entity
    pub fn delete_relations_for_entity(&self, entity_id: &str) -> rusqlite::Result<usize> {
        self.conn.execute(
            "DELETE FROM relations WHERE subject_id = ?1 OR object_id = ?1",
            [entity_id],
        )
    }

    /// Point every relation endpoint at `from_id` to `to_id` instead.
    ///
    /// Relations between the two entities would become self-loops and are
    /// removed first. Returns the number of re-pointed relations.
    pub fn repoint_relations(&self, from_id: &str, to_id: &str) -> rusqlite::Result<usize> {
        self.conn.execute(
            r#"
            DELETE FROM relations
            WHERE (subject_id = ?1 AND object_id = ?2) OR (subject_id = ?2 AND object_id = ?1)
            "#,
            params![from_id, to_id],
        )?;
        let subjects = self.conn.execute(
            "UPDATE relations SET subject_id = ?2 WHERE subject_id = ?1",
            params![from_id, to_id],
        )?;
        let objects = self.conn.execute(
            "UPDATE relations SET object_id = ?2 WHERE object_id = ?1",
            params![from_id, to_id],
        )?;
        Ok(subjects + objects)
    }

    /// Free-text match over predicate and description, ranked by predicate match
    pub fn search_relations_text(&self, query: &str, limit: usize) -> rusqlite::Result<Vec<Relation>> {
        let pattern = like_pattern(query);
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {RELATION_COLUMNS} FROM relations
            WHERE predicate LIKE ?1 ESCAPE '\' OR description LIKE ?1 ESCAPE '\'
            ORDER BY CASE
                WHEN lower(predicate) = lower(?3) THEN 0
                WHEN predicate LIKE ?1 ESCAPE '\' THEN 1
                ELSE 2
            END, created_at DESC, id
            LIMIT ?2
            "#
        ))?;
        stmt.query_map(params![pattern, limit as i64, query], convert::relation_from_row)?
            .collect()
    }

    pub fn list_relations(&self, opts: &ListOptions) -> rusqlite::Result<Vec<Relation>> {
        let column = match opts.sort {
            SortKey::Id => "id",
            SortKey::Name | SortKey::Type => "predicate",
            SortKey::CreatedAt | SortKey::UpdatedAt => "created_at",
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RELATION_COLUMNS} FROM relations ORDER BY {column} {}, id LIMIT ?1 OFFSET ?2",
            direction(opts)
        ))?;
        stmt.query_map(params![opts.take as i64, opts.skip as i64], convert::relation_from_row)?
            .collect()
    }

    pub fn count_relations(&self) -> rusqlite::Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM relations", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========== News Event Operations ==========

    pub fn insert_news(&self, event: &NewsEvent) -> rusqlite::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO news_events (id, title, content, source, publish_time, content_hash, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                event.id,
                event.title,
                event.content,
                event.source,
                event.publish_time,
                event.content_hash(),
                event.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_news(&self, id: &str) -> rusqlite::Result<Option<NewsEvent>> {
        self.conn
            .query_row(
                &format!("SELECT {NEWS_COLUMNS} FROM news_events WHERE id = ?1"),
                [id],
                convert::news_from_row,
            )
            .optional()
    }

    pub fn news_exists(&self, id: &str) -> rusqlite::Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM news_events WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn update_news(&self, event: &NewsEvent) -> rusqlite::Result<usize> {
        self.conn.execute(
            r#"
            UPDATE news_events SET title = ?2, content = ?3, source = ?4, publish_time = ?5, content_hash = ?6
            WHERE id = ?1
            "#,
            params![
                event.id,
                event.title,
                event.content,
                event.source,
                event.publish_time,
                event.content_hash(),
            ],
        )
    }

    pub fn delete_news(&self, id: &str) -> rusqlite::Result<usize> {
        self.conn.execute("DELETE FROM news_events WHERE id = ?1", [id])
    }

    /// Free-text match over title and content, ranked by title match
    pub fn search_news_text(&self, query: &str, source: Option<&str>, limit: usize) -> rusqlite::Result<Vec<NewsEvent>> {
        let pattern = like_pattern(query);
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {NEWS_COLUMNS} FROM news_events
            WHERE (title LIKE ?1 ESCAPE '\' OR content LIKE ?1 ESCAPE '\')
              AND (?2 IS NULL OR source = ?2)
            ORDER BY CASE
                WHEN lower(title) = lower(?4) THEN 0
                WHEN title LIKE ?1 ESCAPE '\' THEN 1
                ELSE 2
            END, created_at DESC, id
            LIMIT ?3
            "#
        ))?;
        stmt.query_map(params![pattern, source, limit as i64, query], convert::news_from_row)?
            .collect()
    }

    pub fn list_news(&self, opts: &ListOptions) -> rusqlite::Result<Vec<NewsEvent>> {
        let column = match opts.sort {
            SortKey::Id => "id",
            SortKey::Name => "title",
            SortKey::Type => "source",
            SortKey::CreatedAt | SortKey::UpdatedAt => "created_at",
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NEWS_COLUMNS} FROM news_events ORDER BY {column} {}, id LIMIT ?1 OFFSET ?2",
            direction(opts)
        ))?;
        stmt.query_map(params![opts.take as i64, opts.skip as i64], convert::news_from_row)?
            .collect()
    }

    pub fn count_news(&self) -> rusqlite::Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM news_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========== Transactions ==========

    /// Begin a transaction
    pub fn begin_transaction(&mut self) -> rusqlite::Result<()> {
        self.conn.execute("BEGIN TRANSACTION", [])?;
        Ok(())
    }

    /// Commit a transaction
    pub fn commit(&mut self) -> rusqlite::Result<()> {
        self.conn.execute("COMMIT", [])?;
        Ok(())
    }

    /// Rollback a transaction
    pub fn rollback(&mut self) -> rusqlite::Result<()> {
        self.conn.execute("ROLLBACK", [])?;
        Ok(())
    }

    /// True while a transaction is open on the connection
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Get database statistics
    pub fn stats(&self) -> rusqlite::Result<DbStats> {
        Ok(DbStats {
            entities: self.count_entities()?,
            relations: self.count_relations()?,
            news_events: self.count_news()?,
            vectors: 0,
        })
    }
}

fn direction(opts: &ListOptions) -> &'static str {
    if opts.descending { "DESC" } else { "ASC" }
}

/// `%query%` with LIKE wildcards in the query escaped
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Database statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DbStats {
    pub entities: usize,
    pub relations: usize,
    pub news_events: usize,
    pub vectors: usize,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Entities: {}", self.entities)?;
        writeln!(f, "  Relations: {}", self.relations)?;
        writeln!(f, "  News events: {}", self.news_events)?;
        writeln!(f, "  Vectors: {}", self.vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entity(id: &str, name: &str) -> Entity {
        Entity::new(name, "公司").with_id(id)
    }

    #[test]
    fn test_entity_crud() {
        let store = SqliteStore::open_in_memory().unwrap();

        let entity = sample_entity("e1", "苹果")
            .with_alias("Apple")
            .with_property("ticker", serde_json::json!("AAPL"));
        store.insert_entity(&entity).unwrap();

        let retrieved = store.get_entity("e1").unwrap().unwrap();
        assert_eq!(retrieved.name, "苹果");
        assert!(retrieved.aliases.contains("Apple"));
        assert_eq!(retrieved.properties["ticker"], "AAPL");

        let mut changed = retrieved.clone();
        changed.canonical_name = "苹果公司".into();
        assert_eq!(store.update_entity(&changed).unwrap(), 1);
        assert_eq!(store.get_entity("e1").unwrap().unwrap().canonical_name, "苹果公司");

        assert_eq!(store.delete_entity("e1").unwrap(), 1);
        assert!(store.get_entity("e1").unwrap().is_none());
    }

    #[test]
    fn test_get_entities_keeps_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_entity(&sample_entity("a", "A")).unwrap();
        store.insert_entity(&sample_entity("b", "B")).unwrap();

        let ids = vec!["b".to_string(), "missing".to_string(), "a".to_string()];
        let found = store.get_entities(&ids).unwrap();
        let found_ids: Vec<&str> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(found_ids, vec!["b", "a"]);
    }

    #[test]
    fn test_relations_both_directions() {
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.insert_entity(&sample_entity(id, id)).unwrap();
        }
        store.insert_relation(&Relation::new("a", "owns", "b").with_id("r1")).unwrap();
        store.insert_relation(&Relation::new("c", "supplies", "a").with_id("r2")).unwrap();

        let all = store.get_relations_for_entity("a", None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "r1");

        let owns = store.get_relations_for_entity("a", Some("owns")).unwrap();
        assert_eq!(owns.len(), 1);

        assert_eq!(store.delete_relations_for_entity("a").unwrap(), 2);
        assert_eq!(store.count_relations().unwrap(), 0);
    }

    #[test]
    fn test_dangling_relation_rejected_by_foreign_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_entity(&sample_entity("a", "A")).unwrap();
        assert!(store.insert_relation(&Relation::new("a", "owns", "ghost")).is_err());
    }

    #[test]
    fn test_repoint_relations_drops_self_loops() {
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ["keep", "dup", "x"] {
            store.insert_entity(&sample_entity(id, id)).unwrap();
        }
        store.insert_relation(&Relation::new("dup", "partner", "keep").with_id("r1")).unwrap();
        store.insert_relation(&Relation::new("dup", "owns", "x").with_id("r2")).unwrap();

        assert_eq!(store.repoint_relations("dup", "keep").unwrap(), 1);
        let rels = store.get_relations_for_entity("keep", None).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].subject_id, "keep");
        assert_eq!(rels[0].object_id, "x");
    }

    #[test]
    fn test_text_search_escapes_wildcards() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_entity(&sample_entity("a", "100% Juice")).unwrap();
        store.insert_entity(&sample_entity("b", "1000 Juice")).unwrap();

        let hits = store.search_entities_text("100%", None, None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn test_text_search_ranks_exact_names_before_recent_matches() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut exact = sample_entity("exact", "Apple");
        exact.updated_at = chrono::Utc::now() - chrono::Duration::days(30);
        store.insert_entity(&exact).unwrap();
        for (id, name) in [("c1", "Apple Store"), ("c2", "Apple Music"), ("c3", "Apple Pay")] {
            store.insert_entity(&sample_entity(id, name)).unwrap();
        }
        let mut alias = sample_entity("alias", "苹果公司").with_alias("APPLE");
        alias.updated_at = chrono::Utc::now() - chrono::Duration::days(60);
        store.insert_entity(&alias).unwrap();

        let hits = store.search_entities_text("apple", None, None, 2).unwrap();
        let ids: Vec<&str> = hits.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "alias"]);
    }

    #[test]
    fn test_text_search_ranks_title_matches_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut titled = NewsEvent::new("Apple", "quarterly results").with_id("n1");
        titled.created_at = chrono::Utc::now() - chrono::Duration::days(7);
        store.insert_news(&titled).unwrap();
        store
            .insert_news(&NewsEvent::new("Apple earnings", "strong quarter").with_id("n2"))
            .unwrap();
        store
            .insert_news(&NewsEvent::new("Markets", "apple shares rose").with_id("n3"))
            .unwrap();

        let hits = store.search_news_text("apple", None, 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);

        for id in ["a", "b"] {
            store.insert_entity(&sample_entity(id, id)).unwrap();
        }
        store
            .insert_relation(&Relation::new("a", "supplies", "b").with_id("r1").with_description("owns a stake"))
            .unwrap();
        let mut owns = Relation::new("b", "owns", "a").with_id("r2");
        owns.created_at = chrono::Utc::now() - chrono::Duration::days(7);
        store.insert_relation(&owns).unwrap();
        let hits = store.search_relations_text("owns", 1).unwrap();
        assert_eq!(hits[0].id, "r2");
    }

    #[test]
    fn test_list_entities_paging_and_sort() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, name) in [("1", "c"), ("2", "a"), ("3", "b")] {
            store.insert_entity(&sample_entity(id, name)).unwrap();
        }
        let opts = ListOptions::page(0, 2).sorted_by(SortKey::Name, false);
        let page: Vec<String> = store.list_entities(&opts).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(page, vec!["a", "b"]);

        let opts = ListOptions::page(2, 2).sorted_by(SortKey::Name, false);
        assert_eq!(store.list_entities(&opts).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_news_content_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_news(&NewsEvent::new("t", "same body")).unwrap();
        assert!(store.insert_news(&NewsEvent::new("t", "same body")).is_err());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.begin_transaction().unwrap();
        assert!(store.in_transaction());
        store.insert_entity(&sample_entity("a", "A")).unwrap();
        store.rollback().unwrap();
        assert!(!store.in_transaction());
        assert!(store.get_entity("a").unwrap().is_none());
    }
}
