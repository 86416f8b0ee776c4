//! Data converter - persisted rows and vector metadata <-> domain types
//!
//! JSON columns (`properties`, `aliases`, vector `metadata`) are decoded
//! here; decode failures surface as `FromSqlConversionFailure` so they
//! flow through the same error translation as any other SQLite error.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Row;
use rusqlite::types::Type;
use serde_json::{Map, Value};

use crate::entity::Entity;
use crate::news::NewsEvent;
use crate::relation::Relation;
use crate::search::ContentType;

/// Column list matching `entity_from_row`
pub const ENTITY_COLUMNS: &str =
    "id, name, canonical_name, type, properties, confidence_score, source, aliases, embedding_ref, created_at, updated_at";

/// Column list matching `relation_from_row`
pub const RELATION_COLUMNS: &str =
    "id, subject_id, predicate, object_id, confidence_score, description, created_at";

/// Column list matching `news_from_row`
pub const NEWS_COLUMNS: &str = "id, title, content, source, publish_time, created_at";

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Helper to convert a row to an Entity
pub fn entity_from_row(row: &Row) -> rusqlite::Result<Entity> {
    let properties: BTreeMap<String, Value> = json_column(row, 4)?;
    let aliases: BTreeSet<String> = json_column(row, 7)?;

    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        canonical_name: row.get(2)?,
        entity_type: row.get(3)?,
        properties,
        confidence_score: row.get(5)?,
        source: row.get(6)?,
        aliases,
        embedding_ref: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Helper to convert a row to a Relation
pub fn relation_from_row(row: &Row) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        predicate: row.get(2)?,
        object_id: row.get(3)?,
        confidence_score: row.get(4)?,
        description: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Helper to convert a row to a NewsEvent
pub fn news_from_row(row: &Row) -> rusqlite::Result<NewsEvent> {
    Ok(NewsEvent {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        source: row.get(3)?,
        publish_time: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// JSON text stored in the `properties` column
pub fn encode_properties(entity: &Entity) -> rusqlite::Result<String> {
    serde_json::to_string(&entity.properties).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// JSON text stored in the `aliases` column
pub fn encode_aliases(entity: &Entity) -> rusqlite::Result<String> {
    serde_json::to_string(&entity.aliases).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Metadata attached to an entity's vector record
pub fn entity_vector_metadata(entity: &Entity) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("content_type".into(), Value::from(ContentType::Entity.as_str()));
    meta.insert("name".into(), Value::from(entity.canonical_name.clone()));
    meta.insert("type".into(), Value::from(entity.entity_type.clone()));
    meta.insert("source".into(), Value::from(entity.source.clone()));
    meta
}

/// Metadata attached to a news event's vector record
pub fn news_vector_metadata(event: &NewsEvent) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("content_type".into(), Value::from(ContentType::NewsEvent.as_str()));
    meta.insert("title".into(), Value::from(event.title.clone()));
    meta.insert("source".into(), Value::from(event.source.clone()));
    meta
}

/// Excerpt of `text` around the first case-insensitive occurrence of `query`
pub fn snippet(text: &str, query: &str, radius: usize) -> Option<String> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    let chars: Vec<char> = text.chars().collect();
    let lower: Vec<char> = text.to_lowercase().chars().collect();
    let needle: Vec<char> = query.to_lowercase().chars().collect();

    // Lower-casing can change the char count of exotic scripts; fall back to the start
    if lower.len() != chars.len() {
        return Some(chars.iter().take(radius * 2).collect());
    }

    let pos = lower.windows(needle.len()).position(|w| w == needle.as_slice())?;
    let start = pos.saturating_sub(radius);
    let end = (pos + needle.len() + radius).min(chars.len());

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push_str("...");
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_snippet_window() {
        let text = "今日苹果公司股价上涨，iPhone 销量超预期";
        let s = snippet(text, "股价", 2).unwrap();
        assert_eq!(s, "...公司股价上涨...");
        assert!(snippet(text, "微软", 2).is_none());
    }

    #[test]
    fn test_snippet_case_insensitive() {
        let s = snippet("Shares of APPLE rose", "apple", 3).unwrap();
        assert!(s.contains("APPLE"));
    }

    #[test]
    fn test_entity_metadata() {
        let entity = Entity::new("Apple", "company").with_source("feed");
        let meta = entity_vector_metadata(&entity);
        assert_eq!(meta["content_type"], "entity");
        assert_eq!(meta["type"], "company");
    }

    #[test]
    fn test_bad_json_column_is_conversion_failure() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .query_row("SELECT 'not json'", [], |row| json_column::<BTreeSet<String>>(row, 0))
            .unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(0, _, _)));
    }
}
