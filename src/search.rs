//! Search and listing types shared by the store and its consumers

use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::news::NewsEvent;
use crate::relation::Relation;
use crate::{Error, ValidationError};

/// Kind of content a vector record or search hit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Entity,
    Relation,
    NewsEvent,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Entity => "entity",
            ContentType::Relation => "relation",
            ContentType::NewsEvent => "news_event",
        }
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "entity" | "entities" => Ok(ContentType::Entity),
            "relation" | "relations" => Ok(ContentType::Relation),
            "news_event" | "news" | "event" | "events" => Ok(ContentType::NewsEvent),
            _ => Err(ValidationError::UnknownContentType(s.to_string()).into()),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exactly one payload per search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum SearchPayload {
    Entity(Entity),
    Relation(Relation),
    NewsEvent(NewsEvent),
}

impl SearchPayload {
    pub fn id(&self) -> &str {
        match self {
            SearchPayload::Entity(e) => &e.id,
            SearchPayload::Relation(r) => &r.id,
            SearchPayload::NewsEvent(n) => &n.id,
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            SearchPayload::Entity(_) => ContentType::Entity,
            SearchPayload::Relation(_) => ContentType::Relation,
            SearchPayload::NewsEvent(_) => ContentType::NewsEvent,
        }
    }

    /// Recency used to break score ties
    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            SearchPayload::Entity(e) => e.updated_at,
            SearchPayload::Relation(r) => r.created_at,
            SearchPayload::NewsEvent(n) => n.created_at,
        }
    }

    /// Label for display
    pub fn title(&self) -> &str {
        match self {
            SearchPayload::Entity(e) => &e.canonical_name,
            SearchPayload::Relation(r) => &r.predicate,
            SearchPayload::NewsEvent(n) => &n.title,
        }
    }
}

/// A ranked search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub payload: SearchPayload,
    pub score: f32,
    pub snippet: Option<String>,
}

impl SearchResult {
    pub fn new(payload: SearchPayload, score: f32) -> Self {
        Self { payload, score, snippet: None }
    }

    pub fn id(&self) -> &str {
        self.payload.id()
    }
}

/// Restrictions applied to both search channels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Content types to return; empty means all
    #[serde(default)]
    pub content_types: Vec<ContentType>,
    /// Only entities of this type
    pub entity_type: Option<String>,
    /// Only records from this source
    pub source: Option<String>,
}

impl SearchFilters {
    pub fn allows(&self, content_type: ContentType) -> bool {
        self.content_types.is_empty() || self.content_types.contains(&content_type)
    }

    /// Check payload-level filters that the vector channel cannot push down
    pub fn matches(&self, payload: &SearchPayload) -> bool {
        if !self.allows(payload.content_type()) {
            return false;
        }
        match payload {
            SearchPayload::Entity(e) => {
                self.entity_type.as_deref().is_none_or(|t| e.entity_type == t)
                    && self.source.as_deref().is_none_or(|s| e.source == s)
            }
            SearchPayload::Relation(_) => self.entity_type.is_none() && self.source.is_none(),
            SearchPayload::NewsEvent(n) => {
                self.entity_type.is_none() && self.source.as_deref().is_none_or(|s| n.source == s)
            }
        }
    }
}

/// A hybrid search request
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub filters: SearchFilters,
    pub top_k: usize,
    pub use_vector: bool,
    pub use_fulltext: bool,
    pub deadline: Option<Instant>,
}

impl SearchRequest {
    /// Both channels enabled, top 10
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: SearchFilters::default(),
            top_k: 10,
            use_vector: true,
            use_fulltext: true,
            deadline: None,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn channels(mut self, use_vector: bool, use_fulltext: bool) -> Self {
        self.use_vector = use_vector;
        self.use_fulltext = use_fulltext;
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Sort keys accepted by list operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Id,
    Name,
    Type,
    CreatedAt,
    #[default]
    UpdatedAt,
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(SortKey::Id),
            "name" => Ok(SortKey::Name),
            "type" => Ok(SortKey::Type),
            "created_at" => Ok(SortKey::CreatedAt),
            "updated_at" => Ok(SortKey::UpdatedAt),
            _ => Err(ValidationError::UnknownSortKey(s.to_string()).into()),
        }
    }
}

/// Paging and ordering for list operations; default `updated_at` descending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub skip: usize,
    pub take: usize,
    pub sort: SortKey,
    pub descending: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            take: 100,
            sort: SortKey::UpdatedAt,
            descending: true,
        }
    }
}

impl ListOptions {
    pub fn page(skip: usize, take: usize) -> Self {
        Self { skip, take, ..Self::default() }
    }

    pub fn sorted_by(mut self, sort: SortKey, descending: bool) -> Self {
        self.sort = sort;
        self.descending = descending;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_is_restricted() {
        assert_eq!("name".parse::<SortKey>().unwrap(), SortKey::Name);
        assert_eq!("updated_at".parse::<SortKey>().unwrap(), SortKey::UpdatedAt);
        let err = "name; DROP TABLE entities".parse::<SortKey>().unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::UnknownSortKey(_))));
    }

    #[test]
    fn test_list_defaults() {
        let opts = ListOptions::default();
        assert_eq!(opts.sort, SortKey::UpdatedAt);
        assert!(opts.descending);
    }

    #[test]
    fn test_filters_match_payload() {
        let filters = SearchFilters {
            entity_type: Some("公司".into()),
            ..Default::default()
        };
        let company = SearchPayload::Entity(Entity::new("苹果", "公司"));
        let fruit = SearchPayload::Entity(Entity::new("苹果", "食物"));
        let news = SearchPayload::NewsEvent(NewsEvent::new("t", "c"));
        assert!(filters.matches(&company));
        assert!(!filters.matches(&fruit));
        assert!(!filters.matches(&news));
    }

    #[test]
    fn test_content_type_parse() {
        assert_eq!("news".parse::<ContentType>().unwrap(), ContentType::NewsEvent);
        assert!("widget".parse::<ContentType>().is_err());
    }
}
