//! Entity types - real-world objects extracted from news text
//!
//! An entity is a uniquely identified node of the knowledge graph: a
//! company, a person, a product, a place. Entities are created by the
//! extraction pipeline or rewritten by a resolution-driven merge.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ValidationError, check_non_empty, check_unit_range};

/// Property key holding disambiguation rules for entity resolution
pub const DISAMBIGUATION_PROPERTY: &str = "disambiguation";

/// A node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier
    pub id: String,
    /// Surface name as extracted
    pub name: String,
    /// Normalized preferred display name
    pub canonical_name: String,
    /// Declared type label ("公司", "person", ...)
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Free-form attributes
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Extraction confidence in [0, 1]
    pub confidence_score: f32,
    /// Where the entity came from (document id, pipeline name)
    pub source: String,
    /// Alternative names
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    /// Id of the vector record for this entity, if one exists
    pub embedding_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Create a new entity with a fresh id; canonical name defaults to the name
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            canonical_name: name.clone(),
            name,
            entity_type: entity_type.into(),
            properties: BTreeMap::new(),
            confidence_score: 1.0,
            source: String::new(),
            aliases: BTreeSet::new(),
            embedding_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_canonical_name(mut self, canonical_name: impl Into<String>) -> Self {
        self.canonical_name = canonical_name.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence_score = confidence;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Check the field-level invariants of an entity
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_non_empty("id", &self.id)?;
        check_non_empty("name", &self.name)?;
        check_non_empty("canonical_name", &self.canonical_name)?;
        check_unit_range("confidence_score", self.confidence_score)?;
        Ok(())
    }

    /// All names this entity is known by: name, canonical name and aliases
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(std::iter::once(self.canonical_name.as_str()))
            .chain(self.aliases.iter().map(String::as_str))
    }

    /// Get the text to embed for semantic search
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![
            format!("Entity: {}", self.canonical_name),
            format!("Type: {}", self.entity_type),
        ];
        if self.name != self.canonical_name {
            parts.push(format!("Name: {}", self.name));
        }
        if !self.aliases.is_empty() {
            let aliases: Vec<&str> = self.aliases.iter().map(String::as_str).collect();
            parts.push(format!("Aliases: {}", aliases.join(", ")));
        }
        if let Some(serde_json::Value::String(desc)) = self.properties.get("description") {
            parts.push(desc.clone());
        }
        parts.join("\n")
    }

    /// Get a short description for display and for resolution prompts
    pub fn short_description(&self) -> String {
        match self.properties.get("description") {
            Some(serde_json::Value::String(desc)) => {
                format!("{} ({}): {}", self.canonical_name, self.entity_type, desc)
            }
            _ => format!("{} ({})", self.canonical_name, self.entity_type),
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_creation() {
        let entity = Entity::new("苹果", "公司")
            .with_canonical_name("苹果公司")
            .with_alias("Apple")
            .with_confidence(0.9)
            .with_source("doc-1");

        assert_eq!(entity.name, "苹果");
        assert_eq!(entity.canonical_name, "苹果公司");
        assert!(entity.aliases.contains("Apple"));
        assert!(entity.validate().is_ok());
        assert_eq!(entity.all_names().count(), 3);
    }

    #[test]
    fn test_validation_rejects_bad_fields() {
        let blank = Entity::new("x", "t").with_canonical_name("   ");
        assert!(matches!(
            blank.validate(),
            Err(ValidationError::EmptyField { field: "canonical_name" })
        ));

        let out_of_range = Entity::new("x", "t").with_confidence(1.5);
        assert!(matches!(
            out_of_range.validate(),
            Err(ValidationError::ConfidenceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_embedding_text_includes_aliases() {
        let entity = Entity::new("Apple", "company").with_alias("AAPL");
        let text = entity.embedding_text();
        assert!(text.contains("Apple"));
        assert!(text.contains("AAPL"));
    }
}
