//! Relation types - directed, typed edges between entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ValidationError, check_non_empty, check_unit_range};

/// A directed edge `subject --predicate--> object`.
///
/// Relations produced by extraction carry the model's confidence;
/// relations asserted by hand default to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    /// Source entity id
    pub subject_id: String,
    /// Relation type ("收购", "ceo_of", ...)
    pub predicate: String,
    /// Target entity id
    pub object_id: String,
    pub confidence_score: f32,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// Create a new relation with confidence 1.0
    pub fn new(subject_id: impl Into<String>, predicate: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            predicate: predicate.into(),
            object_id: object_id.into(),
            confidence_score: 1.0,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence_score = confidence;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_non_empty("id", &self.id)?;
        check_non_empty("subject_id", &self.subject_id)?;
        check_non_empty("predicate", &self.predicate)?;
        check_non_empty("object_id", &self.object_id)?;
        check_unit_range("confidence_score", self.confidence_score)?;
        Ok(())
    }

    /// The endpoint opposite to `entity_id`, if the relation touches it
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        if self.subject_id == entity_id {
            Some(&self.object_id)
        } else if self.object_id == entity_id {
            Some(&self.subject_id)
        } else {
            None
        }
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Relation {}
