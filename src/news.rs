//! News events - the source documents entities are extracted from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ValidationError, check_non_empty};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsEvent {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub publish_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NewsEvent {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            source: String::new(),
            publish_time: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_publish_time(mut self, publish_time: DateTime<Utc>) -> Self {
        self.publish_time = Some(publish_time);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_non_empty("id", &self.id)?;
        check_non_empty("title", &self.title)?;
        Ok(())
    }

    /// Fingerprint of title + content, used to reject duplicate ingestion
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.title.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.content.as_bytes());
        hasher.finalize().to_string()
    }

    /// Get the text to embed for semantic search
    pub fn embedding_text(&self) -> String {
        // First 500 characters of content are enough context
        let preview: String = self.content.chars().take(500).collect();
        format!("Title: {}\n{}", self.title, preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_ignores_id() {
        let a = NewsEvent::new("Title", "Body").with_id("1");
        let b = NewsEvent::new("Title", "Body").with_id("2");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), NewsEvent::new("Title", "Body!").content_hash());
    }

    #[test]
    fn test_content_hash_separates_fields() {
        let a = NewsEvent::new("ab", "c");
        let b = NewsEvent::new("a", "bc");
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
