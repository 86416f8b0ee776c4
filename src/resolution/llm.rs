//! Semantic comparison collaborator
//!
//! The resolver escalates ambiguous pairs to a text-generation model. The
//! model is asked for a JSON verdict; anything that does not parse into
//! one counts as a failed call.

use async_trait::async_trait;
use serde::Deserialize;

use super::EntityProfile;

/// External text-generation service
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Structured answer expected from the model
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub is_same_entity: bool,
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub suggested_name: Option<String>,
}

pub fn build_prompt(target: &EntityProfile, candidate: &EntityProfile, context: &str) -> String {
    format!(
        r#"Decide whether two entity mentions from news text refer to the same real-world entity.

Entity A: {}
Type: {}

Entity B: {}
Type: {}

Context:
{}

Answer with a single JSON object and nothing else:
{{"is_same_entity": true or false, "confidence": number between 0 and 1, "reasoning": "short explanation", "suggested_name": "preferred canonical name"}}"#,
        target.description,
        target.entity.entity_type,
        candidate.description,
        candidate.entity.entity_type,
        context.trim(),
    )
}

/// Parse the JSON object between the first '{' and the last '}'
pub fn parse_verdict(text: &str) -> Option<Verdict> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }

    let mut verdict: Verdict = serde_json::from_str(&text[start..=end]).ok()?;
    if !verdict.confidence.is_finite() || !(0.0..=1.0).contains(&verdict.confidence) {
        return None;
    }
    verdict.suggested_name = verdict
        .suggested_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    Some(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict_with_surrounding_text() {
        let text = r#"Sure. {"is_same_entity": true, "confidence": 0.92, "reasoning": "same company", "suggested_name": "Apple Inc."} Hope that helps."#;
        let verdict = parse_verdict(text).unwrap();
        assert!(verdict.is_same_entity);
        assert!((verdict.confidence - 0.92).abs() < 1e-6);
        assert_eq!(verdict.suggested_name.as_deref(), Some("Apple Inc."));
    }

    #[test]
    fn test_parse_verdict_rejects_garbage() {
        assert!(parse_verdict("no json here").is_none());
        assert!(parse_verdict("} backwards {").is_none());
        assert!(parse_verdict(r#"{"is_same_entity": "maybe"}"#).is_none());
        assert!(parse_verdict(r#"{"is_same_entity": true, "confidence": 3.0}"#).is_none());
    }

    #[test]
    fn test_blank_suggested_name_is_none() {
        let verdict = parse_verdict(r#"{"is_same_entity": false, "confidence": 0.8, "suggested_name": "  "}"#).unwrap();
        assert!(verdict.suggested_name.is_none());
        assert!(verdict.reasoning.is_empty());
    }
}
