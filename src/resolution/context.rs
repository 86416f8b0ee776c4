//! Context scoring with per-entity disambiguation rules
//!
//! A rule is a case-insensitive regular expression with a weight. An
//! entity's context score is the sum of the weights of its rules that
//! match the surrounding text, clipped to [-1, 1].

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::entity::{DISAMBIGUATION_PROPERTY, Entity};
use crate::ValidationError;

/// A weighted context pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationRule {
    pub pattern: String,
    pub weight: f32,
}

impl DisambiguationRule {
    pub fn new(pattern: impl Into<String>, weight: f32) -> Self {
        Self {
            pattern: pattern.into(),
            weight,
        }
    }
}

/// Compiled rules of one entity
#[derive(Debug, Clone, Default)]
pub struct ContextRules {
    rules: Vec<(Regex, f32)>,
}

impl ContextRules {
    pub fn compile(rules: &[DisambiguationRule]) -> Result<Self, ValidationError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                if !rule.weight.is_finite() {
                    return Err(ValidationError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        reason: "weight must be finite".into(),
                    });
                }
                RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (re, rule.weight))
                    .map_err(|e| ValidationError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules: compiled })
    }

    /// Sum of matched weights, clipped to [-1, 1]
    pub fn score(&self, context: &str) -> f32 {
        self.rules
            .iter()
            .filter(|(re, _)| re.is_match(context))
            .map(|(_, weight)| weight)
            .sum::<f32>()
            .clamp(-1.0, 1.0)
    }
}

/// Rules for an entity: its own `disambiguation` property when present,
/// otherwise the defaults configured for its type
pub fn rules_for(
    entity: &Entity,
    type_rules: &BTreeMap<String, Vec<DisambiguationRule>>,
) -> Result<Vec<DisambiguationRule>, ValidationError> {
    match entity.properties.get(DISAMBIGUATION_PROPERTY) {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| ValidationError::InvalidPattern {
            pattern: DISAMBIGUATION_PROPERTY.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(type_rules.get(&entity.entity_type).cloned().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_score_sums_and_clips() {
        let rules = ContextRules::compile(&[
            DisambiguationRule::new("iphone", 0.6),
            DisambiguationRule::new("股价", 0.6),
            DisambiguationRule::new("水果", -0.4),
        ])
        .unwrap();

        assert_eq!(rules.score("苹果发布新款iPhone，股价大涨"), 1.0);
        assert!((rules.score("iPhone 与水果") - 0.2).abs() < 1e-6);
        assert_eq!(rules.score("今天天气不错"), 0.0);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = ContextRules::compile(&[DisambiguationRule::new("(unclosed", 0.5)]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPattern { .. }));
    }

    #[test]
    fn test_rules_from_property_override_type_defaults() {
        let mut defaults = BTreeMap::new();
        defaults.insert("公司".to_string(), vec![DisambiguationRule::new("股价", 0.5)]);

        let plain = Entity::new("苹果", "公司");
        assert_eq!(rules_for(&plain, &defaults).unwrap().len(), 1);

        let custom = Entity::new("苹果", "公司").with_property(
            DISAMBIGUATION_PROPERTY,
            json!([{ "pattern": "iPhone", "weight": 0.7 }, { "pattern": "水果", "weight": -0.5 }]),
        );
        let rules = rules_for(&custom, &defaults).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].pattern, "iPhone");

        let broken = Entity::new("苹果", "公司").with_property(DISAMBIGUATION_PROPERTY, json!("oops"));
        assert!(rules_for(&broken, &defaults).is_err());
    }
}
