//! Entity Resolution
//!
//! Decides whether two entity records denote the same real-world object.
//! Each pair goes through a staged pipeline:
//! 1. Fast path: dissimilar names with incompatible types are rejected
//! 2. Context scoring with per-entity disambiguation rules
//! 3. Decision by context gap, escalating close calls to an LLM
//!
//! Resolution never writes to the store; callers apply merges.

pub mod similarity;
pub mod context;
pub mod llm;
pub mod engine;

use serde::Serialize;

use crate::config::ResolutionConfig;
use crate::entity::Entity;
use crate::storage::MergeDecision;

pub use context::{ContextRules, DisambiguationRule};
pub use engine::EntityResolver;
pub use llm::{LlmClient, Verdict};

/// An entity prepared for comparison
#[derive(Debug, Clone)]
pub struct EntityProfile {
    pub entity: Entity,
    /// Name, type and description text shown to the LLM
    pub description: String,
    pub rules: ContextRules,
}

impl EntityProfile {
    pub fn new(entity: Entity, config: &ResolutionConfig) -> crate::Result<Self> {
        let rules = context::rules_for(&entity, &config.type_rules)?;
        Ok(Self {
            description: entity.short_description(),
            rules: ContextRules::compile(&rules)?,
            entity,
        })
    }
}

/// Pipeline stage that produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStage {
    FastPath,
    ContextGap,
    Semantic,
    LinearCombination,
}

impl std::fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionStage::FastPath => "fast_path",
            ResolutionStage::ContextGap => "context_gap",
            ResolutionStage::Semantic => "semantic",
            ResolutionStage::LinearCombination => "linear_combination",
        };
        f.write_str(s)
    }
}

/// Decision for one (target, candidate) pair
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionOutcome {
    pub candidate: Entity,
    /// Confidence in the decision itself, whichever way it went
    pub confidence: f32,
    pub same: bool,
    pub rationale: String,
    pub stage: ResolutionStage,
    /// Set when an LLM call failed and the linear fallback decided
    pub degraded: bool,
    pub suggested_name: Option<String>,
}

/// Ranked decisions for one target
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub target_id: String,
    /// Highest confidence first
    pub outcomes: Vec<ResolutionOutcome>,
    /// Index into `outcomes` of the accepted match, if any
    pub best_match: Option<usize>,
}

impl ResolutionReport {
    pub fn best(&self) -> Option<&ResolutionOutcome> {
        self.best_match.and_then(|i| self.outcomes.get(i))
    }

    pub fn any_degraded(&self) -> bool {
        self.outcomes.iter().any(|o| o.degraded)
    }
}

impl From<&ResolutionOutcome> for MergeDecision {
    fn from(outcome: &ResolutionOutcome) -> Self {
        MergeDecision {
            match_confidence: outcome.confidence,
            suggested_name: outcome.suggested_name.clone(),
        }
    }
}
