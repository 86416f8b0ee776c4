use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::llm::{LlmClient, Verdict, build_prompt, parse_verdict};
use super::similarity::{TypeCompatibility, lexical_similarity};
use super::{EntityProfile, ResolutionOutcome, ResolutionReport, ResolutionStage};
use crate::config::ResolutionConfig;
use crate::deadline::with_deadline;
use crate::entity::Entity;
use crate::search::{ContentType, SearchFilters, SearchPayload, SearchRequest};
use crate::storage::HybridStore;
use crate::Result;

/// Below this name similarity, incompatible types settle the pair at once
const FAST_PATH_SIMILARITY: f32 = 0.3;
/// Context gap above which the pair is rejected outright
const STRONG_GAP: f32 = 0.5;
/// Context gap at or below which the LLM is consulted
const AMBIGUOUS_GAP: f32 = 0.2;
const SIMILARITY_WEIGHT: f32 = 0.6;
const GAP_WEIGHT: f32 = 0.4;
/// Linear score penalty for incompatible types
const TYPE_MISMATCH_FACTOR: f32 = 0.85;
const SAME_THRESHOLD: f32 = 0.5;

/// Context-aware entity resolver
pub struct EntityResolver {
    config: ResolutionConfig,
    types: TypeCompatibility,
    llm: Option<Arc<dyn LlmClient>>,
    permits: Arc<Semaphore>,
}

impl EntityResolver {
    pub fn new(config: ResolutionConfig) -> Self {
        Self {
            types: TypeCompatibility::new(&config.compatible_types),
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            llm: None,
            config,
        }
    }

    /// Attach the LLM used for ambiguous pairs
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// Prepare an entity for comparison
    pub fn profile(&self, entity: Entity) -> Result<EntityProfile> {
        EntityProfile::new(entity, &self.config)
    }

    /// Rank every candidate against `target` in `context`
    pub async fn resolve(&self, target: &Entity, candidates: &[Entity], context: &str) -> Result<ResolutionReport> {
        let target_profile = self.profile(target.clone())?;
        let profiles = candidates
            .iter()
            .filter(|c| c.id != target.id)
            .map(|c| self.profile(c.clone()))
            .collect::<Result<Vec<_>>>()?;

        let comparisons = profiles
            .iter()
            .map(|candidate| self.compare(&target_profile, candidate, context));
        let mut outcomes = join_all(comparisons).await;

        outcomes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.candidate.id.cmp(&b.candidate.id))
        });

        let best_match = outcomes
            .iter()
            .position(|o| o.same)
            .filter(|&i| outcomes[i].confidence >= self.config.acceptance_threshold);

        if outcomes.iter().any(|o| o.degraded) {
            tracing::info!("resolution of {} used the linear fallback for some pairs", target.id);
        }

        Ok(ResolutionReport {
            target_id: target.id.clone(),
            outcomes,
            best_match,
        })
    }

    /// `resolve` bounded by a caller deadline
    pub async fn resolve_with_deadline(
        &self,
        target: &Entity,
        candidates: &[Entity],
        context: &str,
        deadline: Option<Instant>,
    ) -> Result<ResolutionReport> {
        with_deadline(deadline, "resolve", self.resolve(target, candidates, context)).await
    }

    /// Resolve stored entities by id; unknown candidate ids are skipped
    pub async fn resolve_ids(
        &self,
        store: &HybridStore,
        target_id: &str,
        candidate_ids: &[String],
        context: &str,
    ) -> Result<ResolutionReport> {
        let target = store.get_entity(target_id).await?;
        let candidates = store.get_entities(candidate_ids).await?;
        self.resolve(&target, &candidates, context).await
    }

    /// Stored entities that look like `target` by name, excluding itself
    pub async fn find_candidates(&self, store: &HybridStore, target: &Entity, limit: usize) -> Result<Vec<Entity>> {
        let request = SearchRequest::new(target.canonical_name.clone())
            .top_k(limit.saturating_add(1))
            .channels(store.has_embedder(), true)
            .filters(SearchFilters {
                content_types: vec![ContentType::Entity],
                ..SearchFilters::default()
            });

        let candidates = store
            .search(&request)
            .await?
            .into_iter()
            .filter_map(|hit| match hit.payload {
                SearchPayload::Entity(entity) if entity.id != target.id => Some(entity),
                _ => None,
            })
            .take(limit)
            .collect();
        Ok(candidates)
    }

    /// Decide one pair
    pub async fn compare(&self, target: &EntityProfile, candidate: &EntityProfile, context: &str) -> ResolutionOutcome {
        let similarity = lexical_similarity(&target.entity, &candidate.entity);
        let types_compatible = self
            .types
            .compatible(&target.entity.entity_type, &candidate.entity.entity_type);

        if similarity < FAST_PATH_SIMILARITY && !types_compatible {
            return outcome(
                candidate,
                false,
                1.0 - similarity,
                ResolutionStage::FastPath,
                format!(
                    "name similarity {:.2} with incompatible types {} / {}",
                    similarity, target.entity.entity_type, candidate.entity.entity_type
                ),
            );
        }

        let target_score = target.rules.score(context);
        let candidate_score = candidate.rules.score(context);
        let gap = (target_score - candidate_score).abs();

        if gap > STRONG_GAP {
            return outcome(
                candidate,
                false,
                (0.5 + gap / 2.0).min(1.0),
                ResolutionStage::ContextGap,
                format!(
                    "context favours different entities (scores {:.2} vs {:.2})",
                    target_score, candidate_score
                ),
            );
        }

        if gap <= AMBIGUOUS_GAP {
            match self.ask_llm(target, candidate, context).await {
                Some(verdict) => {
                    let mut decided = outcome(
                        candidate,
                        verdict.is_same_entity,
                        verdict.confidence,
                        ResolutionStage::Semantic,
                        verdict.reasoning,
                    );
                    decided.suggested_name = verdict.suggested_name;
                    return decided;
                }
                None => {
                    let mut fallback = self.linear(candidate, similarity, gap, types_compatible);
                    fallback.degraded = true;
                    return fallback;
                }
            }
        }

        self.linear(candidate, similarity, gap, types_compatible)
    }

    fn linear(&self, candidate: &EntityProfile, similarity: f32, gap: f32, types_compatible: bool) -> ResolutionOutcome {
        let mut score = SIMILARITY_WEIGHT * similarity + GAP_WEIGHT * (1.0 - gap.min(1.0));
        if !types_compatible {
            score *= TYPE_MISMATCH_FACTOR;
        }
        let same = score >= SAME_THRESHOLD;
        outcome(
            candidate,
            same,
            if same { score } else { 1.0 - score },
            ResolutionStage::LinearCombination,
            format!(
                "linear score {:.2} from name similarity {:.2} and context gap {:.2}",
                score, similarity, gap
            ),
        )
    }

    /// One bounded LLM call; `None` on any failure
    async fn ask_llm(&self, target: &EntityProfile, candidate: &EntityProfile, context: &str) -> Option<Verdict> {
        let llm = self.llm.as_ref()?;
        let prompt = build_prompt(target, candidate, context);

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!("LLM permit pool closed");
                return None;
            }
        };

        let timeout = Duration::from_millis(self.config.llm_timeout_ms);
        match tokio::time::timeout(timeout, llm.generate(&prompt)).await {
            Ok(Ok(text)) => {
                let verdict = parse_verdict(&text);
                if verdict.is_none() {
                    tracing::warn!(
                        "unparseable LLM verdict for {} / {}",
                        target.entity.id,
                        candidate.entity.id
                    );
                }
                verdict
            }
            Ok(Err(e)) => {
                tracing::warn!("LLM comparison failed: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("LLM comparison timed out after {:?}", timeout);
                None
            }
        }
    }
}

fn outcome(
    candidate: &EntityProfile,
    same: bool,
    confidence: f32,
    stage: ResolutionStage,
    rationale: String,
) -> ResolutionOutcome {
    ResolutionOutcome {
        candidate: candidate.entity.clone(),
        confidence: confidence.clamp(0.0, 1.0),
        same,
        rationale,
        stage,
        degraded: false,
        suggested_name: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::DISAMBIGUATION_PROPERTY;
    use crate::resolution::DisambiguationRule;
    use crate::storage::MergeDecision;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed reply and counts calls
    struct ScriptedLlm {
        reply: String,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedLlm {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn slow(reply: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                delay: Some(delay),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.reply.clone())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("quota exceeded")
        }
    }

    const SAME_VERDICT: &str =
        r#"{"is_same_entity": true, "confidence": 0.9, "reasoning": "same company", "suggested_name": "Apple Inc."}"#;

    fn company_rules() -> serde_json::Value {
        json!([{ "pattern": "iPhone", "weight": 0.5 }, { "pattern": "股价", "weight": 0.5 }])
    }

    fn fruit_rules() -> serde_json::Value {
        json!([{ "pattern": "水果|好吃|营养", "weight": 0.6 }, { "pattern": "iPhone|股价", "weight": -0.5 }])
    }

    #[tokio::test]
    async fn test_apple_company_vs_fruit_in_market_context() {
        let llm = ScriptedLlm::new(SAME_VERDICT);
        let resolver = EntityResolver::new(ResolutionConfig::default()).with_llm(llm.clone());

        let target = Entity::new("苹果", "公司").with_property(DISAMBIGUATION_PROPERTY, company_rules());
        let candidate = Entity::new("苹果", "食物").with_property(DISAMBIGUATION_PROPERTY, fruit_rules());

        let report = resolver
            .resolve(&target, &[candidate], "苹果发布新款iPhone，股价应声上涨")
            .await
            .unwrap();

        let decided = &report.outcomes[0];
        assert!(!decided.same);
        assert!(decided.confidence >= 0.85);
        assert_eq!(decided.stage, ResolutionStage::ContextGap);
        assert!(report.best_match.is_none());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_fast_path_skips_llm() {
        let llm = ScriptedLlm::new(SAME_VERDICT);
        let resolver = EntityResolver::new(ResolutionConfig::default()).with_llm(llm.clone());

        let target = Entity::new("Apple", "公司");
        let candidate = Entity::new("Banana", "食物");
        let report = resolver.resolve(&target, &[candidate], "anything").await.unwrap();

        let decided = &report.outcomes[0];
        assert!(!decided.same);
        assert_eq!(decided.stage, ResolutionStage::FastPath);
        assert_eq!(decided.confidence, 1.0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_pair_uses_llm_verdict() {
        let llm = ScriptedLlm::new(SAME_VERDICT);
        let resolver = EntityResolver::new(ResolutionConfig::default()).with_llm(llm.clone());

        let target = Entity::new("Apple", "公司");
        let candidate = Entity::new("Apple Inc", "公司");
        let report = resolver.resolve(&target, &[candidate], "Apple shares rose").await.unwrap();

        let best = report.best().unwrap();
        assert!(best.same);
        assert_eq!(best.stage, ResolutionStage::Semantic);
        assert_eq!(best.suggested_name.as_deref(), Some("Apple Inc."));
        assert!(!best.degraded);
        assert_eq!(llm.calls(), 1);

        let decision = MergeDecision::from(best);
        assert!((decision.match_confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_llm_failures_degrade_to_linear() {
        let target = Entity::new("Apple", "公司");
        let candidate = Entity::new("Apple", "公司");

        let failing = EntityResolver::new(ResolutionConfig::default()).with_llm(Arc::new(FailingLlm));
        let garbage = EntityResolver::new(ResolutionConfig::default()).with_llm(ScriptedLlm::new("I think so"));
        let absent = EntityResolver::new(ResolutionConfig::default());

        for resolver in [failing, garbage, absent] {
            let report = resolver.resolve(&target, &[candidate.clone()], "").await.unwrap();
            let decided = &report.outcomes[0];
            assert!(decided.degraded);
            assert_eq!(decided.stage, ResolutionStage::LinearCombination);
            // identical names, zero gap: 0.6 + 0.4
            assert!(decided.same);
            assert!((decided.confidence - 1.0).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_llm_timeout_is_recoverable() {
        let mut config = ResolutionConfig::default();
        config.llm_timeout_ms = 20;
        let llm = ScriptedLlm::slow(SAME_VERDICT, Duration::from_secs(5));
        let resolver = EntityResolver::new(config).with_llm(llm.clone());

        let target = Entity::new("Apple", "公司");
        let report = resolver
            .resolve(&target, &[Entity::new("Apple Inc", "公司")], "")
            .await
            .unwrap();
        assert!(report.outcomes[0].degraded);
        assert!(report.any_degraded());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_moderate_gap_uses_linear_combination() {
        let resolver = EntityResolver::new(ResolutionConfig::default());
        let target = Entity::new("苹果", "公司")
            .with_property(DISAMBIGUATION_PROPERTY, json!([{ "pattern": "股价", "weight": 0.4 }]));
        let candidate = Entity::new("苹果", "公司");

        let report = resolver.resolve(&target, &[candidate], "股价").await.unwrap();
        let decided = &report.outcomes[0];
        assert_eq!(decided.stage, ResolutionStage::LinearCombination);
        assert!(!decided.degraded);
        // 0.6 * 1.0 + 0.4 * 0.6
        assert!(decided.same);
        assert!((decided.confidence - 0.84).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_type_rules_from_config() {
        let mut config = ResolutionConfig::default();
        config
            .type_rules
            .insert("公司".into(), vec![DisambiguationRule::new("iPhone|股价", 0.8)]);
        config
            .type_rules
            .insert("食物".into(), vec![DisambiguationRule::new("水果", 0.8)]);
        let resolver = EntityResolver::new(config);

        let report = resolver
            .resolve(&Entity::new("苹果", "公司"), &[Entity::new("苹果", "食物")], "iPhone 销量")
            .await
            .unwrap();
        assert!(!report.outcomes[0].same);
        assert_eq!(report.outcomes[0].stage, ResolutionStage::ContextGap);
    }

    #[tokio::test]
    async fn test_ranking_and_threshold() {
        let resolver = EntityResolver::new(ResolutionConfig::default());
        let target = Entity::new("Apple", "公司").with_id("t");
        let candidates = vec![
            Entity::new("Banana", "食物").with_id("c1"),
            Entity::new("Apple", "公司").with_id("c2"),
            Entity::new("Apple", "公司").with_id("t"),
        ];

        let report = resolver.resolve(&target, &candidates, "").await.unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        assert_eq!(report.best().unwrap().candidate.id, "c2");
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let resolver = EntityResolver::new(ResolutionConfig::default());
        let target = Entity::new("苹果", "公司").with_property(DISAMBIGUATION_PROPERTY, company_rules());
        let candidate = Entity::new("苹果公司", "公司");

        let first = resolver.resolve(&target, &[candidate.clone()], "股价").await.unwrap();
        let second = resolver.resolve(&target, &[candidate], "股价").await.unwrap();
        assert_eq!(first.outcomes[0].same, second.outcomes[0].same);
        assert!((first.outcomes[0].confidence - second.outcomes[0].confidence).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_max_in_flight_bounds_llm_calls() {
        struct Gauge {
            current: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl LlmClient for Gauge {
            async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(SAME_VERDICT.to_string())
            }
        }

        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut config = ResolutionConfig::default();
        config.max_in_flight = 2;
        let resolver = EntityResolver::new(config).with_llm(gauge.clone());

        let target = Entity::new("Apple", "公司");
        let candidates: Vec<Entity> = (0..6).map(|_| Entity::new("Apple", "公司")).collect();
        let report = resolver.resolve(&target, &candidates, "").await.unwrap();

        assert_eq!(report.outcomes.len(), 6);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_invalid_rule_is_validation_error() {
        let resolver = EntityResolver::new(ResolutionConfig::default());
        let target = Entity::new("苹果", "公司")
            .with_property(DISAMBIGUATION_PROPERTY, json!([{ "pattern": "(", "weight": 0.5 }]));
        let err = resolver.resolve(&target, &[], "").await.unwrap_err();
        assert!(matches!(err, crate::Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_store_helpers() {
        use crate::query::HashingEmbedder;

        let store = HybridStore::open_in_memory(16, Some(Arc::new(HashingEmbedder::new(16)))).unwrap();
        let target = store.create_entity(Entity::new("Apple", "公司"), None).await.unwrap();
        let twin = store.create_entity(Entity::new("Apple Inc", "公司"), None).await.unwrap();
        store.create_entity(Entity::new("Banana", "食物"), None).await.unwrap();

        let resolver = EntityResolver::new(ResolutionConfig::default());
        let candidates = resolver.find_candidates(&store, &target, 5).await.unwrap();
        assert!(candidates.iter().all(|c| c.id != target.id));
        assert!(candidates.iter().any(|c| c.id == twin.id));

        let ids = vec![twin.id.clone(), "missing".to_string()];
        let report = resolver.resolve_ids(&store, &target.id, &ids, "").await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.target_id, target.id);
    }
}
