//! Entity Resolver
//!
//! Maps each raw mention onto a canonical entity: block, score, then merge
//! into the single best candidate, create a new entity, or report an
//! ambiguity for manual review. Ties are never auto-resolved.

use std::sync::Arc;

use uuid::Uuid;

use polnet_core::normalize::{blocking_group, candidate_keys};
use polnet_core::{
    CanonicalEntity, EntityId, PolnetError, RawMention, ResolverConfig, Result, StoreEvent,
};
use polnet_store::EntityStore;

use crate::scoring::{decide, rank_candidates, MatchDecision, MentionProfile, ScoredCandidate};

/// What resolving a mention did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Created,
    Merged,
}

/// Result of resolving one mention
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Canonical entity the mention now belongs to
    pub id: EntityId,

    pub outcome: ResolutionOutcome,

    /// Composite score of the merge target, when merged
    pub score: Option<f64>,

    /// The committed change
    pub event: StoreEvent,
}

/// Resolves mentions against the canonical entity store
pub struct EntityResolver {
    store: Arc<EntityStore>,
    config: ResolverConfig,
}

impl EntityResolver {
    pub fn new(store: Arc<EntityStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a mention, creating or merging as needed.
    ///
    /// # Errors
    /// - `Validation` when the mention has no usable name
    /// - `AmbiguousMatch` when several candidates tie within epsilon
    /// - `MergeConflict` when optimistic merges kept failing past the retry budget
    pub fn resolve(&self, mention: &RawMention) -> Result<Resolution> {
        let evidence = mention.evidence()?;
        let profile = MentionProfile::new(mention.kind, &evidence);
        let group = blocking_group(mention.kind, &profile.normalized).ok_or_else(|| {
            PolnetError::Validation(format!(
                "mention '{}' has no name token to block on",
                evidence.display_name
            ))
        })?;
        let keys = candidate_keys(mention.kind, profile.category, &profile.normalized);

        // Held until the mention is committed
        let _group = self.store.lock_group(&group);

        let mut last_conflict = None;
        for attempt in 0..=self.config.max_merge_retries {
            let ranked = self.rank(&profile, &keys);

            match decide(
                &ranked,
                self.config.match_threshold,
                self.config.ambiguity_epsilon,
            ) {
                MatchDecision::Create => {
                    let entity = CanonicalEntity::from_evidence(
                        Uuid::new_v4(),
                        mention.kind,
                        profile.category,
                        &evidence,
                    );
                    let id = entity.id;
                    let event = self.store.create(entity)?;
                    tracing::debug!(
                        %id,
                        name = %evidence.display_name,
                        best = ranked.first().map(|c| c.score),
                        "no candidate above threshold, created entity"
                    );
                    return Ok(Resolution {
                        id,
                        outcome: ResolutionOutcome::Created,
                        score: None,
                        event,
                    });
                }
                MatchDecision::Ambiguous(tied) => {
                    tracing::warn!(
                        name = %evidence.display_name,
                        document = %evidence.document_id,
                        candidates = tied.len(),
                        score = tied[0].score,
                        "ambiguous match routed to review"
                    );
                    return Err(PolnetError::AmbiguousMatch {
                        name: evidence.display_name.clone(),
                        candidates: tied.iter().map(|c| c.id).collect(),
                    });
                }
                MatchDecision::Merge(top) => {
                    match self.store.absorb(top.id, &evidence, top.version) {
                        Ok(event) => {
                            tracing::debug!(
                                id = %top.id,
                                name = %evidence.display_name,
                                canonical = %top.canonical_name,
                                score = top.score,
                                "mention merged"
                            );
                            return Ok(Resolution {
                                id: top.id,
                                outcome: ResolutionOutcome::Merged,
                                score: Some(top.score),
                                event,
                            });
                        }
                        Err(PolnetError::MergeConflict { id }) => {
                            tracing::debug!(%id, attempt, "merge conflict, retrying with fresh read");
                            last_conflict = Some(id);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Err(PolnetError::MergeConflict {
            id: last_conflict.unwrap_or_default(),
        })
    }

    /// Ranked candidates for a mention without changing the store
    pub fn score(&self, mention: &RawMention) -> Result<Vec<ScoredCandidate>> {
        let evidence = mention.evidence()?;
        let profile = MentionProfile::new(mention.kind, &evidence);
        let keys = candidate_keys(mention.kind, profile.category, &profile.normalized);
        Ok(self.rank(&profile, &keys))
    }

    /// Score every blocked candidate, keeping the best `max_candidates`
    fn rank(&self, profile: &MentionProfile, keys: &[String]) -> Vec<ScoredCandidate> {
        let candidates: Vec<_> = self
            .store
            .candidates(keys)
            .into_iter()
            .filter(|c| c.value.kind == profile.kind)
            .collect();
        let mut ranked = rank_candidates(profile, &candidates, &self.config);
        ranked.truncate(self.config.max_candidates);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use polnet_core::{Category, EntityKind, MentionEvidence};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 9, 0, 0).unwrap()
    }

    fn resolver() -> EntityResolver {
        EntityResolver::new(Arc::new(EntityStore::new()), ResolverConfig::default())
    }

    fn official(name: &str, day: u32) -> RawMention {
        RawMention::person(format!("doc-{day}"), name, "political_official", 0.9, at(day))
    }

    #[test]
    fn test_first_mention_creates() {
        let resolver = resolver();
        let res = resolver.resolve(&official("Sen. John Thune", 1)).unwrap();
        assert_eq!(res.outcome, ResolutionOutcome::Created);
        assert!(matches!(res.event, StoreEvent::EntityCreated { .. }));
    }

    #[test]
    fn test_surname_mention_merges() {
        let resolver = resolver();
        let first = resolver.resolve(&official("John Thune", 1)).unwrap();
        let second = resolver.resolve(&official("Thune", 2)).unwrap();

        assert_eq!(second.outcome, ResolutionOutcome::Merged);
        assert_eq!(second.id, first.id);
        let entity = resolver.store.get(&first.id).unwrap().value;
        assert_eq!(entity.canonical_name, "John Thune");
        assert!(entity.aliases.contains("Thune"));
        assert_eq!(entity.mention_count, 2);
    }

    #[test]
    fn test_tie_is_ambiguous() {
        let resolver = resolver();
        resolver.resolve(&official("Adam Smith", 1)).unwrap();
        resolver.resolve(&official("Jason Smith", 1)).unwrap();

        let err = resolver.resolve(&official("Smith", 2)).unwrap_err();
        match err {
            PolnetError::AmbiguousMatch { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert_eq!(resolver.store.live_count(), 2);
    }

    #[test]
    fn test_specific_categories_never_merge() {
        let resolver = resolver();
        let official = resolver.resolve(&official("John Smith", 1)).unwrap();
        let journalist = resolver
            .resolve(&RawMention::person("doc-2", "John Smith", "journalist", 0.9, at(2)))
            .unwrap();
        assert_eq!(journalist.outcome, ResolutionOutcome::Created);
        assert_ne!(official.id, journalist.id);
    }

    #[test]
    fn test_other_category_refined_on_merge() {
        let resolver = resolver();
        let created = resolver
            .resolve(&RawMention::person("doc-1", "Donald Trump", "", 0.8, at(1)))
            .unwrap();
        let merged = resolver.resolve(&official("Donald Trump", 2)).unwrap();
        assert_eq!(merged.id, created.id);
        assert_eq!(
            resolver.store.get(&created.id).unwrap().value.category,
            Category::Official
        );
    }

    #[test]
    fn test_shortlist_keeps_best_match() {
        let config = ResolverConfig {
            max_candidates: 2,
            ..ResolverConfig::default()
        };
        let resolver = EntityResolver::new(Arc::new(EntityStore::new()), config);
        let names = ["Adam Smith", "Brian Smith", "Carl Smith", "Dan Smith", "John Smith"];
        for (i, name) in names.iter().enumerate() {
            let evidence = MentionEvidence {
                document_id: "doc-1".to_string(),
                display_name: name.to_string(),
                category: Category::Official,
                confidence: 0.9,
                attributes: Default::default(),
                timestamp: at(1),
            };
            let entity = CanonicalEntity::from_evidence(
                Uuid::from_u128(i as u128 + 1),
                EntityKind::Person,
                Category::Official,
                &evidence,
            );
            resolver.store.create(entity).unwrap();
        }

        let resolution = resolver.resolve(&official("John Smith", 2)).unwrap();
        assert_eq!(resolution.outcome, ResolutionOutcome::Merged);
        assert_eq!(resolution.id, Uuid::from_u128(5));
    }

    #[test]
    fn test_invalid_mention_rejected() {
        let resolver = resolver();
        let err = resolver.resolve(&official("Senator", 1)).unwrap_err();
        assert!(matches!(err, PolnetError::Validation(_)));
        assert!(resolver.store.is_empty());
    }

    #[test]
    fn test_concurrent_mentions_create_one_entity() {
        let resolver = Arc::new(resolver());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = resolver.clone();
                std::thread::spawn(move || {
                    resolver
                        .resolve(&official("Mike Johnson", 1 + i % 3))
                        .unwrap()
                        .id
                })
            })
            .collect();
        let ids: std::collections::BTreeSet<_> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(resolver.store.len(), 1);
    }
}
