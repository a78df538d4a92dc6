//! Relationship Aggregator
//!
//! Folds repeated relationship mentions between the same two canonical
//! entities into weighted, predicate-differentiated edges.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use polnet_core::{
    clamp_confidence, AggregatorConfig, EdgeKey, EdgeObservation, EntityId, PolnetError,
    RelationshipEdge, Result, StoreEvent,
};
use polnet_store::{EdgeSnapshot, EntityStore};

use crate::predicate::PredicateVocabulary;

/// One relationship mention with resolved endpoints
#[derive(Debug, Clone)]
pub struct RelationshipMention<'a> {
    pub subject: EntityId,
    pub object: EntityId,
    pub predicate: &'a str,
    pub document_id: &'a str,
    pub context: Option<&'a str>,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

/// How an identity merge changed one edge
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeRedirect {
    /// The edge moved onto a new key (possibly folding into an existing edge)
    Rekeyed { from: EdgeKey, to: EdgeKey },
    /// The edge would have become a self-loop and was retired
    Retired { key: EdgeKey },
}

/// Aggregates relationship mentions into edges
pub struct RelationshipAggregator {
    store: Arc<EntityStore>,
    vocabulary: PredicateVocabulary,
    context_capacity: usize,
    edges: RwLock<BTreeMap<EdgeKey, RelationshipEdge>>,
    retired: Mutex<Vec<RelationshipEdge>>,
}

impl RelationshipAggregator {
    pub fn new(store: Arc<EntityStore>, config: &AggregatorConfig) -> Self {
        Self::with_vocabulary(store, config, PredicateVocabulary::default())
    }

    pub fn with_vocabulary(
        store: Arc<EntityStore>,
        config: &AggregatorConfig,
        vocabulary: PredicateVocabulary,
    ) -> Self {
        Self {
            store,
            vocabulary,
            context_capacity: config.context_capacity,
            edges: RwLock::new(BTreeMap::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn vocabulary(&self) -> &PredicateVocabulary {
        &self.vocabulary
    }

    /// Record one relationship mention.
    ///
    /// Endpoints are followed through merge redirects first. Unknown
    /// endpoints and self-loops are validation errors.
    pub fn ingest(&self, mention: &RelationshipMention<'_>) -> Result<StoreEvent> {
        let subject = self.live_endpoint(mention.subject)?;
        let object = self.live_endpoint(mention.object)?;
        if subject == object {
            return Err(PolnetError::Validation(format!(
                "relationship '{}' in document '{}' links entity {subject} to itself",
                mention.predicate, mention.document_id
            )));
        }

        let (confidence, clamped) = clamp_confidence(mention.confidence);
        if clamped {
            tracing::warn!(
                document = %mention.document_id,
                raw = mention.confidence,
                "relationship confidence outside [0, 1], clamped to {}",
                confidence
            );
        }

        let predicate = self.vocabulary.classify(mention.predicate);
        let observation = EdgeObservation {
            key: EdgeKey::new(subject, object, predicate),
            raw_predicate: mention.predicate.trim().to_string(),
            document_id: mention.document_id.to_string(),
            context: mention.context.map(str::to_string),
            confidence,
            timestamp: mention.timestamp,
        };
        self.observe(&observation);

        tracing::debug!(key = %observation.key, raw = %observation.raw_predicate, "edge observed");
        Ok(StoreEvent::EdgeObserved { observation })
    }

    fn live_endpoint(&self, id: EntityId) -> Result<EntityId> {
        self.store.resolve_id(id).map_err(|e| match e {
            PolnetError::NotFound(_) => {
                PolnetError::Validation(format!("relationship references unknown entity {id}"))
            }
            other => other,
        })
    }

    /// Fold an observation into its edge
    pub fn observe(&self, observation: &EdgeObservation) {
        let mut edges = self.edges.write();
        match edges.get_mut(&observation.key) {
            Some(edge) => edge.observe(observation, self.context_capacity),
            None => {
                edges.insert(
                    observation.key,
                    RelationshipEdge::from_observation(observation, self.context_capacity),
                );
            }
        }
    }

    /// Re-apply a logged edge observation
    pub fn apply(&self, event: &StoreEvent) {
        if let StoreEvent::EdgeObserved { observation } = event {
            self.observe(observation);
        }
    }

    /// Move every edge of `loser` onto `winner` after an identity merge.
    ///
    /// Colliding edges are folded together; edges between the two merged
    /// entities are retired rather than kept as self-loops.
    pub fn redirect_entity(&self, loser: EntityId, winner: EntityId) -> Vec<EdgeRedirect> {
        let mut edges = self.edges.write();
        let affected: Vec<EdgeKey> = edges.keys().filter(|k| k.involves(loser)).copied().collect();

        let mut redirects = Vec::with_capacity(affected.len());
        for old_key in affected {
            let Some(mut edge) = edges.remove(&old_key) else {
                continue;
            };
            let new_key = old_key.redirect(loser, winner);

            if new_key.is_self_loop() {
                tracing::debug!(key = %old_key, "edge retired by merge");
                self.retired.lock().push(edge);
                redirects.push(EdgeRedirect::Retired { key: old_key });
                continue;
            }

            edge.key = new_key;
            match edges.get_mut(&new_key) {
                Some(existing) => existing.fold(&edge, self.context_capacity),
                None => {
                    edges.insert(new_key, edge);
                }
            }
            redirects.push(EdgeRedirect::Rekeyed {
                from: old_key,
                to: new_key,
            });
        }
        redirects
    }

    pub fn get(&self, key: &EdgeKey) -> Option<RelationshipEdge> {
        self.edges.read().get(key).cloned()
    }

    /// Number of active edges
    pub fn len(&self) -> usize {
        self.edges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of the edge set
    pub fn snapshot(&self) -> EdgeSnapshot {
        EdgeSnapshot {
            edges: self.edges.read().values().cloned().collect(),
            retired: self.retired.lock().clone(),
        }
    }

    /// Replace the edge set with a snapshot
    pub fn restore(&self, snapshot: &EdgeSnapshot) {
        *self.edges.write() = snapshot.edges.iter().map(|e| (e.key, e.clone())).collect();
        *self.retired.lock() = snapshot.retired.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use polnet_core::{CanonicalEntity, Category, EntityKind, MentionEvidence, PredicateClass};
    use uuid::Uuid;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 9, 0, 0).unwrap()
    }

    fn add_person(store: &EntityStore, name: &str) -> EntityId {
        let evidence = MentionEvidence {
            document_id: "doc".to_string(),
            display_name: name.to_string(),
            category: Category::Official,
            confidence: 0.9,
            attributes: Default::default(),
            timestamp: at(1),
        };
        let entity =
            CanonicalEntity::from_evidence(Uuid::new_v4(), EntityKind::Person, Category::Official, &evidence);
        let id = entity.id;
        store.create(entity).unwrap();
        id
    }

    fn mention<'a>(subject: EntityId, object: EntityId, predicate: &'a str, day: u32, confidence: f32) -> RelationshipMention<'a> {
        RelationshipMention {
            subject,
            object,
            predicate,
            document_id: "doc",
            context: Some("at the White House"),
            confidence,
            timestamp: at(day),
        }
    }

    fn setup() -> (Arc<EntityStore>, RelationshipAggregator, EntityId, EntityId) {
        let store = Arc::new(EntityStore::new());
        let thune = add_person(&store, "John Thune");
        let trump = add_person(&store, "Donald Trump");
        let aggregator = RelationshipAggregator::new(store.clone(), &AggregatorConfig::default());
        (store, aggregator, thune, trump)
    }

    #[test]
    fn test_repeat_mentions_fold_into_one_edge() {
        let (_, aggregator, thune, trump) = setup();
        aggregator.ingest(&mention(thune, trump, "met with", 3, 0.9)).unwrap();
        aggregator.ingest(&mention(trump, thune, "met with", 7, 0.7)).unwrap();

        assert_eq!(aggregator.len(), 1);
        let edge = aggregator
            .get(&EdgeKey::new(thune, trump, PredicateClass::MetWith))
            .unwrap();
        assert_eq!(edge.weight, 2);
        assert!((edge.confidence_avg - 0.8).abs() < 1e-6);
        assert_eq!(edge.first_seen, at(3));
        assert_eq!(edge.last_seen, at(7));
        assert_eq!(edge.contexts.len(), 2);
    }

    #[test]
    fn test_predicates_are_distinct_edges() {
        let (_, aggregator, thune, trump) = setup();
        aggregator.ingest(&mention(thune, trump, "met with", 3, 0.9)).unwrap();
        aggregator.ingest(&mention(thune, trump, "praised", 4, 0.9)).unwrap();
        aggregator.ingest(&mention(thune, trump, "golfed with", 5, 0.9)).unwrap();

        assert_eq!(aggregator.len(), 3);
        let other = aggregator
            .get(&EdgeKey::new(thune, trump, PredicateClass::Other))
            .unwrap();
        assert!(other.raw_predicates.contains("golfed with"));
    }

    #[test]
    fn test_self_loop_and_unknown_rejected() {
        let (_, aggregator, thune, _) = setup();
        assert!(matches!(
            aggregator.ingest(&mention(thune, thune, "met with", 3, 0.9)),
            Err(PolnetError::Validation(_))
        ));
        assert!(matches!(
            aggregator.ingest(&mention(thune, Uuid::new_v4(), "met with", 3, 0.9)),
            Err(PolnetError::Validation(_))
        ));
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_confidence_clamped() {
        let (_, aggregator, thune, trump) = setup();
        let event = aggregator.ingest(&mention(thune, trump, "met with", 3, 4.0)).unwrap();
        match event {
            StoreEvent::EdgeObserved { observation } => assert_eq!(observation.confidence, 1.0),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_redirect_folds_and_retires() {
        let (store, aggregator, thune, trump) = setup();
        let dup = add_person(&store, "Sen. Thune");
        let johnson = add_person(&store, "Mike Johnson");

        aggregator.ingest(&mention(thune, trump, "met with", 3, 1.0)).unwrap();
        aggregator.ingest(&mention(dup, trump, "met with", 4, 0.5)).unwrap();
        aggregator.ingest(&mention(dup, thune, "met with", 5, 0.9)).unwrap();
        aggregator.ingest(&mention(dup, johnson, "met with", 6, 0.9)).unwrap();

        store.merge_entities(thune, dup).unwrap();
        let redirects = aggregator.redirect_entity(dup, thune);
        assert_eq!(redirects.len(), 3);

        let folded = aggregator
            .get(&EdgeKey::new(thune, trump, PredicateClass::MetWith))
            .unwrap();
        assert_eq!(folded.weight, 2);
        assert!((folded.confidence_avg - 0.75).abs() < 1e-6);
        assert!(aggregator
            .get(&EdgeKey::new(thune, johnson, PredicateClass::MetWith))
            .is_some());
        assert_eq!(aggregator.len(), 2);
        assert_eq!(aggregator.snapshot().retired.len(), 1);

        // Later mentions of the merged-away id land on the survivor
        aggregator.ingest(&mention(dup, trump, "met with", 8, 1.0)).unwrap();
        assert_eq!(
            aggregator
                .get(&EdgeKey::new(thune, trump, PredicateClass::MetWith))
                .unwrap()
                .weight,
            3
        );
    }

    #[test]
    fn test_snapshot_restore() {
        let (_, aggregator, thune, trump) = setup();
        aggregator.ingest(&mention(thune, trump, "met with", 3, 0.9)).unwrap();
        let snapshot = aggregator.snapshot();
        aggregator.ingest(&mention(thune, trump, "hired", 4, 0.9)).unwrap();

        aggregator.restore(&snapshot);
        assert_eq!(aggregator.snapshot(), snapshot);
    }
}
