//! The in-memory world model and its persistence
//!
//! A [`World`] bundles the entity store, the relationship edges and the
//! temporal index. It can be checkpointed, restored, and rebuilt by
//! replaying the event log over a snapshot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use polnet_core::{AppConfig, EntityId, LoggedEvent, Result, StoreEvent, SubjectKey};
use polnet_store::{EdgeSnapshot, EntityStore, StoreSnapshot, TemporalIndex, TemporalSnapshot};

use crate::aggregator::{EdgeRedirect, RelationshipAggregator};

/// Serializable image of the whole world at a log position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Sequence number of the last event folded into this snapshot
    pub sequence: u64,
    pub entities: StoreSnapshot,
    pub edges: EdgeSnapshot,
    pub temporal: TemporalSnapshot,
}

/// Store, edges and temporal index, kept mutually consistent
pub struct World {
    pub store: Arc<EntityStore>,
    pub aggregator: Arc<RelationshipAggregator>,
    pub temporal: Arc<TemporalIndex>,
}

impl World {
    /// Create an empty world
    pub fn new(config: &AppConfig) -> Self {
        let store = Arc::new(EntityStore::new());
        let aggregator = Arc::new(RelationshipAggregator::new(store.clone(), &config.aggregator));
        let temporal = Arc::new(TemporalIndex::new(config.temporal.granularity));
        Self {
            store,
            aggregator,
            temporal,
        }
    }

    /// Capture the world at a log position
    pub fn checkpoint(&self, sequence: u64) -> WorldSnapshot {
        WorldSnapshot {
            sequence,
            entities: self.store.snapshot(),
            edges: self.aggregator.snapshot(),
            temporal: self.temporal.snapshot(),
        }
    }

    /// Roll the world back (or forward) to a snapshot
    pub fn restore(&self, snapshot: &WorldSnapshot) {
        self.store.restore(&snapshot.entities);
        self.aggregator.restore(&snapshot.edges);
        self.temporal.restore(&snapshot.temporal);
    }

    /// Identity merge across all three structures.
    ///
    /// Edges of `loser` are rekeyed onto `winner` and the temporal series of
    /// the loser and its rekeyed edges are folded into their survivors.
    pub fn merge_identities(&self, winner: EntityId, loser: EntityId) -> Result<StoreEvent> {
        let event = self.store.merge_entities(winner, loser)?;

        for redirect in self.aggregator.redirect_entity(loser, winner) {
            if let EdgeRedirect::Rekeyed { from, to } = redirect {
                self.temporal
                    .merge_subject(&SubjectKey::Edge(from), SubjectKey::Edge(to));
            }
        }
        self.temporal
            .merge_subject(&SubjectKey::Entity(loser), SubjectKey::Entity(winner));

        Ok(event)
    }

    /// Re-apply one logged event
    pub fn apply(&self, event: &StoreEvent) -> Result<()> {
        match event {
            StoreEvent::EntityCreated { .. } | StoreEvent::MentionAbsorbed { .. } => {
                self.store.apply(event)
            }
            StoreEvent::EntitiesMerged { winner, loser } => {
                self.merge_identities(*winner, *loser).map(|_| ())
            }
            StoreEvent::EdgeObserved { .. } => {
                self.aggregator.apply(event);
                Ok(())
            }
            StoreEvent::ActivityRecorded { .. } => {
                self.temporal.apply(event);
                Ok(())
            }
        }
    }

    /// Rebuild a world from an optional snapshot plus the events after it.
    ///
    /// Returns the world and the sequence number of the last applied event.
    pub fn replay(
        config: &AppConfig,
        snapshot: Option<&WorldSnapshot>,
        events: &[LoggedEvent],
    ) -> Result<(Self, u64)> {
        let world = Self::new(config);
        let mut sequence = 0;
        if let Some(snapshot) = snapshot {
            world.restore(snapshot);
            sequence = snapshot.sequence;
        }

        let start = sequence;
        let mut applied = 0usize;
        for logged in events.iter().filter(|e| e.sequence > start) {
            world.apply(&logged.event)?;
            sequence = logged.sequence;
            applied += 1;
        }

        tracing::info!(
            applied,
            sequence,
            entities = world.store.live_count(),
            edges = world.aggregator.len(),
            "world replayed"
        );
        Ok((world, sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use polnet_core::{CanonicalEntity, Category, EntityKind, MentionEvidence};
    use uuid::Uuid;

    fn create(world: &World, name: &str) -> (EntityId, StoreEvent) {
        let evidence = MentionEvidence {
            document_id: "doc".to_string(),
            display_name: name.to_string(),
            category: Category::Official,
            confidence: 0.9,
            attributes: Default::default(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        };
        let entity =
            CanonicalEntity::from_evidence(Uuid::new_v4(), EntityKind::Person, Category::Official, &evidence);
        let id = entity.id;
        (id, world.store.create(entity).unwrap())
    }

    #[test]
    fn test_replay_reproduces_world() {
        let config = AppConfig::default();
        let world = World::new(&config);
        let mut events = Vec::new();

        let (a, ev) = create(&world, "John Thune");
        events.push(ev);
        let (b, ev) = create(&world, "Sen. Thune");
        events.push(ev);
        let (c, ev) = create(&world, "Donald Trump");
        events.push(ev);

        let at = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap();
        events.push(world.temporal.record(SubjectKey::Entity(b), at, 0.9));
        events.push(world.merge_identities(a, b).unwrap());

        let logged: Vec<LoggedEvent> = events
            .into_iter()
            .enumerate()
            .map(|(i, event)| LoggedEvent {
                sequence: i as u64 + 1,
                batch_id: "test".to_string(),
                recorded_at: at,
                event,
            })
            .collect();

        let (replayed, sequence) = World::replay(&config, None, &logged).unwrap();
        assert_eq!(sequence, 5);
        assert_eq!(replayed.store.snapshot(), world.store.snapshot());
        assert_eq!(replayed.temporal.snapshot(), world.temporal.snapshot());
        assert_eq!(replayed.store.resolve_id(b).unwrap(), a);
        assert!(replayed.store.get(&c).is_some());
    }

    #[test]
    fn test_replay_skips_events_in_snapshot() {
        let config = AppConfig::default();
        let world = World::new(&config);
        let (_, ev) = create(&world, "John Thune");
        let snapshot = world.checkpoint(1);

        let logged = vec![LoggedEvent {
            sequence: 1,
            batch_id: "test".to_string(),
            recorded_at: Utc::now(),
            event: ev,
        }];
        let (replayed, sequence) = World::replay(&config, Some(&snapshot), &logged).unwrap();
        assert_eq!(sequence, 1);
        assert_eq!(replayed.store.len(), 1);
    }

    #[test]
    fn test_replay_applies_tail_after_snapshot() {
        let config = AppConfig::default();
        let world = World::new(&config);
        let (_, first) = create(&world, "John Thune");
        let snapshot = world.checkpoint(1);
        let (trump, second) = create(&world, "Donald Trump");
        let (_, third) = create(&world, "Mike Johnson");

        let logged: Vec<LoggedEvent> = [first, second, third]
            .into_iter()
            .enumerate()
            .map(|(i, event)| LoggedEvent {
                sequence: i as u64 + 1,
                batch_id: "test".to_string(),
                recorded_at: Utc::now(),
                event,
            })
            .collect();

        let (replayed, sequence) = World::replay(&config, Some(&snapshot), &logged).unwrap();
        assert_eq!(sequence, 3);
        assert_eq!(replayed.store.len(), 3);
        assert!(replayed.store.get(&trump).is_some());
        assert_eq!(replayed.store.snapshot(), world.store.snapshot());
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let config = AppConfig::default();
        let world = World::new(&config);
        let (id, _) = create(&world, "John Thune");
        world.temporal.record(
            SubjectKey::Entity(id),
            Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap(),
            0.5,
        );

        let snapshot = world.checkpoint(2);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: WorldSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.temporal.series().len(), 1);
    }
}
