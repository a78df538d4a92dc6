//! Canonical Entity Store
//!
//! Holds every canonical entity with entity-granular locking:
//! - one mutex per entity, so merges into different entities proceed in
//!   parallel
//! - one mutex per blocking group, held by the resolver for a whole
//!   resolve so that two mentions of a new identity cannot both create it
//! - a commit gate that writers share and [`EntityStore::snapshot`] takes
//!   exclusively, so a snapshot never observes half of a two-entity merge
//!
//! Every mutation carries a version check (optimistic concurrency) and
//! returns the [`StoreEvent`] describing it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};

use polnet_core::normalize::entity_blocking_keys;
use polnet_core::{CanonicalEntity, EntityId, MentionEvidence, PolnetError, Result, StoreEvent};

use crate::snapshot::StoreSnapshot;

/// Size of the group lock table above which idle locks are pruned
pub const GROUP_PRUNE_THRESHOLD: usize = 256;

/// A value read together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Guard over a blocking group; the group stays locked until it is dropped
pub type GroupGuard = ArcMutexGuard<RawMutex, ()>;

struct EntityCell {
    entity: CanonicalEntity,
    version: u64,
}

type SharedCell = Arc<Mutex<EntityCell>>;

/// In-memory canonical entity store
#[derive(Default)]
pub struct EntityStore {
    entities: RwLock<HashMap<EntityId, SharedCell>>,
    blocking: RwLock<HashMap<String, BTreeSet<EntityId>>>,
    groups: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    commit_gate: RwLock<()>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Lock a blocking group for the duration of a resolve.
    ///
    /// Group locks nobody holds or waits on are dropped once the table
    /// grows past [`GROUP_PRUNE_THRESHOLD`].
    pub fn lock_group(&self, group: &str) -> GroupGuard {
        let mutex = {
            let mut groups = self.groups.lock();
            if groups.len() >= GROUP_PRUNE_THRESHOLD && !groups.contains_key(group) {
                groups.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            groups
                .entry(group.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_arc()
    }

    fn cell(&self, id: &EntityId) -> Option<SharedCell> {
        self.entities.read().get(id).cloned()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current value and version of an entity (merged entities included)
    pub fn get(&self, id: &EntityId) -> Option<Versioned<CanonicalEntity>> {
        let cell = self.cell(id)?;
        let cell = cell.lock();
        Some(Versioned {
            value: cell.entity.clone(),
            version: cell.version,
        })
    }

    /// Follow `merged_into` redirects to the live entity
    pub fn resolve_id(&self, id: EntityId) -> Result<EntityId> {
        let mut current = id;
        // A redirect chain can be no longer than the number of entities
        let limit = self.len() + 1;
        for _ in 0..limit {
            let cell = self
                .cell(&current)
                .ok_or_else(|| PolnetError::NotFound(format!("entity {current}")))?;
            let next = cell.lock().entity.merged_into;
            match next {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
        Err(PolnetError::StoreUnavailable(format!(
            "redirect cycle while resolving entity {id}"
        )))
    }

    /// Live candidates indexed under any of the given blocking keys, ordered by id
    pub fn candidates(&self, keys: &[String]) -> Vec<Versioned<CanonicalEntity>> {
        let ids: BTreeSet<EntityId> = {
            let blocking = self.blocking.read();
            keys.iter()
                .filter_map(|k| blocking.get(k))
                .flatten()
                .copied()
                .collect()
        };

        let cells: Vec<SharedCell> = {
            let entities = self.entities.read();
            ids.iter().filter_map(|id| entities.get(id).cloned()).collect()
        };

        cells
            .iter()
            .filter_map(|cell| {
                let cell = cell.lock();
                cell.entity.is_live().then(|| Versioned {
                    value: cell.entity.clone(),
                    version: cell.version,
                })
            })
            .collect()
    }

    /// Total number of entities, merged ones included
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live entities
    pub fn live_count(&self) -> usize {
        let cells: Vec<SharedCell> = self.entities.read().values().cloned().collect();
        cells.iter().filter(|c| c.lock().entity.is_live()).count()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert a new canonical entity
    pub fn create(&self, entity: CanonicalEntity) -> Result<StoreEvent> {
        let _gate = self.commit_gate.read();
        let id = entity.id;
        let keys = entity_blocking_keys(&entity);

        {
            let mut entities = self.entities.write();
            if entities.contains_key(&id) {
                return Err(PolnetError::Validation(format!(
                    "entity {id} already exists"
                )));
            }
            entities.insert(
                id,
                Arc::new(Mutex::new(EntityCell {
                    entity: entity.clone(),
                    version: 1,
                })),
            );
        }
        self.index(id, &keys);

        tracing::debug!(%id, name = %entity.canonical_name, category = %entity.category, "entity created");
        Ok(StoreEvent::EntityCreated { entity })
    }

    /// Fold one mention into an entity if it is still at `expected_version`.
    ///
    /// A stale version or an entity merged away in the meantime is a
    /// [`PolnetError::MergeConflict`]; the caller re-reads and retries.
    pub fn absorb(
        &self,
        id: EntityId,
        evidence: &MentionEvidence,
        expected_version: u64,
    ) -> Result<StoreEvent> {
        let _gate = self.commit_gate.read();
        let cell = self
            .cell(&id)
            .ok_or_else(|| PolnetError::NotFound(format!("entity {id}")))?;

        let (old_keys, new_keys) = {
            let mut cell = cell.lock();
            if cell.version != expected_version || !cell.entity.is_live() {
                return Err(PolnetError::MergeConflict { id });
            }
            let old_keys = entity_blocking_keys(&cell.entity);
            cell.entity.absorb(evidence);
            cell.version += 1;
            (old_keys, entity_blocking_keys(&cell.entity))
        };
        self.reindex(id, &old_keys, &new_keys);

        Ok(StoreEvent::MentionAbsorbed {
            id,
            evidence: evidence.clone(),
        })
    }

    /// Identity merge: fold `loser` into `winner` and redirect `loser`.
    ///
    /// Both entity locks are taken in id order. Merging entities of
    /// different kinds, or an entity into itself, is a validation error.
    pub fn merge_entities(&self, winner: EntityId, loser: EntityId) -> Result<StoreEvent> {
        let _gate = self.commit_gate.read();
        if winner == loser {
            return Err(PolnetError::Validation(format!(
                "cannot merge entity {winner} into itself"
            )));
        }

        let winner_cell = self
            .cell(&winner)
            .ok_or_else(|| PolnetError::NotFound(format!("entity {winner}")))?;
        let loser_cell = self
            .cell(&loser)
            .ok_or_else(|| PolnetError::NotFound(format!("entity {loser}")))?;

        let (mut w, mut l) = if winner < loser {
            let w = winner_cell.lock();
            let l = loser_cell.lock();
            (w, l)
        } else {
            let l = loser_cell.lock();
            let w = winner_cell.lock();
            (w, l)
        };

        if !w.entity.is_live() {
            return Err(PolnetError::MergeConflict { id: winner });
        }
        if !l.entity.is_live() {
            return Err(PolnetError::MergeConflict { id: loser });
        }
        if w.entity.kind != l.entity.kind {
            return Err(PolnetError::Validation(format!(
                "cannot merge {} {loser} into {} {winner}",
                l.entity.kind, w.entity.kind
            )));
        }

        let old_winner_keys = entity_blocking_keys(&w.entity);
        let loser_keys = entity_blocking_keys(&l.entity);

        w.entity.merge_from(&l.entity);
        w.version += 1;
        l.entity.merged_into = Some(winner);
        l.version += 1;

        let new_winner_keys = entity_blocking_keys(&w.entity);
        tracing::info!(
            %winner,
            %loser,
            name = %w.entity.canonical_name,
            "entities merged"
        );
        drop(w);
        drop(l);

        self.unindex(loser, &loser_keys);
        self.reindex(winner, &old_winner_keys, &new_winner_keys);

        Ok(StoreEvent::EntitiesMerged { winner, loser })
    }

    /// Re-apply a logged entity event without version checks
    pub fn apply(&self, event: &StoreEvent) -> Result<()> {
        match event {
            StoreEvent::EntityCreated { entity } => {
                self.create(entity.clone())?;
            }
            StoreEvent::MentionAbsorbed { id, evidence } => {
                let current = self
                    .get(id)
                    .ok_or_else(|| PolnetError::NotFound(format!("entity {id}")))?;
                self.absorb(*id, evidence, current.version)?;
            }
            StoreEvent::EntitiesMerged { winner, loser } => {
                self.merge_entities(*winner, *loser)?;
            }
            StoreEvent::EdgeObserved { .. } | StoreEvent::ActivityRecorded { .. } => {}
        }
        Ok(())
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Consistent copy of every entity.
    ///
    /// Waits for in-flight writes to finish and holds new ones off while
    /// copying.
    pub fn snapshot(&self) -> StoreSnapshot {
        let _gate = self.commit_gate.write();
        let cells: Vec<SharedCell> = self.entities.read().values().cloned().collect();
        StoreSnapshot {
            entities: cells
                .iter()
                .map(|cell| {
                    let cell = cell.lock();
                    (cell.entity.id, cell.entity.clone())
                })
                .collect(),
        }
    }

    /// Replace the store contents with a snapshot
    pub fn restore(&self, snapshot: &StoreSnapshot) {
        let _gate = self.commit_gate.write();
        let mut entities = HashMap::with_capacity(snapshot.entities.len());
        let mut blocking: HashMap<String, BTreeSet<EntityId>> = HashMap::new();

        for (id, entity) in &snapshot.entities {
            if entity.is_live() {
                for key in entity_blocking_keys(entity) {
                    blocking.entry(key).or_default().insert(*id);
                }
            }
            entities.insert(
                *id,
                Arc::new(Mutex::new(EntityCell {
                    entity: entity.clone(),
                    version: 1,
                })),
            );
        }

        *self.entities.write() = entities;
        *self.blocking.write() = blocking;
    }

    // ========================================================================
    // Blocking index
    // ========================================================================

    fn index(&self, id: EntityId, keys: &BTreeSet<String>) {
        let mut blocking = self.blocking.write();
        for key in keys {
            blocking.entry(key.clone()).or_default().insert(id);
        }
    }

    fn unindex(&self, id: EntityId, keys: &BTreeSet<String>) {
        let mut blocking = self.blocking.write();
        for key in keys {
            if let Some(ids) = blocking.get_mut(key) {
                ids.remove(&id);
                if ids.is_empty() {
                    blocking.remove(key);
                }
            }
        }
    }

    fn reindex(&self, id: EntityId, old: &BTreeSet<String>, new: &BTreeSet<String>) {
        if old == new {
            return;
        }
        let stale: BTreeSet<String> = old.difference(new).cloned().collect();
        self.unindex(id, &stale);
        self.index(id, new);
    }
}
