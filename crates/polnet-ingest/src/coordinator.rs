//! Batch Coordinator
//!
//! Drives one extraction batch through resolution, aggregation and temporal
//! indexing, then commits every resulting event to the event sink in a
//! single append. A failed append rolls the in-memory world back to the
//! pre-batch checkpoint, so a batch is either fully visible or not at all.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use polnet_analytics::{AnalysisResult, AnalyticsEngine, CancellationToken, GraphMetrics};
use polnet_core::normalize::{clean_display_name, normalize_name};
use polnet_core::{
    clamp_confidence, AppConfig, CanonicalEntity, EntityId, ExtractionBatch, LoggedEvent,
    PolnetError, RawMention, Result, StoreEvent, SubjectKey,
};
use polnet_store::EventSink;

use crate::aggregator::RelationshipMention;
use crate::resolver::{EntityResolver, ResolutionOutcome};
use crate::review::{ReviewDecision, ReviewQueue, ReviewStats};
use crate::world::{World, WorldSnapshot};

// ============================================================================
// Batch Summary
// ============================================================================

/// What processing one batch did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub document_id: String,

    /// Records that were committed
    pub accepted: usize,

    /// Records dropped with a validation error
    pub rejected: usize,

    /// Mentions routed to manual review
    pub ambiguous: usize,

    pub entities_created: usize,

    /// Mentions folded into an existing entity
    pub entities_merged: usize,

    pub relationships_recorded: usize,

    /// Review items opened by this batch
    pub review_ids: Vec<Uuid>,

    /// Messages of rejected records
    pub errors: Vec<String>,

    /// Events appended to the log
    pub events: usize,

    /// Graph metrics, when analytics ran after the batch
    pub analysis: Option<GraphMetrics>,
}

impl BatchSummary {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            ..Default::default()
        }
    }

    /// Whether every record was committed
    pub fn is_clean(&self) -> bool {
        self.rejected == 0 && self.ambiguous == 0
    }
}

/// Working state of the batch in flight
struct BatchContext {
    summary: BatchSummary,
    events: Vec<StoreEvent>,
    touched: BTreeSet<EntityId>,

    /// Names mentioned by the document itself, normalized
    names: HashMap<String, EntityId>,
}

impl BatchContext {
    fn new(document_id: &str) -> Self {
        Self {
            summary: BatchSummary::new(document_id),
            events: Vec::new(),
            touched: BTreeSet::new(),
            names: HashMap::new(),
        }
    }

    fn reject(&mut self, err: PolnetError) {
        tracing::warn!(document = %self.summary.document_id, error = %err, "record rejected");
        self.summary.rejected += 1;
        self.summary.errors.push(err.to_string());
    }
}

fn name_key(raw: &str) -> Option<String> {
    clean_display_name(raw)
        .map(|name| normalize_name(&name))
        .filter(|key| !key.is_empty())
}

// ============================================================================
// Coordinator
// ============================================================================

/// Serializes batches and commits them to the event sink
pub struct BatchCoordinator {
    config: AppConfig,
    world: World,
    resolver: EntityResolver,
    engine: AnalyticsEngine,
    sink: Arc<dyn EventSink>,
    review: Mutex<ReviewQueue>,

    /// Held for a whole commit; guards the last written sequence number
    commit: Mutex<u64>,

    /// Entities changed since the last analysis
    touched: Mutex<BTreeSet<EntityId>>,

    last_analysis: Mutex<Option<AnalysisResult>>,
}

impl BatchCoordinator {
    /// Coordinator over an empty world and the events already in `sink`
    pub fn new(config: AppConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        Self::open(config, sink, None)
    }

    /// Rebuild the world from a snapshot plus the sink's events after it
    pub fn open(
        config: AppConfig,
        sink: Arc<dyn EventSink>,
        snapshot: Option<&WorldSnapshot>,
    ) -> Result<Self> {
        config.validate()?;
        let events = sink.read_all()?;
        let (world, sequence) = World::replay(&config, snapshot, &events)?;
        let resolver = EntityResolver::new(world.store.clone(), config.resolver.clone());
        let engine = AnalyticsEngine::new(config.analytics.clone());

        Ok(Self {
            config,
            world,
            resolver,
            engine,
            sink,
            review: Mutex::new(ReviewQueue::new()),
            commit: Mutex::new(sequence),
            touched: Mutex::new(BTreeSet::new()),
            last_analysis: Mutex::new(None),
        })
    }

    /// Replace the review queue, e.g. with one loaded from disk
    pub fn with_review_queue(self, queue: ReviewQueue) -> Self {
        *self.review.lock() = queue;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    /// Sequence number of the last committed event
    pub fn sequence(&self) -> u64 {
        *self.commit.lock()
    }

    /// Consistent snapshot of the whole world at the current sequence
    pub fn checkpoint(&self) -> WorldSnapshot {
        let sequence = self.commit.lock();
        self.world.checkpoint(*sequence)
    }

    pub fn review_queue(&self) -> ReviewQueue {
        self.review.lock().clone()
    }

    pub fn review_stats(&self) -> ReviewStats {
        self.review.lock().stats()
    }

    pub fn last_analysis(&self) -> Option<AnalysisResult> {
        self.last_analysis.lock().clone()
    }

    // ------------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------------

    /// Process one extraction batch.
    ///
    /// Record-level problems are counted in the summary. Errors are returned
    /// only for an invalid document or a failed commit, in which case the
    /// world is left exactly as it was before the batch.
    pub fn process(&self, batch: &ExtractionBatch) -> Result<BatchSummary> {
        batch.validate()?;

        let mut sequence = self.commit.lock();
        let checkpoint = self.world.checkpoint(*sequence);
        let review_checkpoint = self.review.lock().clone();

        let mut ctx = BatchContext::new(&batch.document_id);
        let committed = self
            .apply_batch(batch, &mut ctx)
            .and_then(|_| self.commit_events(&mut sequence, &batch.document_id, &ctx.events));
        if let Err(e) = committed {
            self.world.restore(&checkpoint);
            *self.review.lock() = review_checkpoint;
            tracing::error!(document = %batch.document_id, error = %e, "batch rolled back");
            return Err(e);
        }
        drop(sequence);

        let mut summary = ctx.summary;
        summary.events = ctx.events.len();
        self.touched.lock().extend(ctx.touched);

        tracing::info!(
            document = %summary.document_id,
            accepted = summary.accepted,
            rejected = summary.rejected,
            ambiguous = summary.ambiguous,
            created = summary.entities_created,
            merged = summary.entities_merged,
            relationships = summary.relationships_recorded,
            events = summary.events,
            "batch committed"
        );

        if self.config.analytics.run_after_batch {
            let result = self.analyze(batch.timestamp, &CancellationToken::new())?;
            summary.analysis = Some(result.metrics);
        }
        Ok(summary)
    }

    fn apply_batch(&self, batch: &ExtractionBatch, ctx: &mut BatchContext) -> Result<()> {
        for malformed in &batch.malformed {
            ctx.reject(malformed.to_error(&batch.document_id));
        }
        for record in &batch.people {
            match record.to_mention(batch) {
                Ok(mention) => self.ingest_mention(mention, ctx)?,
                Err(e) => ctx.reject(e),
            }
        }
        for record in &batch.organizations {
            match record.to_mention(batch) {
                Ok(mention) => self.ingest_mention(mention, ctx)?,
                Err(e) => ctx.reject(e),
            }
        }

        for record in &batch.relationships {
            let (subject, predicate, object) = match record.parts(batch) {
                Ok(parts) => parts,
                Err(e) => {
                    ctx.reject(e);
                    continue;
                }
            };
            let timestamp = record.timestamp_in(batch);
            let Some(subject_id) = self.endpoint(&subject, record.confidence, timestamp, ctx)?
            else {
                continue;
            };
            let Some(object_id) = self.endpoint(&object, record.confidence, timestamp, ctx)?
            else {
                continue;
            };

            let mention = RelationshipMention {
                subject: subject_id,
                object: object_id,
                predicate: &predicate,
                document_id: &batch.document_id,
                context: record.context.as_deref(),
                confidence: record.confidence,
                timestamp,
            };
            match self.world.aggregator.ingest(&mention) {
                Ok(event) => {
                    if let StoreEvent::EdgeObserved { observation } = &event {
                        let weight = observation.confidence as f64;
                        let key = observation.key;
                        ctx.touched.insert(key.entity_a);
                        ctx.touched.insert(key.entity_b);
                        ctx.events.push(event);
                        ctx.events
                            .push(self.world.temporal.record(SubjectKey::Edge(key), timestamp, weight));
                    }
                    ctx.summary.accepted += 1;
                    ctx.summary.relationships_recorded += 1;
                }
                Err(e) if e.is_record_level() => ctx.reject(e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Resolve a person or organization mention and record its activity
    fn ingest_mention(&self, mention: RawMention, ctx: &mut BatchContext) -> Result<()> {
        match self.resolver.resolve(&mention) {
            Ok(resolution) => {
                match resolution.outcome {
                    ResolutionOutcome::Created => ctx.summary.entities_created += 1,
                    ResolutionOutcome::Merged => ctx.summary.entities_merged += 1,
                }
                ctx.summary.accepted += 1;
                ctx.events.push(resolution.event);

                let (weight, _) = clamp_confidence(mention.confidence);
                ctx.events.push(self.world.temporal.record(
                    SubjectKey::Entity(resolution.id),
                    mention.timestamp,
                    weight as f64,
                ));
                ctx.touched.insert(resolution.id);
                if let Some(key) = name_key(&mention.raw_name) {
                    ctx.names.insert(key, resolution.id);
                }
                Ok(())
            }
            Err(PolnetError::AmbiguousMatch { candidates, .. }) => {
                let scored = self
                    .resolver
                    .score(&mention)?
                    .into_iter()
                    .filter(|c| candidates.contains(&c.id))
                    .collect();
                let review_id = self.review.lock().enqueue(mention, scored);
                ctx.summary.ambiguous += 1;
                ctx.summary.review_ids.push(review_id);
                Ok(())
            }
            Err(e) if e.is_record_level() => {
                ctx.reject(e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Entity a relationship endpoint refers to.
    ///
    /// Names the document itself mentioned win; anything else is resolved
    /// as a mention of unknown category. `None` means the relationship was
    /// already counted as rejected or ambiguous.
    fn endpoint(
        &self,
        name: &str,
        confidence: f32,
        timestamp: DateTime<Utc>,
        ctx: &mut BatchContext,
    ) -> Result<Option<EntityId>> {
        if let Some(id) = name_key(name).and_then(|key| ctx.names.get(&key).copied()) {
            return Ok(Some(id));
        }

        let mention =
            RawMention::person(ctx.summary.document_id.clone(), name, "", confidence, timestamp);
        match self.resolver.resolve(&mention) {
            Ok(resolution) => {
                if resolution.outcome == ResolutionOutcome::Created {
                    ctx.summary.entities_created += 1;
                }
                ctx.events.push(resolution.event);
                ctx.touched.insert(resolution.id);
                if let Some(key) = name_key(name) {
                    ctx.names.insert(key, resolution.id);
                }
                Ok(Some(resolution.id))
            }
            Err(PolnetError::AmbiguousMatch { name, candidates }) => {
                tracing::warn!(
                    document = %ctx.summary.document_id,
                    %name,
                    candidates = candidates.len(),
                    "relationship endpoint ambiguous, relationship dropped"
                );
                ctx.summary.ambiguous += 1;
                Ok(None)
            }
            Err(e) if e.is_record_level() => {
                ctx.reject(e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Append events under the held commit lock
    fn commit_events(&self, sequence: &mut u64, batch_id: &str, events: &[StoreEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let recorded_at = Utc::now();
        let logged: Vec<LoggedEvent> = events
            .iter()
            .enumerate()
            .map(|(i, event)| LoggedEvent {
                sequence: *sequence + i as u64 + 1,
                batch_id: batch_id.to_string(),
                recorded_at,
                event: event.clone(),
            })
            .collect();
        self.sink.append(&logged)?;
        *sequence += logged.len() as u64;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Manual operations
    // ------------------------------------------------------------------------

    /// Apply a reviewer's decision to a pending review item.
    ///
    /// Returns the entity the mention ended up in, or `None` when rejected.
    pub fn decide_review(
        &self,
        review_id: Uuid,
        decision: ReviewDecision,
        reviewer: &str,
        note: Option<&str>,
    ) -> Result<Option<EntityId>> {
        let mut sequence = self.commit.lock();
        let mut review = self.review.lock();

        let item = review
            .get(review_id)
            .ok_or_else(|| PolnetError::NotFound(format!("review item {review_id}")))?;
        if item.decision.is_some() {
            return Err(PolnetError::Validation(format!(
                "review item {review_id} was already {}",
                item.status
            )));
        }
        let mention = item.mention.clone();
        let checkpoint = self.world.checkpoint(*sequence);

        let result = self
            .apply_decision(&mention, decision)
            .and_then(|(target, events)| {
                self.commit_events(&mut sequence, &format!("review:{review_id}"), &events)?;
                Ok(target)
            });
        let target = match result {
            Ok(target) => target,
            Err(e) => {
                self.world.restore(&checkpoint);
                return Err(e);
            }
        };

        review.decide(review_id, decision, reviewer, note)?;
        if let Some(id) = target {
            self.touched.lock().insert(id);
        }
        tracing::info!(%review_id, ?decision, reviewer, "review decided");
        Ok(target)
    }

    fn apply_decision(
        &self,
        mention: &RawMention,
        decision: ReviewDecision,
    ) -> Result<(Option<EntityId>, Vec<StoreEvent>)> {
        let store = &self.world.store;
        let evidence = mention.evidence()?;
        let (id, event) = match decision {
            ReviewDecision::Reject => return Ok((None, Vec::new())),
            ReviewDecision::MergeInto(target) => {
                let id = store.resolve_id(target)?;
                let current = store
                    .get(&id)
                    .ok_or_else(|| PolnetError::NotFound(format!("entity {id}")))?;
                if current.value.kind != mention.kind {
                    return Err(PolnetError::Validation(format!(
                        "cannot merge a {} mention into {} entity {id}",
                        mention.kind, current.value.kind
                    )));
                }
                (id, store.absorb(id, &evidence, current.version)?)
            }
            ReviewDecision::CreateNew => {
                let entity = CanonicalEntity::from_evidence(
                    Uuid::new_v4(),
                    mention.kind,
                    mention.category(),
                    &evidence,
                );
                let id = entity.id;
                (id, store.create(entity)?)
            }
        };

        let activity = self.world.temporal.record(
            SubjectKey::Entity(id),
            mention.timestamp,
            evidence.confidence as f64,
        );
        Ok((Some(id), vec![event, activity]))
    }

    /// Manually merge two canonical identities
    pub fn merge_entities(&self, winner: EntityId, loser: EntityId) -> Result<StoreEvent> {
        let mut sequence = self.commit.lock();
        let checkpoint = self.world.checkpoint(*sequence);

        let result = self.world.merge_identities(winner, loser).and_then(|event| {
            self.commit_events(&mut sequence, "manual-merge", std::slice::from_ref(&event))?;
            Ok(event)
        });
        match result {
            Ok(event) => {
                let mut touched = self.touched.lock();
                touched.insert(winner);
                touched.insert(loser);
                tracing::info!(%winner, %loser, "identities merged");
                Ok(event)
            }
            Err(e) => {
                self.world.restore(&checkpoint);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Analytics
    // ------------------------------------------------------------------------

    /// Run analytics over a consistent snapshot of the world.
    ///
    /// Incremental when enabled and a previous result exists. A cancelled
    /// run leaves the previous result and the touched set as they were.
    pub fn analyze(&self, as_of: DateTime<Utc>, cancel: &CancellationToken) -> Result<AnalysisResult> {
        let (snapshot, touched) = {
            let sequence = self.commit.lock();
            let touched = std::mem::take(&mut *self.touched.lock());
            (self.world.checkpoint(*sequence), touched)
        };

        let previous = self.last_analysis.lock().clone();
        let result = match previous.as_ref().filter(|_| self.config.analytics.incremental) {
            Some(previous) => self.engine.analyze_incremental(
                previous,
                &touched,
                &snapshot.entities,
                &snapshot.edges,
                &snapshot.temporal,
                as_of,
                cancel,
            ),
            None => self.engine.analyze(
                &snapshot.entities,
                &snapshot.edges,
                &snapshot.temporal,
                as_of,
                cancel,
            ),
        };

        match result {
            Ok(result) => {
                *self.last_analysis.lock() = Some(result.clone());
                Ok(result)
            }
            Err(e) => {
                self.touched.lock().extend(touched);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use polnet_core::{PersonRecord, RelationshipRecord};
    use polnet_store::MemoryEventLog;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 9, 0, 0).unwrap()
    }

    fn person(name: &str) -> PersonRecord {
        PersonRecord {
            name: Some(name.to_string()),
            category: Some("political_official".to_string()),
            confidence: 0.9,
            ..Default::default()
        }
    }

    fn coordinator() -> (BatchCoordinator, Arc<MemoryEventLog>) {
        let log = Arc::new(MemoryEventLog::new());
        let coordinator = BatchCoordinator::new(AppConfig::default(), log.clone()).unwrap();
        (coordinator, log)
    }

    #[test]
    fn test_process_counts_records() {
        let (coordinator, log) = coordinator();
        let mut batch = ExtractionBatch::new("playbook-1", at(1));
        batch.people = vec![person("John Thune"), PersonRecord::default(), person("Thune")];
        batch.relationships = vec![RelationshipRecord {
            subject: Some("John Thune".to_string()),
            predicate: Some("met with".to_string()),
            object: Some("Donald Trump".to_string()),
            confidence: 0.8,
            ..Default::default()
        }];

        let summary = coordinator.process(&batch).unwrap();
        assert_eq!(summary.accepted, 3);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.entities_created, 2);
        assert_eq!(summary.entities_merged, 1);
        assert_eq!(summary.relationships_recorded, 1);
        assert_eq!(log.len(), summary.events);
        assert_eq!(coordinator.sequence(), summary.events as u64);
        assert_eq!(coordinator.world().store.live_count(), 2);
    }

    #[test]
    fn test_empty_document_id_rejected() {
        let (coordinator, log) = coordinator();
        let batch = ExtractionBatch::new("  ", at(1));
        assert!(matches!(coordinator.process(&batch), Err(PolnetError::Validation(_))));
        assert!(log.is_empty());
    }

    #[test]
    fn test_review_decision_creates_entity() {
        let (coordinator, _) = coordinator();
        let mut batch = ExtractionBatch::new("doc-1", at(1));
        batch.people = vec![person("Adam Smith"), person("Jason Smith")];
        coordinator.process(&batch).unwrap();

        let mut batch = ExtractionBatch::new("doc-2", at(2));
        batch.people = vec![person("Smith")];
        let summary = coordinator.process(&batch).unwrap();
        assert_eq!(summary.ambiguous, 1);
        let review_id = summary.review_ids[0];
        assert_eq!(coordinator.review_queue().get(review_id).unwrap().candidates.len(), 2);

        let id = coordinator
            .decide_review(review_id, ReviewDecision::CreateNew, "editor", None)
            .unwrap()
            .unwrap();
        assert_eq!(coordinator.world().store.live_count(), 3);
        assert!(coordinator.world().store.get(&id).is_some());
        assert!(coordinator
            .decide_review(review_id, ReviewDecision::Reject, "editor", None)
            .is_err());
    }
}
