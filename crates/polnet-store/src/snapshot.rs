//! Immutable read views handed to analytics and exports
//!
//! Snapshots are plain values: cloning the live structures once and then
//! reading without locks is what lets analytics run concurrently with
//! ingestion.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use polnet_core::{
    BucketValue, CanonicalEntity, EdgeKey, EntityId, Granularity, RelationshipEdge, SubjectKey,
    TemporalBucket, TimeRange,
};

// ============================================================================
// Entity Snapshot
// ============================================================================

/// Consistent view of the canonical entity store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Every entity ever created, merged ones included
    pub entities: BTreeMap<EntityId, CanonicalEntity>,
}

impl StoreSnapshot {
    pub fn get(&self, id: &EntityId) -> Option<&CanonicalEntity> {
        self.entities.get(id)
    }

    /// Live entities in id order
    pub fn live(&self) -> impl Iterator<Item = &CanonicalEntity> {
        self.entities.values().filter(|e| e.is_live())
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    /// Follow merge redirects to the live entity
    pub fn resolve(&self, id: EntityId) -> Option<EntityId> {
        let mut current = id;
        for _ in 0..=self.entities.len() {
            let entity = self.entities.get(&current)?;
            match entity.merged_into {
                Some(next) => current = next,
                None => return Some(current),
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ============================================================================
// Edge Snapshot
// ============================================================================

/// Consistent view of the relationship edge set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    /// Active edges ordered by key
    pub edges: Vec<RelationshipEdge>,

    /// Edges retired because an identity merge turned them into self-loops
    #[serde(default)]
    pub retired: Vec<RelationshipEdge>,
}

impl EdgeSnapshot {
    pub fn get(&self, key: &EdgeKey) -> Option<&RelationshipEdge> {
        self.edges
            .binary_search_by(|e| e.key.cmp(key))
            .ok()
            .map(|i| &self.edges[i])
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ============================================================================
// Temporal Snapshot
// ============================================================================

/// Consistent view of the temporal index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "SerializedTemporal")]
pub struct TemporalSnapshot {
    pub granularity: Granularity,

    /// Materialized buckets ordered by subject, then period
    pub buckets: Vec<TemporalBucket>,

    #[serde(skip)]
    index: HashMap<SubjectKey, BTreeMap<NaiveDate, BucketValue>>,
}

impl TemporalSnapshot {
    /// Build a snapshot from per-subject series
    pub fn from_series(
        granularity: Granularity,
        series: HashMap<SubjectKey, BTreeMap<NaiveDate, BucketValue>>,
    ) -> Self {
        let mut buckets: Vec<TemporalBucket> = series
            .iter()
            .flat_map(|(subject, periods)| {
                periods.iter().map(move |(period, value)| TemporalBucket {
                    subject_key: *subject,
                    period: *period,
                    activity_count: value.activity_count,
                    confidence_weighted_score: value.confidence_weighted_score,
                })
            })
            .collect();
        buckets.sort_by(|a, b| {
            a.subject_key
                .cmp(&b.subject_key)
                .then_with(|| a.period.cmp(&b.period))
        });

        Self {
            granularity,
            buckets,
            index: series,
        }
    }

    /// Per-subject series, keyed by period start
    pub fn series(&self) -> &HashMap<SubjectKey, BTreeMap<NaiveDate, BucketValue>> {
        &self.index
    }

    /// Buckets of a subject whose period overlaps the range, in period order
    pub fn query(&self, subject: &SubjectKey, range: TimeRange) -> Vec<(NaiveDate, BucketValue)> {
        query_series(self.index.get(subject), self.granularity, range)
    }

    /// Sum of a subject's activity over the range
    pub fn sum_range(&self, subject: &SubjectKey, range: TimeRange) -> BucketValue {
        let mut total = BucketValue::default();
        for (_, value) in self.query(subject, range) {
            total.add(&value);
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl PartialEq for TemporalSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.granularity == other.granularity && self.buckets == other.buckets
    }
}

#[derive(Deserialize)]
struct SerializedTemporal {
    granularity: Granularity,
    buckets: Vec<TemporalBucket>,
}

impl From<SerializedTemporal> for TemporalSnapshot {
    fn from(raw: SerializedTemporal) -> Self {
        let mut series: HashMap<SubjectKey, BTreeMap<NaiveDate, BucketValue>> = HashMap::new();
        for bucket in raw.buckets {
            series.entry(bucket.subject_key).or_default().insert(
                bucket.period,
                BucketValue {
                    activity_count: bucket.activity_count,
                    confidence_weighted_score: bucket.confidence_weighted_score,
                },
            );
        }
        Self::from_series(raw.granularity, series)
    }
}

/// Overlap query over one subject's sparse series
pub(crate) fn query_series(
    series: Option<&BTreeMap<NaiveDate, BucketValue>>,
    granularity: Granularity,
    range: TimeRange,
) -> Vec<(NaiveDate, BucketValue)> {
    let Some(series) = series else {
        return Vec::new();
    };
    if range.is_empty() {
        return Vec::new();
    }

    // The first overlapping period starts at or before range.start
    let first = granularity.period_start(range.start.date_naive());
    series
        .range(first..)
        .take_while(|(period, _)| range.overlaps_period(**period, granularity))
        .map(|(period, value)| (*period, *value))
        .collect()
}
