//! Temporal Index
//!
//! Sparse, per-subject activity counters bucketed by a configurable
//! granularity. Only periods that saw activity are materialized, and
//! buckets only ever increment: the index is rebuilt from the event log by
//! replaying the same increments in sequence order.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;

use polnet_core::{BucketValue, Granularity, StoreEvent, SubjectKey, TimeRange};

use crate::snapshot::{query_series, TemporalSnapshot};

type Series = BTreeMap<NaiveDate, BucketValue>;

/// Concurrent sparse bucket index
pub struct TemporalIndex {
    granularity: Granularity,
    series: RwLock<HashMap<SubjectKey, Series>>,
}

impl TemporalIndex {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Increment the bucket covering `timestamp` for a subject.
    ///
    /// The bucket is selected by the record's own timestamp, never by
    /// ingestion time, so out-of-order documents land in the right period.
    pub fn record(&self, subject: SubjectKey, timestamp: DateTime<Utc>, weight: f64) -> StoreEvent {
        let period = self.granularity.period_of(timestamp);
        self.series
            .write()
            .entry(subject)
            .or_default()
            .entry(period)
            .or_default()
            .increment(weight);

        tracing::trace!(%subject, %period, weight, "activity recorded");

        StoreEvent::ActivityRecorded {
            subject,
            timestamp,
            weight,
        }
    }

    /// Buckets whose period overlaps `[range.start, range.end)`, ordered by
    /// period. Unknown subjects and empty ranges yield an empty result.
    pub fn query(&self, subject: &SubjectKey, range: TimeRange) -> Vec<(NaiveDate, BucketValue)> {
        let series = self.series.read();
        query_series(series.get(subject), self.granularity, range)
    }

    /// Fold a merged-away subject's counters into its survivor.
    ///
    /// The source series is retained untouched for audit.
    pub fn merge_subject(&self, from: &SubjectKey, into: SubjectKey) {
        if *from == into {
            return;
        }
        let mut series = self.series.write();
        let Some(source) = series.get(from).cloned() else {
            return;
        };
        let target = series.entry(into).or_default();
        for (period, value) in source {
            target.entry(period).or_default().add(&value);
        }
    }

    /// Number of subjects with at least one bucket
    pub fn subject_count(&self) -> usize {
        self.series.read().len()
    }

    /// Consistent copy of every series
    pub fn snapshot(&self) -> TemporalSnapshot {
        TemporalSnapshot::from_series(self.granularity, self.series.read().clone())
    }

    /// Replace the index contents with a snapshot
    pub fn restore(&self, snapshot: &TemporalSnapshot) {
        *self.series.write() = snapshot.series().clone();
    }

    /// Re-apply a logged activity increment
    pub fn apply(&self, event: &StoreEvent) {
        if let StoreEvent::ActivityRecorded {
            subject,
            timestamp,
            weight,
        } = event
        {
            self.record(*subject, *timestamp, *weight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, 12, 0, 0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn test_sparse_daily_buckets() {
        let index = TemporalIndex::new(Granularity::Day);
        let subject = SubjectKey::Entity(Uuid::new_v4());
        index.record(subject, day(1), 1.0);
        index.record(subject, day(5), 0.5);

        let all = index.query(&subject, TimeRange::days(date(1), date(7)));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, date(1));
        assert_eq!(all[1].0, date(5));

        // Day 3 lies between two active days and is not materialized
        assert!(index.query(&subject, TimeRange::days(date(3), date(3))).is_empty());
    }

    #[test]
    fn test_weekly_bucket_accumulates() {
        let index = TemporalIndex::new(Granularity::Week);
        let subject = SubjectKey::Entity(Uuid::new_v4());
        // Thursday and Friday of the week starting Monday 2025-01-06
        index.record(subject, day(9), 1.0);
        index.record(subject, day(10), 0.5);

        let buckets = index.query(&subject, TimeRange::days(date(6), date(12)));
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].0, date(6));
        assert_eq!(buckets[0].1.activity_count, 2);
        assert!((buckets[0].1.confidence_weighted_score - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_query_is_idempotent_and_handles_unknowns() {
        let index = TemporalIndex::new(Granularity::Day);
        let subject = SubjectKey::Entity(Uuid::new_v4());
        index.record(subject, day(2), 1.0);

        let range = TimeRange::days(date(1), date(3));
        assert_eq!(index.query(&subject, range), index.query(&subject, range));

        let unknown = SubjectKey::Entity(Uuid::new_v4());
        assert!(index.query(&unknown, range).is_empty());
        assert!(index
            .query(&subject, TimeRange::new(day(3), day(1)))
            .is_empty());
    }

    #[test]
    fn test_merge_subject_adds_counts() {
        let index = TemporalIndex::new(Granularity::Day);
        let winner = SubjectKey::Entity(Uuid::new_v4());
        let loser = SubjectKey::Entity(Uuid::new_v4());
        index.record(winner, day(2), 1.0);
        index.record(loser, day(2), 0.5);
        index.record(loser, day(4), 0.5);

        index.merge_subject(&loser, winner);

        let range = TimeRange::days(date(1), date(5));
        let merged = index.query(&winner, range);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].1.activity_count, 2);
        // Source retained
        assert_eq!(index.query(&loser, range).len(), 2);
    }

    #[test]
    fn test_snapshot_restore() {
        let index = TemporalIndex::new(Granularity::Month);
        let subject = SubjectKey::Entity(Uuid::new_v4());
        index.record(subject, day(20), 0.9);
        let snapshot = index.snapshot();

        index.record(subject, day(21), 0.9);
        index.restore(&snapshot);

        assert_eq!(index.snapshot(), snapshot);
        assert_eq!(
            snapshot.sum_range(&subject, TimeRange::days(date(1), date(31))).activity_count,
            1
        );
    }
}
