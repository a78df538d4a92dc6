//! Activity trends
//!
//! Two views over an entity's buckets:
//! - window labels compare the recent window with the one before it. A
//!   bucket belongs to the window that contains its period start, so a
//!   weekly or monthly bucket is never counted in both windows.
//! - trend reports fit a least-squares line through the whole series up to
//!   `as_of` and keep the ones whose slope times peak is significant.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use polnet_core::{BucketValue, EntityId, SubjectKey, TrendLabel};
use polnet_store::TemporalSnapshot;

/// Recent and prior activity windows ending at `as_of`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendWindows {
    /// Last day of the recent window
    pub as_of: NaiveDate,
    pub window_days: i64,
}

impl TrendWindows {
    pub fn new(as_of: DateTime<Utc>, window_days: i64) -> Self {
        Self {
            as_of: as_of.date_naive(),
            window_days: window_days.max(1),
        }
    }

    /// Days `(as_of - W, as_of]`
    pub fn recent(&self) -> (NaiveDate, NaiveDate) {
        (self.as_of - Duration::days(self.window_days - 1), self.as_of)
    }

    /// Days `(as_of - 2W, as_of - W]`
    pub fn prior(&self) -> (NaiveDate, NaiveDate) {
        let last = self.as_of - Duration::days(self.window_days);
        (last - Duration::days(self.window_days - 1), last)
    }

    /// Activity counts `(recent, prior)` of an entity
    pub fn activity(&self, temporal: &TemporalSnapshot, id: EntityId) -> (u64, u64) {
        let Some(series) = temporal.series().get(&SubjectKey::Entity(id)) else {
            return (0, 0);
        };
        let (first, _) = self.prior();
        let (recent_first, _) = self.recent();

        let mut recent = 0;
        let mut prior = 0;
        for (period, value) in series.range(first..=self.as_of) {
            if *period >= recent_first {
                recent += value.activity_count;
            } else {
                prior += value.activity_count;
            }
        }
        (recent, prior)
    }
}

/// Classify the change between two windows.
///
/// Both empty is stable; activity appearing from nothing is rising.
pub fn classify(recent: u64, prior: u64, threshold: f64) -> TrendLabel {
    if prior == 0 {
        return if recent == 0 {
            TrendLabel::Stable
        } else {
            TrendLabel::Rising
        };
    }
    let change = (recent as f64 - prior as f64) / prior as f64;
    if change > threshold {
        TrendLabel::Rising
    } else if change < -threshold {
        TrendLabel::Falling
    } else {
        TrendLabel::Stable
    }
}

/// Direction of a fitted activity trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendCategory {
    RisingInfluence,
    DecliningActivity,
    StableActivity,
}

impl TrendCategory {
    fn from_slope(slope: f64, threshold: f64) -> Self {
        if slope > threshold {
            Self::RisingInfluence
        } else if slope < -threshold {
            Self::DecliningActivity
        } else {
            Self::StableActivity
        }
    }
}

impl std::fmt::Display for TrendCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RisingInfluence => write!(f, "rising influence"),
            Self::DecliningActivity => write!(f, "declining activity"),
            Self::StableActivity => write!(f, "stable activity"),
        }
    }
}

/// A significant trend in one entity's activity series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub entity_id: EntityId,
    pub entity_name: String,
    pub category: TrendCategory,

    /// First and last bucket of the fitted series
    pub start: NaiveDate,
    pub end: NaiveDate,

    /// Bucket with the highest intensity (earliest on ties)
    pub peak: NaiveDate,

    /// Intensity change per bucket
    pub slope: f64,

    /// `|slope|` times the peak intensity
    pub strength: f64,

    pub description: String,
}

impl TrendReport {
    /// Fit a trend over the buckets up to `as_of`.
    ///
    /// Intensity is the confidence-weighted score of each bucket. Needs at
    /// least two buckets.
    pub fn fit(
        entity_id: EntityId,
        entity_name: &str,
        series: &BTreeMap<NaiveDate, BucketValue>,
        as_of: NaiveDate,
        slope_threshold: f64,
    ) -> Option<Self> {
        let points: Vec<(NaiveDate, f64)> = series
            .range(..=as_of)
            .map(|(period, value)| (*period, value.confidence_weighted_score))
            .collect();
        if points.len() < 2 {
            return None;
        }

        let intensities: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
        let slope = least_squares_slope(&intensities);
        let (peak, max) = points
            .iter()
            .fold((points[0].0, f64::MIN), |best, &(period, v)| {
                if v > best.1 {
                    (period, v)
                } else {
                    best
                }
            });

        let category = TrendCategory::from_slope(slope, slope_threshold);
        let description = match category {
            TrendCategory::RisingInfluence => format!(
                "{entity_name} shows increasing political activity over the analyzed period (slope: {slope:.3})"
            ),
            TrendCategory::DecliningActivity => format!(
                "{entity_name} shows decreasing political activity over the analyzed period (slope: {slope:.3})"
            ),
            TrendCategory::StableActivity => format!(
                "{entity_name} maintains stable political activity over the analyzed period (slope: {slope:.3})"
            ),
        };

        Some(Self {
            entity_id,
            entity_name: entity_name.to_string(),
            category,
            start: points[0].0,
            end: points[points.len() - 1].0,
            peak,
            slope,
            strength: slope.abs() * max,
            description,
        })
    }
}

/// Slope of the least-squares line through `(index, value)`
fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use polnet_core::{BucketValue, Granularity};
    use std::collections::{BTreeMap, HashMap};
    use uuid::Uuid;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0, 0, 0.25), TrendLabel::Stable);
        assert_eq!(classify(3, 0, 0.25), TrendLabel::Rising);
        assert_eq!(classify(10, 4, 0.25), TrendLabel::Rising);
        assert_eq!(classify(2, 4, 0.25), TrendLabel::Falling);
        assert_eq!(classify(5, 4, 0.25), TrendLabel::Stable);
        assert_eq!(classify(0, 4, 0.25), TrendLabel::Falling);
    }

    #[test]
    fn test_windows_are_adjacent() {
        let windows = TrendWindows::new(Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap(), 30);
        assert_eq!(windows.recent(), (date(3, 2), date(3, 31)));
        assert_eq!(windows.prior(), (date(1, 31), date(3, 1)));
    }

    #[test]
    fn test_activity_by_period_start() {
        let id = Uuid::from_u128(1);
        let mut series = BTreeMap::new();
        for (day, count) in [(date(1, 15), 9), (date(2, 10), 2), (date(3, 20), 5), (date(4, 2), 7)] {
            series.insert(
                day,
                BucketValue {
                    activity_count: count,
                    confidence_weighted_score: count as f64,
                },
            );
        }
        let temporal = TemporalSnapshot::from_series(
            Granularity::Day,
            HashMap::from([(SubjectKey::Entity(id), series)]),
        );

        let windows = TrendWindows::new(Utc.with_ymd_and_hms(2025, 3, 31, 0, 0, 0).unwrap(), 30);
        assert_eq!(windows.activity(&temporal, id), (5, 2));
        assert_eq!(windows.activity(&temporal, Uuid::from_u128(2)), (0, 0));
    }

    fn series(points: &[(NaiveDate, f64)]) -> BTreeMap<NaiveDate, BucketValue> {
        points
            .iter()
            .map(|&(day, score)| {
                (
                    day,
                    BucketValue {
                        activity_count: 1,
                        confidence_weighted_score: score,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_least_squares_slope() {
        assert_eq!(least_squares_slope(&[1.0, 2.0, 3.0, 4.0]), 1.0);
        assert_eq!(least_squares_slope(&[2.0, 2.0, 2.0]), 0.0);
        assert!((least_squares_slope(&[3.0, 1.0, 2.0]) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rising_trend_report() {
        let id = Uuid::from_u128(1);
        let buckets = series(&[
            (date(1, 6), 0.9),
            (date(1, 7), 1.8),
            (date(1, 8), 2.7),
            (date(1, 9), 1.0),
            (date(2, 1), 9.0),
        ]);

        let report = TrendReport::fit(id, "John Thune", &buckets, date(1, 31), 0.1).unwrap();
        assert_eq!(report.category, TrendCategory::RisingInfluence);
        assert_eq!((report.start, report.end, report.peak), (date(1, 6), date(1, 9), date(1, 8)));
        assert!((report.strength - report.slope.abs() * 2.7).abs() < 1e-12);
        assert!(report.description.starts_with("John Thune shows increasing"));
        assert!(report.description.contains(&format!("{:.3}", report.slope)));
    }

    #[test]
    fn test_trend_needs_two_buckets() {
        let id = Uuid::from_u128(1);
        let buckets = series(&[(date(1, 6), 0.9), (date(2, 6), 0.9)]);
        assert!(TrendReport::fit(id, "Thune", &buckets, date(1, 31), 0.1).is_none());

        let report = TrendReport::fit(id, "Thune", &buckets, date(2, 28), 0.1).unwrap();
        assert_eq!(report.category, TrendCategory::StableActivity);
        assert_eq!(report.strength, 0.0);
        assert_eq!(report.peak, date(1, 6));
    }

    #[test]
    fn test_declining_trend() {
        let buckets = series(&[(date(1, 6), 3.0), (date(1, 13), 2.0), (date(1, 20), 0.5)]);
        let report =
            TrendReport::fit(Uuid::from_u128(2), "Mike Johnson", &buckets, date(1, 31), 0.1).unwrap();
        assert_eq!(report.category, TrendCategory::DecliningActivity);
        assert_eq!(report.peak, date(1, 6));
        assert!((report.slope + 1.25).abs() < 1e-12);
        assert!((report.strength - 3.75).abs() < 1e-12);
    }
}
