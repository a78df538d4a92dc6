//! Time bucketing types shared by the temporal index and analytics

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{Category, ConfigError, EdgeKey, EntityId, EntityKind};

/// Bucket granularity for activity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    #[default]
    Week,
    Month,
}

impl Granularity {
    /// Start date of the period containing `date`.
    ///
    /// Weeks start on Monday, months on the 1st.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Day => date,
            Self::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Self::Month => date.with_day(1).unwrap_or(date),
        }
    }

    /// Start date of the period following the one starting at `start`
    pub fn next_period(&self, start: NaiveDate) -> NaiveDate {
        match self {
            Self::Day => start + Duration::days(1),
            Self::Week => start + Duration::days(7),
            Self::Month => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(start + Duration::days(31))
            }
        }
    }

    /// Period containing a timestamp
    pub fn period_of(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        self.period_start(timestamp.date_naive())
    }
}

impl std::str::FromStr for Granularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" => Ok(Self::Week),
            "month" | "monthly" => Ok(Self::Month),
            _ => Err(ConfigError::InvalidValue {
                key: "granularity".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
        }
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range covering whole calendar days, `first` through `last` inclusive
    pub fn days(first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            start: midnight(first),
            end: midnight(last + Duration::days(1)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether the period starting at `period` overlaps this range
    pub fn overlaps_period(&self, period: NaiveDate, granularity: Granularity) -> bool {
        let period_start = midnight(period);
        let period_end = midnight(granularity.next_period(period));
        period_start < self.end && period_end > self.start
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// Subject of a temporal series: an entity or an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "lowercase")]
pub enum SubjectKey {
    Entity(EntityId),
    Edge(EdgeKey),
}

impl SubjectKey {
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Self::Entity(id) => Some(*id),
            Self::Edge(_) => None,
        }
    }
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "entity:{id}"),
            Self::Edge(key) => write!(f, "edge:{key}"),
        }
    }
}

/// Counters of one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketValue {
    pub activity_count: u64,
    pub confidence_weighted_score: f64,
}

impl BucketValue {
    /// Increment the bucket with one observation
    pub fn increment(&mut self, weight: f64) {
        self.activity_count += 1;
        self.confidence_weighted_score += weight;
    }

    /// Add another bucket's counters
    pub fn add(&mut self, other: &BucketValue) {
        self.activity_count += other.activity_count;
        self.confidence_weighted_score += other.confidence_weighted_score;
    }
}

/// A materialized bucket, as exported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalBucket {
    pub subject_key: SubjectKey,
    pub period: NaiveDate,
    pub activity_count: u64,
    pub confidence_weighted_score: f64,
}

/// Trend classification of an entity's recent activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Rising,
    Falling,
    #[default]
    Stable,
}

impl std::fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Kind of political activity an entity's mentions represent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Executive,
    Legislative,
    Administrative,
    Political,
    Media,
    Staff,
    Lobbying,
    Organizational,
    #[default]
    General,
}

impl ActivityType {
    /// Classify from kind, category and the `role` attribute.
    ///
    /// Officials are split by role keywords; other people map by category.
    pub fn classify(kind: EntityKind, category: Category, role: Option<&str>) -> Self {
        if kind == EntityKind::Organization {
            return Self::Organizational;
        }
        match category {
            Category::Official => {
                let role = role.unwrap_or_default().to_lowercase();
                let has = |words: &[&str]| words.iter().any(|w| role.contains(w));
                if has(&["president"]) {
                    Self::Executive
                } else if has(&["senator", "representative"]) {
                    Self::Legislative
                } else if has(&["secretary", "director", "administrator"]) {
                    Self::Administrative
                } else {
                    Self::Political
                }
            }
            Category::Journalist => Self::Media,
            Category::Staff => Self::Staff,
            Category::Lobbyist => Self::Lobbying,
            Category::Other => Self::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executive => "executive",
            Self::Legislative => "legislative",
            Self::Administrative => "administrative",
            Self::Political => "political",
            Self::Media => "media",
            Self::Staff => "staff",
            Self::Lobbying => "lobbying",
            Self::Organizational => "organizational",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_week_starts_monday() {
        // 2025-01-09 is a Thursday
        assert_eq!(Granularity::Week.period_start(date(2025, 1, 9)), date(2025, 1, 6));
        assert_eq!(Granularity::Week.period_start(date(2025, 1, 6)), date(2025, 1, 6));
        assert_eq!(Granularity::Week.period_start(date(2025, 1, 5)), date(2024, 12, 30));
    }

    #[test]
    fn test_month_periods() {
        assert_eq!(Granularity::Month.period_start(date(2025, 2, 17)), date(2025, 2, 1));
        assert_eq!(Granularity::Month.next_period(date(2024, 12, 1)), date(2025, 1, 1));
    }

    #[test]
    fn test_range_overlap() {
        let range = TimeRange::days(date(2025, 1, 3), date(2025, 1, 3));
        assert!(range.overlaps_period(date(2025, 1, 3), Granularity::Day));
        assert!(!range.overlaps_period(date(2025, 1, 4), Granularity::Day));
        assert!(range.overlaps_period(date(2024, 12, 30), Granularity::Week));
        assert!(!range.overlaps_period(date(2025, 1, 6), Granularity::Week));
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!("weekly".parse::<Granularity>().unwrap(), Granularity::Week);
        assert!("hourly".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_activity_type_from_role() {
        let official = |role| ActivityType::classify(EntityKind::Person, Category::Official, role);
        assert_eq!(official(Some("President-elect")), ActivityType::Executive);
        assert_eq!(official(Some("Senior Senator from South Dakota")), ActivityType::Legislative);
        assert_eq!(official(Some("Secretary of State")), ActivityType::Administrative);
        assert_eq!(official(Some("Speaker of the House")), ActivityType::Political);
        assert_eq!(official(None), ActivityType::Political);

        let person = |category| ActivityType::classify(EntityKind::Person, category, None);
        assert_eq!(person(Category::Journalist), ActivityType::Media);
        assert_eq!(person(Category::Lobbyist), ActivityType::Lobbying);
        assert_eq!(person(Category::Other), ActivityType::General);
        assert_eq!(
            ActivityType::classify(EntityKind::Organization, Category::Other, Some("president")),
            ActivityType::Organizational
        );
    }
}
