//! polnet Core - Domain models, errors, and shared types
//!
//! This crate defines the core abstractions used throughout polnet:
//! - Canonical entities, raw mentions and merge evidence
//! - Relationship edges and the predicate vocabulary
//! - Temporal buckets and granularities
//! - The upstream extraction batch contract
//! - Store events (append-only log records)
//! - Common error types
//! - Configuration management

pub mod batch;
pub mod config;
pub mod entity;
pub mod events;
pub mod normalize;
pub mod relationship;
pub mod temporal;

pub use batch::{
    ExtractionBatch, MalformedRecord, OrganizationRecord, PersonRecord, RecordSection,
    RelationshipRecord,
};
pub use config::{
    AggregatorConfig, AnalyticsConfig, AppConfig, ConfigError, LoggingConfig, ResolverConfig,
    StoreConfig, TemporalConfig,
};
pub use entity::{AttributeValue, CanonicalEntity, MentionEvidence, RawMention};
pub use events::{LoggedEvent, StoreEvent};
pub use relationship::{EdgeContext, EdgeKey, EdgeObservation, PredicateClass, RelationshipEdge};
pub use temporal::{
    ActivityType, BucketValue, Granularity, SubjectKey, TemporalBucket, TimeRange, TrendLabel,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a canonical entity. Assigned once, never reused.
pub type EntityId = Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for polnet operations
#[derive(Error, Debug)]
pub enum PolnetError {
    /// Malformed record; the record is rejected and the batch continues
    #[error("Validation error: {0}")]
    Validation(String),

    /// Two or more candidates tied within the ambiguity band
    #[error("Ambiguous match for '{name}': {} candidates within epsilon", candidates.len())]
    AmbiguousMatch {
        name: String,
        candidates: Vec<EntityId>,
    },

    /// The entity changed underneath an optimistic merge
    #[error("Merge conflict on entity {id}")]
    MergeConflict { id: EntityId },

    /// Empty or inconsistent analytics input
    #[error("Analytics input error: {0}")]
    AnalyticsInput(String),

    /// Persistence collaborator failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PolnetError {
    /// Whether the error only affects the record that produced it
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::AmbiguousMatch { .. } | Self::MergeConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PolnetError>;

// ============================================================================
// Entity Classification
// ============================================================================

/// Role category of a canonical entity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Official,
    Journalist,
    Staff,
    Lobbyist,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::Official,
        Self::Journalist,
        Self::Staff,
        Self::Lobbyist,
        Self::Other,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Official => "official",
            Self::Journalist => "journalist",
            Self::Staff => "staff",
            Self::Lobbyist => "lobbyist",
            Self::Other => "other",
        }
    }

    /// Map an extractor category hint onto the controlled categories.
    ///
    /// Unrecognized hints fall back to `Other`.
    pub fn from_hint(hint: &str) -> Self {
        let hint = hint.trim().to_lowercase().replace(['-', ' '], "_");
        match hint.as_str() {
            "official" | "political_official" | "elected_official" | "politician" => {
                Self::Official
            }
            "journalist" | "reporter" | "media" => Self::Journalist,
            "staff" | "political_staff" | "staffer" | "aide" => Self::Staff,
            "lobbyist" | "lobbying" => Self::Lobbyist,
            _ => Self::Other,
        }
    }

    /// Whether a hint maps onto a known category rather than the fallback
    pub fn is_recognized_hint(hint: &str) -> bool {
        Self::from_hint(hint) != Self::Other || hint.trim().eq_ignore_ascii_case("other")
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether an entity is a person or an organization
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[default]
    Person,
    Organization,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Person => write!(f, "person"),
            Self::Organization => write!(f, "organization"),
        }
    }
}

/// Clamp a confidence value into `[0, 1]`.
///
/// Returns the clamped value and whether clamping was needed. NaN maps to 0.
pub fn clamp_confidence(confidence: f32) -> (f32, bool) {
    if confidence.is_nan() {
        return (0.0, true);
    }
    let clamped = confidence.clamp(0.0, 1.0);
    (clamped, clamped != confidence)
}

// ============================================================================
// Tests
// ============================================================================
