//! Relationship edges between canonical entities
//!
//! The relationship graph is undirected but predicate-differentiated: an
//! edge is identified by the unordered entity pair plus its predicate class.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EntityId;

// ============================================================================
// Predicate Vocabulary
// ============================================================================

/// Controlled vocabulary of relationship predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateClass {
    MetWith,
    AppointedTo,
    DepartedFrom,
    AppearedOn,
    ReportedOn,
    Hired,
    SaidAbout,
    /// Unmapped predicate; raw text is kept on the edge for audit
    Other,
}

impl PredicateClass {
    pub const ALL: [PredicateClass; 8] = [
        Self::MetWith,
        Self::AppointedTo,
        Self::DepartedFrom,
        Self::AppearedOn,
        Self::ReportedOn,
        Self::Hired,
        Self::SaidAbout,
        Self::Other,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetWith => "met_with",
            Self::AppointedTo => "appointed_to",
            Self::DepartedFrom => "departed_from",
            Self::AppearedOn => "appeared_on",
            Self::ReportedOn => "reported_on",
            Self::Hired => "hired",
            Self::SaidAbout => "said_about",
            Self::Other => "other",
        }
    }

    /// Parse the canonical string representation
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

impl std::fmt::Display for PredicateClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Edge Types
// ============================================================================

/// Identity of an undirected, predicate-differentiated edge.
///
/// `entity_a` is always the smaller id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub entity_a: EntityId,
    pub entity_b: EntityId,
    pub predicate: PredicateClass,
}

impl EdgeKey {
    /// Build a key from two endpoints in either order
    pub fn new(x: EntityId, y: EntityId, predicate: PredicateClass) -> Self {
        let (entity_a, entity_b) = if x <= y { (x, y) } else { (y, x) };
        Self {
            entity_a,
            entity_b,
            predicate,
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.entity_a == self.entity_b
    }

    pub fn involves(&self, id: EntityId) -> bool {
        self.entity_a == id || self.entity_b == id
    }

    /// Replace one endpoint, keeping the key ordered
    pub fn redirect(&self, from: EntityId, to: EntityId) -> Self {
        let swap = |id: EntityId| if id == from { to } else { id };
        Self::new(swap(self.entity_a), swap(self.entity_b), self.predicate)
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.entity_a, self.entity_b, self.predicate)
    }
}

/// A supporting context reference for an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeContext {
    pub document_id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// One relationship mention after its endpoints were resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeObservation {
    pub key: EdgeKey,
    pub raw_predicate: String,
    pub document_id: String,
    pub context: Option<String>,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

/// A weighted, undirected edge between two canonical entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub key: EdgeKey,

    /// Number of mentions folded into this edge
    pub weight: u64,

    /// Running average of mention confidences
    pub confidence_avg: f32,

    pub first_seen: DateTime<Utc>,

    pub last_seen: DateTime<Utc>,

    /// Most recent supporting contexts, oldest first
    pub contexts: VecDeque<EdgeContext>,

    /// Raw predicate texts seen for this edge
    pub raw_predicates: BTreeSet<String>,
}

impl RelationshipEdge {
    /// Create an edge from its first observation
    pub fn from_observation(obs: &EdgeObservation, context_capacity: usize) -> Self {
        let mut edge = Self {
            key: obs.key,
            weight: 0,
            confidence_avg: 0.0,
            first_seen: obs.timestamp,
            last_seen: obs.timestamp,
            contexts: VecDeque::new(),
            raw_predicates: BTreeSet::new(),
        };
        edge.observe(obs, context_capacity);
        edge
    }

    /// Fold one more observation of the same key into the edge
    pub fn observe(&mut self, obs: &EdgeObservation, context_capacity: usize) {
        let previous = self.weight as f64;
        self.weight += 1;
        self.confidence_avg = ((self.confidence_avg as f64 * previous + obs.confidence as f64)
            / self.weight as f64) as f32;

        if obs.timestamp < self.first_seen {
            self.first_seen = obs.timestamp;
        }
        if obs.timestamp > self.last_seen {
            self.last_seen = obs.timestamp;
        }

        if !obs.raw_predicate.is_empty() {
            self.raw_predicates.insert(obs.raw_predicate.clone());
        }

        if let Some(text) = obs.context.as_deref().filter(|t| !t.trim().is_empty()) {
            self.push_context(
                EdgeContext {
                    document_id: obs.document_id.clone(),
                    timestamp: obs.timestamp,
                    text: text.to_string(),
                },
                context_capacity,
            );
        }
    }

    /// Fold another edge into this one after both were rekeyed onto the same key
    pub fn fold(&mut self, other: &RelationshipEdge, context_capacity: usize) {
        let total = self.weight + other.weight;
        if total > 0 {
            self.confidence_avg = ((self.confidence_avg as f64 * self.weight as f64
                + other.confidence_avg as f64 * other.weight as f64)
                / total as f64) as f32;
        }
        self.weight = total;
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.raw_predicates
            .extend(other.raw_predicates.iter().cloned());

        let mut merged: Vec<EdgeContext> = self
            .contexts
            .drain(..)
            .chain(other.contexts.iter().cloned())
            .collect();
        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        for ctx in merged {
            self.push_context(ctx, context_capacity);
        }
    }

    fn push_context(&mut self, ctx: EdgeContext, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.contexts.len() >= capacity {
            self.contexts.pop_front();
        }
        self.contexts.push_back(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn obs(key: EdgeKey, day: u32, confidence: f32, context: &str) -> EdgeObservation {
        EdgeObservation {
            key,
            raw_predicate: "met with".to_string(),
            document_id: format!("doc-{day}"),
            context: Some(context.to_string()),
            confidence,
            timestamp: Utc.with_ymd_and_hms(2025, 3, day, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_edge_key_is_unordered() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(
            EdgeKey::new(a, b, PredicateClass::MetWith),
            EdgeKey::new(b, a, PredicateClass::MetWith)
        );
        assert_ne!(
            EdgeKey::new(a, b, PredicateClass::MetWith),
            EdgeKey::new(a, b, PredicateClass::Hired)
        );
    }

    #[test]
    fn test_edge_key_redirect() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let key = EdgeKey::new(a, b, PredicateClass::MetWith);
        let moved = key.redirect(b, c);
        assert!(moved.involves(a) && moved.involves(c));
        assert!(key.redirect(b, a).is_self_loop());
    }

    #[test]
    fn test_observe_updates_weight_and_bounds() {
        let key = EdgeKey::new(Uuid::new_v4(), Uuid::new_v4(), PredicateClass::MetWith);
        let mut edge = RelationshipEdge::from_observation(&obs(key, 10, 0.8, "first"), 10);
        edge.observe(&obs(key, 2, 0.6, "second"), 10);

        assert_eq!(edge.weight, 2);
        assert!((edge.confidence_avg - 0.7).abs() < 1e-6);
        assert_eq!(edge.first_seen.date_naive().to_string(), "2025-03-02");
        assert_eq!(edge.last_seen.date_naive().to_string(), "2025-03-10");
    }

    #[test]
    fn test_context_capacity_evicts_oldest() {
        let key = EdgeKey::new(Uuid::new_v4(), Uuid::new_v4(), PredicateClass::MetWith);
        let mut edge = RelationshipEdge::from_observation(&obs(key, 1, 0.9, "one"), 2);
        edge.observe(&obs(key, 2, 0.9, "two"), 2);
        edge.observe(&obs(key, 3, 0.9, "three"), 2);

        let texts: Vec<_> = edge.contexts.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert_eq!(edge.weight, 3);
    }

    #[test]
    fn test_fold_combines_weights() {
        let key = EdgeKey::new(Uuid::new_v4(), Uuid::new_v4(), PredicateClass::MetWith);
        let mut left = RelationshipEdge::from_observation(&obs(key, 5, 1.0, "left"), 10);
        let right = RelationshipEdge::from_observation(&obs(key, 1, 0.5, "right"), 10);
        left.fold(&right, 10);

        assert_eq!(left.weight, 2);
        assert!((left.confidence_avg - 0.75).abs() < 1e-6);
        assert_eq!(left.contexts.front().map(|c| c.text.as_str()), Some("right"));
    }

    #[test]
    fn test_predicate_round_trip() {
        for p in PredicateClass::ALL {
            assert_eq!(PredicateClass::parse(p.as_str()), Some(p));
        }
        assert_eq!(PredicateClass::parse("lunched_with"), None);
    }
}
