//! Canonical entities, raw mentions and merge evidence
//!
//! Merging is a pure value-level operation: [`CanonicalEntity::absorb`] and
//! [`CanonicalEntity::merge_from`] never touch storage, so match and merge
//! logic can be tested in isolation and replayed from the event log.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::clean_display_name;
use crate::{
    clamp_confidence, ActivityType, Category, EntityId, EntityKind, PolnetError, Result,
};

/// A single attribute value with the confidence it was asserted with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub value: String,
    pub confidence: f32,
    pub last_updated: DateTime<Utc>,
}

/// One raw, per-document observation of an entity, as produced by extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMention {
    pub source_document_id: String,
    pub raw_name: String,
    pub kind: EntityKind,
    pub category_hint: String,
    pub attributes: BTreeMap<String, String>,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub context: Option<String>,
}

impl RawMention {
    /// Create a person mention with no attributes
    pub fn person(
        document_id: impl Into<String>,
        raw_name: impl Into<String>,
        category_hint: impl Into<String>,
        confidence: f32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source_document_id: document_id.into(),
            raw_name: raw_name.into(),
            kind: EntityKind::Person,
            category_hint: category_hint.into(),
            attributes: BTreeMap::new(),
            confidence,
            timestamp,
            context: None,
        }
    }

    /// Create an organization mention with no attributes
    pub fn organization(
        document_id: impl Into<String>,
        raw_name: impl Into<String>,
        confidence: f32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EntityKind::Organization,
            ..Self::person(document_id, raw_name, "other", confidence, timestamp)
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the context snippet
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Category this mention claims; organizations are always `Other`
    pub fn category(&self) -> Category {
        match self.kind {
            EntityKind::Person => Category::from_hint(&self.category_hint),
            EntityKind::Organization => Category::Other,
        }
    }

    /// Validate the mention and project it into merge evidence.
    ///
    /// A mention without a usable name is a validation error. Confidence
    /// outside `[0, 1]` is clamped and logged.
    pub fn evidence(&self) -> Result<MentionEvidence> {
        let display_name = clean_display_name(&self.raw_name).ok_or_else(|| {
            PolnetError::Validation(format!(
                "mention in document '{}' has no usable name: {:?}",
                self.source_document_id, self.raw_name
            ))
        })?;

        let (confidence, clamped) = clamp_confidence(self.confidence);
        if clamped {
            tracing::warn!(
                document = %self.source_document_id,
                name = %display_name,
                raw = self.confidence,
                "confidence outside [0, 1], clamped to {}",
                confidence
            );
        }

        let attributes = self
            .attributes
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();

        Ok(MentionEvidence {
            document_id: self.source_document_id.clone(),
            display_name,
            category: self.category(),
            confidence,
            attributes,
            timestamp: self.timestamp,
        })
    }
}

/// The value-level projection of a mention consumed by merges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionEvidence {
    pub document_id: String,
    pub display_name: String,
    #[serde(default)]
    pub category: Category,
    pub confidence: f32,
    pub attributes: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// The single deduplicated record representing one real-world entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// Immutable identifier
    pub id: EntityId,

    pub kind: EntityKind,

    /// Display name fixed at creation
    pub canonical_name: String,

    pub category: Category,

    /// Every display form seen for this entity; only grows
    pub aliases: BTreeSet<String>,

    pub attributes: BTreeMap<String, AttributeValue>,

    pub first_seen: DateTime<Utc>,

    pub last_seen: DateTime<Utc>,

    pub mention_count: u64,

    /// Running average of mention confidences
    pub confidence_avg: f32,

    /// Set when this entity was identified as a duplicate of another
    pub merged_into: Option<EntityId>,
}

impl CanonicalEntity {
    /// Create an entity from the first unmatched mention
    pub fn from_evidence(
        id: EntityId,
        kind: EntityKind,
        category: Category,
        evidence: &MentionEvidence,
    ) -> Self {
        let mut entity = Self {
            id,
            kind,
            canonical_name: evidence.display_name.clone(),
            category,
            aliases: BTreeSet::from([evidence.display_name.clone()]),
            attributes: BTreeMap::new(),
            first_seen: evidence.timestamp,
            last_seen: evidence.timestamp,
            mention_count: 1,
            confidence_avg: evidence.confidence,
            merged_into: None,
        };
        for (name, value) in &evidence.attributes {
            entity.apply_attribute(name, value, evidence.confidence, evidence.timestamp);
        }
        entity
    }

    /// Whether the entity is still canonical (not merged into another)
    pub fn is_live(&self) -> bool {
        self.merged_into.is_none()
    }

    /// Current value of an attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|a| a.value.as_str())
    }

    /// Activity classification from kind, category and role
    pub fn activity_type(&self) -> ActivityType {
        ActivityType::classify(self.kind, self.category, self.attribute("role"))
    }

    /// Fold one matching mention into this entity.
    ///
    /// Unions the alias, refreshes attributes by confidence, extends the
    /// seen bounds and bumps the mention count. The canonical name never
    /// changes; an `other` category is refined by a more specific mention.
    pub fn absorb(&mut self, evidence: &MentionEvidence) {
        self.aliases.insert(evidence.display_name.clone());

        if self.category == Category::Other {
            self.category = evidence.category;
        }

        for (name, value) in &evidence.attributes {
            self.apply_attribute(name, value, evidence.confidence, evidence.timestamp);
        }

        self.extend_bounds(evidence.timestamp, evidence.timestamp);

        let previous = self.mention_count as f64;
        self.mention_count += 1;
        self.confidence_avg = ((self.confidence_avg as f64 * previous
            + evidence.confidence as f64)
            / self.mention_count as f64) as f32;
    }

    /// Fold a duplicate entity into this one (identity merge)
    pub fn merge_from(&mut self, other: &CanonicalEntity) {
        self.aliases.insert(other.canonical_name.clone());
        self.aliases.extend(other.aliases.iter().cloned());

        for (name, attr) in &other.attributes {
            self.apply_attribute(name, &attr.value, attr.confidence, attr.last_updated);
        }

        self.extend_bounds(other.first_seen, other.last_seen);

        let total = self.mention_count + other.mention_count;
        if total > 0 {
            self.confidence_avg = ((self.confidence_avg as f64 * self.mention_count as f64
                + other.confidence_avg as f64 * other.mention_count as f64)
                / total as f64) as f32;
        }
        self.mention_count = total;

        if self.category == Category::Other && other.category != Category::Other {
            self.category = other.category;
        }
    }

    /// Overwrite an attribute only when the new confidence is at least the
    /// stored one. Equal confidences keep the more recent assertion.
    pub fn apply_attribute(
        &mut self,
        name: &str,
        value: &str,
        confidence: f32,
        at: DateTime<Utc>,
    ) -> bool {
        let replace = match self.attributes.get(name) {
            None => true,
            Some(existing) => {
                confidence > existing.confidence
                    || (confidence == existing.confidence && at >= existing.last_updated)
            }
        };

        if replace {
            self.attributes.insert(
                name.to_string(),
                AttributeValue {
                    value: value.to_string(),
                    confidence,
                    last_updated: at,
                },
            );
        }
        replace
    }

    fn extend_bounds(&mut self, first: DateTime<Utc>, last: DateTime<Utc>) {
        if first < self.first_seen {
            self.first_seen = first;
        }
        if last > self.last_seen {
            self.last_seen = last;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 12, 0, 0).unwrap()
    }

    fn evidence(name: &str, confidence: f32, day: u32) -> MentionEvidence {
        MentionEvidence {
            document_id: format!("doc-{day}"),
            display_name: name.to_string(),
            category: Category::Official,
            confidence,
            attributes: BTreeMap::new(),
            timestamp: at(day),
        }
    }

    #[test]
    fn test_evidence_rejects_missing_name() {
        let mention = RawMention::person("doc-1", "   ", "political_official", 0.9, at(1));
        assert!(matches!(mention.evidence(), Err(PolnetError::Validation(_))));
    }

    #[test]
    fn test_evidence_clamps_confidence() {
        let mention = RawMention::person("doc-1", "John Thune", "political_official", 1.7, at(1));
        assert_eq!(mention.evidence().unwrap().confidence, 1.0);
    }

    #[test]
    fn test_evidence_drops_empty_attributes() {
        let mention = RawMention::person("doc-1", "John Thune", "political_official", 0.9, at(1))
            .with_attribute("Role", " Senate Majority Leader ")
            .with_attribute("party", "  ");
        let ev = mention.evidence().unwrap();
        assert_eq!(ev.attributes.get("role").map(String::as_str), Some("Senate Majority Leader"));
        assert!(!ev.attributes.contains_key("party"));
    }

    #[test]
    fn test_absorb_keeps_canonical_name() {
        let mut entity = CanonicalEntity::from_evidence(
            Uuid::new_v4(),
            EntityKind::Person,
            Category::Official,
            &evidence("John Thune", 0.9, 5),
        );

        let mut ev = evidence("Thune", 0.85, 2);
        ev.attributes
            .insert("role".to_string(), "Senate Majority Leader".to_string());
        entity.absorb(&ev);

        assert_eq!(entity.canonical_name, "John Thune");
        assert!(entity.aliases.contains("Thune"));
        assert_eq!(entity.attribute("role"), Some("Senate Majority Leader"));
        assert_eq!(entity.mention_count, 2);
        assert_eq!(entity.first_seen, at(2));
        assert_eq!(entity.last_seen, at(5));
    }

    #[test]
    fn test_attribute_requires_confidence() {
        let mut entity = CanonicalEntity::from_evidence(
            Uuid::new_v4(),
            EntityKind::Person,
            Category::Official,
            &evidence("John Thune", 0.9, 1),
        );
        assert!(entity.apply_attribute("role", "Whip", 0.9, at(1)));
        assert!(!entity.apply_attribute("role", "Senator", 0.5, at(2)));
        assert_eq!(entity.attribute("role"), Some("Whip"));
        assert!(entity.apply_attribute("role", "Majority Leader", 0.95, at(3)));
        assert_eq!(entity.attribute("role"), Some("Majority Leader"));
    }

    #[test]
    fn test_merge_from_unions_and_counts() {
        let mut winner = CanonicalEntity::from_evidence(
            Uuid::new_v4(),
            EntityKind::Person,
            Category::Other,
            &evidence("Chuck Schumer", 0.8, 3),
        );
        let loser = CanonicalEntity::from_evidence(
            Uuid::new_v4(),
            EntityKind::Person,
            Category::Official,
            &evidence("Charles Schumer", 0.6, 1),
        );

        winner.merge_from(&loser);

        assert!(winner.aliases.contains("Charles Schumer"));
        assert_eq!(winner.mention_count, 2);
        assert_eq!(winner.first_seen, at(1));
        assert_eq!(winner.category, Category::Official);
        assert!((winner.confidence_avg - 0.7).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_aliases_and_confidences_never_shrink(
            updates in prop::collection::vec(("[a-c]{1,3}", 0.0f32..=1.0, 1u32..28), 1..20)
        ) {
            let mut entity = CanonicalEntity::from_evidence(
                Uuid::new_v4(),
                EntityKind::Person,
                Category::Official,
                &evidence("Seed Name", 0.5, 1),
            );
            entity.apply_attribute("role", "seed", 0.5, at(1));

            for (name, confidence, day) in updates {
                let aliases_before = entity.aliases.len();
                let confidence_before = entity.attributes["role"].confidence;

                let mut ev = evidence(&name, confidence, day);
                ev.attributes.insert("role".to_string(), name.clone());
                entity.absorb(&ev);

                prop_assert!(entity.aliases.len() >= aliases_before);
                prop_assert!(entity.attributes["role"].confidence >= confidence_before);
                prop_assert_eq!(entity.canonical_name.as_str(), "Seed Name");
            }
        }
    }
}
