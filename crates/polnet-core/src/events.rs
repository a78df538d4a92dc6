//! Append-only store events
//!
//! Every committed change to the world model is one of these events. Replaying
//! them in sequence order over an (optionally empty) snapshot reproduces the
//! canonical store, the edge set and the temporal index exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CanonicalEntity, EdgeObservation, EntityId, MentionEvidence, SubjectKey};

/// A single change to the world model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A new canonical entity was created from an unmatched mention
    EntityCreated { entity: CanonicalEntity },

    /// A mention was folded into an existing entity
    MentionAbsorbed {
        id: EntityId,
        evidence: MentionEvidence,
    },

    /// `loser` was identified as the same real-world identity as `winner`
    EntitiesMerged { winner: EntityId, loser: EntityId },

    /// A relationship mention was folded into an edge
    EdgeObserved { observation: EdgeObservation },

    /// Activity was recorded against a temporal subject
    ActivityRecorded {
        subject: SubjectKey,
        timestamp: DateTime<Utc>,
        weight: f64,
    },
}

impl StoreEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntityCreated { .. } => "entity_created",
            Self::MentionAbsorbed { .. } => "mention_absorbed",
            Self::EntitiesMerged { .. } => "entities_merged",
            Self::EdgeObserved { .. } => "edge_observed",
            Self::ActivityRecorded { .. } => "activity_recorded",
        }
    }
}

/// An event as written to the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    /// Monotonic position in the log, starting at 1
    pub sequence: u64,

    /// Document (or operation) whose commit produced the event
    pub batch_id: String,

    pub recorded_at: DateTime<Utc>,

    pub event: StoreEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EdgeKey, PredicateClass};
    use uuid::Uuid;

    #[test]
    fn test_event_json_is_tagged() {
        let event = StoreEvent::EntitiesMerged {
            winner: Uuid::new_v4(),
            loser: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "entities_merged");
    }

    #[test]
    fn test_activity_subject_serializes() {
        let key = EdgeKey::new(Uuid::new_v4(), Uuid::new_v4(), PredicateClass::MetWith);
        let event = StoreEvent::ActivityRecorded {
            subject: SubjectKey::Edge(key),
            timestamp: Utc::now(),
            weight: 0.5,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: StoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind(), "activity_recorded");
    }
}
