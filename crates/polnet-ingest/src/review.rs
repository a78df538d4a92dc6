//! Manual review queue
//!
//! Mentions the resolver could not attribute to a single entity wait here
//! with their tied candidates until a reviewer decides. Decisions are
//! applied by the coordinator so their effect is journaled like any other
//! commit; the queue only tracks the workflow state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use polnet_core::{EntityId, PolnetError, RawMention, Result};

use crate::scoring::ScoredCandidate;

// ============================================================================
// Review Status
// ============================================================================

/// Status of a review item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Waiting for a reviewer
    Pending,
    /// Resolved into an existing or new entity
    Approved,
    /// Discarded
    Rejected,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A reviewer's verdict on an ambiguous mention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "target", rename_all = "snake_case")]
pub enum ReviewDecision {
    /// The mention refers to this existing entity
    MergeInto(EntityId),
    /// The mention is a new identity
    CreateNew,
    /// The mention is noise
    Reject,
}

// ============================================================================
// Review Items
// ============================================================================

/// An ambiguous mention awaiting a decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: Uuid,
    pub mention: RawMention,
    pub candidates: Vec<ScoredCandidate>,
    pub status: ReviewStatus,
    pub decision: Option<ReviewDecision>,
    pub reviewer: Option<String>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ReviewItem {
    /// Create a new pending item
    pub fn new(mention: RawMention, candidates: Vec<ScoredCandidate>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mention,
            candidates,
            status: ReviewStatus::Pending,
            decision: None,
            reviewer: None,
            review_note: None,
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }
}

// ============================================================================
// Review Queue
// ============================================================================

/// In-memory review queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewQueue {
    items: Vec<ReviewItem>,
}

impl ReviewQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ambiguous mention
    pub fn enqueue(&mut self, mention: RawMention, candidates: Vec<ScoredCandidate>) -> Uuid {
        let item = ReviewItem::new(mention, candidates);
        let id = item.id;
        self.items.push(item);
        id
    }

    /// Items still waiting for a decision, oldest first
    pub fn pending(&self) -> Vec<&ReviewItem> {
        self.items
            .iter()
            .filter(|i| i.status == ReviewStatus::Pending)
            .collect()
    }

    /// Get item by ID
    pub fn get(&self, id: Uuid) -> Option<&ReviewItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Every item, decided ones included
    pub fn items(&self) -> &[ReviewItem] {
        &self.items
    }

    /// Record a decision on a pending item
    pub fn decide(
        &mut self,
        id: Uuid,
        decision: ReviewDecision,
        reviewer: &str,
        note: Option<&str>,
    ) -> Result<&ReviewItem> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| PolnetError::NotFound(format!("review item {id}")))?;

        if item.status != ReviewStatus::Pending {
            return Err(PolnetError::Validation(format!(
                "review item {id} was already {}",
                item.status
            )));
        }

        item.status = match decision {
            ReviewDecision::Reject => ReviewStatus::Rejected,
            ReviewDecision::MergeInto(_) | ReviewDecision::CreateNew => ReviewStatus::Approved,
        };
        item.decision = Some(decision);
        item.reviewer = Some(reviewer.to_string());
        item.review_note = note.map(String::from);
        item.reviewed_at = Some(Utc::now());
        Ok(item)
    }

    /// Get statistics
    pub fn stats(&self) -> ReviewStats {
        let count = |status: ReviewStatus| self.items.iter().filter(|i| i.status == status).count();
        ReviewStats {
            pending: count(ReviewStatus::Pending),
            approved: count(ReviewStatus::Approved),
            rejected: count(ReviewStatus::Rejected),
        }
    }
}

/// Review statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl ReviewStats {
    /// Total items processed
    pub fn total(&self) -> usize {
        self.pending + self.approved + self.rejected
    }

    /// Share of decided items that were approved
    pub fn approval_rate(&self) -> f32 {
        let decided = self.approved + self.rejected;
        if decided == 0 {
            0.0
        } else {
            self.approved as f32 / decided as f32
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
