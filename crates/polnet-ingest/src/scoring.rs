//! Composite match scoring
//!
//! Pure functions over a mention profile and a candidate entity. Nothing
//! here reads the store, so scores are reproducible and testable in
//! isolation.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use polnet_core::normalize::{given_names, normalize_for_kind, surname, token_jaccard};
use polnet_core::{
    CanonicalEntity, Category, EntityId, EntityKind, MentionEvidence, ResolverConfig,
};
use polnet_store::Versioned;

/// Attributes compared between a mention and a candidate
const COMPARED_ATTRIBUTES: &[&str] = &["role", "employer", "party", "state"];

/// Attributes where any disagreement is a hard mismatch
const EXACT_ATTRIBUTES: &[&str] = &["party", "state"];

/// Score given when the two sides share no attribute
const NEUTRAL_ATTRIBUTE_SCORE: f64 = 0.5;

/// The parts of a mention that scoring looks at
#[derive(Debug, Clone)]
pub struct MentionProfile {
    pub kind: EntityKind,
    pub category: Category,
    pub normalized: String,
    pub attributes: BTreeMap<String, String>,
}

impl MentionProfile {
    pub fn new(kind: EntityKind, evidence: &MentionEvidence) -> Self {
        Self {
            kind,
            category: evidence.category,
            normalized: normalize_for_kind(kind, &evidence.display_name),
            attributes: evidence.attributes.clone(),
        }
    }
}

/// A candidate with its composite score and components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: EntityId,
    pub canonical_name: String,
    pub category: Category,
    pub version: u64,
    pub score: f64,
    pub name_score: f64,
    pub category_score: f64,
    pub attribute_score: f64,
}

/// Outcome of comparing a mention against its ranked candidates
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    /// A single candidate cleared the threshold
    Merge(ScoredCandidate),
    /// Two or more candidates tied within the ambiguity band
    Ambiguous(Vec<ScoredCandidate>),
    /// Nothing cleared the threshold
    Create,
}

// ============================================================================
// Component scores
// ============================================================================

/// Name similarity of two normalized names
pub fn name_score(kind: EntityKind, a: &str, b: &str, surname_only_score: f64) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    match kind {
        EntityKind::Person => person_name_score(a, b, surname_only_score),
        EntityKind::Organization => organization_name_score(a, b),
    }
}

fn person_name_score(a: &str, b: &str, surname_only_score: f64) -> f64 {
    let (Some(surname_a), Some(surname_b)) = (surname(a), surname(b)) else {
        return 0.0;
    };
    let surname_similarity = strsim::jaro_winkler(surname_a, surname_b);

    let given_a = given_names(a);
    let given_b = given_names(b);
    let given_compatibility = match (given_a.first(), given_b.first()) {
        _ if given_a == given_b => 1.0,
        (None, _) | (_, None) => surname_only_score,
        (Some(x), Some(y)) if x == y => 0.97,
        (Some(x), Some(y)) if is_initial_of(x, y) || is_initial_of(y, x) => 0.92,
        (Some(x), Some(y)) => 0.8 * strsim::jaro_winkler(x, y),
    };

    surname_similarity * given_compatibility
}

fn is_initial_of(initial: &str, name: &str) -> bool {
    initial.chars().count() == 1 && name.starts_with(initial)
}

fn organization_name_score(a: &str, b: &str) -> f64 {
    let tokens_a: Vec<&str> = a.split_whitespace().collect();
    let tokens_b: Vec<&str> = b.split_whitespace().collect();
    let contained = tokens_a.iter().all(|t| tokens_b.contains(t))
        || tokens_b.iter().all(|t| tokens_a.contains(t));

    let similarity = strsim::jaro_winkler(a, b);
    if contained {
        similarity.max(0.9)
    } else {
        similarity
    }
}

/// Compatibility of two categories.
///
/// `Other` means the category is unknown, so it is compatible with anything.
pub fn category_score(a: Category, b: Category) -> f64 {
    if a == b || a == Category::Other || b == Category::Other {
        1.0
    } else {
        0.0
    }
}

/// Agreement over the attributes both sides carry
pub fn attribute_score(mention: &BTreeMap<String, String>, entity: &CanonicalEntity) -> f64 {
    let mut total = 0.0;
    let mut shared = 0usize;

    for key in COMPARED_ATTRIBUTES {
        let (Some(ours), Some(theirs)) = (mention.get(*key), entity.attribute(key)) else {
            continue;
        };
        let ours = polnet_core::normalize::normalize_name(ours);
        let theirs = polnet_core::normalize::normalize_name(theirs);
        shared += 1;
        total += if ours == theirs {
            1.0
        } else if EXACT_ATTRIBUTES.contains(key) {
            0.0
        } else {
            token_jaccard(&ours, &theirs)
        };
    }

    if shared == 0 {
        NEUTRAL_ATTRIBUTE_SCORE
    } else {
        total / shared as f64
    }
}

// ============================================================================
// Composite scoring and decision
// ============================================================================

/// Score one candidate; the name component is the best over its aliases
pub fn score_candidate(
    profile: &MentionProfile,
    candidate: &Versioned<CanonicalEntity>,
    config: &ResolverConfig,
) -> ScoredCandidate {
    let entity = &candidate.value;
    let name = std::iter::once(&entity.canonical_name)
        .chain(entity.aliases.iter())
        .map(|alias| {
            let normalized = normalize_for_kind(entity.kind, alias);
            name_score(
                profile.kind,
                &profile.normalized,
                &normalized,
                config.surname_only_score,
            )
        })
        .fold(0.0_f64, f64::max);
    let category = category_score(profile.category, entity.category);
    let attributes = attribute_score(&profile.attributes, entity);

    ScoredCandidate {
        id: entity.id,
        canonical_name: entity.canonical_name.clone(),
        category: entity.category,
        version: candidate.version,
        score: config.name_weight * name
            + config.category_weight * category
            + config.attribute_weight * attributes,
        name_score: name,
        category_score: category,
        attribute_score: attributes,
    }
}

/// Score and rank candidates: score descending, then id ascending.
///
/// Large shortlists are scored on the rayon pool.
pub fn rank_candidates(
    profile: &MentionProfile,
    candidates: &[Versioned<CanonicalEntity>],
    config: &ResolverConfig,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = if candidates.len() >= config.parallel_scoring_min {
        candidates
            .par_iter()
            .map(|c| score_candidate(profile, c, config))
            .collect()
    } else {
        candidates
            .iter()
            .map(|c| score_candidate(profile, c, config))
            .collect()
    };

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored
}

/// Decide between merge, create and manual review
pub fn decide(ranked: &[ScoredCandidate], threshold: f64, epsilon: f64) -> MatchDecision {
    let Some(top) = ranked.first() else {
        return MatchDecision::Create;
    };
    if top.score < threshold {
        return MatchDecision::Create;
    }

    let tied: Vec<ScoredCandidate> = ranked
        .iter()
        .take_while(|c| c.score >= threshold && top.score - c.score <= epsilon)
        .cloned()
        .collect();

    if tied.len() > 1 {
        MatchDecision::Ambiguous(tied)
    } else {
        MatchDecision::Merge(top.clone())
    }
}
