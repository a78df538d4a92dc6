//! Name normalization and blocking keys for entity matching
//!
//! Two forms of every name are kept apart:
//! - the *display* form (honorifics and affiliations stripped, original casing)
//!   which becomes canonical names and aliases
//! - the *normalized* form (NFKC, lowercase, punctuation folded) which is
//!   what similarity scoring and blocking operate on

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::{CanonicalEntity, Category, EntityKind};

/// Generational suffixes ignored when picking a surname
const GENERATIONAL_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv"];

/// Legal suffixes stripped from organization names
const LEGAL_SUFFIXES: &[&str] = &[
    "inc",
    "incorporated",
    "corp",
    "corporation",
    "llc",
    "ltd",
    "limited",
    "plc",
    "co",
    "company",
    "lp",
    "llp",
];

static HONORIFIC_RE: OnceLock<Regex> = OnceLock::new();
static AFFILIATION_RE: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

fn honorific_re() -> &'static Regex {
    HONORIFIC_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:former|(?:majority|minority)\s+leader|vice\s+president|sen\.?|senator|rep\.?|representative|dr\.?|mr\.?|mrs\.?|ms\.?|gov\.?|governor|president|secretary|speaker|leader|amb\.?|ambassador)\s+",
        )
        .expect("static regex is valid")
    })
}

fn affiliation_re() -> &'static Regex {
    AFFILIATION_RE.get_or_init(|| Regex::new(r"\s*\([^)]*\)\s*$").expect("static regex is valid"))
}

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

/// Clean a raw extracted name into its display form.
///
/// Strips leading honorifics ("Sen.", "Secretary", ...), a trailing
/// parenthetical affiliation ("(R-S.D.)") and collapses whitespace.
/// Returns `None` when nothing usable remains.
///
/// ```
/// use polnet_core::normalize::clean_display_name;
///
/// assert_eq!(clean_display_name("Sen. John Thune (R-S.D.)").as_deref(), Some("John Thune"));
/// assert_eq!(clean_display_name("   ").as_deref(), None);
/// ```
pub fn clean_display_name(raw: &str) -> Option<String> {
    let mut name = whitespace_re().replace_all(raw.trim(), " ").to_string();
    name = affiliation_re().replace(&name, "").to_string();

    loop {
        let stripped = honorific_re().replace(&name, "").to_string();
        if stripped == name || stripped.trim().is_empty() {
            break;
        }
        name = stripped;
    }

    let name = name.trim().trim_matches(|c: char| c == ',' || c == ';').trim();
    if name.chars().any(|c| c.is_alphanumeric()) && !honorific_only(name) {
        Some(name.to_string())
    } else {
        None
    }
}

/// A bare title such as "President" names nobody in particular
fn honorific_only(name: &str) -> bool {
    honorific_re().is_match(&format!("{name} "))
        && !name.contains(' ')
}

/// Normalize text for matching.
///
/// Performs NFKC folding, lowercasing, punctuation-to-space replacement and
/// whitespace collapsing.
pub fn normalize_name(s: &str) -> String {
    let folded: String = s.nfkc().collect();
    let stripped: String = folded
        .chars()
        .flat_map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().collect::<Vec<_>>()
            } else if c == '\'' || c == '\u{2019}' {
                // O'Rourke and O’Rourke both become orourke
                Vec::new()
            } else {
                vec![' ']
            }
        })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize an organization name, dropping legal suffixes and a leading "the"
pub fn normalize_org_name(s: &str) -> String {
    let normalized = normalize_name(s);
    let tokens: Vec<&str> = normalized
        .split_whitespace()
        .enumerate()
        .filter(|(i, t)| !(*i == 0 && *t == "the") && !LEGAL_SUFFIXES.contains(t))
        .map(|(_, t)| t)
        .collect();

    if tokens.is_empty() {
        normalized
    } else {
        tokens.join(" ")
    }
}

/// Normalize a display name according to entity kind
pub fn normalize_for_kind(kind: EntityKind, display: &str) -> String {
    match kind {
        EntityKind::Person => normalize_name(display),
        EntityKind::Organization => normalize_org_name(display),
    }
}

/// Tokens of a normalized person name with generational suffixes removed
pub fn name_tokens(normalized: &str) -> Vec<&str> {
    normalized
        .split_whitespace()
        .filter(|t| !GENERATIONAL_SUFFIXES.contains(t))
        .collect()
}

/// Surname of a normalized person name (the last significant token)
pub fn surname(normalized: &str) -> Option<&str> {
    name_tokens(normalized).last().copied()
}

/// Given names of a normalized person name (every token before the surname)
pub fn given_names(normalized: &str) -> Vec<&str> {
    let tokens = name_tokens(normalized);
    match tokens.split_last() {
        Some((_, given)) => given.to_vec(),
        None => Vec::new(),
    }
}

/// The token that anchors blocking for a normalized name
fn anchor_token(kind: EntityKind, normalized: &str) -> Option<&str> {
    match kind {
        EntityKind::Person => surname(normalized),
        EntityKind::Organization => normalized.split_whitespace().next(),
    }
}

/// Blocking key for a normalized name.
///
/// Persons block on `category:surname`, organizations on their first token.
pub fn blocking_key(kind: EntityKind, category: Category, normalized: &str) -> Option<String> {
    let anchor = anchor_token(kind, normalized)?;
    Some(match kind {
        EntityKind::Person => format!("{}:{}", category.as_str(), anchor),
        EntityKind::Organization => format!("org:{anchor}"),
    })
}

/// Lock granularity for resolving a name: one group per surname (persons)
/// or first token (organizations), regardless of category.
pub fn blocking_group(kind: EntityKind, normalized: &str) -> Option<String> {
    let anchor = anchor_token(kind, normalized)?;
    Some(match kind {
        EntityKind::Person => format!("p:{anchor}"),
        EntityKind::Organization => format!("o:{anchor}"),
    })
}

/// Blocking keys to probe when looking for candidates of a mention.
///
/// A person of a known category is compared against the same category and
/// against `other`; a person of category `other` is compared against every
/// category.
pub fn candidate_keys(kind: EntityKind, category: Category, normalized: &str) -> Vec<String> {
    let mut keys = BTreeSet::new();
    match kind {
        EntityKind::Organization => {
            keys.extend(blocking_key(kind, category, normalized));
        }
        EntityKind::Person if category == Category::Other => {
            for cat in Category::ALL {
                keys.extend(blocking_key(kind, cat, normalized));
            }
        }
        EntityKind::Person => {
            keys.extend(blocking_key(kind, category, normalized));
            keys.extend(blocking_key(kind, Category::Other, normalized));
        }
    }
    keys.into_iter().collect()
}

/// Every blocking key an entity is indexed under (one per alias)
pub fn entity_blocking_keys(entity: &CanonicalEntity) -> BTreeSet<String> {
    std::iter::once(&entity.canonical_name)
        .chain(entity.aliases.iter())
        .filter_map(|name| {
            let normalized = normalize_for_kind(entity.kind, name);
            blocking_key(entity.kind, entity.category, &normalized)
        })
        .collect()
}

/// Jaccard overlap of the token sets of two normalized strings
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let a: BTreeSet<&str> = a.split_whitespace().collect();
    let b: BTreeSet<&str> = b.split_whitespace().collect();
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}
