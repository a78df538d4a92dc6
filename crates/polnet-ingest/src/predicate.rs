//! Predicate vocabulary
//!
//! Maps the free-text predicates an extractor emits ("met with", "sat
//! down with", "was named to") onto the controlled [`PredicateClass`]
//! vocabulary. Unmapped text falls back to [`PredicateClass::Other`].

use std::collections::HashMap;

use polnet_core::PredicateClass;

/// Synonym table for relationship predicates
#[derive(Debug, Clone)]
pub struct PredicateVocabulary {
    synonyms: HashMap<String, PredicateClass>,
}

impl Default for PredicateVocabulary {
    fn default() -> Self {
        let mut vocab = Self {
            synonyms: HashMap::new(),
        };
        vocab.init_political_synonyms();
        vocab
    }
}

impl PredicateVocabulary {
    /// Create a vocabulary with the built-in political synonyms
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a vocabulary that only knows the canonical class names
    pub fn empty() -> Self {
        let mut vocab = Self {
            synonyms: HashMap::new(),
        };
        for class in PredicateClass::ALL {
            vocab.add_synonym(class.as_str(), class);
        }
        vocab
    }

    fn init_political_synonyms(&mut self) {
        for class in PredicateClass::ALL {
            self.add_synonym(class.as_str(), class);
        }

        self.add_synonyms(
            PredicateClass::MetWith,
            &[
                "met", "meets with", "meeting with", "met privately with", "sat down with",
                "huddled with", "dined with", "had dinner with", "lunched with", "spoke with",
                "talked with", "talked to", "spoke to", "called",
            ],
        );
        self.add_synonyms(
            PredicateClass::AppointedTo,
            &[
                "appointed", "was appointed to", "named to", "was named to", "named",
                "nominated to", "nominated", "nominated for", "tapped for", "tapped",
                "selected for", "confirmed as", "confirmed to",
            ],
        );
        self.add_synonyms(
            PredicateClass::DepartedFrom,
            &[
                "departed", "left", "is leaving", "leaving", "resigned from", "resigned",
                "stepped down from", "stepped down", "exited", "retired from", "fired from",
            ],
        );
        self.add_synonyms(
            PredicateClass::AppearedOn,
            &[
                "appeared", "appears on", "appearing on", "was interviewed on",
                "interviewed on", "guest on", "spoke on", "joined the show",
            ],
        );
        self.add_synonyms(
            PredicateClass::ReportedOn,
            &[
                "reported", "reports on", "wrote about", "covered", "scooped", "broke the news",
                "interviewed", "profiled",
            ],
        );
        self.add_synonyms(
            PredicateClass::Hired,
            &[
                "hires", "hired by", "was hired by", "joined", "joins", "recruited",
                "recruited by", "brought on", "employs", "works for", "signed",
            ],
        );
        self.add_synonyms(
            PredicateClass::SaidAbout,
            &[
                "said", "says about", "commented on", "criticized", "praised", "endorsed",
                "attacked", "blasted", "defended", "slammed", "thanked",
            ],
        );
    }

    fn add_synonyms(&mut self, class: PredicateClass, phrases: &[&str]) {
        for phrase in phrases {
            self.add_synonym(phrase, class);
        }
    }

    /// Map an additional phrase onto a class
    pub fn add_synonym(&mut self, phrase: &str, class: PredicateClass) {
        let key = canonical_form(phrase);
        if !key.is_empty() {
            self.synonyms.insert(key, class);
        }
    }

    /// Classify free predicate text
    pub fn classify(&self, raw: &str) -> PredicateClass {
        self.synonyms
            .get(&canonical_form(raw))
            .copied()
            .unwrap_or(PredicateClass::Other)
    }

    /// Number of known phrases
    pub fn len(&self) -> usize {
        self.synonyms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synonyms.is_empty()
    }
}

/// Case, space, hyphen and underscore insensitive form of a phrase
fn canonical_form(phrase: &str) -> String {
    phrase
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
