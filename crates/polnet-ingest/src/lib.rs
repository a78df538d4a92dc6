//! polnet Ingest - Entity resolution and batch ingestion
//!
//! Turns extraction batches into canonical entities, weighted relationship
//! edges and temporal activity:
//! - [`scoring`] / [`resolver`]: blocking, composite scoring, merge or create
//! - [`review`]: manual review of ambiguous mentions
//! - [`predicate`] / [`aggregator`]: predicate vocabulary and edge folding
//! - [`world`]: the in-memory world model, checkpoints and replay
//! - [`coordinator`]: batch processing and atomic commits
//!
//! Author: hephaex@gmail.com

pub mod aggregator;
pub mod coordinator;
pub mod predicate;
pub mod resolver;
pub mod review;
pub mod scoring;
pub mod world;

pub use aggregator::{EdgeRedirect, RelationshipAggregator, RelationshipMention};
pub use coordinator::{BatchCoordinator, BatchSummary};
pub use predicate::PredicateVocabulary;
pub use resolver::{EntityResolver, Resolution, ResolutionOutcome};
pub use review::{ReviewDecision, ReviewItem, ReviewQueue, ReviewStats, ReviewStatus};
pub use scoring::{MatchDecision, ScoredCandidate};
pub use world::{World, WorldSnapshot};
