//! polnet Store - State held by the ingestion pipeline
//!
//! - [`EntityStore`]: canonical entities with entity-granular locking
//! - [`TemporalIndex`]: sparse per-subject activity buckets
//! - [`EventSink`]: the append-only log every commit goes through
//! - Snapshots: immutable read views for analytics, exports and persistence
//!
//! Author: hephaex@gmail.com

pub mod entity_store;
pub mod event_log;
pub mod snapshot;
pub mod temporal;

pub use entity_store::{EntityStore, GroupGuard, Versioned};
pub use event_log::{read_json, write_json_atomic, EventSink, JsonlEventLog, MemoryEventLog};
pub use snapshot::{EdgeSnapshot, StoreSnapshot, TemporalSnapshot};
pub use temporal::TemporalIndex;
