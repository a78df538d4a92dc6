//! polnet Analytics - Network structure over the canonical entity graph
//!
//! Everything here reads immutable snapshots, so analytics can run while
//! ingestion keeps committing:
//! - [`graph`]: undirected weighted graph over live entities, with
//!   clustering and path length of community subgraphs
//! - [`centrality`]: weighted degree and per-component PageRank
//! - [`community`]: seeded label propagation
//! - [`trend`]: recent vs prior activity windows and fitted trend reports
//! - [`engine`]: full and incremental analysis runs
//! - [`export`]: registry, graph and time-series exports
//!
//! Author: hephaex@gmail.com

pub mod centrality;
pub mod community;
pub mod engine;
pub mod export;
pub mod graph;
pub mod trend;

pub use engine::{
    AnalysisResult, AnalyticsEngine, CentralFigure, CommunitySummary, EntityMetrics, GraphMetrics,
};
pub use export::{write_exports, ExportPaths, GraphExport, RegistryEntry, TimeSeriesRow};
pub use graph::EntityGraph;
pub use trend::{TrendCategory, TrendReport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use polnet_core::{PolnetError, Result};

/// Cooperative cancellation flag shared between a caller and a running analysis
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the run stops at its next checkpoint
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PolnetError::Cancelled)
        } else {
            Ok(())
        }
    }
}
