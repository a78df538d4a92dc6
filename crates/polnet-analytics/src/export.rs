//! Downstream exports
//!
//! Four JSON documents: the canonical registry, the relationship graph
//! with influence scores, per-entity activity time series, and the
//! significant trends of the last analysis.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use polnet_core::{
    ActivityType, AttributeValue, Category, EntityId, EntityKind, PolnetError, PredicateClass,
    Result, SubjectKey, TrendLabel,
};
use polnet_store::{write_json_atomic, EdgeSnapshot, StoreSnapshot, TemporalSnapshot};

use crate::engine::{AnalysisResult, CommunitySummary};
use crate::trend::TrendReport;

pub const REGISTRY_FILE: &str = "registry.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const TIMESERIES_FILE: &str = "timeseries.json";
pub const TRENDS_FILE: &str = "trends.json";

// ============================================================================
// Canonical Registry
// ============================================================================

/// One live canonical entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub canonical_name: String,
    pub kind: EntityKind,
    pub category: Category,
    pub activity_type: ActivityType,
    pub aliases: BTreeSet<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub mention_count: u64,
}

/// Registry of live entities keyed by canonical id
pub fn registry(store: &StoreSnapshot) -> BTreeMap<EntityId, RegistryEntry> {
    store
        .live()
        .map(|e| {
            (
                e.id,
                RegistryEntry {
                    canonical_name: e.canonical_name.clone(),
                    kind: e.kind,
                    category: e.category,
                    activity_type: e.activity_type(),
                    aliases: e.aliases.clone(),
                    attributes: e.attributes.clone(),
                    first_seen: e.first_seen,
                    last_seen: e.last_seen,
                    mention_count: e.mention_count,
                },
            )
        })
        .collect()
}

// ============================================================================
// Graph Export
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub canonical_id: EntityId,
    pub canonical_name: String,
    pub category: Category,
    pub influence_score: f64,
    pub community_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub entity_a: EntityId,
    pub entity_b: EntityId,
    pub predicate_class: PredicateClass,
    pub weight: u64,
    pub confidence: f32,
}

/// Nodes, edges and community summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub communities: Vec<CommunitySummary>,
}

/// Graph export; entities missing from the analysis score 0
pub fn graph_export(
    store: &StoreSnapshot,
    edges: &EdgeSnapshot,
    analysis: Option<&AnalysisResult>,
) -> GraphExport {
    let nodes = store
        .live()
        .map(|e| {
            let metrics = analysis.and_then(|a| a.get(&e.id));
            GraphNode {
                canonical_id: e.id,
                canonical_name: e.canonical_name.clone(),
                category: e.category,
                influence_score: metrics.map_or(0.0, |m| m.influence),
                community_id: metrics.map(|m| m.community_id),
            }
        })
        .collect();

    let edges = edges
        .edges
        .iter()
        .map(|e| GraphEdge {
            entity_a: e.key.entity_a,
            entity_b: e.key.entity_b,
            predicate_class: e.key.predicate,
            weight: e.weight,
            confidence: e.confidence_avg,
        })
        .collect();

    GraphExport {
        nodes,
        edges,
        communities: analysis.map(|a| a.communities.clone()).unwrap_or_default(),
    }
}

// ============================================================================
// Time Series Export
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRow {
    pub entity_id: EntityId,
    pub activity_type: ActivityType,
    pub period: NaiveDate,
    pub activity_count: u64,
    pub confidence_weighted_score: f64,
    pub trend_label: TrendLabel,
}

/// Activity rows of live entities, ordered by entity then period
pub fn timeseries_export(
    store: &StoreSnapshot,
    temporal: &TemporalSnapshot,
    analysis: Option<&AnalysisResult>,
) -> Vec<TimeSeriesRow> {
    let mut rows = Vec::new();
    for entity in store.live() {
        let Some(series) = temporal.series().get(&SubjectKey::Entity(entity.id)) else {
            continue;
        };
        let trend_label = analysis
            .and_then(|a| a.get(&entity.id))
            .map(|m| m.trend)
            .unwrap_or_default();
        let activity_type = entity.activity_type();
        rows.extend(series.iter().map(|(period, value)| TimeSeriesRow {
            entity_id: entity.id,
            activity_type,
            period: *period,
            activity_count: value.activity_count,
            confidence_weighted_score: value.confidence_weighted_score,
            trend_label,
        }));
    }
    rows
}

// ============================================================================
// Writing
// ============================================================================

/// Paths of the written export files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub registry: PathBuf,
    pub graph: PathBuf,
    pub timeseries: PathBuf,
    pub trends: PathBuf,
}

/// Write all four exports into `dir`, creating it if needed.
///
/// Without an analysis the trends file holds an empty list.
pub fn write_exports(
    dir: &Path,
    store: &StoreSnapshot,
    edges: &EdgeSnapshot,
    temporal: &TemporalSnapshot,
    analysis: Option<&AnalysisResult>,
) -> Result<ExportPaths> {
    fs::create_dir_all(dir).map_err(|e| {
        PolnetError::StoreUnavailable(format!("cannot create {}: {e}", dir.display()))
    })?;

    let paths = ExportPaths {
        registry: dir.join(REGISTRY_FILE),
        graph: dir.join(GRAPH_FILE),
        timeseries: dir.join(TIMESERIES_FILE),
        trends: dir.join(TRENDS_FILE),
    };
    let registry = registry(store);
    let rows = timeseries_export(store, temporal, analysis);

    write_json_atomic(&paths.registry, &registry)?;
    write_json_atomic(&paths.graph, &graph_export(store, edges, analysis))?;
    write_json_atomic(&paths.timeseries, &rows)?;
    let trends: &[TrendReport] = analysis.map(|a| a.trends.as_slice()).unwrap_or_default();
    write_json_atomic(&paths.trends, &trends)?;

    tracing::info!(
        dir = %dir.display(),
        entities = registry.len(),
        edges = edges.len(),
        rows = rows.len(),
        trends = trends.len(),
        "exports written"
    );
    Ok(paths)
}
