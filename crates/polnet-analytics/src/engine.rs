//! Analytics Engine
//!
//! Combines graph construction, centrality, communities and trends into one
//! [`AnalysisResult`]. Every structural metric is local to a connected
//! component, so an incremental run that reuses untouched components
//! produces exactly what a full run would.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use polnet_core::{
    AnalyticsConfig, EntityId, EntityKind, PolnetError, Result, SubjectKey, TrendLabel,
};
use polnet_store::{EdgeSnapshot, StoreSnapshot, TemporalSnapshot};

use crate::centrality::{component_pagerank, influence, PageRankParams};
use crate::community::component_communities;
use crate::graph::{average_clustering, average_path_length, density, Component, EntityGraph};
use crate::trend::{classify, TrendReport, TrendWindows};
use crate::CancellationToken;

/// Number of central figures listed per community
const CENTRAL_FIGURES: usize = 5;

/// Surnames used in a community's display name
const NAME_FIGURES: usize = 3;

// ============================================================================
// Result Types
// ============================================================================

/// Per-entity analytics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetrics {
    /// Sum of link weights
    pub weighted_degree: f64,

    /// Component-scaled PageRank
    pub centrality: f64,

    /// Combined degree and centrality score in `[0, 1]`
    pub influence: f64,

    /// Smallest member id of the entity's community
    pub community_id: EntityId,

    /// Smallest member id of the entity's connected component
    pub component_id: EntityId,

    pub trend: TrendLabel,

    pub recent_activity: u64,

    pub prior_activity: u64,
}

/// A community member singled out by weighted degree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentralFigure {
    pub id: EntityId,
    pub name: String,
    pub weighted_degree: f64,
    pub influence: f64,
}

/// Summary of one detected community
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunitySummary {
    pub id: EntityId,

    /// Display name, e.g. "Thune-Trump Network"
    pub name: String,

    pub size: usize,

    /// Members in id order
    pub members: Vec<EntityId>,

    pub central_figures: Vec<CentralFigure>,

    /// Internal link density
    pub density: f64,

    /// Total weight of internal links
    pub total_weight: f64,

    /// Mean local clustering coefficient of the members
    pub clustering_coefficient: f64,

    /// Mean hop distance between members; 0 when the community is not
    /// connected on its own
    pub average_path_length: f64,
}

/// Whole-graph statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub component_count: usize,
    pub community_count: usize,
}

/// Output of an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub as_of: DateTime<Utc>,

    pub entities: BTreeMap<EntityId, EntityMetrics>,

    /// Communities above the summary size, largest first
    pub communities: Vec<CommunitySummary>,

    pub metrics: GraphMetrics,

    /// Significant activity trends, strongest first
    pub trends: Vec<TrendReport>,

    /// Set when the input was inconsistent and the run produced nothing
    pub skipped_reason: Option<String>,
}

impl AnalysisResult {
    /// Result over an empty graph
    pub fn empty(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            entities: BTreeMap::new(),
            communities: Vec::new(),
            metrics: GraphMetrics::default(),
            trends: Vec::new(),
            skipped_reason: None,
        }
    }

    fn skipped(as_of: DateTime<Utc>, reason: String) -> Self {
        Self {
            skipped_reason: Some(reason),
            ..Self::empty(as_of)
        }
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityMetrics> {
        self.entities.get(id)
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped_reason.is_some()
    }

    /// Entities by descending influence, ties by id
    pub fn top_influencers(&self, limit: usize) -> Vec<(EntityId, &EntityMetrics)> {
        let mut ranked: Vec<_> = self.entities.iter().map(|(id, m)| (*id, m)).collect();
        ranked.sort_by(|a, b| {
            b.1.influence
                .total_cmp(&a.1.influence)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }
}

// ============================================================================
// Analytics Engine
// ============================================================================

/// Runs analyses over store snapshots
#[derive(Debug, Clone, Default)]
pub struct AnalyticsEngine {
    config: AnalyticsConfig,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Full analysis of the snapshots as of a point in time.
    ///
    /// An inconsistent snapshot is logged and yields an empty result whose
    /// `skipped_reason` explains why. Only cancellation is an error.
    pub fn analyze(
        &self,
        store: &StoreSnapshot,
        edges: &EdgeSnapshot,
        temporal: &TemporalSnapshot,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        self.run(None, &BTreeSet::new(), store, edges, temporal, as_of, cancel)
    }

    /// Analysis that reuses `previous` for components without touched entities.
    ///
    /// `touched` holds every entity created, absorbed into, merged or given
    /// a new edge since `previous` was computed. Trends are always
    /// recomputed.
    #[allow(clippy::too_many_arguments)]
    pub fn analyze_incremental(
        &self,
        previous: &AnalysisResult,
        touched: &BTreeSet<EntityId>,
        store: &StoreSnapshot,
        edges: &EdgeSnapshot,
        temporal: &TemporalSnapshot,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let previous = (!previous.is_skipped()).then_some(previous);
        self.run(previous, touched, store, edges, temporal, as_of, cancel)
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        previous: Option<&AnalysisResult>,
        touched: &BTreeSet<EntityId>,
        store: &StoreSnapshot,
        edges: &EdgeSnapshot,
        temporal: &TemporalSnapshot,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let started = Instant::now();
        cancel.check()?;

        let graph = match EntityGraph::build(store, edges) {
            Ok(graph) => graph,
            Err(PolnetError::AnalyticsInput(reason)) => {
                tracing::warn!(%reason, "inconsistent snapshot, analytics skipped");
                return Ok(AnalysisResult::skipped(as_of, reason));
            }
            Err(e) => return Err(e),
        };
        if graph.node_count() == 0 {
            return Ok(AnalysisResult::empty(as_of));
        }

        let previous_sizes = previous.map(component_sizes).unwrap_or_default();
        let windows = TrendWindows::new(as_of, self.config.trend_window_days);
        let mut entities = BTreeMap::new();
        let mut recomputed = 0usize;

        for component in graph.components() {
            cancel.check()?;

            let reused = previous.filter(|prev| {
                is_reusable(prev, &previous_sizes, &graph, component, touched)
            });
            match reused {
                Some(prev) => {
                    for node in &component.nodes {
                        let id = graph.id(*node);
                        if let Some(metrics) = prev.entities.get(&id) {
                            entities.insert(id, metrics.clone());
                        }
                    }
                }
                None => {
                    recomputed += 1;
                    self.analyze_component(&graph, component, &mut entities, cancel)?;
                }
            }

            for node in &component.nodes {
                let id = graph.id(*node);
                let (recent, prior) = windows.activity(temporal, id);
                if let Some(metrics) = entities.get_mut(&id) {
                    metrics.recent_activity = recent;
                    metrics.prior_activity = prior;
                    metrics.trend = classify(recent, prior, self.config.trend_threshold);
                }
            }
        }

        let trends = self.trend_reports(&graph, store, temporal, as_of);
        let communities = self.summarize_communities(&graph, store, &entities);
        let community_count = entities
            .values()
            .map(|m| m.community_id)
            .collect::<BTreeSet<_>>()
            .len();
        let metrics = GraphMetrics {
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
            density: graph.density(),
            component_count: graph.components().len(),
            community_count,
        };

        tracing::info!(
            nodes = metrics.node_count,
            edges = metrics.edge_count,
            components = metrics.component_count,
            communities = metrics.community_count,
            trends = trends.len(),
            recomputed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis complete"
        );

        Ok(AnalysisResult {
            as_of,
            entities,
            communities,
            metrics,
            trends,
            skipped_reason: None,
        })
    }

    /// Trend reports of every live entity above the strength floor
    fn trend_reports(
        &self,
        graph: &EntityGraph,
        store: &StoreSnapshot,
        temporal: &TemporalSnapshot,
        as_of: DateTime<Utc>,
    ) -> Vec<TrendReport> {
        let series = temporal.series();
        let mut reports: Vec<TrendReport> = graph
            .components()
            .iter()
            .flat_map(|component| component.nodes.iter())
            .filter_map(|node| {
                let id = graph.id(*node);
                let buckets = series.get(&SubjectKey::Entity(id))?;
                let name = store.get(&id)?.canonical_name.as_str();
                TrendReport::fit(
                    id,
                    name,
                    buckets,
                    as_of.date_naive(),
                    self.config.trend_slope_threshold,
                )
            })
            .filter(|report| report.strength > self.config.min_trend_strength)
            .collect();

        reports.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        reports
    }

    fn analyze_component(
        &self,
        graph: &EntityGraph,
        component: &Component,
        out: &mut BTreeMap<EntityId, EntityMetrics>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let params = PageRankParams {
            damping: self.config.damping,
            tolerance: self.config.tolerance,
            max_iterations: self.config.max_iterations,
        };
        let centrality = component_pagerank(graph, component, params, cancel)?;
        let communities = component_communities(
            graph,
            component,
            self.config.community_seed,
            self.config.lpa_max_iterations,
            cancel,
        )?;

        let degrees: Vec<f64> = component
            .nodes
            .iter()
            .map(|n| graph.weighted_degree(*n))
            .collect();
        let max_degree = degrees.iter().copied().fold(0.0, f64::max);
        let max_centrality = centrality.values().copied().fold(0.0, f64::max);

        for (node, degree) in component.nodes.iter().zip(degrees) {
            let score = centrality.get(node).copied().unwrap_or(0.0);
            out.insert(
                graph.id(*node),
                EntityMetrics {
                    weighted_degree: degree,
                    centrality: score,
                    influence: influence(degree, max_degree, score, max_centrality),
                    community_id: communities
                        .get(node)
                        .copied()
                        .unwrap_or_else(|| graph.id(*node)),
                    component_id: component.anchor,
                    trend: TrendLabel::Stable,
                    recent_activity: 0,
                    prior_activity: 0,
                },
            );
        }
        Ok(())
    }

    fn summarize_communities(
        &self,
        graph: &EntityGraph,
        store: &StoreSnapshot,
        entities: &BTreeMap<EntityId, EntityMetrics>,
    ) -> Vec<CommunitySummary> {
        let mut groups: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
        for (id, metrics) in entities {
            groups.entry(metrics.community_id).or_default().push(*id);
        }

        let mut summaries: Vec<CommunitySummary> = groups
            .into_iter()
            .filter(|(_, members)| members.len() >= self.config.min_community_size.max(1))
            .map(|(community_id, members)| {
                let mut ranked: Vec<(EntityId, &EntityMetrics)> =
                    members.iter().map(|id| (*id, &entities[id])).collect();
                ranked.sort_by(|a, b| {
                    b.1.weighted_degree
                        .total_cmp(&a.1.weighted_degree)
                        .then_with(|| a.0.cmp(&b.0))
                });

                let central_figures: Vec<CentralFigure> = ranked
                    .iter()
                    .take(CENTRAL_FIGURES)
                    .map(|(id, metrics)| CentralFigure {
                        id: *id,
                        name: store
                            .get(id)
                            .map(|e| e.canonical_name.clone())
                            .unwrap_or_default(),
                        weighted_degree: metrics.weighted_degree,
                        influence: metrics.influence,
                    })
                    .collect();

                let name = community_name(store, &central_figures);
                let nodes: Vec<_> = members.iter().filter_map(|id| graph.node(id)).collect();
                let (links, total_weight) = graph.internal_links(&nodes);
                let subgraph = graph.subgraph(&nodes);

                CommunitySummary {
                    id: community_id,
                    name,
                    size: members.len(),
                    density: density(members.len(), links),
                    total_weight,
                    clustering_coefficient: average_clustering(&subgraph),
                    average_path_length: average_path_length(&subgraph),
                    members,
                    central_figures,
                }
            })
            .collect();

        summaries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.id.cmp(&b.id)));
        summaries
    }
}

/// Member count per component of a previous result
fn component_sizes(result: &AnalysisResult) -> HashMap<EntityId, usize> {
    let mut sizes = HashMap::new();
    for metrics in result.entities.values() {
        *sizes.entry(metrics.component_id).or_insert(0) += 1;
    }
    sizes
}

/// A component can be copied when it has exactly the same members as before
/// and none of them was touched
fn is_reusable(
    previous: &AnalysisResult,
    previous_sizes: &HashMap<EntityId, usize>,
    graph: &EntityGraph,
    component: &Component,
    touched: &BTreeSet<EntityId>,
) -> bool {
    if previous_sizes.get(&component.anchor) != Some(&component.len()) {
        return false;
    }
    component.nodes.iter().all(|node| {
        let id = graph.id(*node);
        !touched.contains(&id)
            && previous
                .entities
                .get(&id)
                .is_some_and(|m| m.component_id == component.anchor)
    })
}

/// "Thune-Trump Network" from the leading figures' surnames
fn community_name(store: &StoreSnapshot, figures: &[CentralFigure]) -> String {
    let parts: Vec<String> = figures
        .iter()
        .take(NAME_FIGURES)
        .filter_map(|figure| {
            let entity = store.get(&figure.id)?;
            match entity.kind {
                EntityKind::Person => entity
                    .canonical_name
                    .split_whitespace()
                    .last()
                    .map(String::from),
                EntityKind::Organization => Some(entity.canonical_name.clone()),
            }
        })
        .collect();
    if parts.is_empty() {
        "Unnamed Network".to_string()
    } else {
        format!("{} Network", parts.join("-"))
    }
}

// ============================================================================
// Tests
// ============================================================================
