//! Centrality measures
//!
//! PageRank runs independently inside each connected component and is
//! rescaled so the component's scores average 1.0. Scores of one component
//! therefore never depend on the rest of the graph, which is what makes
//! incremental recomputation exact.

use std::collections::HashMap;

use petgraph::graph::NodeIndex;

use polnet_core::Result;

use crate::graph::{Component, EntityGraph};
use crate::CancellationToken;

/// Power-iteration parameters
#[derive(Debug, Clone, Copy)]
pub struct PageRankParams {
    pub damping: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-9,
            max_iterations: 100,
        }
    }
}

/// Weighted PageRank of one component, scaled to mean 1.0.
///
/// Isolated nodes score 0.0. Iteration order follows the component's id
/// order, so results are bit-for-bit reproducible.
pub fn component_pagerank(
    graph: &EntityGraph,
    component: &Component,
    params: PageRankParams,
    cancel: &CancellationToken,
) -> Result<HashMap<NodeIndex, f64>> {
    if component.is_isolated() {
        return Ok(component.nodes.iter().map(|n| (*n, 0.0)).collect());
    }

    let n = component.len();
    let position: HashMap<NodeIndex, usize> = component
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (*node, i))
        .collect();
    let degree: Vec<f64> = component
        .nodes
        .iter()
        .map(|node| graph.weighted_degree(*node))
        .collect();
    let adjacency: Vec<Vec<(usize, f64)>> = component
        .nodes
        .iter()
        .map(|node| {
            let mut adj: Vec<(usize, f64)> = graph
                .neighbors(*node)
                .map(|(other, w)| (position[&other], w))
                .collect();
            adj.sort_by_key(|(j, _)| *j);
            adj
        })
        .collect();

    let base = (1.0 - params.damping) / n as f64;
    let mut rank = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];

    for iteration in 0..params.max_iterations {
        cancel.check()?;
        for (i, neighbors) in adjacency.iter().enumerate() {
            let inflow: f64 = neighbors
                .iter()
                .map(|(j, w)| rank[*j] * w / degree[*j])
                .sum();
            next[i] = base + params.damping * inflow;
        }
        let delta: f64 = rank.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut rank, &mut next);
        if delta < params.tolerance {
            tracing::trace!(iteration, anchor = %component.anchor, "pagerank converged");
            break;
        }
    }

    Ok(component
        .nodes
        .iter()
        .zip(rank)
        .map(|(node, score)| (*node, score * n as f64))
        .collect())
}

/// Normalize a value against the component maximum; 0 when the maximum is 0
pub fn relative(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        value / max
    } else {
        0.0
    }
}

/// Influence from weighted degree and centrality, each relative to the component maximum
pub fn influence(degree: f64, max_degree: f64, centrality: f64, max_centrality: f64) -> f64 {
    0.5 * relative(degree, max_degree) + 0.5 * relative(centrality, max_centrality)
}
