//! Community detection by weighted label propagation
//!
//! Each component runs on its own `StdRng` seeded from the configured seed
//! and the component anchor, so a component's communities do not change
//! when unrelated parts of the graph do.

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::NodeIndex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use polnet_core::{EntityId, Result};

use crate::graph::{Component, EntityGraph};
use crate::CancellationToken;

/// Community id per node of one component.
///
/// The community id is the smallest entity id among its members.
pub fn component_communities(
    graph: &EntityGraph,
    component: &Component,
    seed: u64,
    max_iterations: usize,
    cancel: &CancellationToken,
) -> Result<HashMap<NodeIndex, EntityId>> {
    let mut labels: HashMap<NodeIndex, EntityId> = component
        .nodes
        .iter()
        .map(|node| (*node, graph.id(*node)))
        .collect();

    if !component.is_isolated() {
        let mut rng = StdRng::seed_from_u64(component_seed(seed, component.anchor));
        let mut order = component.nodes.clone();

        for iteration in 0..max_iterations {
            cancel.check()?;
            order.shuffle(&mut rng);

            let mut changed = false;
            for node in &order {
                let mut weights: BTreeMap<EntityId, f64> = BTreeMap::new();
                for (other, weight) in graph.neighbors(*node) {
                    *weights.entry(labels[&other]).or_insert(0.0) += weight;
                }

                // BTreeMap iterates labels ascending; strict > keeps the smallest on ties
                let mut best: Option<(EntityId, f64)> = None;
                for (label, weight) in weights {
                    if best.map_or(true, |(_, w)| weight > w) {
                        best = Some((label, weight));
                    }
                }

                if let Some((label, _)) = best {
                    if labels[node] != label {
                        labels.insert(*node, label);
                        changed = true;
                    }
                }
            }

            if !changed {
                tracing::trace!(iteration, anchor = %component.anchor, "label propagation settled");
                break;
            }
        }
    }

    // Relabel every group by its smallest member
    let mut smallest: HashMap<EntityId, EntityId> = HashMap::new();
    for node in &component.nodes {
        let id = graph.id(*node);
        smallest
            .entry(labels[node])
            .and_modify(|m| *m = (*m).min(id))
            .or_insert(id);
    }
    Ok(labels
        .into_iter()
        .map(|(node, label)| (node, smallest[&label]))
        .collect())
}

fn component_seed(seed: u64, anchor: EntityId) -> u64 {
    let bits = anchor.as_u128();
    seed ^ (bits as u64) ^ ((bits >> 64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{edge, snapshots};
    use polnet_core::PredicateClass;
    use uuid::Uuid;

    /// Two triangles joined by a single light link
    fn barbell() -> EntityGraph {
        let (store, edges) = snapshots(
            &[
                (1, "A One"),
                (2, "B Two"),
                (3, "C Three"),
                (4, "D Four"),
                (5, "E Five"),
                (6, "F Six"),
            ],
            vec![
                edge(1, 2, PredicateClass::MetWith, 5),
                edge(1, 3, PredicateClass::MetWith, 5),
                edge(2, 3, PredicateClass::MetWith, 5),
                edge(4, 5, PredicateClass::MetWith, 5),
                edge(4, 6, PredicateClass::MetWith, 5),
                edge(5, 6, PredicateClass::MetWith, 5),
                edge(3, 4, PredicateClass::MetWith, 1),
            ],
        );
        EntityGraph::build(&store, &edges).unwrap()
    }

    fn run(graph: &EntityGraph, seed: u64) -> BTreeMap<EntityId, EntityId> {
        component_communities(graph, &graph.components()[0], seed, 50, &CancellationToken::new())
            .unwrap()
            .into_iter()
            .map(|(node, community)| (graph.id(node), community))
            .collect()
    }

    #[test]
    fn test_dense_groups_become_communities() {
        let graph = barbell();
        let communities = run(&graph, 42);
        let id = Uuid::from_u128;
        assert_eq!(communities[&id(1)], communities[&id(2)]);
        assert_eq!(communities[&id(2)], communities[&id(3)]);
        assert_eq!(communities[&id(4)], communities[&id(5)]);
        assert_eq!(communities[&id(5)], communities[&id(6)]);
        assert_ne!(communities[&id(1)], communities[&id(4)]);
        assert_eq!(communities[&id(1)], id(1));
        assert_eq!(communities[&id(6)], id(4));
    }

    #[test]
    fn test_same_seed_same_communities() {
        let graph = barbell();
        assert_eq!(run(&graph, 7), run(&graph, 7));
    }

    #[test]
    fn test_isolated_node_is_own_community() {
        let (store, edges) = snapshots(&[(9, "Solo Person")], Vec::new());
        let graph = EntityGraph::build(&store, &edges).unwrap();
        let communities = run(&graph, 42);
        assert_eq!(communities[&Uuid::from_u128(9)], Uuid::from_u128(9));
    }
}
