//! Entity graph construction
//!
//! Live entities become nodes in id order; every relationship edge between
//! the same pair collapses into one link whose weight is the sum of the
//! edge weights across predicate classes.

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;

use polnet_core::{EntityId, PolnetError, Result};
use polnet_store::{EdgeSnapshot, StoreSnapshot};

/// A connected component, nodes in id order
#[derive(Debug, Clone)]
pub struct Component {
    /// Smallest entity id in the component
    pub anchor: EntityId,
    pub nodes: Vec<NodeIndex>,
}

impl Component {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_isolated(&self) -> bool {
        self.nodes.len() < 2
    }
}

/// Undirected weighted graph over live canonical entities
#[derive(Debug, Clone)]
pub struct EntityGraph {
    graph: UnGraph<EntityId, f64>,
    nodes: BTreeMap<EntityId, NodeIndex>,
    components: Vec<Component>,
    component_of: Vec<usize>,
}

impl EntityGraph {
    /// Build the graph from consistent snapshots.
    ///
    /// # Errors
    /// `AnalyticsInput` when an edge references a missing or merged entity,
    /// or connects an entity to itself.
    pub fn build(store: &StoreSnapshot, edges: &EdgeSnapshot) -> Result<Self> {
        let mut graph = UnGraph::<EntityId, f64>::default();
        let mut nodes = BTreeMap::new();
        for entity in store.live() {
            nodes.insert(entity.id, graph.add_node(entity.id));
        }

        let mut links: BTreeMap<(EntityId, EntityId), f64> = BTreeMap::new();
        for edge in &edges.edges {
            let key = edge.key;
            if key.is_self_loop() {
                return Err(PolnetError::AnalyticsInput(format!("self-loop edge {key}")));
            }
            for endpoint in [key.entity_a, key.entity_b] {
                if !nodes.contains_key(&endpoint) {
                    return Err(PolnetError::AnalyticsInput(format!(
                        "edge {key} references entity {endpoint} which is missing or merged"
                    )));
                }
            }
            *links.entry((key.entity_a, key.entity_b)).or_insert(0.0) += edge.weight as f64;
        }

        for ((a, b), weight) in links {
            graph.add_edge(nodes[&a], nodes[&b], weight);
        }

        let (components, component_of) = connected_components(&graph);
        Ok(Self {
            graph,
            nodes,
            components,
            component_of,
        })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Edge count over possible pairs; 0 below two nodes
    pub fn density(&self) -> f64 {
        density(self.node_count(), self.edge_count())
    }

    pub fn node(&self, id: &EntityId) -> Option<NodeIndex> {
        self.nodes.get(id).copied()
    }

    pub fn id(&self, node: NodeIndex) -> EntityId {
        self.graph[node]
    }

    /// Sum of incident link weights
    pub fn weighted_degree(&self, node: NodeIndex) -> f64 {
        self.graph.edges(node).map(|e| *e.weight()).sum()
    }

    /// Neighbours with the link weight
    pub fn neighbors(&self, node: NodeIndex) -> impl Iterator<Item = (NodeIndex, f64)> + '_ {
        self.graph.edges(node).map(move |e| {
            let other = if e.source() == node { e.target() } else { e.source() };
            (other, *e.weight())
        })
    }

    /// Links with both endpoints among `members`, and their total weight
    pub fn internal_links(&self, members: &[NodeIndex]) -> (usize, f64) {
        let set: HashSet<_> = members.iter().copied().collect();
        let mut count = 0;
        let mut weight = 0.0;
        for edge in self.graph.edge_references() {
            if set.contains(&edge.source()) && set.contains(&edge.target()) {
                count += 1;
                weight += *edge.weight();
            }
        }
        (count, weight)
    }

    /// Induced subgraph over `members`
    pub fn subgraph(&self, members: &[NodeIndex]) -> UnGraph<EntityId, f64> {
        let set: HashSet<_> = members.iter().copied().collect();
        self.graph.filter_map(
            |node, id| set.contains(&node).then_some(*id),
            |_, weight| Some(*weight),
        )
    }

    /// Components ordered by anchor id
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component_of(&self, node: NodeIndex) -> &Component {
        &self.components[self.component_of[node.index()]]
    }
}

/// Edge density of a simple undirected graph
pub fn density(nodes: usize, edges: usize) -> f64 {
    if nodes < 2 {
        return 0.0;
    }
    let possible = nodes as f64 * (nodes as f64 - 1.0) / 2.0;
    edges as f64 / possible
}

/// Mean local clustering coefficient; nodes of degree below two count as 0
pub fn average_clustering<N, E>(graph: &UnGraph<N, E>) -> f64 {
    if graph.node_count() == 0 {
        return 0.0;
    }
    let total: f64 = graph
        .node_indices()
        .map(|node| {
            let neighbors: Vec<NodeIndex> = graph.neighbors(node).collect();
            let k = neighbors.len();
            if k < 2 {
                return 0.0;
            }
            let mut closed = 0usize;
            for (i, a) in neighbors.iter().enumerate() {
                for b in &neighbors[i + 1..] {
                    if graph.contains_edge(*a, *b) {
                        closed += 1;
                    }
                }
            }
            closed as f64 / (k * (k - 1) / 2) as f64
        })
        .sum();
    total / graph.node_count() as f64
}

/// Mean hop count over ordered node pairs; 0 when disconnected or below two nodes
pub fn average_path_length<N, E>(graph: &UnGraph<N, E>) -> f64 {
    let n = graph.node_count();
    if n < 2 {
        return 0.0;
    }
    let mut total = 0usize;
    for start in graph.node_indices() {
        let hops = dijkstra(graph, start, None, |_| 1usize);
        if hops.len() < n {
            return 0.0;
        }
        total += hops.values().sum::<usize>();
    }
    total as f64 / (n * (n - 1)) as f64
}

fn connected_components(graph: &UnGraph<EntityId, f64>) -> (Vec<Component>, Vec<usize>) {
    let mut sets = UnionFind::<usize>::new(graph.node_count());
    for edge in graph.edge_references() {
        sets.union(edge.source().index(), edge.target().index());
    }

    // Nodes were inserted in id order, so the first node seen per root is the anchor
    let mut by_root: HashMap<usize, usize> = HashMap::new();
    let mut components: Vec<Component> = Vec::new();
    let mut component_of = vec![0; graph.node_count()];
    for node in graph.node_indices() {
        let root = sets.find(node.index());
        let slot = *by_root.entry(root).or_insert_with(|| {
            components.push(Component {
                anchor: graph[node],
                nodes: Vec::new(),
            });
            components.len() - 1
        });
        components[slot].nodes.push(node);
        component_of[node.index()] = slot;
    }
    (components, component_of)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use polnet_core::{
        CanonicalEntity, Category, EdgeKey, EdgeObservation, EntityKind, MentionEvidence,
        PredicateClass, RelationshipEdge,
    };
    use uuid::Uuid;

    pub(crate) fn entity(n: u128, name: &str) -> CanonicalEntity {
        let evidence = MentionEvidence {
            document_id: "doc".to_string(),
            display_name: name.to_string(),
            category: Category::Official,
            confidence: 0.9,
            attributes: Default::default(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        CanonicalEntity::from_evidence(
            Uuid::from_u128(n),
            EntityKind::Person,
            Category::Official,
            &evidence,
        )
    }

    pub(crate) fn edge(a: u128, b: u128, predicate: PredicateClass, weight: u64) -> RelationshipEdge {
        let obs = EdgeObservation {
            key: EdgeKey::new(Uuid::from_u128(a), Uuid::from_u128(b), predicate),
            raw_predicate: predicate.as_str().to_string(),
            document_id: "doc".to_string(),
            context: None,
            confidence: 0.8,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        let mut edge = RelationshipEdge::from_observation(&obs, 10);
        edge.weight = weight;
        edge
    }

    pub(crate) fn snapshots(
        people: &[(u128, &str)],
        links: Vec<RelationshipEdge>,
    ) -> (StoreSnapshot, EdgeSnapshot) {
        let store = StoreSnapshot {
            entities: people
                .iter()
                .map(|(n, name)| (Uuid::from_u128(*n), entity(*n, name)))
                .collect(),
        };
        let mut edges = links;
        edges.sort_by(|a, b| a.key.cmp(&b.key));
        (store, EdgeSnapshot { edges, retired: Vec::new() })
    }

    #[test]
    fn test_parallel_predicates_collapse() {
        let (store, edges) = snapshots(
            &[(1, "John Thune"), (2, "Donald Trump")],
            vec![
                edge(1, 2, PredicateClass::MetWith, 2),
                edge(1, 2, PredicateClass::SaidAbout, 1),
            ],
        );
        let graph = EntityGraph::build(&store, &edges).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        let node = graph.node(&Uuid::from_u128(1)).unwrap();
        assert_eq!(graph.weighted_degree(node), 3.0);
        assert_eq!(graph.density(), 1.0);
    }

    #[test]
    fn test_components_anchored_by_smallest_id() {
        let (store, edges) = snapshots(
            &[(1, "A One"), (2, "B Two"), (3, "C Three"), (4, "D Four")],
            vec![edge(2, 4, PredicateClass::MetWith, 1)],
        );
        let graph = EntityGraph::build(&store, &edges).unwrap();
        let anchors: Vec<_> = graph.components().iter().map(|c| c.anchor).collect();
        assert_eq!(
            anchors,
            vec![Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3)]
        );
        let four = graph.node(&Uuid::from_u128(4)).unwrap();
        assert_eq!(graph.component_of(four).anchor, Uuid::from_u128(2));
        assert!(graph.components()[0].is_isolated());
    }

    #[test]
    fn test_edge_to_merged_entity_is_inconsistent() {
        let (mut store, edges) = snapshots(
            &[(1, "John Thune"), (2, "Donald Trump")],
            vec![edge(1, 2, PredicateClass::MetWith, 1)],
        );
        store
            .entities
            .get_mut(&Uuid::from_u128(2))
            .unwrap()
            .merged_into = Some(Uuid::from_u128(1));
        let err = EntityGraph::build(&store, &edges).unwrap_err();
        assert!(matches!(err, PolnetError::AnalyticsInput(_)));
    }

    #[test]
    fn test_edge_to_missing_entity_is_inconsistent() {
        let (store, edges) = snapshots(
            &[(1, "John Thune")],
            vec![edge(1, 9, PredicateClass::MetWith, 1)],
        );
        assert!(EntityGraph::build(&store, &edges).is_err());
    }

    #[test]
    fn test_community_shape_metrics() {
        let (store, edges) = snapshots(
            &[(1, "A One"), (2, "B Two"), (3, "C Three"), (4, "D Four"), (5, "E Five")],
            vec![
                edge(1, 2, PredicateClass::MetWith, 1),
                edge(1, 3, PredicateClass::MetWith, 1),
                edge(2, 3, PredicateClass::MetWith, 1),
                edge(3, 4, PredicateClass::MetWith, 1),
            ],
        );
        let graph = EntityGraph::build(&store, &edges).unwrap();
        let nodes = |ids: &[u128]| -> Vec<NodeIndex> {
            ids.iter()
                .map(|n| graph.node(&Uuid::from_u128(*n)).unwrap())
                .collect()
        };

        let triangle = graph.subgraph(&nodes(&[1, 2, 3]));
        assert_eq!(triangle.edge_count(), 3);
        assert_eq!(average_clustering(&triangle), 1.0);
        assert_eq!(average_path_length(&triangle), 1.0);

        let path = graph.subgraph(&nodes(&[2, 3, 4]));
        assert_eq!(average_clustering(&path), 0.0);
        assert!((average_path_length(&path) - 4.0 / 3.0).abs() < 1e-12);

        // 1 and 3 close a triangle with 2, 4 hangs off 3
        let tail = graph.subgraph(&nodes(&[1, 2, 3, 4]));
        let expected = (1.0 + 1.0 + 1.0 / 3.0 + 0.0) / 4.0;
        assert!((average_clustering(&tail) - expected).abs() < 1e-12);

        let split = graph.subgraph(&nodes(&[1, 5]));
        assert_eq!(average_path_length(&split), 0.0);
        assert_eq!(average_clustering(&split), 0.0);
    }
}
