//! Community detection algorithms
//!
//! Weakly connected components over the knowledge graph, used by metrics
//! and by global-mode retrieval.

use crate::graph::{EntityId, KnowledgeGraph};
use std::collections::HashMap;

/// Result of WCC algorithm
#[derive(Debug, Clone, Default)]
pub struct WccResult {
    /// Components ordered by size (largest first), members sorted by id
    pub components: Vec<Vec<EntityId>>,
    /// Map of EntityId -> index into `components`
    pub entity_component: HashMap<EntityId, usize>,
}

impl WccResult {
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn largest(&self) -> usize {
        self.components.first().map_or(0, |c| c.len())
    }
}

/// Union-Find data structure
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        UnionFind {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            self.parent[i] = self.find(self.parent[i]); // Path compression
        }
        self.parent[i]
    }

    fn union(&mut self, i: usize, j: usize) {
        let root_i = self.find(i);
        let root_j = self.find(j);

        if root_i != root_j {
            if self.rank[root_i] < self.rank[root_j] {
                self.parent[root_i] = root_j;
            } else if self.rank[root_i] > self.rank[root_j] {
                self.parent[root_j] = root_i;
            } else {
                self.parent[root_j] = root_i;
                self.rank[root_i] += 1;
            }
        }
    }
}

/// Weakly Connected Components (WCC)
///
/// Finds all disjoint subgraphs in the graph. Ignores relation direction.
/// Relations whose endpoints are missing are skipped.
pub fn weakly_connected_components(graph: &KnowledgeGraph) -> WccResult {
    let mut ids: Vec<&EntityId> = graph.entities().map(|e| &e.id).collect();
    ids.sort();

    let index: HashMap<&EntityId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut uf = UnionFind::new(ids.len());

    for relation in graph.relations() {
        if let (Some(&u), Some(&v)) = (index.get(&relation.head), index.get(&relation.tail)) {
            uf.union(u, v);
        }
    }

    let mut by_root: HashMap<usize, Vec<EntityId>> = HashMap::new();
    for (i, id) in ids.iter().enumerate() {
        let root = uf.find(i);
        by_root.entry(root).or_default().push((*id).clone());
    }

    let mut components: Vec<Vec<EntityId>> = by_root.into_values().collect();
    // members are already sorted because ids were visited in order
    components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

    let mut entity_component = HashMap::new();
    for (c, members) in components.iter().enumerate() {
        for id in members {
            entity_component.insert(id.clone(), c);
        }
    }

    WccResult {
        components,
        entity_component,
    }
}
