//! Pathfinding algorithms
//!
//! Directed minimum-hop paths with deterministic tie-breaking, plus
//! undirected neighborhood expansion for subgraph retrieval.

use crate::graph::{Direction, EntityId, GraphError, GraphResult, KnowledgeGraph, Relation, RelationId};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Result of a shortest path query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathOutcome {
    /// Relation ids from source to target, empty when source == target
    Found(Vec<RelationId>),
    NoPath,
}

impl PathOutcome {
    pub fn relations(&self) -> Option<&[RelationId]> {
        match self {
            PathOutcome::Found(path) => Some(path),
            PathOutcome::NoPath => None,
        }
    }

    pub fn hops(&self) -> Option<usize> {
        self.relations().map(|p| p.len())
    }
}

/// Preference between two relations leaving the same entity onto a
/// shortest path: higher weight, then lexically smaller relation type.
fn hop_preference(a: &Relation, b: &Relation) -> Ordering {
    b.weight
        .total_cmp(&a.weight)
        .then_with(|| a.relation_type.cmp(&b.relation_type))
        .then_with(|| a.tail.cmp(&b.tail))
        .then_with(|| a.id.cmp(&b.id))
}

/// Shortest directed path from `from` to `to`, counted in hops.
///
/// Among equally short paths, each hop takes the relation with the higher
/// weight, breaking remaining ties by relation type order.
pub fn shortest_path(graph: &KnowledgeGraph, from: &EntityId, to: &EntityId) -> GraphResult<PathOutcome> {
    for id in [from, to] {
        if !graph.contains_entity(id) {
            return Err(GraphError::EntityNotFound(id.clone()));
        }
    }
    if from == to {
        return Ok(PathOutcome::Found(Vec::new()));
    }

    // Backward BFS: hop distance from every entity to the target
    let mut remaining: HashMap<&EntityId, usize> = HashMap::new();
    let mut queue = VecDeque::new();
    remaining.insert(to, 0);
    queue.push_back(to);
    while let Some(current) = queue.pop_front() {
        let d = remaining[current];
        if current == from {
            break;
        }
        for relation in graph.incoming(current) {
            if graph.contains_entity(&relation.head) && !remaining.contains_key(&relation.head) {
                remaining.insert(&relation.head, d + 1);
                queue.push_back(&relation.head);
            }
        }
    }

    let Some(&total) = remaining.get(from) else {
        return Ok(PathOutcome::NoPath);
    };

    // Forward walk choosing the preferred relation at every hop
    let mut path = Vec::with_capacity(total);
    let mut current = from;
    for step in 0..total {
        let wanted = total - step - 1;
        let next = graph
            .outgoing(current)
            .into_iter()
            .filter(|r| remaining.get(&r.tail) == Some(&wanted))
            .min_by(|a, b| hop_preference(a, b));
        match next {
            Some(relation) => {
                path.push(relation.id.clone());
                current = &relation.tail;
            }
            None => return Ok(PathOutcome::NoPath),
        }
    }
    Ok(PathOutcome::Found(path))
}

/// Entities within `depth` undirected hops of any seed, seeds included
pub fn expand_neighborhood(graph: &KnowledgeGraph, seeds: &[EntityId], depth: usize) -> BTreeSet<EntityId> {
    let mut visited: BTreeSet<EntityId> = BTreeSet::new();
    let mut queue: VecDeque<(EntityId, usize)> = VecDeque::new();
    for seed in seeds {
        if graph.contains_entity(seed) && visited.insert(seed.clone()) {
            queue.push_back((seed.clone(), 0));
        }
    }
    while let Some((current, d)) = queue.pop_front() {
        if d >= depth {
            continue;
        }
        for neighbor in graph.neighbors(&current, Direction::Both) {
            if graph.contains_entity(neighbor) && visited.insert(neighbor.clone()) {
                queue.push_back((neighbor.clone(), d + 1));
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, EntityType, RelationType};

    fn node(graph: &mut KnowledgeGraph, name: &str) -> EntityId {
        let e = Entity::new(name, EntityType::new("node").unwrap());
        let id = e.id.clone();
        graph.upsert_entity(e);
        id
    }

    fn link(graph: &mut KnowledgeGraph, a: &EntityId, b: &EntityId, ty: &str, weight: f64) -> RelationId {
        let r = Relation::new(a.clone(), b.clone(), RelationType::new(ty).unwrap()).with_weight(weight);
        let id = r.id.clone();
        graph.upsert_relation(r).unwrap();
        id
    }

    #[test]
    fn test_three_hop_chain() {
        let mut g = KnowledgeGraph::new("chain");
        let a = node(&mut g, "A");
        let b = node(&mut g, "B");
        let c = node(&mut g, "C");
        let d = node(&mut g, "D");
        let ab = link(&mut g, &a, &b, "next", 1.0);
        let bc = link(&mut g, &b, &c, "next", 1.0);
        let cd = link(&mut g, &c, &d, "next", 1.0);

        assert_eq!(shortest_path(&g, &a, &d).unwrap(), PathOutcome::Found(vec![ab, bc, cd]));
        assert_eq!(shortest_path(&g, &a, &a).unwrap(), PathOutcome::Found(vec![]));
        assert_eq!(shortest_path(&g, &d, &a).unwrap(), PathOutcome::NoPath);
    }

    #[test]
    fn test_tie_break_prefers_weight_then_type() {
        let mut g = KnowledgeGraph::new("ties");
        let a = node(&mut g, "A");
        let b = node(&mut g, "B");
        let c = node(&mut g, "C");
        let t = node(&mut g, "T");

        // A->B->T (weights 1) vs A->C->T (first hop heavier)
        link(&mut g, &a, &b, "road", 1.0);
        link(&mut g, &b, &t, "road", 1.0);
        let ac = link(&mut g, &a, &c, "road", 3.0);
        let ct = link(&mut g, &c, &t, "road", 1.0);
        assert_eq!(shortest_path(&g, &a, &t).unwrap(), PathOutcome::Found(vec![ac.clone(), ct.clone()]));

        // Parallel relation of equal weight with a lexically smaller type
        let ac_alt = link(&mut g, &a, &c, "air", 3.0);
        assert_eq!(shortest_path(&g, &a, &t).unwrap(), PathOutcome::Found(vec![ac_alt, ct]));
    }

    #[test]
    fn test_unknown_entity_is_an_error() {
        let mut g = KnowledgeGraph::new("g");
        let a = node(&mut g, "A");
        let ghost = EntityId::new("ghost");
        assert_eq!(shortest_path(&g, &a, &ghost), Err(GraphError::EntityNotFound(ghost)));
    }

    #[test]
    fn test_expand_neighborhood() {
        let mut g = KnowledgeGraph::new("g");
        let a = node(&mut g, "A");
        let b = node(&mut g, "B");
        let c = node(&mut g, "C");
        link(&mut g, &a, &b, "next", 1.0);
        link(&mut g, &c, &b, "next", 1.0);

        assert_eq!(expand_neighborhood(&g, &[a.clone()], 0).len(), 1);
        assert_eq!(expand_neighborhood(&g, &[a.clone()], 1).len(), 2);
        assert_eq!(expand_neighborhood(&g, &[a], 2).len(), 3);
    }
}
