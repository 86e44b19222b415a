//! Consistency validation
//!
//! Violations are returned as data. Storage backends decide which ones are
//! fatal for a load.

use crate::graph::{EntityId, EntityType, KnowledgeGraph, RelationId, RelationKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Endpoint {
    Head,
    Tail,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Violation {
    /// A relation endpoint references an entity that does not exist
    DanglingEndpoint {
        relation: RelationId,
        endpoint: Endpoint,
        missing: EntityId,
    },
    /// A category no entity belongs to anymore
    OrphanedCategory { category: EntityType },
    /// Several relations share one (head, tail, relation_type) key
    DuplicateCompositeKey {
        key: RelationKey,
        relations: Vec<RelationId>,
    },
    /// A self loop that was not explicitly allowed
    UnflaggedSelfLoop { relation: RelationId },
}

impl Violation {
    /// Severe violations break referential integrity or key uniqueness
    pub fn is_severe(&self) -> bool {
        !matches!(self, Violation::OrphanedCategory { .. })
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DanglingEndpoint {
                relation,
                endpoint,
                missing,
            } => write!(f, "relation {} has dangling {:?} {}", relation, endpoint, missing),
            Violation::OrphanedCategory { category } => write!(f, "category {} has no entities", category),
            Violation::DuplicateCompositeKey { key, relations } => {
                write!(f, "{} relations share key {}", relations.len(), key)
            }
            Violation::UnflaggedSelfLoop { relation } => write!(f, "relation {} is an unflagged self loop", relation),
        }
    }
}

/// Check referential integrity, categories and key uniqueness
pub fn validate_consistency(graph: &KnowledgeGraph) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut by_key: BTreeMap<RelationKey, Vec<RelationId>> = BTreeMap::new();

    for relation in graph.relations() {
        if !graph.contains_entity(&relation.head) {
            violations.push(Violation::DanglingEndpoint {
                relation: relation.id.clone(),
                endpoint: Endpoint::Head,
                missing: relation.head.clone(),
            });
        }
        if !graph.contains_entity(&relation.tail) {
            violations.push(Violation::DanglingEndpoint {
                relation: relation.id.clone(),
                endpoint: Endpoint::Tail,
                missing: relation.tail.clone(),
            });
        }
        if relation.is_self_loop() && !relation.allow_self_loop {
            violations.push(Violation::UnflaggedSelfLoop {
                relation: relation.id.clone(),
            });
        }
        by_key.entry(relation.key()).or_default().push(relation.id.clone());
    }

    for (key, mut relations) in by_key {
        if relations.len() > 1 {
            relations.sort();
            violations.push(Violation::DuplicateCompositeKey { key, relations });
        }
    }

    let used: BTreeSet<&EntityType> = graph.entities().map(|e| &e.entity_type).collect();
    for category in graph.categories() {
        if !used.contains(category) {
            violations.push(Violation::OrphanedCategory {
                category: category.clone(),
            });
        }
    }

    violations.sort();
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, Relation, RelationType};

    fn sample() -> (KnowledgeGraph, Entity, Entity) {
        let mut g = KnowledgeGraph::new("c");
        let a = Entity::new("A", EntityType::new("person").unwrap());
        let b = Entity::new("B", EntityType::new("city").unwrap());
        g.upsert_entity(a.clone());
        g.upsert_entity(b.clone());
        g.upsert_relation(Relation::new(a.id.clone(), b.id.clone(), RelationType::new("lives_in").unwrap()))
            .unwrap();
        (g, a, b)
    }

    #[test]
    fn test_clean_graph_has_no_violations() {
        let (g, _, _) = sample();
        assert!(validate_consistency(&g).is_empty());
    }

    #[test]
    fn test_dangling_tail_after_deletion() {
        let (g, _, b) = sample();
        // Drop the tail entity from the persisted form, keeping the relation
        let mut snapshot = g.snapshot();
        snapshot.entities.retain(|e| e.id != b.id);
        let broken = KnowledgeGraph::restore(snapshot);

        let violations = validate_consistency(&broken);
        assert!(violations.iter().any(|v| matches!(
            v,
            Violation::DanglingEndpoint { endpoint: Endpoint::Tail, missing, .. } if *missing == b.id
        )));
        assert!(violations.iter().any(|v| v.is_severe()));
    }

    #[test]
    fn test_orphaned_category_after_cascade_delete() {
        let (mut g, _, b) = sample();
        g.remove_entity(&b.id).unwrap();
        let violations = validate_consistency(&g);
        assert_eq!(
            violations,
            vec![Violation::OrphanedCategory {
                category: EntityType::new("city").unwrap()
            }]
        );
        assert!(!violations[0].is_severe());
    }

    #[test]
    fn test_duplicate_composite_key() {
        let (g, _, _) = sample();
        let mut snapshot = g.snapshot();
        let mut copy = snapshot.relations[0].clone();
        copy.id = RelationId::new("rel-copy");
        snapshot.relations.push(copy);
        let broken = KnowledgeGraph::restore(snapshot);

        let violations = validate_consistency(&broken);
        assert!(matches!(
            &violations[..],
            [Violation::DuplicateCompositeKey { relations, .. }] if relations.len() == 2
        ));
    }
}
