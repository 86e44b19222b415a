//! Merge engine: folds extraction candidates into a graph
//!
//! Candidates become entities with derived ids and relations keyed by
//! (head, tail, relation_type). The fold is associative and commutative
//! over input units, so the order in which a worker pool delivers unit
//! results does not change the final entity and relation sets.

use crate::extract::UnitExtraction;
use crate::graph::{Entity, EntityId, KnowledgeGraph, Relation, Upsert};
use std::ops::AddAssign;
use tracing::debug;

/// Counters collected while folding candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub entities_added: usize,
    pub entities_merged: usize,
    pub relations_added: usize,
    pub relations_merged: usize,
    /// Deterministic tie-breaks applied during merges, never surfaced as errors
    pub conflicts_resolved: usize,
    pub self_loops_dropped: usize,
    pub dangling_dropped: usize,
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.entities_added += other.entities_added;
        self.entities_merged += other.entities_merged;
        self.relations_added += other.relations_added;
        self.relations_merged += other.relations_merged;
        self.conflicts_resolved += other.conflicts_resolved;
        self.self_loops_dropped += other.self_loops_dropped;
        self.dangling_dropped += other.dangling_dropped;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine {
    allow_self_loops: bool,
}

impl MergeEngine {
    pub fn new(allow_self_loops: bool) -> Self {
        Self { allow_self_loops }
    }

    /// Fold one unit's candidates into `graph`
    pub fn fold(&self, graph: &mut KnowledgeGraph, unit: &UnitExtraction) -> MergeStats {
        let mut stats = MergeStats::default();
        let mut ids: Vec<EntityId> = Vec::with_capacity(unit.entities.len());

        for candidate in &unit.entities {
            let mut entity = Entity::new(candidate.name.trim(), candidate.entity_type.clone())
                .with_confidence(candidate.confidence)
                .with_source(unit.source_id.clone());
            entity.description = candidate.description.clone();
            for (key, value) in &candidate.attributes {
                entity.attributes.insert(key.clone(), value.clone());
            }
            ids.push(entity.id.clone());
            self.record(graph.upsert_entity(entity), &mut stats, true);
        }

        for candidate in &unit.relations {
            let (Some(head), Some(tail)) = (ids.get(candidate.head), ids.get(candidate.tail)) else {
                stats.dangling_dropped += 1;
                continue;
            };
            if head == tail && !self.allow_self_loops {
                stats.self_loops_dropped += 1;
                continue;
            }
            let mut relation = Relation::new(head.clone(), tail.clone(), candidate.relation_type.clone())
                .with_confidence(candidate.confidence)
                .with_source(unit.source_id.clone());
            relation.description = candidate.description.clone();
            if head == tail {
                relation = relation.allowing_self_loop();
            }
            match graph.upsert_relation(relation) {
                Ok(outcome) => self.record(outcome, &mut stats, false),
                Err(e) => {
                    debug!(source = %unit.source_id, error = %e, "Dropped candidate relation");
                    stats.dangling_dropped += 1;
                }
            }
        }

        if stats.conflicts_resolved > 0 {
            debug!(
                source = %unit.source_id,
                conflicts = stats.conflicts_resolved,
                "Resolved merge conflicts by tie-break"
            );
        }
        stats
    }

    fn record(&self, outcome: Upsert, stats: &mut MergeStats, entity: bool) {
        match (outcome, entity) {
            (Upsert::Inserted, true) => stats.entities_added += 1,
            (Upsert::Inserted, false) => stats.relations_added += 1,
            (Upsert::Merged { conflicts }, true) => {
                stats.entities_merged += 1;
                stats.conflicts_resolved += conflicts;
            }
            (Upsert::Merged { conflicts }, false) => {
                stats.relations_merged += 1;
                stats.conflicts_resolved += conflicts;
            }
        }
    }
}

/// Merge every entity and relation of `source` into `target`.
///
/// Relation weights are scaled by `weight`, which lets callers combine
/// graphs built from sources of different reliability.
pub fn merge_graphs(target: &mut KnowledgeGraph, source: &KnowledgeGraph, weight: f64) -> MergeStats {
    let mut stats = MergeStats::default();
    let engine = MergeEngine::default();

    let mut entities: Vec<&Entity> = source.entities().collect();
    entities.sort_by(|a, b| a.id.cmp(&b.id));
    for entity in entities {
        engine.record(target.upsert_entity(entity.clone()), &mut stats, true);
    }

    let mut relations: Vec<&Relation> = source.relations().collect();
    relations.sort_by(|a, b| a.id.cmp(&b.id));
    for relation in relations {
        let mut scaled = relation.clone();
        scaled.weight *= weight;
        match target.upsert_relation(scaled) {
            Ok(outcome) => engine.record(outcome, &mut stats, false),
            Err(_) => stats.dangling_dropped += 1,
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{CandidateEntity, CandidateRelation};
    use crate::graph::{EntityType, RelationType};

    fn unit(source: &str, names: &[(&str, &str)], rels: &[(usize, usize, &str)]) -> UnitExtraction {
        UnitExtraction {
            source_id: source.to_string(),
            entities: names
                .iter()
                .map(|(n, t)| CandidateEntity::new(*n, EntityType::new(t).unwrap(), 0..0, 0.9))
                .collect(),
            relations: rels
                .iter()
                .map(|(h, t, ty)| CandidateRelation {
                    head: *h,
                    tail: *t,
                    relation_type: RelationType::new(ty).unwrap(),
                    confidence: 0.9,
                    description: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_fold_is_order_independent() {
        let a = unit("a", &[("Beijing", "city"), ("China", "country")], &[(0, 1, "capital_of")]);
        let b = unit("b", &[("beijing", "city"), ("Asia", "continent")], &[(0, 1, "located_in")]);
        let engine = MergeEngine::default();

        let mut ab = KnowledgeGraph::new("ab");
        engine.fold(&mut ab, &a);
        engine.fold(&mut ab, &b);
        let mut ba = KnowledgeGraph::new("ba");
        engine.fold(&mut ba, &b);
        engine.fold(&mut ba, &a);

        assert_eq!(ab.entity_ids(), ba.entity_ids());
        assert_eq!(ab.relation_keys(), ba.relation_keys());
        assert_eq!(ab.entity_count(), 3);
    }

    #[test]
    fn test_refolding_doubles_weights_not_sources() {
        let a = unit("a", &[("Beijing", "city"), ("China", "country")], &[(0, 1, "capital_of")]);
        let engine = MergeEngine::default();
        let mut graph = KnowledgeGraph::new("g");
        engine.fold(&mut graph, &a);
        let stats = engine.fold(&mut graph, &a);

        assert_eq!(stats.relations_merged, 1);
        let relation = graph.relations().next().unwrap();
        assert_eq!(relation.weight, 2.0);
        assert_eq!(relation.source_ids.len(), 1);
    }

    #[test]
    fn test_self_loops_dropped_unless_allowed() {
        let looped = unit("a", &[("X", "thing"), ("x", "thing")], &[(0, 1, "is")]);
        let mut graph = KnowledgeGraph::new("g");
        let stats = MergeEngine::default().fold(&mut graph, &looped);
        assert_eq!(stats.self_loops_dropped, 1);
        assert_eq!(graph.relation_count(), 0);

        let stats = MergeEngine::new(true).fold(&mut graph, &looped);
        assert_eq!(stats.relations_added, 1);
    }

    #[test]
    fn test_out_of_range_candidate_is_dropped() {
        let broken = unit("a", &[("X", "thing")], &[(0, 7, "is")]);
        let mut graph = KnowledgeGraph::new("g");
        let stats = MergeEngine::default().fold(&mut graph, &broken);
        assert_eq!(stats.dangling_dropped, 1);
    }

    #[test]
    fn test_merge_graphs_scales_weights() {
        let engine = MergeEngine::default();
        let mut source = KnowledgeGraph::new("source");
        engine.fold(
            &mut source,
            &unit("a", &[("A", "t"), ("B", "t")], &[(0, 1, "knows")]),
        );
        let mut target = KnowledgeGraph::new("target");
        let stats = merge_graphs(&mut target, &source, 0.5);
        assert_eq!(stats.entities_added, 2);
        assert_eq!(target.relations().next().unwrap().weight, 0.5);
    }
}
