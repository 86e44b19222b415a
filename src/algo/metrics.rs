//! Graph-level statistics

use super::community::weakly_connected_components;
use crate::graph::{EntityId, KnowledgeGraph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary metrics of a knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub entity_count: usize,
    pub relation_count: usize,
    /// Entity type -> number of entities
    pub category_histogram: BTreeMap<String, usize>,
    /// Mean number of relation endpoints per entity
    pub average_degree: f64,
    /// Weakly connected components
    pub connected_components: usize,
    pub relation_type_histogram: BTreeMap<String, usize>,
    /// Directed density: R / (N * (N - 1))
    pub density: f64,
    pub max_degree: usize,
    pub isolated_entities: usize,
    pub largest_component: usize,
    /// Highest-degree entities, at most [`TOP_ENTITIES`]
    pub top_entities: Vec<(EntityId, usize)>,
}

pub const TOP_ENTITIES: usize = 10;

pub fn metrics(graph: &KnowledgeGraph) -> GraphMetrics {
    let n = graph.entity_count();
    let r = graph.relation_count();

    let mut category_histogram = BTreeMap::new();
    let mut degrees: Vec<(EntityId, usize)> = Vec::with_capacity(n);
    for entity in graph.entities() {
        *category_histogram
            .entry(entity.entity_type.to_string())
            .or_insert(0) += 1;
        degrees.push((entity.id.clone(), graph.degree(&entity.id)));
    }

    let mut relation_type_histogram = BTreeMap::new();
    for relation in graph.relations() {
        *relation_type_histogram
            .entry(relation.relation_type.to_string())
            .or_insert(0) += 1;
    }

    let total_degree: usize = degrees.iter().map(|(_, d)| d).sum();
    let isolated_entities = degrees.iter().filter(|(_, d)| *d == 0).count();
    let max_degree = degrees.iter().map(|(_, d)| *d).max().unwrap_or(0);

    degrees.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    degrees.truncate(TOP_ENTITIES);

    let wcc = weakly_connected_components(graph);

    GraphMetrics {
        entity_count: n,
        relation_count: r,
        category_histogram,
        average_degree: if n == 0 { 0.0 } else { total_degree as f64 / n as f64 },
        connected_components: wcc.component_count(),
        relation_type_histogram,
        density: if n < 2 { 0.0 } else { r as f64 / (n as f64 * (n as f64 - 1.0)) },
        max_degree,
        isolated_entities,
        largest_component: wcc.largest(),
        top_entities: degrees,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, EntityType, Relation, RelationType};

    #[test]
    fn test_metrics() {
        let mut g = KnowledgeGraph::new("m");
        let city = EntityType::new("city").unwrap();
        let beijing = Entity::new("Beijing", city.clone());
        let shanghai = Entity::new("Shanghai", city);
        let china = Entity::new("China", EntityType::new("country").unwrap());
        let lonely = Entity::new("Lonely", EntityType::new("country").unwrap());
        for e in [&beijing, &shanghai, &china, &lonely] {
            g.upsert_entity(e.clone());
        }
        let of = RelationType::new("part_of").unwrap();
        g.upsert_relation(Relation::new(beijing.id.clone(), china.id.clone(), of.clone())).unwrap();
        g.upsert_relation(Relation::new(shanghai.id.clone(), china.id.clone(), of)).unwrap();

        let m = metrics(&g);
        assert_eq!(m.entity_count, 4);
        assert_eq!(m.relation_count, 2);
        assert_eq!(m.category_histogram["city"], 2);
        assert_eq!(m.category_histogram["country"], 2);
        assert!((m.average_degree - 1.0).abs() < 1e-9);
        assert_eq!(m.connected_components, 2);
        assert_eq!(m.isolated_entities, 1);
        assert_eq!(m.max_degree, 2);
        assert_eq!(m.top_entities[0].0, china.id);
        assert_eq!(m.largest_component, 3);
    }

    #[test]
    fn test_empty_graph() {
        let m = metrics(&KnowledgeGraph::new("empty"));
        assert_eq!(m.entity_count, 0);
        assert_eq!(m.average_degree, 0.0);
        assert_eq!(m.connected_components, 0);
    }
}
