use crate::graph::KnowledgeGraph;
use serde::{Deserialize, Serialize};

const MIN_SIZE: f64 = 5.0;
const MAX_SIZE: f64 = 20.0;
const SIZE_SCALE: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VizNode {
    pub id: String,
    pub display_name: String,
    pub category_index: usize,
    pub size_hint: f64,
    /// Weighted degree
    pub numeric_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VizEdge {
    pub source: String,
    pub target: String,
    /// Registry display bucket of the relation type
    pub relation_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VizCategory {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualizationGraph {
    pub nodes: Vec<VizNode>,
    pub edges: Vec<VizEdge>,
    pub categories: Vec<VizCategory>,
}

impl VisualizationGraph {
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        let mut entities: Vec<_> = graph.entities().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        let nodes = entities
            .into_iter()
            .map(|e| VizNode {
                id: e.id.to_string(),
                display_name: e.name.clone(),
                category_index: graph.category_index(&e.entity_type).unwrap_or_default(),
                size_hint: (e.confidence * SIZE_SCALE).clamp(MIN_SIZE, MAX_SIZE),
                numeric_value: graph.weighted_degree(&e.id),
            })
            .collect();

        let mut relations: Vec<_> = graph.relations().collect();
        relations.sort_by(|a, b| a.id.cmp(&b.id));
        let edges = relations
            .into_iter()
            .map(|r| VizEdge {
                source: r.head.to_string(),
                target: r.tail.to_string(),
                relation_type: graph.registry().display_bucket(&r.relation_type).to_string(),
            })
            .collect();

        let categories = graph
            .categories()
            .map(|c| VizCategory {
                name: c.as_str().to_string(),
            })
            .collect();

        Self {
            nodes,
            edges,
            categories,
        }
    }
}

impl From<&KnowledgeGraph> for VisualizationGraph {
    fn from(graph: &KnowledgeGraph) -> Self {
        Self::from_graph(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, EntityType, Relation, RelationType, OTHER_BUCKET};

    #[test]
    fn test_visualization_shape() {
        let mut graph = KnowledgeGraph::new("viz");
        let city = Entity::new("Beijing", EntityType::new("city").unwrap()).with_confidence(0.1);
        let country = Entity::new("China", EntityType::new("country").unwrap()).with_confidence(0.9);
        let (b, c) = (city.id.clone(), country.id.clone());
        graph.upsert_entity(city);
        graph.upsert_entity(country);
        graph
            .upsert_relation(Relation::new(b.clone(), c.clone(), RelationType::new("capital_of").unwrap()).with_weight(2.0))
            .unwrap();
        graph
            .upsert_relation(Relation::new(c.clone(), b.clone(), RelationType::new("twinned_with").unwrap()))
            .unwrap();

        let viz = VisualizationGraph::from_graph(&graph);
        assert_eq!(viz.categories.len(), 2);
        assert_eq!(viz.categories[0].name, "city");

        let beijing = viz.nodes.iter().find(|n| n.display_name == "Beijing").unwrap();
        assert_eq!(beijing.size_hint, MIN_SIZE);
        assert_eq!(beijing.category_index, 0);
        assert!((beijing.numeric_value - 3.0).abs() < 1e-9);
        let china = viz.nodes.iter().find(|n| n.display_name == "China").unwrap();
        assert!((china.size_hint - 13.5).abs() < 1e-9);

        let buckets: Vec<&str> = viz.edges.iter().map(|e| e.relation_type.as_str()).collect();
        assert!(buckets.contains(&"capital_of"));
        assert!(buckets.contains(&OTHER_BUCKET));
    }
}
