use knowgraph::algo::{expand_neighborhood, weakly_connected_components, Endpoint};
use knowgraph::{
    metrics, shortest_path, validate_consistency, Entity, EntityId, EntityType, GraphError, KnowledgeGraph,
    PathOutcome, Relation, RelationId, RelationType, Violation,
};

fn node(graph: &mut KnowledgeGraph, name: &str, ty: &str) -> EntityId {
    let entity = Entity::new(name, EntityType::new(ty).unwrap());
    let id = entity.id.clone();
    graph.upsert_entity(entity);
    id
}

fn link(graph: &mut KnowledgeGraph, head: &EntityId, tail: &EntityId, ty: &str) -> RelationId {
    let relation = Relation::new(head.clone(), tail.clone(), RelationType::new(ty).unwrap());
    let id = relation.id.clone();
    graph.upsert_relation(relation).unwrap();
    id
}

/// Beijing and Shanghai in China, two universities, one isolated concept
fn geo_graph() -> (KnowledgeGraph, Vec<EntityId>) {
    let mut graph = KnowledgeGraph::new("geo");
    let beijing = node(&mut graph, "Beijing", "city");
    let shanghai = node(&mut graph, "Shanghai", "city");
    let china = node(&mut graph, "China", "country");
    let tsinghua = node(&mut graph, "Tsinghua University", "university");
    let fudan = node(&mut graph, "Fudan University", "university");
    let lonely = node(&mut graph, "Entropy", "concept");
    link(&mut graph, &beijing, &china, "capital_of");
    link(&mut graph, &shanghai, &china, "municipality_of");
    link(&mut graph, &tsinghua, &beijing, "located_in");
    link(&mut graph, &fudan, &shanghai, "located_in");
    (graph, vec![beijing, shanghai, china, tsinghua, fudan, lonely])
}

#[test]
fn test_three_hop_chain_path() {
    let mut graph = KnowledgeGraph::new("chain");
    let a = node(&mut graph, "A", "node");
    let b = node(&mut graph, "B", "node");
    let c = node(&mut graph, "C", "node");
    let d = node(&mut graph, "D", "node");
    let ab = link(&mut graph, &a, &b, "next");
    let bc = link(&mut graph, &b, &c, "next");
    let cd = link(&mut graph, &c, &d, "next");

    let outcome = shortest_path(&graph, &a, &d).unwrap();
    assert_eq!(outcome, PathOutcome::Found(vec![ab, bc, cd]));
    assert_eq!(outcome.hops(), Some(3));

    assert_eq!(shortest_path(&graph, &a, &a).unwrap(), PathOutcome::Found(Vec::new()));
    // Relations are directed
    assert_eq!(shortest_path(&graph, &d, &a).unwrap(), PathOutcome::NoPath);
}

#[test]
fn test_path_to_unknown_entity_is_an_error() {
    let (graph, ids) = geo_graph();
    let ghost = EntityId::new("ghost");
    assert!(matches!(
        shortest_path(&graph, &ids[0], &ghost),
        Err(GraphError::EntityNotFound(_))
    ));
}

#[test]
fn test_university_reaches_country_through_city() {
    let (graph, ids) = geo_graph();
    let (china, tsinghua, lonely) = (&ids[2], &ids[3], &ids[5]);

    let path = shortest_path(&graph, tsinghua, china).unwrap();
    let hops: Vec<&str> = path
        .relations()
        .unwrap()
        .iter()
        .map(|id| graph.relation(id).unwrap().relation_type.as_str())
        .collect();
    assert_eq!(hops, vec!["located_in", "capital_of"]);
    assert_eq!(shortest_path(&graph, tsinghua, lonely).unwrap(), PathOutcome::NoPath);
}

#[test]
fn test_neighborhood_expansion_ignores_direction() {
    let (graph, ids) = geo_graph();
    let around_china = expand_neighborhood(&graph, &[ids[2].clone()], 1);
    assert_eq!(around_china.len(), 3);
    assert!(around_china.contains(&ids[0]) && around_china.contains(&ids[1]));

    let wider = expand_neighborhood(&graph, &[ids[2].clone()], 2);
    assert_eq!(wider.len(), 5);
    assert!(!wider.contains(&ids[5]));
}

#[test]
fn test_components_and_metrics() {
    let (graph, ids) = geo_graph();
    let wcc = weakly_connected_components(&graph);
    assert_eq!(wcc.component_count(), 2);
    assert_eq!(wcc.components[0].len(), 5);
    assert_eq!(wcc.entity_component[&ids[0]], wcc.entity_component[&ids[4]]);
    assert_ne!(wcc.entity_component[&ids[0]], wcc.entity_component[&ids[5]]);

    let m = metrics(&graph);
    assert_eq!(m.entity_count, 6);
    assert_eq!(m.relation_count, 4);
    assert_eq!(m.category_histogram["city"], 2);
    assert_eq!(m.category_histogram["concept"], 1);
    assert_eq!(m.relation_type_histogram["located_in"], 2);
    assert_eq!(m.connected_components, 2);
    assert_eq!(m.largest_component, 5);
    assert_eq!(m.isolated_entities, 1);
    assert_eq!(m.max_degree, 2);
    assert!((m.average_degree - 8.0 / 6.0).abs() < 1e-9);
    assert!((m.density - 4.0 / 30.0).abs() < 1e-9);

    // China, Beijing and Shanghai all have degree 2; ties order by id
    let top: Vec<usize> = m.top_entities.iter().map(|(_, d)| *d).collect();
    assert_eq!(&top[..3], &[2, 2, 2]);
    assert!(m.top_entities[0].0 < m.top_entities[1].0);
}

#[test]
fn test_empty_graph_metrics() {
    let m = metrics(&KnowledgeGraph::new("empty"));
    assert_eq!(m.entity_count, 0);
    assert_eq!(m.average_degree, 0.0);
    assert_eq!(m.density, 0.0);
    assert_eq!(m.connected_components, 0);
    assert!(m.top_entities.is_empty());
}

#[test]
fn test_consistent_graph_has_no_violations() {
    let (graph, _) = geo_graph();
    assert!(validate_consistency(&graph).is_empty());
}

#[test]
fn test_restored_snapshot_with_removed_entity_dangles() {
    let (graph, ids) = geo_graph();
    let fudan = ids[4].clone();

    let mut snapshot = graph.snapshot();
    snapshot.entities.retain(|e| e.id != fudan);
    let broken = KnowledgeGraph::restore(snapshot);

    let violations = validate_consistency(&broken);
    let dangling: Vec<&Violation> = violations.iter().filter(|v| v.is_severe()).collect();
    assert_eq!(dangling.len(), 1);
    match dangling[0] {
        Violation::DanglingEndpoint { endpoint, missing, .. } => {
            assert_eq!(*endpoint, Endpoint::Head);
            assert_eq!(*missing, fudan);
        }
        other => panic!("unexpected violation {}", other),
    }
}

#[test]
fn test_restored_snapshot_flags_orphans_and_self_loops() {
    let (graph, ids) = geo_graph();
    let lonely = ids[5].clone();

    let mut snapshot = graph.snapshot();
    snapshot.entities.retain(|e| e.id != lonely);
    let mut looped = Relation::new(ids[2].clone(), ids[2].clone(), RelationType::new("similar_to").unwrap());
    looped.allow_self_loop = false;
    snapshot.relations.push(looped.clone());
    let broken = KnowledgeGraph::restore(snapshot);

    let violations = validate_consistency(&broken);
    assert!(violations.contains(&Violation::OrphanedCategory {
        category: EntityType::new("concept").unwrap()
    }));
    assert!(violations.contains(&Violation::UnflaggedSelfLoop { relation: looped.id }));
    assert_eq!(violations.iter().filter(|v| v.is_severe()).count(), 1);
}
