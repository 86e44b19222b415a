use knowgraph::embedding::{neighborhood_fingerprint, Algorithm};
use knowgraph::{
    CancelToken, EmbeddingConfig, EmbeddingError, EmbeddingModel, EmbeddingTrainer, Entity, EntityId, EntityType,
    KnowledgeGraph, Relation, RelationType, TrainingStatus,
};
use std::sync::Arc;

/// Two triangles joined by a single bridge
fn two_clusters() -> (KnowledgeGraph, Vec<EntityId>) {
    let mut graph = KnowledgeGraph::new("clusters");
    let ty = EntityType::new("node").unwrap();
    let related = RelationType::new("related_to").unwrap();
    let ids: Vec<EntityId> = ["a1", "a2", "a3", "b1", "b2", "b3"]
        .iter()
        .map(|name| {
            let entity = Entity::new(*name, ty.clone());
            let id = entity.id.clone();
            graph.upsert_entity(entity);
            id
        })
        .collect();
    for (h, t) in [(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3), (2, 3)] {
        graph
            .upsert_relation(Relation::new(ids[h].clone(), ids[t].clone(), related.clone()))
            .unwrap();
    }
    (graph, ids)
}

fn small_config(algorithm: Algorithm) -> EmbeddingConfig {
    EmbeddingConfig {
        algorithm,
        dimension: 16,
        epochs: 3,
        walks_per_entity: 4,
        walk_length: 8,
        ..EmbeddingConfig::default()
    }
}

fn vector(model: &EmbeddingModel, id: &EntityId) -> Vec<f32> {
    model.get_vector(id).unwrap().to_vec()
}

#[tokio::test]
async fn test_spawned_training_covers_every_entity() {
    let (graph, ids) = two_clusters();
    for algorithm in [Algorithm::RandomWalk, Algorithm::Translation] {
        let trainer = EmbeddingTrainer::new(small_config(algorithm)).unwrap();
        let outcome = trainer
            .spawn(Arc::new(graph.clone()), None, CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TrainingStatus::Completed);
        assert_eq!(outcome.epochs_run, 3);
        assert_eq!(outcome.loss_history.len(), 3);
        assert!(outcome.final_loss.is_some());
        assert_eq!(outcome.model.algorithm(), algorithm);
        assert_eq!(outcome.model.len(), ids.len());
        assert_eq!(outcome.model.dimension(), 16);

        let similar = outcome.model.most_similar(&ids[0], 10);
        assert_eq!(similar.len(), ids.len() - 1);
        assert!(similar.iter().all(|(id, _)| *id != ids[0]));
        assert!(similar.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}

#[tokio::test]
async fn test_warm_start_freezes_unchanged_neighborhoods() {
    let (graph, ids) = two_clusters();
    let config = small_config(Algorithm::RandomWalk);
    let first = EmbeddingTrainer::new(config.clone())
        .unwrap()
        .spawn(Arc::new(graph.clone()), None, CancelToken::new())
        .await
        .unwrap()
        .model;

    // Hang a new leaf off b3; b3's neighborhood changes, the a-cluster does not
    let mut grown = graph.clone();
    let leaf = Entity::new("b4", EntityType::new("node").unwrap());
    let leaf_id = leaf.id.clone();
    grown.upsert_entity(leaf);
    grown
        .upsert_relation(Relation::new(
            ids[5].clone(),
            leaf_id.clone(),
            RelationType::new("related_to").unwrap(),
        ))
        .unwrap();

    let second = EmbeddingTrainer::new(config)
        .unwrap()
        .spawn(Arc::new(grown.clone()), Some(first.clone()), CancelToken::new())
        .await
        .unwrap()
        .model;

    assert_eq!(second.len(), ids.len() + 1);
    assert!(second.get_vector(&leaf_id).is_some());
    for id in &ids[..2] {
        assert_eq!(second.fingerprint(id), first.fingerprint(id));
        assert_eq!(vector(&second, id), vector(&first, id), "{} moved", id);
    }
    assert_ne!(second.fingerprint(&ids[5]), first.fingerprint(&ids[5]));
    assert_eq!(second.fingerprint(&ids[5]), Some(neighborhood_fingerprint(&grown, &ids[5])));
}

#[tokio::test]
async fn test_incompatible_previous_model_is_ignored() {
    let (graph, ids) = two_clusters();
    let graph = Arc::new(graph);
    let first = EmbeddingTrainer::new(small_config(Algorithm::RandomWalk))
        .unwrap()
        .spawn(graph.clone(), None, CancelToken::new())
        .await
        .unwrap()
        .model;

    let wider = EmbeddingConfig {
        dimension: 8,
        ..small_config(Algorithm::RandomWalk)
    };
    let second = EmbeddingTrainer::new(wider)
        .unwrap()
        .spawn(graph, Some(first), CancelToken::new())
        .await
        .unwrap()
        .model;
    assert_eq!(second.dimension(), 8);
    assert_eq!(second.len(), ids.len());
}

#[tokio::test]
async fn test_cancellation_returns_usable_model() {
    let (graph, ids) = two_clusters();
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = EmbeddingTrainer::new(small_config(Algorithm::Translation))
        .unwrap()
        .spawn(Arc::new(graph), None, cancel)
        .await
        .unwrap();

    assert_eq!(outcome.status, TrainingStatus::Cancelled);
    assert_eq!(outcome.epochs_run, 0);
    assert!(outcome.final_loss.is_none());
    assert_eq!(outcome.model.len(), ids.len());
    let score = outcome.model.similarity(&ids[0], &ids[1]).unwrap();
    assert!((-1.0..=1.0).contains(&score));
}

#[tokio::test]
async fn test_time_budget_stops_training() {
    let (graph, _) = two_clusters();
    let config = EmbeddingConfig {
        time_budget_ms: Some(0),
        epochs: 1000,
        ..small_config(Algorithm::RandomWalk)
    };
    let outcome = EmbeddingTrainer::new(config)
        .unwrap()
        .spawn(Arc::new(graph), None, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, TrainingStatus::TimedOut);
    assert!(outcome.epochs_run < 1000);
}

#[tokio::test]
async fn test_empty_graph_is_rejected() {
    let trainer = EmbeddingTrainer::new(small_config(Algorithm::RandomWalk)).unwrap();
    let err = trainer
        .spawn(Arc::new(KnowledgeGraph::new("empty")), None, CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, EmbeddingError::EmptyGraph);
}
