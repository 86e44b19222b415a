use knowgraph::builder::RuleBasedBackend;
use knowgraph::config::SearchConfig;
use knowgraph::extract::{ColumnSchema, ForeignKey, TableSchema};
use knowgraph::{
    metrics, shortest_path, validate_consistency, AugmentedGraphBuilder, CancelToken, EmbeddingConfig,
    EmbeddingTrainer, ExtractionSettings, FileGraphStorage, GraphStorage, HashingLanguageModel, PathOutcome,
    SchemaDescription, SearchMode, SourceText, StandardGraphBuilder, VisualizationGraph,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Knowgraph v{}", knowgraph::version());
    println!("==========================================");
    println!();

    let graph = demo_build()?;
    demo_analytics(&graph)?;
    demo_storage(&graph)?;
    demo_embeddings(&graph).await?;
    demo_search().await?;
    Ok(())
}

fn corpus() -> Vec<SourceText> {
    vec![
        SourceText::with_id("doc-beijing", "Beijing is the capital of China. Tsinghua University is located in Beijing."),
        SourceText::with_id("doc-shanghai", "Shanghai is a municipality of China. Fudan University is located in Shanghai."),
    ]
}

fn demo_build() -> anyhow::Result<knowgraph::KnowledgeGraph> {
    println!("=== Demo 1: Building a graph ===");
    let column = |name: &str, primary_key: bool| ColumnSchema {
        name: name.to_string(),
        data_type: Some("integer".to_string()),
        nullable: !primary_key,
        primary_key,
        comment: None,
    };
    let schema = SchemaDescription {
        database_name: Some("campus".to_string()),
        tables: vec![
            TableSchema {
                name: "students".to_string(),
                columns: vec![column("id", true), column("university_id", false)],
                foreign_keys: vec![ForeignKey {
                    column: "university_id".to_string(),
                    references_table: "universities".to_string(),
                    references_column: "id".to_string(),
                }],
                ..TableSchema::default()
            },
            TableSchema {
                name: "universities".to_string(),
                columns: vec![column("id", true)],
                ..TableSchema::default()
            },
        ],
    };

    let builder = StandardGraphBuilder::new(&ExtractionSettings::default())?;
    let built = builder.build(&corpus(), Some(&schema), "demo")?;
    println!(
        "✓ {} entities, {} relations from {} units ({} skipped)",
        built.graph.entity_count(),
        built.graph.relation_count(),
        built.report.units_total,
        built.report.units_skipped
    );
    for entity in built.graph.entities().take(8) {
        println!("  - {} ({})", entity.name, entity.entity_type);
    }
    Ok(built.graph)
}

fn demo_analytics(graph: &knowgraph::KnowledgeGraph) -> anyhow::Result<()> {
    println!("\n=== Demo 2: Analytics ===");
    let m = metrics(graph);
    println!(
        "✓ average degree {:.2}, {} connected components, density {:.3}",
        m.average_degree, m.connected_components, m.density
    );

    let tsinghua = graph.find_by_name("Tsinghua University");
    let china = graph.find_by_name("China");
    if let (Some(from), Some(to)) = (tsinghua.first(), china.first()) {
        match shortest_path(graph, &from.id, &to.id)? {
            PathOutcome::Found(path) => println!("✓ {} -> {} in {} hops", from.name, to.name, path.len()),
            PathOutcome::NoPath => println!("✗ {} cannot reach {}", from.name, to.name),
        }
    }

    let violations = validate_consistency(graph);
    println!("✓ {} consistency violations", violations.len());

    let viz = VisualizationGraph::from_graph(graph);
    println!(
        "✓ visualization: {} nodes, {} edges, {} categories",
        viz.nodes.len(),
        viz.edges.len(),
        viz.categories.len()
    );
    Ok(())
}

fn demo_storage(graph: &knowgraph::KnowledgeGraph) -> anyhow::Result<()> {
    println!("\n=== Demo 3: Persistence ===");
    let root = std::env::temp_dir().join("knowgraph-demo");
    let storage = FileGraphStorage::new(&root);
    let id = storage.save(graph)?;
    let loaded = storage.load(&id)?;
    println!("✓ saved and reloaded {} under {:?}", id, root);
    println!("✓ round trip intact: {}", loaded.snapshot() == graph.snapshot());
    storage.delete(&id)?;
    Ok(())
}

async fn demo_embeddings(graph: &knowgraph::KnowledgeGraph) -> anyhow::Result<()> {
    println!("\n=== Demo 4: Entity embeddings ===");
    let config = EmbeddingConfig {
        dimension: 16,
        epochs: 5,
        walks_per_entity: 5,
        walk_length: 10,
        ..EmbeddingConfig::default()
    };
    let trainer = EmbeddingTrainer::new(config)?;
    let outcome = trainer
        .spawn(Arc::new(graph.clone()), None, CancelToken::new())
        .await?;
    println!(
        "✓ {:?} after {} epochs, final loss {:?}",
        outcome.status, outcome.epochs_run, outcome.final_loss
    );
    if let Some(beijing) = graph.find_by_name("Beijing").first() {
        for (id, score) in outcome.model.most_similar(&beijing.id, 3) {
            let name = graph.entity(&id).map_or(id.as_str(), |e| e.name.as_str());
            println!("  - {} ({:.3})", name, score);
        }
    }
    Ok(())
}

async fn demo_search() -> anyhow::Result<()> {
    println!("\n=== Demo 5: Retrieval-augmented search ===");
    let backend = RuleBasedBackend::new(&ExtractionSettings::default())?;
    let builder = AugmentedGraphBuilder::new(
        Arc::new(backend),
        Arc::new(HashingLanguageModel::default()),
        SearchConfig::default(),
    );
    let built = builder.build(&corpus(), "search-demo").await?;
    for (query, mode) in [
        ("What is located in Beijing?", SearchMode::Local),
        ("Which universities are there?", SearchMode::Global),
        ("Tell me about Shanghai", SearchMode::Hybrid),
    ] {
        let result = builder.search(&built.graph, query, mode).await?;
        println!("✓ [{} -> {}] {}", result.requested_mode, result.mode, query);
        println!("  {}", result.answer.lines().next().unwrap_or_default());
    }
    Ok(())
}
