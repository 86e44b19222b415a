//! Knowgraph CLI: build, inspect and export stored knowledge graphs
//!
//! Graphs live in the storage backend named by the configuration file
//! (`--config`, YAML) after environment overrides are applied.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use knowgraph::embedding::Algorithm;
use knowgraph::{
    metrics, read_graphml, shortest_path, validate_consistency, write_graphml, CancelToken, EmbeddingTrainer,
    Entity, EntityId, GraphId, GraphStorage, KnowledgeConfig, KnowledgeGraph, PathOutcome, SchemaDescription,
    SourceText, StandardGraphBuilder, VisualizationGraph,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kg", version, about = "Knowledge graph command line")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true, env = "KNOWGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Clone, clap::ValueEnum)]
enum ExportFormat {
    Graphml,
    Viz,
}

#[derive(Clone, clap::ValueEnum)]
enum EmbeddingAlgorithm {
    RandomWalk,
    Translation,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a graph from text files and an optional schema description
    Build {
        /// Graph name
        #[arg(long)]
        name: String,

        /// Schema description (JSON)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Text files, one extraction unit each
        files: Vec<PathBuf>,
    },
    /// Add text files to a stored graph
    Update { graph: String, files: Vec<PathBuf> },
    /// Import a GraphML file as a stored graph
    Import { file: PathBuf },
    /// List stored graphs
    List,
    /// Show graph metrics
    Stats { graph: String },
    /// Check a stored graph for consistency violations
    Validate { graph: String },
    /// Shortest directed path between two entities (ids or names)
    Path { graph: String, from: String, to: String },
    /// Run a native pattern query (graph-database backend only)
    Query { graph: String, query: String },
    /// Export a stored graph
    Export {
        graph: String,

        #[arg(long = "as", default_value = "graphml")]
        format: ExportFormat,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Train entity embeddings and list the nearest neighbors of an entity
    Similar {
        graph: String,
        entity: String,

        #[arg(short, default_value_t = 5)]
        k: usize,

        #[arg(long, default_value = "random-walk")]
        algorithm: EmbeddingAlgorithm,
    },
    /// Delete a stored graph
    Delete { graph: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => KnowledgeConfig::from_yaml_file(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => KnowledgeConfig::default(),
    };
    config.apply_env()?;
    let storage = knowgraph::open_storage(&config.storage)?;
    let format = &cli.format;

    match cli.command {
        Commands::Build { name, schema, files } => {
            let schema = schema.map(|p| read_schema(&p)).transpose()?;
            let texts = read_units(&files)?;
            let builder = StandardGraphBuilder::new(&config.extraction)?;
            let built = builder.build(&texts, schema.as_ref(), &name)?;
            let id = storage.save(&built.graph)?;
            print_build(format, &id, &built.graph, built.report.units_total, built.report.units_skipped)
        }
        Commands::Update { graph, files } => {
            let mut kg = storage.load(&GraphId::new(graph))?;
            let texts = read_units(&files)?;
            let builder = StandardGraphBuilder::new(&config.extraction)?;
            let report = builder.update(&mut kg, &texts)?;
            let id = storage.save(&kg)?;
            print_build(format, &id, &kg, report.units_total, report.units_skipped)
        }
        Commands::Import { file } => {
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let kg = read_graphml(&bytes)?;
            let id = storage.save(&kg)?;
            print_build(format, &id, &kg, 0, 0)
        }
        Commands::List => run_list(storage.as_ref(), format),
        Commands::Stats { graph } => {
            let kg = storage.load(&GraphId::new(graph))?;
            run_stats(&kg, format)
        }
        Commands::Validate { graph } => {
            let kg = storage.load(&GraphId::new(graph))?;
            run_validate(&kg, format)
        }
        Commands::Path { graph, from, to } => {
            let kg = storage.load(&GraphId::new(graph))?;
            run_path(&kg, &from, &to, format)
        }
        Commands::Query { graph, query } => {
            let native = storage
                .as_native_query()
                .ok_or_else(|| anyhow!("{} storage does not support native queries", storage.backend_name()))?;
            let result = native.native_query(&GraphId::new(graph), &query)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Table => {
                    let mut table = new_table(result.columns.as_slice());
                    for row in &result.rows {
                        table.add_row(row.iter().map(format_table_value).collect::<Vec<_>>());
                    }
                    println!("{}", table);
                    println!("{} row(s)", result.len());
                }
            }
            Ok(())
        }
        Commands::Export { graph, format: as_format, output } => {
            let kg = storage.load(&GraphId::new(graph))?;
            let bytes = match as_format {
                ExportFormat::Graphml => write_graphml(&kg)?,
                ExportFormat::Viz => serde_json::to_vec_pretty(&VisualizationGraph::from_graph(&kg))?,
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("Wrote {} bytes to {}", bytes.len(), path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&bytes)),
            }
            Ok(())
        }
        Commands::Similar { graph, entity, k, algorithm } => {
            let kg = storage.load(&GraphId::new(graph))?;
            let target = resolve_entity(&kg, &entity)?.id.clone();
            let mut embedding = config.embedding.clone();
            embedding.algorithm = match algorithm {
                EmbeddingAlgorithm::RandomWalk => Algorithm::RandomWalk,
                EmbeddingAlgorithm::Translation => Algorithm::Translation,
            };
            let kg = Arc::new(kg);
            let outcome = EmbeddingTrainer::new(embedding)?
                .spawn(kg.clone(), None, CancelToken::new())
                .await?;
            eprintln!("Training {:?} after {} epoch(s)", outcome.status, outcome.epochs_run);
            let neighbors = outcome.model.most_similar(&target, k);
            match format {
                OutputFormat::Json => {
                    let rows: Vec<_> = neighbors
                        .iter()
                        .map(|(id, score)| serde_json::json!({ "id": id, "score": score }))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
                OutputFormat::Table => {
                    let mut table = new_table(&["Entity", "Type", "Similarity"]);
                    for (id, score) in &neighbors {
                        let (name, ty) = kg
                            .entity(id)
                            .map_or((id.to_string(), String::new()), |e| (e.name.clone(), e.entity_type.to_string()));
                        table.add_row(vec![name, ty, format!("{:.4}", score)]);
                    }
                    println!("{}", table);
                }
            }
            Ok(())
        }
        Commands::Delete { graph } => {
            storage.delete(&GraphId::new(graph.clone()))?;
            println!("Deleted {}", graph);
            Ok(())
        }
    }
}

fn read_units(files: &[PathBuf]) -> anyhow::Result<Vec<SourceText>> {
    files
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            let id = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(SourceText::with_id(id, text))
        })
        .collect()
}

fn read_schema(path: &Path) -> anyhow::Result<SchemaDescription> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing schema {}", path.display()))
}

/// Look an entity up by id, falling back to its name
fn resolve_entity<'a>(graph: &'a KnowledgeGraph, key: &str) -> anyhow::Result<&'a Entity> {
    if let Some(entity) = graph.entity(&EntityId::new(key)) {
        return Ok(entity);
    }
    let found = graph.find_by_name(key);
    match found.as_slice() {
        [] => bail!("no entity named {:?}", key),
        [only] => Ok(*only),
        [first, ..] => {
            eprintln!("{:?} is ambiguous ({} entities), using {}", key, found.len(), first.id);
            Ok(*first)
        }
    }
}

fn new_table<S: ToString>(header: &[S]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header.iter().map(|h| h.to_string()).collect::<Vec<_>>());
    table
}

fn print_build(
    format: &OutputFormat,
    id: &GraphId,
    graph: &KnowledgeGraph,
    units: usize,
    skipped: usize,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "id": id,
                "name": graph.name(),
                "version": graph.version(),
                "entities": graph.entity_count(),
                "relations": graph.relation_count(),
                "units": units,
                "skipped": skipped,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Table => {
            println!("Graph:     {} ({})", id, graph.name());
            println!("Version:   {}", graph.version());
            println!("Entities:  {}", graph.entity_count());
            println!("Relations: {}", graph.relation_count());
            if units > 0 {
                println!("Units:     {} ({} skipped)", units, skipped);
            }
        }
    }
    Ok(())
}

fn run_list(storage: &dyn GraphStorage, format: &OutputFormat) -> anyhow::Result<()> {
    let graphs = storage.list_graphs()?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&graphs)?),
        OutputFormat::Table => {
            if graphs.is_empty() {
                println!("(no graphs)");
                return Ok(());
            }
            let mut table = new_table(&["Id", "Name", "Version", "Entities", "Relations"]);
            for g in &graphs {
                table.add_row(vec![
                    g.id.to_string(),
                    g.name.clone(),
                    g.version.to_string(),
                    g.entity_count.to_string(),
                    g.relation_count.to_string(),
                ]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}

fn run_stats(graph: &KnowledgeGraph, format: &OutputFormat) -> anyhow::Result<()> {
    let m = metrics(graph);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&m)?),
        OutputFormat::Table => {
            let mut table = new_table(&["Metric", "Value"]);
            table.add_row(vec!["Entities".to_string(), m.entity_count.to_string()]);
            table.add_row(vec!["Relations".to_string(), m.relation_count.to_string()]);
            table.add_row(vec!["Average degree".to_string(), format!("{:.3}", m.average_degree)]);
            table.add_row(vec!["Density".to_string(), format!("{:.4}", m.density)]);
            table.add_row(vec!["Components".to_string(), m.connected_components.to_string()]);
            table.add_row(vec!["Largest component".to_string(), m.largest_component.to_string()]);
            table.add_row(vec!["Isolated entities".to_string(), m.isolated_entities.to_string()]);
            for (category, count) in &m.category_histogram {
                table.add_row(vec![format!("type: {}", category), count.to_string()]);
            }
            for (relation_type, count) in &m.relation_type_histogram {
                table.add_row(vec![format!("relation: {}", relation_type), count.to_string()]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}

fn run_validate(graph: &KnowledgeGraph, format: &OutputFormat) -> anyhow::Result<()> {
    let violations = validate_consistency(graph);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&violations)?),
        OutputFormat::Table => {
            if violations.is_empty() {
                println!("No violations");
                return Ok(());
            }
            let mut table = new_table(&["Severity", "Violation"]);
            for v in &violations {
                let severity = if v.is_severe() { "severe" } else { "warning" };
                table.add_row(vec![severity.to_string(), v.to_string()]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}

fn run_path(graph: &KnowledgeGraph, from: &str, to: &str, format: &OutputFormat) -> anyhow::Result<()> {
    let from = resolve_entity(graph, from)?;
    let to = resolve_entity(graph, to)?;
    let outcome = shortest_path(graph, &from.id, &to.id)?;
    let PathOutcome::Found(path) = outcome else {
        println!("No path from {} to {}", from.name, to.name);
        return Ok(());
    };

    let hops: Vec<_> = path.iter().filter_map(|id| graph.relation(id)).collect();
    let name = |id: &EntityId| graph.entity(id).map_or_else(|| id.to_string(), |e| e.name.clone());
    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = hops
                .iter()
                .map(|r| serde_json::json!({ "id": r.id, "head": r.head, "relation_type": r.relation_type, "tail": r.tail }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            let mut table = new_table(&["Head", "Relation", "Tail", "Weight"]);
            for r in &hops {
                table.add_row(vec![
                    name(&r.head),
                    r.relation_type.to_string(),
                    name(&r.tail),
                    format!("{}", r.weight),
                ]);
            }
            println!("{}", table);
            println!("{} hop(s)", hops.len());
        }
    }
    Ok(())
}

fn format_table_value(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => {
            // Entities and relations show their name or type
            map.get("name")
                .or_else(|| map.get("relation_type"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| val.to_string())
        }
        other => other.to_string(),
    }
}
