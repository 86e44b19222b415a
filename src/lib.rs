//! Knowgraph
//!
//! Knowledge graph construction from unstructured text and relational
//! schema descriptions, with persistence, entity embeddings and analytics.
//!
//! # Architecture
//!
//! - [`extract`]: rule-based entity and relation extractors, schema path
//! - [`merge`]: folds per-unit candidates into a graph deterministically
//! - [`builder`]: standard (rayon) and retrieval-augmented (async) builders
//! - [`storage`]: file and RocksDB backends behind one trait
//! - [`embedding`]: random-walk and translation entity embeddings
//! - [`algo`]: paths, components, metrics and consistency checks
//! - [`export`]: visualization shape and GraphML
//!
//! ## Example Usage
//!
//! ```rust
//! use knowgraph::{ExtractionSettings, SourceText, StandardGraphBuilder};
//!
//! let builder = StandardGraphBuilder::new(&ExtractionSettings::default()).unwrap();
//! let texts = vec![SourceText::new("Tsinghua University is located in Beijing.")];
//! let built = builder.build(&texts, None, "universities").unwrap();
//!
//! let uni = &built.graph.find_by_name("Tsinghua University")[0];
//! assert_eq!(built.graph.outgoing(&uni.id).len(), 1);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod builder;
pub mod config;
pub mod embedding;
pub mod export;
pub mod extract;
pub mod graph;
pub mod llm;
pub mod merge;
pub mod storage;

// Re-export main types for convenience
pub use graph::{
    Direction, Entity, EntityId, EntityType, GraphError, GraphHandle, GraphId, GraphResult, GraphSnapshot,
    KnowledgeGraph, Relation, RelationId, RelationType,
};

pub use extract::{
    EntityExtractor, ExtractionError, ExtractionResult, RelationExtractor, SchemaDescription, SourceText,
};

pub use merge::{merge_graphs, MergeEngine, MergeStats};

pub use builder::{
    AugmentedGraphBuilder, BuildError, BuildReport, BuildResult, BuiltGraph, ExtractionBackend,
    ModelBackedBackend, RuleBasedBackend, SearchMode, SearchResult, StandardGraphBuilder,
};

pub use llm::{HashingLanguageModel, HttpLanguageModel, LanguageModel, LlmError, LlmResult};

pub use storage::{
    open_storage, EntityFilter, FailoverStorage, FileGraphStorage, GraphDbStorage, GraphStorage, GraphSummary,
    NativeQuery, NativeQueryResult, RelationFilter, StorageError, StorageResult,
};

pub use embedding::{
    CancelToken, EmbeddingConfig, EmbeddingError, EmbeddingModel, EmbeddingResult, EmbeddingTrainer,
    TrainOutcome, TrainingStatus,
};

pub use algo::{metrics, shortest_path, validate_consistency, GraphMetrics, PathOutcome, Violation};

pub use export::{read_graphml, write_graphml, ExportError, ExportResult, VisualizationGraph};

pub use config::{ConfigError, ConfigResult, ExtractionSettings, KnowledgeConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
