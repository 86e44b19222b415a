//! Graph builders
//!
//! [`StandardGraphBuilder`] runs the local extractors on the rayon pool.
//! [`AugmentedGraphBuilder`] delegates extraction to an injected backend and
//! keeps a chunk index for retrieval.

pub mod augmented;
pub mod backend;
pub mod chunk;
pub mod standard;

pub use augmented::{AugmentedGraphBuilder, SearchMode, SearchResult};
pub use backend::{ExtractionBackend, ModelBackedBackend, RuleBasedBackend};
pub use chunk::{split_text, Chunk, ChunkIndex, ChunkStatistics, VectorError, VectorResult};
pub use standard::{BuildError, BuildReport, BuildResult, BuiltGraph, StandardGraphBuilder};
