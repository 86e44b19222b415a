//! Graph analytics over an in-memory knowledge graph
//!
//! These operate on [`KnowledgeGraph`](crate::graph::KnowledgeGraph)
//! regardless of which storage backend it was loaded from.

pub mod community;
pub mod consistency;
pub mod metrics;
pub mod pathfinding;

pub use community::{weakly_connected_components, WccResult};
pub use consistency::{validate_consistency, Endpoint, Violation};
pub use metrics::{metrics, GraphMetrics};
pub use pathfinding::{expand_neighborhood, shortest_path, PathOutcome};
