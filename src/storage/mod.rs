//! Graph persistence
//!
//! [`GraphStorage`] is the backend-neutral contract. Two backends implement
//! it: [`FileGraphStorage`] keeps one JSON document per graph and
//! [`GraphDbStorage`] keeps records in RocksDB column families and adds a
//! small pattern query language through [`NativeQuery`]. Callers discover
//! that capability with [`GraphStorage::as_native_query`].
//!
//! Every load re-validates the restored graph; severe violations beyond the
//! configured tolerance fail the load with [`StorageError::Integrity`].

pub mod failover;
pub mod file;
pub mod graphdb;
pub mod lock;
pub mod native;

pub use failover::FailoverStorage;
pub use file::FileGraphStorage;
pub use graphdb::GraphDbStorage;
pub use lock::{GraphLockGuard, GraphLocks};
pub use native::{NativeQueryResult, PatternQuery};

use crate::algo::{validate_consistency, Violation};
use crate::config::{BackendKind, StorageConfig};
use crate::graph::{Entity, EntityId, EntityType, GraphError, GraphId, KnowledgeGraph, Relation, RelationType};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend could not be reached or opened
    #[error("{backend} storage unavailable: {reason}")]
    Connection { backend: String, reason: String },

    /// A loaded graph failed referential or key checks
    #[error("Graph {graph_id} in {backend} storage failed integrity checks ({} severe violations)", .violations.len())]
    Integrity {
        backend: String,
        graph_id: GraphId,
        violations: Vec<Violation>,
    },

    #[error("Graph {graph_id} not found in {backend} storage")]
    NotFound { backend: String, graph_id: GraphId },

    /// Writing a graph's records failed
    #[error("Failed to save graph {graph_id} to {backend} storage: {reason}")]
    Save {
        backend: String,
        graph_id: GraphId,
        reason: String,
    },

    /// Reading or decoding a graph's records failed
    #[error("Failed to load graph {graph_id} from {backend} storage: {reason}")]
    Load {
        backend: String,
        graph_id: GraphId,
        reason: String,
    },

    #[error("Failed to delete graph {graph_id} from {backend} storage: {reason}")]
    Delete {
        backend: String,
        graph_id: GraphId,
        reason: String,
    },

    /// A failure not tied to one graph, such as enumerating the store
    #[error("{backend} storage error: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Invalid graph id {0:?}")]
    InvalidGraphId(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl StorageError {
    pub(crate) fn save(backend: &str, graph_id: &GraphId, reason: impl fmt::Display) -> Self {
        StorageError::Save {
            backend: backend.to_string(),
            graph_id: graph_id.clone(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn load(backend: &str, graph_id: &GraphId, reason: impl fmt::Display) -> Self {
        StorageError::Load {
            backend: backend.to_string(),
            graph_id: graph_id.clone(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn delete(backend: &str, graph_id: &GraphId, reason: impl fmt::Display) -> Self {
        StorageError::Delete {
            backend: backend.to_string(),
            graph_id: graph_id.clone(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn backend(backend: &str, reason: impl fmt::Display) -> Self {
        StorageError::Backend {
            backend: backend.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying against another backend could succeed
    pub fn is_connection_error(&self) -> bool {
        matches!(self, StorageError::Connection { .. })
    }

    /// Name of the backend that failed, when the error came from one
    pub fn backend_name(&self) -> Option<&str> {
        match self {
            StorageError::Connection { backend, .. }
            | StorageError::Integrity { backend, .. }
            | StorageError::NotFound { backend, .. }
            | StorageError::Save { backend, .. }
            | StorageError::Load { backend, .. }
            | StorageError::Delete { backend, .. }
            | StorageError::Backend { backend, .. } => Some(backend),
            _ => None,
        }
    }

    /// The graph the failed operation concerned
    pub fn graph_id(&self) -> Option<&GraphId> {
        match self {
            StorageError::Integrity { graph_id, .. }
            | StorageError::NotFound { graph_id, .. }
            | StorageError::Save { graph_id, .. }
            | StorageError::Load { graph_id, .. }
            | StorageError::Delete { graph_id, .. } => Some(graph_id),
            _ => None,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Listing entry for a stored graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub id: GraphId,
    pub name: String,
    pub version: u64,
    pub entity_count: usize,
    pub relation_count: usize,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Restrict to one graph; all stored graphs otherwise
    pub graph_id: Option<GraphId>,
    /// Case-insensitive substring of the entity name
    pub name_contains: Option<String>,
    pub entity_type: Option<EntityType>,
    pub min_confidence: Option<f64>,
    pub source_id: Option<String>,
    pub limit: Option<usize>,
}

impl EntityFilter {
    pub fn in_graph(mut self, id: GraphId) -> Self {
        self.graph_id = Some(id);
        self
    }

    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn of_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    pub fn from_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(needle) = &self.name_contains {
            if !entity.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if self.entity_type.as_ref().map_or(false, |t| *t != entity.entity_type) {
            return false;
        }
        if self.min_confidence.map_or(false, |c| entity.confidence < c) {
            return false;
        }
        if self.source_id.as_ref().map_or(false, |s| !entity.source_ids.contains(s)) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationFilter {
    pub graph_id: Option<GraphId>,
    pub head: Option<EntityId>,
    pub tail: Option<EntityId>,
    pub relation_type: Option<RelationType>,
    pub limit: Option<usize>,
}

impl RelationFilter {
    pub fn in_graph(mut self, id: GraphId) -> Self {
        self.graph_id = Some(id);
        self
    }

    pub fn head(mut self, id: EntityId) -> Self {
        self.head = Some(id);
        self
    }

    pub fn tail(mut self, id: EntityId) -> Self {
        self.tail = Some(id);
        self
    }

    pub fn of_type(mut self, relation_type: RelationType) -> Self {
        self.relation_type = Some(relation_type);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, relation: &Relation) -> bool {
        self.head.as_ref().map_or(true, |h| *h == relation.head)
            && self.tail.as_ref().map_or(true, |t| *t == relation.tail)
            && self
                .relation_type
                .as_ref()
                .map_or(true, |r| *r == relation.relation_type)
    }
}

/// An entity found by [`GraphStorage::query_entities`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHit {
    pub graph_id: GraphId,
    pub entity: Entity,
}

/// A relation found by [`GraphStorage::query_relations`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationHit {
    pub graph_id: GraphId,
    pub relation: Relation,
}

/// Backend-neutral persistence contract. Operations connect on first use.
pub trait GraphStorage: Send + Sync {
    fn backend_name(&self) -> &str;

    fn connect(&self) -> StorageResult<()>;

    fn is_connected(&self) -> bool;

    /// Persist the whole graph, replacing any earlier save under its id
    fn save(&self, graph: &KnowledgeGraph) -> StorageResult<GraphId>;

    fn load(&self, id: &GraphId) -> StorageResult<KnowledgeGraph>;

    fn delete(&self, id: &GraphId) -> StorageResult<()>;

    fn list_graphs(&self) -> StorageResult<Vec<GraphSummary>>;

    /// Matching entities ordered by (graph id, entity id)
    fn query_entities(&self, filter: &EntityFilter) -> StorageResult<Vec<EntityHit>>;

    /// Matching relations ordered by (graph id, relation id)
    fn query_relations(&self, filter: &RelationFilter) -> StorageResult<Vec<RelationHit>>;

    /// The backend's native query capability, if it has one
    fn as_native_query(&self) -> Option<&dyn NativeQuery> {
        None
    }
}

/// Backend-native pattern queries
pub trait NativeQuery: Send + Sync {
    fn native_query(&self, graph_id: &GraphId, query: &str) -> StorageResult<NativeQueryResult>;
}

/// Open the backend named by the configuration, wrapped with a file
/// fallback when requested
pub fn open_storage(config: &StorageConfig) -> StorageResult<Box<dyn GraphStorage>> {
    let file = || FileGraphStorage::new(&config.root).with_integrity_tolerance(config.integrity_tolerance);
    let storage: Box<dyn GraphStorage> = match config.backend {
        BackendKind::File => Box::new(file()),
        BackendKind::GraphDb => {
            let primary = GraphDbStorage::new(&config.graphdb_path).with_integrity_tolerance(config.integrity_tolerance);
            if config.fallback_to_file {
                Box::new(
                    FailoverStorage::new(Box::new(primary), Box::new(file()))
                        .with_retries(config.connect_retries, config.backoff_ms),
                )
            } else {
                Box::new(primary)
            }
        }
    };
    Ok(storage)
}

/// Validate a restored graph against the tolerance for severe violations
pub(crate) fn check_integrity(backend: &str, graph: KnowledgeGraph, tolerance: usize) -> StorageResult<KnowledgeGraph> {
    let (severe, minor): (Vec<Violation>, Vec<Violation>) =
        validate_consistency(&graph).into_iter().partition(|v| v.is_severe());

    for violation in &minor {
        warn!("Graph {} in {} storage: {}", graph.id(), backend, violation);
    }
    if severe.len() > tolerance {
        return Err(StorageError::Integrity {
            backend: backend.to_string(),
            graph_id: graph.id().clone(),
            violations: severe,
        });
    }
    for violation in &severe {
        warn!("Graph {} in {} storage (tolerated): {}", graph.id(), backend, violation);
    }
    Ok(graph)
}

pub(crate) fn apply_limit<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

/// Graph ids become file names and key prefixes, so they must be plain
pub(crate) fn validate_graph_id(id: &GraphId) -> StorageResult<()> {
    let s = id.as_str();
    if s.is_empty() || s.contains(['/', '\\', ':']) || s.starts_with('.') {
        return Err(StorageError::InvalidGraphId(s.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> Entity {
        Entity::new("Tsinghua University", EntityType::new("university").unwrap())
            .with_confidence(0.8)
            .with_source("doc-1")
    }

    #[test]
    fn test_entity_filter() {
        let e = entity();
        assert!(EntityFilter::default().matches(&e));
        assert!(EntityFilter::default().name_contains("tsinghua").matches(&e));
        assert!(!EntityFilter::default().name_contains("peking").matches(&e));
        assert!(!EntityFilter::default().min_confidence(0.9).matches(&e));
        assert!(EntityFilter::default().from_source("doc-1").matches(&e));
        assert!(!EntityFilter::default()
            .of_type(EntityType::new("city").unwrap())
            .matches(&e));
    }

    #[test]
    fn test_graph_id_validation() {
        assert!(validate_graph_id(&GraphId::generate()).is_ok());
        assert!(validate_graph_id(&GraphId::new("../etc")).is_err());
        assert!(matches!(
            validate_graph_id(&GraphId::new("a:b")),
            Err(StorageError::InvalidGraphId(id)) if id == "a:b"
        ));
    }

    #[test]
    fn test_connection_errors_are_flagged() {
        let err = StorageError::Connection {
            backend: "graphdb".into(),
            reason: "locked".into(),
        };
        assert!(err.is_connection_error());
        assert!(!StorageError::Query("bad".into()).is_connection_error());
    }

    #[test]
    fn test_errors_carry_backend_and_graph() {
        let id = GraphId::new("g1");
        let err = StorageError::save("graphdb", &id, "disk full");
        assert_eq!(err.backend_name(), Some("graphdb"));
        assert_eq!(err.graph_id(), Some(&id));
        assert_eq!(err.to_string(), "Failed to save graph g1 to graphdb storage: disk full");

        let listing = StorageError::backend("file", "permission denied");
        assert_eq!(listing.backend_name(), Some("file"));
        assert!(listing.graph_id().is_none());
        assert!(StorageError::Query("bad".into()).backend_name().is_none());
    }
}
