//! Knowledge graph data model
//!
//! - Entities keyed by stable ids derived from normalized name and type
//! - Directed, typed relations keyed by (head, tail, relation_type)
//! - Adjacency index for O(1) neighbor lookup
//! - Category list of observed entity types with stable indices
//! - Version counter bumped on every mutation

pub mod entity;
pub mod handle;
pub mod registry;
pub mod relation;
pub mod store;
pub mod types;

// Re-export main types
pub use entity::Entity;
pub use handle::GraphHandle;
pub use registry::{RelationTypeRegistry, OTHER_BUCKET};
pub use relation::Relation;
pub use store::{GraphError, GraphResult, GraphSnapshot, KnowledgeGraph, Upsert};
pub use types::{
    normalize_name, Direction, EntityId, EntityType, GraphId, RelationId, RelationKey, RelationType,
};
