//! Core type definitions for the knowledge graph

use super::{GraphError, GraphResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Field separator used when hashing composite identities
const ID_SEPARATOR: char = '\u{1f}';

/// Unique identifier for an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an explicitly supplied id
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    /// Derive the stable id of an entity from its name and type
    pub fn derive(name: &str, entity_type: &EntityType) -> Self {
        let key = format!("{}{}{}", entity_type.as_str(), ID_SEPARATOR, normalize_name(name));
        EntityId(format!("ent-{}", short_digest(&key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId(s)
    }
}

/// Unique identifier for a relation, one-to-one with its composite key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct RelationId(String);

impl RelationId {
    pub fn new(id: impl Into<String>) -> Self {
        RelationId(id.into())
    }

    /// Derive the id for a (head, tail, relation_type) triple
    pub fn derive(key: &RelationKey) -> Self {
        let raw = format!(
            "{}{sep}{}{sep}{}",
            key.head.as_str(),
            key.tail.as_str(),
            key.relation_type.as_str(),
            sep = ID_SEPARATOR
        );
        RelationId(format!("rel-{}", short_digest(&raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RelationId {
    fn from(s: &str) -> Self {
        RelationId(s.to_string())
    }
}

/// Identifier of a whole graph, used as the storage key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct GraphId(String);

impl GraphId {
    pub fn new(id: impl Into<String>) -> Self {
        GraphId(id.into())
    }

    /// Generate a fresh random id
    pub fn generate() -> Self {
        GraphId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GraphId {
    fn from(s: &str) -> Self {
        GraphId(s.to_string())
    }
}

impl From<String> for GraphId {
    fn from(s: String) -> Self {
        GraphId(s)
    }
}

/// Entity type (e.g., "city", "table"). Open set, tracked as graph categories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct EntityType(String);

impl EntityType {
    pub fn new(raw: impl AsRef<str>) -> GraphResult<Self> {
        Ok(EntityType(normalize_keyword(raw.as_ref(), "entity type")?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntityType {
    type Error = GraphError;

    fn try_from(s: String) -> GraphResult<Self> {
        EntityType::new(s)
    }
}

impl From<EntityType> for String {
    fn from(t: EntityType) -> Self {
        t.0
    }
}

/// Relation type keyword (e.g., "capital_of"). Validated, never a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct RelationType(String);

impl RelationType {
    pub fn new(raw: impl AsRef<str>) -> GraphResult<Self> {
        Ok(RelationType(normalize_keyword(raw.as_ref(), "relation type")?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RelationType {
    type Error = GraphError;

    fn try_from(s: String) -> GraphResult<Self> {
        RelationType::new(s)
    }
}

impl From<RelationType> for String {
    fn from(t: RelationType) -> Self {
        t.0
    }
}

/// Composite key of a relation. At most one relation per key exists in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct RelationKey {
    pub head: EntityId,
    pub tail: EntityId,
    pub relation_type: RelationType,
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[{}]->({})", self.head, self.relation_type, self.tail)
    }
}

/// Edge direction relative to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Normalize an entity name for identity comparison: trim, collapse
/// whitespace, lowercase.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_keyword(raw: &str, what: &str) -> GraphResult<String> {
    let normalized = raw
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if normalized.is_empty() || normalized.chars().any(|c| c.is_control()) {
        return Err(GraphError::InvalidType(format!("invalid {}: {:?}", what, raw)));
    }
    Ok(normalized)
}

fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// Content-derived identifier for a source unit (document or schema)
pub fn content_id(prefix: &str, content: &str) -> String {
    format!("{}-{}", prefix, short_digest(content))
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
