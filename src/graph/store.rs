//! In-memory knowledge graph container
//!
//! Entities and relations live in flat id-keyed maps. Every cross reference
//! (adjacency lists, categories, relation endpoints) stores ids only.

use super::entity::Entity;
use super::registry::RelationTypeRegistry;
use super::relation::Relation;
use super::types::{
    normalize_name, now_millis, Direction, EntityId, EntityType, GraphId, RelationId, RelationKey,
};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Errors that can occur during graph operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("Relation {0} not found")]
    RelationNotFound(RelationId),

    #[error("Self loop on {0} is not flagged as allowed")]
    SelfLoop(EntityId),

    #[error("Invalid type: {0}")]
    InvalidType(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Outcome of inserting an entity or relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A new record was created
    Inserted,
    /// An existing record absorbed the new observation
    Merged { conflicts: usize },
}

/// Versioned knowledge graph
///
/// Uses hash maps for O(1) lookup:
/// - entities: EntityId -> Entity
/// - relations: RelationId -> Relation (relation ids derive from composite keys)
/// - outgoing: head EntityId -> relation ids
/// - incoming: tail EntityId -> relation ids
#[derive(Debug, Clone)]
pub struct KnowledgeGraph {
    id: GraphId,
    name: String,
    entities: HashMap<EntityId, Entity>,
    relations: HashMap<RelationId, Relation>,
    outgoing: HashMap<EntityId, BTreeSet<RelationId>>,
    incoming: HashMap<EntityId, BTreeSet<RelationId>>,
    /// Observed entity types; the position is the stable category index
    categories: IndexSet<EntityType>,
    registry: RelationTypeRegistry,
    version: u64,
    created_at: i64,
    updated_at: i64,
}

impl KnowledgeGraph {
    /// Create an empty graph with a fresh id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(GraphId::generate(), name)
    }

    pub fn with_id(id: GraphId, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id,
            name: name.into(),
            entities: HashMap::new(),
            relations: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            categories: IndexSet::new(),
            registry: RelationTypeRegistry::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &GraphId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    /// Mutation counter, incremented on every change
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn registry(&self) -> &RelationTypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RelationTypeRegistry {
        &mut self.registry
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn contains_entity(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn relation(&self, id: &RelationId) -> Option<&Relation> {
        self.relations.get(id)
    }

    pub fn relation_by_key(&self, key: &RelationKey) -> Option<&Relation> {
        self.relations
            .get(&RelationId::derive(key))
            .filter(|r| r.key() == *key)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn entity_ids(&self) -> BTreeSet<EntityId> {
        self.entities.keys().cloned().collect()
    }

    pub fn relation_keys(&self) -> BTreeSet<RelationKey> {
        self.relations.values().map(|r| r.key()).collect()
    }

    /// Observed entity types in category-index order
    pub fn categories(&self) -> impl Iterator<Item = &EntityType> {
        self.categories.iter()
    }

    pub fn category_index(&self, entity_type: &EntityType) -> Option<usize> {
        self.categories.get_index_of(entity_type)
    }

    /// Entities whose normalized name equals the normalized query
    pub fn find_by_name(&self, name: &str) -> Vec<&Entity> {
        let wanted = normalize_name(name);
        let mut found: Vec<&Entity> = self
            .entities
            .values()
            .filter(|e| normalize_name(&e.name) == wanted)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn entities_of_type(&self, entity_type: &EntityType) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|e| &e.entity_type == entity_type)
            .collect()
    }

    /// Insert an entity, merging it into an existing one with the same id
    pub fn upsert_entity(&mut self, entity: Entity) -> Upsert {
        self.categories.insert(entity.entity_type.clone());
        let outcome = match self.entities.get_mut(&entity.id) {
            Some(existing) => Upsert::Merged {
                conflicts: existing.merge_from(&entity),
            },
            None => {
                self.entities.insert(entity.id.clone(), entity);
                Upsert::Inserted
            }
        };
        self.touch();
        outcome
    }

    /// Insert a relation, summing weights with an existing relation of the
    /// same composite key. Both endpoints must already exist.
    pub fn upsert_relation(&mut self, mut relation: Relation) -> GraphResult<Upsert> {
        if !self.entities.contains_key(&relation.head) {
            return Err(GraphError::EntityNotFound(relation.head));
        }
        if !self.entities.contains_key(&relation.tail) {
            return Err(GraphError::EntityNotFound(relation.tail));
        }
        if relation.is_self_loop() && !relation.allow_self_loop {
            return Err(GraphError::SelfLoop(relation.head));
        }

        relation.id = RelationId::derive(&relation.key());
        let outcome = match self.relations.get_mut(&relation.id) {
            Some(existing) => Upsert::Merged {
                conflicts: existing.merge_from(&relation),
            },
            None => {
                self.index_relation(&relation);
                self.relations.insert(relation.id.clone(), relation);
                Upsert::Inserted
            }
        };
        self.touch();
        Ok(outcome)
    }

    /// Remove an entity together with every relation touching it
    pub fn remove_entity(&mut self, id: &EntityId) -> GraphResult<(Entity, Vec<Relation>)> {
        let entity = self
            .entities
            .remove(id)
            .ok_or_else(|| GraphError::EntityNotFound(id.clone()))?;

        let mut incident: BTreeSet<RelationId> = BTreeSet::new();
        if let Some(out) = self.outgoing.get(id) {
            incident.extend(out.iter().cloned());
        }
        if let Some(inc) = self.incoming.get(id) {
            incident.extend(inc.iter().cloned());
        }

        let mut removed = Vec::with_capacity(incident.len());
        for rel_id in incident {
            if let Some(relation) = self.relations.remove(&rel_id) {
                self.unindex_relation(&relation);
                removed.push(relation);
            }
        }
        self.outgoing.remove(id);
        self.incoming.remove(id);
        self.touch();
        Ok((entity, removed))
    }

    pub fn remove_relation(&mut self, id: &RelationId) -> GraphResult<Relation> {
        let relation = self
            .relations
            .remove(id)
            .ok_or_else(|| GraphError::RelationNotFound(id.clone()))?;
        self.unindex_relation(&relation);
        self.touch();
        Ok(relation)
    }

    /// Relations leaving an entity, ordered by relation id
    pub fn outgoing(&self, id: &EntityId) -> Vec<&Relation> {
        self.adjacent(&self.outgoing, id)
    }

    /// Relations arriving at an entity, ordered by relation id
    pub fn incoming(&self, id: &EntityId) -> Vec<&Relation> {
        self.adjacent(&self.incoming, id)
    }

    pub fn relations_of(&self, id: &EntityId, direction: Direction) -> Vec<&Relation> {
        match direction {
            Direction::Outgoing => self.outgoing(id),
            Direction::Incoming => self.incoming(id),
            Direction::Both => {
                let mut all = self.outgoing(id);
                for r in self.incoming(id) {
                    if !r.is_self_loop() {
                        all.push(r);
                    }
                }
                all
            }
        }
    }

    /// Distinct neighbor ids in the given direction, sorted
    pub fn neighbors(&self, id: &EntityId, direction: Direction) -> Vec<&EntityId> {
        let mut seen: BTreeSet<&EntityId> = BTreeSet::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            seen.extend(self.outgoing(id).into_iter().map(|r| &r.tail));
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            seen.extend(self.incoming(id).into_iter().map(|r| &r.head));
        }
        seen.into_iter().collect()
    }

    /// Number of relation endpoints at an entity (in plus out)
    pub fn degree(&self, id: &EntityId) -> usize {
        self.outgoing.get(id).map_or(0, |s| s.len()) + self.incoming.get(id).map_or(0, |s| s.len())
    }

    /// Sum of incident relation weights
    pub fn weighted_degree(&self, id: &EntityId) -> f64 {
        self.outgoing(id)
            .into_iter()
            .chain(self.incoming(id))
            .map(|r| r.weight)
            .sum()
    }

    /// Serializable form of the graph, with records sorted by id
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut entities: Vec<Entity> = self.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        let mut relations: Vec<Relation> = self.relations.values().cloned().collect();
        relations.sort_by(|a, b| a.id.cmp(&b.id));

        GraphSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            categories: self.categories.iter().cloned().collect(),
            entities,
            relations,
        }
    }

    /// Rebuild a graph from a snapshot without merging or validation.
    ///
    /// Records are inserted verbatim so that integrity checks see exactly
    /// what was persisted, including dangling relation endpoints.
    pub fn restore(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self::with_id(snapshot.id, snapshot.name);
        graph.categories.extend(snapshot.categories);
        for entity in snapshot.entities {
            graph.categories.insert(entity.entity_type.clone());
            graph.entities.insert(entity.id.clone(), entity);
        }
        for relation in snapshot.relations {
            graph.index_relation(&relation);
            graph.relations.insert(relation.id.clone(), relation);
        }
        graph.version = snapshot.version;
        graph.created_at = snapshot.created_at;
        graph.updated_at = snapshot.updated_at;
        graph
    }

    fn adjacent<'a>(
        &'a self,
        index: &'a HashMap<EntityId, BTreeSet<RelationId>>,
        id: &EntityId,
    ) -> Vec<&'a Relation> {
        index
            .get(id)
            .map(|ids| ids.iter().filter_map(|rid| self.relations.get(rid)).collect())
            .unwrap_or_default()
    }

    fn index_relation(&mut self, relation: &Relation) {
        self.outgoing
            .entry(relation.head.clone())
            .or_default()
            .insert(relation.id.clone());
        self.incoming
            .entry(relation.tail.clone())
            .or_default()
            .insert(relation.id.clone());
    }

    fn unindex_relation(&mut self, relation: &Relation) {
        if let Some(out) = self.outgoing.get_mut(&relation.head) {
            out.remove(&relation.id);
        }
        if let Some(inc) = self.incoming.get_mut(&relation.tail) {
            inc.remove(&relation.id);
        }
    }

    /// Bump the version and update time without changing any record
    pub(crate) fn touch(&mut self) {
        self.version += 1;
        self.updated_at = now_millis();
    }
}

/// Serialized form of a [`KnowledgeGraph`], shared by storage and export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub id: GraphId,
    pub name: String,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub categories: Vec<EntityType>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::RelationType;

    fn entity(name: &str, ty: &str) -> Entity {
        Entity::new(name, EntityType::new(ty).unwrap())
    }

    fn rel(head: &Entity, tail: &Entity, ty: &str) -> Relation {
        Relation::new(head.id.clone(), tail.id.clone(), RelationType::new(ty).unwrap())
    }

    #[test]
    fn test_upsert_and_adjacency() {
        let mut graph = KnowledgeGraph::new("test");
        let beijing = entity("Beijing", "city");
        let china = entity("China", "country");
        graph.upsert_entity(beijing.clone());
        graph.upsert_entity(china.clone());
        graph.upsert_relation(rel(&beijing, &china, "capital_of")).unwrap();

        assert_eq!(graph.entity_count(), 2);
        assert_eq!(graph.relation_count(), 1);
        assert_eq!(graph.outgoing(&beijing.id).len(), 1);
        assert_eq!(graph.incoming(&china.id).len(), 1);
        assert_eq!(graph.neighbors(&china.id, Direction::Both), vec![&beijing.id]);
        assert_eq!(graph.category_index(&EntityType::new("country").unwrap()), Some(1));
    }

    #[test]
    fn test_version_increments_on_every_mutation() {
        let mut graph = KnowledgeGraph::new("test");
        let a = entity("A", "thing");
        assert_eq!(graph.version(), 0);
        graph.upsert_entity(a.clone());
        graph.upsert_entity(a.clone());
        assert_eq!(graph.version(), 2);
        graph.remove_entity(&a.id).unwrap();
        assert_eq!(graph.version(), 3);
    }

    #[test]
    fn test_duplicate_triple_merges() {
        let mut graph = KnowledgeGraph::new("test");
        let a = entity("A", "thing");
        let b = entity("B", "thing");
        graph.upsert_entity(a.clone());
        graph.upsert_entity(b.clone());

        assert_eq!(graph.upsert_relation(rel(&a, &b, "knows")).unwrap(), Upsert::Inserted);
        assert!(matches!(
            graph.upsert_relation(rel(&a, &b, "knows")).unwrap(),
            Upsert::Merged { .. }
        ));
        assert_eq!(graph.relation_count(), 1);
        assert_eq!(graph.relations().next().unwrap().weight, 2.0);
    }

    #[test]
    fn test_relation_requires_endpoints_and_flagged_self_loops() {
        let mut graph = KnowledgeGraph::new("test");
        let a = entity("A", "thing");
        let ghost = entity("Ghost", "thing");
        graph.upsert_entity(a.clone());

        assert_eq!(
            graph.upsert_relation(rel(&a, &ghost, "knows")),
            Err(GraphError::EntityNotFound(ghost.id.clone()))
        );
        assert_eq!(
            graph.upsert_relation(rel(&a, &a, "knows")),
            Err(GraphError::SelfLoop(a.id.clone()))
        );
        assert!(graph.upsert_relation(rel(&a, &a, "knows").allowing_self_loop()).is_ok());
    }

    #[test]
    fn test_remove_entity_cascades() {
        let mut graph = KnowledgeGraph::new("test");
        let a = entity("A", "thing");
        let b = entity("B", "thing");
        graph.upsert_entity(a.clone());
        graph.upsert_entity(b.clone());
        graph.upsert_relation(rel(&a, &b, "knows")).unwrap();

        let (_, removed) = graph.remove_entity(&b.id).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(graph.relation_count(), 0);
        assert!(graph.outgoing(&a.id).is_empty());
    }

    #[test]
    fn test_snapshot_restore_preserves_sets() {
        let mut graph = KnowledgeGraph::new("test");
        let a = entity("A", "thing");
        let b = entity("B", "other");
        graph.upsert_entity(a.clone());
        graph.upsert_entity(b.clone());
        graph.upsert_relation(rel(&a, &b, "knows")).unwrap();

        let restored = KnowledgeGraph::restore(graph.snapshot());
        assert_eq!(restored.id(), graph.id());
        assert_eq!(restored.entity_ids(), graph.entity_ids());
        assert_eq!(restored.relation_keys(), graph.relation_keys());
        assert_eq!(restored.version(), graph.version());
        assert_eq!(restored.outgoing(&a.id).len(), 1);
    }
}
