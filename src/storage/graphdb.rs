//! RocksDB graph-database storage
//!
//! Column families:
//! - `graphs`: `<graph_id>` to graph metadata
//! - `nodes`: `<graph_id>:n:<entity_id>` to an entity record
//! - `edges`: `<graph_id>:e:<relation_id>` to a relation record
//!
//! Values are bincode-encoded. A save writes all upserts and the deletion of
//! stale records in one atomic `WriteBatch`.

use super::native::{NativeQueryResult, PatternQuery};
use super::{
    apply_limit, check_integrity, validate_graph_id, EntityFilter, EntityHit, GraphLocks, GraphStorage, GraphSummary,
    NativeQuery, RelationFilter, RelationHit, StorageError, StorageResult,
};
use crate::graph::{Entity, EntityType, GraphId, GraphSnapshot, KnowledgeGraph, Relation};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

const BACKEND: &str = "graphdb";
const CF_GRAPHS: &str = "graphs";
const CF_NODES: &str = "nodes";
const CF_EDGES: &str = "edges";

/// Graph-level record in the `graphs` column family
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredGraph {
    id: String,
    name: String,
    version: u64,
    created_at: i64,
    updated_at: i64,
    categories: Vec<EntityType>,
    entity_count: usize,
    relation_count: usize,
}

/// RocksDB-based persistent graph storage
pub struct GraphDbStorage {
    path: PathBuf,
    db: RwLock<Option<Arc<DB>>>,
    locks: GraphLocks,
    integrity_tolerance: usize,
}

impl GraphDbStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            db: RwLock::new(None),
            locks: GraphLocks::new(),
            integrity_tolerance: 0,
        }
    }

    pub fn with_integrity_tolerance(mut self, tolerance: usize) -> Self {
        self.integrity_tolerance = tolerance;
        self
    }

    fn cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn open_db(&self) -> StorageResult<DB> {
        info!("Opening graph database at: {}", self.path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::PointInTime);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_GRAPHS, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_NODES, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_EDGES, Self::cf_options()),
        ];

        DB::open_cf_descriptors(&opts, &self.path, cf_descriptors).map_err(|e| StorageError::Connection {
            backend: BACKEND.to_string(),
            reason: e.to_string(),
        })
    }

    /// The open database, connecting on first use
    fn db(&self) -> StorageResult<Arc<DB>> {
        if let Some(db) = self.db.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(Arc::clone(db));
        }
        let mut slot = self.db.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(db) = slot.as_ref() {
            return Ok(Arc::clone(db));
        }
        let db = Arc::new(self.open_db()?);
        *slot = Some(Arc::clone(&db));
        info!("Graph database opened successfully");
        Ok(db)
    }

    fn cf<'a>(db: &'a DB, name: &str) -> StorageResult<&'a rocksdb::ColumnFamily> {
        db.cf_handle(name)
            .ok_or_else(|| StorageError::backend(BACKEND, format!("missing column family {}", name)))
    }

    fn node_key(graph_id: &GraphId, entity: &Entity) -> Vec<u8> {
        format!("{}:n:{}", graph_id, entity.id).into_bytes()
    }

    fn edge_key(graph_id: &GraphId, relation: &Relation) -> Vec<u8> {
        format!("{}:e:{}", graph_id, relation.id).into_bytes()
    }

    /// All (key, value) pairs of a column family under `prefix`
    fn scan(db: &DB, cf: &rocksdb::ColumnFamily, prefix: &str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, rocksdb::Error> {
        let mut items = Vec::new();
        // No prefix extractor is configured, so the iterator runs past the prefix
        for item in db.prefix_iterator_cf(cf, prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            items.push((key, value));
        }
        Ok(items)
    }

    fn read_meta(db: &DB, id: &GraphId) -> StorageResult<Option<StoredGraph>> {
        let cf = Self::cf(db, CF_GRAPHS)?;
        let value = db
            .get_cf(cf, id.as_str().as_bytes())
            .map_err(|e| StorageError::load(BACKEND, id, e))?;
        value
            .map(|v| bincode::deserialize(&v).map_err(|e| StorageError::load(BACKEND, id, e)))
            .transpose()
    }

    /// Decode every record of one graph in a column family
    fn read_records<T: serde::de::DeserializeOwned>(db: &DB, cf_name: &str, prefix: &str, id: &GraphId) -> StorageResult<Vec<T>> {
        let cf = Self::cf(db, cf_name)?;
        Self::scan(db, cf, prefix)
            .map_err(|e| StorageError::load(BACKEND, id, e))?
            .into_iter()
            .map(|(_, v)| bincode::deserialize(&v).map_err(|e| StorageError::load(BACKEND, id, e)))
            .collect()
    }

    fn read_entities(db: &DB, id: &GraphId) -> StorageResult<Vec<Entity>> {
        Self::read_records(db, CF_NODES, &format!("{}:n:", id), id)
    }

    fn read_relations(db: &DB, id: &GraphId) -> StorageResult<Vec<Relation>> {
        Self::read_records(db, CF_EDGES, &format!("{}:e:", id), id)
    }

    fn not_found(id: &GraphId) -> StorageError {
        StorageError::NotFound {
            backend: BACKEND.to_string(),
            graph_id: id.clone(),
        }
    }

    fn graph_ids(&self, db: &DB, graph_id: Option<&GraphId>) -> StorageResult<Vec<GraphId>> {
        if let Some(id) = graph_id {
            return Ok(vec![id.clone()]);
        }
        let cf = Self::cf(db, CF_GRAPHS)?;
        let mut ids = Vec::new();
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StorageError::backend(BACKEND, e))?;
            if let Ok(id) = std::str::from_utf8(&key) {
                ids.push(GraphId::new(id));
            }
        }
        Ok(ids)
    }
}

impl GraphStorage for GraphDbStorage {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    fn connect(&self) -> StorageResult<()> {
        self.db().map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.db.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn save(&self, graph: &KnowledgeGraph) -> StorageResult<GraphId> {
        let db = self.db()?;
        let id = graph.id().clone();
        validate_graph_id(&id)?;
        let _guard = self.locks.acquire(&id);

        let graphs = Self::cf(&db, CF_GRAPHS)?;
        let nodes = Self::cf(&db, CF_NODES)?;
        let edges = Self::cf(&db, CF_EDGES)?;

        let snapshot = graph.snapshot();
        let mut batch = WriteBatch::default();
        let mut live: HashSet<Vec<u8>> = HashSet::new();

        let save_error = |e: bincode::Error| StorageError::save(BACKEND, &id, e);
        for entity in &snapshot.entities {
            let key = Self::node_key(&id, entity);
            batch.put_cf(nodes, &key, bincode::serialize(entity).map_err(save_error)?);
            live.insert(key);
        }
        for relation in &snapshot.relations {
            let key = Self::edge_key(&id, relation);
            batch.put_cf(edges, &key, bincode::serialize(relation).map_err(save_error)?);
            live.insert(key);
        }

        let mut stale = 0usize;
        for (cf, prefix) in [(nodes, format!("{}:n:", id)), (edges, format!("{}:e:", id))] {
            let existing = Self::scan(&db, cf, &prefix).map_err(|e| StorageError::save(BACKEND, &id, e))?;
            for (key, _) in existing {
                if !live.contains(key.as_ref()) {
                    batch.delete_cf(cf, key);
                    stale += 1;
                }
            }
        }

        let meta = StoredGraph {
            id: id.to_string(),
            name: snapshot.name.clone(),
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            categories: snapshot.categories.clone(),
            entity_count: snapshot.entities.len(),
            relation_count: snapshot.relations.len(),
        };
        batch.put_cf(graphs, id.as_str().as_bytes(), bincode::serialize(&meta).map_err(save_error)?);

        db.write(batch).map_err(|e| StorageError::save(BACKEND, &id, e))?;
        debug!(
            "Saved graph {}: {} entities, {} relations, {} stale records removed",
            id, meta.entity_count, meta.relation_count, stale
        );
        Ok(id)
    }

    fn load(&self, id: &GraphId) -> StorageResult<KnowledgeGraph> {
        let db = self.db()?;
        let _guard = self.locks.acquire(id);

        let meta = Self::read_meta(&db, id)?.ok_or_else(|| Self::not_found(id))?;
        let snapshot = GraphSnapshot {
            id: GraphId::new(meta.id),
            name: meta.name,
            version: meta.version,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            categories: meta.categories,
            entities: Self::read_entities(&db, id)?,
            relations: Self::read_relations(&db, id)?,
        };
        check_integrity(BACKEND, KnowledgeGraph::restore(snapshot), self.integrity_tolerance)
    }

    fn delete(&self, id: &GraphId) -> StorageResult<()> {
        let db = self.db()?;
        let _guard = self.locks.acquire(id);
        if Self::read_meta(&db, id)?.is_none() {
            return Err(Self::not_found(id));
        }

        let mut batch = WriteBatch::default();
        batch.delete_cf(Self::cf(&db, CF_GRAPHS)?, id.as_str().as_bytes());
        for (cf_name, prefix) in [(CF_NODES, format!("{}:n:", id)), (CF_EDGES, format!("{}:e:", id))] {
            let cf = Self::cf(&db, cf_name)?;
            let existing = Self::scan(&db, cf, &prefix).map_err(|e| StorageError::delete(BACKEND, id, e))?;
            for (key, _) in existing {
                batch.delete_cf(cf, key);
            }
        }
        db.write(batch).map_err(|e| StorageError::delete(BACKEND, id, e))?;
        debug!("Deleted graph {}", id);
        Ok(())
    }

    fn list_graphs(&self) -> StorageResult<Vec<GraphSummary>> {
        let db = self.db()?;
        let cf = Self::cf(&db, CF_GRAPHS)?;
        let mut summaries = Vec::new();
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StorageError::backend(BACKEND, e))?;
            let meta: StoredGraph = bincode::deserialize(&value)
                .map_err(|e| StorageError::load(BACKEND, &GraphId::new(String::from_utf8_lossy(&key)), e))?;
            summaries.push(GraphSummary {
                id: GraphId::new(meta.id),
                name: meta.name,
                version: meta.version,
                entity_count: meta.entity_count,
                relation_count: meta.relation_count,
                updated_at: meta.updated_at,
            });
        }
        Ok(summaries)
    }

    fn query_entities(&self, filter: &EntityFilter) -> StorageResult<Vec<EntityHit>> {
        let db = self.db()?;
        let mut hits = Vec::new();
        for id in self.graph_ids(&db, filter.graph_id.as_ref())? {
            let _guard = self.locks.acquire(&id);
            // Keys sort by entity id within a graph prefix
            for entity in Self::read_entities(&db, &id)? {
                if filter.matches(&entity) {
                    hits.push(EntityHit {
                        graph_id: id.clone(),
                        entity,
                    });
                }
            }
        }
        Ok(apply_limit(hits, filter.limit))
    }

    fn query_relations(&self, filter: &RelationFilter) -> StorageResult<Vec<RelationHit>> {
        let db = self.db()?;
        let mut hits = Vec::new();
        for id in self.graph_ids(&db, filter.graph_id.as_ref())? {
            let _guard = self.locks.acquire(&id);
            for relation in Self::read_relations(&db, &id)? {
                if filter.matches(&relation) {
                    hits.push(RelationHit {
                        graph_id: id.clone(),
                        relation,
                    });
                }
            }
        }
        Ok(apply_limit(hits, filter.limit))
    }

    fn as_native_query(&self) -> Option<&dyn NativeQuery> {
        Some(self)
    }
}

impl NativeQuery for GraphDbStorage {
    fn native_query(&self, graph_id: &GraphId, query: &str) -> StorageResult<NativeQueryResult> {
        let pattern = PatternQuery::parse(query)?;
        let graph = self.load(graph_id)?;
        let result = pattern.execute(&graph)?;
        debug!("Native query on {} returned {} rows", graph_id, result.len());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityType, RelationType};
    use tempfile::TempDir;

    fn sample() -> (KnowledgeGraph, Entity, Entity) {
        let mut g = KnowledgeGraph::new("sample");
        let a = Entity::new("Beijing", EntityType::new("city").unwrap());
        let b = Entity::new("China", EntityType::new("country").unwrap());
        g.upsert_entity(a.clone());
        g.upsert_entity(b.clone());
        g.upsert_relation(Relation::new(
            a.id.clone(),
            b.id.clone(),
            RelationType::new("capital_of").unwrap(),
        ))
        .unwrap();
        (g, a, b)
    }

    #[test]
    fn test_resave_removes_stale_records() {
        let dir = TempDir::new().unwrap();
        let storage = GraphDbStorage::new(dir.path());
        let (mut g, a, _) = sample();
        storage.save(&g).unwrap();

        g.remove_entity(&a.id).unwrap();
        storage.save(&g).unwrap();

        let loaded = storage.load(g.id()).unwrap();
        assert_eq!(loaded.entity_count(), 1);
        assert_eq!(loaded.relation_count(), 0);
        let db = storage.db().unwrap();
        let edges = GraphDbStorage::cf(&db, CF_EDGES).unwrap();
        assert_eq!(GraphDbStorage::scan(&db, edges, &format!("{}:e:", g.id())).unwrap().len(), 0);
    }

    #[test]
    fn test_graphs_sharing_a_prefix_stay_isolated() {
        let dir = TempDir::new().unwrap();
        let storage = GraphDbStorage::new(dir.path());
        let (g, _, _) = sample();
        let mut other = KnowledgeGraph::with_id(GraphId::new(format!("{}x", g.id())), "other");
        other.upsert_entity(Entity::new("Paris", EntityType::new("city").unwrap()));
        storage.save(&g).unwrap();
        storage.save(&other).unwrap();

        assert_eq!(storage.load(g.id()).unwrap().entity_count(), 2);
        assert_eq!(storage.load(other.id()).unwrap().entity_count(), 1);
        assert_eq!(storage.list_graphs().unwrap().len(), 2);
    }

    #[test]
    fn test_undecodable_record_names_graph() {
        let dir = TempDir::new().unwrap();
        let storage = GraphDbStorage::new(dir.path());
        let (g, _, _) = sample();
        storage.save(&g).unwrap();
        let db = storage.db().unwrap();
        let graphs = GraphDbStorage::cf(&db, CF_GRAPHS).unwrap();
        db.put_cf(graphs, g.id().as_str().as_bytes(), b"bad").unwrap();

        let err = storage.load(g.id()).unwrap_err();
        assert!(matches!(err, StorageError::Load { .. }), "unexpected {:?}", err);
        assert_eq!(err.backend_name(), Some(BACKEND));
        assert_eq!(err.graph_id(), Some(g.id()));

        let listing = storage.list_graphs().unwrap_err();
        assert_eq!(listing.graph_id(), Some(g.id()));
    }

    #[test]
    fn test_second_open_of_same_path_is_a_connection_error() {
        let dir = TempDir::new().unwrap();
        let first = GraphDbStorage::new(dir.path());
        first.connect().unwrap();
        let second = GraphDbStorage::new(dir.path());
        let err = second.connect().unwrap_err();
        assert!(err.is_connection_error(), "unexpected {:?}", err);
        assert!(!second.is_connected());
    }

    #[test]
    fn test_native_query_capability() {
        let dir = TempDir::new().unwrap();
        let storage = GraphDbStorage::new(dir.path());
        let (g, _, _) = sample();
        storage.save(&g).unwrap();
        let native = storage.as_native_query().expect("graphdb supports native queries");
        let result = native
            .native_query(g.id(), "MATCH (n:city {name: 'beijing'}) RETURN n")
            .unwrap();
        assert_eq!(result.len(), 1);
    }
}
