//! File-backed storage: one JSON document per graph

use super::{
    apply_limit, check_integrity, validate_graph_id, EntityFilter, EntityHit, GraphLocks, GraphStorage, GraphSummary,
    RelationFilter, RelationHit, StorageError, StorageResult,
};
use crate::graph::{GraphId, GraphSnapshot, KnowledgeGraph};
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

const BACKEND: &str = "file";
const EXTENSION: &str = "json";

pub struct FileGraphStorage {
    root: PathBuf,
    locks: GraphLocks,
    integrity_tolerance: usize,
    connected: AtomicBool,
}

impl FileGraphStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks: GraphLocks::new(),
            integrity_tolerance: 0,
            connected: AtomicBool::new(false),
        }
    }

    pub fn with_integrity_tolerance(mut self, tolerance: usize) -> Self {
        self.integrity_tolerance = tolerance;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a graph's document
    pub fn path_for(&self, id: &GraphId) -> StorageResult<PathBuf> {
        validate_graph_id(id)?;
        Ok(self.root.join(format!("{}.{}", id, EXTENSION)))
    }

    fn ensure_connected(&self) -> StorageResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect()
    }

    fn read_snapshot(&self, id: &GraphId) -> StorageResult<GraphSnapshot> {
        let path = self.path_for(id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    backend: BACKEND.to_string(),
                    graph_id: id.clone(),
                })
            }
            Err(e) => return Err(StorageError::load(BACKEND, id, format!("{}: {}", path.display(), e))),
        };
        serde_json::from_slice(&bytes).map_err(|e| StorageError::load(BACKEND, id, e))
    }

    /// Sibling of the document that a save writes before renaming it into place
    fn temp_path_for(&self, id: &GraphId) -> PathBuf {
        self.root.join(format!(".{}.{}.tmp", id, EXTENSION))
    }

    /// Ids of all documents under the root, sorted
    fn stored_ids(&self) -> StorageResult<Vec<GraphId>> {
        let listing_error = |e: io::Error| StorageError::backend(BACKEND, format!("{}: {}", self.root.display(), e));
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(listing_error)? {
            let path = entry.map_err(listing_error)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if !stem.starts_with('.') => ids.push(GraphId::new(stem)),
                _ => {}
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn graphs_for(&self, graph_id: Option<&GraphId>) -> StorageResult<Vec<GraphId>> {
        match graph_id {
            Some(id) => Ok(vec![id.clone()]),
            None => self.stored_ids(),
        }
    }
}

impl GraphStorage for FileGraphStorage {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    fn connect(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| StorageError::Connection {
            backend: BACKEND.to_string(),
            reason: format!("{}: {}", self.root.display(), e),
        })?;
        if !self.root.is_dir() {
            return Err(StorageError::Connection {
                backend: BACKEND.to_string(),
                reason: format!("{} is not a directory", self.root.display()),
            });
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!("Opened file storage at {}", self.root.display());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn save(&self, graph: &KnowledgeGraph) -> StorageResult<GraphId> {
        self.ensure_connected()?;
        let id = graph.id().clone();
        let path = self.path_for(&id)?;
        let _guard = self.locks.acquire(&id);

        let bytes = serde_json::to_vec_pretty(&graph.snapshot()).map_err(|e| StorageError::save(BACKEND, &id, e))?;
        let tmp = self.temp_path_for(&id);
        if let Err(e) = write_synced(&tmp, &bytes).and_then(|()| fs::rename(&tmp, &path)) {
            match fs::remove_file(&tmp) {
                Ok(()) => {}
                Err(cleanup) if cleanup.kind() == ErrorKind::NotFound => {}
                Err(cleanup) => warn!("Could not remove {}: {}", tmp.display(), cleanup),
            }
            return Err(StorageError::save(BACKEND, &id, format!("{}: {}", path.display(), e)));
        }

        debug!("Saved graph {} ({} bytes) to {}", id, bytes.len(), path.display());
        Ok(id)
    }

    fn load(&self, id: &GraphId) -> StorageResult<KnowledgeGraph> {
        self.ensure_connected()?;
        let _guard = self.locks.acquire(id);
        let snapshot = self.read_snapshot(id)?;
        if snapshot.id != *id {
            warn!("Document for {} carries id {}", id, snapshot.id);
        }
        check_integrity(BACKEND, KnowledgeGraph::restore(snapshot), self.integrity_tolerance)
    }

    fn delete(&self, id: &GraphId) -> StorageResult<()> {
        self.ensure_connected()?;
        let path = self.path_for(id)?;
        let _guard = self.locks.acquire(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted graph {}", id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                backend: BACKEND.to_string(),
                graph_id: id.clone(),
            }),
            Err(e) => Err(StorageError::delete(BACKEND, id, format!("{}: {}", path.display(), e))),
        }
    }

    fn list_graphs(&self) -> StorageResult<Vec<GraphSummary>> {
        self.ensure_connected()?;
        let mut summaries = Vec::new();
        for id in self.stored_ids()? {
            let _guard = self.locks.acquire(&id);
            match self.read_snapshot(&id) {
                Ok(s) => summaries.push(GraphSummary {
                    id: s.id,
                    name: s.name,
                    version: s.version,
                    entity_count: s.entities.len(),
                    relation_count: s.relations.len(),
                    updated_at: s.updated_at,
                }),
                Err(e) => warn!("Skipping unreadable graph document {}: {}", id, e),
            }
        }
        Ok(summaries)
    }

    fn query_entities(&self, filter: &EntityFilter) -> StorageResult<Vec<EntityHit>> {
        self.ensure_connected()?;
        let mut hits = Vec::new();
        for id in self.graphs_for(filter.graph_id.as_ref())? {
            let graph = self.load(&id)?;
            let mut found: Vec<EntityHit> = graph
                .entities()
                .filter(|e| filter.matches(e))
                .map(|e| EntityHit {
                    graph_id: id.clone(),
                    entity: e.clone(),
                })
                .collect();
            found.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));
            hits.extend(found);
        }
        Ok(apply_limit(hits, filter.limit))
    }

    fn query_relations(&self, filter: &RelationFilter) -> StorageResult<Vec<RelationHit>> {
        self.ensure_connected()?;
        let mut hits = Vec::new();
        for id in self.graphs_for(filter.graph_id.as_ref())? {
            let graph = self.load(&id)?;
            let mut found: Vec<RelationHit> = graph
                .relations()
                .filter(|r| filter.matches(r))
                .map(|r| RelationHit {
                    graph_id: id.clone(),
                    relation: r.clone(),
                })
                .collect();
            found.sort_by(|a, b| a.relation.id.cmp(&b.relation.id));
            hits.extend(found);
        }
        Ok(apply_limit(hits, filter.limit))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
