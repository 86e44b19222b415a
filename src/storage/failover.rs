//! Primary backend with a fallback on connection failure

use super::{
    EntityFilter, EntityHit, GraphStorage, GraphSummary, NativeQuery, RelationFilter, RelationHit, StorageResult,
};
use crate::graph::{GraphId, KnowledgeGraph};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Routes every operation to the primary backend, retrying connection
/// errors with exponential backoff before handing the operation to the
/// fallback. Any other error from the primary is returned as is.
pub struct FailoverStorage {
    primary: Box<dyn GraphStorage>,
    fallback: Box<dyn GraphStorage>,
    retries: u32,
    backoff: Duration,
}

impl FailoverStorage {
    pub fn new(primary: Box<dyn GraphStorage>, fallback: Box<dyn GraphStorage>) -> Self {
        Self {
            primary,
            fallback,
            retries: 3,
            backoff: Duration::from_millis(100),
        }
    }

    pub fn with_retries(mut self, retries: u32, backoff_ms: u64) -> Self {
        self.retries = retries;
        self.backoff = Duration::from_millis(backoff_ms);
        self
    }

    pub fn primary(&self) -> &dyn GraphStorage {
        self.primary.as_ref()
    }

    pub fn fallback(&self) -> &dyn GraphStorage {
        self.fallback.as_ref()
    }

    fn route<T>(&self, op: &str, f: impl Fn(&dyn GraphStorage) -> StorageResult<T>) -> StorageResult<T> {
        let mut attempt = 0u32;
        loop {
            match f(self.primary.as_ref()) {
                Err(e) if e.is_connection_error() => {
                    if attempt >= self.retries {
                        warn!(
                            "{} on {} failed after {} retries ({}), using {}",
                            op,
                            self.primary.backend_name(),
                            self.retries,
                            e,
                            self.fallback.backend_name()
                        );
                        return f(self.fallback.as_ref());
                    }
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    debug!("{} on {} retry {} in {:?}: {}", op, self.primary.backend_name(), attempt + 1, delay, e);
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl GraphStorage for FailoverStorage {
    fn backend_name(&self) -> &str {
        self.primary.backend_name()
    }

    fn connect(&self) -> StorageResult<()> {
        self.route("connect", |s| s.connect())
    }

    fn is_connected(&self) -> bool {
        self.primary.is_connected() || self.fallback.is_connected()
    }

    fn save(&self, graph: &KnowledgeGraph) -> StorageResult<GraphId> {
        self.route("save", |s| s.save(graph))
    }

    fn load(&self, id: &GraphId) -> StorageResult<KnowledgeGraph> {
        self.route("load", |s| s.load(id))
    }

    fn delete(&self, id: &GraphId) -> StorageResult<()> {
        self.route("delete", |s| s.delete(id))
    }

    fn list_graphs(&self) -> StorageResult<Vec<GraphSummary>> {
        self.route("list_graphs", |s| s.list_graphs())
    }

    fn query_entities(&self, filter: &EntityFilter) -> StorageResult<Vec<EntityHit>> {
        self.route("query_entities", |s| s.query_entities(filter))
    }

    fn query_relations(&self, filter: &RelationFilter) -> StorageResult<Vec<RelationHit>> {
        self.route("query_relations", |s| s.query_relations(filter))
    }

    /// Native queries are only offered while the primary is reachable
    fn as_native_query(&self) -> Option<&dyn NativeQuery> {
        if self.primary.is_connected() {
            self.primary.as_native_query()
        } else {
            None
        }
    }
}
