//! Shared graph handle with snapshot-swap updates
//!
//! Readers clone an `Arc` to the current snapshot and never block writers
//! for longer than the pointer swap. Writers build the merged result in a
//! scratch copy and publish it in one step, so a reader sees either the
//! graph before an update or after it.

use super::store::KnowledgeGraph;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct GraphHandle {
    current: Arc<RwLock<Arc<KnowledgeGraph>>>,
}

impl GraphHandle {
    pub fn new(graph: KnowledgeGraph) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(graph))),
        }
    }

    /// The currently published graph
    pub fn snapshot(&self) -> Arc<KnowledgeGraph> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Apply `f` to a scratch copy and publish it if `f` succeeds.
    ///
    /// Single writer per graph: concurrent calls are not merged with each
    /// other, the last publish wins.
    pub fn update_with<T, E>(
        &self,
        f: impl FnOnce(&mut KnowledgeGraph) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut scratch = (*self.snapshot()).clone();
        let out = f(&mut scratch)?;
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(scratch);
        Ok(out)
    }

    /// Publish a replacement graph
    pub fn replace(&self, graph: KnowledgeGraph) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, EntityType};

    #[test]
    fn test_readers_keep_their_snapshot() {
        let handle = GraphHandle::new(KnowledgeGraph::new("shared"));
        let before = handle.snapshot();

        handle
            .update_with(|g| -> Result<(), ()> {
                g.upsert_entity(Entity::new("A", EntityType::new("thing").unwrap()));
                Ok(())
            })
            .unwrap();

        assert_eq!(before.entity_count(), 0);
        assert_eq!(handle.snapshot().entity_count(), 1);
    }

    #[test]
    fn test_failed_update_publishes_nothing() {
        let handle = GraphHandle::new(KnowledgeGraph::new("shared"));
        let result = handle.update_with(|g| {
            g.upsert_entity(Entity::new("A", EntityType::new("thing").unwrap()));
            Err::<(), _>("boom")
        });
        assert!(result.is_err());
        assert_eq!(handle.snapshot().entity_count(), 0);
    }
}
