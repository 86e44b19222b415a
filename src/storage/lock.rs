//! Per-graph advisory locks

use crate::graph::GraphId;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

/// Serializes storage operations on the same graph id. Operations on
/// different ids proceed in parallel.
#[derive(Debug, Default)]
pub struct GraphLocks {
    held: Mutex<HashSet<GraphId>>,
    released: Condvar,
}

impl GraphLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `id` is free, then hold it until the guard drops
    pub fn acquire(&self, id: &GraphId) -> GraphLockGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(id) {
            held = self.released.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(id.clone());
        GraphLockGuard {
            locks: self,
            id: id.clone(),
        }
    }

    pub fn is_locked(&self, id: &GraphId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }
}

pub struct GraphLockGuard<'a> {
    locks: &'a GraphLocks,
    id: GraphId,
}

impl Drop for GraphLockGuard<'_> {
    fn drop(&mut self) {
        self.locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_released_on_drop() {
        let locks = GraphLocks::new();
        let id = GraphId::new("g1");
        {
            let _guard = locks.acquire(&id);
            assert!(locks.is_locked(&id));
            assert!(!locks.is_locked(&GraphId::new("g2")));
        }
        assert!(!locks.is_locked(&id));
    }

    #[test]
    fn test_released_on_early_return() {
        fn failing(locks: &GraphLocks, id: &GraphId) -> Result<(), String> {
            let _guard = locks.acquire(id);
            Err("boom".into())
        }
        let locks = GraphLocks::new();
        let id = GraphId::new("g1");
        assert!(failing(&locks, &id).is_err());
        assert!(!locks.is_locked(&id));
    }

    #[test]
    fn test_mutual_exclusion() {
        let locks = Arc::new(GraphLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _guard = locks.acquire(&GraphId::new("shared"));
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
