//! Run-to-thread linkage.
//!
//! The start notification of a run opens a conversation thread; every
//! later notification of that run replies into it. The registry is written
//! by the coordinator when a start message is delivered and read both at
//! dispatch time and by status queries.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use timelapse_core::intent::ThreadRef;
use timelapse_core::types::RunId;

#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: RwLock<HashMap<RunId, ThreadRef>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, run_id: RunId) -> Option<ThreadRef> {
        self.threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&run_id)
            .cloned()
    }

    pub fn insert(&self, run_id: RunId, thread: ThreadRef) {
        self.threads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id, thread);
    }

    /// Forget a run's thread once its conversation has ended.
    pub fn remove(&self, run_id: RunId) -> Option<ThreadRef> {
        self.threads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id)
    }

    pub fn len(&self) -> usize {
        self.threads.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use timelapse_core::types::new_run_id;

    use super::*;

    #[test]
    fn insert_get_remove() {
        let registry = ThreadRegistry::new();
        let run = new_run_id();
        assert!(registry.get(run).is_none());

        registry.insert(run, ThreadRef("1.0".into()));
        assert_eq!(registry.get(run), Some(ThreadRef("1.0".into())));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(run).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn runs_do_not_share_threads() {
        let registry = ThreadRegistry::new();
        let (a, b) = (new_run_id(), new_run_id());
        registry.insert(a, ThreadRef("a".into()));
        assert!(registry.get(b).is_none());
    }
}
