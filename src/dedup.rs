use crate::image_reference::DedupKey;
use std::collections::HashSet;
use std::sync::Mutex;

/// Remembers which image identities already triggered a pipeline.
///
/// Keys are shared by all resource kinds: a Pod and a Deployment running the same
/// `repository:tag` are deduplicated against each other.
pub trait DedupStore: Send + Sync {
    /// Returns `true` only for the call that first records `key`.
    fn check_and_mark(&self, key: &DedupKey) -> bool;
}

/// Process lifetime set of keys. Never evicts.
#[derive(Debug, Default)]
pub struct InMemoryDedupCache {
    seen: Mutex<HashSet<DedupKey>>,
}

impl InMemoryDedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl DedupStore for InMemoryDedupCache {
    fn check_and_mark(&self, key: &DedupKey) -> bool {
        // a poisoned set is still a valid set, the panicking holder could only have inserted
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(key.clone())
    }
}
