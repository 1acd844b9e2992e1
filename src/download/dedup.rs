use std::collections::HashSet;

/// Item ids verified during this run.
///
/// Lives in memory only: a restart relies on the checkpoint, not on this set,
/// to avoid re-downloading.
#[derive(Debug, Default)]
pub struct DedupTracker {
    seen: HashSet<i64>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, id: i64) -> bool {
        self.seen.contains(&id)
    }

    /// Returns `false` if the id was already marked.
    pub fn mark(&mut self, id: i64) -> bool {
        self.seen.insert(id)
    }
}
