//! Storage seam for ledger state.

use crate::error::Result;
use crate::state::SvState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Key-value store with a revision-checked write.
///
/// Implementations must make `compare_and_swap` atomic with respect to
/// other calls on the same node id.
pub trait SvStore: Send + Sync {
    /// Current state of a node, if it has ever been written.
    fn load(&self, node_id: &str) -> Result<Option<SvState>>;

    /// Write `next` only if the stored revision equals `expected`
    /// (`None` meaning no row yet). Returns whether the write happened.
    fn compare_and_swap(&self, node_id: &str, expected: Option<u64>, next: &SvState) -> Result<bool>;

    /// All stored states, for operator inspection.
    fn list(&self) -> Result<Vec<SvState>>;
}

impl<T: SvStore + ?Sized> SvStore for Arc<T> {
    fn load(&self, node_id: &str) -> Result<Option<SvState>> {
        (**self).load(node_id)
    }

    fn compare_and_swap(&self, node_id: &str, expected: Option<u64>, next: &SvState) -> Result<bool> {
        (**self).compare_and_swap(node_id, expected, next)
    }

    fn list(&self) -> Result<Vec<SvState>> {
        (**self).list()
    }
}

/// Process-local store. Lost on restart and not shared between instances.
#[derive(Debug, Default)]
pub struct MemorySvStore {
    states: Mutex<HashMap<String, SvState>>,
}

impl MemorySvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SvStore for MemorySvStore {
    fn load(&self, node_id: &str) -> Result<Option<SvState>> {
        Ok(self.states.lock().get(node_id).cloned())
    }

    fn compare_and_swap(&self, node_id: &str, expected: Option<u64>, next: &SvState) -> Result<bool> {
        let mut states = self.states.lock();
        let current = states.get(node_id).map(|s| s.revision);
        if current != expected {
            return Ok(false);
        }
        states.insert(node_id.to_string(), next.clone());
        Ok(true)
    }

    fn list(&self) -> Result<Vec<SvState>> {
        let mut states: Vec<SvState> = self.states.lock().values().cloned().collect();
        states.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(states)
    }
}
