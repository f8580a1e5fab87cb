//! In-memory store for tests.

use super::{Store, StoreError};
use crate::NodeId;

/// In-memory store. Nothing survives a restart; ideal for unit tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    term: u64,
    voted_for: Option<NodeId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn current_term(&self) -> Result<u64, StoreError> {
        Ok(self.term)
    }

    fn set_current_term(&mut self, term: u64) -> Result<(), StoreError> {
        self.term = term;
        Ok(())
    }

    fn voted_for(&self) -> Result<Option<NodeId>, StoreError> {
        Ok(self.voted_for.clone())
    }

    fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<(), StoreError> {
        self.voted_for = voted_for;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.current_term().unwrap(), 0);
        store.set_current_term(5).unwrap();
        assert_eq!(store.current_term().unwrap(), 5);
    }

    #[test]
    fn voted_for_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.voted_for().unwrap(), None);
        store.set_voted_for(Some(NodeId::from("a"))).unwrap();
        assert_eq!(store.voted_for().unwrap(), Some(NodeId::from("a")));
        store.set_voted_for(None).unwrap();
        assert_eq!(store.voted_for().unwrap(), None);
    }
}
