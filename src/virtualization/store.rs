use crate::error::FillError;
use std::collections::HashMap;

/// Opaque key of one stored stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreHandle(pub u64);

/// Backing storage for virtualized pages.
pub trait SwapStore: Send {
    fn store(&mut self, bytes: &[u8]) -> Result<StoreHandle, FillError>;

    fn load(&mut self, handle: StoreHandle) -> Result<Vec<u8>, FillError>;

    /// Frees the space of one stream. Unknown handles are ignored.
    fn discard(&mut self, handle: StoreHandle) -> Result<(), FillError>;

    /// Releases everything the store holds. Called once.
    fn dispose(&mut self) -> Result<(), FillError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    next: u64,
    streams: HashMap<StoreHandle, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl SwapStore for MemoryStore {
    fn store(&mut self, bytes: &[u8]) -> Result<StoreHandle, FillError> {
        let handle = StoreHandle(self.next);
        self.next += 1;
        self.streams.insert(handle, bytes.to_vec());
        Ok(handle)
    }

    fn load(&mut self, handle: StoreHandle) -> Result<Vec<u8>, FillError> {
        self.streams
            .get(&handle)
            .cloned()
            .ok_or(FillError::UnknownHandle(handle.0))
    }

    fn discard(&mut self, handle: StoreHandle) -> Result<(), FillError> {
        self.streams.remove(&handle);
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), FillError> {
        self.streams.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_keeps_streams_until_discarded() {
        let mut store = MemoryStore::new();
        let a = store.store(b"first").unwrap();
        let b = store.store(b"second").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.load(a).unwrap(), b"first");
        assert_eq!(store.load(a).unwrap(), b"first");
        store.discard(a).unwrap();
        assert!(matches!(store.load(a), Err(FillError::UnknownHandle(0))));
        assert_eq!(store.len(), 1);
        store.dispose().unwrap();
        assert!(store.is_empty());
    }
}
