use super::serializer::SerializerRegistry;
use super::store::{MemoryStore, StoreHandle, SwapStore};
use super::{ReadHook, read_page, write_page};
use crate::debug::FillTrace;
use crate::error::FillError;
use crate::metrics::VirtualizationMetrics;
use crate::print::PrintPage;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

struct ContextState {
    store: Option<Box<dyn SwapStore>>,
    /// Stream id each stored handle was written with.
    handles: HashMap<StoreHandle, u64>,
    disposed: bool,
    metrics: VirtualizationMetrics,
}

/// Shared owner of a swap store. Cloning shares the store; disposal from any
/// clone is final and idempotent.
#[derive(Clone)]
pub struct VirtualizationContext {
    state: Arc<Mutex<ContextState>>,
}

impl VirtualizationContext {
    pub fn new(store: Box<dyn SwapStore>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ContextState {
                store: Some(store),
                handles: HashMap::new(),
                disposed: false,
                metrics: VirtualizationMetrics::default(),
            })),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self, stream: u64, bytes: &[u8]) -> Result<StoreHandle, FillError> {
        let mut state = self.lock();
        let state = &mut *state;
        let store = match (&mut state.store, state.disposed) {
            (Some(store), false) => store,
            _ => return Err(FillError::StoreDisposed),
        };
        let handle = store.store(bytes)?;
        state.handles.insert(handle, stream);
        state.metrics.pages_evicted += 1;
        state.metrics.bytes_written += bytes.len() as u64;
        Ok(handle)
    }

    /// Returns the stream id the bytes were written with and the bytes.
    pub fn load(&self, handle: StoreHandle) -> Result<(u64, Vec<u8>), FillError> {
        let mut state = self.lock();
        let state = &mut *state;
        let store = match (&mut state.store, state.disposed) {
            (Some(store), false) => store,
            _ => return Err(FillError::StoreDisposed),
        };
        let Some(stream) = state.handles.get(&handle).copied() else {
            return Err(FillError::UnknownHandle(handle.0));
        };
        let bytes = store.load(handle)?;
        state.metrics.pages_loaded += 1;
        state.metrics.bytes_read += bytes.len() as u64;
        Ok((stream, bytes))
    }

    pub fn discard(&self, handle: StoreHandle) -> Result<(), FillError> {
        let mut state = self.lock();
        if state.disposed {
            return Ok(());
        }
        state.handles.remove(&handle);
        match state.store.as_mut() {
            Some(store) => store.discard(handle),
            None => Ok(()),
        }
    }

    pub(crate) fn record_clean_drop(&self) {
        self.lock().metrics.clean_drops += 1;
    }

    pub fn dispose(&self) -> Result<(), FillError> {
        let mut state = self.lock();
        if state.disposed {
            return Ok(());
        }
        state.disposed = true;
        state.handles.clear();
        match state.store.take() {
            Some(mut store) => store.dispose(),
            None => Ok(()),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn stored_streams(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn metrics(&self) -> VirtualizationMetrics {
        self.lock().metrics
    }
}

impl std::fmt::Debug for VirtualizationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("VirtualizationContext")
            .field("streams", &state.handles.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// Residency policy of a [`crate::document::PrintDocument`]: tracks finished
/// pages in least-recently-used order and moves pages in and out of the
/// context's store.
pub struct Virtualizer {
    context: VirtualizationContext,
    registry: Arc<SerializerRegistry>,
    hook: Option<Arc<dyn ReadHook>>,
    max_resident_pages: usize,
    lru: VecDeque<usize>,
    trace: Option<Arc<FillTrace>>,
}

impl Virtualizer {
    pub fn new(context: VirtualizationContext, max_resident_pages: usize) -> Self {
        Self {
            context,
            registry: Arc::new(SerializerRegistry::with_defaults()),
            hook: None,
            max_resident_pages: max_resident_pages.max(1),
            lru: VecDeque::new(),
            trace: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<SerializerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_read_hook(mut self, hook: Arc<dyn ReadHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub(crate) fn with_trace(mut self, trace: Option<Arc<FillTrace>>) -> Self {
        self.trace = trace;
        self
    }

    pub fn context(&self) -> &VirtualizationContext {
        &self.context
    }

    pub fn max_resident_pages(&self) -> usize {
        self.max_resident_pages
    }

    pub fn resident(&self) -> usize {
        self.lru.len()
    }

    /// Marks a finished resident page as most recently used.
    pub fn touch(&mut self, index: usize) {
        self.forget(index);
        self.lru.push_back(index);
    }

    pub fn forget(&mut self, index: usize) {
        self.lru.retain(|&page| page != index);
    }

    /// Least recently used pages beyond the residency limit, oldest first.
    pub fn take_evictions(&mut self) -> Vec<usize> {
        let excess = self.lru.len().saturating_sub(self.max_resident_pages);
        self.lru.drain(..excess).collect()
    }

    pub fn write(&self, index: usize, page: &PrintPage) -> Result<StoreHandle, FillError> {
        let stream = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let bytes = write_page(&self.registry, stream, page)?;
        let handle = self.context.store(stream, &bytes)?;
        log::trace!(
            "evicted page {index} as stream {stream} ({} bytes)",
            bytes.len()
        );
        if let Some(trace) = self.trace.as_deref() {
            trace.log_event(json!({
                "type": "virt.evict",
                "page": index,
                "stream": stream,
                "bytes": bytes.len(),
            }));
            trace.increment("virt.evict", 1);
        }
        Ok(handle)
    }

    pub fn read(&self, index: usize, handle: StoreHandle) -> Result<PrintPage, FillError> {
        let (stream, bytes) = self.context.load(handle)?;
        let page = read_page(&self.registry, self.hook.as_deref(), stream, &bytes)?;
        log::trace!("loaded page {index} from stream {stream}");
        if let Some(trace) = self.trace.as_deref() {
            trace.log_event(json!({
                "type": "virt.load",
                "page": index,
                "stream": stream,
                "bytes": bytes.len(),
            }));
            trace.increment("virt.load", 1);
        }
        Ok(page)
    }

    pub fn discard(&self, handle: StoreHandle) -> Result<(), FillError> {
        self.context.discard(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtualization::tests::sample_page;

    #[test]
    fn disposal_is_idempotent_and_final() {
        let context = VirtualizationContext::in_memory();
        let handle = context.store(4, b"bytes").unwrap();
        assert_eq!(context.load(handle).unwrap(), (4, b"bytes".to_vec()));

        let shared = context.clone();
        shared.dispose().unwrap();
        context.dispose().unwrap();
        assert!(context.is_disposed());
        assert!(matches!(context.load(handle), Err(FillError::StoreDisposed)));
        assert!(matches!(
            context.store(5, b"late"),
            Err(FillError::StoreDisposed)
        ));
        context.discard(handle).unwrap();
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let context = VirtualizationContext::in_memory();
        let err = context.load(StoreHandle(42)).unwrap_err();
        assert!(matches!(err, FillError::UnknownHandle(42)));
        assert!(err.is_fatal());
    }

    #[test]
    fn evictions_are_least_recently_used_first() {
        let mut virtualizer = Virtualizer::new(VirtualizationContext::in_memory(), 2);
        for page in 0..4 {
            virtualizer.touch(page);
        }
        virtualizer.touch(0);
        assert_eq!(virtualizer.take_evictions(), vec![1, 2]);
        assert_eq!(virtualizer.resident(), 2);
        assert!(virtualizer.take_evictions().is_empty());
    }

    #[test]
    fn pages_survive_a_store_round_trip() {
        let virtualizer = Virtualizer::new(VirtualizationContext::in_memory(), 1);
        let page = sample_page();
        let handle = virtualizer.write(3, &page).unwrap();
        assert_eq!(virtualizer.read(3, handle).unwrap(), page);
        let metrics = virtualizer.context().metrics();
        assert_eq!(metrics.pages_evicted, 1);
        assert_eq!(metrics.pages_loaded, 1);
        assert_eq!(metrics.bytes_written, metrics.bytes_read);
    }
}
