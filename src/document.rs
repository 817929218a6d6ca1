use crate::error::FillError;
use crate::metrics::VirtualizationMetrics;
use crate::print::PrintPage;
use crate::types::Size;
use crate::virtualization::{StoreHandle, Virtualizer};

enum PageSlot {
    Resident {
        page: PrintPage,
        /// Stream holding an earlier copy of this page, if it was reloaded.
        handle: Option<StoreHandle>,
        dirty: bool,
    },
    Virtualized(StoreHandle),
    /// Transient state while a slot is being moved.
    Empty,
}

/// Ordered pages of one fill. Finished pages may be swapped out through a
/// [`Virtualizer`]; access reloads them transparently.
pub struct PrintDocument {
    pub page_size: Size,
    slots: Vec<PageSlot>,
    current: Option<usize>,
    virtualizer: Option<Virtualizer>,
    next_element_id: u64,
}

impl PrintDocument {
    pub fn new() -> Self {
        Self {
            page_size: Size::a4(),
            slots: Vec::new(),
            current: None,
            virtualizer: None,
            next_element_id: 1,
        }
    }

    pub fn virtualized(virtualizer: Virtualizer) -> Self {
        let mut document = Self::new();
        document.virtualizer = Some(virtualizer);
        document
    }

    pub fn with_page_size(mut self, page_size: Size) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn page_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_virtualized(&self) -> bool {
        self.virtualizer.is_some()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Number of pages currently held in memory.
    pub fn resident_pages(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, PageSlot::Resident { .. }))
            .count()
    }

    pub fn allocate_element_id(&mut self) -> u64 {
        let id = self.next_element_id;
        self.next_element_id += 1;
        id
    }

    /// Appends `page` as the new current page, finishing the previous one.
    pub fn add_page(&mut self, page: PrintPage) -> Result<usize, FillError> {
        self.finish_page()?;
        let index = self.slots.len();
        self.slots.push(PageSlot::Resident {
            page,
            handle: None,
            dirty: true,
        });
        self.current = Some(index);
        Ok(index)
    }

    pub fn current_page_mut(&mut self) -> Option<&mut PrintPage> {
        let index = self.current?;
        match self.slots.get_mut(index) {
            Some(PageSlot::Resident { page, dirty, .. }) => {
                *dirty = true;
                Some(page)
            }
            _ => None,
        }
    }

    /// Hands the current page to the residency policy. Without a current page
    /// this does nothing.
    pub fn finish_page(&mut self) -> Result<(), FillError> {
        let Some(index) = self.current.take() else {
            return Ok(());
        };
        if let Some(virtualizer) = self.virtualizer.as_mut() {
            virtualizer.touch(index);
        }
        self.evict()
    }

    fn evict(&mut self) -> Result<(), FillError> {
        let Some(virtualizer) = self.virtualizer.as_mut() else {
            return Ok(());
        };
        for index in virtualizer.take_evictions() {
            if Some(index) == self.current {
                continue;
            }
            let Some(slot) = self.slots.get_mut(index) else {
                continue;
            };
            let (page, handle, dirty) = match std::mem::replace(slot, PageSlot::Empty) {
                PageSlot::Resident {
                    page,
                    handle,
                    dirty,
                } => (page, handle, dirty),
                other => {
                    *slot = other;
                    continue;
                }
            };
            let stored = match (handle, dirty) {
                (Some(handle), false) => {
                    virtualizer.context().record_clean_drop();
                    log::trace!("dropped clean page {index}");
                    Ok(handle)
                }
                (stale, _) => stale
                    .map_or(Ok(()), |stale| virtualizer.discard(stale))
                    .and_then(|()| virtualizer.write(index, &page)),
            };
            match stored {
                Ok(handle) => *slot = PageSlot::Virtualized(handle),
                Err(err) => {
                    *slot = PageSlot::Resident {
                        page,
                        handle: None,
                        dirty: true,
                    };
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn ensure_resident(&mut self, index: usize, mark_dirty: bool) -> Result<(), FillError> {
        let count = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(FillError::PageOutOfRange { index, count })?;
        match slot {
            PageSlot::Resident { dirty, .. } => {
                *dirty |= mark_dirty;
            }
            PageSlot::Virtualized(handle) => {
                let handle = *handle;
                let virtualizer = self.virtualizer.as_ref().ok_or(FillError::UnknownHandle(handle.0))?;
                let page = virtualizer.read(index, handle)?;
                *slot = PageSlot::Resident {
                    page,
                    handle: Some(handle),
                    dirty: mark_dirty,
                };
            }
            PageSlot::Empty => return Err(FillError::PageOutOfRange { index, count }),
        }
        if Some(index) != self.current {
            if let Some(virtualizer) = self.virtualizer.as_mut() {
                virtualizer.touch(index);
            }
            self.evict()?;
        }
        Ok(())
    }

    pub fn page(&mut self, index: usize) -> Result<&PrintPage, FillError> {
        self.ensure_resident(index, false)?;
        match self.slots.get(index) {
            Some(PageSlot::Resident { page, .. }) => Ok(page),
            _ => Err(FillError::PageOutOfRange {
                index,
                count: self.slots.len(),
            }),
        }
    }

    /// Mutable access; a reloaded page becomes dirty and is rewritten on its
    /// next eviction.
    pub fn page_mut(&mut self, index: usize) -> Result<&mut PrintPage, FillError> {
        self.ensure_resident(index, true)?;
        let count = self.slots.len();
        match self.slots.get_mut(index) {
            Some(PageSlot::Resident { page, .. }) => Ok(page),
            _ => Err(FillError::PageOutOfRange { index, count }),
        }
    }

    pub fn metrics(&self) -> VirtualizationMetrics {
        self.virtualizer
            .as_ref()
            .map(|virtualizer| virtualizer.context().metrics())
            .unwrap_or_default()
    }

    /// Loads every page and releases the store.
    pub fn into_pages(mut self) -> Result<Vec<PrintPage>, FillError> {
        self.current = None;
        let slots = std::mem::take(&mut self.slots);
        let mut pages = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                PageSlot::Resident { page, .. } => pages.push(page),
                PageSlot::Virtualized(handle) => {
                    let Some(virtualizer) = self.virtualizer.as_ref() else {
                        return Err(FillError::UnknownHandle(handle.0));
                    };
                    pages.push(virtualizer.read(index, handle)?);
                }
                PageSlot::Empty => {
                    return Err(FillError::PageOutOfRange {
                        index,
                        count: pages.len(),
                    });
                }
            }
        }
        self.dispose()?;
        Ok(pages)
    }

    pub fn dispose(&mut self) -> Result<(), FillError> {
        match self.virtualizer.as_ref() {
            Some(virtualizer) => virtualizer.context().dispose(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for PrintDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintDocument")
            .field("page_size", &self.page_size)
            .field("pages", &self.slots.len())
            .field("resident", &self.resident_pages())
            .field("virtualized", &self.is_virtualized())
            .finish()
    }
}

impl Default for PrintDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PrintDocument {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            log::warn!("failed to dispose virtualization store: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone::NodeId;
    use crate::print::{ElementStyle, PrintElement, PrintElementKind};
    use crate::types::{Pt, Rect};
    use crate::virtualization::VirtualizationContext;
    use std::sync::Arc;

    fn page_with(text: &str) -> PrintPage {
        let mut page = PrintPage::new();
        page.push(PrintElement::new(
            NodeId::next(),
            Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(60), Pt::from_i32(12)),
            Arc::new(ElementStyle::default()),
            PrintElementKind::Text {
                text: text.to_string(),
                delayed: None,
            },
        ));
        page
    }

    fn virtualized(max_resident: usize) -> (PrintDocument, VirtualizationContext) {
        let context = VirtualizationContext::in_memory();
        let document = PrintDocument::virtualized(Virtualizer::new(context.clone(), max_resident));
        (document, context)
    }

    #[test]
    fn finished_pages_beyond_the_limit_are_swapped_out() {
        let (mut document, context) = virtualized(1);
        for n in 0..4 {
            document.add_page(page_with(&format!("page {n}"))).unwrap();
        }
        // current page 3 plus one finished page in memory
        assert_eq!(document.resident_pages(), 2);
        assert_eq!(context.metrics().pages_evicted, 2);
        assert_eq!(document.page(0).unwrap().texts(), vec!["page 0"]);
        assert_eq!(context.metrics().pages_loaded, 1);
        assert_eq!(document.resident_pages(), 2);
    }

    #[test]
    fn clean_reloads_are_dropped_without_rewriting() {
        let (mut document, context) = virtualized(1);
        for n in 0..3 {
            document.add_page(page_with(&format!("page {n}"))).unwrap();
        }
        document.finish_page().unwrap();
        // reloading 0 pushes out page 2, which was never written
        document.page(0).unwrap();
        let written = context.metrics().pages_evicted;
        document.page(1).unwrap();
        let metrics = context.metrics();
        assert_eq!(metrics.pages_evicted, written);
        assert_eq!(metrics.clean_drops, 1);

        document.page_mut(0).unwrap().elements.clear();
        document.page(1).unwrap();
        assert_eq!(context.metrics().pages_evicted, written + 1);
        assert!(document.page(0).unwrap().is_empty());
    }

    #[test]
    fn dropping_the_document_disposes_the_store() {
        let (mut document, context) = virtualized(1);
        for n in 0..3 {
            document.add_page(page_with(&format!("{n}"))).unwrap();
        }
        assert!(context.stored_streams() > 0);
        drop(document);
        assert!(context.is_disposed());
    }

    #[test]
    fn into_pages_loads_everything_in_order() {
        let (mut document, context) = virtualized(1);
        for n in 0..5 {
            document.add_page(page_with(&n.to_string())).unwrap();
        }
        let pages = document.into_pages().unwrap();
        let texts: Vec<String> = pages.iter().flat_map(|page| page.texts()).collect();
        assert_eq!(texts, vec!["0", "1", "2", "3", "4"]);
        assert!(context.is_disposed());
    }

    #[test]
    fn out_of_range_pages_are_reported() {
        let mut document = PrintDocument::new();
        document.add_page(PrintPage::new()).unwrap();
        assert!(matches!(
            document.page(3),
            Err(FillError::PageOutOfRange { index: 3, count: 1 })
        ));
    }
}
