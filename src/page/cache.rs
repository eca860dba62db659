//! Page cache and GC-inhibition interfaces
//!
//! The buffer cache and the garbage collector live outside the execution
//! layer. Scans consume them through [`PageCache`] and [`GcRegistry`] and
//! hold what they acquire through RAII guards:
//!
//! - [`Window`]: a read-latched page, released on every exit path
//! - [`GcPin`]: a page protected from reclamation while a cursor position
//!   refers to it across fetch calls

use std::sync::Arc;

use super::errors::PageResult;
use super::layout::{IndexPage, PageId};
use crate::observability::ExecMetrics;

/// A read-latched page image plus the incarnation it was read at
#[derive(Debug, Clone)]
pub struct PageHandle {
    page: Arc<IndexPage>,
    incarnation: u64,
}

impl PageHandle {
    /// Wraps a page image read at `incarnation`
    pub fn new(page: Arc<IndexPage>, incarnation: u64) -> Self {
        Self { page, incarnation }
    }

    /// Returns the page identifier
    pub fn id(&self) -> PageId {
        self.page.id()
    }

    /// Returns the latched page
    pub fn page(&self) -> &IndexPage {
        &self.page
    }

    /// Returns the incarnation the page was read at
    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }
}

/// Buffer cache as seen by the execution layer.
///
/// Every handle returned by `fetch` or `handoff` must be given back through
/// `release` or `handoff`.
pub trait PageCache: Send + Sync {
    /// Read-latches a page
    fn fetch(&self, page: PageId) -> PageResult<PageHandle>;

    /// Releases `window` and latches `next` (sibling traversal).
    ///
    /// `window` is released even when fetching `next` fails.
    fn handoff(&self, window: PageHandle, next: PageId) -> PageResult<PageHandle>;

    /// Releases a latch
    fn release(&self, window: PageHandle);

    /// Current incarnation of a page, read without latching it
    fn incarnation(&self, page: PageId) -> PageResult<u64>;
}

/// Registry that keeps pages from being reclaimed while a cursor refers to them.
///
/// Pins are counted per page; enabling GC on a page with no pins is a no-op.
pub trait GcRegistry: Send + Sync {
    /// Inhibits reclamation of `page`
    fn disable_gc(&self, page: PageId);

    /// Drops one inhibition of `page`
    fn enable_gc(&self, page: PageId);
}

/// A latched page that is released when dropped
pub struct Window<'c> {
    cache: &'c dyn PageCache,
    handle: PageHandle,
    released: bool,
}

impl<'c> Window<'c> {
    /// Latches `page`
    pub fn fetch(cache: &'c dyn PageCache, page: PageId) -> PageResult<Self> {
        let handle = cache.fetch(page)?;
        Ok(Self {
            cache,
            handle,
            released: false,
        })
    }

    /// Returns the latched page
    pub fn page(&self) -> &IndexPage {
        self.handle.page()
    }

    /// Returns the latched page identifier
    pub fn id(&self) -> PageId {
        self.handle.id()
    }

    /// Returns the incarnation the page was latched at
    pub fn incarnation(&self) -> u64 {
        self.handle.incarnation()
    }

    /// Moves the latch to `next`.
    ///
    /// The current latch is released even on failure; the window then holds
    /// nothing and must be dropped.
    pub fn handoff(&mut self, next: PageId) -> PageResult<()> {
        match self.cache.handoff(self.handle.clone(), next) {
            Ok(handle) => {
                self.handle = handle;
                Ok(())
            }
            Err(err) => {
                self.released = true;
                Err(err)
            }
        }
    }

    /// Releases the latch now
    pub fn release(mut self) {
        self.released = true;
        self.cache.release(self.handle.clone());
    }
}

impl Drop for Window<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.cache.release(self.handle.clone());
        }
    }
}

/// GC inhibition on one page, lifted when dropped
pub struct GcPin {
    registry: Arc<dyn GcRegistry>,
    metrics: Arc<ExecMetrics>,
    page: PageId,
}

impl GcPin {
    /// Pins `page`
    pub fn acquire(registry: Arc<dyn GcRegistry>, metrics: Arc<ExecMetrics>, page: PageId) -> Self {
        registry.disable_gc(page);
        metrics.increment_gc_pins_taken();
        Self {
            registry,
            metrics,
            page,
        }
    }

    /// Returns the pinned page
    pub fn page(&self) -> PageId {
        self.page
    }
}

impl std::fmt::Debug for GcPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcPin").field("page", &self.page).finish()
    }
}

impl Drop for GcPin {
    fn drop(&mut self) {
        self.registry.enable_gc(self.page);
        self.metrics.increment_gc_pins_released();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryPageCache;
    use crate::storage::RecordId;

    fn cache_with_two_leaves() -> (MemoryPageCache, PageId) {
        let cache = MemoryPageCache::new();
        let entries: Vec<(Vec<u8>, RecordId)> = (0u8..4).map(|i| (vec![i], RecordId(i as u64))).collect();
        let root = cache.build_tree(&entries, 2).unwrap();
        (cache, root)
    }

    #[test]
    fn test_window_releases_on_drop() {
        let (cache, root) = cache_with_two_leaves();
        {
            let window = Window::fetch(&cache, root).unwrap();
            assert_eq!(window.id(), root);
            assert_eq!(cache.latched_count(), 1);
        }
        assert_eq!(cache.latched_count(), 0);
    }

    #[test]
    fn test_window_handoff_keeps_one_latch() {
        let (cache, _root) = cache_with_two_leaves();
        let leaves = cache.leaf_pages();
        let mut window = Window::fetch(&cache, leaves[0]).unwrap();
        window.handoff(leaves[1]).unwrap();
        assert_eq!(window.id(), leaves[1]);
        assert_eq!(cache.latched_count(), 1);
        window.release();
        assert_eq!(cache.latched_count(), 0);
    }

    #[test]
    fn test_failed_handoff_releases_old_latch() {
        let (cache, root) = cache_with_two_leaves();
        let mut window = Window::fetch(&cache, root).unwrap();
        assert!(window.handoff(PageId(999)).is_err());
        drop(window);
        assert_eq!(cache.latched_count(), 0);
    }

    #[test]
    fn test_gc_pin_pairs_calls() {
        let cache = Arc::new(MemoryPageCache::new());
        let metrics = Arc::new(ExecMetrics::new());
        {
            let pin = GcPin::acquire(cache.clone(), metrics.clone(), PageId(7));
            assert_eq!(pin.page(), PageId(7));
            assert!(!cache.can_reclaim(PageId(7)));
        }
        assert!(cache.can_reclaim(PageId(7)));
        assert_eq!(cache.pin_totals(PageId(7)), (1, 1));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.gc_pins_taken, 1);
        assert_eq!(snapshot.gc_pins_released, 1);
    }
}
