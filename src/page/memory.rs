//! In-memory page cache
//!
//! Holds raw page images and implements both [`PageCache`] and
//! [`GcRegistry`]. Every latch and pin is counted per page so tests can
//! check pairing. Mutation helpers (split, insert, remove) rewrite pages in
//! place and bump their incarnation, the way a concurrent writer would.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::cache::{GcRegistry, PageCache, PageHandle};
use super::errors::{PageError, PageResult};
use super::layout::{IndexPage, IndexPageBuilder, PageEntry, PageId, PageKind};
use crate::config::ExecConfig;
use crate::index::compare_entries;
use crate::storage::RecordId;

#[derive(Default)]
struct CacheState {
    pages: HashMap<PageId, Vec<u8>>,
    incarnations: HashMap<PageId, u64>,
    latches: HashMap<PageId, usize>,
    pins: HashMap<PageId, u64>,
    pin_totals: HashMap<PageId, (u64, u64)>,
    next_page: u32,
}

impl CacheState {
    fn allocate(&mut self) -> PageId {
        self.next_page += 1;
        PageId(self.next_page)
    }

    fn store(&mut self, id: PageId, image: Vec<u8>) {
        self.pages.insert(id, image);
        *self.incarnations.entry(id).or_insert(0) += 1;
    }

    fn parse(&self, id: PageId) -> PageResult<IndexPage> {
        let image = self.pages.get(&id).ok_or(PageError::NotFound(id))?;
        IndexPage::parse(id, image.clone(), false)
    }

    fn write(
        &mut self,
        id: PageId,
        kind: PageKind,
        level: u8,
        sibling: Option<PageId>,
        entries: &[PageEntry],
    ) -> PageResult<()> {
        let mut builder = match kind {
            PageKind::Leaf => IndexPageBuilder::leaf(id),
            PageKind::Interior => IndexPageBuilder::interior(id, level),
        }
        .sibling(sibling);
        for entry in entries {
            builder.push(&entry.key, entry.record_id, entry.child)?;
        }
        self.store(id, builder.finish());
        Ok(())
    }

    /// Walks from `root` to the leaf that should hold `(key, record_id)`,
    /// returning the path of interior pages above it.
    fn descend(
        &self,
        root: PageId,
        key: &[u8],
        record_id: RecordId,
        descending: bool,
    ) -> PageResult<(Vec<PageId>, PageId)> {
        let mut path = Vec::new();
        let mut current = self.parse(root)?;
        while !current.is_leaf() {
            let entries = current.entries()?;
            let mut chosen = None;
            for entry in &entries {
                if chosen.is_some()
                    && compare_entries(&entry.key, entry.record_id, key, record_id, descending)
                        == Ordering::Greater
                {
                    break;
                }
                chosen = entry.child;
            }
            let child = chosen.ok_or(PageError::BadEntry {
                page: current.id(),
                offset: 0,
                reason: "interior page without entries",
            })?;
            path.push(current.id());
            current = self.parse(child)?;
        }
        Ok((path, current.id()))
    }

    fn find_parent(&self, child: PageId) -> PageResult<Option<PageId>> {
        for &id in self.pages.keys() {
            let page = self.parse(id)?;
            if page.is_leaf() {
                continue;
            }
            if page.entries()?.iter().any(|e| e.child == Some(child)) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }
}

/// In-memory implementation of the page cache and GC registry
pub struct MemoryPageCache {
    state: Mutex<CacheState>,
    verify_checksums: bool,
}

impl Default for MemoryPageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPageCache {
    /// Creates an empty cache that verifies page checksums on fetch
    pub fn new() -> Self {
        Self::with_checksums(true)
    }

    /// Creates an empty cache with checksum verification on or off
    pub fn with_checksums(verify_checksums: bool) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            verify_checksums,
        }
    }

    /// Creates an empty cache honoring `verify_page_checksums`
    pub fn for_config(config: &ExecConfig) -> Self {
        Self::with_checksums(config.verify_page_checksums)
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Builds an index tree from entries already in index order and
    /// returns its root.
    ///
    /// The tree always has at least one interior level, so the root stays
    /// the same page when leaves are split later.
    pub fn build_tree(&self, entries: &[(Vec<u8>, RecordId)], capacity: usize) -> PageResult<PageId> {
        let capacity = capacity.max(1);
        let mut state = self.state();

        let chunks: Vec<&[(Vec<u8>, RecordId)]> = if entries.is_empty() {
            vec![entries]
        } else {
            entries.chunks(capacity).collect()
        };
        let leaf_ids: Vec<PageId> = chunks.iter().map(|_| state.allocate()).collect();

        // (first key, first record id, page) of each page on the level below
        let mut level_below = Vec::with_capacity(leaf_ids.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let page_entries: Vec<PageEntry> = chunk
                .iter()
                .map(|(key, rid)| PageEntry {
                    key: key.clone(),
                    record_id: *rid,
                    child: None,
                })
                .collect();
            let sibling = leaf_ids.get(i + 1).copied();
            state.write(leaf_ids[i], PageKind::Leaf, 0, sibling, &page_entries)?;
            let (key, rid) = chunk
                .first()
                .map(|(k, r)| (k.clone(), *r))
                .unwrap_or((Vec::new(), RecordId(0)));
            level_below.push((key, rid, leaf_ids[i]));
        }

        let mut level = 1u8;
        loop {
            let groups: Vec<_> = level_below.chunks(capacity.max(2)).map(|g| g.to_vec()).collect();
            let ids: Vec<PageId> = groups.iter().map(|_| state.allocate()).collect();
            let mut next_level = Vec::with_capacity(ids.len());
            for (i, group) in groups.iter().enumerate() {
                let page_entries: Vec<PageEntry> = group
                    .iter()
                    .map(|(key, rid, child)| PageEntry {
                        key: key.clone(),
                        record_id: *rid,
                        child: Some(*child),
                    })
                    .collect();
                let sibling = ids.get(i + 1).copied();
                state.write(ids[i], PageKind::Interior, level, sibling, &page_entries)?;
                let (key, rid, _) = &group[0];
                next_level.push((key.clone(), *rid, ids[i]));
            }
            if next_level.len() == 1 {
                return Ok(next_level[0].2);
            }
            level_below = next_level;
            level += 1;
        }
    }

    /// Leaf pages of every tree, each chain in sibling order
    pub fn leaf_pages(&self) -> Vec<PageId> {
        let state = self.state();
        let mut leaves = Vec::new();
        let mut successors = HashSet::new();
        for &id in state.pages.keys() {
            if let Ok(page) = state.parse(id) {
                if page.is_leaf() {
                    leaves.push(id);
                    if let Some(next) = page.sibling() {
                        successors.insert(next);
                    }
                }
            }
        }

        let mut heads: Vec<PageId> = leaves.into_iter().filter(|id| !successors.contains(id)).collect();
        heads.sort();

        let mut ordered = Vec::new();
        for head in heads {
            let mut current = Some(head);
            while let Some(id) = current {
                ordered.push(id);
                current = state.parse(id).ok().and_then(|p| p.sibling());
            }
        }
        ordered
    }

    /// Leaf page currently holding an entry for `record_id`
    pub fn leaf_of(&self, record_id: RecordId) -> Option<PageId> {
        let leaves = self.leaf_pages();
        let state = self.state();
        leaves.into_iter().find(|&id| {
            state
                .parse(id)
                .and_then(|p| p.entries())
                .map(|entries| entries.iter().any(|e| e.record_id == record_id))
                .unwrap_or(false)
        })
    }

    /// Decoded entries of a page
    pub fn page_entries(&self, page: PageId) -> PageResult<Vec<PageEntry>> {
        self.state().parse(page)?.entries()
    }

    /// Splits a leaf so that entries from `at` onwards move to a new right
    /// sibling. Both pages and the parent get a new incarnation.
    pub fn split_leaf(&self, leaf: PageId, at: usize) -> PageResult<PageId> {
        let mut state = self.state();
        let page = state.parse(leaf)?;
        let entries = page.entries()?;
        if !page.is_leaf() || at == 0 || at >= entries.len() {
            return Err(PageError::BadEntry {
                page: leaf,
                offset: at,
                reason: "split point outside leaf",
            });
        }

        let right_id = state.allocate();
        let (left, right) = entries.split_at(at);
        state.write(right_id, PageKind::Leaf, 0, page.sibling(), right)?;
        state.write(leaf, PageKind::Leaf, 0, Some(right_id), left)?;

        if let Some(parent_id) = state.find_parent(leaf)? {
            let parent = state.parse(parent_id)?;
            let mut parent_entries = parent.entries()?;
            let position = parent_entries
                .iter()
                .position(|e| e.child == Some(leaf))
                .map(|p| p + 1)
                .unwrap_or(parent_entries.len());
            parent_entries.insert(
                position,
                PageEntry {
                    key: right[0].key.clone(),
                    record_id: right[0].record_id,
                    child: Some(right_id),
                },
            );
            state.write(
                parent_id,
                PageKind::Interior,
                parent.level(),
                parent.sibling(),
                &parent_entries,
            )?;
        }
        Ok(right_id)
    }

    /// Inserts a leaf entry in index order, rewriting the target leaf
    pub fn insert_entry(
        &self,
        root: PageId,
        key: &[u8],
        record_id: RecordId,
        descending: bool,
    ) -> PageResult<PageId> {
        let mut state = self.state();
        let (_, leaf) = state.descend(root, key, record_id, descending)?;
        let page = state.parse(leaf)?;
        let mut entries = page.entries()?;
        let position = entries
            .iter()
            .position(|e| compare_entries(&e.key, e.record_id, key, record_id, descending) == Ordering::Greater)
            .unwrap_or(entries.len());
        entries.insert(
            position,
            PageEntry {
                key: key.to_vec(),
                record_id,
                child: None,
            },
        );
        state.write(leaf, PageKind::Leaf, 0, page.sibling(), &entries)?;
        Ok(leaf)
    }

    /// Removes a leaf entry. Returns false if it was not present.
    pub fn remove_entry(
        &self,
        root: PageId,
        key: &[u8],
        record_id: RecordId,
        descending: bool,
    ) -> PageResult<bool> {
        let mut state = self.state();
        let (_, mut leaf) = state.descend(root, key, record_id, descending)?;
        loop {
            let page = state.parse(leaf)?;
            let mut entries = page.entries()?;
            if let Some(position) = entries
                .iter()
                .position(|e| e.key == key && e.record_id == record_id)
            {
                entries.remove(position);
                state.write(leaf, PageKind::Leaf, 0, page.sibling(), &entries)?;
                return Ok(true);
            }
            let past = entries
                .last()
                .map(|e| compare_entries(&e.key, e.record_id, key, record_id, descending) == Ordering::Greater)
                .unwrap_or(false);
            match page.sibling() {
                Some(next) if !past => leaf = next,
                _ => return Ok(false),
            }
        }
    }

    /// Flips one byte of a page image without fixing its checksum
    pub fn corrupt_page(&self, page: PageId) -> PageResult<()> {
        let mut state = self.state();
        let image = state.pages.get_mut(&page).ok_or(PageError::NotFound(page))?;
        if let Some(last) = image.last_mut() {
            *last ^= 0xFF;
        }
        Ok(())
    }

    /// Number of latches currently held across all pages
    pub fn latched_count(&self) -> usize {
        self.state().latches.values().sum()
    }

    /// Whether the garbage collector may reuse `page`
    pub fn can_reclaim(&self, page: PageId) -> bool {
        self.state().pins.get(&page).copied().unwrap_or(0) == 0
    }

    /// Pages currently protected from reclamation
    pub fn pinned_pages(&self) -> Vec<PageId> {
        let mut pinned: Vec<PageId> = self
            .state()
            .pins
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(&id, _)| id)
            .collect();
        pinned.sort();
        pinned
    }

    /// Lifetime `(disable_gc, enable_gc)` call counts for `page`
    pub fn pin_totals(&self, page: PageId) -> (u64, u64) {
        self.state().pin_totals.get(&page).copied().unwrap_or((0, 0))
    }

    /// Every page that has ever been pinned
    pub fn pinned_history(&self) -> Vec<PageId> {
        let mut pages: Vec<PageId> = self.state().pin_totals.keys().copied().collect();
        pages.sort();
        pages
    }
}

impl PageCache for MemoryPageCache {
    fn fetch(&self, page: PageId) -> PageResult<PageHandle> {
        let mut state = self.state();
        let image = state.pages.get(&page).ok_or(PageError::NotFound(page))?;
        let parsed = IndexPage::parse(page, image.clone(), self.verify_checksums)?;
        let incarnation = state.incarnations.get(&page).copied().unwrap_or(0);
        *state.latches.entry(page).or_insert(0) += 1;
        Ok(PageHandle::new(Arc::new(parsed), incarnation))
    }

    fn handoff(&self, window: PageHandle, next: PageId) -> PageResult<PageHandle> {
        self.release(window);
        self.fetch(next)
    }

    fn release(&self, window: PageHandle) {
        let mut state = self.state();
        if let Some(count) = state.latches.get_mut(&window.id()) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.latches.remove(&window.id());
            }
        }
    }

    fn incarnation(&self, page: PageId) -> PageResult<u64> {
        self.state()
            .incarnations
            .get(&page)
            .copied()
            .ok_or(PageError::NotFound(page))
    }
}

impl GcRegistry for MemoryPageCache {
    fn disable_gc(&self, page: PageId) {
        let mut state = self.state();
        *state.pins.entry(page).or_insert(0) += 1;
        state.pin_totals.entry(page).or_insert((0, 0)).0 += 1;
    }

    fn enable_gc(&self, page: PageId) {
        let mut state = self.state();
        let held = state.pins.get(&page).copied().unwrap_or(0);
        if held == 0 {
            return;
        }
        state.pins.insert(page, held - 1);
        state.pin_totals.entry(page).or_insert((0, 0)).1 += 1;
    }
}
