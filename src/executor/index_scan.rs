//! Navigational index table scan
//!
//! Walks the leaf level of an index over one or more disjoint key ranges
//! and returns the table rows the entries point at, in index order.
//!
//! # Lifecycle
//!
//! ```text
//! Closed --open--> Pending --first fetch--> Scanning --> Exhausted
//!   ^                                                        |
//!   +------------------------- close ------------------------+
//! ```
//!
//! The first fetch checks the catalog, evaluates the ranges and the
//! optional inversion bitmap, then descends to the first entry of the first
//! range.
//!
//! # Between fetches
//!
//! No latch is held while the caller works with a row. The scan keeps the
//! page, offset and incarnation of the last entry it returned, plus a copy
//! of its key, and pins the page so it cannot be reclaimed. On the next
//! fetch:
//!
//! - same incarnation: the saved entry is decoded again in place and the
//!   scan continues after it
//! - otherwise (split, rewrite, removal): the scan re-descends from the root
//!   to the first entry strictly after the saved (key, record) pair
//!
//! A record is returned at most once per open, however often the scan
//! repositions.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::errors::{ExecError, ExecResult};
use super::explain::PlanNode;
use super::request::{ExecEnv, Request};
use super::stream::{RecordStream, StateSlot, StreamId};
use crate::index::{
    compare_entries, Bound, CursorPosition, IndexDescriptor, IndexStatus, InversionSource,
    RangeIterator, RangeSource, RecordBitmap, ScanRange,
};
use crate::observability::{log_event_with_fields, Event, ExecMetrics};
use crate::page::{EntryOffset, GcPin, IndexPage, PageError, PageId, PageResult, Window};
use crate::storage::{RecordId, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Closed,
    Pending,
    Scanning,
    Exhausted,
}

/// Last entry handed out, enough to find the way back to it
#[derive(Debug, Clone)]
struct SavedPosition {
    cursor: CursorPosition,
    key: Vec<u8>,
    record_id: RecordId,
}

#[derive(Default)]
struct IndexScanState {
    phase: Phase,
    root: Option<PageId>,
    ranges: Option<RangeIterator>,
    current: Option<ScanRange>,
    inversion: Option<RecordBitmap>,
    visited: RecordBitmap,
    position: Option<SavedPosition>,
    pin: Option<GcPin>,
}

/// Where a descent should land in the leaf level
enum Seek<'b> {
    Leftmost,
    /// First entry admitted by a lower bound
    Lower(&'b Bound),
    /// First entry strictly after a (key, record) pair
    After { key: &'b [u8], record_id: RecordId },
}

impl Seek<'_> {
    /// Whether an entry is at or past the seek target
    fn reached(&self, key: &[u8], record_id: RecordId, descending: bool) -> bool {
        match self {
            Seek::Leftmost => true,
            Seek::Lower(bound) => bound.admits_lower(key, descending),
            Seek::After {
                key: target,
                record_id: target_id,
            } => compare_entries(key, record_id, target, *target_id, descending) == Ordering::Greater,
        }
    }
}

/// Picks the child of an interior page to descend into: the last one whose
/// separator is still before the seek target, or the first child.
fn choose_child(page: &IndexPage, seek: &Seek<'_>, descending: bool) -> PageResult<PageId> {
    let mut key = Vec::new();
    let mut offset = page.first_offset();
    let mut chosen = None;

    while let Some((entry, consumed)) = page.decode_entry(offset, &mut key)? {
        if chosen.is_some() && seek.reached(&key, entry.record_id, descending) {
            break;
        }
        chosen = entry.child;
        offset = offset.advance(consumed);
    }

    chosen.ok_or(PageError::BadEntry {
        page: page.id(),
        offset: offset.get(),
        reason: "interior page without entries",
    })
}

/// Forward iterator over the leaf level, holding one latch at a time
struct LeafReader<'c> {
    window: Window<'c>,
    metrics: &'c ExecMetrics,
    /// Offset of the entry most recently decoded
    entry_offset: EntryOffset,
    /// Offset of the next entry to decode
    next_offset: EntryOffset,
    key: Vec<u8>,
    record_id: RecordId,
    /// Hand out the current entry again on the next call
    replay: bool,
}

impl<'c> LeafReader<'c> {
    fn new(window: Window<'c>, metrics: &'c ExecMetrics) -> Self {
        let first = window.page().first_offset();
        Self {
            window,
            metrics,
            entry_offset: first,
            next_offset: first,
            key: Vec::new(),
            record_id: RecordId(0),
            replay: false,
        }
    }

    /// Continues after an entry already decoded at `offset`
    fn resume_after(
        window: Window<'c>,
        metrics: &'c ExecMetrics,
        offset: EntryOffset,
        consumed: usize,
        key: Vec<u8>,
        record_id: RecordId,
    ) -> Self {
        Self {
            window,
            metrics,
            entry_offset: offset,
            next_offset: offset.advance(consumed),
            key,
            record_id,
            replay: false,
        }
    }

    fn page_id(&self) -> PageId {
        self.window.id()
    }

    fn incarnation(&self) -> u64 {
        self.window.incarnation()
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn entry_offset(&self) -> EntryOffset {
        self.entry_offset
    }

    /// Next entry in index order, following sibling links
    fn next(&mut self) -> PageResult<Option<RecordId>> {
        if self.replay {
            self.replay = false;
            return Ok(Some(self.record_id));
        }

        loop {
            match self.window.page().decode_entry(self.next_offset, &mut self.key)? {
                Some((entry, consumed)) => {
                    self.metrics.increment_entries_visited();
                    self.entry_offset = self.next_offset;
                    self.next_offset = self.next_offset.advance(consumed);
                    self.record_id = entry.record_id;
                    return Ok(Some(entry.record_id));
                }
                None => {
                    let Some(sibling) = self.window.page().sibling() else {
                        return Ok(None);
                    };
                    self.window.handoff(sibling)?;
                    self.metrics.increment_page_fetches();
                    self.next_offset = self.window.page().first_offset();
                    self.entry_offset = self.next_offset;
                    self.key.clear();
                }
            }
        }
    }

    /// Skips entries before the seek target
    fn seek(&mut self, seek: &Seek<'_>, descending: bool) -> PageResult<()> {
        while let Some(record_id) = self.next()? {
            if seek.reached(&self.key, record_id, descending) {
                self.replay = true;
                break;
            }
        }
        Ok(())
    }
}

/// Rows of one table in the order of one of its indexes
pub struct IndexTableScan {
    stream: StreamId,
    slot: StateSlot,
    index: Arc<IndexDescriptor>,
    ranges: RangeSource,
    inversion: Option<Arc<dyn InversionSource>>,
}

impl IndexTableScan {
    pub(crate) fn new(
        stream: StreamId,
        slot: StateSlot,
        index: Arc<IndexDescriptor>,
        ranges: RangeSource,
        inversion: Option<Arc<dyn InversionSource>>,
    ) -> Self {
        Self {
            stream,
            slot,
            index,
            ranges,
            inversion,
        }
    }

    fn page_failure(&self, err: PageError) -> ExecError {
        if !matches!(err, PageError::NotFound(_)) {
            log_event_with_fields(
                Event::PageCorruption,
                &[
                    ("index", self.index.name.as_str()),
                    ("error", err.to_string().as_str()),
                ],
            );
        }
        err.into()
    }

    /// Catalog check and range evaluation done at the first fetch.
    /// Returns false when the scan produces nothing.
    fn start(&self, request: &mut Request) -> ExecResult<bool> {
        let status = request.env().catalog().status(self.index.id);
        let root = match status {
            IndexStatus::Active { root } => root,
            IndexStatus::Inactive | IndexStatus::Unknown if request.is_bulk_load() => {
                log_event_with_fields(
                    Event::IndexScanSkipped,
                    &[("index", self.index.name.as_str())],
                );
                request.state_mut::<IndexScanState>(self.slot)?.phase = Phase::Exhausted;
                return Ok(false);
            }
            IndexStatus::Inactive => {
                log_event_with_fields(
                    Event::IndexScanRejected,
                    &[("index", self.index.name.as_str()), ("status", "inactive")],
                );
                return Err(ExecError::index_inactive(&self.index.name));
            }
            IndexStatus::Unknown => {
                log_event_with_fields(
                    Event::IndexScanRejected,
                    &[("index", self.index.name.as_str()), ("status", "unknown")],
                );
                return Err(ExecError::index_unknown(&self.index.name));
            }
        };

        let feed = self.ranges.open(request)?;
        let inversion = match &self.inversion {
            Some(source) => Some(source.evaluate(request)?),
            None => None,
        };
        let mut ranges = RangeIterator::new(feed, Arc::clone(&self.index));
        let first = ranges.next_range()?;

        let state = request.state_mut::<IndexScanState>(self.slot)?;
        state.root = Some(root);
        state.inversion = inversion;
        state.visited.clear();
        state.position = None;
        state.pin = None;
        match first {
            Some(range) => {
                state.current = Some(range);
                state.ranges = Some(ranges);
                state.phase = Phase::Scanning;
                Ok(true)
            }
            None => {
                state.phase = Phase::Exhausted;
                Ok(false)
            }
        }
    }

    /// Moves to the next range. Returns false when there is none.
    fn advance_range(&self, env: &ExecEnv, state: &mut IndexScanState) -> ExecResult<bool> {
        state.position = None;
        state.pin = None;

        let next = match state.ranges.as_mut() {
            Some(ranges) => ranges.next_range()?,
            None => None,
        };
        match next {
            Some(range) => {
                env.metrics().increment_ranges_advanced();
                log_event_with_fields(
                    Event::IndexScanRangeAdvanced,
                    &[("index", self.index.name.as_str())],
                );
                state.current = Some(range);
                Ok(true)
            }
            None => {
                state.current = None;
                state.ranges = None;
                state.phase = Phase::Exhausted;
                Ok(false)
            }
        }
    }

    /// Descends from the root and positions on the seek target
    fn descend<'c>(&self, env: &'c ExecEnv, root: PageId, seek: &Seek<'_>) -> PageResult<LeafReader<'c>> {
        let descending = self.index.descending;
        let mut window = Window::fetch(env.page_cache(), root)?;
        env.metrics().increment_page_fetches();

        while !window.page().is_leaf() {
            let child = choose_child(window.page(), seek, descending)?;
            window.handoff(child)?;
            env.metrics().increment_page_fetches();
        }

        let mut reader = LeafReader::new(window, env.metrics());
        if !matches!(seek, Seek::Leftmost) {
            reader.seek(seek, descending)?;
        }
        Ok(reader)
    }

    /// Continues after the saved entry if its page is unchanged
    fn resume_in_place<'c>(
        &self,
        env: &'c ExecEnv,
        saved: &SavedPosition,
    ) -> PageResult<Option<LeafReader<'c>>> {
        let cache = env.page_cache();
        match cache.incarnation(saved.cursor.page) {
            Ok(current) if !saved.cursor.is_stale(current) => {}
            _ => return Ok(None),
        }

        let window = match Window::fetch(cache, saved.cursor.page) {
            Ok(window) => window,
            Err(PageError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        env.metrics().increment_page_fetches();
        if saved.cursor.is_stale(window.incarnation()) {
            return Ok(None);
        }

        // The saved key shares every prefix byte the entry can reference
        let mut key = saved.key.clone();
        match window.page().decode_entry(saved.cursor.offset, &mut key)? {
            Some((entry, consumed)) if entry.record_id == saved.record_id && key == saved.key => {
                Ok(Some(LeafReader::resume_after(
                    window,
                    env.metrics(),
                    saved.cursor.offset,
                    consumed,
                    key,
                    entry.record_id,
                )))
            }
            _ => Ok(None),
        }
    }

    fn resume<'c>(&self, env: &'c ExecEnv, root: PageId, saved: &SavedPosition) -> PageResult<LeafReader<'c>> {
        if let Some(reader) = self.resume_in_place(env, saved)? {
            return Ok(reader);
        }

        env.metrics().increment_repositions();
        log_event_with_fields(
            Event::IndexScanRepositioned,
            &[
                ("index", self.index.name.as_str()),
                ("page", saved.cursor.page.to_string().as_str()),
                ("record", saved.record_id.to_string().as_str()),
            ],
        );
        let seek = Seek::After {
            key: &saved.key,
            record_id: saved.record_id,
        };
        self.descend(env, root, &seek)
    }

    fn fetch_next(&self, env: &ExecEnv, state: &mut IndexScanState) -> ExecResult<Option<Row>> {
        let descending = self.index.descending;
        let Some(root) = state.root else {
            return Ok(None);
        };

        'range: loop {
            let Some(range) = state.current.clone() else {
                return Ok(None);
            };

            let mut reader = match state.position.take() {
                Some(saved) => self
                    .resume(env, root, &saved)
                    .map_err(|e| self.page_failure(e))?,
                None => {
                    let seek = match &range.lower {
                        Some(bound) => Seek::Lower(bound),
                        None => Seek::Leftmost,
                    };
                    let reader = self
                        .descend(env, root, &seek)
                        .map_err(|e| self.page_failure(e))?;
                    log_event_with_fields(
                        Event::IndexScanPositioned,
                        &[
                            ("index", self.index.name.as_str()),
                            ("page", reader.page_id().to_string().as_str()),
                        ],
                    );
                    reader
                }
            };

            loop {
                let next = reader.next().map_err(|e| self.page_failure(e))?;
                if state
                    .pin
                    .as_ref()
                    .is_some_and(|pin| pin.page() != reader.page_id())
                {
                    state.pin = None;
                }
                let Some(record_id) = next else {
                    break;
                };

                if let Some(upper) = &range.upper {
                    if upper.exceeds_upper(reader.key(), descending) {
                        break;
                    }
                }
                if self.index.ignore_nulls && !range.match_nulls && self.index.is_null_key(reader.key()) {
                    continue;
                }
                if let Some(inversion) = &state.inversion {
                    if !inversion.contains(record_id) {
                        continue;
                    }
                }
                if state.visited.contains(record_id) {
                    env.metrics().increment_duplicates_suppressed();
                    continue;
                }

                let key = reader.key().to_vec();
                let page = reader.page_id();
                state.position = Some(SavedPosition {
                    cursor: CursorPosition {
                        page,
                        offset: reader.entry_offset(),
                        incarnation: reader.incarnation(),
                    },
                    key: key.clone(),
                    record_id,
                });
                if state.pin.is_none() {
                    state.pin = Some(GcPin::acquire(
                        Arc::clone(env.gc_registry()),
                        Arc::clone(env.metrics()),
                        page,
                    ));
                }
                drop(reader);

                match env.rows().fetch_row(record_id)? {
                    Some(row) if self.index.derive_key(&row) == key => {
                        state.visited.insert(record_id);
                        return Ok(Some(row));
                    }
                    _ => {
                        env.metrics().increment_phantoms();
                        log_event_with_fields(
                            Event::IndexScanPhantom,
                            &[
                                ("index", self.index.name.as_str()),
                                ("record", record_id.to_string().as_str()),
                            ],
                        );
                        continue 'range;
                    }
                }
            }

            drop(reader);
            if !self.advance_range(env, state)? {
                return Ok(None);
            }
        }
    }

    fn current_id(&self, request: &Request) -> Option<RecordId> {
        request
            .record(self.stream)
            .ok()
            .and_then(|r| r.row())
            .map(|row| row.id)
    }
}

impl RecordStream for IndexTableScan {
    fn open(&self, request: &mut Request) -> ExecResult<()> {
        self.close(request);
        request.state_mut::<IndexScanState>(self.slot)?.phase = Phase::Pending;
        Ok(())
    }

    fn get_record(&self, request: &mut Request) -> ExecResult<bool> {
        let phase = request.state_mut::<IndexScanState>(self.slot)?.phase;
        match phase {
            Phase::Closed | Phase::Exhausted => return Ok(false),
            Phase::Pending => match self.start(request) {
                Ok(true) => {}
                Ok(false) => {
                    self.invalidate_records(request);
                    return Ok(false);
                }
                Err(err) => {
                    self.close(request);
                    return Err(err);
                }
            },
            Phase::Scanning => {}
        }

        let env = Arc::clone(request.env());
        let fetched = {
            let state = request.state_mut::<IndexScanState>(self.slot)?;
            self.fetch_next(&env, state)
        };

        match fetched {
            Ok(Some(row)) => {
                request.record_mut(self.stream)?.set(row);
                Ok(true)
            }
            Ok(None) => {
                let state = request.state_mut::<IndexScanState>(self.slot)?;
                state.phase = Phase::Exhausted;
                state.position = None;
                state.pin = None;
                self.invalidate_records(request);
                Ok(false)
            }
            Err(err) => {
                self.close(request);
                Err(err)
            }
        }
    }

    fn close(&self, request: &mut Request) {
        if let Ok(state) = request.state_mut::<IndexScanState>(self.slot) {
            *state = IndexScanState::default();
        }
        self.invalidate_records(request);
    }

    fn refetch_record(&self, request: &mut Request) -> ExecResult<bool> {
        let Some(id) = self.current_id(request) else {
            return Ok(false);
        };
        match request.env().rows().fetch_row(id)? {
            Some(row) => {
                request.record_mut(self.stream)?.set(row);
                Ok(true)
            }
            None => {
                request.record_mut(self.stream)?.invalidate();
                Ok(false)
            }
        }
    }

    fn lock_record(&self, request: &mut Request) -> ExecResult<bool> {
        let Some(id) = self.current_id(request) else {
            return Ok(false);
        };
        Ok(request.env().rows().lock_row(request.transaction(), id)?)
    }

    fn current_row<'r>(&self, request: &'r Request) -> Option<&'r Row> {
        request.record(self.stream).ok().and_then(|r| r.row())
    }

    fn find_used_streams(&self, streams: &mut BTreeSet<StreamId>, expand_all: bool) {
        streams.insert(self.stream);
        if expand_all {
            self.ranges.collect_streams(streams);
        }
    }

    fn is_dependent(&self, streams: &BTreeSet<StreamId>) -> bool {
        let mut used = BTreeSet::new();
        self.ranges.collect_streams(&mut used);
        used.iter().any(|s| streams.contains(s))
    }

    fn invalidate_records(&self, request: &mut Request) {
        if let Ok(record) = request.record_mut(self.stream) {
            record.invalidate();
        }
    }

    fn explain(&self) -> PlanNode {
        let direction = if self.index.descending { "descending" } else { "ascending" };
        let mut node = PlanNode::new("Index Range Scan")
            .with_attribute("index", self.index.name.clone())
            .with_attribute("direction", direction)
            .with_attribute("ranges", self.ranges.describe())
            .with_attribute("stream", self.stream.to_string());
        if let Some(inversion) = &self.inversion {
            node = node.with_attribute("inversion", inversion.describe());
        }
        node
    }
}
