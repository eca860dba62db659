//! Per-request execution state
//!
//! A compiled [`Statement`](super::Statement) is shared and never mutated.
//! Everything that changes while it runs lives in a [`Request`]:
//!
//! - the impure area: one typed state object per operator, addressed by
//!   the [`StateSlot`] assigned when the plan was built
//! - the record pool: one [`Record`] buffer per [`StreamId`]
//! - transaction, timestamp, parameters and the cancellation token

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::{ExecError, ExecResult};
use super::stream::{StateSlot, StreamId};
use crate::config::ExecConfig;
use crate::index::IndexCatalog;
use crate::observability::{log_event_with_fields, Event, ExecMetrics};
use crate::page::{GcRegistry, PageCache};
use crate::storage::{Record, RowStorage, Value};

/// Shared flag used to ask a running request to stop
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; observed at the next yield point
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborators and settings shared by every request
pub struct ExecEnv {
    page_cache: Arc<dyn PageCache>,
    gc: Arc<dyn GcRegistry>,
    rows: Arc<dyn RowStorage>,
    catalog: Arc<dyn IndexCatalog>,
    metrics: Arc<ExecMetrics>,
    config: ExecConfig,
}

impl ExecEnv {
    /// Creates an environment with fresh counters
    pub fn new(
        page_cache: Arc<dyn PageCache>,
        gc: Arc<dyn GcRegistry>,
        rows: Arc<dyn RowStorage>,
        catalog: Arc<dyn IndexCatalog>,
        config: ExecConfig,
    ) -> Self {
        Self {
            page_cache,
            gc,
            rows,
            catalog,
            metrics: Arc::new(ExecMetrics::new()),
            config,
        }
    }

    pub fn page_cache(&self) -> &dyn PageCache {
        self.page_cache.as_ref()
    }

    pub fn gc_registry(&self) -> &Arc<dyn GcRegistry> {
        &self.gc
    }

    pub fn rows(&self) -> &dyn RowStorage {
        self.rows.as_ref()
    }

    pub fn catalog(&self) -> &dyn IndexCatalog {
        self.catalog.as_ref()
    }

    pub fn metrics(&self) -> &Arc<ExecMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }
}

/// One execution of a statement
pub struct Request {
    id: Uuid,
    transaction: u64,
    timestamp: DateTime<Utc>,
    params: Vec<Option<Value>>,
    bulk_load: bool,
    cancel: CancellationToken,
    env: Arc<ExecEnv>,
    impure: Vec<Option<Box<dyn Any + Send>>>,
    records: Vec<Record>,
    quantum_left: u32,
}

impl Request {
    /// Creates a request sized for `statement`
    pub fn new(env: Arc<ExecEnv>, statement: &super::Statement) -> Self {
        let quantum = env.config().quantum.max(1);
        Self {
            id: Uuid::new_v4(),
            transaction: 0,
            timestamp: Utc::now(),
            params: Vec::new(),
            bulk_load: false,
            cancel: CancellationToken::new(),
            env,
            impure: (0..statement.slot_count()).map(|_| None).collect(),
            records: vec![Record::new(); statement.stream_count()],
            quantum_left: quantum,
        }
    }

    /// Runs under `transaction`
    pub fn with_transaction(mut self, transaction: u64) -> Self {
        self.transaction = transaction;
        self
    }

    /// Binds positional parameters
    pub fn with_params(mut self, params: Vec<Option<Value>>) -> Self {
        self.params = params;
        self
    }

    /// Marks the request as part of a bulk load
    pub fn with_bulk_load(mut self, bulk_load: bool) -> Self {
        self.bulk_load = bulk_load;
        self
    }

    /// Shares a cancellation token with the caller
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transaction(&self) -> u64 {
        self.transaction
    }

    /// GMT timestamp taken when the request was created
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_bulk_load(&self) -> bool {
        self.bulk_load
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn env(&self) -> &Arc<ExecEnv> {
        &self.env
    }

    /// Parameter at `index`; `None` if unbound
    pub fn param(&self, index: usize) -> Option<&Option<Value>> {
        self.params.get(index)
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.impure.len()
    }

    pub(crate) fn stream_count(&self) -> usize {
        self.records.len()
    }

    /// Record buffer of `stream`
    pub fn record(&self, stream: StreamId) -> ExecResult<&Record> {
        self.records
            .get(stream.index())
            .ok_or_else(|| ExecError::execution_failed(format!("Stream {} out of range", stream)))
    }

    pub(crate) fn record_mut(&mut self, stream: StreamId) -> ExecResult<&mut Record> {
        self.records
            .get_mut(stream.index())
            .ok_or_else(|| ExecError::execution_failed(format!("Stream {} out of range", stream)))
    }

    /// State in `slot`, if the operator has run in this request
    pub(crate) fn state<T: Any + Send>(&self, slot: StateSlot) -> ExecResult<Option<&T>> {
        match self.impure.get(slot.index()) {
            Some(Some(state)) => (**state)
                .downcast_ref::<T>()
                .map(Some)
                .ok_or_else(|| mismatched(slot)),
            Some(None) => Ok(None),
            None => Err(out_of_range(slot)),
        }
    }

    /// State in `slot`, created on first use
    pub(crate) fn state_mut<T: Any + Send + Default>(&mut self, slot: StateSlot) -> ExecResult<&mut T> {
        let entry = self.impure.get_mut(slot.index()).ok_or_else(|| out_of_range(slot))?;
        let state = entry.get_or_insert_with(|| Box::new(T::default()) as Box<dyn Any + Send>);
        (**state).downcast_mut::<T>().ok_or_else(|| mismatched(slot))
    }

    /// Yield point: observes cancellation and gives up the thread once per
    /// quantum.
    pub(crate) fn reschedule(&mut self) -> ExecResult<()> {
        if self.cancel.is_cancelled() {
            log_event_with_fields(Event::RequestCancelled, &[("request_id", self.id.to_string().as_str())]);
            return Err(ExecError::cancelled());
        }

        self.quantum_left = self.quantum_left.saturating_sub(1);
        if self.quantum_left == 0 {
            self.quantum_left = self.env.config().quantum.max(1);
            std::thread::yield_now();
        }
        Ok(())
    }
}

fn out_of_range(slot: StateSlot) -> ExecError {
    ExecError::execution_failed(format!("State slot {} out of range", slot))
}

fn mismatched(slot: StateSlot) -> ExecError {
    ExecError::execution_failed(format!("State slot {} holds another operator's state", slot))
}
