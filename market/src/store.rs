use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::MarketError;
use crate::state::SecurityAggregateState;
use crate::types::SecurityId;

/// Immutable map installed by one initialization run.
#[derive(Debug, Default)]
pub struct AggregateSnapshot {
    states: HashMap<SecurityId, Arc<SecurityAggregateState>>,
    by_ticker: HashMap<String, SecurityId>,
}

impl AggregateSnapshot {
    pub fn new(states: Vec<SecurityAggregateState>) -> Self {
        let mut snapshot = Self::default();
        for state in states {
            snapshot
                .by_ticker
                .insert(state.ticker().to_string(), state.security_id());
            snapshot.states.insert(state.security_id(), Arc::new(state));
        }
        snapshot
    }

    pub fn get(&self, security_id: SecurityId) -> Option<&Arc<SecurityAggregateState>> {
        self.states.get(&security_id)
    }

    pub fn lookup_ticker(&self, ticker: &str) -> Option<SecurityId> {
        self.by_ticker.get(ticker).copied()
    }

    pub fn states(&self) -> impl Iterator<Item = &Arc<SecurityAggregateState>> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Process-wide security id to aggregate state map.
///
/// Readers clone the current `Arc<AggregateSnapshot>` under a short read lock
/// and work on it lock-free; [`swap`](Self::swap) replaces the whole map
/// under the write lock so nobody observes a half-built store. While a
/// (re)initialization is running `initialized` is false and
/// [`get`](Self::get) fails fast with [`MarketError::NotReady`].
#[derive(Debug, Default)]
pub struct AggregateStore {
    inner: RwLock<Option<Arc<AggregateSnapshot>>>,
    initialized: AtomicBool,
    initializing: AtomicBool,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Option<Arc<AggregateSnapshot>> {
        self.inner.read().clone()
    }

    pub fn get(&self, security_id: SecurityId) -> Result<Arc<SecurityAggregateState>, MarketError> {
        if !self.is_ready() {
            return Err(MarketError::NotReady);
        }
        self.inner
            .read()
            .as_ref()
            .and_then(|snap| snap.get(security_id).cloned())
            .ok_or(MarketError::UnknownSecurity(security_id))
    }

    pub fn lookup_ticker(&self, ticker: &str) -> Option<SecurityId> {
        self.inner
            .read()
            .as_ref()
            .and_then(|snap| snap.lookup_ticker(ticker))
    }

    /// Marks the store as initializing. Returns `false` if another run holds
    /// it already.
    pub fn begin_initialization(&self) -> bool {
        if self
            .initializing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("initialization already in progress");
            return false;
        }
        self.initialized.store(false, Ordering::Release);
        true
    }

    pub fn swap(&self, snapshot: AggregateSnapshot) {
        let count = snapshot.len();
        {
            let mut guard = self.inner.write();
            *guard = Some(Arc::new(snapshot));
        }
        self.initialized.store(true, Ordering::Release);
        self.initializing.store(false, Ordering::Release);
        info!(securities = count, "aggregate store swapped");
    }

    /// Ends a failed run. Ingestion resumes against the previous map if there
    /// is one.
    pub fn abort_initialization(&self) {
        let has_previous = self.inner.read().is_some();
        self.initialized.store(has_previous, Ordering::Release);
        self.initializing.store(false, Ordering::Release);
        warn!(has_previous, "initialization aborted, keeping previous store");
    }
}
