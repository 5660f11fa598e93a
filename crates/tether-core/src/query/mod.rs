//! Asynchronous symbol queries
//!
//! A query is a pending lookup: a countdown over its target symbols at the
//! requested stage, a map of values collected as symbols resolve, and a
//! completion callback that fires exactly once. Queries become inert after
//! completion or failure; late notifications are ignored.

use std::sync::Mutex;

use crate::error::{SessionError, SessionResult};
use crate::symbol::{EvaluatedSymbol, SymbolMap, SymbolName, SymbolStage};

/// Completion callback type for lookups
pub(crate) type OnCompleteFn = Box<dyn FnOnce(SessionResult<SymbolMap>) + Send>;

/// A completion ready to run once the session lock is released
///
/// State transitions collect these while locked; callers run them after
/// unlocking so user callbacks can re-enter the session freely.
pub(crate) struct Completion {
    callback: OnCompleteFn,
    result: SessionResult<SymbolMap>,
}

impl Completion {
    pub(crate) fn run(self) {
        (self.callback)(self.result);
    }
}

struct QueryInner {
    outstanding: usize,
    resolved: SymbolMap,
    on_complete: Option<OnCompleteFn>,
}

/// A pending asynchronous lookup
pub(crate) struct AsyncSymbolQuery {
    required: SymbolStage,
    inner: Mutex<QueryInner>,
}

impl AsyncSymbolQuery {
    pub(crate) fn new(required: SymbolStage, count: usize, on_complete: OnCompleteFn) -> Self {
        Self {
            required,
            inner: Mutex::new(QueryInner {
                outstanding: count,
                resolved: SymbolMap::new(),
                on_complete: Some(on_complete),
            }),
        }
    }

    pub(crate) fn required(&self) -> SymbolStage {
        self.required
    }

    /// Returns false once the query has completed or failed
    pub(crate) fn is_live(&self) -> bool {
        self.lock().on_complete.is_some()
    }

    /// Record a resolved value for one of the query's targets
    pub(crate) fn record(&self, name: &SymbolName, symbol: EvaluatedSymbol) {
        self.lock().resolved.insert(name.clone(), symbol);
    }

    /// Count one target as having reached the required stage
    ///
    /// Returns the completion to run when this was the last outstanding
    /// target.
    pub(crate) fn satisfy_one(&self) -> Option<Completion> {
        let mut inner = self.lock();
        if inner.on_complete.is_none() {
            return None;
        }
        debug_assert!(inner.outstanding > 0, "query satisfied more times than it has targets");
        inner.outstanding -= 1;
        if inner.outstanding > 0 {
            return None;
        }
        let callback = inner.on_complete.take()?;
        Some(Completion {
            callback,
            result: Ok(std::mem::take(&mut inner.resolved)),
        })
    }

    /// Complete immediately if no targets remain outstanding
    pub(crate) fn try_complete(&self) -> Option<Completion> {
        let mut inner = self.lock();
        if inner.outstanding > 0 {
            return None;
        }
        let callback = inner.on_complete.take()?;
        Some(Completion {
            callback,
            result: Ok(std::mem::take(&mut inner.resolved)),
        })
    }

    /// Fail the query; later notifications become no-ops
    pub(crate) fn fail(&self, error: SessionError) -> Option<Completion> {
        let callback = self.lock().on_complete.take()?;
        Some(Completion {
            callback,
            result: Err(error),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueryInner> {
        self.inner.lock().expect("query lock poisoned")
    }
}
