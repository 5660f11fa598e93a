//! Execution session - the root of the symbol resolution engine
//!
//! The session owns the string pool and every dynamic library, and is the
//! entry point for lookups. All symbol-table state lives behind one coarse
//! lock with short critical sections; user callbacks (query completions,
//! dependency registration, generators, unit dispatch) always run outside
//! it, so they are free to re-enter the session.
//!
//! # Lookup
//!
//! A lookup scans an ordered search list. In each library, names with an
//! existing definition are claimed first; generators are then consulted in
//! insertion order for the rest. Claimed names at or above the required
//! stage satisfy the query immediately; the others attach to the symbol
//! record, and any symbol that has never been searched for has its
//! materialization unit handed to the dispatcher.

pub(crate) mod readiness;
pub(crate) mod state;

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::error::{SessionError, SessionResult};
use crate::library::DynamicLibrary;
use crate::materialize::{MaterializationResponsibility, MaterializationUnit};
use crate::query::AsyncSymbolQuery;
use crate::symbol::{
    EvaluatedSymbol, SymbolMap, SymbolName, SymbolNameSet, SymbolStage, SymbolStringPool,
};

use state::{ClaimStatus, LookupOutput, SessionState};

/// Dependencies a lookup registered on behalf of its query: for each
/// library, the names the query is waiting on there
pub type DependenceMap = HashMap<DynamicLibrary, SymbolNameSet>;

/// Dispatcher slot type: receives claimed materialization work
pub(crate) type DispatcherFn = Arc<dyn Fn(MaterializationTask) + Send + Sync>;

/// One entry in a lookup's search order
#[derive(Clone)]
pub struct SearchEntry {
    /// The library to search
    pub library: DynamicLibrary,
    /// Whether to match symbols the library does not export
    pub match_non_exported: bool,
}

impl SearchEntry {
    /// Search `library`, matching exported symbols only
    #[must_use]
    pub fn new(library: DynamicLibrary) -> Self {
        Self {
            library,
            match_non_exported: false,
        }
    }

    /// Search `library`, matching non-exported symbols too
    #[must_use]
    pub fn with_non_exported(library: DynamicLibrary) -> Self {
        Self {
            library,
            match_non_exported: true,
        }
    }
}

/// A claimed materialization unit, packaged for the dispatcher
///
/// The dispatcher decides where `run` happens: inline on the caller's
/// thread (the default) or on a thread of its own choosing.
pub struct MaterializationTask {
    library: DynamicLibrary,
    unit: Box<dyn MaterializationUnit>,
    responsibility: MaterializationResponsibility,
}

impl MaterializationTask {
    pub(crate) fn new(
        library: DynamicLibrary,
        unit: Box<dyn MaterializationUnit>,
        responsibility: MaterializationResponsibility,
    ) -> Self {
        Self {
            library,
            unit,
            responsibility,
        }
    }

    /// The library the unit materializes into
    #[must_use]
    pub fn library(&self) -> &DynamicLibrary {
        &self.library
    }

    /// The unit's diagnostic name
    #[must_use]
    pub fn unit_name(&self) -> &str {
        self.unit.name()
    }

    /// Run the unit's materializer
    pub fn run(self) {
        let MaterializationTask {
            unit,
            responsibility,
            ..
        } = self;
        unit.materialize(responsibility);
    }
}

/// The no-op dependency registration callback for lookups that manage
/// dependencies themselves (or do not care)
pub fn no_dependencies(_deps: DependenceMap) {}

pub(crate) struct SessionInner {
    pub(crate) pool: SymbolStringPool,
    pub(crate) state: Mutex<SessionState>,
}

impl SessionInner {
    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session state lock poisoned")
    }
}

/// The root object of the engine
///
/// Cheap to clone; clones share the same session. The session is owned by
/// its user - there are no process-wide singletons.
#[derive(Clone)]
pub struct ExecutionSession {
    inner: Arc<SessionInner>,
}

impl ExecutionSession {
    /// Create a session with the inline dispatcher
    #[must_use]
    pub fn new() -> Self {
        let dispatcher: DispatcherFn = Arc::new(|task: MaterializationTask| task.run());
        Self {
            inner: Arc::new(SessionInner {
                pool: SymbolStringPool::new(),
                state: Mutex::new(SessionState::new(dispatcher)),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Intern a symbol name in the session's shared pool
    pub fn intern(&self, name: &str) -> SymbolName {
        self.inner.pool.intern(name)
    }

    /// Create a new, empty dynamic library
    pub fn create_library(&self, name: &str) -> SessionResult<DynamicLibrary> {
        let (id, lib_name) = {
            let mut state = self.inner.state();
            let id = state.add_library(name)?;
            (id, state.libraries[id].name.clone())
        };
        debug!(library = name, "created library");
        Ok(DynamicLibrary {
            session: self.inner.clone(),
            id,
            name: lib_name,
        })
    }

    /// Install the materialization dispatcher
    ///
    /// The dispatcher receives every claimed unit and decides where it
    /// runs. The default runs tasks inline on the looking-up thread.
    pub fn set_dispatcher(&self, dispatcher: impl Fn(MaterializationTask) + Send + Sync + 'static) {
        self.inner.state().dispatcher = Arc::new(dispatcher);
    }

    /// Asynchronous lookup
    ///
    /// Scans `search` in order for every name in `names`. `on_complete`
    /// fires exactly once: with the symbol map once every name reaches
    /// `required`, or with the first error. `register_deps` fires before
    /// any materialization is dispatched, with the symbols the query is
    /// waiting on, so a responsibility driving this lookup can declare
    /// them as dependencies.
    ///
    /// Never blocks. Symbols and units defined along the way (by
    /// generators) stay defined even if the lookup fails.
    ///
    /// # Panics
    /// Panics if `required` is below [`SymbolStage::Resolved`].
    pub fn lookup<F, R>(
        &self,
        search: &[SearchEntry],
        names: SymbolNameSet,
        required: SymbolStage,
        on_complete: F,
        register_deps: R,
    ) where
        F: FnOnce(SessionResult<SymbolMap>) + Send + 'static,
        R: FnOnce(DependenceMap),
    {
        assert!(
            required >= SymbolStage::Resolved,
            "lookups wait at Resolved or Ready"
        );
        trace!(count = names.len(), stage = ?required, "lookup");

        let query = Arc::new(AsyncSymbolQuery::new(
            required,
            names.len(),
            Box::new(on_complete),
        ));
        let mut remaining = names;
        let mut out = LookupOutput::new();
        let mut failure: Option<SessionError> = None;

        'search: for entry in search {
            if remaining.is_empty() {
                break;
            }
            let library = &entry.library;
            debug_assert!(
                Arc::ptr_eq(&library.session, &self.inner),
                "search entry belongs to a different session"
            );

            // Existing definitions first.
            {
                let mut state = self.inner.state();
                for name in remaining.iter().cloned().collect::<Vec<_>>() {
                    match state.try_claim(library, entry.match_non_exported, &name, &query, &mut out)
                    {
                        ClaimStatus::NotVisible => {}
                        ClaimStatus::Claimed => {
                            remaining.remove(&name);
                        }
                        ClaimStatus::Failed(err) => {
                            failure = Some(err);
                            break 'search;
                        }
                    }
                }
            }
            if remaining.is_empty() {
                break;
            }

            // Generators next, in insertion order, with the session
            // unlocked so they can define.
            let generators = self.inner.state().libraries[library.id].generators.clone();
            for generator in generators {
                if remaining.is_empty() {
                    break;
                }
                match generator.try_generate(library, &remaining) {
                    Ok(claimed) => {
                        if claimed.is_empty() {
                            continue;
                        }
                        let mut state = self.inner.state();
                        for name in claimed {
                            if !remaining.contains(&name) {
                                continue;
                            }
                            match state.try_claim(
                                library,
                                entry.match_non_exported,
                                &name,
                                &query,
                                &mut out,
                            ) {
                                ClaimStatus::NotVisible => {}
                                ClaimStatus::Claimed => {
                                    remaining.remove(&name);
                                }
                                ClaimStatus::Failed(err) => {
                                    failure = Some(err);
                                    break 'search;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        failure = Some(err);
                        break 'search;
                    }
                }
            }
        }

        if failure.is_none() && !remaining.is_empty() {
            failure = Some(SessionError::not_found(remaining.iter().cloned()));
        }

        match failure {
            Some(error) => {
                if let Some(done) = query.fail(error) {
                    out.completions.push(done);
                }
            }
            None => {
                if !out.registrations.is_empty() {
                    register_deps(std::mem::take(&mut out.registrations));
                }
                if let Some(done) = query.try_complete() {
                    out.completions.push(done);
                }
            }
        }

        for done in out.completions {
            done.run();
        }

        // Units claimed along the way are dispatched even if the query
        // itself failed: their symbols are marked materializing and must
        // make progress for other (and future) queries.
        if !out.tasks.is_empty() {
            let dispatcher = self.inner.state().dispatcher.clone();
            for task in out.tasks {
                debug!(
                    unit = task.unit_name(),
                    library = %task.library().name(),
                    "dispatching materialization"
                );
                dispatcher(task);
            }
        }
    }

    /// Look up `names` and block until they are all ready
    pub fn blocking_lookup(
        &self,
        search: &[SearchEntry],
        names: SymbolNameSet,
    ) -> SessionResult<SymbolMap> {
        let (tx, rx) = mpsc::channel();
        self.lookup(
            search,
            names,
            SymbolStage::Ready,
            move |result| {
                let _ = tx.send(result);
            },
            no_dependencies,
        );
        rx.recv()
            .expect("lookup completion dropped without notifying")
    }

    /// Look up a single name and block until it is ready
    pub fn blocking_lookup_one(
        &self,
        search: &[SearchEntry],
        name: SymbolName,
    ) -> SessionResult<EvaluatedSymbol> {
        let mut names = SymbolNameSet::new();
        names.insert(name.clone());
        let mut result = self.blocking_lookup(search, names)?;
        Ok(result
            .remove(&name)
            .expect("lookup result missing the requested symbol"))
    }
}

impl Default for ExecutionSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_shared() {
        let session = ExecutionSession::new();
        assert_eq!(session.intern("foo"), session.intern("foo"));
        assert_ne!(session.intern("foo"), session.intern("bar"));
    }

    #[test]
    fn duplicate_library_names_rejected() {
        let session = ExecutionSession::new();
        session.create_library("main").unwrap();
        let err = session.create_library("main").unwrap_err();
        assert!(matches!(err, SessionError::DuplicateLibrary(name) if name == "main"));
    }

    #[test]
    fn empty_lookup_completes_immediately() {
        let session = ExecutionSession::new();
        let lib = session.create_library("main").unwrap();
        let result = session.blocking_lookup(&[SearchEntry::new(lib)], SymbolNameSet::new());
        assert!(result.unwrap().is_empty());
    }
}
