//! Materialization responsibility - the publishing half of a running unit
//!
//! Exactly one responsibility owns the right to resolve and emit each
//! materializing symbol. Responsibilities can shrink (delegate, replace)
//! and grow (define_materializing) while in flight, and are terminal on
//! emit or failure. Dropping one with unfinished symbols fails them, so a
//! dispatcher that loses a task can never strand a query.

use tracing::{debug, trace};

use crate::error::SessionResult;
use crate::library::DynamicLibrary;
use crate::session::DependenceMap;
use crate::symbol::{SymbolFlagsMap, SymbolMap, SymbolName, SymbolNameSet};

use super::MaterializationUnit;

/// Handle through which a running materialization unit publishes results
pub struct MaterializationResponsibility {
    library: DynamicLibrary,
    owned: SymbolFlagsMap,
    complete: bool,
}

impl MaterializationResponsibility {
    pub(crate) fn new(library: DynamicLibrary, owned: SymbolFlagsMap) -> Self {
        Self {
            library,
            owned,
            complete: false,
        }
    }

    /// The library the symbols are being materialized into
    #[must_use]
    pub fn library(&self) -> &DynamicLibrary {
        &self.library
    }

    /// The symbols this responsibility still owns, with declared flags
    #[must_use]
    pub fn symbols(&self) -> &SymbolFlagsMap {
        &self.owned
    }

    /// The owned symbols that currently have at least one pending query
    ///
    /// Useful for partial materialization: produce these now, hand the rest
    /// back with [`replace`](Self::replace).
    #[must_use]
    pub fn get_requested_symbols(&self) -> SymbolNameSet {
        self.library
            .session
            .state()
            .requested_of(self.library.id, &self.owned)
    }

    /// Publish addresses for owned symbols
    ///
    /// May be called more than once to resolve in batches, but each symbol
    /// resolves exactly once, and every owned symbol must be resolved
    /// before [`notify_emitted`](Self::notify_emitted).
    ///
    /// # Panics
    /// Panics if a symbol is not owned by this responsibility or has
    /// already resolved.
    pub fn notify_resolved(&mut self, symbols: SymbolMap) {
        let completions = self
            .library
            .session
            .state()
            .resolve_symbols(self.library.id, &symbols, &self.owned);
        for done in completions {
            done.run();
        }
    }

    /// Mark every owned symbol emitted and propagate readiness
    ///
    /// # Panics
    /// Panics if any owned symbol has not been resolved.
    pub fn notify_emitted(mut self) {
        trace!(library = %self.library.name(), count = self.owned.len(), "emitted");
        let completions = self
            .library
            .session
            .state()
            .emit_symbols(self.library.id, &self.owned);
        self.complete = true;
        for done in completions {
            done.run();
        }
    }

    /// Fail every owned symbol; pending queries on them (and on anything
    /// depending on them) fail with the affected name set
    pub fn fail_materialization(mut self) {
        debug!(library = %self.library.name(), count = self.owned.len(), "materialization failed");
        let completions = self
            .library
            .session
            .state()
            .fail_symbols(self.library.id, &self.owned);
        self.complete = true;
        for done in completions {
            done.run();
        }
    }

    /// Add new names to this responsibility mid-flight
    ///
    /// The names enter the library in the materializing state and must not
    /// collide with existing definitions.
    pub fn define_materializing(&mut self, flags: SymbolFlagsMap) -> SessionResult<()> {
        self.library
            .session
            .state()
            .define_materializing(&self.library, &flags)?;
        self.owned.extend(flags);
        Ok(())
    }

    /// Split off a new responsibility covering a subset of the owned names
    ///
    /// # Panics
    /// Panics if a name is not owned by this responsibility.
    pub fn delegate(&mut self, names: &SymbolNameSet) -> MaterializationResponsibility {
        let mut owned = SymbolFlagsMap::new();
        for name in names {
            let flags = self
                .owned
                .remove(name)
                .expect("delegated symbol not owned by this responsibility");
            owned.insert(name.clone(), flags);
        }
        MaterializationResponsibility::new(self.library.clone(), owned)
    }

    /// Return the unit's names to the library as lazy definitions
    ///
    /// The unit's declared names must be owned by this responsibility and
    /// not yet resolved. Names that already have a pending query are
    /// re-claimed and the new unit is dispatched immediately.
    pub fn replace(&mut self, unit: impl MaterializationUnit + 'static) {
        let task = self.library.session.state().replace_in_flight(
            &self.library,
            &mut self.owned,
            Box::new(unit),
        );
        if let Some(task) = task {
            let dispatcher = self.library.session.state().dispatcher.clone();
            dispatcher(task);
        }
    }

    /// Declare that one owned symbol depends on the listed symbols
    ///
    /// Self-dependencies and dependencies that are already ready are
    /// filtered out.
    pub fn add_dependencies(&self, name: &SymbolName, deps: &DependenceMap) {
        debug_assert!(
            self.owned.contains_key(name),
            "dependencies added for a symbol this responsibility does not own"
        );
        let completions = self
            .library
            .session
            .state()
            .add_dependencies(&self.library, name, deps);
        for done in completions {
            done.run();
        }
    }

    /// Declare the listed symbols as dependencies of every owned symbol
    pub fn add_dependencies_for_all(&self, deps: &DependenceMap) {
        let mut completions = Vec::new();
        {
            let mut state = self.library.session.state();
            for name in self.owned.keys() {
                completions.extend(state.add_dependencies(&self.library, name, deps));
            }
        }
        for done in completions {
            done.run();
        }
    }
}

impl Drop for MaterializationResponsibility {
    fn drop(&mut self) {
        if self.complete || self.owned.is_empty() {
            return;
        }
        debug!(
            library = %self.library.name(),
            count = self.owned.len(),
            "responsibility dropped with unfinished symbols; failing them"
        );
        let completions = match self.library.session.state.lock() {
            Ok(mut state) => state.fail_symbols(self.library.id, &self.owned),
            Err(_) => return,
        };
        for done in completions {
            done.run();
        }
    }
}
