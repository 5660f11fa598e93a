//! Dynamic libraries - named symbol namespaces
//!
//! A [`DynamicLibrary`] is a lightweight handle onto state owned by the
//! session: a symbol table, an ordered list of definition generators, and
//! the admission rules for new definitions. Handles are cheap to clone and
//! safe to share across threads.

pub mod generator;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::SessionResult;
use crate::materialize::MaterializationUnit;
use crate::session::{ExecutionSession, SessionInner};
use crate::symbol::{SymbolFlagsMap, SymbolNameSet};

pub use generator::{Generator, ReexportsGenerator};

/// A named symbol namespace within an execution session
#[derive(Clone)]
pub struct DynamicLibrary {
    pub(crate) session: Arc<SessionInner>,
    pub(crate) id: crate::session::state::LibraryId,
    pub(crate) name: Arc<str>,
}

impl DynamicLibrary {
    /// The library's name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning session
    #[must_use]
    pub fn session(&self) -> ExecutionSession {
        ExecutionSession::from_inner(self.session.clone())
    }

    /// Define symbols through a materialization unit
    ///
    /// Absolute maps, aliases, and re-exports are all units; see
    /// [`AbsoluteSymbolsUnit`](crate::materialize::AbsoluteSymbolsUnit) and
    /// [`ReexportsUnit`](crate::materialize::ReexportsUnit). Fails with
    /// `DuplicateDefinition` unless the colliding side is weak and has not
    /// begun materializing; the losing definition is discarded on its unit.
    pub fn define(&self, unit: impl MaterializationUnit + 'static) -> SessionResult<()> {
        trace!(library = %self.name, unit = unit.name(), "defining unit");
        self.session.state().define_unit(self, Box::new(unit))
    }

    /// Append a definition generator
    ///
    /// Generators are consulted in insertion order during lookups, for
    /// names no existing definition claims.
    pub fn add_generator(&self, generator: impl Generator + 'static) {
        self.session.state().libraries[self.id]
            .generators
            .push(Arc::new(generator));
    }

    /// Remove definitions
    ///
    /// All-or-nothing: unknown names fail with `SymbolsNotFound`, names
    /// with an active materializer fail with `SymbolsCouldNotBeRemoved`,
    /// and in either case nothing changes. On success, unclaimed units are
    /// discarded (and destroyed once they own no names).
    pub fn remove(&self, names: &SymbolNameSet) -> SessionResult<()> {
        let completions = self.session.state().remove_symbols(self, names)?;
        debug!(library = %self.name, count = names.len(), "removed symbols");
        for done in completions {
            done.run();
        }
        Ok(())
    }

    /// Flags of the named symbols, without triggering materialization
    ///
    /// Generators are consulted and may install definitions, but nothing
    /// starts materializing. Names nobody can supply are omitted from the
    /// result rather than reported as errors.
    pub fn lookup_flags(&self, names: &SymbolNameSet) -> SessionResult<SymbolFlagsMap> {
        let mut found = SymbolFlagsMap::new();
        let mut remaining = names.clone();
        self.session
            .state()
            .peek_flags(self.id, names, &mut found, &mut remaining);
        if remaining.is_empty() {
            return Ok(found);
        }
        let generators = self.session.state().libraries[self.id].generators.clone();
        for generator in generators {
            if remaining.is_empty() {
                break;
            }
            let claimed = generator.try_generate(self, &remaining)?;
            if claimed.is_empty() {
                continue;
            }
            self.session
                .state()
                .peek_flags(self.id, &claimed, &mut found, &mut remaining);
        }
        Ok(found)
    }
}

impl PartialEq for DynamicLibrary {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.session, &other.session) && self.id == other.id
    }
}

impl Eq for DynamicLibrary {}

impl Hash for DynamicLibrary {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for DynamicLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynamicLibrary({})", self.name)
    }
}
