//! Definition generators - pluggable on-demand symbol suppliers

use crate::error::SessionResult;
use crate::symbol::{AliasEntry, AliasMap, SymbolName, SymbolNameSet};

use super::DynamicLibrary;
use crate::materialize::ReexportsUnit;

/// A generator consulted during lookup for names nothing else claims
///
/// The generator is invoked with the session unlocked, so it may (and
/// normally does) call [`DynamicLibrary::define`] to install definitions
/// before returning the subset of names it claimed. Errors propagate
/// verbatim to the triggering lookup. The engine never consults the same
/// generator twice for the same name within one lookup.
pub trait Generator: Send + Sync {
    /// Install definitions for whichever of `names` this generator can
    /// supply, returning the names it claimed
    fn try_generate(
        &self,
        library: &DynamicLibrary,
        names: &SymbolNameSet,
    ) -> SessionResult<SymbolNameSet>;
}

/// A generator that re-exports matching symbols from another library
pub struct ReexportsGenerator {
    source: DynamicLibrary,
    match_non_exported: bool,
    filter: Option<Box<dyn Fn(&SymbolName) -> bool + Send + Sync>>,
}

impl ReexportsGenerator {
    /// Re-export from `source`; `match_non_exported` also exposes symbols
    /// the source does not export
    #[must_use]
    pub fn new(source: DynamicLibrary, match_non_exported: bool) -> Self {
        Self {
            source,
            match_non_exported,
            filter: None,
        }
    }

    /// Only generate names the predicate accepts
    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&SymbolName) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl Generator for ReexportsGenerator {
    fn try_generate(
        &self,
        library: &DynamicLibrary,
        names: &SymbolNameSet,
    ) -> SessionResult<SymbolNameSet> {
        let candidates: SymbolNameSet = names
            .iter()
            .filter(|name| self.filter.as_ref().map_or(true, |f| f(name)))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(SymbolNameSet::new());
        }

        let found = self.source.lookup_flags(&candidates)?;

        // lookup_flags reports hidden symbols too; only claim what the
        // materializer will actually be able to find in the source.
        let aliases: AliasMap = found
            .iter()
            .filter(|(_, flags)| flags.is_exported() || self.match_non_exported)
            .map(|(name, flags)| (name.clone(), AliasEntry::new(name.clone(), *flags)))
            .collect();
        if aliases.is_empty() {
            return Ok(SymbolNameSet::new());
        }
        let claimed: SymbolNameSet = aliases.keys().cloned().collect();

        let mut unit = ReexportsUnit::from_library(self.source.clone(), aliases);
        if self.match_non_exported {
            unit = unit.with_non_exported_sources();
        }
        library.define(unit)?;
        Ok(claimed)
    }
}
