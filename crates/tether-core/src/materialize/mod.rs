//! Materialization units - lazy producers of symbol definitions
//!
//! A materialization unit declares up front which symbols it can produce,
//! and is invoked at most once, when a lookup first demands any of them.
//! While it runs it publishes results through a
//! [`MaterializationResponsibility`]. A unit that loses all of its names
//! (to stronger definitions or removal) is destroyed without ever running;
//! its `Drop` impl is the place to observe that.

pub mod responsibility;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::library::DynamicLibrary;
use crate::session::SearchEntry;
use crate::symbol::{
    AliasMap, EvaluatedSymbol, SymbolFlagsMap, SymbolMap, SymbolName, SymbolStage,
};

pub use responsibility::MaterializationResponsibility;

/// A lazy producer of one or more symbol definitions
///
/// `discard` and `Drop` may run with the session locked; they must not call
/// back into the session.
pub trait MaterializationUnit: Send {
    /// Name for diagnostics
    fn name(&self) -> &str {
        "<anonymous>"
    }

    /// The symbols this unit will produce, with their declared flags
    fn symbol_flags(&self) -> &SymbolFlagsMap;

    /// Produce the declared symbols
    ///
    /// Invoked at most once. The unit must eventually resolve and emit every
    /// symbol the responsibility owns, or fail the materialization.
    fn materialize(self: Box<Self>, responsibility: MaterializationResponsibility);

    /// One of the declared names has been superseded or removed before
    /// materialization; the unit must stop claiming it
    fn discard(&mut self, library: &DynamicLibrary, name: &SymbolName);
}

/// A unit wrapping already-evaluated symbols
///
/// Materialization just publishes the map: resolve, then emit.
pub struct AbsoluteSymbolsUnit {
    symbols: SymbolMap,
    flags: SymbolFlagsMap,
}

impl AbsoluteSymbolsUnit {
    /// Wrap a map of evaluated symbols
    #[must_use]
    pub fn new(symbols: SymbolMap) -> Self {
        let flags = symbols
            .iter()
            .map(|(name, symbol)| (name.clone(), symbol.flags()))
            .collect();
        Self { symbols, flags }
    }
}

impl MaterializationUnit for AbsoluteSymbolsUnit {
    fn name(&self) -> &str {
        "<absolute symbols>"
    }

    fn symbol_flags(&self) -> &SymbolFlagsMap {
        &self.flags
    }

    fn materialize(self: Box<Self>, responsibility: MaterializationResponsibility) {
        let mut mr = responsibility;
        mr.notify_resolved(self.symbols);
        mr.notify_emitted();
    }

    fn discard(&mut self, _library: &DynamicLibrary, name: &SymbolName) {
        self.symbols.remove(name);
        self.flags.remove(name);
    }
}

/// A unit that defines aliases or cross-library re-exports
///
/// Each target name resolves to the address of its source symbol, under the
/// target's own flags. Targets nobody has asked for yet are handed back to
/// the library lazily, so materializing one re-export never forces its
/// siblings.
pub struct ReexportsUnit {
    source: Option<DynamicLibrary>,
    match_non_exported: bool,
    aliases: AliasMap,
    flags: SymbolFlagsMap,
}

impl ReexportsUnit {
    /// Aliases within the defining library
    #[must_use]
    pub fn aliases(aliases: AliasMap) -> Self {
        Self::from_parts(None, true, aliases)
    }

    /// Re-exports of symbols from another library
    #[must_use]
    pub fn from_library(source: DynamicLibrary, aliases: AliasMap) -> Self {
        Self::from_parts(Some(source), false, aliases)
    }

    /// Also match non-exported symbols when looking up sources
    #[must_use]
    pub fn with_non_exported_sources(mut self) -> Self {
        self.match_non_exported = true;
        self
    }

    fn from_parts(
        source: Option<DynamicLibrary>,
        match_non_exported: bool,
        aliases: AliasMap,
    ) -> Self {
        let flags = aliases
            .iter()
            .map(|(target, entry)| (target.clone(), entry.flags))
            .collect();
        Self {
            source,
            match_non_exported,
            aliases,
            flags,
        }
    }
}

impl MaterializationUnit for ReexportsUnit {
    fn name(&self) -> &str {
        "<reexports>"
    }

    fn symbol_flags(&self) -> &SymbolFlagsMap {
        &self.flags
    }

    fn materialize(self: Box<Self>, responsibility: MaterializationResponsibility) {
        let mut this = *self;
        let mut mr = responsibility;

        // Only produce what is actually being waited for; the rest goes
        // back to the library as a fresh lazy unit.
        let requested = mr.get_requested_symbols();
        if requested.is_empty() {
            let returned = Self::from_parts(this.source, this.match_non_exported, this.aliases);
            mr.replace(returned);
            return;
        }
        if requested.len() < this.aliases.len() {
            let mut kept = AliasMap::new();
            let mut returned = AliasMap::new();
            for (target, entry) in this.aliases {
                if requested.contains(&target) {
                    kept.insert(target, entry);
                } else {
                    returned.insert(target, entry);
                }
            }
            this.aliases = kept;
            let aliases = &this.aliases;
            this.flags.retain(|name, _| aliases.contains_key(name));
            mr.replace(Self::from_parts(
                this.source.clone(),
                this.match_non_exported,
                returned,
            ));
        }

        let library = mr.library().clone();

        // Follow alias chains inside this unit down to external roots.
        // Chains only make sense for same-library aliases; re-export
        // sources live in a different namespace.
        let mut roots = crate::symbol::SymbolNameSet::new();
        let mut root_of: HashMap<SymbolName, SymbolName> = HashMap::new();
        for (target, entry) in &this.aliases {
            let mut source = entry.source.clone();
            if this.source.is_none() {
                let mut hops = 0;
                while let Some(next) = this.aliases.get(&source) {
                    source = next.source.clone();
                    hops += 1;
                    if hops > this.aliases.len() {
                        mr.fail_materialization();
                        return;
                    }
                }
            }
            roots.insert(source.clone());
            root_of.insert(target.clone(), source);
        }

        let alias_flags = this.flags.clone();
        let source_library = this.source.clone().unwrap_or_else(|| library.clone());
        let search = vec![if this.match_non_exported {
            SearchEntry::with_non_exported(source_library)
        } else {
            SearchEntry::new(source_library)
        }];

        let session = library.session();
        let shared = Arc::new(Mutex::new(Some(mr)));
        let for_deps = Arc::clone(&shared);
        session.lookup(
            &search,
            roots,
            SymbolStage::Resolved,
            move |result| {
                let taken = shared
                    .lock()
                    .expect("reexports responsibility lock poisoned")
                    .take();
                let Some(mut mr) = taken else { return };
                match result {
                    Ok(resolved) => {
                        let mut out = SymbolMap::new();
                        for (target, root) in &root_of {
                            let Some(symbol) = resolved.get(root) else {
                                mr.fail_materialization();
                                return;
                            };
                            out.insert(
                                target.clone(),
                                EvaluatedSymbol::new(symbol.address(), alias_flags[target]),
                            );
                        }
                        mr.notify_resolved(out);
                        mr.notify_emitted();
                    }
                    Err(_) => mr.fail_materialization(),
                }
            },
            move |deps| {
                let guard = for_deps
                    .lock()
                    .expect("reexports responsibility lock poisoned");
                if let Some(mr) = guard.as_ref() {
                    mr.add_dependencies_for_all(&deps);
                }
            },
        );
    }

    fn discard(&mut self, _library: &DynamicLibrary, name: &SymbolName) {
        self.aliases.remove(name);
        self.flags.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{AliasEntry, SymbolFlags, SymbolStringPool};

    #[test]
    fn absolute_unit_declares_symbol_flags() {
        let pool = SymbolStringPool::new();
        let foo = pool.intern("foo");
        let mut symbols = SymbolMap::new();
        symbols.insert(
            foo.clone(),
            EvaluatedSymbol::new(0x1000, SymbolFlags::EXPORTED),
        );

        let unit = AbsoluteSymbolsUnit::new(symbols);
        assert_eq!(unit.symbol_flags()[&foo], SymbolFlags::EXPORTED);
    }

    #[test]
    fn discard_shrinks_declared_set() {
        let pool = SymbolStringPool::new();
        let foo = pool.intern("foo");
        let bar = pool.intern("bar");
        let mut aliases = AliasMap::new();
        aliases.insert(
            foo.clone(),
            AliasEntry::new(bar.clone(), SymbolFlags::EXPORTED),
        );
        aliases.insert(
            bar.clone(),
            AliasEntry::new(foo.clone(), SymbolFlags::EXPORTED),
        );

        let mut unit = ReexportsUnit::aliases(aliases);
        assert_eq!(unit.symbol_flags().len(), 2);

        // discard is only ever called by the engine, but the bookkeeping is
        // observable through the declared flags map
        let session = crate::session::ExecutionSession::new();
        let lib = session.create_library("main").unwrap();
        unit.discard(&lib, &foo);
        assert_eq!(unit.symbol_flags().len(), 1);
        assert!(unit.symbol_flags().contains_key(&bar));
    }
}
