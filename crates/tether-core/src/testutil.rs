//! Test utilities for Tether
//!
//! This module provides common helpers for exercising the engine:
//! a closure-driven materialization unit, responsibility capture, and a
//! ready-made session fixture with a handful of interned names.

use std::sync::{Arc, Mutex};

use crate::library::DynamicLibrary;
use crate::materialize::{MaterializationResponsibility, MaterializationUnit};
use crate::session::ExecutionSession;
use crate::symbol::{
    EvaluatedSymbol, SymbolFlags, SymbolFlagsMap, SymbolMap, SymbolName, SymbolNameSet,
};

/// A materialization unit driven by closures
///
/// The materialize closure runs when the unit is claimed; the optional
/// discard closure observes superseded names; the optional destroy closure
/// runs from `Drop`, which is how unit destruction is observed.
pub struct SimpleMaterializationUnit {
    flags: SymbolFlagsMap,
    materialize: Option<Box<dyn FnOnce(MaterializationResponsibility) + Send>>,
    discard: Option<Box<dyn FnMut(&DynamicLibrary, &SymbolName) + Send>>,
    destroy: Option<Box<dyn FnMut() + Send>>,
}

impl SimpleMaterializationUnit {
    /// Create a unit declaring `flags` whose materializer is `materialize`
    #[must_use]
    pub fn new(
        flags: SymbolFlagsMap,
        materialize: impl FnOnce(MaterializationResponsibility) + Send + 'static,
    ) -> Self {
        Self {
            flags,
            materialize: Some(Box::new(materialize)),
            discard: None,
            destroy: None,
        }
    }

    /// Observe discarded names
    #[must_use]
    pub fn on_discard(
        mut self,
        discard: impl FnMut(&DynamicLibrary, &SymbolName) + Send + 'static,
    ) -> Self {
        self.discard = Some(Box::new(discard));
        self
    }

    /// Observe destruction of the unit
    #[must_use]
    pub fn on_destroy(mut self, destroy: impl FnMut() + Send + 'static) -> Self {
        self.destroy = Some(Box::new(destroy));
        self
    }
}

impl MaterializationUnit for SimpleMaterializationUnit {
    fn name(&self) -> &str {
        "<simple>"
    }

    fn symbol_flags(&self) -> &SymbolFlagsMap {
        &self.flags
    }

    fn materialize(mut self: Box<Self>, responsibility: MaterializationResponsibility) {
        let materialize = self
            .materialize
            .take()
            .expect("materialize invoked more than once");
        materialize(responsibility);
    }

    fn discard(&mut self, library: &DynamicLibrary, name: &SymbolName) {
        self.flags.remove(name);
        if let Some(discard) = &mut self.discard {
            discard(library, name);
        }
    }
}

impl Drop for SimpleMaterializationUnit {
    fn drop(&mut self) {
        if let Some(destroy) = &mut self.destroy {
            destroy();
        }
    }
}

/// Shared slot a capturing unit stores its responsibility in
pub type SharedResponsibility = Arc<Mutex<Option<MaterializationResponsibility>>>;

/// A unit that stashes its responsibility for the test to drive manually
#[must_use]
pub fn capturing_unit(flags: SymbolFlagsMap) -> (SimpleMaterializationUnit, SharedResponsibility) {
    let slot: SharedResponsibility = Arc::new(Mutex::new(None));
    let stash = slot.clone();
    let unit = SimpleMaterializationUnit::new(flags, move |mr| {
        *stash.lock().unwrap() = Some(mr);
    });
    (unit, slot)
}

/// Take a captured responsibility out of its slot
///
/// # Panics
/// Panics if the unit has not materialized yet.
pub fn take_responsibility(slot: &SharedResponsibility) -> MaterializationResponsibility {
    slot.lock()
        .unwrap()
        .take()
        .expect("responsibility not captured yet")
}

/// Build a flags map from pairs
pub fn symbol_flags(
    entries: impl IntoIterator<Item = (SymbolName, SymbolFlags)>,
) -> SymbolFlagsMap {
    entries.into_iter().collect()
}

/// Build a symbol map from pairs
pub fn symbol_map(
    entries: impl IntoIterator<Item = (SymbolName, EvaluatedSymbol)>,
) -> SymbolMap {
    entries.into_iter().collect()
}

/// Build a name set
pub fn name_set(names: impl IntoIterator<Item = SymbolName>) -> SymbolNameSet {
    names.into_iter().collect()
}

/// A session with one library and four interned names
///
/// Addresses follow the usual test convention: foo at 0x1000 through qux
/// at 0x4000, all exported.
pub struct SessionFixture {
    pub session: ExecutionSession,
    pub lib: DynamicLibrary,
    pub foo: SymbolName,
    pub bar: SymbolName,
    pub baz: SymbolName,
    pub qux: SymbolName,
    pub foo_sym: EvaluatedSymbol,
    pub bar_sym: EvaluatedSymbol,
    pub baz_sym: EvaluatedSymbol,
    pub qux_sym: EvaluatedSymbol,
}

impl SessionFixture {
    /// Create the fixture
    ///
    /// # Panics
    /// Panics if the library cannot be created (never, in a fresh session).
    #[must_use]
    pub fn new() -> Self {
        let session = ExecutionSession::new();
        let lib = session
            .create_library("main")
            .expect("fresh session rejected library");
        let foo = session.intern("foo");
        let bar = session.intern("bar");
        let baz = session.intern("baz");
        let qux = session.intern("qux");
        Self {
            lib,
            foo_sym: EvaluatedSymbol::new(0x1000, SymbolFlags::EXPORTED),
            bar_sym: EvaluatedSymbol::new(0x2000, SymbolFlags::EXPORTED),
            baz_sym: EvaluatedSymbol::new(0x3000, SymbolFlags::EXPORTED),
            qux_sym: EvaluatedSymbol::new(0x4000, SymbolFlags::EXPORTED),
            foo,
            bar,
            baz,
            qux,
            session,
        }
    }
}

impl Default for SessionFixture {
    fn default() -> Self {
        Self::new()
    }
}
