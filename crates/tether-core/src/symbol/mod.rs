//! Symbol model - names, flags, lifecycle stages, and evaluated symbols
//!
//! A symbol in Tether is an interned name bound (eventually) to an opaque
//! 64-bit address. The engine never interprets addresses; they come from
//! whatever backend the materialization units wrap.

pub mod pool;

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;

pub use pool::{SymbolName, SymbolStringPool};

bitflags! {
    /// Flags attached to a symbol definition
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SymbolFlags: u8 {
        /// Visible to lookups from other libraries
        const EXPORTED = 1 << 0;
        /// Duplicate definitions are permitted; a strong one wins
        const WEAK = 1 << 1;
        /// The address points at callable code
        const CALLABLE = 1 << 2;
    }
}

impl SymbolFlags {
    /// Returns true if the symbol is visible cross-library
    #[must_use]
    pub fn is_exported(self) -> bool {
        self.contains(SymbolFlags::EXPORTED)
    }

    /// Returns true if the symbol may be superseded by a strong definition
    #[must_use]
    pub fn is_weak(self) -> bool {
        self.contains(SymbolFlags::WEAK)
    }

    /// Returns true if the symbol's address is callable
    #[must_use]
    pub fn is_callable(self) -> bool {
        self.contains(SymbolFlags::CALLABLE)
    }
}

/// Lifecycle stage of a symbol within its library
///
/// Stages only move forward. Failure is tracked separately as a terminal
/// marker rather than a stage, so a failed symbol still records how far it
/// got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolStage {
    /// No meaningful state (placeholder)
    Invalid,
    /// Defined but never claimed by a lookup
    NeverSearched,
    /// Claimed; a materialization unit is responsible for producing it
    Materializing,
    /// Has a concrete address
    Resolved,
    /// Its entire transitive dependency closure has been emitted
    Ready,
}

/// An address/flags pair produced by a materializer
///
/// The address is opaque to the engine: it is stored and handed back to
/// queries, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatedSymbol {
    address: u64,
    flags: SymbolFlags,
}

impl EvaluatedSymbol {
    /// Create an evaluated symbol from an address and flags
    #[must_use]
    pub fn new(address: u64, flags: SymbolFlags) -> Self {
        Self { address, flags }
    }

    /// The symbol's address
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The symbol's flags
    #[must_use]
    pub fn flags(&self) -> SymbolFlags {
        self.flags
    }
}

/// Map of names to evaluated symbols
pub type SymbolMap = HashMap<SymbolName, EvaluatedSymbol>;

/// Map of names to declared flags
pub type SymbolFlagsMap = HashMap<SymbolName, SymbolFlags>;

/// Set of symbol names
pub type SymbolNameSet = HashSet<SymbolName>;

/// One alias or re-export: the symbol it reads from, and the flags the
/// aliasing definition carries
#[derive(Debug, Clone)]
pub struct AliasEntry {
    /// Name of the symbol the alias resolves through
    pub source: SymbolName,
    /// Flags of the aliasing definition itself
    pub flags: SymbolFlags,
}

impl AliasEntry {
    /// Create an alias entry
    #[must_use]
    pub fn new(source: SymbolName, flags: SymbolFlags) -> Self {
        Self { source, flags }
    }
}

/// Map of alias target names to their entries
pub type AliasMap = HashMap<SymbolName, AliasEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ordering_is_forward() {
        assert!(SymbolStage::Invalid < SymbolStage::NeverSearched);
        assert!(SymbolStage::NeverSearched < SymbolStage::Materializing);
        assert!(SymbolStage::Materializing < SymbolStage::Resolved);
        assert!(SymbolStage::Resolved < SymbolStage::Ready);
    }

    #[test]
    fn flags_queries() {
        let flags = SymbolFlags::EXPORTED | SymbolFlags::WEAK;
        assert!(flags.is_exported());
        assert!(flags.is_weak());
        assert!(!flags.is_callable());
        assert!(!SymbolFlags::empty().is_exported());
    }

    #[test]
    fn evaluated_symbol_accessors() {
        let sym = EvaluatedSymbol::new(0x1000, SymbolFlags::EXPORTED);
        assert_eq!(sym.address(), 0x1000);
        assert_eq!(sym.flags(), SymbolFlags::EXPORTED);
    }
}
