//! Tether Core - JIT symbol resolution engine
//!
//! This crate provides the core of a JIT linker's symbol layer:
//! - Symbols: interned names, flags, and lifecycle stages
//! - Libraries: named namespaces with admission rules and generators
//! - Materialization: lazy producers invoked on first demand
//! - Queries: asynchronous lookups with exactly-once completion
//! - Readiness: two-phase (resolved, then ready) propagation through a
//!   dependency graph that may contain cycles
//!
//! The engine never generates, loads, or relocates code; addresses are
//! opaque 64-bit values supplied by user materializers.

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error taxonomy for session operations
pub mod error;

/// Dynamic libraries and definition generators
pub mod library;

/// Materialization units and responsibilities
pub mod materialize;

/// Execution session, lookups, and dispatch
pub mod session;

/// Symbol model: names, flags, stages
pub mod symbol;

/// Helpers for tests
pub mod testutil;

mod query;

pub use error::{SessionError, SessionResult};
pub use library::{DynamicLibrary, Generator, ReexportsGenerator};
pub use materialize::{
    AbsoluteSymbolsUnit, MaterializationResponsibility, MaterializationUnit, ReexportsUnit,
};
pub use session::{
    no_dependencies, DependenceMap, ExecutionSession, MaterializationTask, SearchEntry,
};
pub use symbol::{
    AliasEntry, AliasMap, EvaluatedSymbol, SymbolFlags, SymbolFlagsMap, SymbolMap, SymbolName,
    SymbolNameSet, SymbolStage, SymbolStringPool,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
