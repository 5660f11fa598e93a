//! Error taxonomy for session operations
//!
//! Every failure the engine can report is a [`SessionError`] variant, so
//! callers can distinguish kinds at runtime. Errors surface through
//! operation results and query completion callbacks; internal invariants are
//! enforced with assertions instead.

use thiserror::Error;

use crate::symbol::SymbolName;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors reported by the execution session
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// A lookup or removal named symbols nothing could supply
    #[error("symbols not found: [{}]", join_names(.0))]
    SymbolsNotFound(Vec<SymbolName>),

    /// A definition collided with a live, non-supersedable prior definition
    #[error("duplicate definition of symbol \"{0}\"")]
    DuplicateDefinition(SymbolName),

    /// A removal named symbols with an active materializer
    #[error("symbols could not be removed: [{}]", join_names(.0))]
    SymbolsCouldNotBeRemoved(Vec<SymbolName>),

    /// Materialization failed for these symbols or something they depend on
    #[error("failed to materialize symbols: [{}]", join_names(.0))]
    FailedToMaterialize(Vec<SymbolName>),

    /// A definition generator failed during lookup
    #[error("generator error: {0}")]
    Generator(String),

    /// A library with this name already exists in the session
    #[error("library already exists: {0}")]
    DuplicateLibrary(String),
}

impl SessionError {
    pub(crate) fn not_found(names: impl IntoIterator<Item = SymbolName>) -> Self {
        SessionError::SymbolsNotFound(sorted(names))
    }

    pub(crate) fn could_not_remove(names: impl IntoIterator<Item = SymbolName>) -> Self {
        SessionError::SymbolsCouldNotBeRemoved(sorted(names))
    }

    pub(crate) fn failed_to_materialize(names: impl IntoIterator<Item = SymbolName>) -> Self {
        SessionError::FailedToMaterialize(sorted(names))
    }
}

/// Sort names by content so error payloads are deterministic
fn sorted(names: impl IntoIterator<Item = SymbolName>) -> Vec<SymbolName> {
    let mut names: Vec<SymbolName> = names.into_iter().collect();
    names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    names
}

fn join_names(names: &[SymbolName]) -> String {
    names
        .iter()
        .map(SymbolName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
