//! Session-locked symbol tables and admission rules
//!
//! Everything in this module runs under the session lock. Methods collect
//! [`Completion`]s and [`MaterializationTask`]s for the caller to run after
//! unlocking; nothing here invokes user code except materialization-unit
//! `discard` hooks, which are documented to stay out of the session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{SessionError, SessionResult};
use crate::library::{DynamicLibrary, Generator};
use crate::materialize::responsibility::MaterializationResponsibility;
use crate::materialize::MaterializationUnit;
use crate::query::{AsyncSymbolQuery, Completion};
use crate::symbol::{
    EvaluatedSymbol, SymbolFlags, SymbolFlagsMap, SymbolName, SymbolNameSet, SymbolStage,
};

use super::{DependenceMap, DispatcherFn, MaterializationTask};

pub(crate) type LibraryId = usize;
pub(crate) type UnitId = u64;

/// A graph node: one symbol within one library
pub(crate) type DepNode = (LibraryId, SymbolName);

/// Readiness bookkeeping attached to a symbol once anything waits on it
#[derive(Default)]
pub(crate) struct MaterializingInfo {
    pub(crate) emitted: bool,
    pub(crate) waiters: Vec<Arc<AsyncSymbolQuery>>,
    pub(crate) pending_deps: HashSet<DepNode>,
    pub(crate) dependents: HashSet<DepNode>,
}

/// Per-name state within one library
pub(crate) struct SymbolEntry {
    pub(crate) flags: SymbolFlags,
    pub(crate) address: u64,
    pub(crate) stage: SymbolStage,
    pub(crate) failed: bool,
    /// Owning pending unit, valid while `NeverSearched`
    pub(crate) unit: Option<UnitId>,
    pub(crate) info: Option<Box<MaterializingInfo>>,
}

impl SymbolEntry {
    fn lazy(flags: SymbolFlags, unit: UnitId) -> Self {
        Self {
            flags,
            address: 0,
            stage: SymbolStage::NeverSearched,
            failed: false,
            unit: Some(unit),
            info: None,
        }
    }

    fn materializing(flags: SymbolFlags) -> Self {
        Self {
            flags,
            address: 0,
            stage: SymbolStage::Materializing,
            failed: false,
            unit: None,
            info: Some(Box::default()),
        }
    }

    pub(crate) fn info_mut(&mut self) -> &mut MaterializingInfo {
        self.info.get_or_insert_with(Box::default)
    }
}

/// A defined-but-unclaimed materialization unit and the names it still owns
pub(crate) struct PendingUnit {
    pub(crate) unit: Box<dyn MaterializationUnit>,
    pub(crate) names: SymbolNameSet,
}

pub(crate) struct LibraryData {
    pub(crate) name: Arc<str>,
    pub(crate) symbols: HashMap<SymbolName, SymbolEntry>,
    pub(crate) generators: Vec<Arc<dyn Generator>>,
    pub(crate) units: HashMap<UnitId, PendingUnit>,
}

/// Mutable session state guarded by the session lock
pub(crate) struct SessionState {
    pub(crate) libraries: Vec<LibraryData>,
    pub(crate) dispatcher: DispatcherFn,
    next_unit: UnitId,
}

/// Outcome of trying to claim one name in one library during lookup
pub(crate) enum ClaimStatus {
    /// No definition here, or hidden from this search entry
    NotVisible,
    /// The library owns the name; the query is satisfied or attached
    Claimed,
    /// The name is in the failed terminal state
    Failed(SessionError),
}

/// Work a lookup accumulates while scanning under the lock
pub(crate) struct LookupOutput {
    pub(crate) tasks: Vec<MaterializationTask>,
    pub(crate) completions: Vec<Completion>,
    pub(crate) registrations: DependenceMap,
}

impl LookupOutput {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Vec::new(),
            completions: Vec::new(),
            registrations: DependenceMap::new(),
        }
    }
}

impl SessionState {
    pub(crate) fn new(dispatcher: DispatcherFn) -> Self {
        Self {
            libraries: Vec::new(),
            dispatcher,
            next_unit: 0,
        }
    }

    pub(crate) fn add_library(&mut self, name: &str) -> SessionResult<LibraryId> {
        if self.libraries.iter().any(|lib| &*lib.name == name) {
            return Err(SessionError::DuplicateLibrary(name.to_string()));
        }
        let id = self.libraries.len();
        self.libraries.push(LibraryData {
            name: Arc::from(name),
            symbols: HashMap::new(),
            generators: Vec::new(),
            units: HashMap::new(),
        });
        Ok(id)
    }

    fn next_unit_id(&mut self) -> UnitId {
        let id = self.next_unit;
        self.next_unit += 1;
        id
    }

    pub(crate) fn entry_of(&self, node: &DepNode) -> Option<&SymbolEntry> {
        self.libraries.get(node.0)?.symbols.get(&node.1)
    }

    pub(crate) fn entry_of_mut(&mut self, node: &DepNode) -> Option<&mut SymbolEntry> {
        self.libraries.get_mut(node.0)?.symbols.get_mut(&node.1)
    }

    pub(crate) fn info_of(&self, node: &DepNode) -> Option<&MaterializingInfo> {
        self.entry_of(node)?.info.as_deref()
    }

    pub(crate) fn info_of_mut(&mut self, node: &DepNode) -> Option<&mut MaterializingInfo> {
        self.entry_of_mut(node)?.info.as_deref_mut()
    }

    /// Admit a unit's definitions into a library
    ///
    /// Weak-supersession rules: a weak incoming name loses to any existing
    /// definition and is discarded on the incoming unit; a strong incoming
    /// name replaces an existing weak definition that has not begun
    /// materializing (discarding it on its old unit); anything else is a
    /// duplicate. A unit that loses every name is destroyed on the spot.
    pub(crate) fn define_unit(
        &mut self,
        library: &DynamicLibrary,
        mut unit: Box<dyn MaterializationUnit>,
    ) -> SessionResult<()> {
        let lib_id = library.id;
        let declared = unit.symbol_flags().clone();
        let mut new_side_discards: Vec<SymbolName> = Vec::new();
        let mut old_side_discards: Vec<(UnitId, SymbolName)> = Vec::new();

        for (name, flags) in &declared {
            let Some(existing) = self.libraries[lib_id].symbols.get(name) else {
                continue;
            };
            if flags.is_weak() {
                new_side_discards.push(name.clone());
            } else if existing.flags.is_weak() && existing.stage == SymbolStage::NeverSearched {
                let uid = existing
                    .unit
                    .expect("unsearched weak symbol has no pending unit");
                old_side_discards.push((uid, name.clone()));
            } else {
                return Err(SessionError::DuplicateDefinition(name.clone()));
            }
        }

        let mut admitted: SymbolNameSet = declared.keys().cloned().collect();
        for name in &new_side_discards {
            unit.discard(library, name);
            admitted.remove(name);
        }
        for (uid, name) in old_side_discards {
            self.discard_from_unit(library, uid, &name);
        }

        if admitted.is_empty() {
            // Every declared name lost to an existing definition.
            drop(unit);
            return Ok(());
        }

        let uid = self.next_unit_id();
        for name in &admitted {
            let flags = declared[name];
            self.libraries[lib_id]
                .symbols
                .insert(name.clone(), SymbolEntry::lazy(flags, uid));
        }
        self.libraries[lib_id].units.insert(
            uid,
            PendingUnit {
                unit,
                names: admitted,
            },
        );
        Ok(())
    }

    /// Drop one name from a pending unit, destroying the unit if emptied
    fn discard_from_unit(&mut self, library: &DynamicLibrary, uid: UnitId, name: &SymbolName) {
        let lib = &mut self.libraries[library.id];
        let Some(pending) = lib.units.get_mut(&uid) else {
            return;
        };
        pending.unit.discard(library, name);
        pending.names.remove(name);
        if pending.names.is_empty() {
            lib.units.remove(&uid);
        }
    }

    /// Remove definitions, per the three-phase contract
    pub(crate) fn remove_symbols(
        &mut self,
        library: &DynamicLibrary,
        names: &SymbolNameSet,
    ) -> Result<Vec<Completion>, SessionError> {
        let lib_id = library.id;
        let mut missing = Vec::new();
        let mut busy = Vec::new();
        for name in names {
            match self.libraries[lib_id].symbols.get(name) {
                None => missing.push(name.clone()),
                Some(entry) => {
                    let has_live_materializer = !entry.failed
                        && matches!(
                            entry.stage,
                            SymbolStage::Materializing | SymbolStage::Resolved
                        );
                    if has_live_materializer {
                        busy.push(name.clone());
                    }
                }
            }
        }
        if !missing.is_empty() {
            return Err(SessionError::not_found(missing));
        }
        if !busy.is_empty() {
            return Err(SessionError::could_not_remove(busy));
        }

        let mut orphaned: Vec<DepNode> = Vec::new();
        for name in names {
            let Some(entry) = self.libraries[lib_id].symbols.remove(name) else {
                continue;
            };
            if let Some(uid) = entry.unit {
                self.discard_from_unit(library, uid, name);
            }
            if let Some(info) = entry.info {
                // Anything still depending on this symbol can never become
                // ready; surface the removal to it as a failure.
                orphaned.extend(info.dependents.iter().cloned());
                let node: DepNode = (lib_id, name.clone());
                for dep in &info.pending_deps {
                    if let Some(dep_info) = self.info_of_mut(dep) {
                        dep_info.dependents.remove(&node);
                    }
                }
            }
        }
        Ok(self.fail_nodes(orphaned))
    }

    /// Claim a pending unit: move its names to `Materializing` and package
    /// it with a responsibility covering them
    pub(crate) fn claim_unit(
        &mut self,
        library: &DynamicLibrary,
        uid: UnitId,
    ) -> MaterializationTask {
        let lib_id = library.id;
        let pending = self.libraries[lib_id]
            .units
            .remove(&uid)
            .expect("claimed unit is not pending");
        let mut flags = SymbolFlagsMap::new();
        for name in &pending.names {
            let entry = self.libraries[lib_id]
                .symbols
                .get_mut(name)
                .expect("unit name has no symbol entry");
            debug_assert_eq!(entry.stage, SymbolStage::NeverSearched);
            entry.stage = SymbolStage::Materializing;
            entry.unit = None;
            entry.info_mut();
            flags.insert(name.clone(), entry.flags);
        }
        MaterializationTask::new(
            library.clone(),
            pending.unit,
            MaterializationResponsibility::new(library.clone(), flags),
        )
    }

    /// Try to claim `name` for `query` in `library`
    pub(crate) fn try_claim(
        &mut self,
        library: &DynamicLibrary,
        match_non_exported: bool,
        name: &SymbolName,
        query: &Arc<AsyncSymbolQuery>,
        out: &mut LookupOutput,
    ) -> ClaimStatus {
        let lib_id = library.id;
        let (stage, flags, address, failed, unit) = {
            let Some(entry) = self.libraries[lib_id].symbols.get(name) else {
                return ClaimStatus::NotVisible;
            };
            if !entry.flags.is_exported() && !match_non_exported {
                return ClaimStatus::NotVisible;
            }
            (entry.stage, entry.flags, entry.address, entry.failed, entry.unit)
        };

        if failed {
            return ClaimStatus::Failed(SessionError::failed_to_materialize(vec![name.clone()]));
        }

        if stage < SymbolStage::Ready {
            out.registrations
                .entry(library.clone())
                .or_default()
                .insert(name.clone());
        }

        if stage >= query.required() {
            query.record(name, EvaluatedSymbol::new(address, flags));
            if let Some(done) = query.satisfy_one() {
                out.completions.push(done);
            }
            return ClaimStatus::Claimed;
        }

        // Below the required stage: attach, and kick off the unit if the
        // symbol has never been searched for.
        if stage >= SymbolStage::Resolved {
            query.record(name, EvaluatedSymbol::new(address, flags));
        }
        self.libraries[lib_id]
            .symbols
            .get_mut(name)
            .expect("entry vanished during claim")
            .info_mut()
            .waiters
            .push(query.clone());
        if stage == SymbolStage::NeverSearched {
            let uid = unit.expect("unsearched symbol has no pending unit");
            let task = self.claim_unit(library, uid);
            out.tasks.push(task);
        }
        ClaimStatus::Claimed
    }

    /// Add names to an in-flight responsibility's declared set
    pub(crate) fn define_materializing(
        &mut self,
        library: &DynamicLibrary,
        flags: &SymbolFlagsMap,
    ) -> SessionResult<()> {
        let lib_id = library.id;
        for name in flags.keys() {
            if self.libraries[lib_id].symbols.contains_key(name) {
                return Err(SessionError::DuplicateDefinition(name.clone()));
            }
        }
        for (name, f) in flags {
            self.libraries[lib_id]
                .symbols
                .insert(name.clone(), SymbolEntry::materializing(*f));
        }
        Ok(())
    }

    /// Return a unit's names to the library as lazy definitions
    ///
    /// Names with a pending query are claimed straight back: the returned
    /// task must be dispatched by the caller.
    pub(crate) fn replace_in_flight(
        &mut self,
        library: &DynamicLibrary,
        owned: &mut SymbolFlagsMap,
        unit: Box<dyn MaterializationUnit>,
    ) -> Option<MaterializationTask> {
        let lib_id = library.id;
        let declared = unit.symbol_flags().clone();
        let mut has_waiters = false;
        for (name, flags) in &declared {
            assert!(
                owned.remove(name).is_some(),
                "replacement unit declares symbol \"{name}\" the responsibility does not own"
            );
            let entry = self.libraries[lib_id]
                .symbols
                .get_mut(name)
                .expect("replaced symbol has no entry");
            assert_eq!(
                entry.stage,
                SymbolStage::Materializing,
                "replaced symbol \"{name}\" is not materializing"
            );
            entry.stage = SymbolStage::NeverSearched;
            entry.flags = *flags;
            if let Some(info) = entry.info.as_deref() {
                if info.waiters.iter().any(|q| q.is_live()) {
                    has_waiters = true;
                }
            }
        }
        let uid = self.next_unit_id();
        let names: SymbolNameSet = declared.keys().cloned().collect();
        for name in &names {
            self.libraries[lib_id]
                .symbols
                .get_mut(name)
                .expect("replaced symbol has no entry")
                .unit = Some(uid);
        }
        self.libraries[lib_id]
            .units
            .insert(uid, PendingUnit { unit, names });
        if has_waiters {
            Some(self.claim_unit(library, uid))
        } else {
            None
        }
    }

    /// Names of `owned` that have at least one live pending query
    pub(crate) fn requested_of(
        &self,
        lib_id: LibraryId,
        owned: &SymbolFlagsMap,
    ) -> SymbolNameSet {
        owned
            .keys()
            .filter(|name| {
                self.libraries[lib_id]
                    .symbols
                    .get(name)
                    .and_then(|entry| entry.info.as_deref())
                    .is_some_and(|info| info.waiters.iter().any(|q| q.is_live()))
            })
            .cloned()
            .collect()
    }

    /// Flags of currently defined symbols, without claiming anything
    pub(crate) fn peek_flags(
        &self,
        lib_id: LibraryId,
        names: &SymbolNameSet,
        found: &mut SymbolFlagsMap,
        remaining: &mut SymbolNameSet,
    ) {
        for name in names {
            if !remaining.contains(name) {
                continue;
            }
            if let Some(entry) = self.libraries[lib_id].symbols.get(name) {
                found.insert(name.clone(), entry.flags);
                remaining.remove(name);
            }
        }
    }

    /// Register dependencies for `name`, filtering self-edges and deps that
    /// are already ready. A dependency on a failed symbol fails `name`.
    pub(crate) fn add_dependencies(
        &mut self,
        library: &DynamicLibrary,
        name: &SymbolName,
        deps: &DependenceMap,
    ) -> Vec<Completion> {
        let node: DepNode = (library.id, name.clone());
        let mut dep_failed = false;
        for (dep_library, dep_names) in deps {
            for dep_name in dep_names {
                let dep_node: DepNode = (dep_library.id, dep_name.clone());
                if dep_node == node {
                    continue;
                }
                let Some(dep_entry) = self.entry_of(&dep_node) else {
                    debug_assert!(false, "dependency on undefined symbol \"{dep_name}\"");
                    continue;
                };
                if dep_entry.failed {
                    dep_failed = true;
                    continue;
                }
                if dep_entry.stage == SymbolStage::Ready {
                    continue;
                }
                self.entry_of_mut(&dep_node)
                    .expect("dependency entry vanished")
                    .info_mut()
                    .dependents
                    .insert(node.clone());
                self.entry_of_mut(&node)
                    .expect("depending symbol has no entry")
                    .info_mut()
                    .pending_deps
                    .insert(dep_node);
            }
        }
        if dep_failed {
            self.fail_nodes(vec![node])
        } else {
            Vec::new()
        }
    }
}
