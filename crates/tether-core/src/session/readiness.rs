//! Readiness engine: resolution, emission, and failure propagation
//!
//! Symbols form a dependency graph whose nodes are (library, name) pairs.
//! `pending_deps` are out-edges (what a symbol waits on), `dependents` the
//! reverse. A symbol becomes ready once its whole strongly connected
//! component is resolved and emitted and every cross-component out-edge
//! lands on a ready symbol. Rather than materializing SCCs explicitly, the
//! emit path runs a greatest-fixpoint over the frontier reachable from the
//! newly emitted symbols: start from every resolved-and-emitted candidate,
//! then repeatedly evict candidates with a pending dep that is neither
//! ready nor a surviving candidate. What survives is exactly the union of
//! completable SCCs, and it transitions atomically. All traversal is
//! iterative; nothing recurses on user threads.

use std::collections::HashSet;

use tracing::trace;

use crate::error::SessionError;
use crate::query::Completion;
use crate::symbol::{SymbolFlagsMap, SymbolMap, SymbolStage};

use super::state::{DepNode, LibraryId, MaterializingInfo, SessionState};

impl SessionState {
    /// Publish addresses for symbols owned by a responsibility
    ///
    /// Moves each symbol to `Resolved`, adopts the resolved flags (a weak
    /// definition selected for materialization comes back strong), and
    /// fires queries waiting at the resolved stage.
    pub(crate) fn resolve_symbols(
        &mut self,
        lib_id: LibraryId,
        symbols: &SymbolMap,
        owned: &SymbolFlagsMap,
    ) -> Vec<Completion> {
        let mut completions = Vec::new();
        for (name, symbol) in symbols {
            assert!(
                owned.contains_key(name),
                "resolved symbol \"{name}\" is not owned by this responsibility"
            );
            let entry = self
                .entry_of_mut(&(lib_id, name.clone()))
                .expect("resolved symbol has no entry");
            if entry.failed {
                continue;
            }
            assert_eq!(
                entry.stage,
                SymbolStage::Materializing,
                "symbol \"{name}\" resolved twice or out of order"
            );
            entry.address = symbol.address();
            entry.flags = symbol.flags();
            entry.stage = SymbolStage::Resolved;
            trace!(symbol = %name, address = symbol.address(), "resolved");

            let info = entry.info_mut();
            let waiters = std::mem::take(&mut info.waiters);
            let mut keep = Vec::with_capacity(waiters.len());
            for query in waiters {
                if !query.is_live() {
                    continue;
                }
                query.record(name, *symbol);
                if query.required() == SymbolStage::Resolved {
                    if let Some(done) = query.satisfy_one() {
                        completions.push(done);
                    }
                } else {
                    keep.push(query);
                }
            }
            entry.info_mut().waiters = keep;
        }
        completions
    }

    /// Mark symbols emitted and ready-transition everything that unblocks
    pub(crate) fn emit_symbols(
        &mut self,
        lib_id: LibraryId,
        owned: &SymbolFlagsMap,
    ) -> Vec<Completion> {
        let mut seeds: Vec<DepNode> = Vec::with_capacity(owned.len());
        for name in owned.keys() {
            let node: DepNode = (lib_id, name.clone());
            let entry = self
                .entry_of_mut(&node)
                .expect("emitted symbol has no entry");
            if entry.failed {
                continue;
            }
            assert!(
                entry.stage >= SymbolStage::Resolved,
                "symbol \"{name}\" emitted before it was resolved"
            );
            entry.info_mut().emitted = true;
            seeds.push(node);
        }

        // Frontier: everything that might have been unblocked, reachable
        // from the seeds through dependent edges.
        let mut region: HashSet<DepNode> = HashSet::new();
        let mut stack = seeds;
        while let Some(node) = stack.pop() {
            if !region.insert(node.clone()) {
                continue;
            }
            if let Some(info) = self.info_of(&node) {
                for dependent in &info.dependents {
                    if !region.contains(dependent) {
                        stack.push(dependent.clone());
                    }
                }
            }
        }

        let mut ready: HashSet<DepNode> = region
            .iter()
            .filter(|node| {
                self.entry_of(node).is_some_and(|entry| {
                    !entry.failed
                        && entry.stage == SymbolStage::Resolved
                        && entry.info.as_deref().is_some_and(|info| info.emitted)
                })
            })
            .cloned()
            .collect();

        // Greatest fixpoint: evict candidates blocked by a dep that is
        // neither ready nor itself a surviving candidate.
        loop {
            let mut evicted: Vec<DepNode> = Vec::new();
            for node in &ready {
                let info = self.info_of(node).expect("candidate lost its info");
                for dep in &info.pending_deps {
                    let dep_is_ready = self
                        .entry_of(dep)
                        .is_some_and(|entry| entry.stage == SymbolStage::Ready);
                    if !dep_is_ready && !ready.contains(dep) {
                        evicted.push(node.clone());
                        break;
                    }
                }
            }
            if evicted.is_empty() {
                break;
            }
            for node in evicted {
                ready.remove(&node);
            }
        }

        // Survivors transition atomically.
        let mut completions = Vec::new();
        for node in &ready {
            let entry = self.entry_of_mut(node).expect("ready symbol lost its entry");
            entry.stage = SymbolStage::Ready;
            let MaterializingInfo {
                waiters,
                pending_deps,
                dependents,
                ..
            } = *entry.info.take().unwrap_or_default();
            trace!(symbol = %node.1, "ready");
            for query in waiters {
                if !query.is_live() {
                    continue;
                }
                debug_assert_eq!(query.required(), SymbolStage::Ready);
                if let Some(done) = query.satisfy_one() {
                    completions.push(done);
                }
            }
            for dep in &pending_deps {
                if let Some(dep_info) = self.info_of_mut(dep) {
                    dep_info.dependents.remove(node);
                }
            }
            for dependent in &dependents {
                if ready.contains(dependent) {
                    continue;
                }
                if let Some(dep_info) = self.info_of_mut(dependent) {
                    dep_info.pending_deps.remove(node);
                }
            }
        }
        completions
    }

    /// Fail symbols owned by a responsibility
    pub(crate) fn fail_symbols(
        &mut self,
        lib_id: LibraryId,
        owned: &SymbolFlagsMap,
    ) -> Vec<Completion> {
        let seeds: Vec<DepNode> = owned.keys().map(|name| (lib_id, name.clone())).collect();
        self.fail_nodes(seeds)
    }

    /// Fail a set of nodes and everything transitively depending on them
    ///
    /// Every query attached to any member of the closure fails exactly once
    /// with the full affected name set.
    pub(crate) fn fail_nodes(&mut self, seeds: Vec<DepNode>) -> Vec<Completion> {
        if seeds.is_empty() {
            return Vec::new();
        }

        let mut failed: HashSet<DepNode> = HashSet::new();
        let mut stack = seeds;
        while let Some(node) = stack.pop() {
            if self.entry_of(&node).is_none() || !failed.insert(node.clone()) {
                continue;
            }
            if let Some(info) = self.info_of(&node) {
                for dependent in &info.dependents {
                    if !failed.contains(dependent) {
                        stack.push(dependent.clone());
                    }
                }
            }
        }

        let mut queries = Vec::new();
        let mut seen: HashSet<*const crate::query::AsyncSymbolQuery> = HashSet::new();
        for node in &failed {
            let entry = self
                .entry_of_mut(node)
                .expect("failed symbol lost its entry");
            entry.failed = true;
            let Some(info) = entry.info.take() else {
                continue;
            };
            let MaterializingInfo {
                waiters,
                pending_deps,
                ..
            } = *info;
            for query in waiters {
                if query.is_live() && seen.insert(std::sync::Arc::as_ptr(&query)) {
                    queries.push(query);
                }
            }
            for dep in &pending_deps {
                if failed.contains(dep) {
                    continue;
                }
                if let Some(dep_info) = self.info_of_mut(dep) {
                    dep_info.dependents.remove(node);
                }
            }
        }

        let names: Vec<_> = failed.iter().map(|(_, name)| name.clone()).collect();
        trace!(count = names.len(), "materialization failed");
        let error = SessionError::failed_to_materialize(names);
        queries
            .iter()
            .filter_map(|query| query.fail(error.clone()))
            .collect()
    }
}
