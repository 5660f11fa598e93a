//! Interned symbol names with pointer-identity comparison

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Mutex};

/// An interned symbol name
///
/// Two `SymbolName`s obtained from the same [`SymbolStringPool`] compare
/// equal iff they denote the same string, and the comparison is a pointer
/// check rather than a string scan. Hashing likewise uses the pointer, so
/// name-keyed maps stay cheap no matter how long the underlying names are.
#[derive(Clone)]
pub struct SymbolName(Arc<str>);

impl SymbolName {
    /// View the underlying string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for SymbolName {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SymbolName {}

impl Hash for SymbolName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

impl Deref for SymbolName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// A shared, thread-safe pool of interned symbol names
///
/// The pool deduplicates by content: interning the same string twice yields
/// handles that share one allocation.
pub struct SymbolStringPool {
    strings: Mutex<HashSet<Arc<str>>>,
}

impl SymbolStringPool {
    /// Create an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self {
            strings: Mutex::new(HashSet::new()),
        }
    }

    /// Intern a name, returning a pointer-identity handle for it
    pub fn intern(&self, name: &str) -> SymbolName {
        let mut strings = self.strings.lock().expect("symbol pool lock poisoned");
        if let Some(existing) = strings.get(name) {
            return SymbolName(existing.clone());
        }
        let interned: Arc<str> = Arc::from(name);
        strings.insert(interned.clone());
        SymbolName(interned)
    }

    /// Number of distinct names interned so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.lock().expect("symbol pool lock poisoned").len()
    }

    /// Returns true if nothing has been interned yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolStringPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn intern_deduplicates() {
        let pool = SymbolStringPool::new();
        let a = pool.intern("foo");
        let b = pool.intern("foo");
        let c = pool.intern("bar");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn handles_work_as_map_keys() {
        let pool = SymbolStringPool::new();
        let foo = pool.intern("foo");

        let mut map = HashMap::new();
        map.insert(foo.clone(), 1);
        map.insert(pool.intern("bar"), 2);

        assert_eq!(map[&pool.intern("foo")], 1);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn distinct_pools_do_not_alias() {
        let p1 = SymbolStringPool::new();
        let p2 = SymbolStringPool::new();

        let a = p1.intern("foo");
        let b = p2.intern("foo");

        assert_eq!(a.as_str(), b.as_str());
        assert_ne!(a, b);
    }
}
