//! String interning for segment names and async-context names.
//!
//! Segments and metrics reference names by small integer handle rather than
//! by owned `String`, so that a transaction with thousands of segments
//! sharing a handful of distinct names (e.g. `"Custom/Worker/process"`
//! repeated per loop iteration) pays the allocation cost once per distinct
//! string. Grounded in the same intern-by-index idea the teacher uses for
//! `opentelemetry_sdk::Resource` attribute interning, generalized here to a
//! plain `Vec<String>` plus a reverse `HashMap` lookup.
use std::collections::HashMap;

/// A handle into a [`StringPool`]. Valid only for the lifetime of the pool
/// that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A per-transaction table mapping interned strings to small integer handles.
#[derive(Debug, Default)]
pub struct StringPool {
    strings: Vec<String>,
    index: HashMap<String, StringId>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning its handle. Re-interning an existing string
    /// returns the same handle without allocating.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(id) = self.index.get(s) {
            return *id;
        }
        let id = StringId(self.strings.len() as u32);
        self.strings.push(s.to_owned());
        self.index.insert(s.to_owned(), id);
        id
    }

    /// Looks up a previously interned string by handle. Returns `None` if
    /// the handle did not come from this pool (an "unknown name ref" per
    /// spec.md §4.4's failure semantics, which callers render as `<unknown>`).
    pub fn get(&self, id: StringId) -> Option<&str> {
        self.strings.get(id.index()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Iterates interned strings in intern order; this is the order used to
    /// build the trace JSON's trailing name pool (spec.md §4.4).
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_string_returns_same_id() {
        let mut pool = StringPool::new();
        let a = pool.intern("Custom/work");
        let b = pool.intern("Custom/work");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_strings_get_distinct_ids_in_order() {
        let mut pool = StringPool::new();
        let a = pool.intern("one");
        let b = pool.intern("two");
        assert_ne!(a, b);
        assert_eq!(pool.get(a), Some("one"));
        assert_eq!(pool.get(b), Some("two"));
        assert_eq!(pool.iter().collect::<Vec<_>>(), vec!["one", "two"]);
    }

    #[test]
    fn unknown_handle_returns_none() {
        let pool = StringPool::new();
        assert_eq!(pool.get(StringId(0)), None);
    }
}
