//! String pool
//!
//! Interns strings into 32-bit ids so string columns store fixed-width
//! values and equality checks compare raw ids. Shared read-only across
//! queries during execution.

use rustc_hash::FxHashMap;

/// A 32-bit handle to an interned string.
///
/// `StringId::NULL` is a distinguished sentinel used by legacy callers to
/// mean "null string"; the dataframe normalizes it on write so reads never
/// observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    pub const NULL: StringId = StringId(u32::MAX);

    pub fn from_raw(raw: u32) -> Self {
        StringId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

/// An interning pool of strings.
#[derive(Debug, Default)]
pub struct StringPool {
    strings: Vec<String>,
    ids: FxHashMap<String, StringId>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning the existing id if already present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        debug_assert!(!id.is_null());
        self.strings.push(s.to_owned());
        self.ids.insert(s.to_owned(), id);
        id
    }

    /// The string for `id`. `id` must be a valid non-null id from this pool.
    pub fn get(&self, id: StringId) -> &str {
        debug_assert!(!id.is_null());
        &self.strings[id.0 as usize]
    }

    /// The id for `s` if it has been interned.
    pub fn get_id(&self, s: &str) -> Option<StringId> {
        self.ids.get(s).copied()
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// One past the largest id handed out. Useful for sizing id-indexed
    /// lookup tables.
    pub fn max_id(&self) -> u32 {
        self.strings.len() as u32
    }

    /// Iterates every (id, string) pair in the pool.
    pub fn iter(&self) -> impl Iterator<Item = (StringId, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (StringId(i as u32), s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedup() {
        let mut pool = StringPool::new();
        let a = pool.intern("foo");
        let b = pool.intern("bar");
        let c = pool.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.get(a), "foo");
        assert_eq!(pool.get(b), "bar");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_get_id() {
        let mut pool = StringPool::new();
        let a = pool.intern("foo");
        assert_eq!(pool.get_id("foo"), Some(a));
        assert_eq!(pool.get_id("missing"), None);
    }

    #[test]
    fn test_null_sentinel() {
        assert!(StringId::NULL.is_null());
        assert!(!StringId::from_raw(0).is_null());
    }

    #[test]
    fn test_iter() {
        let mut pool = StringPool::new();
        pool.intern("a");
        pool.intern("b");
        let collected: Vec<_> = pool.iter().map(|(_, s)| s.to_owned()).collect();
        assert_eq!(collected, vec!["a", "b"]);
    }
}
