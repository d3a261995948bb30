//! Ordered key index for writable segments.

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A mutable ordered map from key bytes to ids.
///
/// Writable segments update it in place while readers look it up, so the
/// map sits behind its own lock.
#[derive(Debug, Default)]
pub struct OrderedIndex {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    map: BTreeMap<Vec<u8>, Vec<u64>>,
    entries: usize,
}

impl OrderedIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` under `key`.
    pub fn insert(&self, key: Vec<u8>, id: u64) {
        let mut inner = self.inner.write();
        inner.map.entry(key).or_default().push(id);
        inner.entries += 1;
    }

    /// Ids under exactly `key`, in insertion order.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Vec<u64> {
        self.inner.read().map.get(key).cloned().unwrap_or_default()
    }

    /// Number of (key, id) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries
    }

    /// Returns true if the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
