//! Per-segment index objects.
//!
//! Every segment holds one index object per schema index. The set of
//! index variants is closed:
//!
//! - [`TrieIndex`]: immutable byte trie built by readonly segments for
//!   single string-column indexes; the only variant regex matching runs on
//! - [`OrderedIndex`]: mutable ordered map used by writable segments and
//!   by readonly segments for every other index
//!
//! Index objects store segment-internal ids. A trie stores **physical**
//! ids (storage positions), an ordered index stores **logical** ids.

mod ordered;
mod trie;

pub use ordered::OrderedIndex;
pub use trie::TrieIndex;

/// An index object of one segment.
#[derive(Debug)]
pub enum SegmentIndex {
    /// Trie over string keys, regex-matchable.
    Trie(TrieIndex),
    /// Ordered map over arbitrary keys.
    Ordered(OrderedIndex),
}

impl SegmentIndex {
    /// Returns the trie if this index is regex-matchable.
    #[must_use]
    pub fn as_trie(&self) -> Option<&TrieIndex> {
        match self {
            Self::Trie(trie) => Some(trie),
            Self::Ordered(_) => None,
        }
    }

    /// Returns the ordered index, if that is what this is.
    #[must_use]
    pub fn as_ordered(&self) -> Option<&OrderedIndex> {
        match self {
            Self::Ordered(ordered) => Some(ordered),
            Self::Trie(_) => None,
        }
    }

    /// Ids stored under exactly `key`.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Vec<u64> {
        match self {
            Self::Trie(trie) => trie.lookup(key).to_vec(),
            Self::Ordered(ordered) => ordered.lookup(key),
        }
    }

    /// Number of (key, id) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Trie(trie) => trie.len(),
            Self::Ordered(ordered) => ordered.len(),
        }
    }

    /// Returns true if the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
