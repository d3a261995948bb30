//! Immutable byte trie with regex matching.
//!
//! Nodes are laid out level by level. Each node owns a contiguous run of
//! edges (`labels[i]`, `targets[i]`, sorted by label) and a contiguous run
//! of physical ids for the keys that end at it.
//!
//! ```text
//! keys: "ab" -> 0, "ac" -> 1, "b" -> 2
//!
//! node 0 (root)  edges a->1 b->2
//! node 1         edges b->3 c->4
//! node 2         ids [2]
//! node 3         ids [0]
//! node 4         ids [1]
//! ```

use crate::regex::RegexDfa;
use regex_automata::util::primitives::StateID;
use std::collections::{BTreeMap, VecDeque};
use std::mem::size_of;
use std::ops::Range;

const ROOT: usize = 0;

#[derive(Debug, Clone, Default)]
struct Node {
    edges: Range<usize>,
    ids: Range<usize>,
}

/// A compressed trie mapping string keys to physical row ids.
#[derive(Debug, Clone)]
pub struct TrieIndex {
    nodes: Vec<Node>,
    labels: Vec<u8>,
    targets: Vec<usize>,
    ids: Vec<u64>,
}

#[derive(Default)]
struct BuildNode {
    children: BTreeMap<u8, usize>,
    ids: Vec<u64>,
}

impl TrieIndex {
    /// Builds a trie from `(key, physical id)` pairs.
    ///
    /// Ids under one key are kept in ascending order.
    pub fn build<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, u64)>,
    {
        let mut arena = vec![BuildNode::default()];
        for (key, id) in entries {
            let mut node = ROOT;
            for byte in key {
                node = match arena[node].children.get(&byte) {
                    Some(&child) => child,
                    None => {
                        arena.push(BuildNode::default());
                        let child = arena.len() - 1;
                        arena[node].children.insert(byte, child);
                        child
                    }
                };
            }
            arena[node].ids.push(id);
        }

        // renumber level by level
        let mut order = Vec::with_capacity(arena.len());
        let mut rank = vec![0usize; arena.len()];
        let mut queue = VecDeque::from([ROOT]);
        while let Some(old) = queue.pop_front() {
            rank[old] = order.len();
            order.push(old);
            queue.extend(arena[old].children.values().copied());
        }

        let mut trie = Self {
            nodes: Vec::with_capacity(order.len()),
            labels: Vec::with_capacity(order.len().saturating_sub(1)),
            targets: Vec::with_capacity(order.len().saturating_sub(1)),
            ids: Vec::new(),
        };
        for &old in &order {
            let build = &mut arena[old];
            let edge_start = trie.labels.len();
            for (&label, &child) in &build.children {
                trie.labels.push(label);
                trie.targets.push(rank[child]);
            }
            let id_start = trie.ids.len();
            build.ids.sort_unstable();
            trie.ids.extend_from_slice(&build.ids);
            trie.nodes.push(Node {
                edges: edge_start..trie.labels.len(),
                ids: id_start..trie.ids.len(),
            });
        }
        trie
    }

    /// Number of (key, id) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the trie holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Physical ids stored under exactly `key`.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> &[u64] {
        let mut node = ROOT;
        for &byte in key {
            match self.child(node, byte) {
                Some(child) => node = child,
                None => return &[],
            }
        }
        &self.ids[self.nodes[node].ids.clone()]
    }

    fn child(&self, node: usize, byte: u8) -> Option<usize> {
        let edges = self.nodes[node].edges.clone();
        let labels = &self.labels[edges.clone()];
        labels
            .binary_search(&byte)
            .ok()
            .map(|i| self.targets[edges.start + i])
    }

    /// Appends the physical ids of every key the automaton fully matches.
    ///
    /// Keys are visited depth first in byte order, so ids come out in key
    /// order, ascending within a key. Subtrees whose automaton state is
    /// dead are never entered.
    ///
    /// `mem_limit` bounds the bytes held by the traversal frontier plus
    /// the ids appended so far. Returns false once that bound is crossed;
    /// `out` then holds an arbitrary prefix of the matches past its
    /// original length, which the caller must discard.
    pub fn match_regex_append(&self, dfa: &RegexDfa, out: &mut Vec<u64>, mem_limit: usize) -> bool {
        const FRAME: usize = size_of::<(usize, StateID)>();
        const ID: usize = size_of::<u64>();

        let base = out.len();
        let mut stack: Vec<(usize, StateID)> = vec![(ROOT, dfa.start())];
        while let Some((node, state)) = stack.pop() {
            let Node { edges, ids } = self.nodes[node].clone();
            if !ids.is_empty() && dfa.accepts_at_end(state) {
                out.extend_from_slice(&self.ids[ids]);
            }
            // reversed so the smallest label is popped first
            for edge in edges.rev() {
                let next = dfa.next(state, self.labels[edge]);
                if !dfa.is_dead(next) {
                    stack.push((self.targets[edge], next));
                }
            }
            let used = stack.len() * FRAME + (out.len() - base) * ID;
            if used > mem_limit {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie(keys: &[(&str, u64)]) -> TrieIndex {
        TrieIndex::build(keys.iter().map(|(k, id)| (k.as_bytes().to_vec(), *id)))
    }

    fn matches(trie: &TrieIndex, pattern: &str) -> Vec<u64> {
        let dfa = RegexDfa::compile(pattern, "").unwrap();
        let mut out = Vec::new();
        assert!(trie.match_regex_append(&dfa, &mut out, usize::MAX));
        out
    }

    #[test]
    fn layout_is_level_order() {
        let t = trie(&[("ab", 0), ("ac", 1), ("b", 2)]);
        assert_eq!(t.nodes.len(), 5);
        assert_eq!(t.labels, b"abbc");
        assert_eq!(t.targets, vec![1, 2, 3, 4]);
        assert_eq!(t.lookup(b"b"), &[2]);
        assert_eq!(t.lookup(b"ac"), &[1]);
        assert!(t.lookup(b"a").is_empty());
        assert!(t.lookup(b"zz").is_empty());
    }

    #[test]
    fn duplicate_keys_keep_sorted_ids() {
        let t = trie(&[("k", 9), ("k", 3), ("k", 5)]);
        assert_eq!(t.lookup(b"k"), &[3, 5, 9]);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn regex_returns_key_order() {
        let t = trie(&[("pear", 0), ("apple", 1), ("apricot", 2), ("plum", 3), ("ap", 4)]);
        assert_eq!(matches(&t, "ap.*"), vec![4, 1, 2]);
        assert_eq!(matches(&t, "p.*"), vec![0, 3]);
        assert_eq!(matches(&t, ".*"), vec![4, 1, 2, 0, 3]);
    }

    #[test]
    fn no_match_is_success_with_nothing_appended() {
        let t = trie(&[("alpha", 0), ("beta", 1)]);
        assert!(matches(&t, "gamma").is_empty());
    }

    #[test]
    fn empty_key_is_matchable() {
        let t = trie(&[("", 7), ("x", 8)]);
        assert_eq!(matches(&t, ""), vec![7]);
        assert_eq!(matches(&t, "x?"), vec![7, 8]);
    }

    #[test]
    fn appends_after_existing_content() {
        let t = trie(&[("a", 1)]);
        let dfa = RegexDfa::compile("a", "").unwrap();
        let mut out = vec![100, 200];
        assert!(t.match_regex_append(&dfa, &mut out, usize::MAX));
        assert_eq!(out, vec![100, 200, 1]);
    }

    #[test]
    fn budget_exhaustion_reports_failure() {
        let keys: Vec<(String, u64)> = (0..1000).map(|i| (format!("key{i:04}"), i)).collect();
        let t = TrieIndex::build(keys.into_iter().map(|(k, id)| (k.into_bytes(), id)));
        let dfa = RegexDfa::compile("key.*", "").unwrap();

        let mut out = Vec::new();
        assert!(!t.match_regex_append(&dfa, &mut out, 256));

        let mut out = Vec::new();
        assert!(t.match_regex_append(&dfa, &mut out, 1 << 20));
        assert_eq!(out.len(), 1000);
    }

    #[test]
    fn empty_trie_matches_nothing_within_any_budget() {
        let t = TrieIndex::build(Vec::new());
        let dfa = RegexDfa::compile(".*", "").unwrap();
        let mut out = Vec::new();
        assert!(t.match_regex_append(&dfa, &mut out, 0));
        assert!(out.is_empty());
        assert!(t.is_empty());
    }
}
