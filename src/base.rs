//! Filepath: src/base.rs
//!
//! Consolidated base nodes.
//!
//! A base node is the flat tail of a delta chain: a dense, strictly
//! ascending key array with one payload per key. Leaf bases pair keys
//! with values; inner bases pair separator keys with child node ids,
//! where entry 0's key is ignored and stands for the subtree covering
//! `(low, first_key)`.
//!
//! The base owns the storage for its two bound keys (the header pointers
//! of the whole chain alias these fields) and the [`DeltaAllocator`]
//! through which every delta above it is created and destroyed.

use crate::alloc::DeltaAllocator;
use crate::bound::Bound;
use crate::mapping::NodeId;
use crate::node::{NodeHeader, NodeKind};

/// A consolidated node: sorted entries plus the chain's bound storage
/// and delta arena.
///
/// `E` is the entry payload: the value type for leaves, [`NodeId`] for
/// inner nodes.
///
/// # Invariants
///
/// - `header.kind` is `LeafBase` or `InnerBase`; `header.height == 0`.
/// - `header.size == entries.len()`.
/// - Keys are strictly ascending (entry 0 exempt for inner bases).
/// - `header.low_key` / `header.high_key` point at `self.low` /
///   `self.high`; the node is heap-pinned from construction onward, so
///   the self-references stay valid.
#[repr(C)]
#[derive(Debug)]
pub struct BaseNode<K, E> {
    header: NodeHeader<K>,
    low: Bound<K>,
    high: Bound<K>,
    alloc: DeltaAllocator,
    entries: Vec<(K, E)>,
}

/// Base node of an inner chain: separator keys to child ids.
pub type InnerBase<K> = BaseNode<K, NodeId>;

impl<K: Ord, E> BaseNode<K, E> {
    fn new_boxed(
        kind: NodeKind,
        low: Bound<K>,
        high: Bound<K>,
        entries: Vec<(K, E)>,
        accounting: bool,
    ) -> Box<Self> {
        debug_assert!(kind.is_base(), "base node constructed with delta kind");
        debug_assert!(low < high || entries.is_empty());
        debug_assert!(
            {
                let start: usize = if kind.is_leaf() { 0 } else { 1 };
                entries[start.min(entries.len())..]
                    .windows(2)
                    .all(|pair| pair[0].0 < pair[1].0)
            },
            "base keys must be strictly ascending"
        );

        let size: usize = entries.len();

        let mut node: Box<Self> = Box::new(Self {
            header: NodeHeader::new(kind, 0, size, std::ptr::null(), std::ptr::null()),
            low,
            high,
            alloc: DeltaAllocator::new(accounting),
            entries,
        });

        // The node is heap-pinned now; aim the header at the owned bounds.
        node.header.low_key = &raw const node.low;
        node.header.high_key = &raw const node.high;

        node
    }

    /// Create a leaf base over `entries` (sorted, unique keys).
    #[must_use]
    pub fn new_leaf(low: Bound<K>, high: Bound<K>, entries: Vec<(K, E)>) -> Box<Self> {
        Self::new_boxed(NodeKind::LeafBase, low, high, entries, cfg!(debug_assertions))
    }

    /// Create a leaf base with explicit allocator accounting.
    #[must_use]
    pub fn new_leaf_with_accounting(
        low: Bound<K>,
        high: Bound<K>,
        entries: Vec<(K, E)>,
        accounting: bool,
    ) -> Box<Self> {
        Self::new_boxed(NodeKind::LeafBase, low, high, entries, accounting)
    }

    /// Shared header of this node.
    #[inline]
    #[must_use]
    pub const fn header(&self) -> &NodeHeader<K> {
        &self.header
    }

    /// The owned low bound.
    #[inline]
    #[must_use]
    pub const fn low(&self) -> &Bound<K> {
        &self.low
    }

    /// The owned high bound.
    #[inline]
    #[must_use]
    pub const fn high(&self) -> &Bound<K> {
        &self.high
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the node holds no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The sorted entry slice.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[(K, E)] {
        &self.entries
    }

    /// The embedded delta arena.
    #[inline]
    #[must_use]
    pub const fn allocator(&self) -> &DeltaAllocator {
        &self.alloc
    }

    /// Greatest index `i` such that `keys[i] <= key`.
    ///
    /// Index 0 is conceptually always less-or-equal (for inner nodes its
    /// key is ignored outright) and is excluded from the binary search.
    ///
    /// # Panics
    ///
    /// Debug builds panic when `key` lies outside the node's range or
    /// the node is empty.
    #[must_use]
    pub fn search(&self, key: &K) -> usize {
        debug_assert!(!self.entries.is_empty(), "search on an empty base");
        debug_assert!(
            self.header.key_in_range(key),
            "search key outside node range"
        );

        self.entries[1..].partition_point(|(k, _)| k <= key)
    }

    /// Index of the entry whose key equals `key`, if present.
    ///
    /// Same precondition as [`Self::search`].
    #[must_use]
    pub fn point_search(&self, key: &K) -> Option<usize> {
        let index: usize = self.search(key);
        (self.entries[index].0 == *key).then_some(index)
    }

    /// Allocate a delta record against this base's arena.
    pub fn allocate_delta<T>(&self, record: T) -> *mut T {
        self.alloc.create(record)
    }

    /// Destroy a delta previously allocated against this base.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Self::allocate_delta`] on this same base
    /// and must not have been destroyed already.
    pub unsafe fn destroy_delta<T>(&self, ptr: *mut T) {
        // SAFETY: forwarded contract.
        unsafe { self.alloc.destroy(ptr) };
    }

    /// Erase to the chain-record currency.
    #[must_use]
    pub fn into_raw(node: Box<Self>) -> *mut NodeHeader<K> {
        Box::into_raw(node).cast()
    }

    /// Reclaim a base previously erased with [`Self::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `into_raw::<K, E>` with the same `E`, and all
    /// deltas allocated against this base must already be destroyed.
    pub unsafe fn destroy(ptr: *mut Self) {
        // SAFETY: forwarded contract; Box::from_raw pairs with into_raw.
        unsafe { drop(Box::from_raw(ptr)) };
    }
}

impl<K: Ord + Clone, E: Clone> BaseNode<K, E> {
    /// Produce the upper half for a split.
    ///
    /// Pivot is `len / 2`. The new node keeps this node's kind and high
    /// bound, takes `Finite(keys[pivot])` as its low bound, and copies
    /// entries `[pivot..]`. This node is left unchanged; the caller is
    /// responsible for installing a split delta that truncates the
    /// current node's effective high bound to the split key.
    ///
    /// # Panics
    ///
    /// Debug builds panic when `len <= 1`.
    #[must_use]
    pub fn split(&self) -> Box<Self> {
        debug_assert!(self.len() > 1, "split requires at least two entries");

        let pivot: usize = self.len() / 2;

        Self::new_boxed(
            self.header.kind(),
            Bound::finite(self.entries[pivot].0.clone()),
            self.high.clone(),
            self.entries[pivot..].to_vec(),
            self.alloc.accounting(),
        )
    }
}

impl<K: Ord> InnerBase<K> {
    /// Create an inner base over `entries` (separator, child id) with
    /// entry 0's key ignored.
    #[must_use]
    pub fn new_inner(low: Bound<K>, high: Bound<K>, entries: Vec<(K, NodeId)>) -> Box<Self> {
        Self::new_boxed(NodeKind::InnerBase, low, high, entries, cfg!(debug_assertions))
    }

    /// Create an inner base with explicit allocator accounting.
    #[must_use]
    pub fn new_inner_with_accounting(
        low: Bound<K>,
        high: Bound<K>,
        entries: Vec<(K, NodeId)>,
        accounting: bool,
    ) -> Box<Self> {
        Self::new_boxed(NodeKind::InnerBase, low, high, entries, accounting)
    }

    /// Child id covering `key`: the payload at [`Self::search`].
    #[must_use]
    pub fn route(&self, key: &K) -> NodeId {
        self.entries[self.search(key)].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn even_leaf(n: u64) -> Box<BaseNode<u64, u64>> {
        let entries: Vec<(u64, u64)> = (0..n).map(|i| (2 * i, 2 * i + 1)).collect();
        BaseNode::new_leaf(Bound::neg_inf(), Bound::pos_inf(), entries)
    }

    #[test]
    fn header_reflects_contents() {
        let leaf = even_leaf(4);

        assert_eq!(leaf.header().kind(), NodeKind::LeafBase);
        assert_eq!(leaf.header().height(), 0);
        assert_eq!(leaf.header().size(), 4);
        assert_eq!(leaf.len(), 4);
    }

    #[test]
    fn bound_pointers_alias_owned_storage() {
        let leaf = even_leaf(2);

        assert!(std::ptr::eq(leaf.header().low_key(), leaf.low()));
        assert!(std::ptr::eq(leaf.header().high_key(), leaf.high()));
    }

    #[test]
    fn search_finds_floor_entry() {
        // keys 0, 2, 4, ..., 14
        let leaf = even_leaf(8);

        for k in 0..16u64 {
            assert_eq!(leaf.search(&k), (k / 2) as usize, "search({k})");
        }
    }

    #[test]
    fn point_search_requires_exact_key() {
        let leaf = even_leaf(8);

        for k in 0..16u64 {
            let hit = leaf.point_search(&k);
            if k % 2 == 0 {
                assert_eq!(hit, Some((k / 2) as usize));
            } else {
                assert_eq!(hit, None);
            }
        }
    }

    #[test]
    fn split_produces_upper_half() {
        let leaf = even_leaf(8);
        let right = leaf.split();

        assert_eq!(right.len(), 4);
        assert_eq!(right.entries()[0], (8, 9));
        assert_eq!(right.low(), &Bound::finite(8));
        assert_eq!(right.high(), &Bound::pos_inf());

        // The original is untouched.
        assert_eq!(leaf.len(), 8);
        assert_eq!(leaf.high(), &Bound::pos_inf());
    }

    #[test]
    fn split_of_odd_size_keeps_floor_pivot() {
        let entries: Vec<(u64, u64)> = vec![(1, 0), (2, 0), (3, 0), (4, 0), (5, 0)];
        let leaf = BaseNode::new_leaf(Bound::neg_inf(), Bound::pos_inf(), entries);

        let right = leaf.split();
        assert_eq!(right.len(), 3);
        assert_eq!(right.entries()[0].0, 3);
    }

    #[test]
    fn inner_route_follows_separators() {
        // Entry 0's key is ignored: subtree for (low, 10).
        let entries: Vec<(u64, NodeId)> = vec![(0, 100), (10, 200), (20, 300)];
        let inner = InnerBase::new_inner(Bound::neg_inf(), Bound::pos_inf(), entries);

        assert_eq!(inner.route(&5), 100);
        assert_eq!(inner.route(&10), 200);
        assert_eq!(inner.route(&19), 200);
        assert_eq!(inner.route(&25), 300);
    }

    #[test]
    fn raw_roundtrip_preserves_node() {
        let leaf = even_leaf(2);
        let raw = BaseNode::into_raw(leaf);

        // SAFETY: raw comes from into_raw above; kind confirms the type.
        unsafe {
            assert_eq!((*raw).kind(), NodeKind::LeafBase);
            BaseNode::<u64, u64>::destroy(raw.cast());
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "strictly ascending")]
    fn unsorted_leaf_rejected() {
        let _ = BaseNode::new_leaf(
            Bound::<u64>::neg_inf(),
            Bound::pos_inf(),
            vec![(2u64, 0u64), (1, 0)],
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside node range")]
    fn search_outside_range_faults() {
        let entries: Vec<(u64, u64)> = vec![(10, 0), (20, 0)];
        let leaf = BaseNode::new_leaf(Bound::finite(10), Bound::finite(30), entries);
        let _ = leaf.search(&40);
    }
}
