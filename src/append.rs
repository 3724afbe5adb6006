//! Filepath: src/append.rs
//!
//! Delta construction and CAS installation.
//!
//! A [`ChainAppender`] tracks one logical node: its id and the head the
//! caller last observed. Every `append_*` method builds the requested
//! delta above that head, then attempts a single CAS on the mapping
//! table. Success advances the observed head to the new delta. Failure
//! hands the unpublished delta back as an [`AppendLoss`]; the appender
//! refreshes its observed head to whatever the CAS saw, so the caller
//! can [`AppendLoss::discard`] the loser and rebuild, or walk away.
//!
//! Nothing here retries. Contention policy belongs to the tree driver.
//!
//! # Protocol
//!
//! ```text
//! 1. Allocate the delta from the owning base's arena
//! 2. Fill header: kind, height = head.height + 1, folded size,
//!    low/high bound pointers copied from the observed head
//!    (split redirects high to its own embedded key)
//! 3. CAS the mapping-table slot from the observed head to the delta
//! 4. Success: delta is published, its writes released to all loaders
//!    Failure: delta stays private; caller discards or rebuilds
//! ```

use std::marker::PhantomData;

use crate::base::BaseNode;
use crate::bound::Bound;
use crate::delta::{
    InnerDeleteDelta, InnerInsertDelta, LeafDeleteDelta, LeafInsertDelta, MergeDelta, RemoveDelta,
    SplitDelta,
};
use crate::mapping::{MappingTable, NodeId};
use crate::node::{owning_base_of, DeltaHeader, NodeHeader, NodeKind};
use crate::tracing_helpers::trace_log;

/// A delta that lost its installation race.
///
/// Owns the unpublished record; it was never visible to any other
/// thread. `discard` returns it to the owning base's arena.
#[must_use = "a losing delta must be discarded or recycled"]
#[derive(Debug)]
pub struct AppendLoss<K, V> {
    delta: *mut NodeHeader<K>,
    observed: *mut NodeHeader<K>,
    _marker: PhantomData<fn() -> V>,
}

impl<K: Ord, V> AppendLoss<K, V> {
    /// The head the failed CAS actually observed.
    #[inline]
    #[must_use]
    pub const fn observed_head(&self) -> *mut NodeHeader<K> {
        self.observed
    }

    /// Take the unpublished delta without destroying it.
    #[inline]
    #[must_use]
    pub fn into_raw(self) -> *mut NodeHeader<K> {
        self.delta
    }

    /// Return the unpublished delta to its owning base's arena.
    pub fn discard(self) {
        let delta: *mut NodeHeader<K> = self.delta;

        // SAFETY: the loss was constructed by a failed install, so
        // `delta` is a live, private record whose kind tag matches its
        // concrete type and whose owning base is reachable and alive.
        unsafe {
            let base: *mut NodeHeader<K> = (*delta.cast::<DeltaHeader<K>>()).base;

            match (*delta).kind() {
                NodeKind::LeafInsert => {
                    destroy_record::<K, V, _>(base, delta.cast::<LeafInsertDelta<K, V>>());
                }
                NodeKind::LeafDelete => {
                    destroy_record::<K, V, _>(base, delta.cast::<LeafDeleteDelta<K, V>>());
                }
                NodeKind::InnerInsert => {
                    destroy_record::<K, V, _>(base, delta.cast::<InnerInsertDelta<K>>());
                }
                NodeKind::InnerDelete => {
                    destroy_record::<K, V, _>(base, delta.cast::<InnerDeleteDelta<K>>());
                }
                NodeKind::LeafSplit | NodeKind::InnerSplit => {
                    destroy_record::<K, V, _>(base, delta.cast::<SplitDelta<K>>());
                }
                NodeKind::LeafMerge | NodeKind::InnerMerge => {
                    destroy_record::<K, V, _>(base, delta.cast::<MergeDelta<K>>());
                }
                NodeKind::LeafRemove | NodeKind::InnerRemove => {
                    destroy_record::<K, V, _>(base, delta.cast::<RemoveDelta<K>>());
                }
                NodeKind::LeafBase | NodeKind::InnerBase => {
                    unreachable!("appender never constructs base records")
                }
            }
        }
    }
}

/// Destroy a record through the arena of the base that allocated it.
///
/// # Safety
///
/// `base` must be a live base header; `ptr` must be a live record
/// allocated from that base's arena.
pub(crate) unsafe fn destroy_record<K: Ord, V, T>(base: *mut NodeHeader<K>, ptr: *mut T) {
    // SAFETY: the kind tag determines the base's concrete type; only the
    // arena (whose offset is fixed under repr(C)) is touched.
    unsafe {
        if (*base).kind().is_leaf() {
            (*base.cast::<BaseNode<K, V>>()).destroy_delta(ptr);
        } else {
            (*base.cast::<BaseNode<K, NodeId>>()).destroy_delta(ptr);
        }
    }
}

/// Builds deltas above an observed head and CAS-installs them.
///
/// One appender per logical node per writer. The appender never blocks
/// and never retries; a lost race surfaces as [`AppendLoss`].
#[derive(Debug)]
pub struct ChainAppender<'t, K, V> {
    table: &'t MappingTable<K>,
    id: NodeId,
    head: *mut NodeHeader<K>,
    _marker: PhantomData<fn() -> V>,
}

impl<'t, K: Ord, V> ChainAppender<'t, K, V> {
    /// Start from the current head of `id`.
    #[must_use]
    pub fn new(table: &'t MappingTable<K>, id: NodeId) -> Self {
        let head: *mut NodeHeader<K> = table.load(id);
        Self::from_head(table, id, head)
    }

    /// Start from a head the caller already observed.
    #[must_use]
    pub const fn from_head(
        table: &'t MappingTable<K>,
        id: NodeId,
        head: *mut NodeHeader<K>,
    ) -> Self {
        Self {
            table,
            id,
            head,
            _marker: PhantomData,
        }
    }

    /// The logical node this appender writes to.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// The head the appender currently builds above.
    #[inline]
    #[must_use]
    pub const fn head(&self) -> *mut NodeHeader<K> {
        self.head
    }

    /// Re-read the head from the mapping table.
    pub fn refresh(&mut self) {
        self.head = self.table.load(self.id);
    }

    // ========================================================================
    //  Leaf appends
    // ========================================================================

    /// Install an insert of `(key, value)`.
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_leaf_insert(&mut self, key: K, value: V) -> Result<(), AppendLoss<K, V>> {
        let head: &NodeHeader<K> = self.head_ref();
        debug_assert!(head.kind().is_leaf(), "leaf insert on an inner chain");
        debug_assert!(head.key_in_range(&key), "insert key outside node range");

        let record = LeafInsertDelta {
            delta: self.delta_header(NodeKind::LeafInsert, head.size() + 1),
            key,
            value,
        };

        let ptr: *mut LeafInsertDelta<K, V> = self.alloc_record(record);
        self.install(ptr.cast())
    }

    /// Install a delete of `(key, value)`.
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_leaf_delete(&mut self, key: K, value: V) -> Result<(), AppendLoss<K, V>> {
        let head: &NodeHeader<K> = self.head_ref();
        debug_assert!(head.kind().is_leaf(), "leaf delete on an inner chain");
        debug_assert!(head.key_in_range(&key), "delete key outside node range");
        debug_assert!(head.size() > 0, "delete on an empty virtual node");

        let record = LeafDeleteDelta {
            delta: self.delta_header(NodeKind::LeafDelete, head.size().saturating_sub(1)),
            key,
            value,
        };

        let ptr: *mut LeafDeleteDelta<K, V> = self.alloc_record(record);
        self.install(ptr.cast())
    }

    /// Install a leaf split: the node's effective range shrinks to
    /// `[low, split_key)` and `sibling` owns the rest. `retained` is the
    /// element count of the kept lower half.
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_leaf_split(
        &mut self,
        split_key: K,
        sibling: NodeId,
        retained: usize,
    ) -> Result<(), AppendLoss<K, V>> {
        self.append_split(NodeKind::LeafSplit, split_key, sibling, retained)
    }

    /// Install a leaf merge absorbing the right sibling's chain.
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_leaf_merge(
        &mut self,
        middle_key: K,
        sibling: NodeId,
        sibling_head: *mut NodeHeader<K>,
    ) -> Result<(), AppendLoss<K, V>> {
        self.append_merge(NodeKind::LeafMerge, middle_key, sibling, sibling_head)
    }

    /// Install a leaf remove marking this node logically detached.
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_leaf_remove(&mut self, removed: NodeId) -> Result<(), AppendLoss<K, V>> {
        self.append_remove(NodeKind::LeafRemove, removed)
    }

    // ========================================================================
    //  Inner appends
    // ========================================================================

    /// Install a separator insert routing `[key, next_sep)` to `child`.
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_inner_insert(
        &mut self,
        key: K,
        child: NodeId,
        next_sep: Bound<K>,
    ) -> Result<(), AppendLoss<K, V>> {
        let head: &NodeHeader<K> = self.head_ref();
        debug_assert!(head.kind().is_inner(), "inner insert on a leaf chain");
        debug_assert!(head.key_in_range(&key), "separator outside node range");

        let record = InnerInsertDelta {
            delta: self.delta_header(NodeKind::InnerInsert, head.size() + 1),
            key,
            child,
            next_sep,
        };

        let ptr: *mut InnerInsertDelta<K> = self.alloc_record(record);
        self.install(ptr.cast())
    }

    /// Install a separator delete; the left neighbor absorbs the range.
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_inner_delete(
        &mut self,
        key: K,
        child: NodeId,
        next_sep: Bound<K>,
        prev_sep: Bound<K>,
        prev_child: NodeId,
    ) -> Result<(), AppendLoss<K, V>> {
        let head: &NodeHeader<K> = self.head_ref();
        debug_assert!(head.kind().is_inner(), "inner delete on a leaf chain");
        debug_assert!(head.key_in_range(&key), "separator outside node range");
        debug_assert!(head.size() > 0, "delete on an empty virtual node");

        let record = InnerDeleteDelta {
            delta: self.delta_header(NodeKind::InnerDelete, head.size().saturating_sub(1)),
            key,
            child,
            next_sep,
            prev_sep,
            prev_child,
        };

        let ptr: *mut InnerDeleteDelta<K> = self.alloc_record(record);
        self.install(ptr.cast())
    }

    /// Install an inner split; see [`Self::append_leaf_split`].
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_inner_split(
        &mut self,
        split_key: K,
        sibling: NodeId,
        retained: usize,
    ) -> Result<(), AppendLoss<K, V>> {
        self.append_split(NodeKind::InnerSplit, split_key, sibling, retained)
    }

    /// Install an inner merge; see [`Self::append_leaf_merge`].
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_inner_merge(
        &mut self,
        middle_key: K,
        sibling: NodeId,
        sibling_head: *mut NodeHeader<K>,
    ) -> Result<(), AppendLoss<K, V>> {
        self.append_merge(NodeKind::InnerMerge, middle_key, sibling, sibling_head)
    }

    /// Install an inner remove; see [`Self::append_leaf_remove`].
    ///
    /// # Errors
    ///
    /// The unpublished delta, when another writer moved the head first.
    pub fn append_inner_remove(&mut self, removed: NodeId) -> Result<(), AppendLoss<K, V>> {
        self.append_remove(NodeKind::InnerRemove, removed)
    }

    // ========================================================================
    //  Shared construction
    // ========================================================================

    fn append_split(
        &mut self,
        kind: NodeKind,
        split_key: K,
        sibling: NodeId,
        retained: usize,
    ) -> Result<(), AppendLoss<K, V>> {
        let head: &NodeHeader<K> = self.head_ref();
        debug_assert_eq!(head.kind().is_leaf(), kind.is_leaf(), "split family mismatch");
        debug_assert!(head.key_in_range(&split_key), "split key outside node range");
        debug_assert!(
            retained >= 1 && retained <= head.size(),
            "split must retain a non-empty strict prefix"
        );

        let record = SplitDelta {
            delta: self.delta_header(kind, retained),
            split_key: Bound::finite(split_key),
            sibling,
        };

        let ptr: *mut SplitDelta<K> = self.alloc_record(record);

        // Readers of this delta must see the truncated range: the high
        // pointer leaves the base's storage and aims at the embedded key.
        // SAFETY: `ptr` is live and still private to this thread.
        unsafe { (*ptr).delta.node.high_key = &raw const (*ptr).split_key };

        trace_log!(id = self.id, sibling, "installing split delta");

        self.install(ptr.cast())
    }

    fn append_merge(
        &mut self,
        kind: NodeKind,
        middle_key: K,
        sibling: NodeId,
        sibling_head: *mut NodeHeader<K>,
    ) -> Result<(), AppendLoss<K, V>> {
        let head: &NodeHeader<K> = self.head_ref();
        // SAFETY: the caller hands us the sibling head it holds custody
        // of (observed under the same protection as our own head).
        let sib: &NodeHeader<K> = unsafe { &*sibling_head };

        debug_assert_eq!(head.kind().is_leaf(), kind.is_leaf(), "merge family mismatch");
        debug_assert_eq!(
            head.kind().is_leaf(),
            sib.kind().is_leaf(),
            "merge sibling family mismatch"
        );
        debug_assert!(
            head.high_key() <= sib.low_key(),
            "merge sibling must lie to the right"
        );

        let size: usize = head.size() + sib.size();
        let mut delta: DeltaHeader<K> = self.delta_header(kind, size);
        // The composite extends to the absorbed sibling's high bound.
        delta.node.high_key = sib.high_key_ptr();

        let record = MergeDelta {
            delta,
            middle_key,
            sibling,
            sibling_head,
        };

        let ptr: *mut MergeDelta<K> = self.alloc_record(record);

        trace_log!(id = self.id, sibling, "installing merge delta");

        self.install(ptr.cast())
    }

    fn append_remove(&mut self, kind: NodeKind, removed: NodeId) -> Result<(), AppendLoss<K, V>> {
        let head: &NodeHeader<K> = self.head_ref();
        debug_assert_eq!(head.kind().is_leaf(), kind.is_leaf(), "remove family mismatch");

        let record = RemoveDelta {
            delta: self.delta_header(kind, head.size()),
            removed,
        };

        let ptr: *mut RemoveDelta<K> = self.alloc_record(record);
        self.install(ptr.cast())
    }

    fn head_ref(&self) -> &NodeHeader<K> {
        debug_assert!(!self.head.is_null(), "appender over a released node");

        // SAFETY: the observed head is live for the appender's lifetime
        // (caller holds epoch protection or exclusive custody).
        unsafe { &*self.head }
    }

    /// Header for a delta stacked directly above the observed head.
    fn delta_header(&self, kind: NodeKind, size: usize) -> DeltaHeader<K> {
        let head: &NodeHeader<K> = self.head_ref();

        DeltaHeader {
            node: NodeHeader::new(
                kind,
                head.height() + 1,
                size,
                head.low_key_ptr(),
                head.high_key_ptr(),
            ),
            next: self.head,
            // SAFETY: head is live, so its owning base is too.
            base: unsafe { owning_base_of(self.head) },
        }
    }

    /// Allocate from the arena of the base below the observed head.
    fn alloc_record<T>(&self, record: T) -> *mut T {
        // SAFETY: the observed head is live; `owning_base_of` yields its
        // base, whose kind selects the correct concrete cast. Only the
        // arena is touched, so the `E` parameter of the cast is inert.
        unsafe {
            let base: *mut NodeHeader<K> = owning_base_of(self.head);

            if (*base).kind().is_leaf() {
                (*base.cast::<BaseNode<K, V>>()).allocate_delta(record)
            } else {
                (*base.cast::<BaseNode<K, NodeId>>()).allocate_delta(record)
            }
        }
    }

    /// Single CAS attempt; advances the observed head on success,
    /// refreshes it on failure.
    fn install(&mut self, delta: *mut NodeHeader<K>) -> Result<(), AppendLoss<K, V>> {
        match self.table.cas(self.id, self.head, delta) {
            Ok(()) => {
                self.head = delta;
                Ok(())
            }
            Err(current) => {
                self.head = current;
                Err(AppendLoss {
                    delta,
                    observed: current,
                    _marker: PhantomData,
                })
            }
        }
    }
}
