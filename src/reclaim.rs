//! Filepath: src/reclaim.rs
//!
//! Deferred chain retirement via seize.
//!
//! The core never frees a chain it just replaced: another thread may
//! still be walking it. A [`ChainCollector`] wraps a [`seize::Collector`]
//! and defers the free-helper pass until every thread active at
//! retirement time has left its critical section.
//!
//! Readers and writers wrap chain accesses in [`ChainCollector::enter`];
//! the winner of a replacing CAS (consolidation install, merge cleanup)
//! hands the detached head to `retire_leaf_chain` / `retire_inner_chain`.
//!
//! # Drop order
//!
//! Dropping the collector reclaims everything still queued, which walks
//! chains and releases ids. The collector must therefore be dropped
//! before the mapping table the retired chains reference.

use std::marker::PhantomData;

use seize::{Collector, Guard, LocalGuard};

use crate::free::{release_inner_chain, release_leaf_chain};
use crate::mapping::MappingTable;
use crate::node::NodeHeader;

/// A detached chain queued for reclamation.
struct DetachedChain<K> {
    head: *mut NodeHeader<K>,
    table: *const MappingTable<K>,
}

/// Reclaim a detached leaf chain (seize callback).
///
/// # Safety
///
/// - `ptr` must come from `Box::into_raw` on a [`DetachedChain`] whose
///   head is a leaf chain with value type `V`.
/// - Must only be called after seize determines no accessor remains.
unsafe fn reclaim_leaf_chain<K: Ord, V>(ptr: *mut DetachedChain<K>, _collector: &Collector) {
    // SAFETY: caller guarantees the box provenance; quiescence makes the
    // chain exclusively ours, and the table outlives the collector.
    unsafe {
        let detached: Box<DetachedChain<K>> = Box::from_raw(ptr);
        release_leaf_chain::<K, V>(detached.head, &*detached.table);
    }
}

/// Reclaim a detached inner chain (seize callback).
///
/// # Safety
///
/// Same contract as [`reclaim_leaf_chain`], for an inner chain.
unsafe fn reclaim_inner_chain<K: Ord>(ptr: *mut DetachedChain<K>, _collector: &Collector) {
    // SAFETY: as in `reclaim_leaf_chain`.
    unsafe {
        let detached: Box<DetachedChain<K>> = Box::from_raw(ptr);
        release_inner_chain::<K>(detached.head, &*detached.table);
    }
}

/// Epoch-protected retirement of detached delta chains.
pub struct ChainCollector<K> {
    collector: Collector,
    _marker: PhantomData<fn() -> K>,
}

impl<K: Ord> ChainCollector<K> {
    /// Create a collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collector: Collector::new(),
            _marker: PhantomData,
        }
    }

    /// Enter a critical section. Chains observed while the guard lives
    /// stay alive until it drops.
    #[must_use]
    pub fn enter(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Queue a detached leaf chain for destruction once quiescent.
    ///
    /// # Safety
    ///
    /// - `head` must be a leaf chain (value type `V`) that was just
    ///   unlinked from the mapping table and will not be retired again.
    /// - `table` must outlive this collector.
    pub unsafe fn retire_leaf_chain<V>(&self, head: *mut NodeHeader<K>, table: &MappingTable<K>) {
        let detached: *mut DetachedChain<K> = Box::into_raw(Box::new(DetachedChain {
            head,
            table: std::ptr::from_ref(table),
        }));

        let guard: LocalGuard<'_> = self.collector.enter();
        // SAFETY: `detached` comes from Box::into_raw above; the
        // reclaimer's contract is forwarded from ours.
        unsafe { guard.defer_retire(detached, reclaim_leaf_chain::<K, V>) };
    }

    /// Queue a detached inner chain for destruction once quiescent.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::retire_leaf_chain`], for an inner chain.
    pub unsafe fn retire_inner_chain(&self, head: *mut NodeHeader<K>, table: &MappingTable<K>) {
        let detached: *mut DetachedChain<K> = Box::into_raw(Box::new(DetachedChain {
            head,
            table: std::ptr::from_ref(table),
        }));

        let guard: LocalGuard<'_> = self.collector.enter();
        // SAFETY: as in `retire_leaf_chain`.
        unsafe { guard.defer_retire(detached, reclaim_inner_chain::<K>) };
    }
}

impl<K: Ord> Default for ChainCollector<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for ChainCollector<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainCollector").finish_non_exhaustive()
    }
}
