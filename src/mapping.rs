//! Filepath: src/mapping.rs
//!
//! The mapping table: the lock-free logical-id to physical-head registry.
//!
//! Every logical node is addressed by a [`NodeId`] drawn from a
//! monotonically increasing counter. The slot for an id holds the current
//! chain head; swapping the head with a single compare-and-swap is what
//! makes every node update atomic.
//!
//! # Concurrency Model
//!
//! - `allocate` publishes the initial head with Release ordering.
//! - `load` acquires, pairing with the Release of whichever CAS (or
//!   `allocate`) installed the observed head. A reader that sees a head
//!   therefore sees all initializing writes made to it before
//!   installation.
//! - `cas` is strong: a failure means the slot really held a different
//!   head, and the caller's candidate stays private to the caller.
//!
//! Ids are never reused. `release` clears the slot for logically removed
//! siblings; the id itself stays retired.


use std::sync::atomic::{AtomicPtr, AtomicU64};

use crate::node::NodeHeader;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, ID_ALLOC, READ_ORD, RELAXED, WRITE_ORD};
use crate::tracing_helpers::trace_log;

/// Logical node identifier.
pub type NodeId = u64;

/// Reserved id denoting absence of a node.
pub const INVALID_NODE_ID: NodeId = u64::MAX;

/// Fixed-capacity registry of chain heads, indexed by [`NodeId`].
///
/// # Invariants
///
/// - Slots below the allocation counter have been written at least once;
///   slots at and above it are unused.
/// - Allocating past the capacity is a programmer error (debug-asserted).
pub struct MappingTable<K> {
    slots: Box<[AtomicPtr<NodeHeader<K>>]>,
    next_id: AtomicU64,
}

// SAFETY: the table stores raw head pointers and never dereferences them;
// all slot accesses go through atomics. Chain records themselves are only
// touched by callers holding appropriate epoch protection.
unsafe impl<K: Send> Send for MappingTable<K> {}
unsafe impl<K: Send + Sync> Sync for MappingTable<K> {}

impl<K> MappingTable<K> {
    /// Create a table with `capacity` slots, all empty.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "mapping table capacity must be non-zero");

        let slots: Box<[AtomicPtr<NodeHeader<K>>]> = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect();

        Self {
            slots,
            next_id: AtomicU64::new(0),
        }
    }

    /// Slot count chosen at construction.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of ids handed out so far.
    #[inline]
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.next_id.load(RELAXED)
    }

    /// Claim the next unused id and publish `head` into its slot.
    ///
    /// # Panics
    ///
    /// Debug builds abort when the table overflows. Release builds hit
    /// the slice bounds check instead.
    pub fn allocate(&self, head: *mut NodeHeader<K>) -> NodeId {
        let id: NodeId = self.next_id.fetch_add(1, ID_ALLOC);

        debug_assert!(
            (id as usize) < self.slots.len(),
            "mapping table overflow: id {id} capacity {}",
            self.slots.len()
        );

        self.slots[id as usize].store(head, WRITE_ORD);

        trace_log!(id, "allocated node id");

        id
    }

    /// Acquire-load the current head of `id`.
    #[inline]
    #[must_use]
    pub fn load(&self, id: NodeId) -> *mut NodeHeader<K> {
        debug_assert!((id as usize) < self.slots.len(), "node id out of range");

        self.slots[id as usize].load(READ_ORD)
    }

    /// Strong CAS on the slot of `id`.
    ///
    /// # Errors
    ///
    /// On failure, returns the head actually observed; `new` stays
    /// private to the caller.
    #[inline]
    pub fn cas(
        &self,
        id: NodeId,
        expect: *mut NodeHeader<K>,
        new: *mut NodeHeader<K>,
    ) -> Result<(), *mut NodeHeader<K>> {
        debug_assert!((id as usize) < self.slots.len(), "node id out of range");

        match self.slots[id as usize].compare_exchange(expect, new, CAS_SUCCESS, CAS_FAILURE) {
            Ok(_) => Ok(()),
            Err(current) => Err(current),
        }
    }

    /// Clear the slot of a logically removed node. The id is not recycled.
    pub fn release(&self, id: NodeId) {
        debug_assert!((id as usize) < self.slots.len(), "node id out of range");

        self.slots[id as usize].store(std::ptr::null_mut(), WRITE_ORD);

        trace_log!(id, "released node id");
    }

    /// Zero every slot and the counter. Test helper; must not race with
    /// any other operation.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.store(std::ptr::null_mut(), WRITE_ORD);
        }

        self.next_id.store(0, WRITE_ORD);
    }
}

impl<K> std::fmt::Debug for MappingTable<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingTable")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated())
            .finish_non_exhaustive()
    }
}
