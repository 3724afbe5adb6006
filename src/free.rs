//! Filepath: src/free.rs
//!
//! Chain destruction.
//!
//! [`release_leaf_chain`] / [`release_inner_chain`] walk a detached
//! chain once and tear it down: every delta goes back to its owning
//! base's arena, every merge recurses through both absorbed branches,
//! every remove record releases its id on the mapping table, and each
//! base is destroyed last (dropping its arena, which debug-asserts that
//! no delta is still outstanding).
//!
//! Freeing never fails. Freeing a chain twice, or while any other thread
//! can still reach it, is undefined behavior; callers interpose epoch
//! protection (see `reclaim`) so neither can happen.

use std::ptr::NonNull;

use crate::append::destroy_record;
use crate::base::BaseNode;
use crate::delta::{
    InnerDeleteDelta, InnerInsertDelta, LeafDeleteDelta, LeafInsertDelta, MergeDelta, RemoveDelta,
    SplitDelta,
};
use crate::mapping::{MappingTable, NodeId};
use crate::node::NodeHeader;
use crate::traverse::{walk_chain, ChainVisitor, Step};

/// Free a detached leaf chain rooted at `head`.
///
/// # Safety
///
/// `head` must be a live leaf chain (value type `V`) that no other
/// thread can reach, and it must not have been freed before.
pub unsafe fn release_leaf_chain<K: Ord, V>(head: *mut NodeHeader<K>, table: &MappingTable<K>) {
    debug_assert!(
        // SAFETY: caller guarantees a live head.
        unsafe { (*head).kind().is_leaf() },
        "leaf free on an inner chain"
    );

    let mut walker = FreeWalker { table };
    // SAFETY: forwarded contract; the walker owns every record it visits.
    unsafe { walk_chain::<K, V, _>(head, &mut walker) };
}

/// Free a detached inner chain rooted at `head`.
///
/// # Safety
///
/// Same contract as [`release_leaf_chain`], for an inner chain.
pub unsafe fn release_inner_chain<K: Ord>(head: *mut NodeHeader<K>, table: &MappingTable<K>) {
    debug_assert!(
        // SAFETY: caller guarantees a live head.
        unsafe { (*head).kind().is_inner() },
        "inner free on a leaf chain"
    );

    let mut walker = FreeWalker { table };
    // SAFETY: forwarded contract. The `V` parameter is inert: an inner
    // chain never dispatches a leaf callback.
    unsafe { walk_chain::<K, (), _>(head, &mut walker) };
}

/// Visitor that destroys every record it is handed.
struct FreeWalker<'t, K> {
    table: &'t MappingTable<K>,
}

impl<K: Ord, V> ChainVisitor<K, V> for FreeWalker<'_, K> {
    fn leaf_base(&mut self, base: NonNull<BaseNode<K, V>>) -> Step<K> {
        // SAFETY: exclusive custody; the base is destroyed exactly once,
        // after every delta above it has already been returned.
        unsafe { BaseNode::destroy(base.as_ptr()) };
        Step::Stop
    }

    fn leaf_insert(&mut self, record: NonNull<LeafInsertDelta<K, V>>) -> Step<K> {
        // SAFETY: exclusive custody; next/base read before the free.
        unsafe {
            let next = (*record.as_ptr()).delta.next;
            let base = (*record.as_ptr()).delta.base;
            destroy_record::<K, V, _>(base, record.as_ptr());
            Step::Continue(next)
        }
    }

    fn leaf_delete(&mut self, record: NonNull<LeafDeleteDelta<K, V>>) -> Step<K> {
        // SAFETY: exclusive custody; next/base read before the free.
        unsafe {
            let next = (*record.as_ptr()).delta.next;
            let base = (*record.as_ptr()).delta.base;
            destroy_record::<K, V, _>(base, record.as_ptr());
            Step::Continue(next)
        }
    }

    fn leaf_split(&mut self, record: NonNull<SplitDelta<K>>) -> Step<K> {
        // SAFETY: exclusive custody; next/base read before the free.
        unsafe {
            let next = (*record.as_ptr()).delta.next;
            let base = (*record.as_ptr()).delta.base;
            destroy_record::<K, V, _>(base, record.as_ptr());
            Step::Continue(next)
        }
    }

    fn leaf_remove(&mut self, record: NonNull<RemoveDelta<K>>) -> Step<K> {
        self.free_remove::<V>(record)
    }

    fn leaf_merge(&mut self, record: NonNull<MergeDelta<K>>) -> Step<K> {
        self.free_merge::<V>(record)
    }

    fn inner_base(&mut self, base: NonNull<BaseNode<K, NodeId>>) -> Step<K> {
        // SAFETY: exclusive custody; destroyed exactly once.
        unsafe { BaseNode::destroy(base.as_ptr()) };
        Step::Stop
    }

    fn inner_insert(&mut self, record: NonNull<InnerInsertDelta<K>>) -> Step<K> {
        // SAFETY: exclusive custody; next/base read before the free.
        unsafe {
            let next = (*record.as_ptr()).delta.next;
            let base = (*record.as_ptr()).delta.base;
            destroy_record::<K, V, _>(base, record.as_ptr());
            Step::Continue(next)
        }
    }

    fn inner_delete(&mut self, record: NonNull<InnerDeleteDelta<K>>) -> Step<K> {
        // SAFETY: exclusive custody; next/base read before the free.
        unsafe {
            let next = (*record.as_ptr()).delta.next;
            let base = (*record.as_ptr()).delta.base;
            destroy_record::<K, V, _>(base, record.as_ptr());
            Step::Continue(next)
        }
    }

    fn inner_split(&mut self, record: NonNull<SplitDelta<K>>) -> Step<K> {
        // Same shape as the leaf variant; the record type is shared.
        <Self as ChainVisitor<K, V>>::leaf_split(self, record)
    }

    fn inner_remove(&mut self, record: NonNull<RemoveDelta<K>>) -> Step<K> {
        self.free_remove::<V>(record)
    }

    fn inner_merge(&mut self, record: NonNull<MergeDelta<K>>) -> Step<K> {
        self.free_merge::<V>(record)
    }
}

impl<K: Ord> FreeWalker<'_, K> {
    /// Release the removed id, then free the record.
    fn free_remove<V>(&mut self, record: NonNull<RemoveDelta<K>>) -> Step<K> {
        // SAFETY: exclusive custody; fields read before the free.
        unsafe {
            let rec = record.as_ptr();
            let next = (*rec).delta.next;
            let base = (*rec).delta.base;
            let removed: NodeId = (*rec).removed;

            self.table.release(removed);
            destroy_record::<K, V, _>(base, rec);

            Step::Continue(next)
        }
    }

    /// Free the record, then recurse through both absorbed branches.
    ///
    /// Ownership of the sibling chain transferred into the composite
    /// when the merge was installed, so this pass frees it too.
    fn free_merge<V>(&mut self, record: NonNull<MergeDelta<K>>) -> Step<K>
    where
        Self: ChainVisitor<K, V>,
    {
        // SAFETY: exclusive custody; fields read before the free, and
        // both branches are live chains owned by this composite.
        unsafe {
            let rec = record.as_ptr();
            let next = (*rec).delta.next;
            let sibling_head = (*rec).sibling_head;
            let base = (*rec).delta.base;

            destroy_record::<K, V, _>(base, rec);

            walk_chain::<K, V, _>(next, self);
            walk_chain::<K, V, _>(sibling_head, self);
        }

        Step::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append::ChainAppender;
    use crate::bound::Bound;

    #[test]
    fn remove_delta_releases_its_id() {
        let table: MappingTable<u64> = MappingTable::new(8);

        let node = BaseNode::<u64, u64>::new_leaf(Bound::neg_inf(), Bound::pos_inf(), vec![]);
        let id = table.allocate(BaseNode::into_raw(node));

        let mut appender: ChainAppender<'_, u64, u64> = ChainAppender::new(&table, id);
        appender.append_leaf_remove(id).unwrap();

        // SAFETY: exclusive custody, freed once.
        unsafe { release_leaf_chain::<u64, u64>(table.load(id), &table) };

        assert!(table.load(id).is_null(), "freed remove must clear the slot");
    }

    #[test]
    fn merge_free_recurses_into_sibling() {
        let table: MappingTable<u64> = MappingTable::new(8);

        let left = BaseNode::<u64, u64>::new_leaf(
            Bound::neg_inf(),
            Bound::finite(50),
            vec![(1, 1)],
        );
        let right =
            BaseNode::<u64, u64>::new_leaf(Bound::finite(50), Bound::pos_inf(), vec![(50, 5)]);

        let left_id = table.allocate(BaseNode::into_raw(left));
        let right_id = table.allocate(BaseNode::into_raw(right));

        // Mark the sibling removed, then absorb its chain.
        let mut right_appender: ChainAppender<'_, u64, u64> = ChainAppender::new(&table, right_id);
        right_appender.append_leaf_remove(right_id).unwrap();

        let mut left_appender: ChainAppender<'_, u64, u64> = ChainAppender::new(&table, left_id);
        left_appender
            .append_leaf_merge(50, right_id, table.load(right_id))
            .unwrap();

        // SAFETY: exclusive custody; the composite owns both branches.
        unsafe { release_leaf_chain::<u64, u64>(table.load(left_id), &table) };

        // The remove record in the sibling branch released its id.
        assert!(table.load(right_id).is_null());
    }
}
