//! Filepath: src/traverse.rs
//!
//! Generic delta-chain traversal.
//!
//! [`walk_chain`] drives a [`ChainVisitor`] down a chain: one dispatch
//! on the kind tag per record, one callback with a typed view, then
//! either stop or hop to whatever record the callback chose (usually
//! `record.next`). Base records have no `next`; their callbacks must
//! stop.
//!
//! # Recursive merge descent
//!
//! A merge record forks the chain: the records below `next` and the
//! records hanging off `sibling_head` together form one virtual node. A
//! visitor that needs the whole virtual view re-enters [`walk_chain`] on
//! `next`, then on `sibling_head`, each entry a fresh traversal loop,
//! and finally stops its own walk. Point-read visitors instead continue
//! into the single branch whose range holds their search key.

use std::ptr::NonNull;

use crate::base::BaseNode;
use crate::delta::{
    InnerDeleteDelta, InnerInsertDelta, LeafDeleteDelta, LeafInsertDelta, MergeDelta, RemoveDelta,
    SplitDelta,
};
use crate::mapping::NodeId;
use crate::node::{NodeHeader, NodeKind};

/// What a visitor callback tells the driver to do next.
#[derive(Debug)]
pub enum Step<K> {
    /// Visit the given record next (usually the callback's `next`).
    Continue(*mut NodeHeader<K>),

    /// The traversal is complete.
    Stop,
}

/// One callback per record kind.
///
/// `V` is the leaf value type; visitors over inner chains never see the
/// leaf callbacks and vice versa. The defaults fault, so a visitor only
/// implements the family it expects.
pub trait ChainVisitor<K, V> {
    /// Visit a leaf base. Must return [`Step::Stop`].
    fn leaf_base(&mut self, base: NonNull<BaseNode<K, V>>) -> Step<K> {
        let _ = base;
        unreachable!("leaf base record in a chain this visitor does not handle");
    }

    /// Visit a leaf insert delta.
    fn leaf_insert(&mut self, record: NonNull<LeafInsertDelta<K, V>>) -> Step<K> {
        let _ = record;
        unreachable!("leaf insert record in a chain this visitor does not handle");
    }

    /// Visit a leaf delete delta.
    fn leaf_delete(&mut self, record: NonNull<LeafDeleteDelta<K, V>>) -> Step<K> {
        let _ = record;
        unreachable!("leaf delete record in a chain this visitor does not handle");
    }

    /// Visit a leaf split delta.
    fn leaf_split(&mut self, record: NonNull<SplitDelta<K>>) -> Step<K> {
        let _ = record;
        unreachable!("leaf split record in a chain this visitor does not handle");
    }

    /// Visit a leaf remove delta.
    fn leaf_remove(&mut self, record: NonNull<RemoveDelta<K>>) -> Step<K> {
        let _ = record;
        unreachable!("leaf remove record in a chain this visitor does not handle");
    }

    /// Visit a leaf merge delta.
    fn leaf_merge(&mut self, record: NonNull<MergeDelta<K>>) -> Step<K> {
        let _ = record;
        unreachable!("leaf merge record in a chain this visitor does not handle");
    }

    /// Visit an inner base. Must return [`Step::Stop`].
    fn inner_base(&mut self, base: NonNull<BaseNode<K, NodeId>>) -> Step<K> {
        let _ = base;
        unreachable!("inner base record in a chain this visitor does not handle");
    }

    /// Visit an inner insert delta.
    fn inner_insert(&mut self, record: NonNull<InnerInsertDelta<K>>) -> Step<K> {
        let _ = record;
        unreachable!("inner insert record in a chain this visitor does not handle");
    }

    /// Visit an inner delete delta.
    fn inner_delete(&mut self, record: NonNull<InnerDeleteDelta<K>>) -> Step<K> {
        let _ = record;
        unreachable!("inner delete record in a chain this visitor does not handle");
    }

    /// Visit an inner split delta.
    fn inner_split(&mut self, record: NonNull<SplitDelta<K>>) -> Step<K> {
        let _ = record;
        unreachable!("inner split record in a chain this visitor does not handle");
    }

    /// Visit an inner remove delta.
    fn inner_remove(&mut self, record: NonNull<RemoveDelta<K>>) -> Step<K> {
        let _ = record;
        unreachable!("inner remove record in a chain this visitor does not handle");
    }

    /// Visit an inner merge delta.
    fn inner_merge(&mut self, record: NonNull<MergeDelta<K>>) -> Step<K> {
        let _ = record;
        unreachable!("inner merge record in a chain this visitor does not handle");
    }
}

/// Drive `visitor` down the chain starting at `head`.
///
/// # Safety
///
/// `head` must point to a live chain whose records stay valid for the
/// whole traversal (the caller holds epoch protection or exclusive
/// custody). Every `Step::Continue` target chosen by the visitor must
/// itself be a live record.
pub unsafe fn walk_chain<K, V, H>(head: *mut NodeHeader<K>, visitor: &mut H)
where
    H: ChainVisitor<K, V>,
{
    let mut current: *mut NodeHeader<K> = head;

    loop {
        debug_assert!(!current.is_null(), "chain walk reached a null record");

        // SAFETY: caller guarantees the record is live; the kind tag
        // selects the matching concrete type for the cast.
        let kind: NodeKind = unsafe { (*current).kind() };

        let step: Step<K> = unsafe {
            match kind {
                NodeKind::LeafBase => visitor.leaf_base(NonNull::new_unchecked(current.cast())),
                NodeKind::LeafInsert => {
                    visitor.leaf_insert(NonNull::new_unchecked(current.cast()))
                }
                NodeKind::LeafDelete => {
                    visitor.leaf_delete(NonNull::new_unchecked(current.cast()))
                }
                NodeKind::LeafSplit => visitor.leaf_split(NonNull::new_unchecked(current.cast())),
                NodeKind::LeafRemove => {
                    visitor.leaf_remove(NonNull::new_unchecked(current.cast()))
                }
                NodeKind::LeafMerge => visitor.leaf_merge(NonNull::new_unchecked(current.cast())),
                NodeKind::InnerBase => visitor.inner_base(NonNull::new_unchecked(current.cast())),
                NodeKind::InnerInsert => {
                    visitor.inner_insert(NonNull::new_unchecked(current.cast()))
                }
                NodeKind::InnerDelete => {
                    visitor.inner_delete(NonNull::new_unchecked(current.cast()))
                }
                NodeKind::InnerSplit => {
                    visitor.inner_split(NonNull::new_unchecked(current.cast()))
                }
                NodeKind::InnerRemove => {
                    visitor.inner_remove(NonNull::new_unchecked(current.cast()))
                }
                NodeKind::InnerMerge => {
                    visitor.inner_merge(NonNull::new_unchecked(current.cast()))
                }
            }
        };

        match step {
            Step::Stop => return,
            Step::Continue(next) => {
                debug_assert!(kind.is_delta(), "base records must stop the traversal");
                current = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append::ChainAppender;
    use crate::bound::Bound;
    use crate::free::release_leaf_chain;
    use crate::mapping::MappingTable;

    /// Counts records per kind while walking to the base.
    #[derive(Default)]
    struct KindCounter {
        inserts: usize,
        deletes: usize,
        bases: usize,
    }

    impl ChainVisitor<u64, u64> for KindCounter {
        fn leaf_base(&mut self, _base: NonNull<BaseNode<u64, u64>>) -> Step<u64> {
            self.bases += 1;
            Step::Stop
        }

        fn leaf_insert(&mut self, record: NonNull<LeafInsertDelta<u64, u64>>) -> Step<u64> {
            self.inserts += 1;
            // SAFETY: walk_chain guarantees a live record.
            Step::Continue(unsafe { record.as_ref() }.delta().next())
        }

        fn leaf_delete(&mut self, record: NonNull<LeafDeleteDelta<u64, u64>>) -> Step<u64> {
            self.deletes += 1;
            // SAFETY: walk_chain guarantees a live record.
            Step::Continue(unsafe { record.as_ref() }.delta().next())
        }
    }

    #[test]
    fn walk_visits_every_record_to_the_base() {
        let table: MappingTable<u64> = MappingTable::new(8);
        let base = BaseNode::<u64, u64>::new_leaf(Bound::neg_inf(), Bound::pos_inf(), vec![]);
        let id = table.allocate(BaseNode::into_raw(base));

        let mut appender: ChainAppender<'_, u64, u64> = ChainAppender::new(&table, id);
        appender.append_leaf_insert(1, 10).unwrap();
        appender.append_leaf_insert(2, 20).unwrap();
        appender.append_leaf_delete(1, 10).unwrap();

        let mut counter = KindCounter::default();
        // SAFETY: single-threaded test; the chain is live and exclusive.
        unsafe { walk_chain(table.load(id), &mut counter) };

        assert_eq!(counter.inserts, 2);
        assert_eq!(counter.deletes, 1);
        assert_eq!(counter.bases, 1);

        // SAFETY: no other accessor; frees the whole chain once.
        unsafe { release_leaf_chain::<u64, u64>(table.load(id), &table) };
    }
}
