//! Filepath: src/consolidate.rs
//!
//! Chain consolidation: folding a delta chain into a fresh base node.
//!
//! The fold walks the chain head-to-base, collecting pending inserts and
//! deletes, tracking the effective high bound across split deltas, and
//! descending recursively through both branches of a merge. At each base
//! it interleaves the base's entries with the pending inserts (minus the
//! pending deletes) into one globally ascending output, bounded by the
//! branch's effective high.
//!
//! Shadowing is nearest-head-wins: the first record seen for a key
//! decides its fate, and later records for the same key are ignored.
//! Likewise the first split seen fixes the effective high bound; splits
//! deeper in the chain describe older, wider truncations.
//!
//! The caller CAS-installs the produced base and hands the old head to
//! the reclamation layer; nothing here touches the mapping table.

use std::ptr::NonNull;

use crate::base::{BaseNode, InnerBase};
use crate::bound::Bound;
use crate::delta::{
    InnerDeleteDelta, InnerInsertDelta, LeafDeleteDelta, LeafInsertDelta, MergeDelta, RemoveDelta,
    SplitDelta,
};
use crate::mapping::NodeId;
use crate::node::NodeHeader;
use crate::tracing_helpers::{debug_log, trace_log};
use crate::traverse::{walk_chain, ChainVisitor, Step};

/// Whether a writer should consolidate a chain with this head.
///
/// # Safety
///
/// `head` must point to a live chain record.
#[inline]
#[must_use]
pub unsafe fn needs_consolidation<K>(head: *const NodeHeader<K>, threshold: u32) -> bool {
    debug_assert!(threshold >= 1, "height threshold must be at least 1");

    // SAFETY: caller guarantees a live record.
    unsafe { (*head).height() >= threshold }
}

/// Fold a leaf chain into a new consolidated base.
///
/// The result spans `[chain low, effective high]`; the caller installs
/// it and retires the old chain.
///
/// # Safety
///
/// `head` must be a live leaf chain with value type `V`, kept alive for
/// the duration of the call (epoch protection or exclusive custody).
#[must_use]
pub unsafe fn consolidate_leaf<K, V>(head: *mut NodeHeader<K>) -> Box<BaseNode<K, V>>
where
    K: Ord + Clone,
    V: Clone,
{
    debug_assert!(
        // SAFETY: caller guarantees a live head.
        unsafe { (*head).kind().is_leaf() },
        "leaf consolidation on an inner chain"
    );

    // SAFETY: caller guarantees a live head.
    let height: usize = unsafe { (*head).height() } as usize;

    trace_log!(height, "consolidating leaf chain");

    let mut fold: LeafFold<K, V> = LeafFold {
        state: FoldState::new(false, height),
    };

    // SAFETY: forwarded contract.
    unsafe { walk_chain(head, &mut fold) };

    let folded: Box<BaseNode<K, V>> = fold.state.into_leaf_base();

    debug_log!(entries = folded.len(), "leaf chain folded");

    folded
}

/// Fold an inner chain into a new consolidated base.
///
/// # Safety
///
/// Same contract as [`consolidate_leaf`], for an inner chain.
#[must_use]
pub unsafe fn consolidate_inner<K>(head: *mut NodeHeader<K>) -> Box<InnerBase<K>>
where
    K: Ord + Clone,
{
    debug_assert!(
        // SAFETY: caller guarantees a live head.
        unsafe { (*head).kind().is_inner() },
        "inner consolidation on a leaf chain"
    );

    // SAFETY: caller guarantees a live head.
    let height: usize = unsafe { (*head).height() } as usize;

    trace_log!(height, "consolidating inner chain");

    let mut fold: InnerFold<K> = InnerFold {
        state: FoldState::new(true, height),
    };

    // SAFETY: forwarded contract. The `V` parameter is inert: an inner
    // chain never dispatches a leaf callback.
    unsafe { walk_chain::<K, (), _>(head, &mut fold) };

    let folded: Box<InnerBase<K>> = fold.state.into_inner_base();

    debug_log!(entries = folded.len(), "inner chain folded");

    folded
}

// ============================================================================
//  Fold state
// ============================================================================

/// Scratch state shared by leaf and inner folds.
///
/// The insert/delete lists hold pointers into the chain's own records;
/// the chain outlives the fold, so they stay valid throughout.
struct FoldState<K, E> {
    /// Pending inserts whose matching delete has not been seen.
    /// Sorted descending at each base and consumed as a stack.
    inserted: Vec<(*const K, *const E)>,

    /// Keys deleted on the current path, shadowing records below.
    deleted: Vec<*const K>,

    /// Effective high bound of the current branch: null until a split is
    /// seen, then that split's embedded key.
    current_high: *const Bound<K>,

    /// Accumulated output, globally ascending across merge branches.
    entries: Vec<(K, E)>,

    /// Low bound of the leftmost base (the composite's low).
    low: Option<Bound<K>>,

    /// Effective high at the rightmost base (the composite's high).
    high: Option<Bound<K>>,

    /// Allocator accounting mode, inherited from the first base.
    accounting: bool,

    /// Inner-family fold: entry 0's key is ignored and always survives.
    inner: bool,
}

impl<K: Ord + Clone, E: Clone> FoldState<K, E> {
    fn new(inner: bool, height_hint: usize) -> Self {
        Self {
            inserted: Vec::with_capacity(height_hint),
            deleted: Vec::with_capacity(height_hint),
            current_high: std::ptr::null(),
            entries: Vec::new(),
            low: None,
            high: None,
            accounting: cfg!(debug_assertions),
            inner,
        }
    }

    /// A record for `key` has already been seen nearer the head.
    fn seen(&self, key: &K) -> bool {
        // SAFETY: both lists hold pointers into live chain records.
        self.inserted.iter().any(|&(k, _)| unsafe { &*k } == key)
            || self.deleted.iter().any(|&k| unsafe { &*k } == key)
    }

    fn record_insert(&mut self, key: *const K, payload: *const E) {
        // SAFETY: points into the live record being visited.
        if !self.seen(unsafe { &*key }) {
            self.inserted.push((key, payload));
        }
    }

    fn record_delete(&mut self, key: *const K) {
        // SAFETY: points into the live record being visited.
        if !self.seen(unsafe { &*key }) {
            self.deleted.push(key);
        }
    }

    fn record_split(&mut self, split_key: *const Bound<K>) {
        if self.current_high.is_null() {
            self.current_high = split_key;
        }
    }

    /// Branch state to save around a merge's left descent.
    fn merge_checkpoint(&self) -> (*const Bound<K>, usize) {
        (self.current_high, self.deleted.len())
    }

    fn restore_checkpoint(&mut self, checkpoint: (*const Bound<K>, usize)) {
        self.current_high = checkpoint.0;
        self.deleted.truncate(checkpoint.1);
    }

    /// Merge one base's entries with the pending inserts into the output.
    fn fold_base(&mut self, base: &BaseNode<K, E>) {
        if self.low.is_none() {
            self.low = Some(base.low().clone());
            self.accounting = base.allocator().accounting();
        }

        // Smallest pending insert on top of the stack.
        self.inserted
            .sort_by(|a, b| unsafe { (*b.0).cmp(&*a.0) });

        // This branch ends at the newest split's key, or the base's own
        // high bound if the branch was never truncated.
        let limit: &Bound<K> = if self.current_high.is_null() {
            base.high()
        } else {
            // SAFETY: points at a split delta's embedded key, live for
            // the whole fold.
            unsafe { &*self.current_high }
        };

        let mut start: usize = 0;
        if self.inner && !base.is_empty() {
            // Entry 0 stands for (low, first_key) and always survives.
            let (key, payload) = &base.entries()[0];
            self.entries.push((key.clone(), payload.clone()));
            start = 1;
        }

        'entries: for (key, payload) in &base.entries()[start..] {
            if limit.le_key(key) {
                // Given away to the split sibling.
                break;
            }

            // Emit pending inserts below (or replacing) this entry.
            while let Some(&(ins_key, ins_payload)) = self.inserted.last() {
                // SAFETY: list invariant; points into a live record.
                let ins_key: &K = unsafe { &*ins_key };
                if ins_key > key {
                    break;
                }

                self.inserted.pop();
                // SAFETY: list invariant; points into a live record.
                self.entries
                    .push((ins_key.clone(), unsafe { (*ins_payload).clone() }));

                if ins_key == key {
                    // The insert superseded the base entry.
                    continue 'entries;
                }
            }

            // SAFETY: list invariant; points into live records.
            if self.deleted.iter().any(|&d| unsafe { &*d } == key) {
                continue;
            }

            self.entries.push((key.clone(), payload.clone()));
        }

        // Pending inserts past the base's last entry but inside this
        // branch's range. Anything at or above the limit stays queued for
        // a later merge branch.
        while let Some(&(ins_key, ins_payload)) = self.inserted.last() {
            // SAFETY: list invariant; points into live records.
            let ins_key: &K = unsafe { &*ins_key };
            if limit.le_key(ins_key) {
                break;
            }

            self.inserted.pop();
            // SAFETY: list invariant; points into a live record.
            self.entries
                .push((ins_key.clone(), unsafe { (*ins_payload).clone() }));
        }

        // The rightmost base visited leaves the composite's high bound.
        self.high = Some(limit.clone());
    }

    fn into_bounds(self) -> (Bound<K>, Bound<K>, Vec<(K, E)>, bool) {
        let Some(low) = self.low else {
            unreachable!("delta chain terminated without a base record");
        };
        let Some(high) = self.high else {
            unreachable!("delta chain terminated without a base record");
        };

        (low, high, self.entries, self.accounting)
    }

    fn into_leaf_base(self) -> Box<BaseNode<K, E>> {
        let (low, high, entries, accounting) = self.into_bounds();
        BaseNode::new_leaf_with_accounting(low, high, entries, accounting)
    }
}

impl<K: Ord + Clone> FoldState<K, NodeId> {
    fn into_inner_base(self) -> Box<InnerBase<K>> {
        let (low, high, entries, accounting) = self.into_bounds();
        InnerBase::new_inner_with_accounting(low, high, entries, accounting)
    }
}

// ============================================================================
//  Leaf fold visitor
// ============================================================================

struct LeafFold<K, V> {
    state: FoldState<K, V>,
}

impl<K: Ord + Clone, V: Clone> ChainVisitor<K, V> for LeafFold<K, V> {
    fn leaf_base(&mut self, base: NonNull<BaseNode<K, V>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        self.state.fold_base(unsafe { base.as_ref() });
        Step::Stop
    }

    fn leaf_insert(&mut self, record: NonNull<LeafInsertDelta<K, V>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        let rec = unsafe { record.as_ref() };
        self.state.record_insert(&rec.key, &rec.value);
        Step::Continue(rec.delta.next())
    }

    fn leaf_delete(&mut self, record: NonNull<LeafDeleteDelta<K, V>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        let rec = unsafe { record.as_ref() };
        self.state.record_delete(&rec.key);
        Step::Continue(rec.delta.next())
    }

    fn leaf_split(&mut self, record: NonNull<SplitDelta<K>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        let rec = unsafe { record.as_ref() };
        self.state.record_split(&rec.split_key);
        Step::Continue(rec.delta.next())
    }

    fn leaf_remove(&mut self, record: NonNull<RemoveDelta<K>>) -> Step<K> {
        // Detachment does not change the folded contents.
        // SAFETY: walk_chain guarantees a live record.
        Step::Continue(unsafe { record.as_ref() }.delta.next())
    }

    fn leaf_merge(&mut self, record: NonNull<MergeDelta<K>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        let rec = unsafe { record.as_ref() };

        let checkpoint = self.state.merge_checkpoint();

        // Left branch, then the absorbed sibling, each with its own
        // branch-local truncation and delete state.
        // SAFETY: both branches are live chains owned by the composite.
        unsafe { walk_chain(rec.delta.next(), self) };
        self.state.restore_checkpoint(checkpoint);
        // SAFETY: as above.
        unsafe { walk_chain(rec.sibling_head(), self) };

        Step::Stop
    }
}

// ============================================================================
//  Inner fold visitor
// ============================================================================

struct InnerFold<K> {
    state: FoldState<K, NodeId>,
}

impl<K: Ord + Clone> ChainVisitor<K, ()> for InnerFold<K> {
    fn inner_base(&mut self, base: NonNull<InnerBase<K>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        self.state.fold_base(unsafe { base.as_ref() });
        Step::Stop
    }

    fn inner_insert(&mut self, record: NonNull<InnerInsertDelta<K>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        let rec = unsafe { record.as_ref() };
        self.state.record_insert(&rec.key, &rec.child);
        Step::Continue(rec.delta.next())
    }

    fn inner_delete(&mut self, record: NonNull<InnerDeleteDelta<K>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        let rec = unsafe { record.as_ref() };
        self.state.record_delete(&rec.key);
        Step::Continue(rec.delta.next())
    }

    fn inner_split(&mut self, record: NonNull<SplitDelta<K>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        let rec = unsafe { record.as_ref() };
        self.state.record_split(&rec.split_key);
        Step::Continue(rec.delta.next())
    }

    fn inner_remove(&mut self, record: NonNull<RemoveDelta<K>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        Step::Continue(unsafe { record.as_ref() }.delta.next())
    }

    fn inner_merge(&mut self, record: NonNull<MergeDelta<K>>) -> Step<K> {
        // SAFETY: walk_chain guarantees a live record.
        let rec = unsafe { record.as_ref() };

        let checkpoint = self.state.merge_checkpoint();

        // SAFETY: both branches are live chains owned by the composite.
        unsafe { walk_chain::<K, (), _>(rec.delta.next(), self) };
        self.state.restore_checkpoint(checkpoint);
        // SAFETY: as above.
        unsafe { walk_chain::<K, (), _>(rec.sibling_head(), self) };

        Step::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append::ChainAppender;
    use crate::free::release_leaf_chain;
    use crate::mapping::MappingTable;

    #[test]
    fn height_threshold_gates_consolidation() {
        let table: MappingTable<u64> = MappingTable::new(4);
        let base = BaseNode::<u64, u64>::new_leaf(Bound::neg_inf(), Bound::pos_inf(), vec![]);
        let id = table.allocate(BaseNode::into_raw(base));

        let mut appender: ChainAppender<'_, u64, u64> = ChainAppender::new(&table, id);

        // SAFETY: single-threaded test; heads stay live.
        unsafe {
            assert!(!needs_consolidation(table.load(id), 2));

            appender.append_leaf_insert(1, 1).unwrap();
            assert!(!needs_consolidation(table.load(id), 2));

            appender.append_leaf_insert(2, 2).unwrap();
            assert!(needs_consolidation(table.load(id), 2));

            release_leaf_chain::<u64, u64>(table.load(id), &table);
        }
    }

    #[test]
    fn bare_base_consolidates_to_a_copy() {
        let table: MappingTable<u64> = MappingTable::new(4);
        let entries: Vec<(u64, u64)> = vec![(1, 10), (2, 20)];
        let base = BaseNode::new_leaf(Bound::neg_inf(), Bound::finite(100), entries.clone());
        let id = table.allocate(BaseNode::into_raw(base));

        // SAFETY: single-threaded test, chain is live.
        let folded = unsafe { consolidate_leaf::<u64, u64>(table.load(id)) };

        assert_eq!(folded.entries(), entries.as_slice());
        assert_eq!(folded.low(), &Bound::neg_inf());
        assert_eq!(folded.high(), &Bound::finite(100));
        assert_eq!(folded.header().height(), 0);

        // SAFETY: exclusive custody.
        unsafe { release_leaf_chain::<u64, u64>(table.load(id), &table) };
    }

    #[test]
    fn newest_record_for_a_key_wins() {
        let table: MappingTable<u64> = MappingTable::new(4);
        let base = BaseNode::<u64, u64>::new_leaf(Bound::neg_inf(), Bound::pos_inf(), vec![]);
        let id = table.allocate(BaseNode::into_raw(base));

        let mut appender: ChainAppender<'_, u64, u64> = ChainAppender::new(&table, id);
        appender.append_leaf_insert(5, 1).unwrap();
        appender.append_leaf_delete(5, 1).unwrap();
        appender.append_leaf_insert(5, 2).unwrap();

        // SAFETY: single-threaded test, chain is live.
        let folded = unsafe { consolidate_leaf::<u64, u64>(table.load(id)) };
        assert_eq!(folded.entries(), &[(5, 2)]);

        // SAFETY: exclusive custody.
        unsafe { release_leaf_chain::<u64, u64>(table.load(id), &table) };
    }

    #[test]
    fn insert_supersedes_base_entry() {
        let table: MappingTable<u64> = MappingTable::new(4);
        let base =
            BaseNode::<u64, u64>::new_leaf(Bound::neg_inf(), Bound::pos_inf(), vec![(7, 1)]);
        let id = table.allocate(BaseNode::into_raw(base));

        let mut appender: ChainAppender<'_, u64, u64> = ChainAppender::new(&table, id);
        appender.append_leaf_insert(7, 2).unwrap();

        // SAFETY: single-threaded test, chain is live.
        let folded = unsafe { consolidate_leaf::<u64, u64>(table.load(id)) };
        assert_eq!(folded.entries(), &[(7, 2)]);

        // SAFETY: exclusive custody.
        unsafe { release_leaf_chain::<u64, u64>(table.load(id), &table) };
    }

    #[test]
    fn split_truncates_folded_range() {
        let table: MappingTable<u64> = MappingTable::new(4);
        let entries: Vec<(u64, u64)> = (0..6).map(|i| (10 * i, i)).collect();
        let base = BaseNode::new_leaf(Bound::neg_inf(), Bound::pos_inf(), entries);
        let right = base.split();
        let id = table.allocate(BaseNode::into_raw(base));
        let sibling = table.allocate(BaseNode::into_raw(right));

        let mut appender: ChainAppender<'_, u64, u64> = ChainAppender::new(&table, id);
        appender.append_leaf_split(30, sibling, 3).unwrap();

        // SAFETY: single-threaded test, chain is live.
        let folded = unsafe { consolidate_leaf::<u64, u64>(table.load(id)) };
        assert_eq!(folded.entries(), &[(0, 0), (10, 1), (20, 2)]);
        assert_eq!(folded.high(), &Bound::finite(30));

        // SAFETY: exclusive custody of both chains.
        unsafe {
            release_leaf_chain::<u64, u64>(table.load(id), &table);
            release_leaf_chain::<u64, u64>(table.load(sibling), &table);
        }
    }
}
