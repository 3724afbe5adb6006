//! Property-based tests for chain consolidation.
//!
//! Differential testing against `BTreeMap` as an oracle: for any program
//! of inserts and deletes applied to an initially empty leaf, folding
//! the resulting chain must equal applying the program to a sorted map,
//! projected onto the node's range.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use proptest::prelude::*;

use bwtree::append::ChainAppender;
use bwtree::base::BaseNode;
use bwtree::bound::Bound;
use bwtree::consolidate::consolidate_leaf;
use bwtree::free::release_leaf_chain;
use bwtree::mapping::MappingTable;

/// One step of a random program. Deletes target a previously inserted
/// key when possible, the way a driver that checked presence first
/// would behave.
#[derive(Debug, Clone)]
enum Op {
    Insert(u64, u64),
    Delete(u64),
}

fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0..64u64, any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
            2 => (0..64u64).prop_map(Op::Delete),
        ],
        0..=max_ops,
    )
}

/// Run a program through a chain and through the oracle, then compare
/// the consolidated base against the oracle contents.
fn check_program(ops: &[Op]) -> Result<(), TestCaseError> {
    let table: MappingTable<u64> = MappingTable::new(4);
    let base = BaseNode::<u64, u64>::new_leaf(Bound::neg_inf(), Bound::pos_inf(), vec![]);
    let id = table.allocate(BaseNode::into_raw(base));

    let mut appender: ChainAppender<'_, u64, u64> = ChainAppender::new(&table, id);
    let mut oracle: BTreeMap<u64, u64> = BTreeMap::new();

    for op in ops {
        match *op {
            Op::Insert(key, value) => {
                appender.append_leaf_insert(key, value).unwrap();
                oracle.insert(key, value);
            }
            Op::Delete(key) => {
                // A driver deletes only what a point search found.
                if let Some(value) = oracle.remove(&key) {
                    appender.append_leaf_delete(key, value).unwrap();
                }
            }
        }
    }

    // SAFETY: single-threaded test, chain is live.
    let folded = unsafe { consolidate_leaf::<u64, u64>(table.load(id)) };

    let expected: Vec<(u64, u64)> = oracle.into_iter().collect();
    prop_assert_eq!(folded.entries(), expected.as_slice());
    prop_assert_eq!(folded.header().size(), expected.len());
    prop_assert_eq!(folded.low(), &Bound::neg_inf());
    prop_assert_eq!(folded.high(), &Bound::pos_inf());

    // SAFETY: exclusive custody; allocator accounting flags any leak.
    unsafe { release_leaf_chain::<u64, u64>(table.load(id), &table) };

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Folding a chain equals applying the program to a sorted map.
    #[test]
    fn consolidation_matches_sorted_map(ops in operations(48)) {
        check_program(&ops)?;
    }

    /// Insert-only programs: the last value written for a key wins.
    #[test]
    fn last_insert_wins(pairs in prop::collection::vec((0..32u64, any::<u64>()), 0..32)) {
        let ops: Vec<Op> = pairs.iter().map(|&(k, v)| Op::Insert(k, v)).collect();
        check_program(&ops)?;
    }

    /// Delete-everything programs leave an empty base with the original
    /// range.
    #[test]
    fn full_teardown_leaves_empty_base(keys in prop::collection::btree_set(0..32u64, 0..16)) {
        let mut ops: Vec<Op> = keys.iter().map(|&k| Op::Insert(k, k)).collect();
        ops.extend(keys.iter().map(|&k| Op::Delete(k)));
        check_program(&ops)?;
    }
}
