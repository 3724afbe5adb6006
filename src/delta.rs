//! Filepath: src/delta.rs
//!
//! The delta record family.
//!
//! Each record is one update layered above a node, linked to the record
//! below through its [`DeltaHeader`]. The set of kinds is closed; each
//! kind has a fixed payload shape. All records are `#[repr(C)]` with the
//! delta header first, so a `*mut NodeHeader<K>` downcasts to the
//! concrete record after inspecting the kind tag.
//!
//! Field order matters: in the insert and delete records the key field
//! is immediately followed by its companion payload (value or child id),
//! giving insert and delete of the same family an identical key-to-payload
//! offset. The consolidator relies on recovering pairs uniformly; the
//! layout tests below pin the guarantee.

use crate::bound::Bound;
use crate::mapping::NodeId;
use crate::node::{DeltaHeader, NodeHeader};

// ============================================================================
//  Leaf records
// ============================================================================

/// Key/value insertion above a leaf.
#[repr(C)]
#[derive(Debug)]
pub struct LeafInsertDelta<K, V> {
    pub(crate) delta: DeltaHeader<K>,
    pub(crate) key: K,
    pub(crate) value: V,
}

impl<K, V> LeafInsertDelta<K, V> {
    /// The delta header.
    #[inline]
    #[must_use]
    pub const fn delta(&self) -> &DeltaHeader<K> {
        &self.delta
    }

    /// The inserted key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// The inserted value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }
}

/// Key/value removal above a leaf.
///
/// Carries the value so the caller can assert what it removed; the
/// consolidator keys off the key alone.
#[repr(C)]
#[derive(Debug)]
pub struct LeafDeleteDelta<K, V> {
    pub(crate) delta: DeltaHeader<K>,
    pub(crate) key: K,
    pub(crate) value: V,
}

impl<K, V> LeafDeleteDelta<K, V> {
    /// The delta header.
    #[inline]
    #[must_use]
    pub const fn delta(&self) -> &DeltaHeader<K> {
        &self.delta
    }

    /// The deleted key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// The value recorded at deletion.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }
}

// ============================================================================
//  Inner records
// ============================================================================

/// Separator insertion above an inner node, routing `[key, next_sep)`
/// to `child`.
#[repr(C)]
#[derive(Debug)]
pub struct InnerInsertDelta<K> {
    pub(crate) delta: DeltaHeader<K>,
    pub(crate) key: K,
    pub(crate) child: NodeId,
    pub(crate) next_sep: Bound<K>,
}

impl<K> InnerInsertDelta<K> {
    /// The delta header.
    #[inline]
    #[must_use]
    pub const fn delta(&self) -> &DeltaHeader<K> {
        &self.delta
    }

    /// The inserted separator key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Child id the new separator routes to.
    #[inline]
    #[must_use]
    pub const fn child(&self) -> NodeId {
        self.child
    }

    /// The separator immediately to the right at install time.
    #[inline]
    #[must_use]
    pub const fn next_sep(&self) -> &Bound<K> {
        &self.next_sep
    }
}

/// Separator removal above an inner node.
///
/// Records the neighboring separator on each side at install time; the
/// left neighbor takes over the removed child's key range.
#[repr(C)]
#[derive(Debug)]
pub struct InnerDeleteDelta<K> {
    pub(crate) delta: DeltaHeader<K>,
    pub(crate) key: K,
    pub(crate) child: NodeId,
    pub(crate) next_sep: Bound<K>,
    pub(crate) prev_sep: Bound<K>,
    pub(crate) prev_child: NodeId,
}

impl<K> InnerDeleteDelta<K> {
    /// The delta header.
    #[inline]
    #[must_use]
    pub const fn delta(&self) -> &DeltaHeader<K> {
        &self.delta
    }

    /// The removed separator key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Child id the removed separator routed to.
    #[inline]
    #[must_use]
    pub const fn child(&self) -> NodeId {
        self.child
    }

    /// The separator immediately to the right at install time.
    #[inline]
    #[must_use]
    pub const fn next_sep(&self) -> &Bound<K> {
        &self.next_sep
    }

    /// The separator immediately to the left at install time.
    #[inline]
    #[must_use]
    pub const fn prev_sep(&self) -> &Bound<K> {
        &self.prev_sep
    }

    /// Child id of the left neighbor.
    #[inline]
    #[must_use]
    pub const fn prev_child(&self) -> NodeId {
        self.prev_child
    }
}

// ============================================================================
//  Structure-modification records (shared leaf/inner shapes)
// ============================================================================

/// Range truncation: the node's effective high bound becomes the
/// embedded split key, and `[split_key, old_high)` belongs to `sibling`.
///
/// The record owns its split-key storage; after construction the header's
/// high pointer is redirected to it, while the low pointer keeps aliasing
/// the base's.
#[repr(C)]
#[derive(Debug)]
pub struct SplitDelta<K> {
    pub(crate) delta: DeltaHeader<K>,
    pub(crate) split_key: Bound<K>,
    pub(crate) sibling: NodeId,
}

impl<K> SplitDelta<K> {
    /// The delta header.
    #[inline]
    #[must_use]
    pub const fn delta(&self) -> &DeltaHeader<K> {
        &self.delta
    }

    /// The embedded split key (always finite).
    #[inline]
    #[must_use]
    pub const fn split_key(&self) -> &Bound<K> {
        &self.split_key
    }

    /// Id owning the given-away upper half.
    #[inline]
    #[must_use]
    pub const fn sibling(&self) -> NodeId {
        self.sibling
    }
}

/// Fusion with the right sibling: this node and the sibling's chain form
/// one virtual node, separated at `middle_key`.
///
/// Installing a merge transfers logical ownership of the sibling chain
/// into the composite; a later free must recurse through both branches.
#[repr(C)]
#[derive(Debug)]
pub struct MergeDelta<K> {
    pub(crate) delta: DeltaHeader<K>,
    pub(crate) middle_key: K,
    pub(crate) sibling: NodeId,
    pub(crate) sibling_head: *mut NodeHeader<K>,
}

impl<K> MergeDelta<K> {
    /// The delta header.
    #[inline]
    #[must_use]
    pub const fn delta(&self) -> &DeltaHeader<K> {
        &self.delta
    }

    /// First key of the absorbed sibling's range.
    #[inline]
    #[must_use]
    pub const fn middle_key(&self) -> &K {
        &self.middle_key
    }

    /// The absorbed sibling's id.
    #[inline]
    #[must_use]
    pub const fn sibling(&self) -> NodeId {
        self.sibling
    }

    /// The absorbed sibling's chain head at install time.
    #[inline]
    #[must_use]
    pub const fn sibling_head(&self) -> *mut NodeHeader<K> {
        self.sibling_head
    }
}

/// Logical detachment: the node is gone from the tree; freeing this
/// record releases `removed` back to the mapping table.
#[repr(C)]
#[derive(Debug)]
pub struct RemoveDelta<K> {
    pub(crate) delta: DeltaHeader<K>,
    pub(crate) removed: NodeId,
}

impl<K> RemoveDelta<K> {
    /// The delta header.
    #[inline]
    #[must_use]
    pub const fn delta(&self) -> &DeltaHeader<K> {
        &self.delta
    }

    /// Id to release when this record is freed.
    #[inline]
    #[must_use]
    pub const fn removed(&self) -> NodeId {
        self.removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    /// Insert and delete of a family locate key and payload at the same
    /// offsets, so pair recovery is uniform across both kinds.
    #[test]
    fn leaf_key_value_colocation() {
        assert_eq!(
            offset_of!(LeafInsertDelta<u64, u64>, key),
            offset_of!(LeafDeleteDelta<u64, u64>, key),
        );
        assert_eq!(
            offset_of!(LeafInsertDelta<u64, u64>, value),
            offset_of!(LeafDeleteDelta<u64, u64>, value),
        );

        assert_eq!(
            offset_of!(LeafInsertDelta<u64, String>, value)
                - offset_of!(LeafInsertDelta<u64, String>, key),
            offset_of!(LeafDeleteDelta<u64, String>, value)
                - offset_of!(LeafDeleteDelta<u64, String>, key),
        );
    }

    #[test]
    fn inner_key_child_colocation() {
        assert_eq!(
            offset_of!(InnerInsertDelta<u64>, key),
            offset_of!(InnerDeleteDelta<u64>, key),
        );
        assert_eq!(
            offset_of!(InnerInsertDelta<u64>, child),
            offset_of!(InnerDeleteDelta<u64>, child),
        );
    }

    /// The key field immediately follows the delta header, and the
    /// payload immediately follows the key (modulo alignment padding).
    #[test]
    fn payload_follows_key() {
        let key_off = offset_of!(LeafInsertDelta<u64, u64>, key);
        let value_off = offset_of!(LeafInsertDelta<u64, u64>, value);
        assert_eq!(value_off - key_off, size_of::<u64>());

        let ikey_off = offset_of!(InnerInsertDelta<u64>, key);
        let child_off = offset_of!(InnerInsertDelta<u64>, child);
        assert_eq!(child_off - ikey_off, size_of::<u64>());
    }
}
