//! Standard memory orderings for mapping-table access.
//!
//! These constants ensure consistent ordering usage across the codebase
//! and make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for reading a chain head from a mapping-table slot.
/// Pairs with the installing writer's Release/AcqRel stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for publishing a head pointer outside the CAS path
/// (`allocate`, `release`, `reset`).
/// Pairs with readers' Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for a successful head CAS.
/// Releases the new head's initializing writes to subsequent loaders.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for a failed head CAS.
/// Only needs to observe the current head.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for the id allocation counter bump.
/// The slot store that follows carries the Release.
pub const ID_ALLOC: Ordering = Ordering::Relaxed;

/// Ordering for relaxed counter reads (accounting, introspection).
pub const RELAXED: Ordering = Ordering::Relaxed;
