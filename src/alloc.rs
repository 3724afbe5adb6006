//! Filepath: src/alloc.rs
//!
//! Per-base delta allocation.
//!
//! Every base node embeds a [`DeltaAllocator`]; all deltas layered above
//! that base are created and destroyed through it. Keeping the allocator
//! per-base means frees never contend globally, and discarding a whole
//! chain reduces to walking it once and dropping the base.
//!
//! The default implementation delegates to the global allocator via
//! `Box::into_raw`, which keeps pointer provenance clean. When
//! accounting is enabled (the `debug_assertions` config knob) the
//! allocator additionally tracks the address of every live delta, so a
//! destroy routed through the wrong base, a double destroy, or a leaked
//! delta all fault instead of corrupting memory.

use std::collections::HashSet;
use std::sync::atomic::AtomicIsize;

use parking_lot::Mutex;

use crate::ordering::RELAXED;
use crate::tracing_helpers::{error_log, warn_log};

/// Arena front-end owned by a single base node.
#[derive(Debug)]
pub struct DeltaAllocator {
    /// Live allocation count; meaningful only with accounting on.
    outstanding: AtomicIsize,

    /// Addresses of live deltas, kept only when accounting.
    live: Option<Mutex<HashSet<usize>>>,
}

impl DeltaAllocator {
    /// Create an allocator, optionally with live-pointer accounting.
    #[must_use]
    pub(crate) fn new(accounting: bool) -> Self {
        Self {
            outstanding: AtomicIsize::new(0),
            live: accounting.then(|| Mutex::new(HashSet::new())),
        }
    }

    /// Whether this allocator tracks live deltas.
    #[inline]
    #[must_use]
    pub fn accounting(&self) -> bool {
        self.live.is_some()
    }

    /// Number of deltas currently allocated and not yet destroyed.
    /// Always 0 when accounting is off.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> isize {
        self.outstanding.load(RELAXED)
    }

    /// Move `record` to the heap and hand back an owning raw pointer.
    ///
    /// The pointer stays valid until passed to [`Self::destroy`] on this
    /// same allocator.
    pub(crate) fn create<T>(&self, record: T) -> *mut T {
        let ptr: *mut T = Box::into_raw(Box::new(record));

        if let Some(live) = &self.live {
            self.outstanding.fetch_add(1, RELAXED);
            live.lock().insert(ptr as usize);
        }

        ptr
    }

    /// Destroy a record previously returned by [`Self::create`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `create::<T>` on this allocator and must not
    /// have been destroyed already.
    pub(crate) unsafe fn destroy<T>(&self, ptr: *mut T) {
        if let Some(live) = &self.live {
            let known: bool = live.lock().remove(&(ptr as usize));
            if !known {
                warn_log!("delta destroyed through a foreign base allocator");
            }
            debug_assert!(known, "delta destroyed through a foreign base allocator");
            self.outstanding.fetch_sub(1, RELAXED);
        }

        // SAFETY: caller guarantees `ptr` came from `create` (Box::into_raw)
        // and has not been freed.
        unsafe { drop(Box::from_raw(ptr)) };
    }
}

impl Drop for DeltaAllocator {
    fn drop(&mut self) {
        // Skip the check while unwinding; a panic elsewhere should not
        // cascade into an abort here.
        if self.live.is_some() && !std::thread::panicking() {
            let outstanding: isize = self.outstanding();
            if outstanding != 0 {
                error_log!(outstanding, "base dropped with live deltas outstanding");
            }
            debug_assert_eq!(outstanding, 0, "base dropped with live deltas outstanding");
        }
    }
}
