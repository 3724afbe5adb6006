//! Filepath: src/tracing_helpers.rs
//!
//! Logging shims for the optional `tracing` feature.
//!
//! All instrumentation in this crate goes through the four macros below.
//! With the `tracing` feature enabled they forward to the matching
//! `tracing` level; in a default build every call site expands to
//! nothing, so the CAS and traversal paths carry no logging cost.
//!
//! Contention is deliberately not instrumented: a lost CAS is an
//! expected outcome handed back to the caller, not an event. What does
//! get logged: id allocation and structure modifications (`trace`),
//! consolidation results (`debug`), and allocator accounting violations
//! (`warn` / `error`).
//!
//! ```bash
//! RUST_LOG=bwtree=debug cargo test --features tracing
//! ```

#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => { tracing::trace!($($arg)*) };
}

#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) };
}

#[cfg(feature = "tracing")]
macro_rules! error_log {
    ($($arg:tt)*) => { tracing::error!($($arg)*) };
}

// Default build: every level vanishes, arguments are never evaluated.

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! error_log {
    ($($arg:tt)*) => {};
}

pub(crate) use trace_log;
pub(crate) use debug_log;
pub(crate) use warn_log;
pub(crate) use error_log;
