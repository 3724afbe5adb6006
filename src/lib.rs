//! # Bw-tree core
//!
//! A latch-free, ordered key-value index building block for multi-core
//! hardware.
//!
//! Every logical node is a *delta chain*: a singly-linked run of small
//! update records ending in a consolidated *base node*. Nodes are
//! addressed through a [`MappingTable`] of atomic head pointers, so an
//! update is one record allocation plus one compare-and-swap; no node is
//! ever written in place.
//!
//! ## Design
//!
//! - Writers build a delta above the head they observed and CAS it in
//!   ([`ChainAppender`]). Losing a race hands the private record back.
//! - Readers snapshot a head and fold the chain through a visitor
//!   ([`ChainVisitor`] / [`walk_chain`]), descending recursively through
//!   merge records.
//! - Once a chain grows past the configured height, a writer folds it
//!   into a fresh base ([`consolidate_leaf`] / [`consolidate_inner`]),
//!   installs it, and retires the old chain ([`ChainCollector`]).
//! - Each base owns the arena for the deltas above it; freeing a
//!   detached chain walks it once (`free`) and drops the base.
//!
//! The outer tree — traversal, split/merge orchestration, retry policy —
//! is a separate layer built on these parts.

pub mod alloc;
pub mod append;
pub mod base;
pub mod bound;
pub mod config;
pub mod consolidate;
pub mod delta;
pub mod free;
pub mod mapping;
pub mod node;
pub mod ordering;
pub mod reclaim;
pub mod traverse;

mod tracing_helpers;

pub use append::{AppendLoss, ChainAppender};
pub use base::{BaseNode, InnerBase};
pub use bound::Bound;
pub use config::{BwTreeConfig, ConfigError};
pub use consolidate::{consolidate_inner, consolidate_leaf, needs_consolidation};
pub use free::{release_inner_chain, release_leaf_chain};
pub use mapping::{MappingTable, NodeId, INVALID_NODE_ID};
pub use node::{NodeHeader, NodeKind};
pub use reclaim::ChainCollector;
pub use traverse::{walk_chain, ChainVisitor, Step};
