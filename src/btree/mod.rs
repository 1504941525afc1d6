//! # B-Tree Index Implementation
//!
//! A disk-resident B-Tree mapping fixed-width keys to fixed-width values.
//! Every node occupies exactly one block behind the [`crate::cache`] layer
//! and is addressed by its stable block id; all mutation is read-modify-
//! write of whole blocks.
//!
//! ## Node kinds
//!
//! - **Superblock**: block 0. Geometry, current root block, free-list
//!   head, live key total.
//! - **Root**: the single top node. Routes exactly like an interior node;
//!   when it fills, the tree grows a level and a fresh block takes over as
//!   root.
//! - **Interior**: separator keys interleaved with child pointers,
//!   `P0 K0 P1 K1 ... Pn`. Keys below `Pi` are strictly less than `Ki`,
//!   keys below `P(i+1)` are greater or equal.
//! - **Leaf**: packed key/value pairs in ascending key order.
//! - **Unallocated**: on the free list, linked through the header.
//!
//! ## Module map
//!
//! - [`header`]: the 28-byte packed node header and [`header::NodeKind`]
//! - [`node`]: the block codec — slot accessors, capacity arithmetic,
//!   insertion shifts and split byte moves
//! - [`alloc`]: the free-list allocator over the superblock
//! - [`tree`]: [`BTreeIndex`] itself — attach, search, insert, update
//! - [`display`]: depth-first, graphviz and sorted-pair emitters
//! - [`check`]: the structural verifier

mod alloc;
mod check;
mod display;
mod header;
mod node;
mod tree;

pub use check::{CheckOptions, OccupancyFloor};
pub use display::DisplayStyle;
pub use header::{NodeHeader, NodeKind};
pub use node::Node;
pub use tree::BTreeIndex;
