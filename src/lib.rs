//! # blocktree - Block-Resident B-Tree Index
//!
//! A persistent associative map from fixed-width keys to fixed-width
//! values, stored in uniformly sized blocks behind a pluggable buffer
//! cache. Every tree node occupies exactly one block; every mutation is a
//! read-modify-write of whole blocks, so the index composes with any cache
//! that can move blocks in and out.
//!
//! ## Quick Start
//!
//! ```ignore
//! use blocktree::{BTreeIndex, MemoryCache};
//!
//! let cache = MemoryCache::new(4096, 1024)?;
//! let mut index = BTreeIndex::create(cache, 8, 16)?;
//!
//! index.insert(b"00000001", b"first item cache")?;
//! assert_eq!(index.lookup(b"00000001")?, Some(b"first item cache".to_vec()));
//! index.update(b"00000001", b"rewritten inline")?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Shell (bin/blocktree, rustyline)  │
//! ├─────────────────────────────────────┤
//! │   BTreeIndex                        │
//! │   search / insert / update          │
//! │   display / sanity check            │
//! ├──────────────────┬──────────────────┤
//! │   Node codec     │  Free-list       │
//! │   (slot layout)  │  allocator       │
//! ├──────────────────┴──────────────────┤
//! │   BlockCache trait                  │
//! │   MemoryCache  │  MmapCache         │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Contract
//!
//! - Keys and values are opaque byte strings of the width fixed at
//!   creation; keys compare lexicographically.
//! - Duplicate keys are rejected ([`IndexError::KeyExists`]); `update`
//!   rewrites values in place and never changes the structure.
//! - Deletion is not supported in this version.
//! - Single-threaded: the cache serializes block access, nothing here
//!   locks. Crash atomicity is a journaling concern above this layer.
//!
//! ## Module Overview
//!
//! - [`btree`]: node layout, allocator, search and mutation engine
//! - [`cache`]: the block cache trait and its two backends
//! - [`config`]: on-block layout constants
//! - [`error`]: the typed [`IndexError`] contract

pub mod btree;
pub mod cache;
pub mod config;
pub mod error;

pub use btree::{BTreeIndex, CheckOptions, DisplayStyle, NodeKind, OccupancyFloor};
pub use cache::{BlockCache, MemoryCache, MmapCache};
pub use error::IndexError;
