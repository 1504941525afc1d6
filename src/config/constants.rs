//! # Layout Constants
//!
//! This module centralizes the on-block layout constants. Constants that
//! depend on each other are co-located and guarded by compile-time
//! assertions so a change to one cannot silently invalidate another.
//!
//! ## Dependency notes
//!
//! ```text
//! NODE_HEADER_SIZE (28 bytes)
//!       │
//!       └─> slot area of a block = block_size - NODE_HEADER_SIZE
//!             Leaf capacity     = slot_area / (key_size + value_size)
//!             Interior capacity = (slot_area - CHILD_PTR_SIZE)
//!                                   / (key_size + CHILD_PTR_SIZE)
//!
//! CHILD_PTR_SIZE (4 bytes)
//!       │
//!       └─> block ids are u32; an interior node with k keys carries
//!           k + 1 child pointers interleaved with the keys
//!
//! SUPERBLOCK_NO (0) and FREE_LIST_END (0)
//!       Block 0 always holds the superblock, so 0 can double as the
//!       free-list terminator: no free-list link can legally point at it.
//! ```

/// Size in bytes of the packed header at the start of every block.
///
/// Seven little-endian u32 fields: kind, key size, value size, block size,
/// root block, free-list link, entry count.
pub const NODE_HEADER_SIZE: usize = 28;

/// Width in bytes of a child pointer (a u32 block id).
pub const CHILD_PTR_SIZE: usize = 4;

/// Block id of the superblock.
pub const SUPERBLOCK_NO: u32 = 0;

/// Free-list terminator. Block 0 is the superblock and can never appear on
/// the free list, so 0 is unambiguous as the end-of-list sentinel.
pub const FREE_LIST_END: u32 = 0;

/// Minimum number of blocks a cache must expose: the superblock and the
/// initial root.
pub const MIN_BLOCK_COUNT: u32 = 2;

/// Minimum per-kind slot capacity accepted at index creation.
///
/// The split arithmetic divides a full node into two non-empty halves; with
/// fewer than four slots a full node could split into an empty half.
pub const MIN_NODE_SLOTS: usize = 4;

/// Default block size for the shell when none is given.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

const _: () = assert!(
    FREE_LIST_END == SUPERBLOCK_NO,
    "the free-list sentinel relies on block 0 being the superblock"
);

const _: () = assert!(
    DEFAULT_BLOCK_SIZE.is_power_of_two(),
    "block sizes must be powers of two"
);

const _: () = assert!(
    DEFAULT_BLOCK_SIZE > NODE_HEADER_SIZE + CHILD_PTR_SIZE,
    "default block size leaves no slot area"
);
