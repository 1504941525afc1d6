//! # Node Header Layout
//!
//! Every block begins with the same 28-byte packed header, whatever its
//! role. All multi-byte fields are little-endian u32, read and written
//! in place with zerocopy.
//!
//! ## Header Layout (28 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       4     kind         Node kind (free, superblock, root, ...)
//! 4       4     key_size     Bytes per key
//! 8       4     value_size   Bytes per value
//! 12      4     block_size   Bytes per block
//! 16      4     root_block   Root block id as of this node's creation
//! 20      4     free_next    Next free block (free blocks only; 0 ends
//!                            the list). On the superblock: list head.
//! 24      4     entry_count  Keys in this node. On the superblock:
//!                            total keys across all leaves.
//! ```
//!
//! The kind occupies a full u32 on disk even though one byte would do;
//! the widening keeps every field the same width and the offsets trivial.
//!
//! Two fields are overloaded by role rather than given separate layouts:
//! the superblock stores the free-list head in `free_next` and the live
//! key total in `entry_count`, exactly where ordinary nodes keep their
//! own link and count. One header codec therefore serves every block.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::NODE_HEADER_SIZE;

/// Role of a block, stored widened to u32 in the header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// On the free list, not part of the tree.
    Unallocated = 0x00,
    /// Block 0: index-wide metadata.
    Superblock = 0x01,
    /// The single top node of the tree. Routes like an interior node.
    Root = 0x02,
    /// Internal routing node below the root.
    Interior = 0x03,
    /// Bottom node holding key/value pairs.
    Leaf = 0x04,
}

impl NodeKind {
    /// Decodes the on-disk kind field. Unknown values mean a corrupt block.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x00 => Some(NodeKind::Unallocated),
            0x01 => Some(NodeKind::Superblock),
            0x02 => Some(NodeKind::Root),
            0x03 => Some(NodeKind::Interior),
            0x04 => Some(NodeKind::Leaf),
            _ => None,
        }
    }

    /// True for the kinds that participate in the tree walk.
    pub fn is_tree_node(self) -> bool {
        matches!(self, NodeKind::Root | NodeKind::Interior | NodeKind::Leaf)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NodeHeader {
    kind: U32,
    key_size: U32,
    value_size: U32,
    block_size: U32,
    root_block: U32,
    free_next: U32,
    entry_count: U32,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

impl NodeHeader {
    pub fn new(
        kind: NodeKind,
        key_size: u32,
        value_size: u32,
        block_size: u32,
        root_block: u32,
    ) -> Self {
        Self {
            kind: U32::new(kind as u32),
            key_size: U32::new(key_size),
            value_size: U32::new(value_size),
            block_size: U32::new(block_size),
            root_block: U32::new(root_block),
            free_next: U32::new(0),
            entry_count: U32::new(0),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );
        Self::ref_from_bytes(&data[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );
        Self::mut_from_bytes(&mut data[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );
        data[..NODE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn raw_kind(&self) -> u32 {
        self.kind.get()
    }

    pub fn kind(&self) -> Option<NodeKind> {
        NodeKind::from_u32(self.kind.get())
    }

    pub fn set_kind(&mut self, kind: NodeKind) {
        self.kind = U32::new(kind as u32);
    }

    pub fn key_size(&self) -> u32 {
        self.key_size.get()
    }

    pub fn value_size(&self) -> u32 {
        self.value_size.get()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size.get()
    }

    pub fn root_block(&self) -> u32 {
        self.root_block.get()
    }

    pub fn set_root_block(&mut self, block_no: u32) {
        self.root_block = U32::new(block_no);
    }

    pub fn free_next(&self) -> u32 {
        self.free_next.get()
    }

    pub fn set_free_next(&mut self, block_no: u32) {
        self.free_next = U32::new(block_no);
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count.get()
    }

    pub fn set_entry_count(&mut self, count: u32) {
        self.entry_count = U32::new(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_28() {
        assert_eq!(std::mem::size_of::<NodeHeader>(), 28);
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let mut header = NodeHeader::new(NodeKind::Leaf, 8, 16, 512, 1);
        header.set_entry_count(9);
        header.set_free_next(42);

        let mut buf = [0u8; 64];
        header.write_to(&mut buf).unwrap();
        let parsed = NodeHeader::from_bytes(&buf).unwrap();

        assert_eq!(parsed.kind(), Some(NodeKind::Leaf));
        assert_eq!(parsed.key_size(), 8);
        assert_eq!(parsed.value_size(), 16);
        assert_eq!(parsed.block_size(), 512);
        assert_eq!(parsed.root_block(), 1);
        assert_eq!(parsed.free_next(), 42);
        assert_eq!(parsed.entry_count(), 9);
    }

    #[test]
    fn fields_are_little_endian() {
        let header = NodeHeader::new(NodeKind::Root, 0x0102_0304, 0, 0, 0);
        let bytes = header.as_bytes();

        assert_eq!(bytes[0], NodeKind::Root as u8);
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn unknown_kind_decodes_to_none() {
        assert_eq!(NodeKind::from_u32(0x05), None);
        assert_eq!(NodeKind::from_u32(0xFF), None);
    }

    #[test]
    fn zeroed_header_is_an_unallocated_block() {
        let buf = [0u8; NODE_HEADER_SIZE];
        let parsed = NodeHeader::from_bytes(&buf).unwrap();

        assert_eq!(parsed.kind(), Some(NodeKind::Unallocated));
        assert_eq!(parsed.free_next(), 0);
    }

    #[test]
    fn from_bytes_rejects_short_buffer() {
        let buf = [0u8; 16];
        assert!(NodeHeader::from_bytes(&buf).is_err());
    }
}
