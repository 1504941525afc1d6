//! # Node Codec
//!
//! A [`Node`] owns one block-sized byte buffer and interprets it as a
//! header followed by a packed slot area. All slot arithmetic is done here;
//! the tree layer never computes a byte offset itself.
//!
//! ## Slot Area Layout
//!
//! Leaf (entry stride = key_size + value_size):
//!
//! ```text
//! | header | K0 V0 | K1 V1 | ... | K(n-1) V(n-1) | unused |
//! ```
//!
//! Root / interior (entry stride = CHILD_PTR_SIZE + key_size, one trailing
//! pointer):
//!
//! ```text
//! | header | P0 K0 | P1 K1 | ... | P(n-1) K(n-1) | Pn | unused |
//! ```
//!
//! Keys reachable through `Pi` are strictly less than `Ki`; keys reachable
//! through `P(i+1)` are greater than or equal to `Ki`.
//!
//! ## Capacity
//!
//! Derived from the block geometry, never stored:
//!
//! ```text
//! slot_area         = block_size - NODE_HEADER_SIZE
//! leaf capacity     = slot_area / (key_size + value_size)
//! interior capacity = (slot_area - CHILD_PTR_SIZE) / (key_size + CHILD_PTR_SIZE)
//! ```
//!
//! A node is full when its entry count reaches the capacity for its kind.
//!
//! ## Mutation primitives
//!
//! Insertion shifts the tail of the slot area right by one stride with
//! `copy_within`; splits bulk-copy the tail of a full node into a fresh
//! sibling. The codec keeps slots packed and bounds-checked but is unaware
//! of ordering; callers pass insertion indexes obtained from
//! [`Node::upper_bound`].

use eyre::{bail, ensure, Result};

use super::header::{NodeHeader, NodeKind};
use crate::cache::BlockCache;
use crate::config::{CHILD_PTR_SIZE, NODE_HEADER_SIZE};
use crate::error::IndexError;

/// One typed block: an owned buffer plus the codec over it.
#[derive(Debug, Clone)]
pub struct Node {
    buf: Vec<u8>,
}

impl Node {
    /// Builds a fresh node of the given kind with a zeroed slot area.
    pub fn new(
        kind: NodeKind,
        key_size: u32,
        value_size: u32,
        block_size: usize,
        root_block: u32,
    ) -> Self {
        debug_assert!(block_size > NODE_HEADER_SIZE);
        let mut buf = vec![0u8; block_size];
        let header = NodeHeader::new(kind, key_size, value_size, block_size as u32, root_block);
        header
            .write_to(&mut buf)
            .expect("block buffer holds at least a header");
        Self { buf }
    }

    /// Reads the whole block `block_no` out of the cache.
    pub fn read_from<C: BlockCache>(cache: &mut C, block_no: u32) -> Result<Self> {
        ensure!(
            cache.block_size() > NODE_HEADER_SIZE,
            "block size {} leaves no room after the {}-byte header",
            cache.block_size(),
            NODE_HEADER_SIZE
        );
        let mut buf = vec![0u8; cache.block_size()];
        cache.read_block(block_no, &mut buf)?;
        Ok(Self { buf })
    }

    /// Writes the whole block back to the cache.
    pub fn write_to<C: BlockCache>(&self, cache: &mut C, block_no: u32) -> Result<()> {
        cache.write_block(block_no, &self.buf)
    }

    pub fn header(&self) -> &NodeHeader {
        NodeHeader::from_bytes(&self.buf).unwrap() // INVARIANT: buffer length checked at construction
    }

    pub fn header_mut(&mut self) -> &mut NodeHeader {
        NodeHeader::from_bytes_mut(&mut self.buf).unwrap() // INVARIANT: buffer length checked at construction
    }

    /// Decoded node kind; an unknown on-disk value means corruption.
    pub fn kind(&self) -> Result<NodeKind> {
        let raw = self.header().raw_kind();
        NodeKind::from_u32(raw).ok_or_else(|| {
            eyre::Report::new(IndexError::Corrupt(format!("unknown node kind {:#x}", raw)))
        })
    }

    pub fn entry_count(&self) -> usize {
        self.header().entry_count() as usize
    }

    pub fn key_size(&self) -> usize {
        self.header().key_size() as usize
    }

    pub fn value_size(&self) -> usize {
        self.header().value_size() as usize
    }

    fn slot_area(&self) -> usize {
        self.buf.len() - NODE_HEADER_SIZE
    }

    /// Entries a leaf block of this geometry can hold.
    pub fn leaf_capacity(&self) -> usize {
        self.slot_area() / (self.key_size() + self.value_size())
    }

    /// Entries a root or interior block of this geometry can hold.
    pub fn interior_capacity(&self) -> usize {
        (self.slot_area() - CHILD_PTR_SIZE) / (self.key_size() + CHILD_PTR_SIZE)
    }

    /// Capacity for this node's own kind.
    pub fn capacity(&self) -> Result<usize> {
        match self.kind()? {
            NodeKind::Leaf => Ok(self.leaf_capacity()),
            NodeKind::Root | NodeKind::Interior => Ok(self.interior_capacity()),
            other => bail!(IndexError::Corrupt(format!(
                "{:?} block has no slot capacity",
                other
            ))),
        }
    }

    pub fn is_full(&self) -> Result<bool> {
        Ok(self.entry_count() >= self.capacity()?)
    }

    // Raw offsets. Bounds are enforced by the public accessors; these are
    // pure stride arithmetic.

    fn pair_offset(&self, slot: usize) -> usize {
        NODE_HEADER_SIZE + slot * (self.key_size() + self.value_size())
    }

    fn child_offset(&self, slot: usize) -> usize {
        NODE_HEADER_SIZE + slot * (CHILD_PTR_SIZE + self.key_size())
    }

    fn separator_offset(&self, slot: usize) -> usize {
        self.child_offset(slot) + CHILD_PTR_SIZE
    }

    fn key_offset(&self, slot: usize) -> Result<usize> {
        match self.kind()? {
            NodeKind::Leaf => {
                ensure!(
                    slot < self.leaf_capacity(),
                    "key slot {} out of bounds (leaf capacity {})",
                    slot,
                    self.leaf_capacity()
                );
                Ok(self.pair_offset(slot))
            }
            NodeKind::Root | NodeKind::Interior => {
                ensure!(
                    slot < self.interior_capacity(),
                    "key slot {} out of bounds (interior capacity {})",
                    slot,
                    self.interior_capacity()
                );
                Ok(self.separator_offset(slot))
            }
            other => bail!(IndexError::Corrupt(format!(
                "{:?} block has no key slots",
                other
            ))),
        }
    }

    pub fn key_at(&self, slot: usize) -> Result<&[u8]> {
        let off = self.key_offset(slot)?;
        Ok(&self.buf[off..off + self.key_size()])
    }

    pub fn set_key(&mut self, slot: usize, key: &[u8]) -> Result<()> {
        ensure!(
            key.len() == self.key_size(),
            "key is {} bytes, index keys are {}",
            key.len(),
            self.key_size()
        );
        let off = self.key_offset(slot)?;
        self.buf[off..off + key.len()].copy_from_slice(key);
        Ok(())
    }

    pub fn value_at(&self, slot: usize) -> Result<&[u8]> {
        ensure!(
            self.kind()? == NodeKind::Leaf,
            "values live in leaf blocks only"
        );
        ensure!(
            slot < self.leaf_capacity(),
            "value slot {} out of bounds (leaf capacity {})",
            slot,
            self.leaf_capacity()
        );
        let off = self.pair_offset(slot) + self.key_size();
        Ok(&self.buf[off..off + self.value_size()])
    }

    pub fn set_value(&mut self, slot: usize, value: &[u8]) -> Result<()> {
        ensure!(
            self.kind()? == NodeKind::Leaf,
            "values live in leaf blocks only"
        );
        ensure!(
            value.len() == self.value_size(),
            "value is {} bytes, index values are {}",
            value.len(),
            self.value_size()
        );
        ensure!(
            slot < self.leaf_capacity(),
            "value slot {} out of bounds (leaf capacity {})",
            slot,
            self.leaf_capacity()
        );
        let off = self.pair_offset(slot) + self.key_size();
        self.buf[off..off + value.len()].copy_from_slice(value);
        Ok(())
    }

    fn child_offset_checked(&self, slot: usize) -> Result<usize> {
        match self.kind()? {
            NodeKind::Root | NodeKind::Interior => {
                // An interior node with k keys carries k + 1 pointers, so the
                // pointer index may reach the key capacity itself.
                ensure!(
                    slot <= self.interior_capacity(),
                    "child slot {} out of bounds (interior capacity {})",
                    slot,
                    self.interior_capacity()
                );
                Ok(self.child_offset(slot))
            }
            other => bail!(IndexError::Corrupt(format!(
                "{:?} block has no child pointers",
                other
            ))),
        }
    }

    pub fn child_at(&self, slot: usize) -> Result<u32> {
        let off = self.child_offset_checked(slot)?;
        let raw: [u8; CHILD_PTR_SIZE] = self.buf[off..off + CHILD_PTR_SIZE].try_into().unwrap(); // INVARIANT: slice length fixed above
        Ok(u32::from_le_bytes(raw))
    }

    pub fn set_child(&mut self, slot: usize, block_no: u32) -> Result<()> {
        let off = self.child_offset_checked(slot)?;
        self.buf[off..off + CHILD_PTR_SIZE].copy_from_slice(&block_no.to_le_bytes());
        Ok(())
    }

    /// First slot whose key is strictly greater than `key`, else the entry
    /// count. Doubles as the routing index (descend through the child at
    /// this slot) and the insertion index.
    pub fn upper_bound(&self, key: &[u8]) -> Result<usize> {
        let n = self.entry_count();
        for slot in 0..n {
            if key < self.key_at(slot)? {
                return Ok(slot);
            }
        }
        Ok(n)
    }

    /// Exact-match scan of a leaf. Keys are sorted, so the scan stops at
    /// the first larger key.
    pub fn find_pair(&self, key: &[u8]) -> Result<Option<usize>> {
        ensure!(
            self.kind()? == NodeKind::Leaf,
            "pair lookup on a non-leaf block"
        );
        for slot in 0..self.entry_count() {
            let stored = self.key_at(slot)?;
            if stored == key {
                return Ok(Some(slot));
            }
            if stored > key {
                break;
            }
        }
        Ok(None)
    }

    /// Inserts a key/value pair at `slot`, shifting later pairs right.
    pub fn insert_pair(&mut self, slot: usize, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(
            self.kind()? == NodeKind::Leaf,
            "pair insert on a non-leaf block"
        );
        let n = self.entry_count();
        ensure!(n < self.leaf_capacity(), "leaf block has no free slot");
        ensure!(slot <= n, "pair insert at slot {} past entry count {}", slot, n);

        if slot < n {
            let stride = self.key_size() + self.value_size();
            let src = self.pair_offset(slot);
            self.buf
                .copy_within(src..src + (n - slot) * stride, src + stride);
        }
        self.set_key(slot, key)?;
        self.set_value(slot, value)?;
        self.header_mut().set_entry_count(n as u32 + 1);
        Ok(())
    }

    /// Inserts a separator key at `slot` with the pointer to its right-hand
    /// subtree at `slot + 1`, shifting later slots right.
    pub fn insert_separator(&mut self, slot: usize, key: &[u8], right_child: u32) -> Result<()> {
        let kind = self.kind()?;
        ensure!(
            matches!(kind, NodeKind::Root | NodeKind::Interior),
            "separator insert on a {:?} block",
            kind
        );
        let n = self.entry_count();
        ensure!(
            n < self.interior_capacity(),
            "interior block has no free slot"
        );
        ensure!(
            slot <= n,
            "separator insert at slot {} past entry count {}",
            slot,
            n
        );

        if slot < n {
            // Moves K(slot)..K(n-1) and P(slot+1)..P(n) one stride right in
            // a single pass over the interleaved layout.
            let stride = CHILD_PTR_SIZE + self.key_size();
            let src = self.separator_offset(slot);
            self.buf
                .copy_within(src..src + (n - slot) * stride, src + stride);
        }
        self.set_key(slot, key)?;
        self.set_child(slot + 1, right_child)?;
        self.header_mut().set_entry_count(n as u32 + 1);
        Ok(())
    }

    /// Moves the upper half of a leaf into `right` and returns the
    /// separator for the parent: the smallest key of the right half, so
    /// that every key below the left pointer stays strictly smaller.
    pub fn split_leaf_into(&mut self, right: &mut Node) -> Result<Vec<u8>> {
        ensure!(self.kind()? == NodeKind::Leaf, "leaf split of a non-leaf");
        ensure!(
            right.kind()? == NodeKind::Leaf,
            "leaf split into a non-leaf"
        );
        let n = self.entry_count();
        ensure!(n >= 3, "split of a leaf with {} entries", n);

        let left_count = (n + 2) / 2;
        let right_count = n - left_count;
        let separator = self.key_at(left_count)?.to_vec();

        let stride = self.key_size() + self.value_size();
        let src = self.pair_offset(left_count);
        let dst = right.pair_offset(0);
        right.buf[dst..dst + right_count * stride]
            .copy_from_slice(&self.buf[src..src + right_count * stride]);

        self.header_mut().set_entry_count(left_count as u32);
        right.header_mut().set_entry_count(right_count as u32);
        Ok(separator)
    }

    /// Moves the upper half of a root or interior node into `right` and
    /// returns the promoted separator, which remains in neither half.
    pub fn split_interior_into(&mut self, right: &mut Node) -> Result<Vec<u8>> {
        ensure!(
            matches!(self.kind()?, NodeKind::Root | NodeKind::Interior),
            "interior split of a non-interior block"
        );
        ensure!(
            matches!(right.kind()?, NodeKind::Root | NodeKind::Interior),
            "interior split into a non-interior block"
        );
        let n = self.entry_count();
        ensure!(n >= 3, "split of an interior node with {} entries", n);

        let left_count = n / 2;
        let right_count = n - left_count - 1;
        let separator = self.key_at(left_count)?.to_vec();

        // P(left_count+1) K(left_count+1) ... K(n-1) P(n): the entries to
        // the right of the promoted key, plus the trailing pointer.
        let stride = CHILD_PTR_SIZE + self.key_size();
        let src = self.child_offset(left_count + 1);
        let dst = right.child_offset(0);
        let len = right_count * stride + CHILD_PTR_SIZE;
        right.buf[dst..dst + len].copy_from_slice(&self.buf[src..src + len]);

        self.header_mut().set_entry_count(left_count as u32);
        right.header_mut().set_entry_count(right_count as u32);
        Ok(separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(block_size: usize) -> Node {
        Node::new(NodeKind::Leaf, 4, 4, block_size, 1)
    }

    fn interior(block_size: usize) -> Node {
        Node::new(NodeKind::Interior, 4, 4, block_size, 1)
    }

    #[test]
    fn capacity_formulas_match_the_layout() {
        let node = leaf(128);
        // (128 - 28) / (4 + 4)
        assert_eq!(node.leaf_capacity(), 12);
        // (128 - 28 - 4) / (4 + 4)
        assert_eq!(node.interior_capacity(), 12);

        let node = leaf(256);
        assert_eq!(node.leaf_capacity(), 28);
        assert_eq!(node.interior_capacity(), 28);
    }

    #[test]
    fn pairs_insert_in_order_with_shifting() {
        let mut node = leaf(128);

        node.insert_pair(0, b"cccc", b"3333").unwrap();
        node.insert_pair(0, b"aaaa", b"1111").unwrap();
        node.insert_pair(1, b"bbbb", b"2222").unwrap();

        assert_eq!(node.entry_count(), 3);
        assert_eq!(node.key_at(0).unwrap(), b"aaaa");
        assert_eq!(node.key_at(1).unwrap(), b"bbbb");
        assert_eq!(node.key_at(2).unwrap(), b"cccc");
        assert_eq!(node.value_at(1).unwrap(), b"2222");
    }

    #[test]
    fn upper_bound_routes_by_strict_comparison() {
        let mut node = leaf(128);
        node.insert_pair(0, b"bbbb", b"2222").unwrap();
        node.insert_pair(1, b"dddd", b"4444").unwrap();

        assert_eq!(node.upper_bound(b"aaaa").unwrap(), 0);
        assert_eq!(node.upper_bound(b"bbbb").unwrap(), 1);
        assert_eq!(node.upper_bound(b"cccc").unwrap(), 1);
        assert_eq!(node.upper_bound(b"dddd").unwrap(), 2);
        assert_eq!(node.upper_bound(b"eeee").unwrap(), 2);
    }

    #[test]
    fn find_pair_is_exact() {
        let mut node = leaf(128);
        node.insert_pair(0, b"bbbb", b"2222").unwrap();

        assert_eq!(node.find_pair(b"bbbb").unwrap(), Some(0));
        assert_eq!(node.find_pair(b"aaaa").unwrap(), None);
        assert_eq!(node.find_pair(b"cccc").unwrap(), None);
    }

    #[test]
    fn separators_interleave_with_child_pointers() {
        let mut node = interior(128);
        node.set_child(0, 7).unwrap();
        node.insert_separator(0, b"mmmm", 8).unwrap();
        node.insert_separator(1, b"tttt", 9).unwrap();

        assert_eq!(node.entry_count(), 2);
        assert_eq!(node.child_at(0).unwrap(), 7);
        assert_eq!(node.key_at(0).unwrap(), b"mmmm");
        assert_eq!(node.child_at(1).unwrap(), 8);
        assert_eq!(node.key_at(1).unwrap(), b"tttt");
        assert_eq!(node.child_at(2).unwrap(), 9);
    }

    #[test]
    fn separator_insert_in_the_middle_keeps_the_tail() {
        let mut node = interior(128);
        node.set_child(0, 10).unwrap();
        node.insert_separator(0, b"bbbb", 11).unwrap();
        node.insert_separator(1, b"dddd", 13).unwrap();

        // bbbb < cccc < dddd: the new right-hand child lands between.
        node.insert_separator(1, b"cccc", 12).unwrap();

        assert_eq!(node.child_at(0).unwrap(), 10);
        assert_eq!(node.key_at(0).unwrap(), b"bbbb");
        assert_eq!(node.child_at(1).unwrap(), 11);
        assert_eq!(node.key_at(1).unwrap(), b"cccc");
        assert_eq!(node.child_at(2).unwrap(), 12);
        assert_eq!(node.key_at(2).unwrap(), b"dddd");
        assert_eq!(node.child_at(3).unwrap(), 13);
    }

    #[test]
    fn leaf_split_keeps_the_bigger_left_half() {
        let mut node = leaf(128);
        for (i, key) in [b"aaaa", b"bbbb", b"cccc", b"dddd", b"eeee"]
            .iter()
            .enumerate()
        {
            node.insert_pair(i, *key, b"0000").unwrap();
        }

        let mut right = leaf(128);
        let separator = node.split_leaf_into(&mut right).unwrap();

        // 5 entries: 3 stay left, 2 move right, separator is the first
        // right-hand key so lookups of it descend right.
        assert_eq!(node.entry_count(), 3);
        assert_eq!(right.entry_count(), 2);
        assert_eq!(separator, b"dddd");
        assert_eq!(node.key_at(2).unwrap(), b"cccc");
        assert_eq!(right.key_at(0).unwrap(), b"dddd");
        assert_eq!(right.key_at(1).unwrap(), b"eeee");
    }

    #[test]
    fn interior_split_promotes_the_middle_key() {
        let mut node = interior(128);
        node.set_child(0, 100).unwrap();
        for (i, key) in [b"bbbb", b"dddd", b"ffff", b"hhhh", b"jjjj"]
            .iter()
            .enumerate()
        {
            node.insert_separator(i, *key, 101 + i as u32).unwrap();
        }

        let mut right = interior(128);
        let separator = node.split_interior_into(&mut right).unwrap();

        // 5 separators: 2 stay left, 2 move right, the middle one is
        // promoted and kept by neither half.
        assert_eq!(separator, b"ffff");
        assert_eq!(node.entry_count(), 2);
        assert_eq!(right.entry_count(), 2);
        assert_eq!(node.key_at(0).unwrap(), b"bbbb");
        assert_eq!(node.key_at(1).unwrap(), b"dddd");
        assert_eq!(node.child_at(2).unwrap(), 102);
        assert_eq!(right.child_at(0).unwrap(), 103);
        assert_eq!(right.key_at(0).unwrap(), b"hhhh");
        assert_eq!(right.key_at(1).unwrap(), b"jjjj");
        assert_eq!(right.child_at(2).unwrap(), 105);
    }

    #[test]
    fn accessors_reject_out_of_range_slots() {
        let node = leaf(128);
        assert!(node.key_at(12).is_err());
        assert!(node.value_at(12).is_err());

        let node = interior(128);
        assert!(node.child_at(13).is_err());
        // The trailing pointer slot is legal.
        assert!(node.child_at(12).is_ok());
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut node = interior(128);
        assert!(node.insert_pair(0, b"aaaa", b"1111").is_err());
        assert!(node.value_at(0).is_err());

        let mut node = leaf(128);
        assert!(node.insert_separator(0, b"aaaa", 2).is_err());
        assert!(node.child_at(0).is_err());
    }

    #[test]
    fn unknown_kind_reads_as_corrupt() {
        let mut node = leaf(128);
        node.buf[0] = 0x7F;

        let err = node.kind().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::IndexError>(),
            Some(crate::error::IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn full_leaf_rejects_further_pairs() {
        let mut node = leaf(128);
        for i in 0..node.leaf_capacity() {
            let key = format!("k{:03}", i);
            node.insert_pair(i, key.as_bytes(), b"0000").unwrap();
        }
        assert!(node.is_full().unwrap());

        let err = node.insert_pair(0, b"zzzz", b"0000").unwrap_err();
        assert!(err.to_string().contains("no free slot"));
    }
}
