//! # B-Tree Index
//!
//! [`BTreeIndex`] ties the node codec and the allocator to a block cache.
//! Every operation is a sequence of whole-block reads and writes; nothing
//! is pinned across calls, the cache is responsible for making re-reads
//! cheap.
//!
//! ## Block 0 and the superblock
//!
//! Block 0 always holds the superblock: the index geometry, the current
//! root block, the free-list head and the live key total. The in-memory
//! copy held by the index is written through on every change that matters
//! (allocation, root growth, key count).
//!
//! ## Insert protocol
//!
//! The first ever insert seeds the root: two fresh leaves are allocated
//! and the root receives the key as its single router entry, so the pair
//! itself then lands in the proper leaf through the ordinary path.
//!
//! The ordinary path descends recursively. Placement at each level reports
//! back a tagged outcome: either `Done`, or `Split` carrying the new
//! sibling and the separator the caller must absorb. A node that fills up
//! splits itself on the way back out, so at rest no node below the root
//! stays full — with one deliberate exception: when the free list cannot
//! supply a block for the split, the entry (already placed and counted)
//! stays put, the node is left at capacity, and the next descent through
//! it makes room first. A full root grows the tree by one level; the old
//! root is relabeled interior and a fresh block becomes the root, so the
//! root keeps no fixed block id but the superblock always knows it.
//!
//! ## Failure model
//!
//! Out-of-space is reported before anything observable changes: multi-block
//! setups (seeding, growth) roll their allocations back through the free
//! list, and deferred splits mutate nothing when allocation fails. An I/O
//! error in the middle of a split, by contrast, leaves the structure
//! undefined; crash atomicity belongs to a journaling layer above this one.

use eyre::{bail, ensure, Result};
use log::{debug, trace};

use super::header::NodeKind;
use super::node::Node;
use crate::cache::BlockCache;
use crate::config::{MIN_BLOCK_COUNT, MIN_NODE_SLOTS, SUPERBLOCK_NO};
use crate::error::{is_no_space, IndexError};

/// Result of placing an entry in a subtree: either the subtree absorbed it,
/// or it split and the parent must take the separator and the new sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InsertOutcome {
    Done,
    Split { separator: Vec<u8>, new_block: u32 },
}

/// A disk-resident B-Tree over fixed-width keys and values.
#[derive(Debug)]
pub struct BTreeIndex<C: BlockCache> {
    pub(crate) cache: C,
    pub(crate) superblock: Node,
}

impl<C: BlockCache> BTreeIndex<C> {
    /// Formats the cache as a fresh, empty index: block 0 becomes the
    /// superblock, block 1 the empty root, and every remaining block is
    /// chained onto the free list.
    pub fn create(mut cache: C, key_size: u32, value_size: u32) -> Result<Self> {
        let block_size = cache.block_size();
        let block_count = cache.block_count();

        ensure!(key_size > 0, "key size must be non-zero");
        ensure!(value_size > 0, "value size must be non-zero");
        ensure!(
            block_count >= MIN_BLOCK_COUNT,
            "cache holds {} blocks, an index needs at least {}",
            block_count,
            MIN_BLOCK_COUNT
        );

        let root_no = SUPERBLOCK_NO + 1;
        let probe = Node::new(NodeKind::Leaf, key_size, value_size, block_size, root_no);
        ensure!(
            probe.leaf_capacity() >= MIN_NODE_SLOTS,
            "a {}-byte block holds only {} pairs of {}-byte keys and {}-byte values, minimum is {}",
            block_size,
            probe.leaf_capacity(),
            key_size,
            value_size,
            MIN_NODE_SLOTS
        );
        ensure!(
            probe.interior_capacity() >= MIN_NODE_SLOTS,
            "a {}-byte block holds only {} separators of {}-byte keys, minimum is {}",
            block_size,
            probe.interior_capacity(),
            key_size,
            MIN_NODE_SLOTS
        );

        let mut superblock = Node::new(
            NodeKind::Superblock,
            key_size,
            value_size,
            block_size,
            root_no,
        );
        let free_head = if block_count > root_no + 1 {
            root_no + 1
        } else {
            SUPERBLOCK_NO // empty free list
        };
        superblock.header_mut().set_free_next(free_head);
        cache.note_allocated(SUPERBLOCK_NO);
        superblock.write_to(&mut cache, SUPERBLOCK_NO)?;

        let root = Node::new(NodeKind::Root, key_size, value_size, block_size, root_no);
        cache.note_allocated(root_no);
        root.write_to(&mut cache, root_no)?;

        for block_no in root_no + 1..block_count {
            let mut free = Node::new(
                NodeKind::Unallocated,
                key_size,
                value_size,
                block_size,
                root_no,
            );
            let next = if block_no + 1 == block_count {
                SUPERBLOCK_NO
            } else {
                block_no + 1
            };
            free.header_mut().set_free_next(next);
            free.write_to(&mut cache, block_no)?;
        }

        debug!(
            "created index: {} blocks of {} bytes, {}-byte keys, {}-byte values",
            block_count, block_size, key_size, value_size
        );
        Ok(Self { cache, superblock })
    }

    /// Mounts an existing index by reading and validating the superblock.
    pub fn open(mut cache: C) -> Result<Self> {
        let superblock = Node::read_from(&mut cache, SUPERBLOCK_NO)?;
        let header = superblock.header();

        if superblock.kind()? != NodeKind::Superblock {
            bail!(IndexError::Corrupt(format!(
                "block {} is not a superblock",
                SUPERBLOCK_NO
            )));
        }
        ensure!(
            header.block_size() as usize == cache.block_size(),
            "index was written with {}-byte blocks, cache uses {}",
            header.block_size(),
            cache.block_size()
        );
        ensure!(
            header.key_size() > 0 && header.value_size() > 0,
            "superblock carries zero-width keys or values"
        );
        let root_no = header.root_block();
        if root_no == SUPERBLOCK_NO || root_no >= cache.block_count() {
            bail!(IndexError::Corrupt(format!(
                "superblock points at root block {} (block_count={})",
                root_no,
                cache.block_count()
            )));
        }

        debug!(
            "opened index: root block {}, {} keys",
            root_no,
            header.entry_count()
        );
        Ok(Self { cache, superblock })
    }

    /// Flushes the superblock and syncs the cache.
    pub fn detach(&mut self) -> Result<()> {
        self.write_superblock()?;
        self.cache.sync()
    }

    pub fn key_size(&self) -> usize {
        self.superblock.key_size()
    }

    pub fn value_size(&self) -> usize {
        self.superblock.value_size()
    }

    pub fn block_size(&self) -> usize {
        self.cache.block_size()
    }

    /// Block id of the current root.
    pub fn root_block(&self) -> u32 {
        self.superblock.header().root_block()
    }

    /// Total live keys across all leaves.
    pub fn key_count(&self) -> u64 {
        self.superblock.header().entry_count() as u64
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn into_cache(self) -> C {
        self.cache
    }

    pub(crate) fn write_superblock(&mut self) -> Result<()> {
        self.superblock.write_to(&mut self.cache, SUPERBLOCK_NO)
    }

    fn fresh_node(&self, kind: NodeKind) -> Node {
        Node::new(
            kind,
            self.superblock.header().key_size(),
            self.superblock.header().value_size(),
            self.cache.block_size(),
            self.root_block(),
        )
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        ensure!(
            key.len() == self.key_size(),
            "key is {} bytes, this index stores {}-byte keys",
            key.len(),
            self.key_size()
        );
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        ensure!(
            value.len() == self.value_size(),
            "value is {} bytes, this index stores {}-byte values",
            value.len(),
            self.value_size()
        );
        Ok(())
    }

    /// Point lookup. Returns the stored value, or `None` when the key is
    /// absent.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_key(key)?;
        let mut block_no = self.root_block();

        loop {
            let node = Node::read_from(&mut self.cache, block_no)?;
            match node.kind()? {
                NodeKind::Root | NodeKind::Interior => {
                    if node.entry_count() == 0 {
                        return Ok(None);
                    }
                    block_no = node.child_at(node.upper_bound(key)?)?;
                }
                NodeKind::Leaf => {
                    return match node.find_pair(key)? {
                        Some(slot) => Ok(Some(node.value_at(slot)?.to_vec())),
                        None => Ok(None),
                    };
                }
                other => bail!(IndexError::Corrupt(format!(
                    "lookup descended into a {:?} block {}",
                    other, block_no
                ))),
            }
        }
    }

    /// Overwrites the value stored under `key` in place. Never changes the
    /// tree structure; fails with [`IndexError::KeyNotFound`] when the key
    /// is absent.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        let mut block_no = self.root_block();

        loop {
            let mut node = Node::read_from(&mut self.cache, block_no)?;
            match node.kind()? {
                NodeKind::Root | NodeKind::Interior => {
                    if node.entry_count() == 0 {
                        bail!(IndexError::KeyNotFound);
                    }
                    block_no = node.child_at(node.upper_bound(key)?)?;
                }
                NodeKind::Leaf => match node.find_pair(key)? {
                    Some(slot) => {
                        node.set_value(slot, value)?;
                        node.write_to(&mut self.cache, block_no)?;
                        return Ok(());
                    }
                    None => bail!(IndexError::KeyNotFound),
                },
                other => bail!(IndexError::Corrupt(format!(
                    "update descended into a {:?} block {}",
                    other, block_no
                ))),
            }
        }
    }

    /// Inserts a new pair. Duplicate keys are rejected with
    /// [`IndexError::KeyExists`]; a full free list surfaces as
    /// [`IndexError::NoSpace`] with nothing observable changed.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;

        let root_no = self.root_block();
        let root = Node::read_from(&mut self.cache, root_no)?;
        if root.entry_count() == 0 {
            self.seed_root(key)?;
        } else if root.is_full()? {
            // A previous insert ran out of blocks before the tree could
            // grow; make room before descending.
            self.grow_root()?;
        }

        if self.lookup(key)?.is_some() {
            bail!(IndexError::KeyExists);
        }

        let root_no = self.root_block();
        match self.place_entry(root_no, key, value)? {
            InsertOutcome::Done => {}
            InsertOutcome::Split { .. } => bail!(IndexError::Corrupt(
                "root block reported a split of itself".into()
            )),
        }

        let root = Node::read_from(&mut self.cache, root_no)?;
        if root.is_full()? {
            match self.grow_root() {
                Ok(()) => {}
                // The entry is already placed and counted; the tree grows
                // once blocks are available again.
                Err(err) if is_no_space(&err) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Removal is not supported by this index version.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        bail!(IndexError::Unimplemented)
    }

    /// First insert into an empty tree: allocate two leaves and give the
    /// root a single router entry, so the general path can place the pair.
    fn seed_root(&mut self, key: &[u8]) -> Result<()> {
        let root_no = self.root_block();
        let left = self.allocate_block()?;
        let right = match self.allocate_block() {
            Ok(block_no) => block_no,
            Err(err) => {
                self.release_unwritten_block(left)?;
                return Err(err);
            }
        };

        let leaf = self.fresh_node(NodeKind::Leaf);
        leaf.write_to(&mut self.cache, left)?;
        leaf.write_to(&mut self.cache, right)?;

        let mut root = Node::read_from(&mut self.cache, root_no)?;
        root.header_mut().set_entry_count(1);
        root.set_key(0, key)?;
        root.set_child(0, left)?;
        root.set_child(1, right)?;
        root.write_to(&mut self.cache, root_no)?;

        trace!(
            "seeded root {}: leaves {} and {} around the first key",
            root_no,
            left,
            right
        );
        Ok(())
    }

    /// Recursive placement. The caller guarantees the key is not present.
    fn place_entry(&mut self, block_no: u32, key: &[u8], value: &[u8]) -> Result<InsertOutcome> {
        let mut block_no = block_no;
        let mut node = Node::read_from(&mut self.cache, block_no)?;
        let kind = node.kind()?;
        if !kind.is_tree_node() {
            bail!(IndexError::Corrupt(format!(
                "insert descended into a {:?} block {}",
                kind, block_no
            )));
        }

        // A node below the root can be sitting at capacity if an earlier
        // insert could not allocate its split block. Make room first; on
        // failure nothing has been touched.
        let mut deferred_split = None;
        if kind != NodeKind::Root && node.is_full()? {
            let (new_block, separator) = self.split_block(block_no)?;
            if key >= separator.as_slice() {
                block_no = new_block;
            }
            node = Node::read_from(&mut self.cache, block_no)?;
            deferred_split = Some((new_block, separator));
        }

        match kind {
            NodeKind::Leaf => {
                let slot = node.upper_bound(key)?;
                node.insert_pair(slot, key, value)?;
                node.write_to(&mut self.cache, block_no)?;
                self.bump_key_count()?;
            }
            NodeKind::Root | NodeKind::Interior => {
                let child = node.child_at(node.upper_bound(key)?)?;
                match self.place_entry(child, key, value)? {
                    InsertOutcome::Done => {}
                    InsertOutcome::Split {
                        separator,
                        new_block,
                    } => {
                        let slot = node.upper_bound(&separator)?;
                        node.insert_separator(slot, &separator, new_block)?;
                        node.write_to(&mut self.cache, block_no)?;
                    }
                }
            }
            _ => unreachable!("kind validated above"),
        }

        if let Some((new_block, separator)) = deferred_split {
            return Ok(InsertOutcome::Split {
                separator,
                new_block,
            });
        }
        if kind != NodeKind::Root && node.is_full()? {
            match self.split_block(block_no) {
                Ok((new_block, separator)) => {
                    return Ok(InsertOutcome::Split {
                        separator,
                        new_block,
                    })
                }
                // The entry is placed and counted; leave the node at
                // capacity and split it once blocks are available.
                Err(err) if is_no_space(&err) => return Ok(InsertOutcome::Done),
                Err(err) => return Err(err),
            }
        }
        Ok(InsertOutcome::Done)
    }

    /// Splits the full node at `block_no` into itself and a fresh right
    /// sibling, returning the new block and the separator for the parent.
    /// Splitting the root relabels both halves interior; the caller
    /// installs the new root.
    fn split_block(&mut self, block_no: u32) -> Result<(u32, Vec<u8>)> {
        let mut left = Node::read_from(&mut self.cache, block_no)?;
        let kind = left.kind()?;
        if !kind.is_tree_node() {
            bail!(IndexError::Corrupt(format!(
                "split of a {:?} block {}",
                kind, block_no
            )));
        }

        let new_block = self.allocate_block()?;
        let right_kind = match kind {
            NodeKind::Leaf => NodeKind::Leaf,
            _ => NodeKind::Interior,
        };
        let mut right = self.fresh_node(right_kind);

        let separator = match kind {
            NodeKind::Leaf => left.split_leaf_into(&mut right)?,
            _ => {
                let separator = left.split_interior_into(&mut right)?;
                if kind == NodeKind::Root {
                    left.header_mut().set_kind(NodeKind::Interior);
                }
                separator
            }
        };

        left.write_to(&mut self.cache, block_no)?;
        right.write_to(&mut self.cache, new_block)?;

        trace!(
            "split {:?} block {}: {} entries kept, {} moved to block {}",
            kind,
            block_no,
            left.entry_count(),
            right.entry_count(),
            new_block
        );
        Ok((new_block, separator))
    }

    /// Adds a level to the tree: the old root splits into two interior
    /// nodes and a freshly allocated block becomes the root above them.
    fn grow_root(&mut self) -> Result<()> {
        let old_root = self.root_block();
        let new_root_no = self.allocate_block()?;
        let (new_block, separator) = match self.split_block(old_root) {
            Ok(split) => split,
            Err(err) => {
                // Nothing structural happened yet; hand the block back.
                self.release_unwritten_block(new_root_no)?;
                return Err(err);
            }
        };

        let mut root = self.fresh_node(NodeKind::Root);
        root.header_mut().set_root_block(new_root_no);
        root.header_mut().set_entry_count(1);
        root.set_key(0, &separator)?;
        root.set_child(0, old_root)?;
        root.set_child(1, new_block)?;
        root.write_to(&mut self.cache, new_root_no)?;

        self.superblock.header_mut().set_root_block(new_root_no);
        self.write_superblock()?;

        debug!(
            "tree grew a level: root moved from block {} to block {}",
            old_root, new_root_no
        );
        Ok(())
    }

    fn bump_key_count(&mut self) -> Result<()> {
        let count = self.superblock.header().entry_count();
        self.superblock.header_mut().set_entry_count(count + 1);
        self.write_superblock()
    }

    /// Blocks currently on the free list.
    pub fn free_block_count(&mut self) -> Result<usize> {
        Ok(self.free_list_blocks()?.len())
    }

    /// Every pair in ascending key order.
    pub fn entries(&mut self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        let root_no = self.root_block();
        self.collect_entries(root_no, &mut out)?;
        Ok(out)
    }

    fn collect_entries(&mut self, block_no: u32, out: &mut Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        let node = Node::read_from(&mut self.cache, block_no)?;
        match node.kind()? {
            NodeKind::Leaf => {
                for slot in 0..node.entry_count() {
                    out.push((node.key_at(slot)?.to_vec(), node.value_at(slot)?.to_vec()));
                }
            }
            NodeKind::Root | NodeKind::Interior => {
                if node.entry_count() == 0 {
                    return Ok(());
                }
                for slot in 0..=node.entry_count() {
                    self.collect_entries(node.child_at(slot)?, out)?;
                }
            }
            other => bail!(IndexError::Corrupt(format!(
                "traversal reached a {:?} block {}",
                other, block_no
            ))),
        }
        Ok(())
    }
}
